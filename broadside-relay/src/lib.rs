//! Broadside relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts WebSocket connections from game clients and forwards every text
//! message to all connected clients, alongside serving the game's static
//! frontend.

pub mod config;
pub mod relay;
