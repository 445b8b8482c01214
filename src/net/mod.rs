//! Connections between the host and its controllers

mod connection;
mod manager;
pub mod memory;
mod message;
pub mod tcp;
pub mod wire;

pub use connection::*;
pub use manager::ConnectionManager;
pub use message::*;
