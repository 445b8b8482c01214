//! Host and controller ends of the sync protocol
//!
//! The host sends SEND_ID on accept and waits for HELLO before sending any
//! graph traffic. From then on the controller's [`Mirror`] follows the
//! host through SEND_NODES and CHANGE_PARAM(S), and the controller reports
//! its edits and selection back.

mod controller;
mod host;

pub use controller::{Controller, Mirror};
pub use host::{Host, Peer, ServeHandle};
