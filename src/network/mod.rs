pub mod client;
pub mod frame;
pub mod transport;

pub use client::{ConnectionState, StompClient, TransportHandle, spawn_transport};
pub use frame::{Command, Frame, HeartBeat};
