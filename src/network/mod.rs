//! Network subsystem: TCP control channel and UDP data channel

pub mod control;
pub mod data;
pub mod udp;

pub use control::ControlChannel;
pub use data::DataChannel;
pub use udp::create_socket;
