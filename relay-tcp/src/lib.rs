pub mod client;
pub mod protocol;
pub mod server;

pub use client::TcpLink;
pub use protocol::Frame;
pub use server::{codec, process_connection, serve};

// Re-export Bytes for convenience
pub use bytes::Bytes;
