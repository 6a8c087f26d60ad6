//! gossipkv-wire: newline-framed wire messages and the TCP transport.
//!
//! Connections are one-shot: dial, send a single line, optionally read a
//! single reply line, close.

pub mod client;
pub mod message;

pub use client::{TcpTransport, Transport, WireError};
pub use message::{DataGossip, Message};
