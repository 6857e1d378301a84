//! Reverse TCP tunnel / port multiplexer.
//!
//! An outbound-only [`starter`] dials a publicly reachable [`redirector`]
//! over one TCP control connection. The redirector listens on whatever
//! ports the starter advertises and relays every inbound byte — in both
//! directions — over that one connection, framed by [`frame::FrameCodec`].
//! The starter demultiplexes frames back onto local backend TCP
//! connections chosen by destination port.

pub mod config;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod redirector;
pub mod session;
pub mod starter;

pub use error::{Result, TunnelError};
