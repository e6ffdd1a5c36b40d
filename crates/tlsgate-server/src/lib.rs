//! Mutually authenticated TLS tunnel server
//!
//! Each tunnel terminates TLS on a local address, requiring a client certificate from
//! a trusted CA, and relays the decrypted byte stream unmodified to a plaintext TCP
//! endpoint until either side closes.
//!
//! Every accepted connection gets its own task and its own outbound connection. There
//! is no admission control; concurrency is bounded only by the OS.

mod forwarder;
pub mod listener;
pub mod pump;
pub mod supervisor;
pub mod tunnel;

pub use forwarder::ConnectionForwarder;
pub use listener::{Incoming, TlsConnection, TlsListener};
pub use pump::{CloseLatch, ConnectionSession, Direction, PumpReport, SessionReport};
pub use supervisor::{ListenerFailurePolicy, Supervisor};
pub use tunnel::{ConnectionIdGenerator, TunnelListener};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Accept failed on {local}: {source}")]
    AcceptError {
        local: String,
        source: std::io::Error,
    },

    #[error("Failed to connect to remote {address}: {source}")]
    DialError {
        address: String,
        source: std::io::Error,
    },

    #[error("Tunnel listener task panicked: {0}")]
    ListenerPanicked(String),

    #[error("No tunnels configured")]
    NoTunnels,

    #[error("All tunnels have stopped")]
    AllTunnelsStopped,
}
