//! Tunnel address model
//!
//! A tunnel pairs a local TLS listening endpoint with a plaintext remote TCP endpoint.
//! This crate owns the textual grammar used on the command line and in config files:
//!
//! ```text
//! <local-host>:<local-port>:<remote-host>:<remote-port>
//! ```

pub mod endpoint;
pub mod tunnel;

pub use endpoint::Endpoint;
pub use tunnel::TunnelSpec;

use thiserror::Error;

/// Host used when the local side of a tunnel leaves its host empty (`:9000`).
pub const ANY_HOST: &str = "0.0.0.0";

/// Host used when the remote side of a tunnel leaves its host empty.
pub const DEFAULT_REMOTE_HOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("bad tunnel {0:?}: expected <local-host>:<local-port>:<remote-host>:<remote-port>")]
    MissingSeparator(String),

    #[error("bad endpoint {0:?}: missing port")]
    MissingPort(String),

    #[error("bad endpoint {input:?}: invalid port {port:?}")]
    InvalidPort { input: String, port: String },

    #[error("bad endpoint {0:?}: unterminated '[' in IPv6 host")]
    UnterminatedBracket(String),

    #[error("bad endpoint {0:?}: remote port 0 cannot be dialed")]
    ZeroRemotePort(String),

    #[error("error parsing local addr: {0}")]
    Local(Box<SpecError>),

    #[error("error parsing remote addr: {0}")]
    Remote(Box<SpecError>),
}
