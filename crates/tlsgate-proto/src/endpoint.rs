//! TCP endpoint: a host (name or literal) and a port

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SpecError;

/// A TCP endpoint as written in configuration: `host:port` or `[v6-literal]:port`.
///
/// The host is kept unresolved; name resolution happens when the endpoint is
/// bound or dialed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `(host, port)` form accepted by tokio's `ToSocketAddrs`, which takes IPv6
    /// literals without brackets.
    pub fn as_pair(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub(crate) fn or_host(mut self, host: &str) -> Self {
        if self.host.is_empty() {
            self.host = host.to_string();
        }
        self
    }
}

impl FromStr for Endpoint {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.strip_prefix('[') {
            Some(rest) => {
                let close = rest
                    .find(']')
                    .ok_or_else(|| SpecError::UnterminatedBracket(s.to_string()))?;
                let port = rest[close + 1..]
                    .strip_prefix(':')
                    .ok_or_else(|| SpecError::MissingPort(s.to_string()))?;
                (&rest[..close], port)
            }
            None => s
                .split_once(':')
                .ok_or_else(|| SpecError::MissingPort(s.to_string()))?,
        };

        // u16::from_str would also take a leading '+'
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SpecError::InvalidPort {
                input: s.to_string(),
                port: port.to_string(),
            });
        }
        let port = port.parse::<u16>().map_err(|_| SpecError::InvalidPort {
            input: s.to_string(),
            port: port.to_string(),
        })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
