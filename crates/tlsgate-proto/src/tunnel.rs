//! Tunnel definition: one local TLS endpoint paired with one remote TCP endpoint

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Endpoint, SpecError, ANY_HOST, DEFAULT_REMOTE_HOST};

/// An immutable (local, remote) endpoint pair. One `TunnelSpec` drives exactly one
/// tunnel listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TunnelSpec {
    local: Endpoint,
    remote: Endpoint,
}

impl TunnelSpec {
    /// Build a spec from already parsed endpoints.
    ///
    /// Empty hosts are filled in (`0.0.0.0` locally, `localhost` remotely). The local
    /// port may be 0 to bind an ephemeral port; the remote port may not.
    pub fn new(local: Endpoint, remote: Endpoint) -> Result<Self, SpecError> {
        if remote.port() == 0 {
            return Err(SpecError::Remote(Box::new(SpecError::ZeroRemotePort(
                remote.to_string(),
            ))));
        }

        Ok(Self {
            local: local.or_host(ANY_HOST),
            remote: remote.or_host(DEFAULT_REMOTE_HOST),
        })
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }
}

/// Split at the colon that ends the local port.
fn split_tunnel(s: &str) -> Result<(&str, &str), SpecError> {
    let missing = || SpecError::MissingSeparator(s.to_string());

    let port_colon = if s.starts_with('[') {
        let close = s.find(']').ok_or_else(|| {
            SpecError::Local(Box::new(SpecError::UnterminatedBracket(s.to_string())))
        })?;
        close + 1
    } else {
        s.find(':').ok_or_else(missing)?
    };

    let after_port = s.get(port_colon + 1..).ok_or_else(missing)?;
    let sep = port_colon + 1 + after_port.find(':').ok_or_else(missing)?;

    Ok((&s[..sep], &s[sep + 1..]))
}

impl FromStr for TunnelSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, remote) = split_tunnel(s.trim())?;
        let local = local
            .parse::<Endpoint>()
            .map_err(|e| SpecError::Local(Box::new(e)))?;
        let remote = remote
            .parse::<Endpoint>()
            .map_err(|e| SpecError::Remote(Box::new(e)))?;
        Self::new(local, remote)
    }
}

impl TryFrom<String> for TunnelSpec {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TunnelSpec> for String {
    fn from(value: TunnelSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TunnelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_tunnel() {
        let spec: TunnelSpec = "127.0.0.1:9000:127.0.0.1:9100".parse().unwrap();
        assert_eq!(spec.local(), &Endpoint::new("127.0.0.1", 9000));
        assert_eq!(spec.remote(), &Endpoint::new("127.0.0.1", 9100));
    }

    #[test]
    fn test_parse_hostnames() {
        let spec: TunnelSpec = "0.0.0.0:5433:db.internal:5432".parse().unwrap();
        assert_eq!(spec.local().port(), 5433);
        assert_eq!(spec.remote().host(), "db.internal");
        assert_eq!(spec.remote().port(), 5432);
    }

    #[test]
    fn test_parse_ipv6_on_both_sides() {
        let spec: TunnelSpec = "[::]:443:[fd00::7]:8080".parse().unwrap();
        assert_eq!(spec.local().host(), "::");
        assert_eq!(spec.local().port(), 443);
        assert_eq!(spec.remote().host(), "fd00::7");
        assert_eq!(spec.remote().port(), 8080);

        let mixed: TunnelSpec = "127.0.0.1:443:[::1]:8080".parse().unwrap();
        assert_eq!(mixed.remote().host(), "::1");
    }

    #[test]
    fn test_empty_hosts_get_defaults() {
        let spec: TunnelSpec = ":9000::9100".parse().unwrap();
        assert_eq!(spec.local().host(), ANY_HOST);
        assert_eq!(spec.remote().host(), DEFAULT_REMOTE_HOST);
    }

    #[test]
    fn test_ephemeral_local_port_allowed() {
        let spec: TunnelSpec = "127.0.0.1:0:127.0.0.1:80".parse().unwrap();
        assert_eq!(spec.local().port(), 0);
    }

    #[test]
    fn test_zero_remote_port_rejected() {
        let err = "127.0.0.1:9000:127.0.0.1:0"
            .parse::<TunnelSpec>()
            .unwrap_err();
        assert!(matches!(err, SpecError::Remote(_)));
    }

    #[test]
    fn test_missing_separator() {
        for input in ["", "9000", "127.0.0.1:9000", "[::1]:9000"] {
            let err = input.parse::<TunnelSpec>().unwrap_err();
            assert!(
                matches!(err, SpecError::MissingSeparator(_)),
                "{input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_errors_name_the_failing_side() {
        let err = "localhost:http:localhost:80"
            .parse::<TunnelSpec>()
            .unwrap_err();
        assert!(matches!(err, SpecError::Local(_)));
        assert!(err.to_string().starts_with("error parsing local addr"));

        let err = "localhost:80:localhost:eighty"
            .parse::<TunnelSpec>()
            .unwrap_err();
        assert!(matches!(err, SpecError::Remote(_)));

        // Extra fields end up in the remote port
        let err = "a:1:b:2:3".parse::<TunnelSpec>().unwrap_err();
        assert!(matches!(err, SpecError::Remote(_)));
    }

    #[test]
    fn test_display_is_canonical() {
        let spec: TunnelSpec = " [::1]:9000:backend:9100 ".parse().unwrap();
        assert_eq!(spec.to_string(), "[::1]:9000:backend:9100");
        assert_eq!(spec.to_string().parse::<TunnelSpec>().unwrap(), spec);
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let specs: Vec<TunnelSpec> =
            serde_yaml::from_str("- 127.0.0.1:9000:127.0.0.1:9100\n- \":5433:db:5432\"\n")
                .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].remote(), &Endpoint::new("db", 5432));

        let bad: Result<Vec<TunnelSpec>, _> = serde_yaml::from_str("- nonsense\n");
        assert!(bad.is_err());
    }
}
