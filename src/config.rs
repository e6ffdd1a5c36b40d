//! Startup configuration: an optional YAML file merged with command-line arguments
//!
//! ```yaml
//! cert_dir: certs
//! client_ca: clientcas.pem
//! exit_on_listener_failure: false
//! tunnels:
//!   - "0.0.0.0:8443:127.0.0.1:8080"
//!   - local: "[::]:9443"
//!     remote: "db.internal:5432"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use tlsgate_proto::{Endpoint, SpecError, TunnelSpec};
use tlsgate_server::ListenerFailurePolicy;

pub const DEFAULT_CERT_DIR: &str = "./certs";
pub const DEFAULT_CLIENT_CA: &str = "clientcas.pem";

/// Contents of a configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub tunnels: Vec<TunnelEntry>,

    pub cert_dir: Option<PathBuf>,

    pub client_ca: Option<PathBuf>,

    #[serde(default)]
    pub exit_on_listener_failure: bool,
}

/// A tunnel written either as `"local-host:port:remote-host:port"` or as a
/// `{ local, remote }` map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TunnelEntry {
    Compact(String),
    Structured { local: String, remote: String },
}

impl TunnelEntry {
    pub fn to_spec(&self) -> Result<TunnelSpec, SpecError> {
        match self {
            TunnelEntry::Compact(spec) => spec.parse(),
            TunnelEntry::Structured { local, remote } => {
                let local: Endpoint = local
                    .trim()
                    .parse()
                    .map_err(|e| SpecError::Local(Box::new(e)))?;
                let remote: Endpoint = remote
                    .trim()
                    .parse()
                    .map_err(|e| SpecError::Remote(Box::new(e)))?;
                TunnelSpec::new(local, remote)
            }
        }
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.cert_dir = config.cert_dir.map(|p| resolve_relative(base, p));
        config.client_ca = config.client_ca.map(|p| resolve_relative(base, p));

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ConfigFile =
            serde_yaml::from_str(content).context("Failed to parse YAML config")?;
        Ok(config)
    }
}

fn resolve_relative(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path
    }
}

/// Values given on the command line. Anything set here wins over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub tunnels: Vec<TunnelSpec>,
    pub cert_dir: Option<PathBuf>,
    pub client_ca: Option<PathBuf>,
    pub exit_on_listener_failure: bool,
}

/// Fully resolved startup settings.
#[derive(Debug)]
pub struct Settings {
    pub tunnels: Vec<TunnelSpec>,
    pub cert_dir: PathBuf,
    pub client_ca: PathBuf,
    pub failure_policy: ListenerFailurePolicy,
}

impl Settings {
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        let file = match &overrides.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        Self::merge(file, overrides)
    }

    /// File tunnels come first, then command-line tunnels.
    pub fn merge(file: ConfigFile, overrides: Overrides) -> Result<Self> {
        let mut tunnels = Vec::with_capacity(file.tunnels.len() + overrides.tunnels.len());
        for (index, entry) in file.tunnels.iter().enumerate() {
            let spec = entry
                .to_spec()
                .with_context(|| format!("Invalid tunnel #{} in config file: {:?}", index, entry))?;
            tunnels.push(spec);
        }
        tunnels.extend(overrides.tunnels);

        if tunnels.is_empty() {
            bail!("No tunnels configured; pass at least one <local-host>:<local-port>:<remote-host>:<remote-port>");
        }

        let failure_policy = if overrides.exit_on_listener_failure || file.exit_on_listener_failure
        {
            ListenerFailurePolicy::ExitProcess
        } else {
            ListenerFailurePolicy::StopTunnel
        };

        Ok(Self {
            tunnels,
            cert_dir: overrides
                .cert_dir
                .or(file.cert_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CERT_DIR)),
            client_ca: overrides
                .client_ca
                .or(file.client_ca)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_CA)),
            failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(s: &str) -> TunnelSpec {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_mixed_tunnel_forms() {
        let yaml = r#"
tunnels:
  - "127.0.0.1:9000:127.0.0.1:9100"
  - local: "[::1]:9443"
    remote: "db.internal:5432"
"#;
        let config = ConfigFile::parse(yaml).unwrap();
        assert_eq!(config.tunnels.len(), 2);

        let specs: Vec<TunnelSpec> = config
            .tunnels
            .iter()
            .map(|t| t.to_spec().unwrap())
            .collect();
        assert_eq!(specs[0], spec("127.0.0.1:9000:127.0.0.1:9100"));
        assert_eq!(specs[1].local().host(), "::1");
        assert_eq!(specs[1].local().port(), 9443);
        assert_eq!(specs[1].remote().host(), "db.internal");
        assert_eq!(specs[1].remote().port(), 5432);
    }

    #[test]
    fn test_structured_entry_fills_default_hosts() {
        let entry = TunnelEntry::Structured {
            local: ":8443".to_string(),
            remote: ":8080".to_string(),
        };
        let spec = entry.to_spec().unwrap();
        assert_eq!(spec.local().host(), "0.0.0.0");
        assert_eq!(spec.remote().host(), "localhost");
    }

    #[test]
    fn test_structured_entry_rejects_bad_remote() {
        let entry = TunnelEntry::Structured {
            local: "127.0.0.1:8443".to_string(),
            remote: "localhost".to_string(),
        };
        assert!(matches!(entry.to_spec(), Err(SpecError::Remote(_))));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(ConfigFile::parse("tunnel: []\n").is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::merge(
            ConfigFile::default(),
            Overrides {
                tunnels: vec![spec(":9000::9100")],
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(settings.cert_dir, PathBuf::from(DEFAULT_CERT_DIR));
        assert_eq!(settings.client_ca, PathBuf::from(DEFAULT_CLIENT_CA));
        assert_eq!(settings.failure_policy, ListenerFailurePolicy::StopTunnel);
        assert_eq!(settings.tunnels.len(), 1);
    }

    #[test]
    fn test_no_tunnels_is_an_error() {
        let result = Settings::merge(ConfigFile::default(), Overrides::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_file_tunnel_is_an_error() {
        let file = ConfigFile::parse("tunnels: [\"127.0.0.1:9000\"]\n").unwrap();
        let err = Settings::merge(file, Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("Invalid tunnel #0"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = ConfigFile::parse(
            r#"
cert_dir: /etc/tlsgate/certs
client_ca: /etc/tlsgate/cas.pem
exit_on_listener_failure: true
tunnels:
  - "127.0.0.1:9000:127.0.0.1:9100"
"#,
        )
        .unwrap();

        let settings = Settings::merge(
            file,
            Overrides {
                tunnels: vec![spec("127.0.0.1:9001:127.0.0.1:9101")],
                cert_dir: Some(PathBuf::from("/srv/certs")),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            settings.tunnels,
            vec![
                spec("127.0.0.1:9000:127.0.0.1:9100"),
                spec("127.0.0.1:9001:127.0.0.1:9101"),
            ]
        );
        assert_eq!(settings.cert_dir, PathBuf::from("/srv/certs"));
        assert_eq!(settings.client_ca, PathBuf::from("/etc/tlsgate/cas.pem"));
        assert_eq!(settings.failure_policy, ListenerFailurePolicy::ExitProcess);
    }

    #[test]
    fn test_load_resolves_paths_against_file_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tlsgate.yaml");
        fs::write(
            &path,
            "cert_dir: certs\nclient_ca: /abs/cas.pem\ntunnels: [\":9000::9100\"]\n",
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.cert_dir, Some(dir.path().join("certs")));
        assert_eq!(config.client_ca, Some(PathBuf::from("/abs/cas.pem")));
    }

    #[test]
    fn test_resolve_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Settings::resolve(Overrides {
            config: Some(dir.path().join("missing.yaml")),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
