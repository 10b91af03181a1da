// Client configuration.
// Logging defaults to on in debug builds and off in release builds.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const DEFAULT_SIGNALING_HOST: &str = "localhost";
pub const DEFAULT_SIGNALING_PORT: u16 = 8080;
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_CANDIDATE_BUFFER: usize = 64;

const ENV_HOST: &str = "PEERCALL_SIGNALING_HOST";
const ENV_PORT: &str = "PEERCALL_SIGNALING_PORT";
const ENV_TLS: &str = "PEERCALL_SIGNALING_TLS";

/// Full client configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub signaling: SignalingConfig,
    pub ice_servers: IceServers,
    pub call: CallPolicy,
    pub logging: LoggingConfig,
}

/// Where the discovery/relay service lives
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SignalingConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub path: String,
}

/// ICE server list; defaults to the public Google STUN pair
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct IceServers(pub Vec<IceServerConfig>);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// A single STUN or TURN server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IceServerConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: IceServerKind,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Call behaviour knobs
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CallPolicy {
    /// Send decline-call / end-call to the peer instead of relying on transport timeouts
    pub signal_teardown: bool,
    /// Remote candidates kept per call while no negotiator exists
    pub candidate_buffer_capacity: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SIGNALING_HOST.to_string(),
            port: DEFAULT_SIGNALING_PORT,
            tls: false,
            path: "/".to_string(),
        }
    }
}

impl Default for IceServers {
    fn default() -> Self {
        IceServers(vec![
            IceServerConfig {
                id: Some("default-stun".into()),
                kind: IceServerKind::Stun,
                url: "stun:stun.l.google.com:19302".into(),
                username: None,
                credential: None,
            },
            IceServerConfig {
                id: Some("default-stun-1".into()),
                kind: IceServerKind::Stun,
                url: "stun:stun1.l.google.com:19302".into(),
                username: None,
                credential: None,
            },
        ])
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            signal_teardown: true,
            candidate_buffer_capacity: DEFAULT_CANDIDATE_BUFFER,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl SignalingConfig {
    /// WebSocket URL of the relay service
    pub fn url(&self) -> Result<Url, ConfigError> {
        let scheme = if self.tls { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        Ok(Url::parse(&format!(
            "{scheme}://{}:{}{path}",
            self.host, self.port
        ))?)
    }
}

impl IceServers {
    pub fn iter(&self) -> std::slice::Iter<'_, IceServerConfig> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file, then applies environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var(ENV_HOST) {
            self.signaling.host = host;
        }
        if let Ok(port) = std::env::var(ENV_PORT) {
            self.signaling.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_PORT}={port} is not a port")))?;
        }
        if let Ok(tls) = std::env::var(ENV_TLS) {
            self.signaling.tls = matches!(tls.as_str(), "1" | "true" | "yes");
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signaling.host.trim().is_empty() {
            return Err(ConfigError::Invalid("signaling host cannot be empty".into()));
        }

        for server in self.ice_servers.iter() {
            if server.url.trim().is_empty() {
                return Err(ConfigError::Invalid("ICE server URL cannot be empty".into()));
            }
            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "TURN server {} requires username and credential",
                    server.url
                )));
            }
        }

        if self.call.candidate_buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "candidate_buffer_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_point_at_local_relay() {
        let config = ClientConfig::default();
        assert_eq!(
            config.signaling.url().unwrap().as_str(),
            "ws://localhost:8080/"
        );
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.call.signal_teardown);
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            [signaling]
            host = "signal.example.org"
            port = 8443
            tls = true
            path = "socket"

            [call]
            signal_teardown = false
            "#,
        )
        .unwrap();

        assert_eq!(
            config.signaling.url().unwrap().as_str(),
            "wss://signal.example.org:8443/socket"
        );
        assert!(!config.call.signal_teardown);
        assert_eq!(config.call.candidate_buffer_capacity, DEFAULT_CANDIDATE_BUFFER);
        assert_eq!(config.ice_servers, IceServers::default());
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let err = ClientConfig::from_toml_str(
            r#"
            [[ice_servers]]
            type = "turn"
            url = "turn.example.org:3478"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_ice_url_is_rejected() {
        let err = ClientConfig::from_toml_str(
            r#"
            [[ice_servers]]
            type = "stun"
            url = ""
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[ice_servers]]
            type = "turn"
            url = "turn:turn.example.org:3478"
            username = "alice"
            credential = "secret"

            [logging]
            enabled = true
            filter = "peercall=debug"
            "#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.logging.filter, "peercall=debug");
    }
}
