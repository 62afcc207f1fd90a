use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub proxy: ProxyConfig,
    pub sessions: SessionsConfig,
    pub branding: BrandingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            // Jellyfin's conventional port, so stock clients connect unchanged.
            port: 8096,
        }
    }
}

/// The fnOS server the bridge fronts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    /// Skip TLS verification for the NAS itself. Cloud storage hosts are
    /// always verified regardless of this flag.
    pub ignore_cert: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_redirects: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5666".to_string(),
            ignore_cert: false,
            timeout_ms: 10_000,
            max_retries: 5,
            retry_delay_ms: 100,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Budget for the upstream to answer with response headers. Body
    /// streaming is never timed out.
    pub header_timeout_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            header_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Where client sessions are persisted across restarts. Empty disables
    /// persistence.
    pub persist_path: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            persist_path: ".sessions.json".to_string(),
        }
    }
}

/// Identity the bridge presents to Jellyfin clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandingConfig {
    pub server_name: String,
    pub server_version: String,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            server_name: "fnbridge".to_string(),
            server_version: "10.12.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration with priority: environment variables, then config
    /// file (if provided), then defaults.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // FNBRIDGE_SERVER_PORT, FNBRIDGE_BACKEND_URL, etc.
        builder = builder.add_source(
            Environment::with_prefix("FNBRIDGE")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[must_use]
    pub fn session_persist_path(&self) -> Option<&str> {
        if self.sessions.persist_path.is_empty() {
            None
        } else {
            Some(&self.sessions.persist_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let config = Config::default();
        assert_eq!(config.server.port, 8096);
        assert!(!config.backend.url.is_empty());
        assert_eq!(config.proxy.header_timeout_seconds, 120);
        assert_eq!(config.branding.server_version, "10.12.0");
        assert_eq!(config.session_persist_path(), Some(".sessions.json"));
    }

    #[test]
    fn listen_address_joins_host_and_port() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 9000,
            },
            ..Config::default()
        };
        assert_eq!(config.listen_address(), "127.0.0.1:9000");
    }

    #[test]
    fn empty_persist_path_disables_persistence() {
        let config = Config {
            sessions: SessionsConfig {
                persist_path: String::new(),
            },
            ..Config::default()
        };
        assert!(config.session_persist_path().is_none());
    }
}
