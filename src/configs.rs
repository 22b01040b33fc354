use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub ca: CaConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaConfig {
    pub root_cert_path: PathBuf,
    pub root_key_path: PathBuf,
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
}

fn default_domain_suffix() -> String {
    "@domain.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub index_path: PathBuf,
    #[serde(default = "default_new_cert_dir")]
    pub new_cert_dir: PathBuf,
}

fn default_new_cert_dir() -> PathBuf {
    PathBuf::from("newcerts")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_max_expiry_days")]
    pub max_expiry_days: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_expiry_days: default_max_expiry_days(),
        }
    }
}

fn default_max_expiry_days() -> u32 {
    365 // 1 year
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8443
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [ca]
            root_cert_path = "certs/root.pem"
            root_key_path = "certs/root.key"

            [ledger]
            index_path = "db/index.txt"
            "#,
        )
        .unwrap();

        assert_eq!(config.ca.domain_suffix, "@domain.com");
        assert_eq!(config.ledger.new_cert_dir, PathBuf::from("newcerts"));
        assert_eq!(config.policy.max_expiry_days, 365);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8443);
        assert!(config.server.tls_cert_path.is_none());
    }

    #[test]
    fn test_full_config_round_trip() {
        let config: AppConfig = toml::from_str(
            r#"
            [ca]
            root_cert_path = "root.pem"
            root_key_path = "root.key"
            domain_suffix = "@corp.example"

            [ledger]
            index_path = "index.txt"
            new_cert_dir = "issued"

            [policy]
            max_expiry_days = 90

            [server]
            host = "0.0.0.0"
            port = 9443
            tls_cert_path = "server.pem"
            tls_key_path = "server.key"
            "#,
        )
        .unwrap();

        assert_eq!(config.ca.domain_suffix, "@corp.example");
        assert_eq!(config.policy.max_expiry_days, 90);
        assert_eq!(config.server.port, 9443);
        assert_eq!(
            config.server.tls_key_path,
            Some(PathBuf::from("server.key"))
        );
    }
}
