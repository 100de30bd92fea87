use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::core_types::KeyScheme;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Mirror log lines to stdout. The load generator turns this off so it
    /// doesn't fight the progress line.
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub loadtest: LoadTestConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Full connection URL; overrides the discrete fields below when set
    pub url: Option<String>,
    /// Cluster endpoint (`CLUSTER_ENDPOINT`)
    pub endpoint: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Region hint (`AWS_REGION`), substituted into `token_command`
    pub region: Option<String>,
    /// Fixed password (`STORE_PASSWORD`)
    pub password: Option<String>,
    /// External token generator; `{endpoint}`, `{region}` and `{user}` are
    /// substituted. Takes precedence over `password`.
    pub token_command: Option<Vec<String>>,
    pub token_lifetime_secs: u64,
    /// disable | prefer | require | verify-full
    pub ssl_mode: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Accounts created by the in-memory store at startup
    pub memory_accounts: usize,
    pub key_scheme: KeyScheme,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Postgres,
            url: None,
            endpoint: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "admin".to_string(),
            region: None,
            password: None,
            token_command: None,
            token_lifetime_secs: 900,
            ssl_mode: "prefer".to_string(),
            max_connections: 20,
            acquire_timeout_ms: 5000,
            memory_accounts: 1000,
            key_scheme: KeyScheme::Sequential,
        }
    }
}

impl StoreConfig {
    /// `token_command` with placeholders filled in
    pub fn resolved_token_command(&self) -> Option<Vec<String>> {
        let region = self.region.as_deref().unwrap_or("");
        self.token_command.as_ref().map(|cmd| {
            cmd.iter()
                .map(|arg| {
                    arg.replace("{endpoint}", &self.endpoint)
                        .replace("{region}", region)
                        .replace("{user}", &self.user)
                })
                .collect()
        })
    }
}

/// Transfer service flags as they appear in YAML
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransferSettings {
    pub record_history: bool,
    pub retry_on_conflict: bool,
    /// `None` retries forever
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: u64,
    pub include_telemetry: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            record_history: true,
            retry_on_conflict: true,
            max_retries: None,
            backoff_base_ms: None,
            backoff_cap_ms: 1000,
            include_telemetry: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub swagger: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            swagger: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Transfer endpoint base URL (`TRANSFER_ENDPOINT`)
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub iterations: usize,
    pub parallel_calls: usize,
    pub workers: usize,
    pub accounts: u64,
    pub starting_balance: String,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            iterations: 10,
            parallel_calls: 100,
            workers: 1,
            accounts: 1000,
            starting_balance: "100".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "occ_transfer.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            console: true,
            store: StoreConfig::default(),
            transfer: TransferSettings::default(),
            server: ServerConfig::default(),
            loadtest: LoadTestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml` and apply environment overrides
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(format!("config/{}.yaml", env))?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().display().to_string();
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Environment wins over file values
    pub fn apply_env_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = var("CLUSTER_ENDPOINT") {
            self.store.endpoint = endpoint;
        }
        if let Some(region) = var("AWS_REGION") {
            self.store.region = Some(region);
        }
        if let Some(password) = var("STORE_PASSWORD") {
            self.store.password = Some(password);
        }
        if let Some(url) = var("DATABASE_URL") {
            self.store.url = Some(url);
        }
        if let Some(endpoint) = var("TRANSFER_ENDPOINT") {
            self.loadtest.endpoint = endpoint;
        }
        if let Some(size) = var("STORE_POOL_SIZE") {
            self.store.max_connections = size.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "STORE_POOL_SIZE",
                value: size.clone(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
log_level: debug
log_dir: ./logs
log_file: test.log
use_json: false
rotation: never
store:
  kind: memory
  max_connections: 8
"#;

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.store.max_connections, 8);
        assert_eq!(config.store.port, 5432);
        assert!(config.console);
        assert!(config.transfer.retry_on_conflict);
        assert_eq!(config.transfer.max_retries, None);
        assert_eq!(config.loadtest.request_timeout_secs, 120);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = AppConfig::from_file("config/does-not-exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_yaml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"log_level: [unclosed").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CLUSTER_ENDPOINT", "abc.dsql.example.com"),
            ("AWS_REGION", "us-east-1"),
            ("TRANSFER_ENDPOINT", "http://10.0.0.1:9000"),
            ("STORE_POOL_SIZE", "64"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.store.endpoint, "abc.dsql.example.com");
        assert_eq!(config.store.region.as_deref(), Some("us-east-1"));
        assert_eq!(config.loadtest.endpoint, "http://10.0.0.1:9000");
        assert_eq!(config.store.max_connections, 64);

        let err = config
            .apply_env_overrides(|k| (k == "STORE_POOL_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_token_command_placeholders() {
        let store = StoreConfig {
            endpoint: "cluster.local".to_string(),
            region: Some("eu-west-1".to_string()),
            token_command: Some(vec![
                "gen-token".to_string(),
                "--hostname".to_string(),
                "{endpoint}".to_string(),
                "--region={region}".to_string(),
            ]),
            ..StoreConfig::default()
        };
        assert_eq!(
            store.resolved_token_command().unwrap(),
            vec!["gen-token", "--hostname", "cluster.local", "--region=eu-west-1"]
        );
    }

    #[test]
    fn test_shipped_configs_parse() {
        let dev = AppConfig::from_file("config/dev.yaml").unwrap();
        assert_eq!(dev.store.kind, StoreKind::Postgres);
        assert_eq!(dev.server.port, 8080);

        let memory = AppConfig::from_file("config/memory.yaml").unwrap();
        assert_eq!(memory.store.kind, StoreKind::Memory);
        assert_eq!(memory.transfer.max_retries, Some(50));
        assert_eq!(memory.loadtest.workers, 2);
    }
}
