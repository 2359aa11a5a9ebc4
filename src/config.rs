use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for content-addressed blobs
    #[serde(default = "default_blob_path")]
    pub blob_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared with the identity provider that issues bearer tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Per-user deduplicated storage quota. Unset means unlimited.
    #[serde(default)]
    pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AccessConfig {
    /// Allow admins to delete handles owned by other users
    #[serde(default)]
    pub admin_can_delete_any: bool,
}

/// Per-user request rate on authenticated routes
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second. Zero turns limiting off.
    #[serde(default = "default_rate_per_second")]
    pub per_second: u32,
    #[serde(default = "default_rate_burst")]
    pub burst: u32,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "data/filevault.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_blob_path() -> String {
    "data/blobs".to_string()
}

pub(crate) fn default_jwt_secret() -> String {
    "dev_jwt_secret".to_string()
}

fn default_max_upload_bytes() -> u64 {
    200 * 1024 * 1024
}

fn default_rate_per_second() -> u32 {
    2
}

fn default_rate_burst() -> u32 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_path: default_blob_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            quota_bytes: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_rate_per_second(),
            burst: default_rate_burst(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.normalize();
        config.ensure_directories()?;

        if config.auth.jwt_secret == default_jwt_secret() {
            tracing::warn!("Using the built-in development JWT secret; set FV_CONF_AUTH_JWT_SECRET");
        }

        Ok(config)
    }

    /// Load configuration from filevault.toml or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = [
            "filevault.toml",
            "config.toml",
            "data/filevault.toml",
            "data/config.toml",
        ];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config = Self::from_toml(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// A zero quota means unlimited, from the file or the environment
    fn normalize(&mut self) {
        self.upload.quota_bytes = self.upload.quota_bytes.filter(|q| *q > 0);
    }

    /// Apply environment variable overrides
    /// Format: FV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(val) = lookup("FV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = lookup("FV_CONF_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }

        // Database overrides
        if let Some(val) = lookup("FV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Some(n) = lookup("FV_CONF_DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.database.max_connections = n;
        }

        // Storage overrides
        if let Some(val) = lookup("FV_CONF_STORAGE_BLOB_PATH") {
            self.storage.blob_path = val;
        }

        // Auth overrides
        if let Some(val) = lookup("FV_CONF_AUTH_JWT_SECRET") {
            if !val.trim().is_empty() {
                self.auth.jwt_secret = val;
            }
        }

        // Upload overrides
        if let Some(n) = lookup("FV_CONF_UPLOAD_MAX_BYTES").and_then(|v| v.parse().ok()) {
            self.upload.max_upload_bytes = n;
        }
        if let Some(val) = lookup("FV_CONF_UPLOAD_QUOTA_BYTES") {
            // Empty disables the quota
            self.upload.quota_bytes = val.parse().ok();
        }

        // Rate limit overrides
        if let Some(n) = lookup("FV_CONF_RATE_LIMIT_PER_SECOND").and_then(|v| v.parse().ok()) {
            self.rate_limit.per_second = n;
        }
        if let Some(n) = lookup("FV_CONF_RATE_LIMIT_BURST").and_then(|v| v.parse().ok()) {
            self.rate_limit.burst = n;
        }

        // Access overrides
        if let Some(v) = lookup("FV_CONF_ACCESS_ADMIN_CAN_DELETE_ANY").and_then(|v| v.parse().ok()) {
            self.access.admin_can_delete_any = v;
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        fs::create_dir_all(&self.storage.blob_path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.upload.max_upload_bytes, 200 * 1024 * 1024);
        assert!(config.upload.quota_bytes.is_none());
        assert!(!config.access.admin_can_delete_any);
        assert_eq!(config.rate_limit.per_second, 2);
        assert_eq!(config.rate_limit.burst, 5);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [storage]
            blob_path = "/srv/blobs"

            [upload]
            quota_bytes = 1048576
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.blob_path, "/srv/blobs");
        assert_eq!(config.upload.quota_bytes, Some(1048576));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.path, "data/filevault.db");
    }

    #[test]
    fn test_zero_quota_in_file_is_unlimited() {
        let config = Config::from_toml("[upload]\nquota_bytes = 0\n").unwrap();
        assert!(config.upload.quota_bytes.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FV_CONF_SERVER_PORT", "9090"),
            ("FV_CONF_AUTH_JWT_SECRET", "s3cret"),
            ("FV_CONF_UPLOAD_QUOTA_BYTES", "0"),
            ("FV_CONF_ACCESS_ADMIN_CAN_DELETE_ANY", "true"),
            ("FV_CONF_DATABASE_MAX_CONNECTIONS", "not-a-number"),
            ("FV_CONF_RATE_LIMIT_BURST", "20"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.upload.quota_bytes = Some(10);
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        config.normalize();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert!(config.upload.quota_bytes.is_none());
        assert!(config.access.admin_can_delete_any);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.rate_limit.burst, 20);
        assert_eq!(config.rate_limit.per_second, 2);
    }
}
