//! Configuration loading and types for Filegate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, authentication, metadata persistence, blob
//! storage, upload policy, and logging.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session and login settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Blob storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload pipeline tuning.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Expose development-only routes (user/session dumps, table reset,
    /// anonymous listing).  Never enable in production.
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            dev_mode: false,
        }
    }
}

/// How new session IDs are minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionIdSource {
    /// 256 bits from the OS random source, hex encoded.
    #[default]
    Random,
    /// SHA-256 of the current nanosecond timestamp.  Low entropy; kept only
    /// for compatibility with deployments that already issue such tokens.
    TimestampHash,
}

/// Session / login settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Session ID generation strategy.
    #[serde(default)]
    pub session_ids: SessionIdSource,

    /// Best-effort IP geolocation for new sessions.
    #[serde(default)]
    pub geolocation: GeolocationConfig,
}

/// IP geolocation lookup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeolocationConfig {
    /// Whether to perform lookups at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// URL template; `{ip}` is replaced by the client address.
    #[serde(default = "default_geolocation_endpoint")]
    pub endpoint: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_geolocation_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_geolocation_endpoint(),
            timeout_ms: default_geolocation_timeout_ms(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Blob storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local`, `memory`, `s3`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// S3 / R2 gateway configuration.
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            s3: None,
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored blobs.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// S3-compatible gateway configuration (AWS S3, Cloudflare R2, MinIO).
#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    /// Upstream bucket name.
    pub bucket: String,
    /// Region; R2 uses `auto`.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint.  Takes precedence over `account_id`.
    #[serde(default)]
    pub endpoint_url: String,
    /// Cloudflare account ID; derives the R2 endpoint when no
    /// `endpoint_url` is given.
    #[serde(default)]
    pub account_id: String,
    /// Explicit access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
}

impl S3StorageConfig {
    /// The endpoint to talk to, if any overrides the SDK default.
    pub fn resolved_endpoint(&self) -> Option<String> {
        if !self.endpoint_url.is_empty() {
            Some(self.endpoint_url.clone())
        } else if !self.account_id.is_empty() {
            Some(format!(
                "https://{}.r2.cloudflarestorage.com",
                self.account_id
            ))
        } else {
            None
        }
    }
}

/// Upload pipeline tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Declared sizes at or above this switch to multipart transfer.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Fixed multipart part size in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Length of generated object IDs.
    #[serde(default = "default_id_length")]
    pub id_length: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
            id_length: default_id_length(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_geolocation_endpoint() -> String {
    "https://ipinfo.io/{ip}/json".to_string()
}

fn default_geolocation_timeout_ms() -> u64 {
    2000
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/filegate.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/blobs".to_string()
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_multipart_threshold() -> u64 {
    100 << 20 // 100 MiB
}

fn default_part_size() -> u64 {
    8 << 20 // 8 MiB
}

fn default_id_length() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.
pub fn parse_config(yaml: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(yaml)?;
    if config.upload.part_size == 0 {
        anyhow::bail!("upload.part_size must be greater than zero");
    }
    if config.upload.id_length == 0 {
        anyhow::bail!("upload.id_length must be greater than zero");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.server.port, 3000);
        assert!(!config.server.dev_mode);
        assert_eq!(config.auth.session_ids, SessionIdSource::Random);
        assert_eq!(config.metadata.engine, "sqlite");
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.upload.multipart_threshold, 100 * 1024 * 1024);
        assert_eq!(config.upload.part_size, 8 * 1024 * 1024);
        assert_eq!(config.upload.id_length, 10);
    }

    #[test]
    fn test_session_id_source_kebab_case() {
        let config = parse_config("auth:\n  session_ids: timestamp-hash\n").unwrap();
        assert_eq!(config.auth.session_ids, SessionIdSource::TimestampHash);
    }

    #[test]
    fn test_r2_endpoint_from_account_id() {
        let yaml = "
storage:
  backend: s3
  s3:
    bucket: files
    account_id: abc123
";
        let config = parse_config(yaml).unwrap();
        let s3 = config.storage.s3.unwrap();
        assert_eq!(s3.region, "auto");
        assert_eq!(
            s3.resolved_endpoint().as_deref(),
            Some("https://abc123.r2.cloudflarestorage.com")
        );
    }

    #[test]
    fn test_explicit_endpoint_wins() {
        let s3 = S3StorageConfig {
            bucket: "b".into(),
            region: "us-east-1".into(),
            endpoint_url: "http://localhost:9000".into(),
            account_id: "ignored".into(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            use_path_style: true,
        };
        assert_eq!(
            s3.resolved_endpoint().as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn test_zero_part_size_rejected() {
        assert!(parse_config("upload:\n  part_size: 0\n").is_err());
    }
}
