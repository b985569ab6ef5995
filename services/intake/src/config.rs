use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the intake service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Event calendar configuration
    #[serde(default)]
    pub event: EventConfig,
    /// Upload handling configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// Remote storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Directory holding the upload form assets
    #[serde(default = "default_static_dir")]
    pub static_dir: Option<PathBuf>,
    /// Mount the per-date upload listing endpoint
    #[serde(default)]
    pub expose_listing: bool,
}

/// The three festival dates, as `YYYY-MM-DD` strings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventConfig {
    pub day_1: Option<String>,
    pub day_2: Option<String>,
    pub day_3: Option<String>,
}

/// How an incoming file is held while the request is processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferingMode {
    Memory,
    #[default]
    Disk,
}

/// Upload handling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes (10 MiB default)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    /// Accepted file types, matched against both extension and MIME subtype
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Buffering strategy for incoming files
    #[serde(default)]
    pub buffering: BufferingMode,
    /// Directory for disk buffers outside production mode
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Production mode puts disk buffers in the OS temp directory
    #[serde(default)]
    pub production: bool,
}

/// Which remote store receives the uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Cloudinary,
    S3,
}

/// Remote storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Selected backend
    #[serde(default)]
    pub backend: StorageBackend,
    /// Top-level folder; uploads land in `<root_folder>/<event date>`
    #[serde(default = "default_root_folder")]
    pub root_folder: String,
    #[serde(default)]
    pub cloudinary: CloudinaryConfig,
    #[serde(default)]
    pub s3: S3Config,
}

/// Cloudinary account configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CloudinaryConfig {
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// API base URL, overridable for testing
    #[serde(default = "default_cloudinary_base_url")]
    pub api_base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_cloudinary_timeout_secs")]
    pub timeout_secs: u64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket receiving the uploads
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Expiry of the returned download URLs in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

// Default value functions
fn default_service_name() -> String {
    "payment-intake".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> Option<PathBuf> {
    Some(PathBuf::from("public"))
}

fn default_max_file_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_allowed_types() -> Vec<String> {
    ["jpeg", "jpg", "png", "gif", "webp", "pdf"]
        .iter()
        .map(|t| t.to_string())
        .collect()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_root_folder() -> String {
    "Anokha_Payments".to_string()
}

fn default_cloudinary_base_url() -> String {
    "https://api.cloudinary.com".to_string()
}

fn default_cloudinary_timeout_secs() -> u64 {
    60
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    7 * 24 * 3600
}

/// Flat variables from the original deployment, mapped onto nested keys
const LEGACY_ENV: &[(&str, &str)] = &[
    ("EVENT_DAY_1", "event.day_1"),
    ("EVENT_DAY_2", "event.day_2"),
    ("EVENT_DAY_3", "event.day_3"),
    ("CLOUDINARY_CLOUD_NAME", "storage.cloudinary.cloud_name"),
    ("CLOUDINARY_API_KEY", "storage.cloudinary.api_key"),
    ("CLOUDINARY_API_SECRET", "storage.cloudinary.api_secret"),
    ("PORT", "server.port"),
    ("PRODUCTION_MODE", "upload.production"),
];

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/intake").required(false))
            .add_source(config::File::with_name("/etc/payment-intake/intake").required(false))
            // Override with environment variables
            // INTAKE__SERVER__PORT -> server.port
            // INTAKE__UPLOAD__ALLOWED_TYPES=png,jpg -> upload.allowed_types
            .add_source(
                config::Environment::with_prefix("INTAKE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_types")
                    .with_list_parse_key("server.cors_origins"),
            );

        for (var, key) in LEGACY_ENV {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        builder.build()?.try_deserialize().map_err(Into::into)
    }

    /// Check values that deserialization alone cannot catch
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.event.dates()?;

        if self.upload.max_file_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.max_file_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.upload.allowed_types.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigValidationError::MissingField(
                "upload.allowed_types".to_string(),
            ));
        }

        if self.storage.root_folder.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.root_folder".to_string(),
            ));
        }

        Ok(())
    }

    /// Credentials the selected backend needs but does not have.
    ///
    /// Missing credentials are not fatal: uploads fail individually while the
    /// rest of the API keeps serving.
    pub fn missing_storage_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self.storage.backend {
            StorageBackend::Cloudinary => {
                let c = &self.storage.cloudinary;
                if c.cloud_name.is_empty() {
                    missing.push("storage.cloudinary.cloud_name");
                }
                if c.api_key.is_empty() {
                    missing.push("storage.cloudinary.api_key");
                }
                if c.api_secret.is_empty() {
                    missing.push("storage.cloudinary.api_secret");
                }
            }
            StorageBackend::S3 => {
                if self.storage.s3.bucket.is_empty() {
                    missing.push("storage.s3.bucket");
                }
            }
        }
        missing
    }

    /// Directory receiving disk buffers
    pub fn buffer_dir(&self) -> PathBuf {
        if self.upload.production {
            std::env::temp_dir()
        } else {
            self.upload.temp_dir.clone()
        }
    }
}

impl EventConfig {
    /// Parse the configured dates; unset entries stay `None`
    pub fn dates(&self) -> Result<[Option<NaiveDate>; 3], ConfigValidationError> {
        Ok([
            parse_event_date("event.day_1", self.day_1.as_deref())?,
            parse_event_date("event.day_2", self.day_2.as_deref())?,
            parse_event_date("event.day_3", self.day_3.as_deref())?,
        ])
    }
}

fn parse_event_date(
    field: &str,
    value: Option<&str>,
) -> Result<Option<NaiveDate>, ConfigValidationError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| ConfigValidationError::InvalidValue {
                field: field.to_string(),
                message: format!("expected YYYY-MM-DD, got {v:?} ({e})"),
            }),
    }
}

impl S3Config {
    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.presigned_url_expiry_secs)
    }
}

impl CloudinaryConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            static_dir: default_static_dir(),
            expose_listing: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_types: default_allowed_types(),
            buffering: BufferingMode::default(),
            temp_dir: default_temp_dir(),
            production: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root_folder: default_root_folder(),
            cloudinary: CloudinaryConfig::default(),
            s3: S3Config::default(),
        }
    }
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            api_base_url: default_cloudinary_base_url(),
            timeout_secs: default_cloudinary_timeout_secs(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
        }
    }
}
