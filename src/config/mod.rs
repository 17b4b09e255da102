use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Where generated images are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultBackend {
    Fs,
    S3,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Maximum number of queued (not yet processing) jobs.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Seconds a finished job and its result are kept.
    #[serde(default = "default_job_result_ttl")]
    pub job_result_ttl: u64,

    /// Seconds between cleanup sweeps.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    #[serde(default = "default_result_backend")]
    pub result_backend: ResultBackend,

    /// Directory for the `fs` backend.
    #[serde(default = "default_results_folder")]
    pub results_folder: PathBuf,

    /// Model-serving endpoint that runs the diffusion pipeline.
    #[serde(default = "default_inference_url")]
    pub inference_url: String,

    /// Request timeout for the inference backend. Unset means wait forever.
    pub inference_timeout_secs: Option<u64>,

    /// S3 bucket name (`s3` backend)
    pub s3_bucket: Option<String>,

    /// S3 endpoint URL (`s3` backend)
    pub s3_endpoint: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// S3 access key ID
    pub s3_access_key: Option<String>,

    /// S3 secret access key
    pub s3_secret_key: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_max_queue_size() -> usize {
    10
}

fn default_job_result_ttl() -> u64 {
    600
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_max_upload_mb() -> usize {
    10
}

fn default_result_backend() -> ResultBackend {
    ResultBackend::Fs
}

fn default_results_folder() -> PathBuf {
    PathBuf::from("generated_images")
}

fn default_inference_url() -> String {
    "http://127.0.0.1:8000/generate".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

/// Credentials for the `s3` backend, all required together.
#[derive(Debug, Clone, Copy)]
pub struct S3Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs, e.g. in tests.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size < 1 {
            return Err(ConfigError::Invalid("MAX_QUEUE_SIZE must be at least 1"));
        }
        if self.cleanup_interval < 1 {
            return Err(ConfigError::Invalid("CLEANUP_INTERVAL must be at least 1 second"));
        }
        if self.max_upload_mb < 1 {
            return Err(ConfigError::Invalid("MAX_UPLOAD_MB must be at least 1"));
        }
        if self.result_backend == ResultBackend::S3 {
            self.s3_settings()?;
        }
        Ok(())
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_result_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn s3_settings(&self) -> Result<S3Settings<'_>, ConfigError> {
        Ok(S3Settings {
            bucket: require("S3_BUCKET", &self.s3_bucket)?,
            endpoint: require("S3_ENDPOINT", &self.s3_endpoint)?,
            region: &self.s3_region,
            access_key: require("S3_ACCESS_KEY", &self.s3_access_key)?,
            secret_key: require("S3_SECRET_KEY", &self.s3_secret_key)?,
        })
    }
}

fn require<'a>(name: &'static str, field: &'a Option<String>) -> Result<&'a str, ConfigError> {
    field
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("Missing required setting {0}")]
    Missing(&'static str),
}
