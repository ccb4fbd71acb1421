use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: f64,
    #[serde(default = "default_compression_quality")]
    pub compression_quality: u8,

    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_gemini_base_url() -> String {
    providers::gemini::DEFAULT_BASE_URL.into()
}
fn default_openai_base_url() -> String {
    providers::openai::DEFAULT_BASE_URL.into()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".into()
}
fn default_batch_size() -> usize {
    8
}
fn default_max_image_size_mb() -> f64 {
    1.8
}
fn default_compression_quality() -> u8 {
    85
}
fn default_input_dir() -> PathBuf {
    PathBuf::from("data/input")
}
fn default_processed_dir() -> PathBuf {
    PathBuf::from("data/processed")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("data/archive")
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_retry_attempts() -> usize {
    3
}
fn default_retry_base_secs() -> u64 {
    4
}
fn default_retry_max_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn max_image_bytes(&self) -> u64 {
        (self.max_image_size_mb * 1024.0 * 1024.0) as u64
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_secs(self.retry_base_secs),
            max_delay: Duration::from_secs(self.retry_max_secs),
        }
    }

    pub fn directories(&self) -> [&PathBuf; 4] {
        [
            &self.input_dir,
            &self.processed_dir,
            &self.output_dir,
            &self.archive_dir,
        ]
    }

    /// Rejects settings the run cannot start with, a missing credential first.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.provider.as_str() {
            "gemini" => {
                if blank(&self.google_api_key) {
                    bail!("GOOGLE_API_KEY must be set");
                }
            }
            "openai" => {
                if blank(&self.openai_api_key) {
                    bail!("OPENAI_API_KEY must be set");
                }
            }
            other => bail!("unknown provider '{other}' (expected gemini or openai)"),
        }
        ensure!(self.batch_size >= 1, "BATCH_SIZE must be at least 1");
        ensure!(
            self.max_image_size_mb > 0.0,
            "MAX_IMAGE_SIZE_MB must be positive"
        );
        ensure!(
            (1..=100).contains(&self.compression_quality),
            "COMPRESSION_QUALITY must be within 1..=100"
        );
        ensure!(self.retry_attempts >= 1, "RETRY_ATTEMPTS must be at least 1");
        Ok(())
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// Loads defaults, then an optional config file, then the process environment.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(config::Environment::default().try_parsing(true));
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn from_toml(src: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(src, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = from_toml("google_api_key = \"k\"");
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.compression_quality, 85);
        assert!((cfg.max_image_size_mb - 1.8).abs() < f64::EPSILON);
        assert_eq!(cfg.max_image_bytes(), (1.8 * 1024.0 * 1024.0) as u64);
        assert_eq!(cfg.input_dir, PathBuf::from("data/input"));
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(4));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        cfg.validate().unwrap();
    }

    #[test]
    fn missing_credential_is_fatal() {
        let cfg = from_toml("batch_size = 4");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("GOOGLE_API_KEY"));

        let cfg = from_toml("provider = \"openai\"\ngoogle_api_key = \"k\"");
        assert!(cfg.validate().unwrap_err().to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cfg = from_toml("google_api_key = \"k\"\nbatch_size = 0");
        assert!(cfg.validate().is_err());
        let cfg = from_toml("google_api_key = \"k\"\nmax_image_size_mb = 0.0");
        assert!(cfg.validate().is_err());
        let cfg = from_toml("google_api_key = \"k\"\nprovider = \"local\"");
        assert!(cfg.validate().is_err());
    }
}
