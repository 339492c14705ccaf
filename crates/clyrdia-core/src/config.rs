//! Service settings shared by every crate.
//!
//! The binary fills these from flags and `CLYRDIA_*` environment variables;
//! library code only ever sees the resolved [`Settings`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub upload: UploadSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub jobs: JobSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("soft time limit ({soft}s) must not exceed hard time limit ({hard}s)")]
    SoftAboveHard { soft: u64, hard: u64 },
}

impl Settings {
    /// Reject combinations the engine cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let nonzero = [
            ("rate limit per minute", self.rate_limit.per_minute as u64),
            ("rate limit per hour", self.rate_limit.per_hour as u64),
            ("max upload size", self.upload.max_file_size as u64),
            ("cache max entries", self.cache.max_entries as u64),
            ("worker count", self.jobs.workers as u64),
            ("jobs per worker", self.jobs.max_jobs_per_worker as u64),
            ("job queue capacity", self.jobs.queue_capacity as u64),
            ("hard time limit", self.jobs.hard_time_limit_secs),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(SettingsError::Zero(name));
            }
        }
        if self.jobs.soft_time_limit_secs > self.jobs.hard_time_limit_secs {
            return Err(SettingsError::SoftAboveHard {
                soft: self.jobs.soft_time_limit_secs,
                hard: self.jobs.hard_time_limit_secs,
            });
        }
        Ok(())
    }
}

// ── Server ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "ServerSettings::default_environment")]
    pub environment: String,
    /// When set, every route except `/health` requires this bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl ServerSettings {
    fn default_listen_addr() -> String {
        "0.0.0.0:8000".to_string()
    }

    fn default_environment() -> String {
        "production".to_string()
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            environment: Self::default_environment(),
            api_key: None,
            cors_origins: Vec::new(),
        }
    }
}

// ── Rate limits ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "RateLimitSettings::default_per_minute")]
    pub per_minute: usize,
    #[serde(default = "RateLimitSettings::default_per_hour")]
    pub per_hour: usize,
}

impl RateLimitSettings {
    fn default_per_minute() -> usize {
        60
    }

    fn default_per_hour() -> usize {
        1000
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_minute: Self::default_per_minute(),
            per_hour: Self::default_per_hour(),
        }
    }
}

// ── Uploads ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Bytes.
    #[serde(default = "UploadSettings::default_max_file_size")]
    pub max_file_size: usize,
    /// Lowercase extensions: `pdf`, `docx`, `txt`.
    #[serde(default = "UploadSettings::default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl UploadSettings {
    fn default_max_file_size() -> usize {
        10 * 1024 * 1024
    }

    fn default_allowed_types() -> Vec<String> {
        vec!["pdf".to_string(), "docx".to_string(), "txt".to_string()]
    }

    pub fn allows(&self, extension: &str) -> bool {
        self.allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(extension))
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_file_size: Self::default_max_file_size(),
            allowed_types: Self::default_allowed_types(),
        }
    }
}

// ── Cache ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "CacheSettings::default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "CacheSettings::default_max_entries")]
    pub max_entries: usize,
    /// In-memory backend when absent.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "CacheSettings::default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl CacheSettings {
    fn default_ttl_secs() -> u64 {
        3600
    }

    fn default_max_entries() -> usize {
        1000
    }

    fn default_op_timeout_ms() -> u64 {
        250
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: Self::default_ttl_secs(),
            max_entries: Self::default_max_entries(),
            redis_url: None,
            op_timeout_ms: Self::default_op_timeout_ms(),
        }
    }
}

// ── Model ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "ModelSettings::default_name")]
    pub name: String,
    #[serde(default = "ModelSettings::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "ModelSettings::default_temperature")]
    pub temperature: f32,
    #[serde(default = "ModelSettings::default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ModelSettings {
    fn default_name() -> String {
        "gpt-4".to_string()
    }

    fn default_max_tokens() -> u32 {
        4000
    }

    fn default_temperature() -> f32 {
        0.1
    }

    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            max_tokens: Self::default_max_tokens(),
            temperature: Self::default_temperature(),
            base_url: Self::default_base_url(),
            api_key: None,
        }
    }
}

// ── Jobs ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    /// How long terminal jobs stay queryable.
    #[serde(default = "JobSettings::default_result_expiry_secs")]
    pub result_expiry_secs: u64,
    #[serde(default = "JobSettings::default_hard_time_limit_secs")]
    pub hard_time_limit_secs: u64,
    #[serde(default = "JobSettings::default_soft_time_limit_secs")]
    pub soft_time_limit_secs: u64,
    #[serde(default = "JobSettings::default_workers")]
    pub workers: usize,
    /// A worker exits and is replaced after this many jobs.
    #[serde(default = "JobSettings::default_max_jobs_per_worker")]
    pub max_jobs_per_worker: usize,
    #[serde(default = "JobSettings::default_queue_capacity")]
    pub queue_capacity: usize,
}

impl JobSettings {
    fn default_result_expiry_secs() -> u64 {
        3600
    }

    fn default_hard_time_limit_secs() -> u64 {
        30 * 60
    }

    fn default_soft_time_limit_secs() -> u64 {
        25 * 60
    }

    fn default_workers() -> usize {
        2
    }

    fn default_max_jobs_per_worker() -> usize {
        1000
    }

    fn default_queue_capacity() -> usize {
        256
    }

    pub fn result_expiry(&self) -> Duration {
        Duration::from_secs(self.result_expiry_secs)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            result_expiry_secs: Self::default_result_expiry_secs(),
            hard_time_limit_secs: Self::default_hard_time_limit_secs(),
            soft_time_limit_secs: Self::default_soft_time_limit_secs(),
            workers: Self::default_workers(),
            max_jobs_per_worker: Self::default_max_jobs_per_worker(),
            queue_capacity: Self::default_queue_capacity(),
        }
    }
}

// ── Store ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// DuckDB file. In-memory record store when absent.
    #[serde(default)]
    pub duckdb_path: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.server.listen_addr, "0.0.0.0:8000");
        assert_eq!(s.rate_limit.per_minute, 60);
        assert_eq!(s.rate_limit.per_hour, 1000);
        assert_eq!(s.upload.max_file_size, 10_485_760);
        assert_eq!(s.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(s.model.name, "gpt-4");
        assert_eq!(s.jobs.hard_time_limit(), Duration::from_secs(1800));
        assert_eq!(s.jobs.soft_time_limit(), Duration::from_secs(1500));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn empty_json_yields_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn soft_limit_above_hard_rejected() {
        let mut s = Settings::default();
        s.jobs.soft_time_limit_secs = 2000;
        assert_eq!(
            s.validate(),
            Err(SettingsError::SoftAboveHard {
                soft: 2000,
                hard: 1800
            })
        );
    }

    #[test]
    fn zero_limit_rejected() {
        let mut s = Settings::default();
        s.rate_limit.per_minute = 0;
        assert_eq!(
            s.validate(),
            Err(SettingsError::Zero("rate limit per minute"))
        );
    }

    #[test]
    fn upload_types_case_insensitive() {
        assert!(UploadSettings::default().allows("PDF"));
        assert!(!UploadSettings::default().allows("exe"));
    }
}
