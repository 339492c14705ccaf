//! Flags and `CLYRDIA_*` environment variables, folded over the defaults in
//! [`Settings`].

use std::path::PathBuf;

use clap::Args;
use clyrdia_core::Settings;

#[derive(Debug, Default, Args)]
pub struct ConfigArgs {
    // ── Server ──
    #[arg(long, env = "CLYRDIA_LISTEN_ADDR")]
    pub listen_addr: Option<String>,
    #[arg(long, env = "CLYRDIA_ENVIRONMENT")]
    pub environment: Option<String>,
    /// Require `Authorization: Bearer <key>` on every route except health.
    #[arg(long, env = "CLYRDIA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(long, env = "CLYRDIA_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // ── Rate limits ──
    #[arg(long, env = "CLYRDIA_RATE_LIMIT_PER_MINUTE")]
    pub rate_limit_per_minute: Option<usize>,
    #[arg(long, env = "CLYRDIA_RATE_LIMIT_PER_HOUR")]
    pub rate_limit_per_hour: Option<usize>,

    // ── Uploads ──
    /// Bytes.
    #[arg(long, env = "CLYRDIA_MAX_FILE_SIZE")]
    pub max_file_size: Option<usize>,
    #[arg(long, env = "CLYRDIA_ALLOWED_FILE_TYPES", value_delimiter = ',')]
    pub allowed_file_types: Option<Vec<String>>,

    // ── Cache ──
    #[arg(long, env = "CLYRDIA_CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u64>,
    #[arg(long, env = "CLYRDIA_CACHE_MAX_ENTRIES")]
    pub cache_max_entries: Option<usize>,
    /// In-memory cache when absent.
    #[arg(long, env = "CLYRDIA_REDIS_URL")]
    pub redis_url: Option<String>,
    #[arg(long, env = "CLYRDIA_CACHE_OP_TIMEOUT_MS")]
    pub cache_op_timeout_ms: Option<u64>,

    // ── Model ──
    #[arg(long, env = "CLYRDIA_MODEL")]
    pub model: Option<String>,
    #[arg(long, env = "CLYRDIA_MODEL_MAX_TOKENS")]
    pub model_max_tokens: Option<u32>,
    #[arg(long, env = "CLYRDIA_MODEL_TEMPERATURE")]
    pub model_temperature: Option<f32>,
    #[arg(long, env = "CLYRDIA_MODEL_BASE_URL")]
    pub model_base_url: Option<String>,
    #[arg(long, env = "CLYRDIA_MODEL_API_KEY", hide_env_values = true)]
    pub model_api_key: Option<String>,

    // ── Jobs ──
    #[arg(long, env = "CLYRDIA_JOB_RESULT_EXPIRY_SECS")]
    pub job_result_expiry_secs: Option<u64>,
    #[arg(long, env = "CLYRDIA_JOB_HARD_TIME_LIMIT_SECS")]
    pub job_hard_time_limit_secs: Option<u64>,
    #[arg(long, env = "CLYRDIA_JOB_SOFT_TIME_LIMIT_SECS")]
    pub job_soft_time_limit_secs: Option<u64>,
    #[arg(long, env = "CLYRDIA_WORKERS")]
    pub workers: Option<usize>,
    #[arg(long, env = "CLYRDIA_MAX_JOBS_PER_WORKER")]
    pub max_jobs_per_worker: Option<usize>,
    #[arg(long, env = "CLYRDIA_JOB_QUEUE_CAPACITY")]
    pub job_queue_capacity: Option<usize>,

    // ── Store ──
    /// DuckDB file. In-memory record store when absent.
    #[arg(long, env = "CLYRDIA_DUCKDB_PATH")]
    pub duckdb_path: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn into_settings(self) -> Settings {
        let mut s = Settings::default();

        set(&mut s.server.listen_addr, self.listen_addr);
        set(&mut s.server.environment, self.environment);
        s.server.api_key = self.api_key.filter(|k| !k.is_empty());
        if let Some(origins) = self.cors_origins {
            s.server.cors_origins = trimmed(origins);
        }

        set(&mut s.rate_limit.per_minute, self.rate_limit_per_minute);
        set(&mut s.rate_limit.per_hour, self.rate_limit_per_hour);

        set(&mut s.upload.max_file_size, self.max_file_size);
        if let Some(types) = self.allowed_file_types {
            s.upload.allowed_types = trimmed(types)
                .into_iter()
                .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
                .collect();
        }

        set(&mut s.cache.ttl_secs, self.cache_ttl_secs);
        set(&mut s.cache.max_entries, self.cache_max_entries);
        s.cache.redis_url = self.redis_url.filter(|u| !u.is_empty());
        set(&mut s.cache.op_timeout_ms, self.cache_op_timeout_ms);

        set(&mut s.model.name, self.model);
        set(&mut s.model.max_tokens, self.model_max_tokens);
        set(&mut s.model.temperature, self.model_temperature);
        set(&mut s.model.base_url, self.model_base_url);
        s.model.api_key = self.model_api_key.filter(|k| !k.is_empty());

        set(&mut s.jobs.result_expiry_secs, self.job_result_expiry_secs);
        set(&mut s.jobs.hard_time_limit_secs, self.job_hard_time_limit_secs);
        set(&mut s.jobs.soft_time_limit_secs, self.job_soft_time_limit_secs);
        set(&mut s.jobs.workers, self.workers);
        set(&mut s.jobs.max_jobs_per_worker, self.max_jobs_per_worker);
        set(&mut s.jobs.queue_capacity, self.job_queue_capacity);

        s.store.duckdb_path = self.duckdb_path;
        s
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn trimmed(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        config: ConfigArgs,
    }

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["clyrdia"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().config.into_settings()
    }

    #[test]
    fn no_flags_keep_defaults() {
        assert_eq!(ConfigArgs::default().into_settings(), Settings::default());
    }

    #[test]
    fn flags_override_defaults() {
        let s = parse(&[
            "--listen-addr",
            "127.0.0.1:9000",
            "--rate-limit-per-minute",
            "5",
            "--cache-ttl-secs",
            "60",
            "--model",
            "gpt-4o",
            "--workers",
            "4",
        ]);
        assert_eq!(s.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(s.rate_limit.per_minute, 5);
        assert_eq!(s.rate_limit.per_hour, 1000);
        assert_eq!(s.cache.ttl_secs, 60);
        assert_eq!(s.model.name, "gpt-4o");
        assert_eq!(s.jobs.workers, 4);
    }

    #[test]
    fn list_flags_split_on_commas() {
        let s = parse(&[
            "--cors-origins",
            "https://a.example, https://b.example",
            "--allowed-file-types",
            ".PDF,txt",
        ]);
        assert_eq!(
            s.server.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(s.upload.allowed_types, vec!["pdf", "txt"]);
    }

    #[test]
    fn empty_secrets_are_unset() {
        let s = parse(&["--api-key", "", "--model-api-key", "sk-test"]);
        assert_eq!(s.server.api_key, None);
        assert_eq!(s.model.api_key.as_deref(), Some("sk-test"));
    }
}
