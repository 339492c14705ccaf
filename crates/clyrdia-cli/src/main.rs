mod config;
mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use clyrdia_ai::{ModelClient, OpenAiClient};
use clyrdia_core::config::{CacheSettings, ModelSettings, StoreSettings};
use clyrdia_core::{Clock, Industry, Settings, SystemClock};
use clyrdia_engine::{AdmissionFacade, Submission, Upload};
use clyrdia_store::{CacheStore, MemoryRecordStore, RecordStore};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ConfigArgs;

/// Client identity used for rate limiting and ownership of local analyses.
const LOCAL_CLIENT: &str = "cli";

#[derive(Debug, Parser)]
#[command(name = "clyrdia", version, about = "Contract analysis service")]
struct Cli {
    /// Default log level; `RUST_LOG` takes precedence.
    #[arg(long, global = true, env = "CLYRDIA_LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long, global = true, env = "CLYRDIA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve,
    /// Analyse one contract and print the result.
    Analyze {
        /// Contract file (pdf, docx, or txt).
        #[arg(conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        /// Contract text given inline.
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        industry: Option<Industry>,
        /// Comma-separated analysis types.
        #[arg(long, value_delimiter = ',')]
        analysis_types: Vec<String>,
        /// Print the record as JSON instead of a card.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let settings = cli.config.into_settings();
    settings.validate().context("invalid configuration")?;
    info!("clyrdia v{}", env!("CARGO_PKG_VERSION"));

    let facade = Arc::new(assemble(&settings)?);
    match cli.command {
        Command::Serve => clyrdia_api::serve(&settings, facade)
            .await
            .context("server stopped with an error"),
        Command::Analyze {
            file,
            text,
            industry,
            analysis_types,
            json,
        } => {
            let upload = file.as_deref().map(read_upload).transpose()?;
            let submission = Submission {
                text,
                upload,
                industry,
                analysis_types,
            };
            let record = facade
                .analyze(LOCAL_CLIENT, submission)
                .await
                .map_err(|e| anyhow::anyhow!("{}: {}", e.kind.code(), e.message))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                display::print_analysis_card(&record);
            }
            Ok(())
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

// ── Wiring ──

fn assemble(settings: &Settings) -> anyhow::Result<AdmissionFacade> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let model = model_client(&settings.model)?;
    let store = record_store(&settings.store)?;
    let cache = cache_store(&settings.cache, clock.clone())?;
    info!(
        model = %settings.model.name,
        cache = cache.backend_name(),
        persistent_store = settings.store.duckdb_path.is_some(),
        "components ready"
    );
    Ok(AdmissionFacade::assemble(settings, model, store, cache, clock))
}

fn model_client(settings: &ModelSettings) -> anyhow::Result<Arc<dyn ModelClient>> {
    let key = settings
        .api_key
        .as_deref()
        .context("a model API key is required (--model-api-key or CLYRDIA_MODEL_API_KEY)")?;
    Ok(Arc::new(OpenAiClient::new(
        &settings.base_url,
        key,
        settings.name.clone(),
    )))
}

fn record_store(settings: &StoreSettings) -> anyhow::Result<Arc<dyn RecordStore>> {
    match &settings.duckdb_path {
        None => Ok(Arc::new(MemoryRecordStore::new())),
        #[cfg(feature = "duckdb")]
        Some(path) => {
            let store = clyrdia_store::DuckRecordStore::open_persistent(path)
                .with_context(|| format!("opening record store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "duckdb"))]
        Some(path) => anyhow::bail!(
            "record store path {} given but this build lacks the `duckdb` feature",
            path.display()
        ),
    }
}

fn cache_store(settings: &CacheSettings, clock: Arc<dyn Clock>) -> anyhow::Result<CacheStore> {
    match &settings.redis_url {
        None => Ok(CacheStore::in_memory(
            clock,
            settings.ttl(),
            settings.max_entries,
        )),
        #[cfg(feature = "redis")]
        Some(url) => {
            let backend = clyrdia_store::RedisBackend::new(url).context("configuring Redis cache")?;
            Ok(CacheStore::new(
                Arc::new(backend),
                settings.ttl(),
                settings.max_entries,
                settings.op_timeout(),
            ))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!("a Redis URL was given but this build lacks the `redis` feature"),
    }
}

fn read_upload(path: &Path) -> anyhow::Result<Upload> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading contract {}", path.display()))?;
    Ok(Upload {
        bytes,
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        content_type: None,
    })
}
