//! Configuration for both binaries
//!
//! Values are resolved once at startup in this order: command-line flag or
//! environment variable, then the JSON config file (`-c`), then the
//! built-in default. The resolved [`AgentConfig`] / [`CollectorConfig`] is
//! passed by reference into constructors.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::trace;

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Snapshot in process memory only
    Memory,

    /// In-memory snapshot checkpointed to a JSON file
    File {
        path: PathBuf,

        /// Seconds between checkpoints; 0 writes on every update
        store_interval: u64,
    },

    /// Relational storage addressed by a DSN
    Sqlite { dsn: String },
}

impl StorageConfig {
    /// A DSN wins over the file path; an empty file path means in-memory
    pub fn select(dsn: Option<&str>, file_path: &str, store_interval: u64) -> Self {
        match dsn {
            Some(dsn) if !dsn.is_empty() => StorageConfig::Sqlite {
                dsn: dsn.to_string(),
            },
            _ if file_path.is_empty() => StorageConfig::Memory,
            _ => StorageConfig::File {
                path: PathBuf::from(file_path),
                store_interval,
            },
        }
    }

    pub fn checkpoint_path(&self) -> Option<&Path> {
        match self {
            StorageConfig::File { path, .. } => Some(path),
            _ => None,
        }
    }
}

fn read_config_file<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<T> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file {}: {e}", path.display()))
        .inspect(|_| trace!("loaded config file {}", path.display()))
}

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "relay-agent", about = "Samples host metrics and pushes them to a collector")]
pub struct AgentArgs {
    /// JSON config file
    #[arg(short = 'c', long = "config", env = "CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Collector address (host:port)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between samples
    #[arg(short = 'p', long, env = "POLL_INTERVAL", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: Option<u64>,

    /// Seconds between reports
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", value_parser = clap::value_parser!(u64).range(1..))]
    pub report_interval: Option<u64>,

    /// Number of concurrent sender workers
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// Shared secret for request signatures
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Collector public key (PKCS#1 PEM)
    #[arg(long, env = "CRYPTO_KEY", value_name = "FILE")]
    pub crypto_key: Option<PathBuf>,

    /// Deliver over gRPC instead of HTTP
    #[arg(long = "grpc", env = "USE_GRPC", num_args = 0..=1, default_missing_value = "true")]
    pub grpc: Option<bool>,

    /// Stop the whole pipeline when one worker exhausts its retries
    #[arg(long, env = "CANCEL_ON_SEND_FAILURE", num_args = 0..=1, default_missing_value = "true")]
    pub cancel_on_send_failure: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AgentFile {
    address: Option<String>,
    poll_interval: Option<u64>,
    report_interval: Option<u64>,
    rate_limit: Option<usize>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    grpc: Option<bool>,
    cancel_on_send_failure: Option<bool>,
    log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub rate_limit: usize,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub use_grpc: bool,
    pub cancel_on_send_failure: bool,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 1,
            key: None,
            crypto_key: None,
            use_grpc: false,
            cancel_on_send_failure: false,
            log_level: "info".to_string(),
        }
    }
}

/// Agent tick periods must be at least one second
fn interval_secs(name: &str, secs: Option<u64>, default: Duration) -> anyhow::Result<Duration> {
    match secs {
        Some(0) => anyhow::bail!("{name} must be at least 1 second"),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

impl AgentConfig {
    /// Resolve flags/env, then the config file, then defaults
    pub fn resolve(args: AgentArgs) -> anyhow::Result<Self> {
        let file: AgentFile = match &args.config {
            Some(path) => read_config_file(path)?,
            None => AgentFile::default(),
        };
        let defaults = AgentConfig::default();

        Ok(Self {
            address: args.address.or(file.address).unwrap_or(defaults.address),
            poll_interval: interval_secs(
                "poll_interval",
                args.poll_interval.or(file.poll_interval),
                defaults.poll_interval,
            )?,
            report_interval: interval_secs(
                "report_interval",
                args.report_interval.or(file.report_interval),
                defaults.report_interval,
            )?,
            rate_limit: args
                .rate_limit
                .or(file.rate_limit)
                .unwrap_or(defaults.rate_limit),
            key: args.key.or(file.key).filter(|key| !key.is_empty()),
            crypto_key: args.crypto_key.or(file.crypto_key),
            use_grpc: args.grpc.or(file.grpc).unwrap_or(defaults.use_grpc),
            cancel_on_send_failure: args
                .cancel_on_send_failure
                .or(file.cancel_on_send_failure)
                .unwrap_or(defaults.cancel_on_send_failure),
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or(defaults.log_level),
        })
    }
}

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "relay-collector", about = "Receives and stores metrics pushed by agents")]
pub struct CollectorArgs {
    /// JSON config file
    #[arg(short = 'c', long = "config", env = "CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between checkpoints (0 = write on every update)
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Checkpoint file (empty = in-memory only)
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    /// Database DSN (takes precedence over the checkpoint file)
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Restore the checkpoint file at startup
    #[arg(short = 'r', long, env = "RESTORE", num_args = 0..=1, default_missing_value = "true")]
    pub restore: Option<bool>,

    /// Shared secret for request signatures
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Private key for encrypted requests (PKCS#1 PEM)
    #[arg(long, env = "CRYPTO_KEY", value_name = "FILE")]
    pub crypto_key: Option<PathBuf>,

    /// Also serve the gRPC binding
    #[arg(long = "grpc", env = "USE_GRPC", num_args = 0..=1, default_missing_value = "true")]
    pub grpc: Option<bool>,

    /// gRPC listen address
    #[arg(long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CollectorFile {
    address: Option<String>,
    store_interval: Option<u64>,
    #[serde(alias = "store_file")]
    file_storage_path: Option<String>,
    database_dsn: Option<String>,
    restore: Option<bool>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    grpc: Option<bool>,
    grpc_address: Option<String>,
    log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub address: SocketAddr,
    pub storage: StorageConfig,
    pub restore: bool,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub use_grpc: bool,
    pub grpc_address: SocketAddr,
    pub log_level: String,
}

const DEFAULT_COLLECTOR_ADDRESS: &str = "127.0.0.1:8080";
const DEFAULT_GRPC_ADDRESS: &str = "127.0.0.1:3200";
const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";
const DEFAULT_STORE_INTERVAL: u64 = 300;

/// Accept `host:port` or a bare `:port`
fn parse_listen_address(raw: &str) -> anyhow::Result<SocketAddr> {
    let normalized = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .with_context(|| format!("invalid listen address {raw:?}"))
}

impl CollectorConfig {
    /// Resolve flags/env, then the config file, then defaults
    pub fn resolve(args: CollectorArgs) -> anyhow::Result<Self> {
        let file: CollectorFile = match &args.config {
            Some(path) => read_config_file(path)?,
            None => CollectorFile::default(),
        };

        let store_interval = args
            .store_interval
            .or(file.store_interval)
            .unwrap_or(DEFAULT_STORE_INTERVAL);
        let file_storage_path = args
            .file_storage_path
            .or(file.file_storage_path)
            .unwrap_or_else(|| DEFAULT_FILE_STORAGE_PATH.to_string());
        let database_dsn = args.database_dsn.or(file.database_dsn);

        Ok(Self {
            address: parse_listen_address(
                &args
                    .address
                    .or(file.address)
                    .unwrap_or_else(|| DEFAULT_COLLECTOR_ADDRESS.to_string()),
            )?,
            storage: StorageConfig::select(
                database_dsn.as_deref(),
                &file_storage_path,
                store_interval,
            ),
            restore: args.restore.or(file.restore).unwrap_or(true),
            key: args.key.or(file.key).filter(|key| !key.is_empty()),
            crypto_key: args.crypto_key.or(file.crypto_key),
            use_grpc: args.grpc.or(file.grpc).unwrap_or(false),
            grpc_address: parse_listen_address(
                &args
                    .grpc_address
                    .or(file.grpc_address)
                    .unwrap_or_else(|| DEFAULT_GRPC_ADDRESS.to_string()),
            )?,
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}
