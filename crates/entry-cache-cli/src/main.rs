//! entry-cache - inspect and maintain a file-backed entry cache
//!
//! Reads the same `CACHE_*` environment variables as the library and prints
//! command results as JSON on stdout. Logs go to stderr.

mod error;

use crate::error::Result;
use clap::{Parser, Subcommand};
use entry_cache::{CacheConfig, CacheDriver, FileBackend};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "entry-cache", version, about = "Inspect and maintain a file-backed entry cache")]
struct Cli {
    /// Cache directory (overrides CACHE_DIR)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a value; input that is not valid JSON is stored as a string
    Set {
        key: String,
        value: String,
        /// Time to live in seconds
        #[arg(long, allow_negative_numbers = true)]
        ttl: Option<i64>,
    },
    /// Delete a key
    Delete { key: String },
    /// Increment a numeric counter
    Incr {
        key: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
    /// Decrement a numeric counter
    Decr {
        key: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
    /// Check whether a key holds a valid entry
    Exists { key: String },
    /// Remove expired and corrupt entries
    Clean,
    /// Remove every entry
    Clear,
    /// Print entry count, disk usage and hit counters
    Stats,
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn run(cache: &mut CacheDriver<FileBackend>, command: Command) -> Result<Value> {
    let output = match command {
        Command::Get { key } => cache.load::<Value>(&key)?,
        Command::Set { key, value, ttl } => {
            cache.save(&key, &parse_value(&value), ttl)?;
            json!({ "saved": key })
        }
        Command::Delete { key } => {
            cache.delete(&key)?;
            json!({ "deleted": key })
        }
        Command::Incr { key, by } => json!(cache.increment(&key, by)?),
        Command::Decr { key, by } => json!(cache.decrement(&key, by)?),
        Command::Exists { key } => json!(cache.exists(&key)),
        Command::Clean => json!({ "removed": cache.clean()? }),
        Command::Clear => {
            cache.clear()?;
            json!({ "cleared": true })
        }
        Command::Stats => serde_json::to_value(cache.stats()?)?,
    };
    Ok(output)
}

fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("entry_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let cli = Cli::parse();

    // Load configuration from environment
    let mut config = CacheConfig::from_env()?;
    if let Some(dir) = cli.dir {
        config.cache_dir = dir;
    }
    info!("Cache dir: {:?}", config.cache_dir);

    let backend =
        FileBackend::new(config.cache_dir.clone()).with_blocking_lock(config.blocking_lock);
    let mut cache = CacheDriver::with_default_ttl(backend, config.default_ttl)?;

    let output = run(&mut cache, cli.command)?;
    println!("{}", output);

    Ok(())
}
