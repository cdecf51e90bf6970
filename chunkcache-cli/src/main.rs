use anyhow::{Context, Result};
use chunkcache::core::codec::chunk_version_key;
use chunkcache::{BackendKind, Cache, CacheConfig, CacheError};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

/// Commit attempts for chunk writes before giving up on a conflict
const UPDATE_ATTEMPTS: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "chunkcache-cli")]
#[command(about = "Chunkcache CLI - inspect and edit a cache and its chunks", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the disk backend rooted at this directory (overrides the config)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a raw key
    Get { key: String },
    /// Write a raw key
    Set {
        key: String,
        value: String,
        /// Seconds until expiry, 0 for none
        #[arg(long, default_value_t = 0)]
        ttl: i64,
    },
    /// Delete a raw key
    Del { key: String },
    /// Wipe the whole backend, chunks included
    Clear,
    /// Read one key of a chunk
    ChunkGet { name: String, key: String },
    /// Write one key of a chunk and commit
    ChunkSet {
        name: String,
        key: String,
        value: String,
        /// Chunk TTL in seconds (defaults to chunk.default_ttl_seconds)
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Remove one key of a chunk and commit
    ChunkDel { name: String, key: String },
    /// List the keys of a chunk
    ChunkKeys { name: String },
    /// Print a chunk as JSON
    ChunkShow { name: String },
    /// Delete a chunk's record
    ChunkDrop {
        name: String,
        /// Also delete the version marker so the name can be reused at once
        #[arg(long)]
        purge: bool,
    },
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.backend.kind = BackendKind::Disk;
        config.disk.directory = dir.clone();
    }
    Ok(config)
}

fn init_logging(config: &CacheConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn show_value(value: Option<Vec<u8>>) -> String {
    match value {
        Some(bytes) => format!("\"{}\"", String::from_utf8_lossy(&bytes)),
        None => "(nil)".dimmed().to_string(),
    }
}

fn execute(cache: &Cache, config: &CacheConfig, command: Command) -> Result<String> {
    let default_ttl = config.chunk.default_ttl_seconds;

    let output = match command {
        Command::Get { key } => show_value(cache.get(key.as_bytes())?),
        Command::Set { key, value, ttl } => {
            cache.set(key.as_bytes(), value.as_bytes(), ttl)?;
            "OK".green().to_string()
        }
        Command::Del { key } => {
            cache.delete(key.as_bytes())?;
            "OK".green().to_string()
        }
        Command::Clear => {
            cache.clear()?;
            "OK".green().to_string()
        }
        Command::ChunkGet { name, key } => {
            let chunk = cache.chunk(&name, default_ttl)?;
            show_value(chunk.get(key.as_bytes()))
        }
        Command::ChunkSet {
            name,
            key,
            value,
            ttl,
        } => {
            let ttl = ttl.unwrap_or(default_ttl);
            let chunk = cache.update_chunk(&name, ttl, UPDATE_ATTEMPTS, |chunk| {
                chunk.set(key.as_bytes(), value.as_bytes());
                Ok(())
            })?;
            format!("{} (version {})", "OK".green(), chunk.version())
        }
        Command::ChunkDel { name, key } => {
            let chunk = cache.update_chunk(&name, default_ttl, UPDATE_ATTEMPTS, |chunk| {
                chunk.delete(key.as_bytes());
                Ok(())
            })?;
            format!("{} (version {})", "OK".green(), chunk.version())
        }
        Command::ChunkKeys { name } => {
            let chunk = cache.chunk(&name, default_ttl)?;
            let mut keys = chunk.keys();
            if keys.is_empty() {
                "(empty chunk)".dimmed().to_string()
            } else {
                keys.sort();
                keys.iter()
                    .enumerate()
                    .map(|(i, key)| format!("{}) \"{}\"", i + 1, String::from_utf8_lossy(key)))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::ChunkShow { name } => {
            let chunk = cache.chunk(&name, default_ttl)?;
            let mut keys = chunk.keys();
            keys.sort();

            let entries: serde_json::Map<String, serde_json::Value> = keys
                .into_iter()
                .map(|key| {
                    let value = chunk.get(&key).unwrap_or_default();
                    (
                        String::from_utf8_lossy(&key).into_owned(),
                        json!(String::from_utf8_lossy(&value)),
                    )
                })
                .collect();

            serde_json::to_string_pretty(&json!({
                "name": chunk.name(),
                "version": chunk.version(),
                "ttl_seconds": chunk.ttl_seconds(),
                "entries": entries,
            }))?
        }
        Command::ChunkDrop { name, purge } => {
            cache.delete_chunk(&name)?;
            if purge {
                cache.delete(&chunk_version_key(&name))?;
            }
            "OK".green().to_string()
        }
    };
    Ok(output)
}

fn is_conflict(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<CacheError>()
        .is_some_and(|e| e.is_conflict())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config);

    let cache = config
        .open_cache()
        .context("Failed to open cache backend")?;
    debug!("Running {:?} against {:?}", args.command, cache);

    let start = Instant::now();
    let result = execute(&cache, &config, args.command);
    let closed = cache.close();

    match result {
        Ok(output) => println!(
            "{}\n{}",
            output,
            format!("({:.2?})", start.elapsed()).dimmed()
        ),
        Err(e) => {
            if is_conflict(&e) {
                eprintln!(
                    "{}",
                    "hint: the chunk was changed by another writer, re-run the command".yellow()
                );
            }
            return Err(e);
        }
    }

    closed.context("Failed to close cache backend")?;
    Ok(())
}
