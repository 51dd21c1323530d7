//! Runtime configuration for kv-prefix-cache.
//!
//! Configuration can be loaded from a JSON file or constructed
//! programmatically. S3 settings resolve with precedence: explicit config
//! field, then `KVC_*` environment variable, then the compile-time default,
//! so an unset field is distinguishable from an explicitly chosen value.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Compile-time S3 defaults, matching a local MinIO in its stock setup.
const DEFAULT_S3_ENDPOINT: &str = "http://127.0.0.1:9000";
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_S3_BUCKET: &str = "kv-cache";
const DEFAULT_ACCESS_KEY_ID: &str = "minioadmin";
const DEFAULT_SECRET_ACCESS_KEY: &str = "minioadmin";
const DEFAULT_USE_PATH_STYLE: bool = true;

const ENV_S3_ENDPOINT: &str = "KVC_S3_ENDPOINT";
const ENV_S3_REGION: &str = "KVC_S3_REGION";
const ENV_S3_BUCKET: &str = "KVC_S3_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "KVC_AWS_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "KVC_AWS_SECRET_ACCESS_KEY";
const ENV_USE_PATH_STYLE: &str = "KVC_S3_USE_PATH_STYLE";

/// Command-line arguments for the benchmark harness.
#[derive(Parser, Debug, Clone)]
#[command(name = "kvc-bench", about = "Closed-loop benchmark for the prefix KV cache")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Total operations across all threads.
    #[arg(long, default_value_t = 50_000)]
    pub iterations: usize,

    /// Worker thread count.
    #[arg(long, default_value_t = 8)]
    pub threads: usize,

    /// Number of pre-generated reusable prefixes.
    #[arg(long, default_value_t = 10_000)]
    pub num_prefixes: usize,

    /// Probability that an operation reuses a known prefix.
    #[arg(long, default_value_t = 0.30)]
    pub reuse_prob: f64,

    /// Bytes per stored block.
    #[arg(long, default_value_t = 1_048_576)]
    pub block_bytes: usize,

    /// Override the configured capacity in bytes.
    #[arg(long)]
    pub capacity_bytes: Option<u64>,

    /// Override the configured S3 bucket.
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Run against an in-process store instead of S3.
    #[arg(long)]
    pub memory: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model identifier; partitions the cache, since it feeds every
    /// fingerprint and object key.
    pub model_id: String,

    /// Tokens per block; must be greater than zero.
    pub block_size_tokens: u32,

    /// Soft upper bound on resident bytes. Stores may transiently exceed it
    /// until the eviction worker reacts.
    pub capacity_bytes: u64,

    /// Object store wiring.
    pub s3: S3Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_id: "demo-model".to_string(),
            block_size_tokens: 256,
            capacity_bytes: 10 * 1024 * 1024 * 1024,
            s3: S3Config::default(),
        }
    }
}

/// S3 settings as written in config: `None` means "resolve from the
/// environment, then fall back to the compile-time default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub use_path_style: Option<bool>,
}

/// Fully resolved S3 settings, ready to build a client from.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub use_path_style: bool,
}

impl S3Config {
    /// Apply the field → environment → default precedence.
    pub fn resolve(&self) -> S3Settings {
        S3Settings {
            endpoint: resolve_string(&self.endpoint, ENV_S3_ENDPOINT, DEFAULT_S3_ENDPOINT),
            region: resolve_string(&self.region, ENV_S3_REGION, DEFAULT_S3_REGION),
            bucket: resolve_string(&self.bucket, ENV_S3_BUCKET, DEFAULT_S3_BUCKET),
            access_key_id: resolve_string(&self.access_key_id, ENV_ACCESS_KEY_ID, DEFAULT_ACCESS_KEY_ID),
            secret_access_key: resolve_string(
                &self.secret_access_key,
                ENV_SECRET_ACCESS_KEY,
                DEFAULT_SECRET_ACCESS_KEY,
            ),
            use_path_style: resolve_bool(&self.use_path_style, ENV_USE_PATH_STYLE, DEFAULT_USE_PATH_STYLE),
        }
    }
}

fn resolve_string(field: &Option<String>, env_name: &str, default: &str) -> String {
    if let Some(value) = field {
        return value.clone();
    }
    std::env::var(env_name).unwrap_or_else(|_| default.to_string())
}

fn resolve_bool(field: &Option<bool>, env_name: &str, default: bool) -> bool {
    if let Some(value) = field {
        return *value;
    }
    match std::env::var(env_name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

/// Booleans in env vars accept `1`, `true`, and `TRUE`.
fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE")
}

impl Config {
    /// Load configuration from a JSON file. A missing file is not an error:
    /// the cache runs fine on built-in defaults plus `KVC_*` overrides.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no config file, using built-in defaults");
                Ok(Config::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.model_id, "demo-model");
        assert_eq!(cfg.block_size_tokens, 256);
        assert_eq!(cfg.capacity_bytes, 10 * 1024 * 1024 * 1024);
    }

    #[test]
    fn explicit_fields_win_over_everything() {
        let cfg = S3Config {
            endpoint: Some("http://example:9000".to_string()),
            bucket: Some("other".to_string()),
            use_path_style: Some(false),
            ..Default::default()
        };
        let resolved = cfg.resolve();
        assert_eq!(resolved.endpoint, "http://example:9000");
        assert_eq!(resolved.bucket, "other");
        assert!(!resolved.use_path_style);
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut cfg = Config::default();
        cfg.block_size_tokens = 64;
        cfg.s3.bucket = Some("bench".to_string());

        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.block_size_tokens, 64);
        assert_eq!(back.s3.bucket.as_deref(), Some("bench"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"model_id":"llama-3"}"#).unwrap();
        assert_eq!(cfg.model_id, "llama-3");
        assert_eq!(cfg.block_size_tokens, 256);
        assert!(cfg.s3.endpoint.is_none());
    }
}
