//! Loader for Perch configuration with YAML + environment overlays.
//!
//! A `perch.yaml` file provides the base settings; `PERCH_`-prefixed
//! environment variables override individual fields, and `${VAR}`
//! placeholders inside string values are expanded (recursively, with a depth
//! cap) before deserialization.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

#[derive(Debug, Deserialize)]
pub struct PerchConfig {
    /// Directory holding `accounts.json` and the `sessions/` blobs.
    pub data_dir: String,
    /// SQLite database URL, e.g. `sqlite://perch.db`.
    pub database_url: String,
    /// External capability gateway.
    pub gateway: GatewaySettings,
    /// Operator-seeded handles tracked by the sweep loops.
    #[serde(default)]
    pub watchlist: Vec<String>,
    #[serde(default)]
    pub limits: RateSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
}

#[derive(Debug, Deserialize)]
pub struct GatewaySettings {
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Quota knobs for the rate limiter. One authoritative default applies to
/// every endpoint; deployments tune these rather than editing call sites.
#[derive(Debug, Clone, Deserialize)]
pub struct RateSettings {
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            min_spacing_ms: default_min_spacing_ms(),
            window_secs: default_window_secs(),
            max_calls: default_max_calls(),
        }
    }
}

fn default_min_spacing_ms() -> u64 {
    1500
}
fn default_window_secs() -> u64 {
    15 * 60
}
fn default_max_calls() -> u32 {
    150
}

/// Intervals and batch sizes for the three ingestion loops.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Sleep between full profile passes.
    #[serde(default = "default_profile_pass_secs")]
    pub profile_pass_secs: u64,
    /// Delay between rows inside a profile or content pass.
    #[serde(default = "default_row_delay_secs")]
    pub row_delay_secs: u64,
    /// Sleep between full content passes.
    #[serde(default = "default_content_pass_secs")]
    pub content_pass_secs: u64,
    /// Recent posts fetched per account per pass.
    #[serde(default = "default_content_batch")]
    pub content_batch: u32,
    /// Ticker interval for the priority sweep.
    #[serde(default = "default_priority_pass_secs")]
    pub priority_pass_secs: u64,
    /// Capacity of the priority discovery queue; overflow is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            profile_pass_secs: default_profile_pass_secs(),
            row_delay_secs: default_row_delay_secs(),
            content_pass_secs: default_content_pass_secs(),
            content_batch: default_content_batch(),
            priority_pass_secs: default_priority_pass_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_profile_pass_secs() -> u64 {
    12 * 60 * 60
}
fn default_row_delay_secs() -> u64 {
    10
}
fn default_content_pass_secs() -> u64 {
    6 * 60 * 60
}
fn default_content_batch() -> u32 {
    20
}
fn default_priority_pass_secs() -> u64 {
    6 * 60 * 60
}
fn default_queue_capacity() -> usize {
    1000
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hiding the `config` crate wiring (file source + env overrides).
pub struct PerchConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for PerchConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PerchConfigLoader {
    /// Start with the defaults: `PERCH_` env overrides, no file yet.
    pub fn new() -> Self {
        let builder =
            Config::builder().add_source(Environment::with_prefix("PERCH").separator("__"));
        Self { builder }
    }

    /// Attach a YAML/TOML/JSON file; format is inferred from the suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self.builder.add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Merge an inline YAML snippet; used by tests and the CLI.
    ///
    /// ```
    /// use perch_config::PerchConfigLoader;
    ///
    /// let cfg = PerchConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// data_dir: "/var/lib/perch"
    /// database_url: "sqlite://perch.db"
    /// gateway:
    ///   base_url: "http://localhost:9000"
    /// "#,
    ///     )
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(cfg.limits.max_calls, 150);
    /// assert_eq!(cfg.ingest.queue_capacity, 1000);
    /// assert!(cfg.watchlist.is_empty());
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Merge the sources, expand `${VAR}` placeholders, and deserialize.
    pub fn load(self) -> Result<PerchConfig, ConfigError> {
        let cfg = self.builder.build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))
    }
}
