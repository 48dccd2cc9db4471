//! Environment-driven configuration.
//!
//! Everything the `latwatch` binary needs comes from process environment
//! variables; there is no CLI surface. [`LatwatchConfig::from_lookup`] takes
//! the lookup as a closure so tests never touch the real environment.

use crate::error::ConfigError;
use crate::synthetic::ScenarioKind;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_INDEX: &str = "kong-stream-v1";
pub const DEFAULT_LATENCY_FIELD: &str = "latencies.kong";
pub const DEFAULT_TIMESTAMP_FIELD: &str = "@timestamp";

/// Which shape the source returns per poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Zero or more raw per-record samples
    Raw,
    /// At most one pre-aggregated mean
    Aggregate,
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "aggregate" | "avg" => Ok(Self::Aggregate),
            other => Err(format!("expected raw or aggregate, got {other}")),
        }
    }
}

/// Where samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    OpenSearch,
    Synthetic,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opensearch" => Ok(Self::OpenSearch),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(format!("expected opensearch or synthetic, got {other}")),
        }
    }
}

/// Connection and query settings for the search backend
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSearchConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub verify_certs: bool,
    pub index: String,
    pub latency_field: String,
    pub timestamp_field: String,
    pub timeout_ms: u64,
    /// Trailing time range queried on every poll
    pub lookback: Duration,
    /// Maximum hits requested in raw mode
    pub raw_batch_size: usize,
    pub mode: SourceMode,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9200,
            user: None,
            password: None,
            use_tls: true,
            verify_certs: false,
            index: DEFAULT_INDEX.to_string(),
            latency_field: DEFAULT_LATENCY_FIELD.to_string(),
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            timeout_ms: 5000,
            lookback: Duration::from_secs(5),
            raw_batch_size: 500,
            mode: SourceMode::Raw,
        }
    }
}

impl OpenSearchConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn search_url(&self) -> String {
        format!("{}/{}/_search", self.base_url(), self.index)
    }
}

/// Forest sizing and bookkeeping bounds
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Ensemble size
    pub num_trees: usize,
    /// Window length
    pub shingle_size: usize,
    /// Maximum live indices in the oracle (also the score history length)
    pub tree_size: usize,
    /// CoDisp above this is flagged as an anomaly
    pub threshold: f64,
    /// Full reset once the running index reaches this value
    pub reset_threshold: u64,
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            shingle_size: 100,
            tree_size: 500,
            threshold: 60.0,
            reset_threshold: 1_000_000,
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("LATWATCH_NUM_TREES", self.num_trees as u64)?;
        at_least_one("LATWATCH_SHINGLE_SIZE", self.shingle_size as u64)?;
        at_least_one("LATWATCH_TREE_SIZE", self.tree_size as u64)?;
        at_least_one("LATWATCH_RESET_THRESHOLD", self.reset_threshold)?;
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::invalid(
                "LATWATCH_THRESHOLD",
                self.threshold.to_string(),
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Full process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LatwatchConfig {
    pub source: SourceKind,
    pub opensearch: OpenSearchConfig,
    pub pipeline: PipelineConfig,
    pub query_interval: Duration,
    pub refresh_interval: Duration,
    /// Generator used when `source` is synthetic
    pub scenario: ScenarioKind,
    pub synthetic_per_poll: usize,
}

impl Default for LatwatchConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::OpenSearch,
            opensearch: OpenSearchConfig::default(),
            pipeline: PipelineConfig::default(),
            query_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_millis(1000),
            scenario: ScenarioKind::LatencyNoise,
            synthetic_per_poll: 5,
        }
    }
}

impl LatwatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("LATWATCH_SOURCE") {
            cfg.source = v
                .parse()
                .map_err(|reason| ConfigError::invalid("LATWATCH_SOURCE", v.clone(), reason))?;
        }

        if let Some(v) = lookup("LATWATCH_SCENARIO") {
            cfg.scenario = v
                .parse()
                .map_err(|reason| ConfigError::invalid("LATWATCH_SCENARIO", v.clone(), reason))?;
        }
        parse_into(&lookup, "LATWATCH_SYNTHETIC_PER_POLL", &mut cfg.synthetic_per_poll)?;
        at_least_one("LATWATCH_SYNTHETIC_PER_POLL", cfg.synthetic_per_poll as u64)?;

        let os = &mut cfg.opensearch;
        match lookup("OS_HOST") {
            Some(host) if !host.trim().is_empty() => os.host = host,
            _ if cfg.source == SourceKind::OpenSearch => return Err(ConfigError::Missing("OS_HOST")),
            _ => {}
        }
        parse_into(&lookup, "OS_PORT", &mut os.port)?;
        os.user = lookup("OS_USER").filter(|s| !s.is_empty());
        os.password = lookup("OS_PASSWORD");
        parse_flag(&lookup, "OS_USE_TLS", &mut os.use_tls)?;
        parse_flag(&lookup, "OS_VERIFY_CERTS", &mut os.verify_certs)?;
        if let Some(v) = lookup("OS_INDEX") {
            os.index = v;
        }
        if let Some(v) = lookup("OS_LATENCY_FIELD") {
            os.latency_field = v;
        }
        if let Some(v) = lookup("OS_TIMESTAMP_FIELD") {
            os.timestamp_field = v;
        }
        parse_into(&lookup, "OS_TIMEOUT_MS", &mut os.timeout_ms)?;
        parse_into(&lookup, "LATWATCH_RAW_BATCH_SIZE", &mut os.raw_batch_size)?;
        if let Some(v) = lookup("LATWATCH_MODE") {
            os.mode = v
                .parse()
                .map_err(|reason| ConfigError::invalid("LATWATCH_MODE", v.clone(), reason))?;
        }

        let mut interval_secs = cfg.query_interval.as_secs();
        parse_into(&lookup, "LATWATCH_QUERY_INTERVAL_SECS", &mut interval_secs)?;
        at_least_one("LATWATCH_QUERY_INTERVAL_SECS", interval_secs)?;
        cfg.query_interval = Duration::from_secs(interval_secs);

        // The trailing range defaults to the poll cadence so consecutive polls tile time.
        let mut lookback_secs = interval_secs;
        parse_into(&lookup, "LATWATCH_LOOKBACK_SECS", &mut lookback_secs)?;
        at_least_one("LATWATCH_LOOKBACK_SECS", lookback_secs)?;
        cfg.opensearch.lookback = Duration::from_secs(lookback_secs);

        let mut refresh_ms = cfg.refresh_interval.as_millis() as u64;
        parse_into(&lookup, "LATWATCH_REFRESH_MS", &mut refresh_ms)?;
        at_least_one("LATWATCH_REFRESH_MS", refresh_ms)?;
        cfg.refresh_interval = Duration::from_millis(refresh_ms);

        let p = &mut cfg.pipeline;
        parse_into(&lookup, "LATWATCH_NUM_TREES", &mut p.num_trees)?;
        parse_into(&lookup, "LATWATCH_SHINGLE_SIZE", &mut p.shingle_size)?;
        parse_into(&lookup, "LATWATCH_TREE_SIZE", &mut p.tree_size)?;
        parse_into(&lookup, "LATWATCH_THRESHOLD", &mut p.threshold)?;
        parse_into(&lookup, "LATWATCH_RESET_THRESHOLD", &mut p.reset_threshold)?;
        if let Some(v) = lookup("LATWATCH_SEED") {
            p.seed = Some(
                v.parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::invalid("LATWATCH_SEED", v.clone(), e.to_string()))?,
            );
        }

        at_least_one("OS_TIMEOUT_MS", cfg.opensearch.timeout_ms)?;
        at_least_one("LATWATCH_RAW_BATCH_SIZE", cfg.opensearch.raw_batch_size as u64)?;
        cfg.pipeline.validate()?;
        Ok(cfg)
    }
}

fn parse_into<T, F>(lookup: &F, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(var) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, raw.clone(), e.to_string()))?;
    }
    Ok(())
}

fn parse_flag<F>(lookup: &F, var: &'static str, slot: &mut bool) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(var) {
        *slot = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(ConfigError::invalid(var, raw, "expected a boolean")),
        };
    }
    Ok(())
}

fn at_least_one(var: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(var, "0", "must be at least 1"));
    }
    Ok(())
}
