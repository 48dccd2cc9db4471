//! Sample sources.
//!
//! A source is polled once per interval and returns the samples observed in
//! the trailing window, oldest first. Any failure comes back as a
//! [`SourceError`]; the poll loop treats it as an idle round.

use crate::config::{OpenSearchConfig, SourceMode};
use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// One latency measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: f64, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }

    pub fn now(value: f64) -> Self {
        Self::new(value, Utc::now())
    }
}

/// Samples from one poll, in arrival order. Empty means no data.
pub type SampleBatch = Vec<Sample>;

#[async_trait]
pub trait SampleSource: Send {
    async fn poll(&mut self) -> Result<SampleBatch, SourceError>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Polls an OpenSearch index for gateway latency
pub struct OpenSearchSource {
    client: reqwest::Client,
    config: OpenSearchConfig,
    url: String,
}

impl OpenSearchSource {
    pub fn new(config: OpenSearchConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()?;
        let url = config.search_url();
        Ok(Self {
            client,
            config,
            url,
        })
    }

    pub fn query(&self) -> Value {
        match self.config.mode {
            SourceMode::Raw => raw_query(&self.config),
            SourceMode::Aggregate => aggregate_query(&self.config),
        }
    }
}

#[async_trait]
impl SampleSource for OpenSearchSource {
    async fn poll(&mut self) -> Result<SampleBatch, SourceError> {
        let mut request = self.client.post(&self.url).json(&self.query());
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| SourceError::Decode(e.to_string()))?;
        let polled_at = Utc::now();
        Ok(match self.config.mode {
            SourceMode::Raw => parse_raw_response(
                &body,
                &self.config.latency_field,
                &self.config.timestamp_field,
                polled_at,
            ),
            SourceMode::Aggregate => parse_aggregate_response(&body, polled_at),
        })
    }

    fn describe(&self) -> String {
        let mode = match self.config.mode {
            SourceMode::Raw => "raw",
            SourceMode::Aggregate => "aggregate",
        };
        format!("opensearch {} ({}, field {})", self.url, mode, self.config.latency_field)
    }
}

fn time_range(config: &OpenSearchConfig) -> Value {
    json!({
        "range": {
            config.timestamp_field.as_str(): {
                "gt": format!("now-{}s", config.lookback.as_secs())
            }
        }
    })
}

/// Individual hits over the trailing range, oldest first
pub fn raw_query(config: &OpenSearchConfig) -> Value {
    json!({
        "size": config.raw_batch_size,
        "_source": false,
        "fields": [config.latency_field, config.timestamp_field],
        "query": time_range(config),
        "sort": [
            { config.timestamp_field.as_str(): { "order": "asc" } }
        ]
    })
}

/// A single mean over the trailing range
pub fn aggregate_query(config: &OpenSearchConfig) -> Value {
    json!({
        "size": 0,
        "query": time_range(config),
        "aggs": {
            "latency": { "avg": { "field": config.latency_field } }
        }
    })
}

/// Extract one sample per hit. Hits without a usable latency are skipped.
pub fn parse_raw_response(
    body: &Value,
    latency_field: &str,
    timestamp_field: &str,
    polled_at: DateTime<Utc>,
) -> SampleBatch {
    let Some(hits) = body.pointer("/hits/hits").and_then(Value::as_array) else {
        return Vec::new();
    };

    hits.iter()
        .filter_map(|hit| {
            let fields = hit.get("fields");
            let value = fields
                .and_then(|f| f.get(latency_field))
                .and_then(first_value)
                .and_then(as_number);
            let Some(value) = value else {
                debug!(id = ?hit.get("_id"), "Skipping hit without latency");
                return None;
            };
            let observed_at = fields
                .and_then(|f| f.get(timestamp_field))
                .and_then(first_value)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(polled_at);
            Some(Sample::new(value, observed_at))
        })
        .collect()
}

/// Extract the interval mean, if the range held any documents
pub fn parse_aggregate_response(body: &Value, polled_at: DateTime<Utc>) -> SampleBatch {
    body.pointer("/aggregations/latency/value")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .map(|v| vec![Sample::new(v, polled_at)])
        .unwrap_or_default()
}

// `fields` values come back as arrays; tolerate a bare scalar too.
fn first_value(v: &Value) -> Option<&Value> {
    match v {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    let number = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|x| x.is_finite())
}
