//! End-to-end check of a telemetry pipeline's Kafka leg.
//!
//! Makes sure the logs, metrics and traces topics exist, sends one
//! OTLP-shaped JSON document to each, and confirms each topic has partitions.

use crate::config::Config;
use crate::kafka::{ClusterAdmin, MessageProducer, TopicAdmin};
use crate::provision::{ensure_topics, ProvisionReport, TopicTemplate};
use crate::tls::TlsContext;
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

pub const SERVICE_NAME: &str = "kafka-smoke-service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Logs,
    Metrics,
    Traces,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Logs, Signal::Metrics, Signal::Traces];

    /// Picks the signal a topic carries from its name suffix.
    pub fn for_topic(topic: &str) -> Option<Self> {
        if topic.ends_with("logs") {
            Some(Signal::Logs)
        } else if topic.ends_with("metrics") {
            Some(Signal::Metrics)
        } else if topic.ends_with("traces") {
            Some(Signal::Traces)
        } else {
            None
        }
    }

    pub fn payload(&self) -> Value {
        let now = Utc::now();
        let time_unix_nano = now.timestamp_nanos_opt().unwrap_or_default();

        match self {
            Signal::Logs => logs_payload(time_unix_nano, &now.to_rfc3339()),
            Signal::Metrics => metrics_payload(time_unix_nano),
            Signal::Traces => traces_payload(time_unix_nano),
        }
    }
}

fn resource() -> Value {
    json!({
        "attributes": [{
            "key": "service.name",
            "value": {"stringValue": SERVICE_NAME}
        }]
    })
}

fn logs_payload(time_unix_nano: i64, timestamp: &str) -> Value {
    json!({
        "resourceLogs": [{
            "resource": resource(),
            "scopeLogs": [{
                "scope": {"name": "kafka-smoke-logger"},
                "logRecords": [{
                    "timeUnixNano": time_unix_nano.to_string(),
                    "severityText": "INFO",
                    "body": {"stringValue": format!("smoke test log - {}", timestamp)}
                }]
            }]
        }]
    })
}

fn metrics_payload(time_unix_nano: i64) -> Value {
    json!({
        "resourceMetrics": [{
            "resource": resource(),
            "scopeMetrics": [{
                "scope": {"name": "kafka-smoke-meter"},
                "metrics": [{
                    "name": "kafka_smoke_counter",
                    "sum": {
                        "dataPoints": [{
                            "timeUnixNano": time_unix_nano.to_string(),
                            "asInt": "42"
                        }]
                    }
                }]
            }]
        }]
    })
}

fn traces_payload(time_unix_nano: i64) -> Value {
    json!({
        "resourceSpans": [{
            "resource": resource(),
            "scopeSpans": [{
                "scope": {"name": "kafka-smoke-tracer"},
                "spans": [{
                    "traceId": STANDARD.encode(b"1234567890123456"),
                    "spanId": STANDARD.encode(b"12345678"),
                    "name": "kafka-smoke-span",
                    "startTimeUnixNano": time_unix_nano.to_string(),
                    "endTimeUnixNano": (time_unix_nano + 1_000_000).to_string()
                }]
            }]
        }]
    })
}

#[derive(Debug, Default)]
pub struct SmokeReport {
    pub provision: Option<ProvisionReport>,
    pub sent: Vec<String>,
    pub send_failed: Vec<String>,
    pub verified: Vec<String>,
    pub unverified: Vec<String>,
}

impl SmokeReport {
    pub fn is_success(&self) -> bool {
        !self.sent.is_empty() && self.send_failed.is_empty() && self.unverified.is_empty()
    }
}

/// Runs the full smoke test. Provisioning problems are logged and the test
/// continues, so a cluster that rejects topic creation still gets its
/// connection and produce path exercised.
pub async fn run_smoke_test(config: &Config, tls: Option<&TlsContext>) -> Result<SmokeReport> {
    let mut report = SmokeReport::default();
    let topics: BTreeSet<String> = config.topics.required.iter().cloned().collect();

    let admin = ClusterAdmin::new(&config.cluster, tls)?;
    match ensure_topics(&admin, &topics, &TopicTemplate::from(&config.topics)).await {
        Ok(provision) => report.provision = Some(provision),
        Err(e) => warn!("Topic check failed, continuing with connection test: {}", e),
    }

    let producer = MessageProducer::new(&config.cluster, tls, &config.producer)?;
    for (i, topic) in topics.iter().enumerate() {
        let signal = Signal::for_topic(topic).unwrap_or(Signal::ALL[i % Signal::ALL.len()]);
        let payload = serde_json::to_vec(&signal.payload())?;

        match producer.send(topic, None, &payload).await {
            Ok(delivery) => {
                info!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Sent {:?} sample to {}",
                    signal,
                    topic
                );
                report.sent.push(topic.clone());
            }
            Err(e) => {
                error!("Sending to {} failed: {}", topic, e);
                report.send_failed.push(topic.clone());
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    producer.close()?;

    if report.sent.is_empty() {
        return Ok(report);
    }

    for topic in &topics {
        match admin.describe_topic(topic).await {
            Ok(description) if description.partitions > 0 => {
                info!("{} exists with {} partition(s)", topic, description.partitions);
                report.verified.push(topic.clone());
            }
            Ok(_) => {
                warn!("{} has no partitions", topic);
                report.unverified.push(topic.clone());
            }
            Err(e) => {
                warn!("Checking {} failed: {}", topic, e);
                report.unverified.push(topic.clone());
            }
        }
    }

    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub mode: &'static str,
    pub outcome: std::result::Result<usize, String>,
}

/// Tries a metadata fetch over plaintext and then over TLS, reporting both.
pub async fn probe(config: &Config, tls: Option<&TlsContext>) -> Vec<ProbeResult> {
    let mut results = vec![probe_once("plaintext", config, None).await];

    match tls {
        Some(context) => results.push(probe_once("tls", config, Some(context)).await),
        None => info!("No TLS credentials configured, skipping TLS probe"),
    }

    results
}

async fn probe_once(mode: &'static str, config: &Config, tls: Option<&TlsContext>) -> ProbeResult {
    info!("Testing {} connection...", mode);

    let outcome = match ClusterAdmin::new(&config.cluster, tls) {
        Ok(admin) => admin.list_topics().await.map(|topics| topics.len()),
        Err(e) => Err(e),
    };

    match &outcome {
        Ok(count) => info!("{} connection successful ({} topics visible)", mode, count),
        Err(e) => error!("{} connection failed: {}", mode, e),
    }

    ProbeResult {
        mode,
        outcome: outcome.map_err(|e| e.to_string()),
    }
}
