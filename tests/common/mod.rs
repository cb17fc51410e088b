#![allow(dead_code)]

use kafka_smoke::config::{ClusterConfig, Config, ConsumerConfig, ProducerConfig, TopicsConfig};
use kafka_smoke::TlsPaths;
use std::env;
use std::path::PathBuf;

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    // Use TEST_ prefix for test environment variables
    let cluster = ClusterConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        client_id: format!("kafka-smoke-test-{}", std::process::id()),
        request_timeout_ms: 10_000,
        connect_retries: 1,
        retry_backoff_ms: 500,
        ..ClusterConfig::default()
    };

    // TLS only when all three paths are provided
    let tls = match (
        env::var("TEST_KAFKA_CA_CERT"),
        env::var("TEST_KAFKA_CLIENT_CERT"),
        env::var("TEST_KAFKA_CLIENT_KEY"),
    ) {
        (Ok(ca), Ok(cert), Ok(key)) => Some(TlsPaths {
            ca_cert: PathBuf::from(ca),
            client_cert: PathBuf::from(cert),
            client_key: PathBuf::from(key),
        }),
        _ => None,
    };

    let producer = ProducerConfig {
        acks: "all".to_string(),
        send_interval_ms: 0, // No pacing in tests
        delivery_timeout_ms: 30_000,
        ..ProducerConfig::default()
    };

    let consumer = ConsumerConfig {
        group_id: format!("kafka-smoke-test-group-{}", std::process::id()),
        poll_timeout_ms: 500,
        ..ConsumerConfig::default()
    };

    Config {
        cluster,
        tls,
        topics: TopicsConfig::default(),
        producer,
        consumer,
        export: Default::default(),
    }
}

/// Topic name unique to this test process.
pub fn unique_topic(name: &str) -> String {
    format!("kafka_smoke_{}_{}", name, std::process::id())
}
