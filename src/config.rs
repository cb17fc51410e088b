use crate::tls::TlsPaths;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub tls: Option<TlsPaths>,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_reconnect_backoff_max_ms")]
    pub reconnect_backoff_max_ms: u64,
    #[serde(default = "default_metadata_max_age_ms")]
    pub metadata_max_age_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicsConfig {
    #[serde(default = "default_required_topics")]
    pub required: Vec<String>,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
    /// Shape of the topic `produce` and `consume` set up before exchanging
    /// messages.
    #[serde(default)]
    pub test_topic: TestTopicConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestTopicConfig {
    #[serde(default = "default_test_topic_partitions")]
    pub partitions: i32,
    #[serde(default = "default_test_topic_replication_factor")]
    pub replication_factor: i32,
    #[serde(default = "default_test_topic_configs")]
    pub configs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_message_count")]
    pub message_count: u32,
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: u32,
    #[serde(default = "default_message_prefix")]
    pub message_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,
    #[serde(default = "default_true")]
    pub enable_auto_commit: bool,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_max_partition_fetch_bytes")]
    pub max_partition_fetch_bytes: usize,
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: usize,
    #[serde(default = "default_fetch_max_wait_ms")]
    pub fetch_max_wait_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Where secret material comes from and where the exported copy goes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_source_namespace")]
    pub source_namespace: String,
    #[serde(default = "default_tls_secret")]
    pub tls_secret: String,
    #[serde(default = "default_keystore_secret")]
    pub keystore_secret: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_target_namespace")]
    pub target_namespace: String,
    #[serde(default = "default_manifest_secret")]
    pub manifest_secret: String,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default = "default_openssl")]
    pub openssl: String,
}

impl Config {
    /// Loads defaults, then the TOML file if it exists, then `KAFKA_SMOKE_*`
    /// environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("KAFKA_SMOKE")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cluster.brokers")
                    .with_list_parse_key("topics.required")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.brokers.is_empty() {
            return Err(Error::Config("cluster.brokers must not be empty".to_string()));
        }

        for broker in &self.cluster.brokers {
            validate_endpoint(broker)?;
        }

        if self.topics.partitions < 1 {
            return Err(Error::Config("topics.partitions must be positive".to_string()));
        }

        if self.topics.replication_factor < 1 {
            return Err(Error::Config(
                "topics.replication_factor must be positive".to_string(),
            ));
        }

        if self.topics.test_topic.partitions < 1 || self.topics.test_topic.replication_factor < 1 {
            return Err(Error::Config(
                "topics.test_topic partitions and replication_factor must be positive".to_string(),
            ));
        }

        if self.topics.required.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Config("topics.required contains an empty name".to_string()));
        }

        Ok(())
    }
}

impl ClusterConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl ProducerConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl ExportConfig {
    pub fn pem_dir(&self) -> PathBuf {
        self.output_dir.join("pem")
    }

    pub fn jks_dir(&self) -> PathBuf {
        self.output_dir.join("jks")
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("broker '{}' is not host:port", endpoint)))?;

    if host.is_empty() {
        return Err(Error::Config(format!("broker '{}' has an empty host", endpoint)));
    }

    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("broker '{}' has an invalid port", endpoint)))?;

    Ok(())
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: default_client_id(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_retries: default_connect_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            reconnect_backoff_max_ms: default_reconnect_backoff_max_ms(),
            metadata_max_age_ms: default_metadata_max_age_ms(),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            required: default_required_topics(),
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            configs: BTreeMap::new(),
            test_topic: TestTopicConfig::default(),
        }
    }
}

impl Default for TestTopicConfig {
    fn default() -> Self {
        Self {
            partitions: default_test_topic_partitions(),
            replication_factor: default_test_topic_replication_factor(),
            configs: default_test_topic_configs(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            acks: default_acks(),
            message_count: default_message_count(),
            send_interval_ms: default_send_interval_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            retries: default_retries(),
            max_in_flight: default_max_in_flight(),
            message_prefix: default_message_prefix(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            group_id: default_group_id(),
            auto_offset_reset: OffsetReset::default(),
            enable_auto_commit: true,
            poll_timeout_ms: default_poll_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            max_partition_fetch_bytes: default_max_partition_fetch_bytes(),
            fetch_max_bytes: default_fetch_max_bytes(),
            fetch_max_wait_ms: default_fetch_max_wait_ms(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            source_namespace: default_source_namespace(),
            tls_secret: default_tls_secret(),
            keystore_secret: default_keystore_secret(),
            output_dir: default_output_dir(),
            target_namespace: default_target_namespace(),
            manifest_secret: default_manifest_secret(),
            manifest_path: default_manifest_path(),
            kubectl: default_kubectl(),
            openssl: default_openssl(),
        }
    }
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9093".to_string()]
}

fn default_client_id() -> String {
    "kafka-smoke".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_reconnect_backoff_max_ms() -> u64 {
    10_000
}

fn default_metadata_max_age_ms() -> u64 {
    30_000
}

fn default_required_topics() -> Vec<String> {
    vec![
        "otcol_logs".to_string(),
        "otcol_metrics".to_string(),
        "otcol_traces".to_string(),
    ]
}

fn default_partitions() -> i32 {
    6
}

fn default_replication_factor() -> i32 {
    1
}

fn default_test_topic_partitions() -> i32 {
    1
}

fn default_test_topic_replication_factor() -> i32 {
    1
}

fn default_test_topic_configs() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("min.insync.replicas".to_string(), "1".to_string()),
        ("unclean.leader.election.enable".to_string(), "true".to_string()),
    ])
}

fn default_topic() -> String {
    "smoke_test".to_string()
}

fn default_acks() -> String {
    "1".to_string()
}

fn default_message_count() -> u32 {
    100
}

fn default_send_interval_ms() -> u64 {
    1000
}

fn default_delivery_timeout_ms() -> u64 {
    120_000
}

fn default_retries() -> u32 {
    5
}

fn default_max_in_flight() -> u32 {
    5
}

fn default_message_prefix() -> String {
    "Hello Kafka".to_string()
}

fn default_group_id() -> String {
    "kafka-smoke-consumer".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_max_poll_interval_ms() -> u64 {
    300_000
}

fn default_max_partition_fetch_bytes() -> usize {
    1_048_576
}

fn default_fetch_max_bytes() -> usize {
    52_428_800 // 50MB
}

fn default_fetch_max_wait_ms() -> u64 {
    500
}

fn default_source_namespace() -> String {
    "confluent-kafka".to_string()
}

fn default_tls_secret() -> String {
    "kafka-tls-certs".to_string()
}

fn default_keystore_secret() -> String {
    "kafka-keystore".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_target_namespace() -> String {
    "opentelemetry".to_string()
}

fn default_manifest_secret() -> String {
    "kafka-client-certs".to_string()
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("kafka-client-certs-from-export.yaml")
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_openssl() -> String {
    "openssl".to_string()
}
