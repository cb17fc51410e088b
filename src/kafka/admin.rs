use crate::config::ClusterConfig;
use crate::kafka::client::base_client_config;
use crate::tls::TlsContext;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, ResourceSpecifier, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::metadata::Metadata;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Topics whose names start with this prefix belong to the broker itself.
pub const INTERNAL_TOPIC_PREFIX: &str = "__";

pub fn is_internal_topic(name: &str) -> bool {
    name.starts_with(INTERNAL_TOPIC_PREFIX)
}

/// What to create: name, shape, and per-topic overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    pub configs: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            configs: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("topic name must not be empty".to_string()));
        }
        if self.partitions < 1 {
            return Err(Error::Config(format!(
                "topic '{}': partition count must be positive",
                self.name
            )));
        }
        if self.replication_factor < 1 {
            return Err(Error::Config(format!(
                "topic '{}': replication factor must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Shape of an existing topic as reported by cluster metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicDescription {
    pub partitions: usize,
    pub replication_factor: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The broker accepted the request; removal completes asynchronously.
    Deleted,
    NotFound,
}

/// Administrative operations against a cluster.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// All topic names, internal ones included.
    async fn list_topics(&self) -> Result<BTreeSet<String>>;

    async fn describe_topic(&self, name: &str) -> Result<TopicDescription>;

    async fn describe_topic_config(&self, name: &str) -> Result<BTreeMap<String, String>>;

    /// Issues one request for all `specs`. The outer error covers the request
    /// itself; each entry carries that topic's result.
    async fn create_topics(&self, specs: &[TopicSpec]) -> Result<Vec<(String, Result<CreateOutcome>)>>;

    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome> {
        let mut results = self.create_topics(std::slice::from_ref(spec)).await?;
        match results.pop() {
            Some((_, result)) => result,
            None => Err(Error::Kafka(rdkafka::error::KafkaError::AdminOpCreation(
                format!("no result returned for topic '{}'", spec.name),
            ))),
        }
    }

    async fn delete_topic(&self, name: &str) -> Result<DeleteOutcome>;
}

/// The parts of a metadata response the admin operations use, copied out of
/// librdkafka's buffer so they can leave the blocking thread.
#[derive(Debug, Clone)]
struct TopicMetadata {
    name: String,
    error: Option<RDKafkaErrorCode>,
    partitions: usize,
    replication_factor: usize,
}

impl TopicMetadata {
    fn collect(metadata: &Metadata) -> Vec<Self> {
        metadata
            .topics()
            .iter()
            .map(|topic| Self {
                name: topic.name().to_string(),
                error: topic.error().map(RDKafkaErrorCode::from),
                partitions: topic.partitions().len(),
                replication_factor: topic
                    .partitions()
                    .first()
                    .map(|p| p.replicas().len())
                    .unwrap_or(0),
            })
            .collect()
    }
}

/// [`TopicAdmin`] over an rdkafka admin client.
pub struct ClusterAdmin {
    admin_client: Arc<AdminClient<DefaultClientContext>>,
    request_timeout: Duration,
    connect_retries: u32,
    retry_backoff: Duration,
}

impl ClusterAdmin {
    pub fn new(cluster: &ClusterConfig, tls: Option<&TlsContext>) -> Result<Self> {
        let admin_client: AdminClient<_> = base_client_config(cluster, tls, "admin")
            .create()
            .map_err(Error::Kafka)?;

        debug!(brokers = %cluster.bootstrap_servers(), "Admin client created");

        Ok(Self {
            admin_client: Arc::new(admin_client),
            request_timeout: cluster.request_timeout(),
            connect_retries: cluster.connect_retries,
            retry_backoff: cluster.retry_backoff(),
        })
    }

    fn admin_options(&self) -> AdminOptions {
        AdminOptions::new()
            .request_timeout(Some(self.request_timeout))
            .operation_timeout(Some(self.request_timeout))
    }

    /// Fetches metadata within one `request_timeout` budget shared by all
    /// attempts. A connection failure is retried after `retry_backoff` only
    /// while the budget still covers the backoff; once it is spent the call
    /// fails with [`Error::Timeout`].
    async fn fetch_metadata(&self, topic: Option<&str>) -> Result<Vec<TopicMetadata>> {
        let subject = topic.unwrap_or("cluster metadata");
        let deadline = Instant::now() + self.request_timeout;
        let mut attempt = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.budget_exhausted(subject, None));
            }

            let client = Arc::clone(&self.admin_client);
            let topic_name = topic.map(str::to_string);
            let fetched = tokio::task::spawn_blocking(move || {
                client
                    .inner()
                    .fetch_metadata(topic_name.as_deref(), remaining)
                    .map(|metadata| TopicMetadata::collect(&metadata))
            })
            .await
            .map_err(|e| Error::ConnectionFailure(format!("{}: metadata task failed: {}", subject, e)))?;

            let err = match fetched {
                Ok(topics) => return Ok(topics),
                Err(e) => Error::from_kafka(e, subject),
            };

            if !err.is_connection_failure() {
                return Err(err);
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left <= self.retry_backoff {
                return Err(self.budget_exhausted(subject, Some(&err)));
            }
            if attempt >= self.connect_retries {
                return Err(err);
            }

            attempt += 1;
            warn!(
                "Metadata fetch failed ({}), retry {}/{} in {:?}",
                err, attempt, self.connect_retries, self.retry_backoff
            );
            tokio::time::sleep(self.retry_backoff).await;
        }
    }

    fn budget_exhausted(&self, subject: &str, last: Option<&Error>) -> Error {
        let message = match last {
            Some(err) => format!(
                "{}: no answer within {:?}, last error: {}",
                subject, self.request_timeout, err
            ),
            None => format!("{}: no answer within {:?}", subject, self.request_timeout),
        };
        Error::Timeout { message }
    }
}

#[async_trait]
impl TopicAdmin for ClusterAdmin {
    #[instrument(skip(self))]
    async fn list_topics(&self) -> Result<BTreeSet<String>> {
        let metadata = self.fetch_metadata(None).await?;

        let topics: BTreeSet<String> = metadata.into_iter().map(|topic| topic.name).collect();

        debug!("Cluster reports {} topic(s)", topics.len());
        Ok(topics)
    }

    #[instrument(skip(self))]
    async fn describe_topic(&self, name: &str) -> Result<TopicDescription> {
        let metadata = self.fetch_metadata(Some(name)).await?;

        let topic = metadata
            .into_iter()
            .find(|topic| topic.name == name)
            .ok_or_else(|| Error::TopicNotFound(name.to_string()))?;

        if let Some(code) = topic.error {
            return Err(Error::from_admin_code(code, name));
        }

        if topic.partitions == 0 {
            return Err(Error::TopicNotFound(name.to_string()));
        }

        Ok(TopicDescription {
            partitions: topic.partitions,
            replication_factor: topic.replication_factor,
        })
    }

    #[instrument(skip(self))]
    async fn describe_topic_config(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let results = self
            .admin_client
            .describe_configs(&[ResourceSpecifier::Topic(name)], &self.admin_options())
            .await
            .map_err(|e| Error::from_kafka(e, name))?;

        let mut configs = BTreeMap::new();
        for result in results {
            let resource = result.map_err(|code| Error::from_admin_code(code, name))?;
            for entry in resource.entries {
                if let Some(value) = entry.value {
                    configs.insert(entry.name, value);
                }
            }
        }

        Ok(configs)
    }

    #[instrument(skip(self, specs), fields(count = specs.len()))]
    async fn create_topics(&self, specs: &[TopicSpec]) -> Result<Vec<(String, Result<CreateOutcome>)>> {
        for spec in specs {
            spec.validate()?;
        }

        let new_topics: Vec<NewTopic<'_>> = specs
            .iter()
            .map(|spec| {
                spec.configs.iter().fold(
                    NewTopic::new(
                        &spec.name,
                        spec.partitions,
                        TopicReplication::Fixed(spec.replication_factor),
                    ),
                    |topic, (key, value)| topic.set(key, value),
                )
            })
            .collect();

        let results = self
            .admin_client
            .create_topics(&new_topics, &self.admin_options())
            .await
            .map_err(|e| Error::from_kafka(e, "create_topics"))?;

        let outcomes = results
            .into_iter()
            .map(|result| match result {
                Ok(topic) => {
                    info!("Successfully created topic: {}", topic);
                    (topic, Ok(CreateOutcome::Created))
                }
                Err((topic, code)) => match Error::from_admin_code(code, &topic) {
                    Error::AlreadyExists(_) => {
                        info!("Topic '{}' already exists", topic);
                        (topic, Ok(CreateOutcome::AlreadyExists))
                    }
                    err => {
                        warn!("Failed to create topic '{}': {}", topic, err);
                        (topic, Err(err))
                    }
                },
            })
            .collect();

        Ok(outcomes)
    }

    #[instrument(skip(self))]
    async fn delete_topic(&self, name: &str) -> Result<DeleteOutcome> {
        let results = self
            .admin_client
            .delete_topics(&[name], &self.admin_options())
            .await
            .map_err(|e| Error::from_kafka(e, name))?;

        for result in results {
            match result {
                Ok(topic) => {
                    info!("Deletion of topic '{}' accepted", topic);
                }
                Err((topic, code)) => match Error::from_admin_code(code, &topic) {
                    Error::TopicNotFound(_) => {
                        info!("Topic '{}' does not exist, nothing to delete", topic);
                        return Ok(DeleteOutcome::NotFound);
                    }
                    err => return Err(err),
                },
            }
        }

        Ok(DeleteOutcome::Deleted)
    }
}
