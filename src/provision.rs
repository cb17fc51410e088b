//! Idempotent "ensure these topics exist" on top of [`TopicAdmin`].
//!
//! Only the missing part of the required set is created. Topics outside the
//! required set are never touched, and existing topics are never altered.

use crate::config::{TestTopicConfig, TopicsConfig};
use crate::kafka::{CreateOutcome, TopicAdmin, TopicDescription, TopicSpec};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Partition count, replication factor and configs applied to every topic
/// the provisioner creates.
#[derive(Debug, Clone)]
pub struct TopicTemplate {
    pub partitions: i32,
    pub replication_factor: i32,
    pub configs: BTreeMap<String, String>,
}

impl TopicTemplate {
    pub fn spec_for(&self, name: &str) -> TopicSpec {
        TopicSpec {
            name: name.to_string(),
            partitions: self.partitions,
            replication_factor: self.replication_factor,
            configs: self.configs.clone(),
        }
    }

    /// Describes how `existing` differs from this template, if at all.
    pub fn drift(&self, existing: &TopicDescription) -> Option<String> {
        let mut differences = Vec::new();

        if existing.partitions as i64 != self.partitions as i64 {
            differences.push(format!(
                "partitions {} (wanted {})",
                existing.partitions, self.partitions
            ));
        }

        if existing.replication_factor as i64 != self.replication_factor as i64 {
            differences.push(format!(
                "replication factor {} (wanted {})",
                existing.replication_factor, self.replication_factor
            ));
        }

        if differences.is_empty() {
            None
        } else {
            Some(differences.join(", "))
        }
    }
}

impl From<&TopicsConfig> for TopicTemplate {
    fn from(config: &TopicsConfig) -> Self {
        Self {
            partitions: config.partitions,
            replication_factor: config.replication_factor,
            configs: config.configs.clone(),
        }
    }
}

impl From<&TestTopicConfig> for TopicTemplate {
    fn from(config: &TestTopicConfig) -> Self {
        Self {
            partitions: config.partitions,
            replication_factor: config.replication_factor,
            configs: config.configs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicStatus {
    /// Present before this run. `drift` is set when its shape differs from
    /// the template; drift is reported, not corrected.
    AlreadyPresent { drift: Option<String> },
    Created,
    CreateFailed(String),
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicStatus::AlreadyPresent { drift: None } => write!(f, "already present"),
            TopicStatus::AlreadyPresent { drift: Some(d) } => {
                write!(f, "already present, config differs: {}", d)
            }
            TopicStatus::Created => write!(f, "created"),
            TopicStatus::CreateFailed(reason) => write!(f, "create failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    pub topics: BTreeMap<String, TopicStatus>,
}

impl ProvisionReport {
    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.with_status(|s| matches!(s, TopicStatus::Created))
    }

    pub fn already_present(&self) -> impl Iterator<Item = &str> {
        self.with_status(|s| matches!(s, TopicStatus::AlreadyPresent { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.with_status(|s| matches!(s, TopicStatus::CreateFailed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    fn with_status<P>(&self, predicate: P) -> impl Iterator<Item = &str>
    where
        P: Fn(&TopicStatus) -> bool,
    {
        self.topics
            .iter()
            .filter(move |(_, status)| predicate(status))
            .map(|(name, _)| name.as_str())
    }
}

/// Creates `required − existing` in one batched request.
///
/// A topic that appears between listing and creating (another provisioner
/// racing this one) is reported as already present. Listing failures are
/// returned; per-topic creation failures are recorded in the report.
pub async fn ensure_topics<A>(
    admin: &A,
    required: &BTreeSet<String>,
    template: &TopicTemplate,
) -> Result<ProvisionReport>
where
    A: TopicAdmin + ?Sized,
{
    let existing = admin.list_topics().await?;
    let mut report = ProvisionReport::default();

    for name in required.intersection(&existing) {
        info!("Topic '{}' already exists", name);
        let drift = check_drift(admin, name, template).await;
        report
            .topics
            .insert(name.clone(), TopicStatus::AlreadyPresent { drift });
    }

    let missing: Vec<TopicSpec> = required
        .difference(&existing)
        .map(|name| template.spec_for(name))
        .collect();

    if missing.is_empty() {
        info!("All {} required topic(s) already exist", required.len());
        return Ok(report);
    }

    info!(
        "Creating missing topics: {:?}",
        missing.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
    );

    match admin.create_topics(&missing).await {
        Ok(results) => {
            for (name, result) in results {
                let status = match result {
                    Ok(CreateOutcome::Created) => TopicStatus::Created,
                    Ok(CreateOutcome::AlreadyExists) => {
                        let drift = check_drift(admin, &name, template).await;
                        TopicStatus::AlreadyPresent { drift }
                    }
                    Err(e) => TopicStatus::CreateFailed(e.to_string()),
                };
                report.topics.insert(name, status);
            }
        }
        Err(e) => {
            warn!("Batch topic creation failed: {}", e);
            for spec in &missing {
                report
                    .topics
                    .insert(spec.name.clone(), TopicStatus::CreateFailed(e.to_string()));
            }
        }
    }

    // A result the broker never answered for still needs a verdict.
    for spec in &missing {
        report
            .topics
            .entry(spec.name.clone())
            .or_insert_with(|| TopicStatus::CreateFailed("no result returned".to_string()));
    }

    Ok(report)
}

/// Makes sure the single topic a producer or consumer is about to use exists.
///
/// An existing topic is left as it is; its configuration is logged so a
/// mismatch with `spec` is visible. Failing to read that configuration is
/// only a warning. Any other failure is returned.
pub async fn prepare_topic<A>(admin: &A, spec: &TopicSpec) -> Result<CreateOutcome>
where
    A: TopicAdmin + ?Sized,
{
    let outcome = admin.create_topic(spec).await?;

    match outcome {
        CreateOutcome::Created => info!(
            "Topic '{}' created with {} partition(s), replication factor {}",
            spec.name, spec.partitions, spec.replication_factor
        ),
        CreateOutcome::AlreadyExists => match admin.describe_topic_config(&spec.name).await {
            Ok(configs) => info!("Topic '{}' already exists, configuration: {:?}", spec.name, configs),
            Err(e) => warn!("Failed to fetch configuration of topic '{}': {}", spec.name, e),
        },
    }

    Ok(outcome)
}

async fn check_drift<A>(admin: &A, name: &str, template: &TopicTemplate) -> Option<String>
where
    A: TopicAdmin + ?Sized,
{
    match admin.describe_topic(name).await {
        Ok(description) => {
            let drift = template.drift(&description);
            if let Some(ref d) = drift {
                warn!("Topic '{}' exists with different configuration: {}", name, d);
            }
            drift
        }
        Err(e) => {
            debug!("Could not describe topic '{}': {}", name, e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use crate::kafka::{CreateOutcome, DeleteOutcome, TopicAdmin, TopicDescription, TopicSpec};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory cluster for exercising provisioning logic.
    #[derive(Default)]
    pub struct FakeAdmin {
        pub topics: Mutex<BTreeMap<String, TopicDescription>>,
        pub create_requests: AtomicUsize,
        pub created: Mutex<Vec<String>>,
        /// Topics another client "creates" between list and create.
        pub racing: Mutex<BTreeSet<String>>,
        /// Topics the broker rejects.
        pub rejected: BTreeSet<String>,
        pub unreachable: bool,
        /// Every spec passed to `create_topics`, in order.
        pub requested: Mutex<Vec<TopicSpec>>,
        pub config_lookups: AtomicUsize,
        pub configs_unavailable: bool,
    }

    impl FakeAdmin {
        pub fn with_topics(names: &[&str]) -> Self {
            let admin = Self::default();
            {
                let mut topics = admin.topics.lock().unwrap();
                for name in names {
                    topics.insert(
                        name.to_string(),
                        TopicDescription {
                            partitions: 6,
                            replication_factor: 1,
                        },
                    );
                }
            }
            admin
        }

        pub fn create_requests(&self) -> usize {
            self.create_requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TopicAdmin for FakeAdmin {
        async fn list_topics(&self) -> Result<BTreeSet<String>> {
            if self.unreachable {
                return Err(Error::Timeout {
                    message: "list_topics".to_string(),
                });
            }
            Ok(self.topics.lock().unwrap().keys().cloned().collect())
        }

        async fn describe_topic(&self, name: &str) -> Result<TopicDescription> {
            self.topics
                .lock()
                .unwrap()
                .get(name)
                .copied()
                .ok_or_else(|| Error::TopicNotFound(name.to_string()))
        }

        async fn describe_topic_config(&self, name: &str) -> Result<BTreeMap<String, String>> {
            self.config_lookups.fetch_add(1, Ordering::SeqCst);
            if self.configs_unavailable {
                return Err(Error::ConnectionFailure("describe_configs".to_string()));
            }
            self.describe_topic(name).await?;
            Ok(BTreeMap::from([(
                "cleanup.policy".to_string(),
                "delete".to_string(),
            )]))
        }

        async fn create_topics(
            &self,
            specs: &[TopicSpec],
        ) -> Result<Vec<(String, Result<CreateOutcome>)>> {
            self.create_requests.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().extend_from_slice(specs);
            let mut topics = self.topics.lock().unwrap();
            let mut racing = self.racing.lock().unwrap();

            for name in racing.iter() {
                topics.insert(
                    name.clone(),
                    TopicDescription {
                        partitions: 1,
                        replication_factor: 1,
                    },
                );
            }
            racing.clear();

            let mut results = Vec::new();
            for spec in specs {
                let result = if self.rejected.contains(&spec.name) {
                    Err(Error::Config("policy violation".to_string()))
                } else if topics.contains_key(&spec.name) {
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    topics.insert(
                        spec.name.clone(),
                        TopicDescription {
                            partitions: spec.partitions as usize,
                            replication_factor: spec.replication_factor as usize,
                        },
                    );
                    self.created.lock().unwrap().push(spec.name.clone());
                    Ok(CreateOutcome::Created)
                };
                results.push((spec.name.clone(), result));
            }
            Ok(results)
        }

        async fn delete_topic(&self, name: &str) -> Result<DeleteOutcome> {
            match self.topics.lock().unwrap().remove(name) {
                Some(_) => Ok(DeleteOutcome::Deleted),
                None => Ok(DeleteOutcome::NotFound),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAdmin;
    use super::*;

    fn template() -> TopicTemplate {
        TopicTemplate {
            partitions: 6,
            replication_factor: 1,
            configs: BTreeMap::new(),
        }
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_creates_both_on_empty_cluster_then_nothing() {
        let admin = FakeAdmin::default();
        let required = names(&["x", "y"]);

        let first = ensure_topics(&admin, &required, &template()).await.unwrap();
        assert_eq!(first.created().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(admin.create_requests(), 1);

        let second = ensure_topics(&admin, &required, &template()).await.unwrap();
        assert_eq!(second.already_present().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(second.created().count(), 0);
        assert_eq!(admin.create_requests(), 1);
    }

    #[tokio::test]
    async fn test_creates_exactly_the_difference() {
        let admin = FakeAdmin::with_topics(&["a", "b", "unrelated"]);
        let required = names(&["a", "c", "d"]);

        let report = ensure_topics(&admin, &required, &template()).await.unwrap();

        assert_eq!(*admin.created.lock().unwrap(), vec!["c".to_string(), "d".to_string()]);
        assert_eq!(report.topics["a"], TopicStatus::AlreadyPresent { drift: None });
        assert_eq!(report.topics["c"], TopicStatus::Created);
        assert!(!report.topics.contains_key("unrelated"));
        assert!(admin.topics.lock().unwrap().contains_key("unrelated"));
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_race_is_reported_as_present() {
        let admin = FakeAdmin::default();
        admin.racing.lock().unwrap().insert("x".to_string());

        let report = ensure_topics(&admin, &names(&["x", "y"]), &template())
            .await
            .unwrap();

        // The racer created "x" with one partition, so drift is flagged
        match &report.topics["x"] {
            TopicStatus::AlreadyPresent { drift: Some(d) } => assert!(d.contains("partitions 1")),
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(report.topics["y"], TopicStatus::Created);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failure_is_per_topic() {
        let admin = FakeAdmin {
            rejected: names(&["bad"]),
            ..FakeAdmin::default()
        };

        let report = ensure_topics(&admin, &names(&["bad", "good"]), &template())
            .await
            .unwrap();

        assert!(matches!(report.topics["bad"], TopicStatus::CreateFailed(_)));
        assert_eq!(report.topics["good"], TopicStatus::Created);
        assert_eq!(report.failed().collect::<Vec<_>>(), vec!["bad"]);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let admin = FakeAdmin {
            unreachable: true,
            ..FakeAdmin::default()
        };

        let result = ensure_topics(&admin, &names(&["x"]), &template()).await;
        assert!(matches!(result, Err(crate::Error::Timeout { .. })));
        assert_eq!(admin.create_requests(), 0);
    }

    #[tokio::test]
    async fn test_existing_topic_drift_is_flagged_not_changed() {
        let admin = FakeAdmin::with_topics(&["x"]);
        let wanted = TopicTemplate {
            partitions: 3,
            ..template()
        };

        let report = ensure_topics(&admin, &names(&["x"]), &wanted).await.unwrap();

        match &report.topics["x"] {
            TopicStatus::AlreadyPresent { drift: Some(d) } => {
                assert_eq!(d, "partitions 6 (wanted 3)")
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(admin.topics.lock().unwrap()["x"].partitions, 6);
    }

    fn test_topic_spec(name: &str) -> TopicSpec {
        TopicTemplate::from(&TestTopicConfig::default()).spec_for(name)
    }

    #[tokio::test]
    async fn test_prepare_topic_creates_missing_test_topic() {
        let admin = FakeAdmin::default();

        let outcome = prepare_topic(&admin, &test_topic_spec("smoke_test")).await.unwrap();

        assert_eq!(outcome, CreateOutcome::Created);
        let requested = admin.requested.lock().unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].partitions, 1);
        assert_eq!(requested[0].replication_factor, 1);
        assert_eq!(requested[0].configs["min.insync.replicas"], "1");
        assert_eq!(requested[0].configs["unclean.leader.election.enable"], "true");
        assert_eq!(admin.config_lookups.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prepare_topic_reports_existing_configuration() {
        let admin = FakeAdmin::with_topics(&["smoke_test"]);

        let outcome = prepare_topic(&admin, &test_topic_spec("smoke_test")).await.unwrap();

        assert_eq!(outcome, CreateOutcome::AlreadyExists);
        assert_eq!(admin.config_lookups.load(std::sync::atomic::Ordering::SeqCst), 1);
        // Left untouched
        assert_eq!(admin.topics.lock().unwrap()["smoke_test"].partitions, 6);
    }

    #[tokio::test]
    async fn test_prepare_topic_tolerates_unreadable_configuration() {
        let admin = FakeAdmin {
            configs_unavailable: true,
            ..FakeAdmin::with_topics(&["smoke_test"])
        };

        let outcome = prepare_topic(&admin, &test_topic_spec("smoke_test")).await.unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_prepare_topic_returns_creation_failure() {
        let admin = FakeAdmin {
            rejected: names(&["smoke_test"]),
            ..FakeAdmin::default()
        };

        let result = prepare_topic(&admin, &test_topic_spec("smoke_test")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_template_from_config() {
        let config = TopicsConfig::default();
        let template = TopicTemplate::from(&config);
        let spec = template.spec_for("otcol_logs");

        assert_eq!(spec.partitions, 6);
        assert_eq!(spec.replication_factor, 1);
    }
}
