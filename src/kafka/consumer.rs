use crate::config::{ClusterConfig, ConsumerConfig};
use crate::kafka::client::consumer_client_config;
use crate::tls::TlsContext;
use crate::{Error, Result};
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info};

/// An owned copy of one consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: String,
}

impl ConsumedRecord {
    fn from_message(message: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            value: message
                .payload()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Group consumer that starts at the configured reset position and commits
/// offsets in the background. Delivery is at-least-once: records handled
/// after the last automatic commit are redelivered after a crash.
pub struct MessageConsumer {
    consumer: StreamConsumer,
    poll_timeout: Duration,
}

impl MessageConsumer {
    pub fn new(
        cluster: &ClusterConfig,
        tls: Option<&TlsContext>,
        config: &ConsumerConfig,
    ) -> Result<Self> {
        let consumer: StreamConsumer = consumer_client_config(cluster, tls, config)
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            consumer,
            poll_timeout: config.poll_timeout(),
        })
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.consumer.subscribe(topics).map_err(Error::Kafka)?;
        info!("Subscribed to {:?}", topics);
        Ok(())
    }

    /// Waits at most one poll interval. `Ok(None)` means nothing arrived.
    pub async fn next_record(&self) -> Result<Option<ConsumedRecord>> {
        let mut stream = self.consumer.stream();

        match timeout(self.poll_timeout, stream.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(Error::ConnectionFailure("consumer stream ended".to_string())),
            Ok(Some(Ok(message))) => Ok(Some(ConsumedRecord::from_message(&message))),
            Ok(Some(Err(e))) => Err(Error::from_kafka(e, "poll")),
        }
    }

    /// Logs every record until `shutdown` resolves or polling fails. The
    /// subscription is released on both paths; a polling fault is returned
    /// after release. Returns the number of records seen.
    pub async fn run<F>(self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut count = 0u64;

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Consumption stopped by user");
                    break Ok(count);
                }
                result = self.next_record() => match result {
                    Ok(Some(record)) => {
                        count += 1;
                        info!(
                            topic = %record.topic,
                            partition = record.partition,
                            offset = record.offset,
                            key = ?record.key,
                            "Received: {}",
                            record.value
                        );
                    }
                    Ok(None) => debug!("No records within {:?}", self.poll_timeout),
                    Err(e) => {
                        error!("Error while consuming: {}", e);
                        break Err(e);
                    }
                }
            }
        };

        self.close();
        outcome
    }

    /// Polls until `limit` records have arrived or `deadline` has elapsed.
    pub async fn collect(&self, limit: usize, deadline: Duration) -> Result<Vec<ConsumedRecord>> {
        let start = Instant::now();
        let mut records = Vec::with_capacity(limit);

        while records.len() < limit && start.elapsed() < deadline {
            if let Some(record) = self.next_record().await? {
                records.push(record);
            }
        }

        Ok(records)
    }

    pub fn close(self) {
        self.consumer.unsubscribe();
        drop(self.consumer);
        info!("Consumer closed");
    }
}
