use crate::config::{ClusterConfig, ProducerConfig};
use crate::kafka::client::producer_client_config;
use crate::tls::TlsContext;
use crate::{Error, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Where an acknowledged message landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Default)]
pub struct ProduceReport {
    pub sent: u32,
    pub failed: u32,
    pub deliveries: Vec<Delivery>,
    pub interrupted: bool,
}

/// Sends one message at a time and waits for its acknowledgement before the
/// next; nothing is pipelined.
pub struct MessageProducer {
    producer: FutureProducer,
    delivery_timeout: Duration,
    flush_timeout: Duration,
}

impl MessageProducer {
    pub fn new(
        cluster: &ClusterConfig,
        tls: Option<&TlsContext>,
        config: &ProducerConfig,
    ) -> Result<Self> {
        let producer: FutureProducer = producer_client_config(cluster, tls, config)
            .create()
            .map_err(Error::Kafka)?;

        info!("Connected producer to brokers: {}", cluster.bootstrap_servers());

        Ok(Self {
            producer,
            delivery_timeout: config.delivery_timeout(),
            flush_timeout: cluster.request_timeout(),
        })
    }

    pub async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<Delivery> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(e, _)| Error::from_kafka(e, topic))?;

        Ok(Delivery {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    /// Sends `"{prefix} {i}"` for `i` in `0..count`, pausing `interval` between
    /// messages. A failed delivery is logged and the loop moves on; `shutdown`
    /// resolving stops the loop early. Pending messages are flushed before
    /// returning in every case.
    #[instrument(skip(self, prefix, shutdown))]
    pub async fn send_test_messages<F>(
        &self,
        topic: &str,
        count: u32,
        prefix: &str,
        interval: Duration,
        shutdown: F,
    ) -> ProduceReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut report = ProduceReport::default();

        for i in 0..count {
            let message = format!("{} {}", prefix, i);

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Producer interrupted after {} message(s)", i);
                    report.interrupted = true;
                    break;
                }
                result = self.send(topic, None, message.as_bytes()) => match result {
                    Ok(delivery) => {
                        info!(
                            partition = delivery.partition,
                            offset = delivery.offset,
                            "Message {} sent: {}",
                            i,
                            message
                        );
                        report.sent += 1;
                        report.deliveries.push(delivery);
                    }
                    Err(e) => {
                        error!("Message {} failed: {}", i, e);
                        report.failed += 1;
                    }
                }
            }

            if i + 1 < count && !interval.is_zero() {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Producer interrupted after {} message(s)", i + 1);
                        report.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        if let Err(e) = self.flush() {
            warn!("Flush after test messages failed: {}", e);
        }

        info!(sent = report.sent, failed = report.failed, "Finished sending test messages");
        report
    }

    pub fn flush(&self) -> Result<()> {
        self.producer
            .flush(Timeout::After(self.flush_timeout))
            .map_err(|e| Error::from_kafka(e, "flush"))
    }

    /// Flushes outstanding messages and releases the connection.
    pub fn close(self) -> Result<()> {
        let result = self.flush();
        drop(self.producer);
        info!("Producer closed");
        result
    }
}
