use crate::config::{ClusterConfig, ConsumerConfig, ProducerConfig};
use crate::tls::TlsContext;
use rdkafka::ClientConfig;

/// Builds the settings every client shares so that admin, producer and
/// consumer connect to the cluster identically.
pub fn base_client_config(
    cluster: &ClusterConfig,
    tls: Option<&TlsContext>,
    client_suffix: &str,
) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", cluster.bootstrap_servers())
        .set("client.id", format!("{}-{}", cluster.client_id, client_suffix))
        .set("socket.timeout.ms", cluster.request_timeout_ms.to_string())
        .set("retry.backoff.ms", cluster.retry_backoff_ms.to_string())
        .set("reconnect.backoff.max.ms", cluster.reconnect_backoff_max_ms.to_string())
        .set("metadata.max.age.ms", cluster.metadata_max_age_ms.to_string());

    match tls {
        Some(context) => context.apply(&mut config),
        None => {
            config.set("security.protocol", "plaintext");
        }
    }

    config
}

pub fn producer_client_config(
    cluster: &ClusterConfig,
    tls: Option<&TlsContext>,
    producer: &ProducerConfig,
) -> ClientConfig {
    let mut config = base_client_config(cluster, tls, "producer");
    config
        .set("acks", &producer.acks)
        .set("request.timeout.ms", cluster.request_timeout_ms.to_string())
        .set("message.timeout.ms", producer.delivery_timeout_ms.to_string())
        .set("retries", producer.retries.to_string())
        .set(
            "max.in.flight.requests.per.connection",
            producer.max_in_flight.to_string(),
        );
    config
}

pub fn consumer_client_config(
    cluster: &ClusterConfig,
    tls: Option<&TlsContext>,
    consumer: &ConsumerConfig,
) -> ClientConfig {
    let mut config = base_client_config(cluster, tls, "consumer");
    config
        .set("group.id", &consumer.group_id)
        .set("auto.offset.reset", consumer.auto_offset_reset.as_str())
        .set("enable.auto.commit", consumer.enable_auto_commit.to_string())
        .set("session.timeout.ms", consumer.session_timeout_ms.to_string())
        .set("heartbeat.interval.ms", consumer.heartbeat_interval_ms.to_string())
        .set("max.poll.interval.ms", consumer.max_poll_interval_ms.to_string())
        .set("max.partition.fetch.bytes", consumer.max_partition_fetch_bytes.to_string())
        .set("fetch.max.bytes", consumer.fetch_max_bytes.to_string())
        .set("fetch.wait.max.ms", consumer.fetch_max_wait_ms.to_string());
    config
}
