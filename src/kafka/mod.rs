pub mod admin;
pub mod client;
pub mod consumer;
pub mod producer;


pub use admin::{
    is_internal_topic, ClusterAdmin, CreateOutcome, DeleteOutcome, TopicAdmin, TopicDescription,
    TopicSpec,
};
pub use consumer::{ConsumedRecord, MessageConsumer};
pub use producer::{Delivery, MessageProducer, ProduceReport};
