//! Error types and result handling for kafka-smoke.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_smoke::{Error, Result};
//!
//! fn lookup(topic: &str) -> Result<()> {
//!     Err(Error::TopicNotFound(topic.to_string()))
//! }
//!
//! match lookup("orders") {
//!     Ok(()) => println!("found"),
//!     Err(Error::TopicNotFound(name)) => eprintln!("no such topic: {}", name),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for kafka-smoke operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, from the config file, environment or validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required TLS credential file does not exist.
    #[error("Credential missing: {name} not found at {path:?}")]
    CredentialMissing {
        /// Logical name of the credential (ca_cert, client_cert, client_key)
        name: &'static str,
        /// Path that was checked
        path: PathBuf,
    },

    /// A TLS credential file exists but cannot be used.
    #[error("Credential invalid: {path:?}: {reason}")]
    CredentialInvalid {
        /// Path of the offending file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// No broker could be reached.
    #[error("Connection error: {0}")]
    ConnectionFailure(String),

    /// Operation exceeded its request timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// The named topic does not exist in the cluster.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// The named topic already exists. Callers treat this as success.
    #[error("Topic already exists: {0}")]
    AlreadyExists(String),

    /// Secret material could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] crate::secrets::DecodeError),

    /// An external program (kubectl, openssl) failed.
    #[error("External command `{command}` failed: {message}")]
    ExternalCommand {
        /// Program and arguments that were run
        command: String,
        /// Exit status and stderr summary
        message: String,
    },

    /// Kafka client error that has no more specific classification.
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// JSON serialization error when building payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from exported artifact writes.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classifies a librdkafka error into the crate taxonomy.
    ///
    /// `subject` names the topic or operation the error relates to and ends up
    /// in the message of the classified variant.
    pub fn from_kafka(err: KafkaError, subject: &str) -> Self {
        match err.rdkafka_error_code() {
            Some(code) => Self::from_code(code, subject).unwrap_or(Error::Kafka(err)),
            None => Error::Kafka(err),
        }
    }

    /// Classifies a per-topic admin result code.
    pub fn from_admin_code(code: RDKafkaErrorCode, subject: &str) -> Self {
        Self::from_code(code, subject)
            .unwrap_or(Error::Kafka(KafkaError::AdminOp(code)))
    }

    fn from_code(code: RDKafkaErrorCode, subject: &str) -> Option<Self> {
        use RDKafkaErrorCode::*;

        match code {
            OperationTimedOut | RequestTimedOut | MessageTimedOut => Some(Error::Timeout {
                message: format!("{}: {}", subject, code),
            }),
            BrokerTransportFailure | AllBrokersDown | Resolve | NetworkException => {
                Some(Error::ConnectionFailure(format!("{}: {}", subject, code)))
            }
            UnknownTopicOrPartition | UnknownTopic => {
                Some(Error::TopicNotFound(subject.to_string()))
            }
            TopicAlreadyExists => Some(Error::AlreadyExists(subject.to_string())),
            _ => None,
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Error::ConnectionFailure(_))
    }
}

/// A convenient Result type alias for kafka-smoke operations.
pub type Result<T> = std::result::Result<T, Error>;
