//! Export of TLS material from cluster secrets to local files.

pub mod backend;
pub mod decode;
pub mod exporter;

pub use backend::{KubectlBackend, ManifestRequest, SecretBackend};
pub use decode::{decode_secret, DecodeError, Decoded};
pub use exporter::{ArtifactKind, ArtifactOutcome, ArtifactStatus, ExportSummary, SecretExporter};
