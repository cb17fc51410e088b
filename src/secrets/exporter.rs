use crate::config::ExportConfig;
use crate::secrets::backend::{ManifestRequest, SecretBackend};
use crate::secrets::decode::{decode_binary, decode_secret, decode_text};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// PEM artifacts in the TLS secret. File name and secret field coincide.
pub const PEM_ARTIFACTS: &[&str] = &[
    "ca.crt",
    "client.crt",
    "client.key",
    "server.crt",
    "server.key",
    "ca.key",
];

/// Binary keystores in the keystore secret.
pub const JKS_ARTIFACTS: &[&str] = &["kafka.server.keystore.jks", "kafka.server.truststore.jks"];

/// Password fields in the keystore secret.
pub const PASSWORD_ARTIFACTS: &[&str] = &["keystore.password", "truststore.password", "key.password"];

/// Certificates checked after export.
pub const VALIDATED_CERTIFICATES: &[&str] = &["ca.crt", "client.crt", "server.crt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pem,
    Keystore,
    Password,
    Validation,
    Manifest,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtifactKind::Pem => "pem",
            ArtifactKind::Keystore => "jks",
            ArtifactKind::Password => "password",
            ArtifactKind::Validation => "validate",
            ArtifactKind::Manifest => "manifest",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub name: String,
    pub kind: ArtifactKind,
    pub status: ArtifactStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub outcomes: Vec<ArtifactOutcome>,
}

impl ExportSummary {
    fn record(&mut self, kind: ArtifactKind, name: &str, result: Result<()>) {
        let status = match result {
            Ok(()) => {
                info!("{} {} ok", kind, name);
                ArtifactStatus::Ok
            }
            Err(e) => {
                error!("{} {} failed: {}", kind, name, e);
                ArtifactStatus::Failed(e.to_string())
            }
        };
        self.outcomes.push(ArtifactOutcome {
            name: name.to_string(),
            kind,
            status,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == ArtifactStatus::Ok)
            .count()
    }

    pub fn failures(&self) -> Vec<&ArtifactOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ArtifactStatus::Failed(_)))
            .collect()
    }

    pub fn outcome(&self, kind: ArtifactKind, name: &str) -> Option<&ArtifactOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.kind == kind && o.name == name)
    }
}

/// Mirrors cluster secrets into a local `pem/` and `jks/` tree and renders a
/// client secret manifest for another namespace. Every step is best-effort:
/// a failure is recorded and the remaining steps still run.
pub struct SecretExporter<B> {
    backend: B,
    config: ExportConfig,
}

impl<B: SecretBackend> SecretExporter<B> {
    pub fn new(backend: B, config: ExportConfig) -> Self {
        Self { backend, config }
    }

    pub async fn export_all(&self) -> ExportSummary {
        let mut summary = ExportSummary::default();
        // Files written by this run; nothing older is validated or packaged
        let mut exported = BTreeSet::new();

        info!(
            namespace = %self.config.source_namespace,
            output = %self.config.output_dir.display(),
            "Exporting certificates"
        );

        for name in PEM_ARTIFACTS {
            let path = self.config.pem_dir().join(name);
            let result = self.export_pem(name, &path).await;
            settle(&path, &result, &mut exported).await;
            summary.record(ArtifactKind::Pem, name, result);
        }

        for name in JKS_ARTIFACTS {
            let path = self.config.jks_dir().join(name);
            let result = self.export_keystore(name, &path).await;
            settle(&path, &result, &mut exported).await;
            summary.record(ArtifactKind::Keystore, name, result);
        }

        for name in PASSWORD_ARTIFACTS {
            let path = self.config.jks_dir().join(name);
            let result = self.export_password(name, &path).await;
            settle(&path, &result, &mut exported).await;
            summary.record(ArtifactKind::Password, name, result);
        }

        for name in VALIDATED_CERTIFICATES {
            let result = self.validate(name, &exported).await;
            summary.record(ArtifactKind::Validation, name, result);
        }

        let manifest_path = self.config.manifest_path.clone();
        let result = self.write_manifest(&exported).await;
        settle(&manifest_path, &result, &mut exported).await;
        summary.record(
            ArtifactKind::Manifest,
            &manifest_path.display().to_string(),
            result,
        );

        let failed = summary.failures().len();
        if failed == 0 {
            info!("Export finished: {} step(s) succeeded", summary.succeeded());
        } else {
            warn!(
                "Export finished: {} succeeded, {} failed",
                summary.succeeded(),
                failed
            );
        }

        summary
    }

    async fn export_pem(&self, name: &str, path: &Path) -> Result<()> {
        let encoded = self
            .backend
            .fetch_secret_field(&self.config.tls_secret, &self.config.source_namespace, name)
            .await?;

        let decoded = decode_secret(&encoded)?;
        if !decoded.is_text() {
            warn!("{} decoded to binary data, writing raw bytes", name);
        }

        write_artifact(path, decoded.as_bytes(), is_private(name)).await
    }

    async fn export_keystore(&self, name: &str, path: &Path) -> Result<()> {
        let encoded = self
            .backend
            .fetch_secret_field(&self.config.keystore_secret, &self.config.source_namespace, name)
            .await?;

        let bytes = decode_binary(&encoded)?;
        write_artifact(path, &bytes, false).await
    }

    async fn export_password(&self, name: &str, path: &Path) -> Result<()> {
        let encoded = self
            .backend
            .fetch_secret_field(&self.config.keystore_secret, &self.config.source_namespace, name)
            .await?;

        let password = decode_text(&encoded)?;
        write_artifact(path, password.as_bytes(), true).await
    }

    async fn validate(&self, name: &str, exported: &BTreeSet<PathBuf>) -> Result<()> {
        let path = self.config.pem_dir().join(name);
        require_exported(&path, exported)?;

        if self.backend.validate_certificate(&path).await? {
            Ok(())
        } else {
            Err(Error::CredentialInvalid {
                path,
                reason: "not a valid X.509 certificate".to_string(),
            })
        }
    }

    fn manifest_request(&self) -> ManifestRequest {
        let pem_dir = self.config.pem_dir();
        ManifestRequest {
            secret_name: self.config.manifest_secret.clone(),
            namespace: self.config.target_namespace.clone(),
            files: vec![
                ("ca.crt".to_string(), pem_dir.join("ca.crt")),
                ("tls.crt".to_string(), pem_dir.join("client.crt")),
                ("tls.key".to_string(), pem_dir.join("client.key")),
            ],
        }
    }

    async fn write_manifest(&self, exported: &BTreeSet<PathBuf>) -> Result<()> {
        let request = self.manifest_request();
        for (_, path) in &request.files {
            require_exported(path, exported)?;
        }

        let yaml = self.backend.generate_manifest(&request).await?;
        write_artifact(&self.config.manifest_path, yaml.as_bytes(), false).await
    }
}

fn require_exported(path: &Path, exported: &BTreeSet<PathBuf>) -> Result<()> {
    if exported.contains(path) {
        Ok(())
    } else {
        Err(Error::CredentialInvalid {
            path: path.to_path_buf(),
            reason: "not exported in this run".to_string(),
        })
    }
}

/// Records a written artifact, or removes whatever an earlier run left at
/// `path` when this run could not produce it.
async fn settle(path: &Path, result: &Result<()>, exported: &mut BTreeSet<PathBuf>) {
    if result.is_ok() {
        exported.insert(path.to_path_buf());
        return;
    }

    match fs::remove_file(path).await {
        Ok(()) => warn!("Removed stale {} from an earlier export", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove stale {}: {}", path.display(), e),
    }
}

fn is_private(name: &str) -> bool {
    name.ends_with(".key")
}

/// Writes `contents`, creating parent directories and replacing any earlier
/// export. Private material is owner-only on Unix from the moment the file
/// is created; a file that already existed is narrowed before it is written.
async fn write_artifact(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if private {
        owner_only(&mut options);
    }

    let mut file = options.open(path).await?;
    if private {
        restrict_permissions(path).await?;
    }

    file.write_all(contents).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(unix)]
fn owner_only(options: &mut fs::OpenOptions) {
    options.mode(0o600);
}

#[cfg(not(unix))]
fn owner_only(_options: &mut fs::OpenOptions) {}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_artifacts() {
        assert!(is_private("client.key"));
        assert!(is_private("ca.key"));
        assert!(!is_private("client.crt"));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExportSummary::default();
        summary.record(ArtifactKind::Pem, "ca.crt", Ok(()));
        summary.record(
            ArtifactKind::Pem,
            "ca.key",
            Err(Error::Decode(crate::secrets::DecodeError::Empty)),
        );

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failures().len(), 1);
        assert_eq!(summary.failures()[0].name, "ca.key");
        assert!(summary.outcome(ArtifactKind::Pem, "ca.crt").is_some());
        assert!(summary.outcome(ArtifactKind::Keystore, "ca.crt").is_none());
    }

    #[tokio::test]
    async fn test_write_artifact_creates_directories() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("certs").join("pem").join("client.key");

        write_artifact(&path, b"secret", true).await.unwrap();
        write_artifact(&path, b"replaced", true).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"replaced");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_world_readable_key_is_narrowed() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("client.key");
        std::fs::write(&path, b"old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_artifact(&path, b"new", true).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_failed_artifact_removes_stale_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("client.crt");
        std::fs::write(&path, b"from an earlier run").unwrap();
        let mut exported = BTreeSet::new();

        let failed: Result<()> = Err(Error::Decode(crate::secrets::DecodeError::Empty));
        settle(&path, &failed, &mut exported).await;

        assert!(!path.exists());
        assert!(require_exported(&path, &exported).is_err());

        write_artifact(&path, b"fresh", false).await.unwrap();
        settle(&path, &Ok(()), &mut exported).await;
        assert!(require_exported(&path, &exported).is_ok());
    }
}
