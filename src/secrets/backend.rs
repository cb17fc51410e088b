use crate::config::ExportConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Secret manifest to render: one secret, one namespace, and the local files
/// that become its data fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRequest {
    pub secret_name: String,
    pub namespace: String,
    /// (field name in the secret, local file)
    pub files: Vec<(String, PathBuf)>,
}

/// The external systems the exporter talks to.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Returns the raw (still base64-encoded) value of one data field.
    async fn fetch_secret_field(&self, secret: &str, namespace: &str, field: &str) -> Result<String>;

    /// Whether the file parses as an X.509 certificate.
    async fn validate_certificate(&self, path: &Path) -> Result<bool>;

    /// Renders the manifest and returns it as YAML text.
    async fn generate_manifest(&self, request: &ManifestRequest) -> Result<String>;
}

/// [`SecretBackend`] that shells out to `kubectl` and `openssl`.
pub struct KubectlBackend {
    kubectl: String,
    openssl: String,
}

impl KubectlBackend {
    pub fn new(kubectl: impl Into<String>, openssl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            openssl: openssl.into(),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.kubectl, &config.openssl)
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<std::process::Output> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!("Running {}", command_line);

        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExternalCommand {
                command: command_line,
                message: e.to_string(),
            })
    }

    async fn run_checked(&self, program: &str, args: &[String]) -> Result<String> {
        let output = self.run(program, args).await?;

        if !output.status.success() {
            return Err(Error::ExternalCommand {
                command: format!("{} {}", program, args.join(" ")),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// JSONPath expression selecting a data field; dots inside the key are
/// escaped so `ca.crt` is one key, not a path.
pub fn jsonpath_for_field(field: &str) -> String {
    format!("jsonpath={{.data.{}}}", field.replace('.', "\\."))
}

#[async_trait]
impl SecretBackend for KubectlBackend {
    async fn fetch_secret_field(&self, secret: &str, namespace: &str, field: &str) -> Result<String> {
        let args = vec![
            "get".to_string(),
            "secret".to_string(),
            secret.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            jsonpath_for_field(field),
        ];

        let stdout = self.run_checked(&self.kubectl, &args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn validate_certificate(&self, path: &Path) -> Result<bool> {
        let args = vec![
            "x509".to_string(),
            "-in".to_string(),
            path.to_string_lossy().into_owned(),
            "-noout".to_string(),
            "-text".to_string(),
        ];

        let output = self.run(&self.openssl, &args).await?;
        Ok(output.status.success())
    }

    async fn generate_manifest(&self, request: &ManifestRequest) -> Result<String> {
        let mut args = vec![
            "create".to_string(),
            "secret".to_string(),
            "generic".to_string(),
            request.secret_name.clone(),
        ];
        for (field, path) in &request.files {
            args.push(format!("--from-file={}={}", field, path.display()));
        }
        args.extend([
            format!("--namespace={}", request.namespace),
            "--dry-run=client".to_string(),
            "-o".to_string(),
            "yaml".to_string(),
        ]);

        self.run_checked(&self.kubectl, &args).await
    }
}
