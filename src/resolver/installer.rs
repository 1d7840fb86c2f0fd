use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::AuditError;

/// Bundled isolated-install script.
pub const BUNDLED_SCRIPT: &str = include_str!("../../scripts/generate_license_csvs.sh");

/// Before/after CSV snapshots. The files live as long as this value.
#[derive(Debug)]
pub struct Snapshots {
    pub before: PathBuf,
    pub after: PathBuf,
    _workdir: TempDir,
}

impl Snapshots {
    pub fn new(before: PathBuf, after: PathBuf, workdir: TempDir) -> Self {
        Self {
            before,
            after,
            _workdir: workdir,
        }
    }
}

/// Installs a requirements file into a disposable environment and captures
/// what was installed.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn snapshot(&self, app_root: &Path, requirements_file: &Path) -> Result<Snapshots>;
}

/// [`Installer`] that runs the snapshot script under `bash`.
#[derive(Debug, Clone, Default)]
pub struct IsolatedInstaller {
    script: Option<PathBuf>,
}

impl IsolatedInstaller {
    /// Use `script` instead of the bundled one when given.
    pub fn new(script: Option<PathBuf>) -> Self {
        Self { script }
    }
}

/// `<app-root name>_<requirements path with / replaced by _>`.
pub fn app_name(app_root: &Path, requirements_file: &Path) -> String {
    let root_name = app_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    format!(
        "{}_{}",
        root_name,
        requirements_file.to_string_lossy().replace('/', "_")
    )
}

#[async_trait]
impl Installer for IsolatedInstaller {
    async fn snapshot(&self, app_root: &Path, requirements_file: &Path) -> Result<Snapshots> {
        let workdir = tempfile::tempdir().context("Failed to create a temporary directory")?;

        let script = match &self.script {
            Some(path) => path.clone(),
            None => {
                let path = workdir.path().join("generate_license_csvs.sh");
                std::fs::write(&path, BUNDLED_SCRIPT)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                path
            }
        };

        let app_root = std::fs::canonicalize(app_root)
            .with_context(|| format!("Failed to resolve {}", app_root.display()))?;
        let name = app_name(&app_root, requirements_file);
        info!(
            "Installing {} into an isolated environment",
            app_root.join(requirements_file).display()
        );

        let output = tokio::process::Command::new("bash")
            .arg(&script)
            .arg(&name)
            .arg(&app_root)
            .arg(requirements_file)
            .arg(workdir.path())
            .output()
            .await
            .context("Failed to run bash")?;

        if !output.status.success() {
            debug!(
                "Install script stderr:\n{}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(AuditError::InstallFailed {
                path: app_root.join(requirements_file),
                details: output.status.to_string(),
            }
            .into());
        }

        let before = workdir.path().join(format!("{}-before.csv", name));
        let after = workdir.path().join(format!("{}-after.csv", name));
        Ok(Snapshots::new(before, after, workdir))
    }
}
