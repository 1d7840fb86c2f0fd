use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::license::policy::Policy;
use crate::models::{Package, PipResolution};

use super::installer::Installer;
use super::marker::{self, MarkerEnvironment};
use super::requirement::{normalize_name, RequirementSpec};

/// One `Name,Version,License` row of an environment snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub name: String,
    pub version: String,
    pub license: String,
}

/// Read a snapshot CSV. The first row is a header; columns are positional.
pub fn read_snapshot(path: &Path) -> Result<Vec<SnapshotRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open snapshot {}", path.display()))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed snapshot {}", path.display()))?;
        let field = |i: usize| record.get(i).unwrap_or_default().trim().to_string();
        let row = SnapshotRow {
            name: field(0),
            version: field(1),
            license: field(2),
        };
        if !row.name.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Rows present after install that were not present before.
pub fn newly_installed(before: &[SnapshotRow], after: &[SnapshotRow]) -> Vec<SnapshotRow> {
    after
        .iter()
        .filter(|row| !before.contains(row))
        .cloned()
        .collect()
}

/// Requirements whose environment marker holds. Markers that cannot be
/// evaluated keep their requirement.
pub fn filter_by_marker<'a>(
    requirements: &'a [RequirementSpec],
    env: &MarkerEnvironment,
) -> Vec<&'a RequirementSpec> {
    requirements
        .iter()
        .filter(|req| match req.marker.as_deref() {
            None => true,
            Some(m) => match marker::evaluate(m, env) {
                Ok(applies) => {
                    if !applies {
                        debug!("Requirement {} does not apply here ({})", req.name, m);
                    }
                    applies
                }
                Err(e) => {
                    warn!(
                        "Could not evaluate marker `{}` for {}: {:#}. Keeping the requirement.",
                        m, req.name, e
                    );
                    true
                }
            },
        })
        .collect()
}

/// Split installed rows into direct and transitive packages, each sorted by
/// lowercase name.
pub fn split_direct_transitive(
    installed: &[SnapshotRow],
    requirements: &[RequirementSpec],
    env: &MarkerEnvironment,
    policy: &Policy,
) -> PipResolution {
    let requested: HashMap<String, &RequirementSpec> = filter_by_marker(requirements, env)
        .into_iter()
        .map(|r| (r.key(), r))
        .collect();

    let mut resolution = PipResolution::default();
    for row in installed {
        match requested.get(&normalize_name(&row.name)) {
            Some(spec) => resolution.direct.push(Package::python(
                &row.name,
                &row.version,
                &row.license,
                spec.url.clone(),
                true,
                policy,
            )),
            None => resolution.transitive.push(Package::python(
                &row.name,
                &row.version,
                &row.license,
                None,
                false,
                policy,
            )),
        }
    }

    resolution.direct.sort_by_key(|p| p.name.to_lowercase());
    resolution.transitive.sort_by_key(|p| p.name.to_lowercase());
    resolution
}

/// Resolve from an existing before/after snapshot pair.
pub fn pip_from_csv(
    before: &Path,
    after: &Path,
    requirements: &[RequirementSpec],
    env: &MarkerEnvironment,
    policy: &Policy,
) -> Result<PipResolution> {
    let before = read_snapshot(before)?;
    let after = read_snapshot(after)?;
    let installed = newly_installed(&before, &after);
    Ok(split_direct_transitive(&installed, requirements, env, policy))
}

/// Resolve by installing `requirements_file` (relative to `app_root`) into a
/// disposable environment. Failures are logged and yield an empty result.
pub async fn pip_from_repo(
    installer: &dyn Installer,
    app_root: &Path,
    requirements_file: &Path,
    requirements: &[RequirementSpec],
    env: &MarkerEnvironment,
    policy: &Policy,
) -> PipResolution {
    let snapshots = match installer.snapshot(app_root, requirements_file).await {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!(
                "Failed extracting licenses for file {}: {:#}",
                requirements_file.display(),
                e
            );
            return PipResolution::default();
        }
    };

    match pip_from_csv(&snapshots.before, &snapshots.after, requirements, env, policy) {
        Ok(resolution) => resolution,
        Err(e) => {
            warn!(
                "Failed reading install snapshots for {}: {:#}",
                requirements_file.display(),
                e
            );
            PipResolution::default()
        }
    }
}
