use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::detector::normalize_path;
use crate::license::policy::Policy;
use crate::models::{CombinedPackages, Package, PipResolution, SourceKind};
use crate::recipe::bash::BashAnalyzer;
use crate::recipe::dockerfile::DockerfileAnalyzer;
use crate::recipe::install::resolve_copied_files;
use crate::recipe::notebook::NotebookAnalyzer;
use crate::recipe::{InstallClassifier, RecipeAnalyzer, RecipeKind};
use crate::resolver::apt::AptResolver;
use crate::resolver::installer::Installer;
use crate::resolver::marker::MarkerEnvironment;
use crate::resolver::pip::{pip_from_csv, pip_from_repo};
use crate::resolver::requirement::parse_requirements_file;

/// Resolved packages of a run, keyed by repository-relative source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResults {
    pub pip: BTreeMap<PathBuf, PipResolution>,
    pub apt: BTreeMap<PathBuf, Vec<Package>>,
    pub docker: BTreeMap<PathBuf, CombinedPackages>,
    pub bash: BTreeMap<PathBuf, CombinedPackages>,
    pub notebook: BTreeMap<PathBuf, CombinedPackages>,
}

impl ScanResults {
    /// Every resolved package with the kind and file it came from.
    pub fn packages(&self) -> Vec<(SourceKind, &Path, &Package)> {
        let mut all = Vec::new();
        for (file, resolution) in &self.pip {
            for package in resolution.direct.iter().chain(&resolution.transitive) {
                all.push((SourceKind::Pip, file.as_path(), package));
            }
        }
        for (file, packages) in &self.apt {
            all.extend(packages.iter().map(|p| (SourceKind::Apt, file.as_path(), p)));
        }
        for (kind, files) in [
            (RecipeKind::Dockerfile, &self.docker),
            (RecipeKind::Bash, &self.bash),
            (RecipeKind::Notebook, &self.notebook),
        ] {
            for (file, combined) in files {
                for package in combined.pip.direct.iter().chain(&combined.pip.transitive) {
                    all.push((kind.pip_source(), file.as_path(), package));
                }
                for package in &combined.apt {
                    all.push((kind.apt_source(), file.as_path(), package));
                }
            }
        }
        all
    }
}

/// Which files to scan. Paths are relative to `repository`.
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    pub repository: PathBuf,
    pub pip_files: Vec<PathBuf>,
    /// Before/after snapshots to use instead of installing the pip files.
    pub pip_snapshots: Option<(PathBuf, PathBuf)>,
    pub apt_files: Vec<PathBuf>,
    pub dockerfiles: Vec<PathBuf>,
    pub bash_files: Vec<PathBuf>,
    pub notebooks: Vec<PathBuf>,
    pub follow_docker: bool,
    pub follow_bash: bool,
    pub follow_notebook: bool,
}

/// Everything a scan needs, built once per run.
pub struct Auditor {
    policy: Policy,
    client: reqwest::Client,
    marker_env: MarkerEnvironment,
    installer: Box<dyn Installer>,
    apt: AptResolver,
    classifier: InstallClassifier,
}

impl Auditor {
    pub fn new(
        policy: Policy,
        client: reqwest::Client,
        marker_env: MarkerEnvironment,
        installer: Box<dyn Installer>,
        apt: AptResolver,
    ) -> Result<Self> {
        Ok(Self {
            policy,
            client,
            marker_env,
            installer,
            apt,
            classifier: InstallClassifier::new()?,
        })
    }

    /// Resolve one requirements file, from snapshots when given, otherwise by
    /// installing it in isolation.
    pub async fn pip_for_file(
        &self,
        repository: &Path,
        relative_path: &Path,
        snapshots: Option<(&Path, &Path)>,
    ) -> PipResolution {
        let requirements = parse_requirements_file(&repository.join(relative_path), &self.client).await;

        match snapshots {
            Some((before, after)) => {
                match pip_from_csv(before, after, &requirements, &self.marker_env, &self.policy) {
                    Ok(resolution) => resolution,
                    Err(e) => {
                        warn!("Failed reading snapshots for {}: {:#}", relative_path.display(), e);
                        PipResolution::default()
                    }
                }
            }
            None => {
                pip_from_repo(
                    self.installer.as_ref(),
                    repository,
                    relative_path,
                    &requirements,
                    &self.marker_env,
                    &self.policy,
                )
                .await
            }
        }
    }

    /// Resolve a file listing one system package per line. Blank lines and
    /// `#` comments are skipped.
    pub async fn apt_for_file(&self, path: &Path) -> Vec<Package> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed reading apt requirements {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        let names: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        self.apt.resolve_all(&names, &self.policy).await
    }

    /// Resolve the packages installed by one recipe file.
    ///
    /// With `find_requirements`, also returns the requirements files its
    /// install commands reference, mapped through its copy instructions and
    /// made relative to the repository.
    pub async fn recipe(
        &self,
        analyzer: &dyn RecipeAnalyzer,
        repository: &Path,
        relative_path: &Path,
        find_requirements: bool,
    ) -> (CombinedPackages, Vec<PathBuf>) {
        let recipe = match analyzer.extract_file(&repository.join(relative_path)) {
            Ok(recipe) => recipe,
            Err(e) => {
                warn!("{:#}. Skipping.", e);
                return (CombinedPackages::default(), Vec::new());
            }
        };

        let pip = self.inline_pip(&self.classifier.pip_packages(&recipe.commands)).await;
        let apt = self
            .apt
            .resolve_all(&self.classifier.apt_packages(&recipe.commands), &self.policy)
            .await;

        let discovered = if find_requirements {
            let files = self.classifier.requirement_files(&recipe.commands);
            let recipe_dir = relative_path.parent().unwrap_or_else(|| Path::new(""));
            let mut found: Vec<PathBuf> = resolve_copied_files(&files, &recipe.copies)
                .iter()
                .map(|f| normalize_path(&recipe_dir.join(f)))
                .collect();
            found.sort();
            found.dedup();
            found
        } else {
            Vec::new()
        };

        (CombinedPackages { pip, apt }, discovered)
    }

    /// Resolve packages named directly on install command lines by writing
    /// them to a throwaway requirements file.
    async fn inline_pip(&self, packages: &[String]) -> PipResolution {
        if packages.is_empty() {
            return PipResolution::default();
        }

        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Failed to create a temporary directory: {}", e);
                return PipResolution::default();
            }
        };
        let requirements_file = Path::new("requirements.txt");
        if let Err(e) = std::fs::write(dir.path().join(requirements_file), packages.join("\n")) {
            warn!("Failed to write inline requirements: {}", e);
            return PipResolution::default();
        }

        self.pip_for_file(dir.path(), requirements_file, None).await
    }

    /// Scan every file in `plan`.
    pub async fn run(&self, plan: &ScanPlan) -> ScanResults {
        let repo = plan.repository.as_path();
        let mut results = ScanResults::default();
        let mut discovered = BTreeSet::new();

        info!("Processing pip requirements files: {:?}", plan.pip_files);
        let snapshots = plan
            .pip_snapshots
            .as_ref()
            .map(|(before, after)| (before.as_path(), after.as_path()));
        for file in &plan.pip_files {
            let resolution = self.pip_for_file(repo, file, snapshots).await;
            results.pip.insert(file.clone(), resolution);
        }

        info!("Processing apt requirements files: {:?}", plan.apt_files);
        for file in &plan.apt_files {
            let packages = self.apt_for_file(&repo.join(file)).await;
            results.apt.insert(file.clone(), packages);
        }

        let recipes: [(&dyn RecipeAnalyzer, &[PathBuf], bool); 3] = [
            (&DockerfileAnalyzer, plan.dockerfiles.as_slice(), plan.follow_docker),
            (&BashAnalyzer, plan.bash_files.as_slice(), plan.follow_bash),
            (&NotebookAnalyzer, plan.notebooks.as_slice(), plan.follow_notebook),
        ];
        for (analyzer, files, follow) in recipes {
            info!("Processing {} files: {:?}", analyzer.kind(), files);
            for file in files {
                info!("Processing {} {}", analyzer.kind(), file.display());
                let (packages, found) = self.recipe(analyzer, repo, file, follow).await;
                discovered.extend(found);
                let target = match analyzer.kind() {
                    RecipeKind::Dockerfile => &mut results.docker,
                    RecipeKind::Bash => &mut results.bash,
                    RecipeKind::Notebook => &mut results.notebook,
                };
                target.insert(file.clone(), packages);
            }
        }

        let extra = follow_up_files(repo, &plan.pip_files, discovered);
        if !extra.is_empty() {
            info!("Processing discovered requirements files: {:?}", extra);
        }
        for file in extra {
            let resolution = self.pip_for_file(repo, &file, None).await;
            results.pip.insert(file, resolution);
        }

        results
    }
}

/// Discovered requirements files worth resolving: inside the repository,
/// present on disk, and not already processed as explicit pip sources.
pub fn follow_up_files(
    repository: &Path,
    already_processed: &[PathBuf],
    discovered: impl IntoIterator<Item = PathBuf>,
) -> Vec<PathBuf> {
    let processed: BTreeSet<PathBuf> = already_processed.iter().map(|p| normalize_path(p)).collect();

    let mut out = BTreeSet::new();
    for path in discovered {
        let relative = if path.is_absolute() {
            match path.strip_prefix(repository) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => {
                    info!("Skipping {}: outside the repository", path.display());
                    continue;
                }
            }
        } else {
            path
        };
        if matches!(relative.components().next(), Some(Component::ParentDir) | None) {
            info!("Skipping {}: outside the repository", relative.display());
            continue;
        }
        if processed.contains(&relative) {
            continue;
        }
        if !repository.join(&relative).is_file() {
            warn!(
                "Discovered requirements file {} does not exist in the repository. Skipping.",
                relative.display()
            );
            continue;
        }
        out.insert(relative);
    }
    out.into_iter().collect()
}
