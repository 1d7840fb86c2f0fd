use std::path::Path;

use serde::Serialize;

use crate::models::{CombinedPackages, Package, PipResolution, ProblemRecord, SourceKind};
use crate::scan::ScanResults;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipProblems {
    pub direct: Vec<ProblemRecord>,
    pub transitive: Vec<ProblemRecord>,
}

impl PipProblems {
    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.transitive.is_empty()
    }
}

/// Problems found in one family of recipe files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CombinedProblems {
    pub pip: PipProblems,
    pub apt: Vec<ProblemRecord>,
}

impl CombinedProblems {
    pub fn is_empty(&self) -> bool {
        self.pip.is_empty() && self.apt.is_empty()
    }
}

/// Every problem record of a run, grouped by where the package was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProblemPackages {
    pub pip: PipProblems,
    pub apt: Vec<ProblemRecord>,
    pub docker: CombinedProblems,
    pub bash: CombinedProblems,
    pub notebook: CombinedProblems,
}

impl ProblemPackages {
    pub fn is_empty(&self) -> bool {
        self.pip.is_empty()
            && self.apt.is_empty()
            && self.docker.is_empty()
            && self.bash.is_empty()
            && self.notebook.is_empty()
    }

    /// Records in a fixed order: pip, apt, then Docker, bash and notebook.
    pub fn records(&self) -> Vec<&ProblemRecord> {
        let mut all: Vec<&ProblemRecord> = Vec::new();
        all.extend(&self.pip.direct);
        all.extend(&self.pip.transitive);
        all.extend(&self.apt);
        for combined in [&self.docker, &self.bash, &self.notebook] {
            all.extend(&combined.pip.direct);
            all.extend(&combined.pip.transitive);
            all.extend(&combined.apt);
        }
        all
    }

    /// Whether the run should fail. Transitive pip problems only count with
    /// `fail_on_transitive`.
    pub fn has_failures(&self, fail_on_transitive: bool) -> bool {
        let direct = !self.pip.direct.is_empty()
            || !self.apt.is_empty()
            || [&self.docker, &self.bash, &self.notebook]
                .iter()
                .any(|c| !c.pip.direct.is_empty() || !c.apt.is_empty());
        if direct {
            return true;
        }
        fail_on_transitive
            && (!self.pip.transitive.is_empty()
                || [&self.docker, &self.bash, &self.notebook]
                    .iter()
                    .any(|c| !c.pip.transitive.is_empty()))
    }
}

/// Problem records for the packages of one source file. One record per
/// failing package, in input order.
pub fn extract_problems_for_source(
    source_file: &Path,
    source_kind: SourceKind,
    packages: &[Package],
    include_transitive: bool,
) -> Vec<ProblemRecord> {
    packages
        .iter()
        .filter(|p| p.has_problems(include_transitive))
        .map(|p| ProblemRecord {
            source_kind,
            source_file: source_file.to_path_buf(),
            package: p.clone(),
        })
        .collect()
}

fn add_pip(
    target: &mut PipProblems,
    source_file: &Path,
    kind: SourceKind,
    resolution: &PipResolution,
    include_transitive: bool,
) {
    target.direct.extend(extract_problems_for_source(
        source_file,
        kind,
        &resolution.direct,
        include_transitive,
    ));
    target.transitive.extend(extract_problems_for_source(
        source_file,
        kind,
        &resolution.transitive,
        include_transitive,
    ));
}

fn add_combined<'a, I>(
    target: &mut CombinedProblems,
    files: I,
    pip_kind: SourceKind,
    apt_kind: SourceKind,
    include_transitive: bool,
) where
    I: IntoIterator<Item = (&'a std::path::PathBuf, &'a CombinedPackages)>,
{
    for (file, packages) in files {
        add_pip(&mut target.pip, file, pip_kind, &packages.pip, include_transitive);
        target.apt.extend(extract_problems_for_source(
            file,
            apt_kind,
            &packages.apt,
            include_transitive,
        ));
    }
}

/// Collect the problem packages of a whole scan. Packages are never
/// deduplicated across files.
///
/// `include_transitive` also checks the bundled-file licenses of system
/// packages.
pub fn extract_problem_packages(results: &ScanResults, include_transitive: bool) -> ProblemPackages {
    let mut problems = ProblemPackages::default();

    for (file, resolution) in &results.pip {
        add_pip(&mut problems.pip, file, SourceKind::Pip, resolution, include_transitive);
    }
    for (file, packages) in &results.apt {
        problems.apt.extend(extract_problems_for_source(
            file,
            SourceKind::Apt,
            packages,
            include_transitive,
        ));
    }
    add_combined(
        &mut problems.docker,
        &results.docker,
        SourceKind::DockerPip,
        SourceKind::DockerApt,
        include_transitive,
    );
    add_combined(
        &mut problems.bash,
        &results.bash,
        SourceKind::BashPip,
        SourceKind::BashApt,
        include_transitive,
    );
    add_combined(
        &mut problems.notebook,
        &results.notebook,
        SourceKind::NotebookPip,
        SourceKind::NotebookApt,
        include_transitive,
    );
    problems
}
