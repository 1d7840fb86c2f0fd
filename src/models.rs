use std::path::PathBuf;

use serde::Serialize;

use crate::license::policy::Policy;

pub const PYPI_PROJECT_URL: &str = "https://pypi.org/project";
pub const UNKNOWN_LICENSE: &str = "UNKNOWN";

pub const NOTE_ALLOW_LISTED: &str = "Package has been allow-listed by Legal.";
pub const NOTE_DENY_LISTED: &str = "Package has been deny-listed by Legal.";
pub const NOTE_NOT_CLEARED: &str =
    "License has not been cleared by Legal. Please submit for assessment.";

/// Package ecosystem whose allow/deny lists govern a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Pip,
    Apt,
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ecosystem::Pip => write!(f, "pip"),
            Ecosystem::Apt => write!(f, "apt"),
        }
    }
}

/// A license string with its owning package's override baked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct License {
    pub name: String,
    #[serde(rename = "override")]
    pub override_verdict: Option<bool>,
    pub accepted: bool,
}

impl License {
    pub fn reason(&self) -> String {
        match self.override_verdict {
            Some(true) => format!("Allow-listed package. License: {}", self.name),
            Some(false) => format!("Deny-listed package. License: {}", self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for License {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Bundled files of a system package that carry one license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicensedFiles {
    pub license: License,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PackageKind {
    Python,
    System { transitive_licenses: Vec<LicensedFiles> },
}

impl PackageKind {
    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            PackageKind::Python => Ecosystem::Pip,
            PackageKind::System { .. } => Ecosystem::Apt,
        }
    }
}

/// A resolved dependency. Python packages carry every `;`-separated license
/// in `licenses`; system packages carry exactly one direct license there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub version: Option<String>,
    pub uri: Option<String>,
    pub is_direct: bool,
    pub licenses: Vec<License>,
    #[serde(rename = "override")]
    pub override_verdict: Option<bool>,
    #[serde(flatten)]
    pub kind: PackageKind,
}

impl Package {
    pub fn python(
        name: &str,
        version: &str,
        license: &str,
        uri: Option<String>,
        is_direct: bool,
        policy: &Policy,
    ) -> Self {
        let override_verdict = policy.override_for(Ecosystem::Pip, name);
        let mut licenses: Vec<License> = license
            .split(';')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| policy.license(l, override_verdict))
            .collect();
        if licenses.is_empty() {
            licenses.push(policy.license(UNKNOWN_LICENSE, override_verdict));
        }
        let uri = uri.or_else(|| Some(format!("{}/{}/{}", PYPI_PROJECT_URL, name, version)));

        Self {
            name: name.to_string(),
            version: Some(version.to_string()),
            uri,
            is_direct,
            licenses,
            override_verdict,
            kind: PackageKind::Python,
        }
    }

    /// `transitive` pairs are merged by license name, keeping first-seen order.
    pub fn system(
        name: &str,
        version: Option<&str>,
        direct_license: &str,
        transitive: Vec<(String, Vec<String>)>,
        uri: Option<String>,
        policy: &Policy,
    ) -> Self {
        let override_verdict = policy.override_for(Ecosystem::Apt, name);

        let mut grouped: Vec<LicensedFiles> = Vec::new();
        for (license, files) in transitive {
            match grouped.iter_mut().find(|g| g.license.name == license) {
                Some(group) => group.files.extend(files),
                None => grouped.push(LicensedFiles {
                    license: policy.license(&license, override_verdict),
                    files,
                }),
            }
        }

        Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            uri,
            is_direct: true,
            licenses: vec![policy.license(direct_license, override_verdict)],
            override_verdict,
            kind: PackageKind::System {
                transitive_licenses: grouped,
            },
        }
    }

    pub fn ecosystem(&self) -> Ecosystem {
        self.kind.ecosystem()
    }

    pub fn transitive_licenses(&self) -> &[LicensedFiles] {
        match &self.kind {
            PackageKind::Python => &[],
            PackageKind::System {
                transitive_licenses,
            } => transitive_licenses,
        }
    }

    pub fn all_licenses(&self, include_transitive: bool) -> Vec<&License> {
        let mut all: Vec<&License> = self.licenses.iter().collect();
        if include_transitive {
            all.extend(self.transitive_licenses().iter().map(|g| &g.license));
        }
        all
    }

    /// Licenses that fail policy after override resolution.
    pub fn problem_licenses(&self, include_transitive: bool) -> Vec<&License> {
        self.all_licenses(include_transitive)
            .into_iter()
            .filter(|l| !l.accepted)
            .collect()
    }

    pub fn has_problems(&self, include_transitive: bool) -> bool {
        !self.problem_licenses(include_transitive).is_empty()
    }

    pub fn note(&self) -> &'static str {
        match self.override_verdict {
            Some(true) => NOTE_ALLOW_LISTED,
            Some(false) => NOTE_DENY_LISTED,
            None if self.has_problems(false) => NOTE_NOT_CLEARED,
            None => "",
        }
    }

    pub fn name_version(&self) -> String {
        match &self.version {
            Some(v) => format!("{}=={}", self.name, v),
            None => self.name.clone(),
        }
    }
}

/// Output of the pip resolver for one requirements source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipResolution {
    pub direct: Vec<Package>,
    pub transitive: Vec<Package>,
}

impl PipResolution {
    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.transitive.is_empty()
    }

    pub fn extend(&mut self, other: PipResolution) {
        self.direct.extend(other.direct);
        self.transitive.extend(other.transitive);
    }
}

/// pip and apt packages found in one recipe file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CombinedPackages {
    pub pip: PipResolution,
    pub apt: Vec<Package>,
}

/// Where a package was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SourceKind {
    Pip,
    Apt,
    DockerPip,
    DockerApt,
    BashPip,
    BashApt,
    NotebookPip,
    NotebookApt,
}

impl SourceKind {
    pub const ALL: [SourceKind; 8] = [
        SourceKind::Pip,
        SourceKind::Apt,
        SourceKind::DockerPip,
        SourceKind::DockerApt,
        SourceKind::BashPip,
        SourceKind::BashApt,
        SourceKind::NotebookPip,
        SourceKind::NotebookApt,
    ];
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Pip => write!(f, "pip"),
            SourceKind::Apt => write!(f, "apt"),
            SourceKind::DockerPip => write!(f, "Docker [pip]"),
            SourceKind::DockerApt => write!(f, "Docker [apt]"),
            SourceKind::BashPip => write!(f, "Bash [pip]"),
            SourceKind::BashApt => write!(f, "Bash [apt]"),
            SourceKind::NotebookPip => write!(f, "Notebook [pip]"),
            SourceKind::NotebookApt => write!(f, "Notebook [apt]"),
        }
    }
}

/// A package with at least one non-accepted license, tied to where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemRecord {
    pub source_kind: SourceKind,
    pub source_file: PathBuf,
    pub package: Package,
}
