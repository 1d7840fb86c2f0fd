use std::collections::BTreeSet;

use regex::{RegexBuilder, RegexSet, RegexSetBuilder};

use crate::config::Config;
use crate::error::AuditError;
use crate::models::{Ecosystem, License};

/// Returns `true` if any pattern matches the whole license name, ignoring case.
///
/// Patterns that fail to compile never match. [`LicenseAllowList`] is the
/// precompiled equivalent used during a run.
pub fn accepted(license_name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        RegexBuilder::new(&anchored(pattern))
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(license_name))
            .unwrap_or(false)
    })
}

fn anchored(pattern: &str) -> String {
    format!("^(?:{})$", pattern)
}

/// The global license allow-list, compiled once.
#[derive(Debug, Clone)]
pub struct LicenseAllowList {
    patterns: Vec<String>,
    set: RegexSet,
}

impl LicenseAllowList {
    pub fn new(patterns: &[String]) -> Result<Self, AuditError> {
        // Compile individually first so the error names the offending pattern.
        for pattern in patterns {
            RegexBuilder::new(&anchored(pattern))
                .case_insensitive(true)
                .build()
                .map_err(|e| AuditError::InvalidPattern {
                    pattern: pattern.clone(),
                    details: e.to_string(),
                })?;
        }

        let set = RegexSetBuilder::new(patterns.iter().map(|p| anchored(p)))
            .case_insensitive(true)
            .build()
            .map_err(|e| AuditError::InvalidPattern {
                pattern: patterns.join(", "),
                details: e.to_string(),
            })?;

        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    pub fn accepts(&self, license_name: &str) -> bool {
        self.set.is_match(license_name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Exact-name package overrides for one ecosystem.
#[derive(Debug, Clone, Default)]
pub struct PackageLists {
    pub allowlist: BTreeSet<String>,
    pub denylist: BTreeSet<String>,
}

impl PackageLists {
    pub fn new<A, D>(allowlist: A, denylist: D) -> Self
    where
        A: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        Self {
            allowlist: allowlist.into_iter().collect(),
            denylist: denylist.into_iter().collect(),
        }
    }

    /// Allow-list membership wins over deny-list membership.
    fn override_for(&self, package_name: &str) -> Option<bool> {
        if self.allowlist.contains(package_name) {
            return Some(true);
        }
        if self.denylist.contains(package_name) {
            return Some(false);
        }
        None
    }
}

/// Read-only license policy for one run.
#[derive(Debug, Clone)]
pub struct Policy {
    pip: PackageLists,
    apt: PackageLists,
    licenses: LicenseAllowList,
}

impl Policy {
    pub fn new(
        license_patterns: &[String],
        pip: PackageLists,
        apt: PackageLists,
    ) -> Result<Self, AuditError> {
        Ok(Self {
            pip,
            apt,
            licenses: LicenseAllowList::new(license_patterns)?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AuditError> {
        Self::new(
            &config.license.allowlist,
            PackageLists::new(
                config.pip.allowlist.iter().cloned(),
                config.pip.denylist.iter().cloned(),
            ),
            PackageLists::new(
                config.apt.allowlist.iter().cloned(),
                config.apt.denylist.iter().cloned(),
            ),
        )
    }

    /// Explicit override for a package, looked up only in its own ecosystem's lists.
    pub fn override_for(&self, ecosystem: Ecosystem, package_name: &str) -> Option<bool> {
        match ecosystem {
            Ecosystem::Pip => self.pip.override_for(package_name),
            Ecosystem::Apt => self.apt.override_for(package_name),
        }
    }

    /// Build a [`License`] carrying the owning package's override.
    pub fn license(&self, name: &str, override_verdict: Option<bool>) -> License {
        let accepted = match override_verdict {
            Some(verdict) => verdict,
            None => self.licenses.accepts(name),
        };
        License {
            name: name.to_string(),
            override_verdict,
            accepted,
        }
    }

    pub fn license_patterns(&self) -> &[String] {
        self.licenses.patterns()
    }
}
