//! Report renderers for audit results.
//!
//! - [`terminal`]: summary box and problem tables; respects `--verbose` / `--quiet`.
//! - [`JsonReport`]: full scan results plus problem records, for other tools.

pub mod terminal;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::problems::ProblemPackages;
use crate::scan::ScanResults;

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub repository: &'a Path,
    pub all_passed: bool,
    pub results: &'a ScanResults,
    pub problems: &'a ProblemPackages,
}

impl JsonReport<'_> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write to `output`, or stdout when `None`.
    pub fn write(&self, output: Option<&Path>) -> Result<()> {
        let json = self.to_json()?;
        match output {
            Some(path) => std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?,
            None => println!("{}", json),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::policy::{PackageLists, Policy};
    use crate::models::{Package, PipResolution};
    use std::path::PathBuf;

    #[test]
    fn test_json_report_shape() {
        let policy = Policy::new(&["MIT".to_string()], PackageLists::default(), PackageLists::default())
            .unwrap();
        let mut results = ScanResults::default();
        results.pip.insert(
            PathBuf::from("requirements.txt"),
            PipResolution {
                direct: vec![Package::python("six", "1.16.0", "MIT", None, true, &policy)],
                transitive: Vec::new(),
            },
        );
        results.apt.insert(
            PathBuf::from("apt.txt"),
            vec![Package::system("zip", None, "UNKNOWN", Vec::new(), None, &policy)],
        );
        let problems = crate::problems::extract_problem_packages(&results, true);

        let report = JsonReport {
            repository: Path::new("/repo"),
            all_passed: !problems.has_failures(false),
            results: &results,
            problems: &problems,
        };
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(value["all_passed"], false);
        let six = &value["results"]["pip"]["requirements.txt"]["direct"][0];
        assert_eq!(six["kind"], "python");
        assert_eq!(six["licenses"][0]["accepted"], true);
        assert_eq!(value["problems"]["apt"][0]["source_kind"], "Apt");
        assert_eq!(value["problems"]["apt"][0]["package"]["kind"], "system");
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let results = ScanResults::default();
        let problems = ProblemPackages::default();
        JsonReport {
            repository: dir.path(),
            all_passed: true,
            results: &results,
            problems: &problems,
        }
        .write(Some(&out))
        .unwrap();
        assert!(std::fs::read_to_string(out).unwrap().contains("\"all_passed\": true"));
    }
}
