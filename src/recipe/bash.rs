use anyhow::Result;

use super::commands::extract_commands;
use super::{Recipe, RecipeAnalyzer, RecipeKind};

pub struct BashAnalyzer;

impl RecipeAnalyzer for BashAnalyzer {
    fn kind(&self) -> RecipeKind {
        RecipeKind::Bash
    }

    fn extract(&self, content: &str) -> Result<Recipe> {
        Ok(Recipe {
            commands: extract_commands(content),
            copies: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extract_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "#!/usr/bin/env bash").unwrap();
        writeln!(f, "set -euo pipefail").unwrap();
        writeln!(f, "sudo apt-get update && sudo apt-get install -y \\").unwrap();
        writeln!(f, "    libsndfile1 \\").unwrap();
        writeln!(f, "    ffmpeg").unwrap();
        writeln!(f, "echo \"Installing python deps").unwrap();
        writeln!(f, "for the demo\"").unwrap();
        writeln!(f, "pip install -r requirements.txt || echo \"pip failed\"").unwrap();

        let recipe = BashAnalyzer.extract_file(f.path()).unwrap();
        assert_eq!(
            recipe.commands,
            vec![
                "set -euo pipefail",
                "sudo apt-get update",
                "sudo apt-get install -y libsndfile1 ffmpeg",
                "pip install -r requirements.txt",
            ]
        );
        assert!(recipe.copies.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BashAnalyzer
            .extract_file(&dir.path().join("missing.sh"))
            .unwrap_err();
        assert!(err.to_string().contains("missing.sh"));
    }
}
