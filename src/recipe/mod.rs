use std::path::Path;

use anyhow::{Context, Result};

use crate::models::SourceKind;

pub mod bash;
pub mod commands;
pub mod dockerfile;
pub mod install;
pub mod notebook;

pub use install::{CopyInstruction, InstallClassifier};

/// Kind of script-like source a recipe was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    Dockerfile,
    Bash,
    Notebook,
}

impl RecipeKind {
    pub fn pip_source(self) -> SourceKind {
        match self {
            RecipeKind::Dockerfile => SourceKind::DockerPip,
            RecipeKind::Bash => SourceKind::BashPip,
            RecipeKind::Notebook => SourceKind::NotebookPip,
        }
    }

    pub fn apt_source(self) -> SourceKind {
        match self {
            RecipeKind::Dockerfile => SourceKind::DockerApt,
            RecipeKind::Bash => SourceKind::BashApt,
            RecipeKind::Notebook => SourceKind::NotebookApt,
        }
    }
}

impl std::fmt::Display for RecipeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipeKind::Dockerfile => write!(f, "Dockerfile"),
            RecipeKind::Bash => write!(f, "bash script"),
            RecipeKind::Notebook => write!(f, "notebook"),
        }
    }
}

/// Commands and copy instructions extracted from one recipe file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipe {
    pub commands: Vec<String>,
    pub copies: Vec<CopyInstruction>,
}

pub trait RecipeAnalyzer {
    fn kind(&self) -> RecipeKind;

    fn extract(&self, content: &str) -> Result<Recipe>;

    fn extract_file(&self, path: &Path) -> Result<Recipe> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} {}", self.kind(), path.display()))?;
        self.extract(&content)
            .with_context(|| format!("Failed to parse {} {}", self.kind(), path.display()))
    }
}
