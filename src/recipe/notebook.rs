use anyhow::Result;
use serde::Deserialize;

use super::commands::extract_commands_from_lines;
use super::{Recipe, RecipeAnalyzer, RecipeKind};

#[derive(Debug, Deserialize)]
struct Notebook {
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

/// nbformat stores cell source either as one string or as a list of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellSource {
    Text(String),
    Lines(Vec<String>),
}

impl Default for CellSource {
    fn default() -> Self {
        CellSource::Text(String::new())
    }
}

impl CellSource {
    fn text(&self) -> String {
        match self {
            CellSource::Text(s) => s.clone(),
            CellSource::Lines(lines) => lines.concat(),
        }
    }
}

pub struct NotebookAnalyzer;

impl RecipeAnalyzer for NotebookAnalyzer {
    fn kind(&self) -> RecipeKind {
        RecipeKind::Notebook
    }

    fn extract(&self, content: &str) -> Result<Recipe> {
        let notebook: Notebook = serde_json::from_str(content)?;

        let code: Vec<String> = notebook
            .cells
            .iter()
            .filter(|c| c.cell_type == "code")
            .map(|c| c.source.text())
            .collect();
        let lines = code.iter().flat_map(|cell| cell.split('\n'));

        Ok(Recipe {
            commands: extract_commands_from_lines(lines),
            copies: Vec::new(),
        })
    }
}
