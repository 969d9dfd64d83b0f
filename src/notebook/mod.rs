#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Jupyter notebook model and text extraction.
//!
//! Only the parts of nbformat v4 that grading needs are modelled: the
//! ordered list of cells, their type, and their source text.

/// Unpacking of submission archives.
pub mod archive;
/// Line diffing and question/answer alignment.
pub mod diff;

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// Executable code.
    Code,
    /// Markdown prose.
    Markdown,
    /// Raw, unrendered text.
    Raw,
    /// Anything newer than this crate knows about.
    #[serde(other)]
    Other,
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Type of the cell.
    pub cell_type: CellType,
    /// Source text, with nbformat's list-of-lines form already joined.
    #[serde(default, deserialize_with = "joined_source")]
    pub source:    String,
}

impl Cell {
    /// Creates a code cell.
    pub fn code(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Code,
            source:    source.into(),
        }
    }

    /// Creates a markdown cell.
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Markdown,
            source:    source.into(),
        }
    }

    /// Returns true for a blank code cell, which separates questions in a
    /// template.
    pub fn is_marker(&self) -> bool {
        self.cell_type == CellType::Code && self.source.trim().is_empty()
    }
}

/// nbformat stores `source` either as one string or as a list of lines.
fn joined_source<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    /// Both accepted encodings of `source`.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        /// A single string.
        Text(String),
        /// Lines that already carry their own newlines.
        Lines(Vec<String>),
    }

    Ok(match Source::deserialize(deserializer)? {
        Source::Text(text) => text,
        Source::Lines(lines) => lines.concat(),
    })
}

/// An ordered collection of cells read from an `.ipynb` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    /// Cells in document order.
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Notebook {
    /// Builds a notebook from cells directly.
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Reads and parses a notebook file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Could not read notebook {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Could not parse notebook {}", path.display()))
    }

    /// Parses notebook JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Notebook is not valid nbformat JSON")
    }

    /// Joins the trimmed source of every non-empty cell, one cell per line
    /// group.
    pub fn text(&self) -> String {
        self.cells
            .iter()
            .map(|cell| cell.source.trim())
            .filter(|source| !source.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Splits the notebook into question blocks.
    ///
    /// Blank code cells act as markers; the cells between two markers form
    /// one block. Each block is passed through [`clean_text`] and empty
    /// blocks are dropped.
    pub fn question_blocks(&self) -> Vec<String> {
        let mut blocks = Vec::new();
        let mut start = 0;

        for (idx, cell) in self.cells.iter().enumerate() {
            if cell.is_marker() {
                push_block(&self.cells[start..idx], &mut blocks);
                start = idx + 1;
            }
        }
        if start < self.cells.len() {
            push_block(&self.cells[start..], &mut blocks);
        }

        blocks
    }
}

/// Appends the cleaned text of `cells` to `blocks` if it is non-empty.
fn push_block(cells: &[Cell], blocks: &mut Vec<String>) {
    let joined = cells
        .iter()
        .map(|cell| cell.source.trim())
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = clean_text(&joined);
    if !cleaned.is_empty() {
        blocks.push(cleaned);
    }
}

/// Removes markdown image lines, trims, and lowercases.
pub fn clean_text(text: &str) -> String {
    text.lines()
        .filter(|line| !has_markdown_image(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_lowercase()
}

/// True if the line contains `![alt](target)`.
fn has_markdown_image(line: &str) -> bool {
    let Some(open) = line.find("![") else {
        return false;
    };
    let rest = &line[open + 2..];
    let Some(close) = rest.find("](") else {
        return false;
    };
    rest[close + 2..].contains(')')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_accepts_string_and_line_list() {
        let nb = Notebook::from_json(
            r#"{"cells": [
                {"cell_type": "markdown", "source": "one"},
                {"cell_type": "code", "source": ["a = 1\n", "b = 2"], "outputs": []}
            ], "nbformat": 4}"#,
        )
        .unwrap();

        assert_eq!(nb.cells[0].source, "one");
        assert_eq!(nb.cells[1].source, "a = 1\nb = 2");
        assert_eq!(nb.cells[1].cell_type, CellType::Code);
    }

    #[test]
    fn unknown_cell_type_is_tolerated() {
        let nb = Notebook::from_json(r#"{"cells": [{"cell_type": "heading", "source": "x"}]}"#)
            .unwrap();
        assert_eq!(nb.cells[0].cell_type, CellType::Other);
        assert!(!nb.cells[0].is_marker());
    }

    #[test]
    fn text_skips_blank_cells() {
        let nb = Notebook::from_cells(vec![
            Cell::markdown("  intro  "),
            Cell::code(""),
            Cell::code("x = 1\n"),
        ]);
        assert_eq!(nb.text(), "intro\nx = 1");
    }

    #[test]
    fn clean_text_drops_images_and_lowercases() {
        let cleaned = clean_text("  Task ONE\n![plot](img.png)\nSee ![x](y) here\nEnd  ");
        assert_eq!(cleaned, "task one\nend");
    }

    #[test]
    fn clean_text_keeps_bracketed_text_without_image_syntax() {
        assert_eq!(clean_text("list[0] (first)"), "list[0] (first)");
        assert_eq!(clean_text("![unterminated"), "![unterminated");
    }

    #[test]
    fn blocks_split_on_blank_code_cells() {
        let nb = Notebook::from_cells(vec![
            Cell::markdown("Title"),
            Cell::markdown("Q1: add"),
            Cell::code(""),
            Cell::markdown("Q2: multiply"),
            Cell::code("   "),
            Cell::markdown("Q3: divide"),
        ]);

        assert_eq!(nb.question_blocks(), vec!["title\nq1: add", "q2: multiply", "q3: divide"]);
    }

    #[test]
    fn blocks_skip_empty_runs_between_markers() {
        let nb = Notebook::from_cells(vec![
            Cell::code(""),
            Cell::code(""),
            Cell::markdown("![only an image](a.png)"),
            Cell::code(""),
            Cell::markdown("Q"),
            Cell::code(""),
        ]);

        assert_eq!(nb.question_blocks(), vec!["q"]);
    }
}
