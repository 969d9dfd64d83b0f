#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::agent::Assessment;
use crate::notebook::diff::QaPair;

/// Column prefix for question text in a wide table.
pub const QUESTION_PREFIX: &str = "Question";
/// Column prefix for student answers in a wide table.
pub const ANSWER_PREFIX: &str = "Answer";
/// Column prefix for scores in a graded wide table.
pub const SCORE_PREFIX: &str = "Score";
/// Column prefix for justifications in a graded wide table.
pub const COMMENT_PREFIX: &str = "Comment";

/// One graded question of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct GradedRecord {
    /// File name of the graded notebook.
    #[builder(getter)]
    pub file:        String,
    /// 1-based question number.
    #[builder(getter)]
    pub question_id: usize,
    /// Question text.
    #[builder(getter)]
    pub question:    String,
    /// Student answer as extracted from the notebook.
    #[builder(getter)]
    pub answer:      String,
    /// Final score in `0..=5`.
    #[builder(getter)]
    pub score:       u8,
    /// Final justification.
    #[builder(getter)]
    pub comment:     String,
}

impl GradedRecord {
    /// Builds a record from an aligned pair and the reviewer's verdict.
    pub fn from_pair(file: impl Into<String>, pair: &QaPair, assessment: Assessment) -> Self {
        Self {
            file:        file.into(),
            question_id: pair.index,
            question:    pair.question.clone(),
            answer:      pair.answer.clone(),
            score:       assessment.score,
            comment:     assessment.comment,
        }
    }
}

/// A persisted grading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingRun {
    /// Identifier of this run.
    pub run_id:   String,
    /// Model that produced the scores.
    pub model:    String,
    /// Template notebook the submissions were aligned against, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Graded records in grading order.
    pub records:  Vec<GradedRecord>,
}

impl GradingRun {
    /// Starts a new run with a fresh identifier.
    pub fn new(
        model: impl Into<String>,
        template: Option<String>,
        records: Vec<GradedRecord>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            model: model.into(),
            template,
            records,
        }
    }

    /// Flattens graded wide rows into records; ungraded cells are skipped.
    pub fn from_wide(model: impl Into<String>, rows: &[WideRow]) -> Self {
        let records = rows
            .iter()
            .flat_map(|row| {
                row.pair_indices().into_iter().filter_map(move |idx| {
                    Some(GradedRecord {
                        file:        row.file.clone(),
                        question_id: idx,
                        question:    row.question(idx)?,
                        answer:      row.answer(idx).unwrap_or_default(),
                        score:       row.score(idx)?,
                        comment:     row.comment(idx).unwrap_or_default(),
                    })
                })
            })
            .collect();

        Self::new(model, None, records)
    }

    /// Writes the run as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body).with_context(|| format!("Could not write {}", path.display()))
    }

    /// Reads a run written by [`GradingRun::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a grading run", path.display()))
    }

    /// Distinct file names in first-seen order.
    pub fn files(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for record in &self.records {
            if !seen.contains(&record.file.as_str()) {
                seen.push(record.file.as_str());
            }
        }
        seen
    }

    /// Records belonging to `file`.
    pub fn records_for<'a>(&'a self, file: &'a str) -> impl Iterator<Item = &'a GradedRecord> {
        self.records.iter().filter(move |record| record.file == file)
    }
}

/// Loads either a grading run or a graded wide table.
pub fn load_results(path: impl AsRef<Path>) -> Result<GradingRun> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    match value {
        Value::Array(_) => {
            let rows: Vec<WideRow> = serde_json::from_value(value)
                .with_context(|| format!("{} is not a wide table", path.display()))?;
            Ok(GradingRun::from_wide("unknown", &rows))
        }
        Value::Object(_) => serde_json::from_value(value)
            .with_context(|| format!("{} is not a grading run", path.display())),
        _ => bail!("{} holds neither a grading run nor a wide table", path.display()),
    }
}

/// One submission per row, with `Question i` / `Answer i` columns and, once
/// graded, `Score i` / `Comment i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WideRow {
    /// File name of the submission.
    #[serde(rename = "File")]
    pub file: String,
    /// All other columns, keyed by header.
    #[serde(flatten)]
    columns:  BTreeMap<String, Value>,
}

/// Builds a `"<prefix> <idx>"` column header.
fn column(prefix: &str, idx: usize) -> String {
    format!("{prefix} {idx}")
}

/// Renders a cell as text; null cells read as absent.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

impl WideRow {
    /// Creates a row with no columns.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file:    file.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Builds a row from aligned pairs.
    pub fn from_pairs(file: impl Into<String>, pairs: &[QaPair]) -> Self {
        let mut row = Self::new(file);
        for pair in pairs {
            row.set_text(QUESTION_PREFIX, pair.index, &pair.question);
            row.set_text(ANSWER_PREFIX, pair.index, &pair.answer);
        }
        row
    }

    /// Sets a text cell.
    pub fn set_text(&mut self, prefix: &str, idx: usize, text: &str) {
        self.columns
            .insert(column(prefix, idx), Value::String(text.to_string()));
    }

    /// Returns the text of cell `"<prefix> <idx>"`.
    fn text(&self, prefix: &str, idx: usize) -> Option<String> {
        self.columns.get(&column(prefix, idx)).and_then(cell_text)
    }

    /// Question text for question `idx`.
    pub fn question(&self, idx: usize) -> Option<String> {
        self.text(QUESTION_PREFIX, idx)
    }

    /// Student answer for question `idx`. A blank (`null`) cell is an empty
    /// answer; `None` means the column is absent.
    pub fn answer(&self, idx: usize) -> Option<String> {
        self.columns
            .get(&column(ANSWER_PREFIX, idx))
            .map(|value| cell_text(value).unwrap_or_default())
    }

    /// Score for question `idx`, if graded.
    pub fn score(&self, idx: usize) -> Option<u8> {
        match self.columns.get(&column(SCORE_PREFIX, idx))? {
            Value::Number(n) => n.as_u64().and_then(|s| u8::try_from(s).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Justification for question `idx`, if graded.
    pub fn comment(&self, idx: usize) -> Option<String> {
        self.text(COMMENT_PREFIX, idx)
    }

    /// Stores the verdict for question `idx`.
    pub fn set_assessment(&mut self, idx: usize, assessment: &Assessment) {
        self.columns
            .insert(column(SCORE_PREFIX, idx), Value::from(assessment.score));
        self.set_text(COMMENT_PREFIX, idx, &assessment.comment);
    }

    /// Indices `i` with both `Question i` and `Answer i`, ascending.
    pub fn pair_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .columns
            .keys()
            .filter_map(|key| {
                let (prefix, idx) = key.rsplit_once(' ')?;
                (prefix == QUESTION_PREFIX).then(|| idx.parse::<usize>().ok())?
            })
            .filter(|idx| self.columns.contains_key(&column(ANSWER_PREFIX, *idx)))
            .collect();
        indices.sort_unstable();
        indices
    }
}

/// Reads a wide table (a JSON array of rows).
pub fn load_wide(path: impl AsRef<Path>) -> Result<Vec<WideRow>> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a wide table", path.display()))
}

/// Writes a wide table as pretty-printed JSON.
pub fn save_wide(rows: &[WideRow], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let body = serde_json::to_string_pretty(rows)?;
    fs::write(path, body).with_context(|| format!("Could not write {}", path.display()))
}

/// `dir/name.ext` becomes `dir/name_graded.ext`.
pub fn wide_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".into());
    let ext = input
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".into());
    input.with_file_name(format!("{stem}_graded.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(index: usize, question: &str, answer: &str) -> QaPair {
        QaPair {
            index,
            question: question.into(),
            answer: answer.into(),
        }
    }

    #[test]
    fn pair_indices_are_numeric_and_complete() {
        let mut row = WideRow::from_pairs(
            "a.ipynb",
            &[pair(1, "q1", "a1"), pair(2, "q2", "a2"), pair(10, "q10", "a10")],
        );
        row.set_text(QUESTION_PREFIX, 11, "orphan question");

        assert_eq!(row.pair_indices(), vec![1, 2, 10]);
    }

    #[test]
    fn assessment_round_trips_through_cells() {
        let mut row = WideRow::from_pairs("a.ipynb", &[pair(1, "q", "a")]);
        assert_eq!(row.score(1), None);

        row.set_assessment(1, &Assessment::new(4, "solid").unwrap());
        assert_eq!(row.score(1), Some(4));
        assert_eq!(row.comment(1).as_deref(), Some("solid"));
    }

    #[test]
    fn wide_rows_accept_spreadsheet_style_cells() {
        let rows: Vec<WideRow> = serde_json::from_str(
            r#"[{"File": "x.ipynb", "Question 1": "q", "Answer 1": null, "Score 1": "3"}]"#,
        )
        .unwrap();

        assert_eq!(rows[0].file, "x.ipynb");
        assert_eq!(rows[0].answer(1).as_deref(), Some(""));
        assert_eq!(rows[0].answer(2), None);
        assert_eq!(rows[0].score(1), Some(3));
    }

    #[test]
    fn output_path_gets_graded_suffix() {
        assert_eq!(
            wide_output_path(Path::new("out/table.json")),
            PathBuf::from("out/table_graded.json")
        );
        assert_eq!(wide_output_path(Path::new("table")), PathBuf::from("table_graded.json"));
    }

    #[test]
    fn files_keep_first_seen_order() {
        let record = |file: &str, id: usize| {
            GradedRecord::builder()
                .file(file)
                .question_id(id)
                .question("q")
                .answer("a")
                .score(1)
                .comment("c")
                .build()
        };
        let run = GradingRun::new(
            "m",
            None,
            vec![record("b.ipynb", 1), record("a.ipynb", 1), record("b.ipynb", 2)],
        );

        assert_eq!(run.files(), vec!["b.ipynb", "a.ipynb"]);
        assert_eq!(run.records_for("b.ipynb").count(), 2);
    }
}
