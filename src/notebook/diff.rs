#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Aligns a student notebook against its template.
//!
//! Both notebooks are flattened to text and diffed line by line. Runs of
//! unchanged template lines anchor the questions; the lines a student added
//! right after an anchor are taken as the answer to that question.

use std::{fmt::Display, path::Path, time::Duration};

use anyhow::Result;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info};

use super::Notebook;

/// Minimum similarity between a question block and an unchanged group for
/// the group to count as that question's anchor.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.05;

/// Lines of context kept around each change, matching `diff -u`.
const CONTEXT_RADIUS: usize = 3;

/// Upper bound for a single character-level similarity computation.
const RATIO_TIMEOUT: Duration = Duration::from_millis(500);

/// How a run of diff lines relates to the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// Present in both template and submission.
    Unchanged,
    /// Added by the student.
    New,
    /// Present in the template but missing from the submission.
    Removed,
}

impl Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKind::Unchanged => write!(f, "unchanged"),
            GroupKind::New => write!(f, "new"),
            GroupKind::Removed => write!(f, "removed"),
        }
    }
}

impl From<ChangeTag> for GroupKind {
    fn from(tag: ChangeTag) -> Self {
        match tag {
            ChangeTag::Equal => GroupKind::Unchanged,
            ChangeTag::Insert => GroupKind::New,
            ChangeTag::Delete => GroupKind::Removed,
        }
    }
}

/// Consecutive diff lines of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffGroup {
    /// Kind shared by every line in the group.
    pub kind:  GroupKind,
    /// Lines with trailing whitespace removed.
    pub lines: Vec<String>,
}

impl DiffGroup {
    /// Creates a group from its kind and lines.
    pub fn new<I, S>(kind: GroupKind, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the group's lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// A template question paired with the student's answer to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    /// 1-based question number in template order.
    pub index:    usize,
    /// Cleaned text of the template block.
    pub question: String,
    /// Student text attributed to the question, empty when none was found.
    pub answer:   String,
}

/// Groups a unified line diff of `template` against `student`.
///
/// Hunk boundaries always close the current group, so two unchanged groups
/// from neighbouring hunks stay separate until [`merge_groups`] runs.
pub fn diff_groups(template: &str, student: &str) -> Vec<DiffGroup> {
    let old: Vec<&str> = template.lines().collect();
    let new: Vec<&str> = student.lines().collect();
    if old == new {
        return Vec::new();
    }

    let diff = TextDiff::from_slices(&old, &new);
    let mut groups: Vec<DiffGroup> = Vec::new();

    for hunk in diff.grouped_ops(CONTEXT_RADIUS) {
        let mut current: Option<DiffGroup> = None;
        for op in &hunk {
            for change in diff.iter_changes(op) {
                let kind = GroupKind::from(change.tag());
                let line = change.value().trim_end().to_string();
                match current.as_mut() {
                    Some(group) if group.kind == kind => group.lines.push(line),
                    _ => {
                        groups.extend(current.take());
                        current = Some(DiffGroup::new(kind, [line]));
                    }
                }
            }
        }
        groups.extend(current);
    }

    groups
}

/// Merges adjacent groups of the same kind.
pub fn merge_groups(groups: Vec<DiffGroup>) -> Vec<DiffGroup> {
    let chunks = groups.into_iter().chunk_by(|group| group.kind);
    let merged = chunks
        .into_iter()
        .map(|(kind, run)| DiffGroup::new(kind, run.flat_map(|group| group.lines)))
        .collect();
    merged
}

/// Character-level similarity in `[0, 1]`, computed as `2 * matches / total`.
pub fn similarity(a: &str, b: &str) -> f64 {
    f64::from(
        TextDiff::configure()
            .timeout(RATIO_TIMEOUT)
            .diff_chars(a, b)
            .ratio(),
    )
}

/// Aligns template question blocks against the diff groups of a submission.
///
/// For every question the unchanged group with the highest similarity is
/// chosen, the earliest one winning ties. When that similarity reaches
/// `threshold`, the new groups that follow it (after any template lines the
/// student removed) become the answer. One pair is returned per question.
pub fn align(questions: &[String], groups: &[DiffGroup], threshold: f64) -> Vec<QaPair> {
    questions
        .iter()
        .enumerate()
        .map(|(q_idx, question)| {
            let mut best_ratio = 0.0;
            let mut best_idx = None;

            for (g_idx, group) in groups.iter().enumerate() {
                if group.kind != GroupKind::Unchanged {
                    continue;
                }
                let ratio = similarity(question, &group.text());
                debug!(
                    "Question {}: group {} (unchanged), ratio = {:.2}",
                    q_idx + 1,
                    g_idx + 1,
                    ratio
                );
                if ratio > best_ratio {
                    best_ratio = ratio;
                    best_idx = Some(g_idx);
                }
            }

            let answer = match best_idx {
                Some(anchor) if best_ratio >= threshold => {
                    let answer = answer_after(groups, anchor);
                    info!(
                        "Question {} anchored with ratio = {:.2}, answer: {}",
                        q_idx + 1,
                        best_ratio,
                        preview(&answer)
                    );
                    answer
                }
                _ => {
                    info!(
                        "No matching group for question {} (max ratio = {:.2})",
                        q_idx + 1,
                        best_ratio
                    );
                    String::new()
                }
            };

            QaPair {
                index: q_idx + 1,
                question: question.clone(),
                answer,
            }
        })
        .collect()
}

/// Collects the student lines inserted right after the anchor group. A
/// removed group ends the answer.
fn answer_after(groups: &[DiffGroup], anchor: usize) -> String {
    groups[anchor + 1..]
        .iter()
        .take_while(|group| group.kind == GroupKind::New)
        .flat_map(|group| group.lines.iter().map(String::as_str))
        .join("\n")
        .trim()
        .to_string()
}

/// First hundred characters of an answer for log lines.
fn preview(answer: &str) -> String {
    let head: String = answer.chars().take(100).collect();
    if head.len() < answer.len() {
        format!("{head}...")
    } else {
        head
    }
}

/// Extracts question/answer pairs from a student notebook.
///
/// Questions always come from the template file, so the number of pairs
/// equals the number of template blocks even for an empty submission.
pub fn parse_submission(
    template: impl AsRef<Path>,
    student: impl AsRef<Path>,
    threshold: f64,
) -> Result<Vec<QaPair>> {
    let template = Notebook::from_path(template)?;
    let student = Notebook::from_path(student)?;
    Ok(align_notebooks(&template, &student, threshold))
}

/// In-memory counterpart of [`parse_submission`].
pub fn align_notebooks(template: &Notebook, student: &Notebook, threshold: f64) -> Vec<QaPair> {
    let groups = merge_groups(diff_groups(&template.text(), &student.text()));

    for (idx, group) in groups.iter().enumerate() {
        debug!("Group {} ({}):\n{}", idx + 1, group.kind, group.text());
    }

    align(&template.question_blocks(), &groups, threshold)
}
