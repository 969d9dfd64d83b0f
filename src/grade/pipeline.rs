#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Two-stage grading: the examiner scores, the reviewer audits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use super::{
    agent::{Agent, Assessment, ChatBackend, RetryPolicy, Role},
    results::{GradedRecord, WideRow},
};
use crate::{
    config::GraderPrompts,
    notebook::diff::{QaPair, parse_submission},
    util::{file_name, find_files},
};

/// Stand-in shown to the agents when a question has no answer.
pub const EMPTY_ANSWER: &str = "[empty]";

/// Message the examiner receives.
fn examiner_message(question: &str, answer: &str) -> String {
    format!("TASK:\n{question}\n\nSTUDENT ANSWER:\n{answer}")
}

/// Message the reviewer receives, including the examiner's verdict.
fn reviewer_message(question: &str, answer: &str, initial: &Assessment) -> Result<String> {
    let initial = serde_json::to_string(initial).context("Could not encode initial assessment")?;
    Ok(format!(
        "TASK:\n{question}\n\nSTUDENT ANSWER:\n{answer}\n\nINITIAL ASSESSMENT:\n{initial}"
    ))
}

/// Grades one question/answer pair; the reviewer's assessment is final.
pub async fn evaluate<B: ChatBackend>(
    question: &str,
    answer: &str,
    examiner: &Agent<B>,
    reviewer: &Agent<B>,
) -> Result<Assessment> {
    let answer = if answer.trim().is_empty() {
        EMPTY_ANSWER
    } else {
        answer
    };

    let initial = examiner.assess(&examiner_message(question, answer)).await?;
    reviewer
        .assess(&reviewer_message(question, answer, &initial)?)
        .await
}

/// An examiner and a reviewer sharing one backend.
#[derive(Clone)]
pub struct GradingPanel<B> {
    /// First-pass grader.
    examiner: Agent<B>,
    /// Second-pass auditor.
    reviewer: Agent<B>,
}

impl<B: ChatBackend + Clone> GradingPanel<B> {
    /// Builds both agents over `backend`.
    pub fn new(backend: B, prompts: &GraderPrompts, retry: RetryPolicy) -> Self {
        let examiner = Agent::builder()
            .role(Role::Examiner)
            .system_prompt(prompts.examiner())
            .backend(backend.clone())
            .retry(retry)
            .build();
        let reviewer = Agent::builder()
            .role(Role::Reviewer)
            .system_prompt(prompts.reviewer())
            .backend(backend)
            .retry(retry)
            .build();
        Self { examiner, reviewer }
    }
}

impl<B: ChatBackend> GradingPanel<B> {
    /// Returns the examiner agent.
    pub fn examiner(&self) -> &Agent<B> {
        &self.examiner
    }

    /// Returns the reviewer agent.
    pub fn reviewer(&self) -> &Agent<B> {
        &self.reviewer
    }

    /// Grades one pair with this panel.
    pub async fn evaluate(&self, question: &str, answer: &str) -> Result<Assessment> {
        evaluate(question, answer, &self.examiner, &self.reviewer).await
    }

    /// Grades aligned pairs of one file. A pair whose grading fails is
    /// logged and left out.
    pub async fn grade_pairs(&self, file: &str, pairs: &[QaPair]) -> Vec<GradedRecord> {
        let mut records = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match self.evaluate(&pair.question, &pair.answer).await {
                Ok(assessment) => {
                    info!("{file}: question {} scored {}", pair.index, assessment.score);
                    records.push(GradedRecord::from_pair(file, pair, assessment));
                }
                Err(e) => error!("{file}: skipping question {}: {e:#}", pair.index),
            }
        }
        records
    }

    /// Aligns `student` against `template` and grades every pair.
    pub async fn grade_notebook(
        &self,
        template: &Path,
        student: &Path,
        threshold: f64,
    ) -> Result<Vec<GradedRecord>> {
        let pairs = parse_submission(template, student, threshold)?;
        Ok(self.grade_pairs(&file_name(student), &pairs).await)
    }

    /// Grades every notebook in `dir` except the template. Notebooks that
    /// cannot be read are logged and skipped.
    pub async fn grade_directory(
        &self,
        dir: &Path,
        template: &Path,
        threshold: f64,
    ) -> Result<Vec<GradedRecord>> {
        let mut records = Vec::new();
        for student in student_notebooks(dir, template)? {
            info!("Grading {}", file_name(&student));
            match self.grade_notebook(template, &student, threshold).await {
                Ok(graded) => records.extend(graded),
                Err(e) => error!("Skipping {}: {e:#}", student.display()),
            }
        }
        Ok(records)
    }

    /// Adds `Score i` / `Comment i` to every row for each question/answer
    /// column pair. A blank answer cell is graded as an empty answer; absent
    /// columns and cells that fail to grade are skipped.
    pub async fn grade_wide(&self, rows: &mut [WideRow]) -> usize {
        let mut indices: Vec<usize> = rows.iter().flat_map(WideRow::pair_indices).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut graded = 0;
        for idx in indices {
            for row in rows.iter_mut() {
                let (Some(question), Some(answer)) = (row.question(idx), row.answer(idx)) else {
                    warn!("{}: no question/answer pair {idx}, skipping", row.file);
                    continue;
                };
                match self.evaluate(&question, &answer).await {
                    Ok(assessment) => {
                        row.set_assessment(idx, &assessment);
                        graded += 1;
                    }
                    Err(e) => error!("{}: skipping question {idx}: {e:#}", row.file),
                }
            }
        }
        graded
    }
}

/// Student notebooks in `dir`, sorted, excluding the template by file name.
pub fn student_notebooks(dir: &Path, template: &Path) -> Result<Vec<PathBuf>> {
    let template_name = file_name(template);
    let mut notebooks: Vec<PathBuf> = find_files("ipynb", 0, dir)?
        .into_iter()
        .filter(|path| file_name(path) != template_name)
        .collect();
    notebooks.sort();

    if notebooks.is_empty() {
        bail!("No student .ipynb files found in {}", dir.display());
    }
    Ok(notebooks)
}

/// Extracts question/answer pairs for every student notebook without
/// grading, one wide row per notebook.
pub fn extract_wide(dir: &Path, template: &Path, threshold: f64) -> Result<Vec<WideRow>> {
    let mut rows = Vec::new();
    for student in student_notebooks(dir, template)? {
        info!("Extracting {}", file_name(&student));
        match parse_submission(template, &student, threshold) {
            Ok(pairs) => rows.push(WideRow::from_pairs(file_name(&student), &pairs)),
            Err(e) => error!("Skipping {}: {e:#}", student.display()),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewer_sees_initial_assessment() {
        let initial = Assessment::new(2, "partial").unwrap();
        let message = reviewer_message("Q", "A", &initial).unwrap();

        assert!(message.starts_with("TASK:\nQ\n\nSTUDENT ANSWER:\nA"));
        assert!(message.ends_with(r#"{"score":2,"comment":"partial"}"#));
    }

    #[test]
    fn examiner_message_layout() {
        assert_eq!(examiner_message("Q", "A"), "TASK:\nQ\n\nSTUDENT ANSWER:\nA");
    }
}
