#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Terminal views over graded results.

use anyhow::{Result, bail};
use colored::Colorize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Panel, Style, Width, object::Rows},
};

use super::{agent::MAX_SCORE, results::GradingRun};

/// Per-file totals.
#[derive(Tabled, Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    #[tabled(rename = "File")]
    /// * `file`: notebook file name
    pub file:      String,
    #[tabled(rename = "Questions")]
    /// * `questions`: number of graded questions
    pub questions: usize,
    #[tabled(rename = "Total")]
    /// * `total`: sum of scores
    pub total:     u32,
    #[tabled(rename = "Max")]
    /// * `max`: highest possible total
    pub max:       u32,
}

/// A graded question as shown in the per-file table.
#[derive(Tabled)]
struct ReviewRow {
    /// Question number.
    #[tabled(rename = "#")]
    id:       usize,
    /// Question text.
    #[tabled(rename = "Question")]
    question: String,
    /// Student answer.
    #[tabled(rename = "Answer")]
    answer:   String,
    /// Coloured score.
    #[tabled(rename = "Score")]
    score:    String,
    /// Justification.
    #[tabled(rename = "Comment")]
    comment:  String,
}

/// Colours a score green, yellow or red by band.
pub fn score_label(score: u8) -> String {
    let text = format!("{score}/{MAX_SCORE}");
    match score {
        4.. => text.green().to_string(),
        2..=3 => text.yellow().to_string(),
        _ => text.red().to_string(),
    }
}

/// Totals for every file in the run, in first-seen order.
pub fn summarize(run: &GradingRun) -> Vec<FileSummary> {
    run.files()
        .into_iter()
        .map(|file| {
            let (questions, total) = run
                .records_for(file)
                .fold((0usize, 0u32), |(n, sum), r| (n + 1, sum + u32::from(r.score)));
            FileSummary {
                file: file.to_string(),
                questions,
                total,
                max: questions as u32 * u32::from(MAX_SCORE),
            }
        })
        .collect()
}

/// Table of all files with their totals.
pub fn render_overview(run: &GradingRun) -> String {
    let summaries = summarize(run);
    let graded: usize = summaries.iter().map(|s| s.questions).sum();

    Table::new(&summaries)
        .with(Panel::header(format!("Graded submissions ({})", run.model)))
        .with(Panel::footer(format!(
            "{} files, {} questions",
            summaries.len(),
            graded
        )))
        .with(
            Modify::new(Rows::first())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(Style::modern())
        .to_string()
}

/// Detailed table for one file.
pub fn render_file(run: &GradingRun, file: &str) -> Result<String> {
    let rows: Vec<ReviewRow> = run
        .records_for(file)
        .map(|r| ReviewRow {
            id:       r.question_id,
            question: r.question.clone(),
            answer:   r.answer.clone(),
            score:    score_label(r.score),
            comment:  r.comment.clone(),
        })
        .collect();

    if rows.is_empty() {
        bail!(
            "No graded questions for `{file}`. Known files: {}",
            run.files().join(", ")
        );
    }

    let total: u32 = run.records_for(file).map(|r| u32::from(r.score)).sum();
    let max = rows.len() as u32 * u32::from(MAX_SCORE);

    Ok(Table::new(&rows)
        .with(Panel::header(format!("Results: {file}")))
        .with(Panel::footer(format!("Total: {total}/{max}")))
        .with(Modify::new(Rows::new(1..)).with(Width::wrap(40).keep_words(true)))
        .with(
            Modify::new(Rows::first())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(
            Modify::new(Rows::last())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(Style::modern())
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade::results::GradedRecord;

    fn run() -> GradingRun {
        let record = |file: &str, id: usize, score: u8| {
            GradedRecord::builder()
                .file(file)
                .question_id(id)
                .question(format!("question {id}"))
                .answer("answer")
                .score(score)
                .comment("fine")
                .build()
        };
        GradingRun::new(
            "test-model",
            None,
            vec![record("a.ipynb", 1, 5), record("a.ipynb", 2, 1), record("b.ipynb", 1, 3)],
        )
    }

    #[test]
    fn summaries_total_per_file() {
        assert_eq!(
            summarize(&run()),
            vec![
                FileSummary {
                    file:      "a.ipynb".into(),
                    questions: 2,
                    total:     6,
                    max:       10,
                },
                FileSummary {
                    file:      "b.ipynb".into(),
                    questions: 1,
                    total:     3,
                    max:       5,
                },
            ]
        );
    }

    #[test]
    fn file_table_lists_questions_and_total() {
        let table = render_file(&run(), "a.ipynb").unwrap();

        assert!(table.contains("Results: a.ipynb"));
        assert!(table.contains("question 2"));
        assert!(table.contains("Total: 6/10"));
    }

    #[test]
    fn scores_are_coloured_by_band() {
        colored::control::set_override(true);

        assert_eq!(score_label(5), "\u{1b}[32m5/5\u{1b}[0m");
        assert_eq!(score_label(4), "\u{1b}[32m4/5\u{1b}[0m");
        assert_eq!(score_label(3), "\u{1b}[33m3/5\u{1b}[0m");
        assert_eq!(score_label(2), "\u{1b}[33m2/5\u{1b}[0m");
        assert_eq!(score_label(1), "\u{1b}[31m1/5\u{1b}[0m");
        assert_eq!(score_label(0), "\u{1b}[31m0/5\u{1b}[0m");
    }

    #[test]
    fn unknown_file_lists_known_ones() {
        let err = render_file(&run(), "zzz.ipynb").unwrap_err();
        assert!(err.to_string().contains("a.ipynb, b.ipynb"));
    }

    #[test]
    fn overview_mentions_model() {
        let table = render_overview(&run());
        assert!(table.contains("test-model"));
        assert!(table.contains("2 files, 3 questions"));
    }
}
