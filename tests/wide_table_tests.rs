//! Grading and displaying wide question/answer tables.


use std::fs;

use chat_support::{ScriptedBackend, verdict};
use nbgrade::{
    config::GraderPrompts,
    grade::{
        EMPTY_ANSWER, GradingPanel, RetryPolicy, WideRow, load_results, load_wide, render_file,
        save_wide, summarize, wide_output_path,
    },
};
use uuid::Uuid;

fn table() -> Vec<WideRow> {
    serde_json::from_str(
        r#"[
            {"File": "a.ipynb", "Question 1": "add", "Answer 1": "a + b",
             "Question 2": "sub", "Answer 2": "a - b"},
            {"File": "b.ipynb", "Question 1": "add", "Answer 1": null,
             "Question 2": "sub", "Answer 2": ""}
        ]"#,
    )
    .expect("wide table")
}

#[tokio::test]
async fn wide_rows_gain_scores_and_comments() {
    let backend = ScriptedBackend::constant(verdict(4, "fine"));
    let panel = GradingPanel::new(
        backend.clone(),
        &GraderPrompts::new("examine", "review"),
        RetryPolicy::immediate(1),
    );
    let mut rows = table();

    let graded = panel.grade_wide(&mut rows).await;

    assert_eq!(graded, 4);
    assert_eq!(backend.calls(), 8);
    assert_eq!(rows[0].score(1), Some(4));
    assert_eq!(rows[0].comment(2).as_deref(), Some("fine"));
    assert_eq!(rows[1].score(1), Some(4));
    assert_eq!(rows[1].score(2), Some(4));
}

#[tokio::test]
async fn blank_answer_cells_are_graded_as_empty() {
    let backend = ScriptedBackend::constant(verdict(0, "no answer"));
    let panel = GradingPanel::new(
        backend.clone(),
        &GraderPrompts::new("examine", "review"),
        RetryPolicy::immediate(1),
    );
    let mut rows: Vec<WideRow> = serde_json::from_str(
        r#"[{"File": "c.ipynb", "Question 1": "add", "Answer 1": null,
             "Question 2": "sub"}]"#,
    )
    .expect("wide table");

    let graded = panel.grade_wide(&mut rows).await;

    // Question 2 has no answer column at all and stays ungraded.
    assert_eq!(graded, 1);
    assert_eq!(rows[0].score(1), Some(0));
    assert_eq!(rows[0].score(2), None);
    assert!(backend.seen()[0].ends_with(&format!("STUDENT ANSWER:\n{EMPTY_ANSWER}")));
}

#[tokio::test]
async fn graded_table_round_trips_and_renders() {
    let dir = std::env::temp_dir().join(format!("nbgrade-wide-{}", Uuid::new_v4()));
    fs::create_dir_all(&dir).expect("create dir");
    let input = dir.join("table.json");
    save_wide(&table(), &input).expect("save input");

    let panel = GradingPanel::new(
        ScriptedBackend::constant(verdict(2, "partial")),
        &GraderPrompts::default(),
        RetryPolicy::immediate(1),
    );
    let mut rows = load_wide(&input).expect("load input");
    panel.grade_wide(&mut rows).await;

    let output = wide_output_path(&input);
    assert_eq!(output, dir.join("table_graded.json"));
    save_wide(&rows, &output).expect("save output");

    let run = load_results(&output).expect("load graded");
    let summary = summarize(&run);
    assert_eq!(summary.len(), 2);
    assert_eq!((summary[0].questions, summary[0].total), (2, 4));
    assert_eq!((summary[1].questions, summary[1].total), (2, 4));

    colored::control::set_override(false);
    let view = render_file(&run, "a.ipynb").expect("render");
    assert!(view.contains("Total: 4/10"));

    let _ = fs::remove_dir_all(dir);
}
