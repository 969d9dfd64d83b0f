//! Alignment of fixture submissions against the fixture template.


use chat_support::fixture;
use nbgrade::notebook::{
    Notebook,
    diff::{DEFAULT_MATCH_THRESHOLD, parse_submission},
};

#[test]
fn template_yields_one_block_per_question() {
    let template = Notebook::from_path(fixture("template.ipynb")).expect("template");
    let blocks = template.question_blocks();

    assert_eq!(blocks.len(), 3);
    assert!(blocks[0].starts_with("# homework 4"));
    assert!(blocks[0].ends_with("sum of two numbers."));
    assert_eq!(blocks[1], "## question 2\nexplain what a list comprehension is.");
    assert!(!blocks[2].contains("hist.png"));
}

#[test]
fn complete_submission_answers_every_question() {
    let pairs = parse_submission(
        fixture("template.ipynb"),
        fixture("alice.ipynb"),
        DEFAULT_MATCH_THRESHOLD,
    )
    .expect("parse");

    let answers: Vec<&str> = pairs.iter().map(|p| p.answer.as_str()).collect();
    assert_eq!(
        answers,
        vec![
            "def add(a, b):\n    return a + b",
            "# A list comprehension builds a list from an iterable\nsquares = [x * x for x in \
             range(10)]",
            "import matplotlib.pyplot as plt\nplt.hist(scores)",
        ]
    );
    assert_eq!(pairs.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn unanswered_questions_are_empty() {
    let pairs = parse_submission(
        fixture("template.ipynb"),
        fixture("bob.ipynb"),
        DEFAULT_MATCH_THRESHOLD,
    )
    .expect("parse");

    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0].answer, "def add(a, b):\n    return a - b");
    assert!(pairs[1].answer.is_empty());
    assert!(pairs[2].answer.is_empty());
}

#[test]
fn template_against_itself_has_no_answers() {
    let pairs = parse_submission(
        fixture("template.ipynb"),
        fixture("template.ipynb"),
        DEFAULT_MATCH_THRESHOLD,
    )
    .expect("parse");

    assert_eq!(pairs.len(), 3);
    assert!(pairs.iter().all(|p| p.answer.is_empty()));
}

#[test]
fn missing_submission_reports_path() {
    let err = parse_submission(
        fixture("template.ipynb"),
        fixture("nobody.ipynb"),
        DEFAULT_MATCH_THRESHOLD,
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains("nobody.ipynb"));
}
