#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// LLM grading roles, transports, and reply validation.
pub mod agent;
/// Examiner/reviewer pipeline over notebooks and wide tables.
pub mod pipeline;
/// Terminal presentation of graded results.
pub mod report;
/// Graded records, wide tables, and their persistence.
pub mod results;

pub use agent::{
    Agent, Assessment, AssessmentError, ChatBackend, MAX_SCORE, OpenAiBackend, RetryPolicy, Role,
};
pub use pipeline::{EMPTY_ANSWER, GradingPanel, evaluate, extract_wide, student_notebooks};
pub use report::{FileSummary, render_file, render_overview, summarize};
pub use results::{
    GradedRecord, GradingRun, WideRow, load_results, load_wide, save_wide, wide_output_path,
};
