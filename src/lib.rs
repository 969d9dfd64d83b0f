//! # nbgrade
//!
//! Grades Jupyter notebook assignments. Student notebooks are diffed against
//! a template to recover question/answer pairs; each pair is scored by an
//! examiner model and then audited by a reviewer model.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Environment-driven configuration and prompts
pub mod config;
/// For all things related to grading
pub mod grade;
/// Notebook model, text extraction, and template alignment
pub mod notebook;
/// Utility functions for convenience
pub mod util;
