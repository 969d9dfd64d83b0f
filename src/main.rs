#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # nbgrade
//!
//! Grades Jupyter notebook assignments against a template with an examiner
//! and a reviewer model.
//!
//! Set `OPENAI_API_KEY` (optionally in a `.env` file), put the template and
//! the student notebooks in one directory, and run `nbgrade grade -t
//! template.ipynb`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bpaf::*;
use dotenvy::dotenv;
use nbgrade::{
    config::{self, ConfigHandle},
    grade::{
        GradingPanel, GradingRun, OpenAiBackend, extract_wide, load_results, load_wide,
        render_file, render_overview, save_wide, wide_output_path,
    },
    notebook::{archive::unpack_submissions, diff::DEFAULT_MATCH_THRESHOLD},
};
use tempfile::TempDir;
use tracing::{Level, info, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Options for grading a directory of notebooks.
#[derive(Debug, Clone)]
struct GradeOpts {
    /// Directory holding the student notebooks
    dir:       PathBuf,
    /// ZIP archive of student notebooks, replaces `dir`
    archive:   Option<PathBuf>,
    /// Template notebook
    template:  PathBuf,
    /// Model override
    model:     Option<String>,
    /// Where to write the graded run
    out:       PathBuf,
    /// Anchor similarity threshold
    threshold: f64,
}

/// Options for extracting answers without grading.
#[derive(Debug, Clone)]
struct ExtractOpts {
    /// Directory holding the student notebooks
    dir:       PathBuf,
    /// ZIP archive of student notebooks, replaces `dir`
    archive:   Option<PathBuf>,
    /// Template notebook
    template:  PathBuf,
    /// Where to write the wide table
    out:       PathBuf,
    /// Anchor similarity threshold
    threshold: f64,
}

/// Options for grading an already extracted wide table.
#[derive(Debug, Clone)]
struct WideOpts {
    /// Wide table to grade
    input: PathBuf,
    /// Model override
    model: Option<String>,
    /// Where to write the graded table
    out:   Option<PathBuf>,
}

/// Options for displaying graded results.
#[derive(Debug, Clone)]
struct ShowOpts {
    /// Graded run or graded wide table
    input: PathBuf,
    /// Single file to show in detail
    file:  Option<String>,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade every notebook in a directory
    Grade(GradeOpts),
    /// Extract question/answer pairs into a wide table
    Extract(ExtractOpts),
    /// Grade a wide table
    Wide(WideOpts),
    /// Show graded results
    Show(ShowOpts),
}

/// Parsed command line.
#[derive(Debug, Clone)]
struct Opts {
    /// Enable debug logging
    verbose: bool,
    /// Only log warnings and errors
    quiet:   bool,
    /// Subcommand to run
    cmd:     Cmd,
}

/// Parse the command line arguments and return `Opts`
fn options() -> Opts {
    /// parses the submissions directory
    fn dir() -> impl Parser<PathBuf> {
        short('d')
            .long("dir")
            .help("Directory with student .ipynb files")
            .argument::<PathBuf>("DIR")
            .fallback(PathBuf::from("."))
    }

    /// parses an optional submissions archive
    fn archive() -> impl Parser<Option<PathBuf>> {
        short('z')
            .long("zip")
            .help("ZIP archive of student .ipynb files, used instead of --dir")
            .argument::<PathBuf>("ARCHIVE")
            .optional()
    }

    /// parses the template notebook path
    fn template() -> impl Parser<PathBuf> {
        short('t')
            .long("template")
            .help("Template notebook with the assignment's questions")
            .argument::<PathBuf>("TEMPLATE")
            .fallback(PathBuf::from("template.ipynb"))
    }

    /// parses an optional model override
    fn model() -> impl Parser<Option<String>> {
        short('m')
            .long("model")
            .help("Model id, overrides OPENAI_MODEL")
            .argument::<String>("MODEL")
            .optional()
    }

    /// parses the alignment threshold
    fn threshold() -> impl Parser<f64> {
        long("threshold")
            .help("Minimum similarity for a template question to anchor an answer")
            .argument::<f64>("RATIO")
            .fallback(DEFAULT_MATCH_THRESHOLD)
    }

    let grade = {
        let dir = dir();
        let archive = archive();
        let template = template();
        let model = model();
        let out = short('o')
            .long("out")
            .help("Where to write the graded results")
            .argument::<PathBuf>("OUT")
            .fallback(PathBuf::from("graded_results.json"));
        let threshold = threshold();
        construct!(GradeOpts {
            dir,
            archive,
            template,
            model,
            out,
            threshold
        })
        .map(Cmd::Grade)
        .to_options()
        .command("grade")
        .help("Grade every notebook in a directory")
    };

    let extract = {
        let dir = dir();
        let archive = archive();
        let template = template();
        let out = short('o')
            .long("out")
            .help("Where to write the extracted wide table")
            .argument::<PathBuf>("OUT")
            .fallback(PathBuf::from("extracted.json"));
        let threshold = threshold();
        construct!(ExtractOpts {
            dir,
            archive,
            template,
            out,
            threshold
        })
        .map(Cmd::Extract)
        .to_options()
        .command("extract")
        .help("Extract question/answer pairs without grading")
    };

    let wide = {
        let model = model();
        let out = short('o')
            .long("out")
            .help("Where to write the graded table, defaults to <input>_graded.json")
            .argument::<PathBuf>("OUT")
            .optional();
        let input = positional::<PathBuf>("TABLE").help("Wide table produced by `extract`");
        construct!(WideOpts { model, out, input })
            .map(Cmd::Wide)
            .to_options()
            .command("wide")
            .help("Grade a wide question/answer table")
    };

    let show = {
        let file = short('f')
            .long("file")
            .help("Show one notebook in detail")
            .argument::<String>("NAME")
            .optional();
        let input = positional::<PathBuf>("RESULTS").help("Graded results or graded wide table");
        construct!(ShowOpts { file, input })
            .map(Cmd::Show)
            .to_options()
            .command("show")
            .help("Display graded results")
    };

    let verbose = short('v').long("verbose").help("Enable debug logging").switch();
    let quiet = short('q')
        .long("quiet")
        .help("Only log warnings and errors")
        .switch();
    let cmd = construct!([grade, extract, wide, show]);

    construct!(Opts {
        verbose,
        quiet,
        cmd
    })
    .to_options()
    .descr("Grade notebook assignments with an examiner and a reviewer model")
    .run()
}

/// Builds the examiner/reviewer panel for the configured endpoint.
fn panel(
    config: &ConfigHandle,
    model: Option<&str>,
) -> Result<(GradingPanel<OpenAiBackend>, String)> {
    let backend = OpenAiBackend::from_config(config, model)?;
    let model = backend.model().to_string();
    Ok((GradingPanel::new(backend, config.prompts(), config.retry()), model))
}

/// Directory to read submissions from: `dir` itself, or a scratch directory
/// holding the unpacked archive. The scratch directory lives as long as the
/// returned guard.
fn submissions(dir: PathBuf, archive: Option<&Path>) -> Result<(PathBuf, Option<TempDir>)> {
    let Some(archive) = archive else {
        return Ok((dir, None));
    };
    let scratch = tempfile::Builder::new()
        .prefix("nbgrade-")
        .tempdir()
        .context("Could not create a directory for unpacked submissions")?;
    unpack_submissions(archive, scratch.path())?;
    Ok((scratch.path().to_path_buf(), Some(scratch)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let opts = options();

    let level = if opts.verbose {
        Level::DEBUG
    } else if opts.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(fmt)
        .with(LevelFilter::from_level(level))
        .init();

    let config = config::ensure_initialized()?;

    match opts.cmd {
        Cmd::Grade(o) => {
            let (panel, model) = panel(&config, o.model.as_deref())?;
            let (dir, _scratch) = submissions(o.dir, o.archive.as_deref())?;
            let records = panel
                .grade_directory(&dir, &o.template, o.threshold)
                .await?;
            let run = GradingRun::new(model, Some(o.template.display().to_string()), records);
            run.save(&o.out)?;
            info!("Results saved to {}", o.out.display());
            eprintln!("{}", render_overview(&run));
        }
        Cmd::Extract(o) => {
            let (dir, _scratch) = submissions(o.dir, o.archive.as_deref())?;
            let rows = extract_wide(&dir, &o.template, o.threshold)?;
            save_wide(&rows, &o.out)?;
            info!("Extracted {} notebooks to {}", rows.len(), o.out.display());
        }
        Cmd::Wide(o) => {
            let (panel, _) = panel(&config, o.model.as_deref())?;
            let mut rows = load_wide(&o.input)?;
            let graded = panel.grade_wide(&mut rows).await;
            let out = o.out.unwrap_or_else(|| wide_output_path(&o.input));
            save_wide(&rows, &out)?;
            info!("Graded {graded} answers, table saved to {}", out.display());
        }
        Cmd::Show(o) => {
            let run = load_results(&o.input)
                .with_context(|| format!("Could not load results from {}", o.input.display()))?;
            match o.file {
                Some(file) => println!("{}", render_file(&run, &file)?),
                None => println!("{}", render_overview(&run)),
            }
        }
    };

    Ok(())
}
