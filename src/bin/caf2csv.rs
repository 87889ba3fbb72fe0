use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use caf_extract::{
    CafExtractor, Diagnostics, ExtractError, ExtractOptions, Extraction, Header, OcrMode, PageSelection,
    write_records_to_path,
};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "caf2csv",
    version,
    about = "Extract course approval rows from CAF PDFs into CSV"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract course rows from one or more forms and write one CSV.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Input PDF path. Repeatable; documents are processed concurrently.
    #[arg(short, long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Output CSV path.
    #[arg(short, long)]
    output: PathBuf,

    /// Page selection like 1-3,5.
    #[arg(long)]
    pages: Option<String>,

    /// Output delimiter character.
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// When to run OCR: auto, off or force.
    #[arg(long, default_value = "auto")]
    ocr: String,

    /// Rasterization resolution for OCR.
    #[arg(long, default_value_t = 300)]
    dpi: u32,

    /// Per-page OCR timeout in seconds.
    #[arg(long, default_value_t = 60)]
    ocr_timeout: u64,

    /// Pages recognized in parallel.
    #[arg(long, default_value_t = 2)]
    ocr_workers: usize,

    /// Tesseract language code.
    #[arg(long, default_value = "eng")]
    ocr_lang: String,

    /// Vertical distance in points within which fragments share a row.
    #[arg(long, default_value_t = 3.0)]
    row_tolerance: f32,

    /// Extra value that never counts as a signature. Repeatable.
    #[arg(long = "stop-word")]
    stop_words: Vec<String>,

    /// Extra phrase that marks a course as not approved. Repeatable.
    #[arg(long = "not-approved")]
    not_approved: Vec<String>,

    /// Extra approval-field value that means no approval. Repeatable.
    #[arg(long = "negative-mark")]
    negative_marks: Vec<String>,

    /// Extra comment word, such as approver initials, that marks a
    /// major/minor approval. Repeatable.
    #[arg(long = "major-minor-term")]
    major_minor_terms: Vec<String>,

    /// Extra comment word that marks an elective approval. Repeatable.
    #[arg(long = "elective-term")]
    elective_terms: Vec<String>,

    /// Write per-document diagnostics as JSON to this path.
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Enable verbose warning output.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_options(args: &ExtractArgs) -> Result<ExtractOptions> {
    let pages = args
        .pages
        .as_deref()
        .map(PageSelection::from_str)
        .transpose()
        .map_err(|error| anyhow!("invalid page selection: {error}"))
        .context("failed to parse --pages")?;

    let mode = OcrMode::from_str(&args.ocr)
        .map_err(|error| anyhow!(error))
        .context("failed to parse --ocr")?;

    if !args.delimiter.is_ascii() {
        anyhow::bail!("delimiter must be a single ASCII character");
    }

    let mut options = ExtractOptions {
        pages,
        delimiter: args.delimiter as u8,
        ..ExtractOptions::default()
    };
    options.align.row_tolerance = args.row_tolerance;
    options.ocr.mode = mode;
    options.ocr.dpi = args.dpi;
    options.ocr.page_timeout = Duration::from_secs(args.ocr_timeout);
    options.ocr.workers = args.ocr_workers;
    options.ocr.language.clone_from(&args.ocr_lang);
    let classifier = &mut options.classifier;
    classifier.stoplist.extend(args.stop_words.iter().cloned());
    classifier.not_approved_terms.extend(args.not_approved.iter().cloned());
    classifier.negative_marks.extend(args.negative_marks.iter().cloned());
    classifier.major_minor_terms.extend(args.major_minor_terms.iter().cloned());
    classifier.elective_terms.extend(args.elective_terms.iter().cloned());
    Ok(options)
}

#[derive(Serialize)]
struct DocumentDiagnostics<'a> {
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<&'a Header>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<&'a Diagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn write_diagnostics(path: &Path, results: &[(PathBuf, Result<Extraction, ExtractError>)]) -> Result<()> {
    let entries = results
        .iter()
        .map(|(input, result)| match result {
            Ok(extraction) => DocumentDiagnostics {
                input: input.display().to_string(),
                header: Some(&extraction.header),
                diagnostics: Some(&extraction.diagnostics),
                error: None,
            },
            Err(error) => DocumentDiagnostics {
                input: input.display().to_string(),
                header: None,
                diagnostics: None,
                error: Some(error.to_string()),
            },
        })
        .collect::<Vec<_>>();
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create diagnostics file '{}'", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &entries).context("failed to write diagnostics")?;
    Ok(())
}

fn log_extraction(input: &Path, extraction: &Extraction, verbose: bool) {
    let warnings = &extraction.diagnostics.warnings;
    if warnings.is_empty() {
        return;
    }

    eprintln!("warning: {}: {} issue(s) detected", input.display(), warnings.len());
    if verbose {
        for warning in warnings {
            eprintln!(
                "  - {:?} page={:?} y={:?}: {}",
                warning.code, warning.page, warning.anchor_y, warning.message
            );
        }
    }
}

struct RunSummary {
    records: usize,
    failures: usize,
}

fn run_extract(args: &ExtractArgs) -> Result<RunSummary> {
    let options = parse_options(args)?;
    let extractor = CafExtractor::new(options).context("invalid extraction options")?;

    let results = args
        .inputs
        .par_iter()
        .map(|input| (input.clone(), extractor.extract_path(input)))
        .collect::<Vec<_>>();

    let mut failures = 0;
    for (input, result) in &results {
        match result {
            Ok(extraction) => log_extraction(input, extraction, args.verbose),
            Err(error) => {
                failures += 1;
                eprintln!("error: failed to extract '{}': {error}", input.display());
            }
        }
    }

    let records = results
        .iter()
        .filter_map(|(_, result)| result.as_ref().ok())
        .flat_map(Extraction::records);
    let records = write_records_to_path(&args.output, records, extractor.options().delimiter)
        .with_context(|| format!("failed to write '{}'", args.output.display()))?;

    if let Some(path) = &args.diagnostics {
        write_diagnostics(path, &results)?;
    }

    Ok(RunSummary { records, failures })
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("caf_extract=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Extract(args) => match run_extract(&args) {
            Ok(summary) if summary.failures > 0 => ExitCode::from(1),
            Ok(summary) if summary.records > 0 => ExitCode::SUCCESS,
            Ok(_) => ExitCode::from(2),
            Err(error) => {
                eprintln!("error: {error:#}");
                ExitCode::from(1)
            }
        },
    }
}
