mod align;
mod assemble;
mod classify;
mod course_code;
mod csv_out;
mod diagnostics;
mod document;
mod error;
mod header;
mod model;
mod options;
mod pipeline;
pub mod tiers;
mod warning;

use std::path::Path;

pub use align::RowAligner;
pub use assemble::{AnalyzedRow, FieldRole, field_role};
pub use classify::{ApprovalClassifier, Verdict};
pub use course_code::{
    BOILERPLATE_PATTERNS, COURSE_RULES, Capture, CourseCodeParser, CourseRule, ParsedCourse, RowParse,
    clean_course_text,
};
pub use csv_out::{write_records, write_records_to_path, write_records_to_string};
pub use diagnostics::{Diagnostics, OcrStatus, PageDiagnostics, UnparsedRow};
pub use document::{PageInfo, SourceDocument};
pub use error::{ExtractError, OcrError};
pub use header::{Header, city_country, infer_header};
pub use model::{Bounds, Classification, CourseRecord, Fragment, RECORD_COLUMNS, RawField, Row, TextRun, Tier};
pub use options::{
    AlignOptions, ClassifierOptions, DEFAULT_ELECTIVE_TERMS, DEFAULT_MAJOR_MINOR_TERMS, DEFAULT_NEGATIVE_MARKS,
    DEFAULT_NOT_APPROVED, DEFAULT_STOPLIST, ExtractOptions, OcrMode, OcrOptions, PageSelection,
};
pub use pipeline::{CafExtractor, Extraction, default_tiers};
pub use warning::{ExtractWarning, WarningCode};

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    pub record_count: usize,
    pub row_count: usize,
    pub header: Header,
    pub diagnostics: Diagnostics,
}

impl ExtractionReport {
    fn from_extraction(extraction: Extraction) -> Self {
        Self {
            record_count: extraction.record_count(),
            row_count: extraction.rows.len(),
            header: extraction.header,
            diagnostics: extraction.diagnostics,
        }
    }

    #[must_use]
    pub fn warnings(&self) -> &[ExtractWarning] {
        &self.diagnostics.warnings
    }
}

pub fn extract_caf_to_csv(
    input_pdf: &Path,
    output_csv: &Path,
    options: &ExtractOptions,
) -> Result<ExtractionReport, ExtractError> {
    let extractor = CafExtractor::new(options.clone())?;
    let extraction = extractor.extract_path(input_pdf)?;
    write_records_to_path(output_csv, extraction.records(), options.delimiter)?;
    Ok(ExtractionReport::from_extraction(extraction))
}

pub fn extract_caf_bytes_to_csv_string(
    input_pdf: &[u8],
    options: &ExtractOptions,
) -> Result<(String, ExtractionReport), ExtractError> {
    let extractor = CafExtractor::new(options.clone())?;
    let extraction = extractor.extract_bytes(input_pdf)?;
    let csv = write_records_to_string(extraction.records(), options.delimiter)?;
    Ok((csv, ExtractionReport::from_extraction(extraction)))
}
