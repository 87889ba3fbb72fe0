use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

/// When the OCR tier runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// Only on pages where the form-field and text-layer tiers found no
    /// approval indicator.
    Auto,
    Off,
    /// On every selected page.
    Force,
}

impl FromStr for OcrMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "off" | "none" => Ok(Self::Off),
            "force" | "always" => Ok(Self::Force),
            other => Err(format!("unknown OCR mode '{other}', expected auto|off|force")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection {
    pages: BTreeSet<u32>,
}

impl PageSelection {
    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl FromStr for PageSelection {
    type Err = String;

    fn from_str(selection: &str) -> Result<Self, Self::Err> {
        let mut pages = BTreeSet::new();
        for token in selection.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some((start, end)) = token.split_once('-') {
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range start: '{start}'"))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range end: '{end}'"))?;
                if start == 0 || end == 0 {
                    return Err("pages are 1-based".to_string());
                }
                if end < start {
                    return Err(format!(
                        "invalid range '{token}': end is smaller than start"
                    ));
                }
                pages.extend(start..=end);
            } else {
                let page: u32 = token
                    .parse()
                    .map_err(|_| format!("invalid page number: '{token}'"))?;
                if page == 0 {
                    return Err("pages are 1-based".to_string());
                }
                pages.insert(page);
            }
        }

        if pages.is_empty() {
            return Err("page selection cannot be empty".to_string());
        }

        Ok(Self { pages })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrOptions {
    pub mode: OcrMode,
    pub dpi: u32,
    pub page_timeout: Duration,
    pub workers: usize,
    pub language: String,
    /// Tesseract word confidence (0-100) below which words are dropped.
    pub min_confidence: f32,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            mode: OcrMode::Auto,
            dpi: 300,
            page_timeout: Duration::from_secs(60),
            workers: 2,
            language: "eng".to_string(),
            min_confidence: 30.0,
        }
    }
}

/// Geometry tolerances, all in PDF points unless noted.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignOptions {
    /// Δy: fragments whose vertical centres differ by at most this much share a row.
    pub row_tolerance: f32,
    /// Extra window used when attaching OCR fragments, whose boxes are approximate.
    pub ocr_tolerance: f32,
    /// Relative page offset (0..1) within which clusters on adjacent pages are
    /// considered continuations of each other.
    pub continuation_tolerance: f32,
    /// Horizontal gap that splits a text line into separate cells.
    pub column_gap: f32,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            row_tolerance: 3.0,
            ocr_tolerance: 8.0,
            continuation_tolerance: 0.02,
            column_gap: 12.0,
        }
    }
}

pub const DEFAULT_STOPLIST: &[&str] = &[
    "", "yes", "y", "no", "n", "none", "approved", "denied", "n/a", "na", "ok", "x",
    "general credit", "elective", "major", "minor", "signature", "date", "initials",
];

pub const DEFAULT_NOT_APPROVED: &[&str] = &["not approved", "denied", "rejected"];

/// Typed approval-field values that mean "not given".
pub const DEFAULT_NEGATIVE_MARKS: &[&str] = &["", "no", "n", "none", "n/a", "na", "general credit"];

/// Approver initials that mark a major/minor approval in comments.
pub const DEFAULT_MAJOR_MINOR_TERMS: &[&str] = &["major", "minor", "ppd", "gon", "pac"];

pub const DEFAULT_ELECTIVE_TERMS: &[&str] = &["elective"];

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOptions {
    /// Values that never count as a signature (compared case-insensitively).
    pub stoplist: Vec<String>,
    pub not_approved_terms: Vec<String>,
    /// Values of elective or major/minor approval fields that are not an
    /// approval. Anything else typed there counts.
    pub negative_marks: Vec<String>,
    /// Whole words in a comment that mark a major/minor approval.
    pub major_minor_terms: Vec<String>,
    /// Whole words in a comment that mark an elective approval.
    pub elective_terms: Vec<String>,
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            stoplist: owned(DEFAULT_STOPLIST),
            not_approved_terms: owned(DEFAULT_NOT_APPROVED),
            negative_marks: owned(DEFAULT_NEGATIVE_MARKS),
            major_minor_terms: owned(DEFAULT_MAJOR_MINOR_TERMS),
            elective_terms: owned(DEFAULT_ELECTIVE_TERMS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub pages: Option<PageSelection>,
    pub delimiter: u8,
    pub align: AlignOptions,
    pub ocr: OcrOptions,
    pub classifier: ClassifierOptions,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            pages: None,
            delimiter: b',',
            align: AlignOptions::default(),
            ocr: OcrOptions::default(),
            classifier: ClassifierOptions::default(),
        }
    }
}

impl ExtractOptions {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.delimiter.is_ascii() || self.delimiter == b'"' {
            return Err("delimiter must be a single ASCII character other than '\"'".to_string());
        }
        if !(self.align.row_tolerance >= 0.0 && self.align.row_tolerance.is_finite()) {
            return Err("row tolerance must be a non-negative number".to_string());
        }
        if !(0.0..=1.0).contains(&self.align.continuation_tolerance) {
            return Err("continuation tolerance must be between 0 and 1".to_string());
        }
        if self.ocr.dpi < 72 || self.ocr.dpi > 1200 {
            return Err(format!("OCR DPI {} is outside 72..=1200", self.ocr.dpi));
        }
        if self.ocr.workers == 0 {
            return Err("OCR worker count must be at least 1".to_string());
        }
        Ok(())
    }
}
