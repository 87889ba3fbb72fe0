//! Extraction tiers. Each tier turns a document into [`Fragment`]s of one
//! uniform shape; the pipeline runs them as an ordered list, most reliable
//! first, and asks every tier which pages it still needs to look at.

pub mod form_fields;
pub mod ocr;
pub mod tesseract;
pub mod text_layer;

use crate::classify::ApprovalClassifier;
use crate::diagnostics::OcrStatus;
use crate::document::SourceDocument;
use crate::model::{Fragment, RawField, Tier};
use crate::warning::ExtractWarning;

pub use form_fields::{FormFieldSource, FormFieldTier, LopdfFormFields};
pub use ocr::{OcrTier, PageImage, PixelBox, Rasterizer, RecognizedText, Recognizer};
pub use tesseract::{PdftoppmRasterizer, TesseractRecognizer};
pub use text_layer::{LopdfTextLayer, TextLayerSource, TextLayerTier};

/// What a tier sees when deciding whether to run on a page.
pub struct PageContext<'a> {
    pub page: u32,
    /// Fragments collected for this page by the tiers that already ran.
    pub fragments: &'a [Fragment],
    pub classifier: &'a ApprovalClassifier,
}

#[derive(Debug, Default)]
pub struct TierOutput {
    pub fragments: Vec<Fragment>,
    /// Every named field value, placed or not; used for header inference.
    pub fields: Vec<RawField>,
    pub warnings: Vec<ExtractWarning>,
    pub ocr_events: Vec<(u32, OcrStatus)>,
}

pub trait ExtractionTier: Send + Sync {
    fn tier(&self) -> Tier;

    /// Whether this tier should run on a page. Pages answered `false` are
    /// skipped, which is how the expensive tiers are kept off pages that are
    /// already resolved.
    fn wants_page(&self, _context: &PageContext<'_>) -> bool {
        true
    }

    /// Extracts fragments for the given pages. Per-page problems are reported
    /// in the output, never as errors.
    fn extract(&self, document: &SourceDocument, pages: &[u32]) -> TierOutput;
}
