use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::align::RowAligner;
use crate::assemble::AnalyzedRow;
use crate::classify::ApprovalClassifier;
use crate::course_code::{CourseCodeParser, RowParse};
use crate::diagnostics::{Diagnostics, OcrStatus, PageDiagnostics, UnparsedRow};
use crate::document::SourceDocument;
use crate::error::ExtractError;
use crate::header::{Header, infer_header};
use crate::model::{CourseRecord, Fragment, RawField, Row, Tier};
use crate::options::{ExtractOptions, OcrMode};
use crate::tiers::{
    ExtractionTier, FormFieldTier, LopdfTextLayer, OcrTier, PageContext, PdftoppmRasterizer, TesseractRecognizer,
    TextLayerTier,
};
use crate::warning::{ExtractWarning, WarningCode};

/// The result of reading one document. Holds no reference to the document,
/// so [`Extraction::records`] can be iterated as often as needed.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub header: Header,
    pub rows: Vec<AnalyzedRow>,
    pub diagnostics: Diagnostics,
}

impl Extraction {
    /// Course records in page order, top to bottom. Built on demand.
    pub fn records(&self) -> impl Iterator<Item = CourseRecord> + '_ {
        self.rows.iter().filter_map(|row| row.to_record(&self.header))
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.rows.iter().filter(|row| row.emits_record()).count()
    }
}

/// Runs the tiers in order, then aligns, parses, classifies and assembles.
/// Holds configuration only; every call works on fresh per-document state.
pub struct CafExtractor {
    options: ExtractOptions,
    tiers: Vec<Box<dyn ExtractionTier>>,
    parser: CourseCodeParser,
    classifier: ApprovalClassifier,
}

impl CafExtractor {
    pub fn new(options: ExtractOptions) -> Result<Self, ExtractError> {
        let tiers = default_tiers(&options);
        Self::with_tiers(options, tiers)
    }

    /// Uses a custom tier list. Tiers run in the given order and are expected
    /// to be listed from most to least reliable.
    pub fn with_tiers(options: ExtractOptions, tiers: Vec<Box<dyn ExtractionTier>>) -> Result<Self, ExtractError> {
        options.validate().map_err(ExtractError::InvalidOption)?;
        Ok(Self {
            classifier: ApprovalClassifier::new(&options.classifier),
            parser: CourseCodeParser::new(),
            options,
            tiers,
        })
    }

    #[must_use]
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub fn extract_path(&self, input_pdf: &Path) -> Result<Extraction, ExtractError> {
        let document = SourceDocument::open(input_pdf, self.options.pages.as_ref())?;
        Ok(self.extract_document(&document))
    }

    pub fn extract_bytes(&self, input_pdf: &[u8]) -> Result<Extraction, ExtractError> {
        let document = SourceDocument::from_bytes(input_pdf, self.options.pages.as_ref())?;
        Ok(self.extract_document(&document))
    }

    /// Never fails: every per-page and per-row problem ends up in the
    /// diagnostics.
    #[must_use]
    pub fn extract_document(&self, document: &SourceDocument) -> Extraction {
        let page_numbers = document.page_numbers();
        let mut diagnostics = Diagnostics {
            pages: page_numbers.iter().copied().map(PageDiagnostics::new).collect(),
            ..Diagnostics::default()
        };

        let collected = self.run_tiers(document, &page_numbers, &mut diagnostics);
        let text_fragments = collected
            .fragments
            .iter()
            .filter(|fragment| fragment.tier == Tier::TextLayer)
            .cloned()
            .collect::<Vec<_>>();
        let header = infer_header(&collected.fields, &text_fragments);

        diagnostics.tiers_used = Tier::ALL
            .into_iter()
            .filter(|tier| collected.fragments.iter().any(|f| f.tier == *tier))
            .collect();
        for page in &diagnostics.pages {
            if page.total_fragments() == 0 {
                diagnostics.warnings.push(
                    ExtractWarning::new(WarningCode::EmptyPage, "no tier produced any text for this page")
                        .with_page(page.page),
                );
            }
        }

        let aligner = RowAligner::new(&self.options.align, &self.parser);
        let rows = aligner
            .align(collected.fragments, document.pages())
            .into_iter()
            .map(|row| self.analyze(row, &mut diagnostics))
            .collect::<Vec<_>>();

        let mut extraction = Extraction {
            header,
            rows,
            diagnostics,
        };
        let records = extraction.record_count();
        if records == 0 {
            extraction.diagnostics.warnings.push(ExtractWarning::new(
                WarningCode::NoCoursesDetected,
                "no course rows were recognized in the selected pages",
            ));
        }
        info!(pages = page_numbers.len(), records, "document extracted");
        extraction
    }

    fn run_tiers(&self, document: &SourceDocument, page_numbers: &[u32], diagnostics: &mut Diagnostics) -> Collected {
        let mut by_page: BTreeMap<u32, Vec<Fragment>> = BTreeMap::new();
        let mut fields = Vec::new();
        let mut seq = 0;

        for tier in &self.tiers {
            let kind = tier.tier();
            let wanted = page_numbers
                .iter()
                .copied()
                .filter(|page| {
                    let fragments = by_page.get(page).map_or(&[][..], Vec::as_slice);
                    tier.wants_page(&PageContext {
                        page: *page,
                        fragments,
                        classifier: &self.classifier,
                    })
                })
                .collect::<Vec<_>>();

            if kind == Tier::Ocr {
                for page in page_numbers.iter().filter(|page| !wanted.contains(page)) {
                    if let Some(entry) = diagnostics.page_mut(*page) {
                        entry.ocr = OcrStatus::NotNeeded;
                    }
                }
            }
            debug!(tier = %kind, pages = wanted.len(), "running tier");
            if wanted.is_empty() {
                continue;
            }

            let output = tier.extract(document, &wanted);
            for mut fragment in output.fragments {
                if !wanted.contains(&fragment.page) {
                    continue;
                }
                fragment.seq = seq;
                seq += 1;
                if let Some(entry) = diagnostics.page_mut(fragment.page) {
                    entry.add_fragments(kind, 1);
                }
                by_page.entry(fragment.page).or_default().push(fragment);
            }
            fields.extend(output.fields);
            diagnostics.warnings.extend(output.warnings);
            for (page, status) in output.ocr_events {
                if let Some(entry) = diagnostics.page_mut(page) {
                    entry.ocr = status;
                }
            }
        }

        let mut fragments = by_page.into_values().flatten().collect::<Vec<_>>();
        fragments.sort_by_key(|fragment| fragment.seq);
        Collected { fragments, fields }
    }

    fn analyze(&self, row: Row, diagnostics: &mut Diagnostics) -> AnalyzedRow {
        let parse = self.parser.parse_row(&row);
        let evidence = row.all_fragments().collect::<Vec<_>>();
        let verdict = self.classifier.classify(&evidence);

        if let Some(page) = diagnostics.page_mut(row.page) {
            page.rows += 1;
            match &parse {
                RowParse::Parsed(_) => {}
                RowParse::Excluded(_) => page.excluded_rows += 1,
                RowParse::Unparsed { .. } => page.unparsed_rows += 1,
            }
        }

        match &parse {
            RowParse::Parsed(_) => {}
            RowParse::Excluded(pattern) => diagnostics.unparsed_rows.push(UnparsedRow {
                page: row.page,
                anchor_y: row.anchor_y,
                text: row.text(),
                excluded_by: Some(*pattern),
            }),
            RowParse::Unparsed { course_text } => {
                diagnostics.unparsed_rows.push(UnparsedRow {
                    page: row.page,
                    anchor_y: row.anchor_y,
                    text: row.text(),
                    excluded_by: None,
                });
                if let Some(title) = course_text {
                    diagnostics.warnings.push(
                        ExtractWarning::new(
                            WarningCode::UnparsedRow,
                            format!("no course code recognized in '{title}'; kept with title only"),
                        )
                        .with_page(row.page)
                        .with_anchor_y(row.anchor_y),
                    );
                }
            }
        }

        AnalyzedRow { row, parse, verdict }
    }
}

struct Collected {
    fragments: Vec<Fragment>,
    fields: Vec<RawField>,
}

/// Form fields, then the text layer, then OCR unless it is switched off.
#[must_use]
pub fn default_tiers(options: &ExtractOptions) -> Vec<Box<dyn ExtractionTier>> {
    let mut tiers: Vec<Box<dyn ExtractionTier>> = vec![
        Box::new(FormFieldTier::default()),
        Box::new(TextLayerTier::new(Box::new(LopdfTextLayer::new(options.align.clone())))),
    ];
    if options.ocr.mode != OcrMode::Off {
        tiers.push(Box::new(OcrTier::new(
            Arc::new(PdftoppmRasterizer::new(options.ocr.page_timeout)),
            Arc::new(TesseractRecognizer::new(&options.ocr, options.align.column_gap)),
            options.ocr.clone(),
        )));
    }
    tiers
}
