//! Side output describing how a document was read. Never influences the
//! records themselves.

use serde::Serialize;

use crate::model::Tier;
use crate::warning::ExtractWarning;

/// What happened with OCR on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OcrStatus {
    /// OCR is switched off.
    #[default]
    Disabled,
    /// Earlier tiers already found an approval indicator.
    NotNeeded,
    Completed {
        fragments: usize,
    },
    TimedOut,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct PageDiagnostics {
    pub page: u32,
    pub form_field_fragments: usize,
    pub text_layer_fragments: usize,
    pub ocr_fragments: usize,
    pub rows: usize,
    pub unparsed_rows: usize,
    pub excluded_rows: usize,
    pub ocr: OcrStatus,
}

impl PageDiagnostics {
    #[must_use]
    pub fn new(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    pub(crate) fn add_fragments(&mut self, tier: Tier, count: usize) {
        match tier {
            Tier::FormField => self.form_field_fragments += count,
            Tier::TextLayer => self.text_layer_fragments += count,
            Tier::Ocr => self.ocr_fragments += count,
        }
    }

    #[must_use]
    pub fn fragments(&self, tier: Tier) -> usize {
        match tier {
            Tier::FormField => self.form_field_fragments,
            Tier::TextLayer => self.text_layer_fragments,
            Tier::Ocr => self.ocr_fragments,
        }
    }

    #[must_use]
    pub fn total_fragments(&self) -> usize {
        Tier::ALL.iter().map(|tier| self.fragments(*tier)).sum()
    }
}

/// A row that produced no course record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnparsedRow {
    pub page: u32,
    pub anchor_y: f32,
    pub text: String,
    /// The boilerplate pattern that excluded the row, if that is why it was dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_by: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Diagnostics {
    pub pages: Vec<PageDiagnostics>,
    /// Tiers that contributed at least one fragment.
    pub tiers_used: Vec<Tier>,
    pub unparsed_rows: Vec<UnparsedRow>,
    pub warnings: Vec<ExtractWarning>,
}

impl Diagnostics {
    #[must_use]
    pub fn page(&self, page: u32) -> Option<&PageDiagnostics> {
        self.pages.iter().find(|entry| entry.page == page)
    }

    pub(crate) fn page_mut(&mut self, page: u32) -> Option<&mut PageDiagnostics> {
        self.pages.iter_mut().find(|entry| entry.page == page)
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.pages.iter().map(|page| page.rows).sum()
    }
}
