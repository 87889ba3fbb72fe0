use std::collections::BTreeMap;
use std::sync::OnceLock;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use crate::document::{
    PageInfo, SourceDocument, decode_pdf_bytes, norm_space, number, rect_from_object, resolve,
    resolve_dict,
};
use crate::model::{Bounds, Fragment, TextRun, Tier};
use crate::options::AlignOptions;
use crate::tiers::{ExtractionTier, TierOutput};
use crate::warning::{ExtractWarning, WarningCode};

/// Average glyph advance as a fraction of the font size; the text layer has
/// no font metrics.
const GLYPH_ADVANCE: f32 = 0.5;
const APPROXIMATE_LINE_PITCH: f32 = 14.0;
const APPROXIMATE_TOP_MARGIN: f32 = 36.0;

/// Source of positioned text runs for one page, in reading order.
pub trait TextLayerSource: Send + Sync {
    fn extract_text(&self, document: &SourceDocument, page: u32) -> Vec<TextRun>;
}

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn multiply(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// A glyph run in PDF user space (origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
struct GlyphRun {
    text: String,
    x: f32,
    baseline: f32,
    size: f32,
    width: f32,
}

struct TextState<'a> {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f32,
    leading: f32,
    encoding: Option<&'a str>,
    runs: Vec<GlyphRun>,
}

impl<'a> TextState<'a> {
    fn new() -> Self {
        Self {
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            font_size: 12.0,
            leading: 0.0,
            encoding: None,
            runs: Vec::new(),
        }
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply(&translate(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    fn show(&mut self, operands: &[Object]) {
        let start = multiply(&self.tm, &self.ctm);
        let scale = start[2].hypot(start[3]).max(f32::EPSILON);
        let mut text = String::new();
        let mut advance = 0.0_f32;

        for operand in operands {
            match operand {
                Object::String(bytes, _) => {
                    let decoded = decode_pdf_bytes(self.encoding, bytes);
                    advance += count_chars(&decoded) * GLYPH_ADVANCE * self.font_size;
                    text.push_str(&decoded);
                }
                Object::Array(items) => {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => {
                                let decoded = decode_pdf_bytes(self.encoding, bytes);
                                advance += count_chars(&decoded) * GLYPH_ADVANCE * self.font_size;
                                text.push_str(&decoded);
                            }
                            other => {
                                if let Some(adjust) = number(other) {
                                    if adjust < -100.0 {
                                        text.push(' ');
                                    }
                                    advance -= adjust / 1000.0 * self.font_size;
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if !text.trim().is_empty() {
            self.runs.push(GlyphRun {
                text,
                x: start[4],
                baseline: start[5],
                size: self.font_size * scale,
                width: advance * scale,
            });
        }
        self.tm = multiply(&translate(advance, 0.0), &self.tm);
    }
}

#[allow(clippy::cast_precision_loss)]
fn count_chars(text: &str) -> f32 {
    text.chars().count() as f32
}

fn operand_numbers(operands: &[Object]) -> Vec<f32> {
    operands.iter().filter_map(number).collect()
}

fn page_glyph_runs(document: &Document, page_id: ObjectId) -> Vec<GlyphRun> {
    let Ok(raw_content) = document.get_page_content(page_id) else {
        return Vec::new();
    };
    let Ok(content) = Content::decode(&raw_content) else {
        return Vec::new();
    };
    let encodings = document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, font.get_font_encoding()))
        .collect::<BTreeMap<Vec<u8>, &str>>();

    let mut state = TextState::new();
    for operation in &content.operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => {
                if let Some(ctm) = state.ctm_stack.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let [a, b, c, d, e, f] = operand_numbers(operands)[..] {
                    state.ctm = multiply(&[a, b, c, d, e, f], &state.ctm);
                }
            }
            "BT" => {
                state.tm = IDENTITY;
                state.tlm = IDENTITY;
            }
            "Tf" => {
                if let Some(font_name) = operands.first().and_then(|operand| operand.as_name().ok()) {
                    state.encoding = encodings.get(font_name).copied();
                }
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    state.leading = leading;
                }
            }
            "Td" => {
                if let [tx, ty] = operand_numbers(operands)[..] {
                    state.next_line(tx, ty);
                }
            }
            "TD" => {
                if let [tx, ty] = operand_numbers(operands)[..] {
                    state.leading = -ty;
                    state.next_line(tx, ty);
                }
            }
            "Tm" => {
                if let [a, b, c, d, e, f] = operand_numbers(operands)[..] {
                    state.tlm = [a, b, c, d, e, f];
                    state.tm = state.tlm;
                }
            }
            "T*" => {
                let leading = state.leading;
                state.next_line(0.0, -leading);
            }
            "Tj" | "TJ" => state.show(operands),
            "'" => {
                let leading = state.leading;
                state.next_line(0.0, -leading);
                state.show(operands);
            }
            "\"" => {
                let leading = state.leading;
                state.next_line(0.0, -leading);
                state.show(operands.get(2..).unwrap_or_default());
            }
            _ => {}
        }
    }
    state.runs
}

/// Groups glyph runs into lines by y band, then splits each line into cells
/// at horizontal gaps wider than the column gap.
fn runs_to_cells(page: &PageInfo, runs: Vec<GlyphRun>, options: &AlignOptions) -> Vec<TextRun> {
    let mut placed = runs
        .into_iter()
        .map(|run| {
            let height = run.size.max(1.0);
            let top = page.height - run.baseline - height * 0.8;
            (run.text, Bounds::new(run.x, top, run.width, height))
        })
        .collect::<Vec<_>>();
    placed.sort_by(|a, b| {
        a.1.center_y()
            .total_cmp(&b.1.center_y())
            .then(a.1.x.total_cmp(&b.1.x))
    });

    let mut lines: Vec<(f32, Vec<(String, Bounds)>)> = Vec::new();
    for (text, bounds) in placed {
        match lines.last_mut() {
            Some((anchor, members)) if (bounds.center_y() - *anchor).abs() <= options.row_tolerance => {
                members.push((text, bounds));
            }
            _ => lines.push((bounds.center_y(), vec![(text, bounds)])),
        }
    }

    let mut cells = Vec::new();
    for (_, mut members) in lines {
        members.sort_by(|a, b| a.1.x.total_cmp(&b.1.x));
        let mut current: Option<(String, Bounds)> = None;
        for (text, bounds) in members {
            current = match current {
                Some((mut joined, joined_bounds))
                    if bounds.x - joined_bounds.right() <= options.column_gap =>
                {
                    let gap = bounds.x - joined_bounds.right();
                    if gap > bounds.height * 0.15 && !joined.ends_with(' ') {
                        joined.push(' ');
                    }
                    joined.push_str(&text);
                    Some((joined, joined_bounds.union(&bounds)))
                }
                Some(finished) => {
                    push_cell(&mut cells, page.number, finished);
                    Some((text, bounds))
                }
                None => Some((text, bounds)),
            };
        }
        if let Some(finished) = current {
            push_cell(&mut cells, page.number, finished);
        }
    }
    cells
}

fn push_cell(cells: &mut Vec<TextRun>, page: u32, (text, bounds): (String, Bounds)) {
    let text = norm_space(&text);
    if !text.is_empty() {
        cells.push(TextRun { text, page, bounds });
    }
}

/// URI link annotations, so course and syllabus links survive even when the
/// visible text is just "Link to course description".
fn link_runs(document: &Document, page: &PageInfo) -> Vec<TextRun> {
    let Some(annots) = document
        .get_dictionary(page.id)
        .ok()
        .and_then(|dictionary| dictionary.get(b"Annots").ok())
        .and_then(|annots| resolve(document, annots).as_array().ok())
    else {
        return Vec::new();
    };

    annots
        .iter()
        .filter_map(|annot| {
            let annot = resolve_dict(document, annot)?;
            if annot.get(b"Subtype").ok()?.as_name().ok()? != b"Link" {
                return None;
            }
            let action = resolve_dict(document, annot.get(b"A").ok()?)?;
            let uri = match resolve(document, action.get(b"URI").ok()?) {
                Object::String(bytes, _) => decode_pdf_bytes(None, bytes),
                _ => return None,
            };
            let [x0, y0, x1, y1] = rect_from_object(document, annot.get(b"Rect").ok()?)?;
            let top = page.height - y0.max(y1);
            Some(TextRun {
                text: uri.trim().to_string(),
                page: page.number,
                bounds: Bounds::new(x0.min(x1), top, (x1 - x0).abs(), (y1 - y0).abs()),
            })
        })
        .filter(|run| !run.text.is_empty())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct LopdfTextLayer {
    options: AlignOptions,
}

impl LopdfTextLayer {
    #[must_use]
    pub fn new(options: AlignOptions) -> Self {
        Self { options }
    }
}

impl TextLayerSource for LopdfTextLayer {
    fn extract_text(&self, document: &SourceDocument, page: u32) -> Vec<TextRun> {
        let Some(info) = document.page(page) else {
            return Vec::new();
        };
        let glyphs = page_glyph_runs(document.lopdf(), info.id);
        let mut runs = runs_to_cells(info, glyphs, &self.options);
        runs.extend(link_runs(document.lopdf(), info));
        runs
    }
}

fn split_text_into_pages(raw_text: &str) -> Vec<String> {
    let mut pages = raw_text
        .split('\u{000C}')
        .map(str::to_string)
        .collect::<Vec<_>>();
    if pages.last().is_some_and(String::is_empty) {
        pages.pop();
    }
    pages
}

/// Lines recovered without geometry, spaced evenly down the page.
#[allow(clippy::cast_precision_loss)]
fn approximate_runs(page: &PageInfo, text: &str) -> Vec<TextRun> {
    text.lines()
        .map(norm_space)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| TextRun {
            text: line,
            page: page.number,
            bounds: Bounds::new(
                0.0,
                APPROXIMATE_TOP_MARGIN + index as f32 * APPROXIMATE_LINE_PITCH,
                page.width,
                APPROXIMATE_LINE_PITCH * 0.8,
            ),
        })
        .collect()
}

/// Tier 2: the embedded text layer.
pub struct TextLayerTier {
    source: Box<dyn TextLayerSource>,
    approximate_fallback: bool,
}

impl TextLayerTier {
    #[must_use]
    pub fn new(source: Box<dyn TextLayerSource>) -> Self {
        Self {
            source,
            approximate_fallback: true,
        }
    }

    /// Disables the `pdf-extract` fallback for pages without positioned text.
    #[must_use]
    pub fn without_fallback(mut self) -> Self {
        self.approximate_fallback = false;
        self
    }
}

impl ExtractionTier for TextLayerTier {
    fn tier(&self) -> Tier {
        Tier::TextLayer
    }

    fn extract(&self, document: &SourceDocument, pages: &[u32]) -> TierOutput {
        let fallback_pages = OnceLock::new();
        let mut output = TierOutput::default();

        for &page in pages {
            let mut runs = self.source.extract_text(document, page);
            if runs.is_empty() && self.approximate_fallback {
                let whole = fallback_pages.get_or_init(|| {
                    pdf_extract::extract_text_from_mem(&document.bytes())
                        .ok()
                        .map(|text| split_text_into_pages(&text))
                });
                // pdf-extract reports every page of the file, selected or not.
                let total_pages = document.lopdf().get_pages().len();
                let index = usize::try_from(page).ok().and_then(|page| page.checked_sub(1));
                if let (Some(texts), Some(info)) = (whole, document.page(page))
                    && let Some(text) = index
                        .filter(|_| texts.len() == total_pages)
                        .and_then(|index| texts.get(index))
                {
                    runs = approximate_runs(info, text);
                    if !runs.is_empty() {
                        output.warnings.push(
                            ExtractWarning::new(
                                WarningCode::ApproximatePositions,
                                "text layer positions unavailable; lines were spaced evenly",
                            )
                            .with_page(page),
                        );
                    }
                }
            }

            debug!(page, runs = runs.len(), "text layer extracted");
            if runs.is_empty() {
                output.warnings.push(
                    ExtractWarning::new(WarningCode::NoTextLayer, "page has no text layer")
                        .with_page(page),
                );
            }
            output
                .fragments
                .extend(runs.into_iter().map(|run| Fragment::from_run(Tier::TextLayer, run)));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use lopdf::ObjectId;

    use super::{GlyphRun, approximate_runs, multiply, runs_to_cells, split_text_into_pages, translate};
    use crate::document::PageInfo;
    use crate::options::AlignOptions;

    fn page() -> PageInfo {
        PageInfo {
            number: 1,
            id: ObjectId::from((1, 0)),
            width: 612.0,
            height: 792.0,
        }
    }

    fn glyph(text: &str, x: f32, baseline: f32) -> GlyphRun {
        GlyphRun {
            text: text.to_string(),
            x,
            baseline,
            size: 10.0,
            width: text.chars().count() as f32 * 5.0,
        }
    }

    #[test]
    fn splits_form_feed_delimited_pages() {
        let pages = split_text_into_pages("p1\u{000C}p2\u{000C}");
        assert_eq!(pages, vec!["p1", "p2"]);
    }

    #[test]
    fn composes_translations() {
        let m = multiply(&translate(10.0, 5.0), &translate(50.0, 700.0));
        assert_eq!(m[4], 60.0);
        assert_eq!(m[5], 705.0);
    }

    #[test]
    fn groups_runs_on_the_same_baseline_into_cells() {
        let runs = vec![
            glyph("Corporate", 100.0, 600.0),
            glyph("BBLCO1221U", 40.0, 600.5),
            glyph("Finance", 147.0, 600.0),
            glyph("Erin Smith", 400.0, 601.0),
            glyph("Next line", 40.0, 580.0),
        ];
        let cells = runs_to_cells(&page(), runs, &AlignOptions::default());
        let texts = cells.iter().map(|cell| cell.text.as_str()).collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec!["BBLCO1221U Corporate Finance", "Erin Smith", "Next line"]
        );
        assert!(cells[1].bounds.y < cells[2].bounds.y);
    }

    #[test]
    fn approximate_runs_are_evenly_spaced() {
        let runs = approximate_runs(&page(), "first\n\nsecond\n");
        assert_eq!(runs.len(), 2);
        assert!(runs[1].bounds.y > runs[0].bounds.y);
    }
}
