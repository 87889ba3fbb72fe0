use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::document::{SourceDocument, norm_space, object_text, rect_from_object, resolve, resolve_dict};
use crate::model::{Bounds, Fragment, RawField, Tier};
use crate::tiers::{ExtractionTier, TierOutput};
use crate::warning::{ExtractWarning, WarningCode};

const MAX_FIELD_DEPTH: usize = 16;

/// Source of AcroForm values. An empty result is a normal outcome for
/// documents without a form.
pub trait FormFieldSource: Send + Sync {
    fn list_fields(&self, document: &SourceDocument) -> Vec<RawField>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfFormFields;

impl FormFieldSource for LopdfFormFields {
    fn list_fields(&self, document: &SourceDocument) -> Vec<RawField> {
        let pdf = document.lopdf();
        let Some(fields) = acroform_fields(pdf) else {
            return Vec::new();
        };

        let widget_pages = widget_page_map(document);
        let mut walker = FieldWalker {
            document,
            widget_pages: &widget_pages,
            out: Vec::new(),
        };
        for field in fields {
            walker.walk(field, "", None, 0);
        }
        walker.out
    }
}

fn acroform_fields(pdf: &Document) -> Option<&Vec<Object>> {
    let root = pdf.trailer.get(b"Root").ok()?;
    let catalog = resolve_dict(pdf, root)?;
    let acroform = resolve_dict(pdf, catalog.get(b"AcroForm").ok()?)?;
    resolve(pdf, acroform.get(b"Fields").ok()?).as_array().ok()
}

/// Widget annotation id to page number, from every page's `/Annots`.
fn widget_page_map(document: &SourceDocument) -> HashMap<ObjectId, u32> {
    let pdf = document.lopdf();
    let mut map = HashMap::new();
    for (number, page_id) in pdf.get_pages() {
        let Ok(page) = pdf.get_dictionary(page_id) else {
            continue;
        };
        let Some(annots) = page
            .get(b"Annots")
            .ok()
            .and_then(|annots| resolve(pdf, annots).as_array().ok())
        else {
            continue;
        };
        for annot in annots {
            if let Ok(id) = annot.as_reference() {
                map.insert(id, number);
            }
        }
    }
    map
}

struct FieldWalker<'a> {
    document: &'a SourceDocument,
    widget_pages: &'a HashMap<ObjectId, u32>,
    out: Vec<RawField>,
}

impl FieldWalker<'_> {
    fn walk(&mut self, object: &Object, parent_name: &str, inherited: Option<String>, depth: usize) {
        if depth > MAX_FIELD_DEPTH {
            return;
        }
        let document = self.document;
        let pdf = document.lopdf();
        let object_id = object.as_reference().ok();
        let Some(field) = resolve_dict(pdf, object) else {
            return;
        };

        let partial = field
            .get(b"T")
            .ok()
            .and_then(|name| object_text(pdf, name))
            .map(|name| name.trim().to_string());
        let name = match (&partial, parent_name.is_empty()) {
            (Some(partial), true) => partial.clone(),
            (Some(partial), false) => format!("{parent_name}.{partial}"),
            (None, _) => parent_name.to_string(),
        };
        let value = field
            .get(b"V")
            .ok()
            .and_then(|value| object_text(pdf, value))
            .or(inherited);

        let kids = field
            .get(b"Kids")
            .ok()
            .and_then(|kids| resolve(pdf, kids).as_array().ok());

        match kids {
            Some(kids) if !kids.is_empty() => {
                for kid in kids {
                    let kid_is_field = resolve_dict(pdf, kid).is_some_and(|kid| kid.has(b"T"));
                    if kid_is_field {
                        self.walk(kid, &name, value.clone(), depth + 1);
                    } else {
                        let widget_id = kid.as_reference().ok();
                        if let Some(widget) = resolve_dict(pdf, kid) {
                            self.push(&name, value.as_deref(), widget, widget_id);
                        }
                    }
                }
            }
            _ => self.push(&name, value.as_deref(), field, object_id),
        }
    }

    fn push(&mut self, name: &str, value: Option<&str>, widget: &Dictionary, widget_id: Option<ObjectId>) {
        let value = norm_space(value.unwrap_or_default());
        if name.is_empty() || value.is_empty() {
            return;
        }

        let document = self.document;
        let pdf = document.lopdf();
        let page_number = widget
            .get(b"P")
            .ok()
            .and_then(|page| page.as_reference().ok())
            .and_then(|page_id| document.page_number_of(page_id))
            .or_else(|| widget_id.and_then(|id| self.widget_pages.get(&id).copied()));

        let placed = page_number.and_then(|number| document.page(number));
        let bounds = placed.and_then(|page| {
            let [x0, y0, x1, y1] = widget.get(b"Rect").ok().and_then(|rect| rect_from_object(pdf, rect))?;
            let top = page.height - y0.max(y1);
            Some(Bounds::new(x0.min(x1), top, (x1 - x0).abs(), (y1 - y0).abs()))
        });

        // Fields on unselected pages are dropped; fields with no widget at all
        // still feed header inference.
        let page = match (page_number, placed) {
            (Some(_), Some(page)) => page.number,
            (Some(_), None) => return,
            (None, _) => document.pages().first().map_or(1, |page| page.number),
        };

        self.out.push(RawField {
            field_name: name.to_string(),
            value,
            page,
            bounds,
        });
    }
}

/// Tier 1: AcroForm field values.
pub struct FormFieldTier {
    source: Box<dyn FormFieldSource>,
}

impl FormFieldTier {
    #[must_use]
    pub fn new(source: Box<dyn FormFieldSource>) -> Self {
        Self { source }
    }
}

impl Default for FormFieldTier {
    fn default() -> Self {
        Self::new(Box::new(LopdfFormFields))
    }
}

impl ExtractionTier for FormFieldTier {
    fn tier(&self) -> Tier {
        Tier::FormField
    }

    fn extract(&self, document: &SourceDocument, pages: &[u32]) -> TierOutput {
        let fields = self
            .source
            .list_fields(document)
            .into_iter()
            .filter(|field| pages.contains(&field.page))
            .collect::<Vec<_>>();
        debug!(count = fields.len(), "form fields extracted");

        let mut output = TierOutput::default();
        if fields.is_empty() {
            output.warnings.push(ExtractWarning::new(
                WarningCode::NoFormFields,
                "document has no filled form fields",
            ));
        }
        output.fragments = fields.iter().cloned().filter_map(Fragment::from_field).collect();
        output.fields = fields;
        output
    }
}
