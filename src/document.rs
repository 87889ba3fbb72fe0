use std::path::Path;
use std::sync::Arc;

use encoding_rs::{BIG5, UTF_16BE};
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::ExtractError;
use crate::options::PageSelection;

const DEFAULT_PAGE_WIDTH: f32 = 612.0;
const DEFAULT_PAGE_HEIGHT: f32 = 792.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    pub number: u32,
    pub id: ObjectId,
    pub width: f32,
    pub height: f32,
}

/// An opened PDF plus the raw bytes it came from. Construction is the only
/// place a document-level failure can happen.
pub struct SourceDocument {
    document: Document,
    bytes: Arc<[u8]>,
    pages: Vec<PageInfo>,
}

impl std::fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDocument")
            .field("bytes", &self.bytes.len())
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

impl SourceDocument {
    pub fn open(input_pdf: &Path, selection: Option<&PageSelection>) -> Result<Self, ExtractError> {
        let bytes = std::fs::read(input_pdf)?;
        Self::from_bytes(&bytes, selection)
    }

    pub fn from_bytes(
        input_pdf: &[u8],
        selection: Option<&PageSelection>,
    ) -> Result<Self, ExtractError> {
        let document = Document::load_mem(input_pdf)?;
        if document.is_encrypted() {
            return Err(ExtractError::Encrypted);
        }

        let all_pages = document.get_pages();
        if all_pages.is_empty() {
            return Err(ExtractError::EmptyDocument);
        }

        let pages = all_pages
            .iter()
            .filter(|(number, _)| selection.is_none_or(|selection| selection.contains(**number)))
            .map(|(&number, &id)| {
                let (width, height) = page_size(&document, id);
                PageInfo {
                    number,
                    id,
                    width,
                    height,
                }
            })
            .collect::<Vec<_>>();

        if pages.is_empty() {
            return Err(ExtractError::NoPagesSelected);
        }

        Ok(Self {
            document,
            bytes: Arc::from(input_pdf),
            pages,
        })
    }

    #[must_use]
    pub fn lopdf(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    /// Selected pages in document order.
    #[must_use]
    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    #[must_use]
    pub fn page(&self, number: u32) -> Option<&PageInfo> {
        self.pages.iter().find(|page| page.number == number)
    }

    #[must_use]
    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|page| page.number).collect()
    }

    /// Page number for a page object id, including unselected pages.
    #[must_use]
    pub fn page_number_of(&self, id: ObjectId) -> Option<u32> {
        self.document
            .get_pages()
            .into_iter()
            .find_map(|(number, page_id)| (page_id == id).then_some(number))
    }
}

fn page_size(document: &Document, page_id: ObjectId) -> (f32, f32) {
    inherited_attribute(document, page_id, b"MediaBox")
        .and_then(|object| rect_from_object(document, object))
        .map_or((DEFAULT_PAGE_WIDTH, DEFAULT_PAGE_HEIGHT), |[x0, y0, x1, y1]| {
            ((x1 - x0).abs(), (y1 - y0).abs())
        })
}

/// Looks up a page attribute, walking `/Parent` for inheritable keys.
pub(crate) fn inherited_attribute<'a>(
    document: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = document.get_dictionary(page_id).ok();
    let mut depth = 0;
    while let Some(dictionary) = current {
        if let Ok(value) = dictionary.get(key) {
            return Some(value);
        }
        depth += 1;
        if depth > 32 {
            return None;
        }
        current = dictionary
            .get(b"Parent")
            .ok()
            .and_then(|parent| parent.as_reference().ok())
            .and_then(|id| document.get_dictionary(id).ok());
    }
    None
}

pub(crate) fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

pub(crate) fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    resolve(document, object).as_dict().ok()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(crate) fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

pub(crate) fn rect_from_object(document: &Document, object: &Object) -> Option<[f32; 4]> {
    let items = resolve(document, object).as_array().ok()?;
    if items.len() != 4 {
        return None;
    }
    let mut out = [0.0_f32; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = number(resolve(document, item))?;
    }
    Some(out)
}

/// Collapses spaces and strips the invisible characters form fillers leave behind.
pub(crate) fn norm_space(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\u{200B}' | '\u{FEFF}' | '\u{00A0}' | '\t' | '\r' | '\n' => ' ',
            other => other,
        })
        .collect::<String>()
        .split(' ')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_decoding_broken(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }

    if text.contains("?Identity-H Unimplemented?") {
        return true;
    }

    let total = text.chars().count();
    let replacement = text.matches('\u{FFFD}').count();
    let control = text
        .chars()
        .filter(|ch| ch.is_control() && !matches!(ch, '\n' | '\r' | '\t'))
        .count();

    replacement * 8 > total || control * 5 > total
}

/// Decodes a PDF string operand or value, falling back to UTF-16 and Big5
/// when the encoding hint produces garbage.
pub(crate) fn decode_pdf_bytes(encoding: Option<&str>, bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (utf16, had_errors) = UTF_16BE.decode_without_bom_handling(&bytes[2..]);
        if !had_errors {
            return utf16.into_owned();
        }
    }

    let decoded = Document::decode_text(encoding, bytes);
    if !looks_decoding_broken(&decoded) {
        return decoded;
    }

    if let Some(name) = encoding {
        let lower = name.to_ascii_lowercase();

        if lower.contains("utf16")
            || lower.contains("ucs2")
            || lower.contains("identity-h")
            || lower.contains("unicode")
        {
            let (utf16, had_errors) = UTF_16BE.decode_without_bom_handling(bytes);
            if !had_errors && !utf16.is_empty() {
                return utf16.into_owned();
            }
        }

        if lower.contains("big5") || lower.contains("b5") || lower.contains("eten") {
            let (big5, _, had_errors) = BIG5.decode(bytes);
            if !had_errors && !big5.is_empty() {
                return big5.into_owned();
            }
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

/// Text value of a string or name object (checkbox states are names).
pub(crate) fn object_text(document: &Document, object: &Object) -> Option<String> {
    match resolve(document, object) {
        Object::String(bytes, _) => Some(decode_pdf_bytes(None, bytes)),
        Object::Name(name) => {
            let name = String::from_utf8_lossy(name).to_string();
            (name != "Off").then_some(name)
        }
        _ => None,
    }
}
