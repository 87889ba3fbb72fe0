#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use caf_extract::OcrError;
use caf_extract::tiers::{PageImage, PixelBox, Rasterizer, RecognizedText, Recognizer};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

pub const PAGE_WIDTH: i64 = 612;
pub const PAGE_HEIGHT: i64 = 792;
const FONT_SIZE: i64 = 10;

/// Everything positioned by its left edge and its vertical centre measured
/// from the top of the page, the convention the extractor reports in.
#[derive(Debug, Default, Clone)]
pub struct PageSpec {
    pub texts: Vec<(i64, i64, String)>,
    pub fields: Vec<FieldSpec>,
    pub links: Vec<(i64, i64, String)>,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub value: String,
    pub x: i64,
    pub center_y: i64,
    pub width: i64,
}

impl PageSpec {
    pub fn text(mut self, x: i64, center_y: i64, text: &str) -> Self {
        self.texts.push((x, center_y, text.to_string()));
        self
    }

    pub fn field(mut self, name: &str, value: &str, x: i64, center_y: i64, width: i64) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            value: value.to_string(),
            x,
            center_y,
            width,
        });
        self
    }

    pub fn link(mut self, x: i64, center_y: i64, url: &str) -> Self {
        self.links.push((x, center_y, url.to_string()));
        self
    }
}

fn rect(x: i64, center_y: i64, width: i64) -> Vec<Object> {
    let mid = PAGE_HEIGHT - center_y;
    vec![x.into(), (mid - 7).into(), (x + width).into(), (mid + 7).into()]
}

pub fn build_pdf(pages: &[PageSpec]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut page_ids = Vec::new();
    let mut field_ids = Vec::new();

    for page in pages {
        let page_id = doc.new_object_id();

        let mut operations = Vec::new();
        for (x, center_y, text) in &page.texts {
            // Baseline sits 0.3 em below the centre of the glyph box.
            let baseline = PAGE_HEIGHT - center_y - FONT_SIZE * 3 / 10;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]));
            operations.push(Operation::new("Td", vec![(*x).into(), baseline.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text.as_str())]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let mut annots: Vec<Object> = Vec::new();
        for field in &page.fields {
            let field_id = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Widget",
                "FT" => "Tx",
                "T" => Object::string_literal(field.name.as_str()),
                "V" => Object::string_literal(field.value.as_str()),
                "Rect" => rect(field.x, field.center_y, field.width),
                "P" => page_id,
            });
            annots.push(field_id.into());
            field_ids.push(field_id);
        }
        for (x, center_y, url) in &page.links {
            let link_id = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Link",
                "Rect" => rect(*x, *center_y, 120),
                "A" => dictionary! {
                    "S" => "URI",
                    "URI" => Object::string_literal(url.as_str()),
                },
            });
            annots.push(link_id.into());
        }

        doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Annots" => annots,
            }),
        );
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| (*id).into()).collect::<Vec<Object>>(),
            "Count" => i64::try_from(page_ids.len())?,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if !field_ids.is_empty() {
        catalog.set(
            "AcroForm",
            dictionary! {
                "Fields" => field_ids.iter().map(|id| (*id).into()).collect::<Vec<Object>>(),
            },
        );
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

pub fn write_pdf(path: &Path, pages: &[PageSpec]) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, build_pdf(pages)?)?;
    Ok(())
}

/// Pretends to rasterize: hands the recognizer the page number only.
#[derive(Debug, Default)]
pub struct FakeRasterizer {
    pub failure: Option<OcrError>,
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, document: &Path, page: u32, dpi: u32) -> Result<PageImage, OcrError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(PageImage {
            path: document.to_path_buf(),
            page,
            dpi,
        })
    }
}

/// Returns canned words per page. Coordinates are given in points and
/// scaled to pixels at the image DPI, like a real engine would report them.
#[derive(Debug, Default)]
pub struct FakeRecognizer {
    pages: HashMap<u32, Vec<(i64, i64, String)>>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeRecognizer {
    pub fn with_text(mut self, page: u32, x: i64, center_y: i64, text: &str) -> Self {
        self.pages
            .entry(page)
            .or_default()
            .push((x, center_y, text.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Recognizer for FakeRecognizer {
    fn recognize(&self, image: &PageImage) -> Result<Vec<RecognizedText>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let scale = i64::from(image.dpi) as f64 / 72.0;
        let px = |points: i64| (points as f64 * scale).round() as u32;
        Ok(self
            .pages
            .get(&image.page)
            .into_iter()
            .flatten()
            .map(|(x, center_y, text)| RecognizedText {
                text: text.clone(),
                bbox: PixelBox {
                    left: px(*x),
                    top: px(center_y - 5),
                    width: px(i64::try_from(text.len()).unwrap_or(0) * 5),
                    height: px(10),
                },
                confidence: 90.0,
            })
            .collect())
    }
}
