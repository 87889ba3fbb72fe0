use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::diagnostics::OcrStatus;
use crate::document::{SourceDocument, norm_space};
use crate::error::OcrError;
use crate::model::{Bounds, Fragment, Tier};
use crate::options::{OcrMode, OcrOptions};
use crate::tiers::{ExtractionTier, PageContext, TierOutput};
use crate::warning::{ExtractWarning, WarningCode};

const POINTS_PER_INCH: f32 = 72.0;

/// A rasterized page on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub path: PathBuf,
    pub page: u32,
    pub dpi: u32,
}

/// Pixel box as reported by the recognizer, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    pub bbox: PixelBox,
    pub confidence: f32,
}

pub trait Rasterizer: Send + Sync {
    /// Renders one page of the PDF at `document` to an image at `dpi`.
    fn rasterize(&self, document: &Path, page: u32, dpi: u32) -> Result<PageImage, OcrError>;
}

pub trait Recognizer: Send + Sync {
    /// Recognized text fragments in reading order.
    fn recognize(&self, image: &PageImage) -> Result<Vec<RecognizedText>, OcrError>;
}

/// Per-document scratch space: the PDF spooled to disk for the rasterizer.
/// Dropped, and deleted, when the tier finishes with the document.
struct OcrSession {
    _dir: TempDir,
    pdf_path: PathBuf,
}

impl OcrSession {
    fn create(document: &SourceDocument) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("caf-ocr-").tempdir()?;
        let pdf_path = dir.path().join("document.pdf");
        std::fs::write(&pdf_path, document.bytes())?;
        Ok(Self {
            _dir: dir,
            pdf_path,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_points(bbox: PixelBox, dpi: u32) -> Bounds {
    let scale = POINTS_PER_INCH / dpi.max(1) as f32;
    Bounds::new(
        bbox.left as f32 * scale,
        bbox.top as f32 * scale,
        bbox.width as f32 * scale,
        bbox.height as f32 * scale,
    )
}

/// Tier 3: rasterize and recognize. The most expensive tier, so by default it
/// only visits pages where no approval indicator has been found yet.
pub struct OcrTier {
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn Recognizer>,
    options: OcrOptions,
    pool: Option<ThreadPool>,
}

impl OcrTier {
    #[must_use]
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn Recognizer>,
        options: OcrOptions,
    ) -> Self {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|index| format!("caf-ocr-{index}"))
            .build()
            .map_err(|error| warn!(%error, "OCR thread pool unavailable; pages run sequentially"))
            .ok();
        Self {
            rasterizer,
            recognizer,
            options,
            pool,
        }
    }

    fn recognize_page(&self, pdf_path: &Path, page: u32) -> Result<Vec<Fragment>, OcrError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let recognizer = Arc::clone(&self.recognizer);
        let pdf_path = pdf_path.to_path_buf();
        let dpi = self.options.dpi;
        let (sender, receiver) = mpsc::channel();

        thread::Builder::new()
            .name(format!("caf-ocr-page-{page}"))
            .spawn(move || {
                let result = rasterizer
                    .rasterize(&pdf_path, page, dpi)
                    .and_then(|image| recognizer.recognize(&image).map(|texts| (image.dpi, texts)));
                let _ = sender.send(result);
            })
            .map_err(|error| OcrError::Spawn {
                tool: "ocr worker",
                message: error.to_string(),
            })?;

        let (image_dpi, texts) = match receiver.recv_timeout(self.options.page_timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => return Err(OcrError::Timeout(self.options.page_timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(OcrError::WorkerLost),
        };

        Ok(texts
            .into_iter()
            .filter(|text| text.confidence >= self.options.min_confidence)
            .filter_map(|text| {
                let cleaned = norm_space(&text.text);
                (!cleaned.is_empty()).then(|| Fragment {
                    tier: Tier::Ocr,
                    page,
                    text: cleaned,
                    field_name: None,
                    bounds: to_points(text.bbox, image_dpi),
                    seq: 0,
                })
            })
            .collect())
    }

    fn run_pages(&self, pdf_path: &Path, pages: &[u32]) -> Vec<(u32, Result<Vec<Fragment>, OcrError>)> {
        let work = || {
            pages
                .par_iter()
                .map(|&page| (page, self.recognize_page(pdf_path, page)))
                .collect::<Vec<_>>()
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => pages
                .iter()
                .map(|&page| (page, self.recognize_page(pdf_path, page)))
                .collect(),
        }
    }
}

impl ExtractionTier for OcrTier {
    fn tier(&self) -> Tier {
        Tier::Ocr
    }

    fn wants_page(&self, context: &PageContext<'_>) -> bool {
        match self.options.mode {
            OcrMode::Off => false,
            OcrMode::Force => true,
            OcrMode::Auto => !context.classifier.has_indicator(context.fragments),
        }
    }

    fn extract(&self, document: &SourceDocument, pages: &[u32]) -> TierOutput {
        let mut output = TierOutput::default();
        if pages.is_empty() {
            return output;
        }

        let session = match OcrSession::create(document) {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "could not prepare OCR scratch directory");
                for &page in pages {
                    output.ocr_events.push((
                        page,
                        OcrStatus::Failed {
                            reason: format!("scratch directory: {error}"),
                        },
                    ));
                }
                return output;
            }
        };

        // Parallel collect keeps page order.
        for (page, result) in self.run_pages(&session.pdf_path, pages) {
            match result {
                Ok(fragments) => {
                    debug!(page, fragments = fragments.len(), "OCR page recognized");
                    output.ocr_events.push((
                        page,
                        OcrStatus::Completed {
                            fragments: fragments.len(),
                        },
                    ));
                    output.fragments.extend(fragments);
                }
                Err(OcrError::Timeout(after)) => {
                    warn!(page, ?after, "OCR timed out");
                    output.ocr_events.push((page, OcrStatus::TimedOut));
                    output.warnings.push(
                        ExtractWarning::new(
                            WarningCode::OcrTimeout,
                            format!("OCR did not finish within {after:?}"),
                        )
                        .with_page(page),
                    );
                }
                Err(error) => {
                    warn!(page, %error, "OCR failed");
                    let code = if matches!(error, OcrError::Unavailable(_)) {
                        WarningCode::OcrUnavailable
                    } else {
                        WarningCode::OcrFailed
                    };
                    output.ocr_events.push((
                        page,
                        OcrStatus::Failed {
                            reason: error.to_string(),
                        },
                    ));
                    output
                        .warnings
                        .push(ExtractWarning::new(code, error.to_string()).with_page(page));
                }
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::{PixelBox, to_points};

    #[test]
    fn converts_pixels_to_points() {
        let bounds = to_points(
            PixelBox {
                left: 300,
                top: 600,
                width: 150,
                height: 30,
            },
            300,
        );
        assert_eq!(bounds.x, 72.0);
        assert_eq!(bounds.y, 144.0);
        assert_eq!(bounds.width, 36.0);
        assert_eq!(bounds.height, 7.2);
    }
}
