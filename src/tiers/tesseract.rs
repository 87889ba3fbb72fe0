//! Rasterize/recognize services backed by the poppler `pdftoppm` and
//! `tesseract` command-line tools.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::error::OcrError;
use crate::options::OcrOptions;
use crate::tiers::ocr::{PageImage, PixelBox, Rasterizer, RecognizedText, Recognizer};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Sparse text: forms scatter handwriting across the page.
const PAGE_SEGMENTATION_MODE: &str = "11";
const WORD_LEVEL: u32 = 5;

struct ToolOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn spawn(command: &mut Command, tool: &'static str) -> Result<Child, OcrError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                OcrError::Unavailable(tool)
            } else {
                OcrError::Spawn {
                    tool,
                    message: error.to_string(),
                }
            }
        })
}

/// Runs `command`, killing it once `timeout` has elapsed.
fn run_with_timeout(
    mut command: Command,
    tool: &'static str,
    timeout: Duration,
) -> Result<ToolOutput, OcrError> {
    let mut child = spawn(&mut command, tool)?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OcrError::Timeout(timeout));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(error) => {
                let _ = child.kill();
                return Err(OcrError::Spawn {
                    tool,
                    message: error.to_string(),
                });
            }
        }
    };

    Ok(ToolOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn check_status(output: &ToolOutput, tool: &'static str) -> Result<(), OcrError> {
    if output.status.success() {
        return Ok(());
    }
    Err(OcrError::Failed {
        tool,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
    timeout: Duration,
}

impl PdftoppmRasterizer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("pdftoppm"),
            timeout,
        }
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl Rasterizer for PdftoppmRasterizer {
    fn rasterize(&self, document: &Path, page: u32, dpi: u32) -> Result<PageImage, OcrError> {
        let directory = document.parent().unwrap_or_else(|| Path::new("."));
        let prefix = directory.join(format!("page-{page}"));
        let page_arg = page.to_string();

        let mut command = Command::new(&self.program);
        command
            .args(["-f", &page_arg, "-l", &page_arg])
            .args(["-r", &dpi.to_string()])
            .args(["-png", "-singlefile"])
            .arg(document)
            .arg(&prefix);
        let output = run_with_timeout(command, "pdftoppm", self.timeout)?;
        check_status(&output, "pdftoppm")?;

        let path = prefix.with_extension("png");
        if !path.is_file() {
            return Err(OcrError::Unreadable(format!(
                "pdftoppm produced no image for page {page}"
            )));
        }
        debug!(page, dpi, path = %path.display(), "page rasterized");
        Ok(PageImage { path, page, dpi })
    }
}

#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    program: PathBuf,
    language: String,
    timeout: Duration,
    /// Horizontal gap, in points, that splits one recognized line into cells.
    column_gap: f32,
}

impl TesseractRecognizer {
    #[must_use]
    pub fn new(options: &OcrOptions, column_gap: f32) -> Self {
        Self {
            program: PathBuf::from("tesseract"),
            language: options.language.clone(),
            timeout: options.page_timeout,
            column_gap,
        }
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&self, image: &PageImage) -> Result<Vec<RecognizedText>, OcrError> {
        let mut command = Command::new(&self.program);
        command
            .arg(&image.path)
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--psm", PAGE_SEGMENTATION_MODE])
            .arg("tsv");
        let output = run_with_timeout(command, "tesseract", self.timeout)?;
        check_status(&output, "tesseract")?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let gap_px = (self.column_gap * image.dpi as f32 / 72.0).round().max(1.0) as u32;
        parse_tsv(&output.stdout, gap_px)
    }
}

#[derive(Debug, Deserialize)]
struct TsvWord {
    level: u32,
    block_num: u32,
    par_num: u32,
    line_num: u32,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    conf: f32,
    #[serde(default)]
    text: String,
}

/// Groups tesseract TSV words into line segments, splitting a line wherever
/// the gap between neighbouring words exceeds `gap_px`.
pub(crate) fn parse_tsv(tsv: &[u8], gap_px: u32) -> Result<Vec<RecognizedText>, OcrError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(tsv);

    let mut lines: BTreeMap<(u32, u32, u32), Vec<TsvWord>> = BTreeMap::new();
    for record in reader.deserialize::<TsvWord>() {
        let word = record.map_err(|error| OcrError::Unreadable(error.to_string()))?;
        if word.level != WORD_LEVEL || word.conf < 0.0 || word.text.trim().is_empty() {
            continue;
        }
        lines
            .entry((word.block_num, word.par_num, word.line_num))
            .or_default()
            .push(word);
    }

    let mut out = Vec::new();
    for mut words in lines.into_values() {
        words.sort_by_key(|word| word.left);
        let mut segment: Vec<TsvWord> = Vec::new();
        for word in words {
            if let Some(last) = segment.last()
                && word.left.saturating_sub(last.left + last.width) > gap_px
            {
                out.push(merge_segment(std::mem::take(&mut segment)));
            }
            segment.push(word);
        }
        if !segment.is_empty() {
            out.push(merge_segment(segment));
        }
    }
    Ok(out)
}

#[allow(clippy::cast_precision_loss)]
fn merge_segment(words: Vec<TsvWord>) -> RecognizedText {
    let left = words.iter().map(|w| w.left).min().unwrap_or_default();
    let top = words.iter().map(|w| w.top).min().unwrap_or_default();
    let right = words.iter().map(|w| w.left + w.width).max().unwrap_or_default();
    let bottom = words.iter().map(|w| w.top + w.height).max().unwrap_or_default();
    let confidence = words.iter().map(|w| w.conf).sum::<f32>() / words.len().max(1) as f32;
    let text = words
        .iter()
        .map(|w| w.text.trim())
        .collect::<Vec<_>>()
        .join(" ");

    RecognizedText {
        text,
        bbox: PixelBox {
            left,
            top,
            width: right - left,
            height: bottom - top,
        },
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_tsv;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n";

    #[test]
    fn groups_words_into_lines_and_splits_on_gaps() {
        let tsv = format!(
            "{HEADER}\
             1\t1\t0\t0\t0\t0\t0\t0\t2550\t3300\t-1\t\n\
             5\t1\t1\t1\t1\t1\t100\t400\t80\t30\t91.5\tErin\n\
             5\t1\t1\t1\t1\t2\t190\t402\t90\t30\t88.5\tSmith\n\
             5\t1\t1\t1\t1\t3\t900\t400\t120\t30\t60\tINTR:\n\
             5\t1\t2\t1\t1\t1\t100\t900\t120\t30\t95\tApproved\n"
        );
        let texts = parse_tsv(tsv.as_bytes(), 50).expect("tsv parses");

        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0].text, "Erin Smith");
        assert_eq!(texts[0].bbox.left, 100);
        assert_eq!(texts[0].bbox.width, 180);
        assert_eq!(texts[0].bbox.height, 32);
        assert!((texts[0].confidence - 90.0).abs() < f32::EPSILON);
        assert_eq!(texts[1].text, "INTR:");
        assert_eq!(texts[2].text, "Approved");
    }

    #[test]
    fn skips_non_word_levels_and_blank_words() {
        let tsv = format!(
            "{HEADER}\
             4\t1\t1\t1\t1\t0\t100\t400\t300\t30\t-1\t\n\
             5\t1\t1\t1\t1\t1\t100\t400\t80\t30\t91\t \n"
        );
        assert!(parse_tsv(tsv.as_bytes(), 50).expect("tsv parses").is_empty());
    }
}
