use anyhow::{anyhow, Result};
use image::GrayImage;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::trace;

use super::setup::TesseractPaths;
use crate::config::OcrSettings;

/// Pixel rectangle of a recognized word, relative to the recognized image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn center_x(&self) -> u32 {
        self.left + self.width / 2
    }

    /// Moves the box by `(dx, dy)`, clamping at zero.
    pub fn offset(&self, dx: i64, dy: i64) -> Self {
        let shift = |v: u32, d: i64| (v as i64 + d).max(0) as u32;
        Self {
            left: shift(self.left, dx),
            top: shift(self.top, dy),
            ..*self
        }
    }
}

/// Represents a line of OCR text with confidence score
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub confidence: f32,
}

/// Represents a single word from OCR with confidence score and position
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Text recognition backend.
///
/// Confidence values are informative only; callers always run recognized
/// text through their own correction.
pub trait OcrEngine {
    fn recognize(&self, img: &GrayImage) -> Result<Vec<OcrLine>>;
}

/// Runs the `tesseract` command line tool with TSV output.
pub struct TesseractEngine {
    paths: TesseractPaths,
    languages: String,
    psm: u8,
}

impl TesseractEngine {
    pub fn new(paths: TesseractPaths, settings: &OcrSettings) -> Self {
        Self {
            paths,
            languages: settings.languages.clone(),
            psm: settings.psm,
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, img: &GrayImage) -> Result<Vec<OcrLine>> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())?;

        // Create temporary output file (Tesseract adds .tsv extension)
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let output = Command::new(&self.paths.executable)
            .arg(temp_input.path())
            .arg(&output_base)
            .arg("--tessdata-dir")
            .arg(&self.paths.tessdata)
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("-c")
            .arg("preserve_interword_spaces=1")
            .arg("tsv")
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))?;
        let _ = std::fs::remove_file(&tsv_path);

        let lines = parse_tsv_output(&tsv_content);
        trace!("Tesseract lines: {:?}", lines);
        Ok(lines)
    }
}

/// Parses Tesseract TSV output into structured OcrLine data.
///
/// Words are grouped by (block, paragraph, line); empty words and words with
/// negative confidence are skipped.
pub fn parse_tsv_output(tsv: &str) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    fn finish(words: Vec<OcrWord>, lines: &mut Vec<OcrLine>) {
        if words.is_empty() {
            return;
        }
        let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(OcrLine {
            text,
            words,
            confidence,
        });
    }

    for line in tsv.lines().skip(1) {
        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let num = |i: usize| fields[i].trim().parse::<i32>().unwrap_or(-1);
        // Level 5 = word
        if num(0) != 5 {
            continue;
        }
        let text = fields[11].trim();
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (num(2), num(3), num(4));
        if current_key != Some(key) {
            finish(std::mem::take(&mut current_words), &mut lines);
            current_key = Some(key);
        }

        let coord = |i: usize| num(i).max(0) as u32;
        current_words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
            bbox: BoundingBox {
                left: coord(6),
                top: coord(7),
                width: coord(8),
                height: coord(9),
            },
        });
    }

    finish(current_words, &mut lines);
    lines
}
