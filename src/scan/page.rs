//! Reading one frame of the history screen into raw rows.

use anyhow::Context;
use image::RgbaImage;
use tracing::{debug, trace};

use super::layout::ScanLayout;
use super::ScanError;
use crate::capture::{capture_region, Region};
use crate::ocr::preprocess::OCR_PADDING;
use crate::ocr::{prepare_for_ocr, OcrEngine, OcrLine, OcrWord};
use crate::parse::correction::{page_number, uid_digits};
use crate::record::Rarity;

/// Marker colours of the rarity bar left of each row.
const MARKER_COLOURS: [(Rarity, [u8; 3]); 3] = [
    (Rarity::Three, [55, 98, 242]),
    (Rarity::Four, [192, 105, 214]),
    (Rarity::Five, [233, 155, 55]),
];

/// Maximum Euclidean RGB distance to a marker colour.
const MARKER_TOLERANCE: f32 = 5.0;

/// One history row as recognized, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based page number within the scan
    pub page: u32,
    /// 0-based row on the page
    pub row: u32,
    /// Words in frame coordinates
    pub words: Vec<OcrWord>,
    /// Rarity read from the marker colour
    pub star_marker: Option<Rarity>,
}

impl RawRow {
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageSnapshot {
    /// Page number shown on screen, when readable
    pub page_index: Option<u32>,
    pub rows: Vec<RawRow>,
    /// An end-of-list marker was found below the last row
    pub end_of_list: bool,
}

impl PageSnapshot {
    /// Row texts, for comparing two snapshots.
    pub fn row_texts(&self) -> Vec<String> {
        self.rows.iter().map(RawRow::text).collect()
    }
}

/// Turns captured frames into page snapshots.
pub trait PageReader {
    fn read_page(&self, frame: &RgbaImage, page: u32) -> Result<PageSnapshot, ScanError>;

    /// Digits of the UID label, if any were recognized.
    fn read_account_id(&self, frame: &RgbaImage) -> Result<Option<String>, ScanError>;
}

/// Page reader that OCRs every row strip separately.
pub struct OcrPageReader<E> {
    engine: E,
    layout: ScanLayout,
    threshold: Option<u8>,
}

impl<E: OcrEngine> OcrPageReader<E> {
    pub fn new(engine: E, layout: ScanLayout, threshold: Option<u8>) -> Self {
        Self {
            engine,
            layout,
            threshold,
        }
    }

    /// Recognizes `region`, with word boxes moved into frame coordinates.
    fn recognize_region(
        &self,
        frame: &RgbaImage,
        region: &Region,
    ) -> Result<Vec<OcrLine>, ScanError> {
        let crop = capture_region(frame, region)?;
        let prepared = prepare_for_ocr(&crop, self.threshold);
        let mut lines = self
            .engine
            .recognize(&prepared)
            .with_context(|| format!("recognizing region {:?}", region))?;

        let dx = region.x as i64 - OCR_PADDING as i64;
        let dy = region.y as i64 - OCR_PADDING as i64;
        for word in lines.iter_mut().flat_map(|line| line.words.iter_mut()) {
            word.bbox = word.bbox.offset(dx, dy);
        }
        Ok(lines)
    }

    fn region_text(&self, frame: &RgbaImage, region: &Region) -> Result<String, ScanError> {
        let lines = self.recognize_region(frame, region)?;
        Ok(lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

impl<E: OcrEngine> PageReader for OcrPageReader<E> {
    fn read_page(&self, frame: &RgbaImage, page: u32) -> Result<PageSnapshot, ScanError> {
        let index_text = self.region_text(frame, &self.layout.page_index)?;
        let mut snapshot = PageSnapshot {
            page_index: page_number(&index_text),
            ..PageSnapshot::default()
        };

        for row in 0..self.layout.max_rows {
            let region = self.layout.row_region(row);
            let words: Vec<OcrWord> = self
                .recognize_region(frame, &region)?
                .into_iter()
                .flat_map(|line| line.words)
                .collect();

            // Fewer rows than max on the last page
            if words.is_empty() {
                break;
            }

            let raw = RawRow {
                page,
                row,
                words,
                star_marker: None,
            };
            if self.layout.is_end_marker(&raw.text()) {
                snapshot.end_of_list = true;
                break;
            }

            let (x, y) = self.layout.marker_point(row);
            let star_marker = frame
                .get_pixel_checked(x, y)
                .and_then(|p| rarity_from_rgb([p[0], p[1], p[2]]));
            trace!("Page {} row {}: {:?} marker {:?}", page, row, raw.text(), star_marker);
            snapshot.rows.push(RawRow { star_marker, ..raw });
        }

        debug!(
            "Page {} (shown {:?}): {} rows{}",
            page,
            snapshot.page_index,
            snapshot.rows.len(),
            if snapshot.end_of_list { ", end of list" } else { "" }
        );
        Ok(snapshot)
    }

    fn read_account_id(&self, frame: &RgbaImage) -> Result<Option<String>, ScanError> {
        let text = self.region_text(frame, &self.layout.account_id)?;
        debug!("UID label: {:?}", text);
        Ok(uid_digits(&text))
    }
}

/// Rarity of a marker pixel, if it matches one of the known colours.
pub fn rarity_from_rgb(rgb: [u8; 3]) -> Option<Rarity> {
    let distance = |target: &[u8; 3]| {
        rgb.iter()
            .zip(target)
            .map(|(&a, &b)| (a as f32 - b as f32).powi(2))
            .sum::<f32>()
            .sqrt()
    };
    MARKER_COLOURS
        .iter()
        .find(|(_, colour)| distance(colour) < MARKER_TOLERANCE)
        .map(|(rarity, _)| *rarity)
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedEngine;
    use super::*;
    use image::Rgba;

    fn frame_with_markers(markers: &[[u8; 3]]) -> RgbaImage {
        let layout = ScanLayout::default();
        let mut frame = RgbaImage::from_pixel(1920, 1080, Rgba([20, 20, 20, 255]));
        for (row, rgb) in markers.iter().enumerate() {
            let (x, y) = layout.marker_point(row as u32);
            frame.put_pixel(x, y, Rgba([rgb[0], rgb[1], rgb[2], 255]));
        }
        frame
    }

    #[test]
    fn test_rarity_from_rgb() {
        assert_eq!(rarity_from_rgb([55, 98, 242]), Some(Rarity::Three));
        assert_eq!(rarity_from_rgb([193, 104, 215]), Some(Rarity::Four));
        assert_eq!(rarity_from_rgb([233, 155, 55]), Some(Rarity::Five));
        assert_eq!(rarity_from_rgb([20, 20, 20]), None);
    }

    #[test]
    fn test_read_page_rows_until_empty_strip() {
        let engine = ScriptedEngine::default();
        engine.push(&[("2", 30)]);
        engine.push(&[("Acacia", 20), ("2024-06-01", 880), ("12:31", 1000)]);
        engine.push(&[("Enya", 20), ("2024-06-01", 880), ("12:30", 1000)]);
        engine.push(&[]);

        let reader = OcrPageReader::new(engine, ScanLayout::default(), None);
        let frame = frame_with_markers(&[[233, 155, 55], [192, 105, 214]]);
        let snapshot = reader.read_page(&frame, 2).unwrap();

        assert_eq!(snapshot.page_index, Some(2));
        assert!(!snapshot.end_of_list);
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[0].text(), "Acacia 2024-06-01 12:31");
        assert_eq!(snapshot.rows[0].star_marker, Some(Rarity::Five));
        assert_eq!(snapshot.rows[1].star_marker, Some(Rarity::Four));
        assert_eq!((snapshot.rows[1].page, snapshot.rows[1].row), (2, 1));
        // Boxes are moved from the padded crop into frame coordinates
        let word = &snapshot.rows[0].words[1];
        assert_eq!(word.bbox.left, 367 + 880 - OCR_PADDING);
        // Page index + 2 rows + the empty strip
        assert_eq!(*reader.engine.calls.borrow(), 4);
    }

    #[test]
    fn test_read_page_stops_at_end_marker() {
        let engine = ScriptedEngine::default();
        engine.push(&[]);
        engine.push(&[("Acacia", 20), ("2024-06-01", 880), ("12:31", 1000)]);
        engine.push(&[("没有更多记录", 300)]);

        let reader = OcrPageReader::new(engine, ScanLayout::default(), Some(150));
        let snapshot = reader.read_page(&frame_with_markers(&[]), 1).unwrap();

        assert_eq!(snapshot.page_index, None);
        assert!(snapshot.end_of_list);
        assert_eq!(snapshot.rows.len(), 1);
        assert_eq!(snapshot.rows[0].star_marker, None);
    }

    #[test]
    fn test_read_account_id() {
        let engine = ScriptedEngine::default();
        engine.push(&[("UID:", 0), ("1O234567", 60)]);
        let reader = OcrPageReader::new(engine, ScanLayout::default(), None);
        let uid = reader.read_account_id(&frame_with_markers(&[])).unwrap();
        assert_eq!(uid.as_deref(), Some("10234567"));
    }

    #[test]
    fn test_small_frame_is_region_error() {
        let reader = OcrPageReader::new(ScriptedEngine::default(), ScanLayout::default(), None);
        let err = reader.read_page(&RgbaImage::new(800, 600), 1).unwrap_err();
        assert!(matches!(
            err,
            ScanError::Capture(crate::capture::CaptureError::RegionOutOfBounds { .. })
        ));
    }
}
