//! Paging through the history screen.
//!
//! The scanner grabs a frame, reads it into rows, and asks the source for
//! the next page. It stops when:
//! - the new frame is byte-identical to the previous one
//! - the new page reads the same as the previous one (same page number or
//!   same row texts)
//! - an end-of-list marker or an empty page is seen
//!
//! Pages are bounded by `max_pages`; hitting the bound returns the rows read
//! so far inside `ScanError::Incomplete`.

pub mod layout;
pub mod page;

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, FrameSource};

pub use layout::ScanLayout;
pub use page::{OcrPageReader, PageReader, PageSnapshot, RawRow};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Ocr(#[from] anyhow::Error),
    #[error(transparent)]
    Incomplete(#[from] ScanIncompleteError),
}

/// Rows of every accepted page, in display order (newest first).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutput {
    pub rows: Vec<RawRow>,
    pub pages: u32,
    /// UID digits read from the first frame
    pub account_id: Option<String>,
}

#[derive(Debug, Error)]
#[error(
    "scan stopped at the {pages}-page limit before the end of the list ({} rows read)",
    .partial.rows.len()
)]
pub struct ScanIncompleteError {
    pub pages: u32,
    pub partial: ScanOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    IdenticalFrame,
    IdenticalPage,
    EmptyPage,
    EndOfList,
}

fn same_page(previous: &PageSnapshot, current: &PageSnapshot) -> bool {
    let same_index = previous.page_index.is_some() && previous.page_index == current.page_index;
    same_index || previous.row_texts() == current.row_texts()
}

/// Reads every page `source` shows, up to `max_pages`.
pub fn scan<S, R>(source: &mut S, reader: &R, max_pages: u32) -> Result<ScanOutput, ScanError>
where
    S: FrameSource + ?Sized,
    R: PageReader + ?Sized,
{
    let mut output = ScanOutput::default();
    let mut last_frame: Option<RgbaImage> = None;
    let mut last_page: Option<PageSnapshot> = None;

    let reason = loop {
        let frame = source.grab()?;
        if last_frame.as_ref().is_some_and(|prev| prev.as_raw() == frame.as_raw()) {
            break StopReason::IdenticalFrame;
        }

        if output.pages == 0 {
            output.account_id = reader.read_account_id(&frame)?;
        }

        let snapshot = reader.read_page(&frame, output.pages + 1)?;
        if last_page.as_ref().is_some_and(|prev| same_page(prev, &snapshot)) {
            break StopReason::IdenticalPage;
        }
        if snapshot.rows.is_empty() {
            break if snapshot.end_of_list {
                StopReason::EndOfList
            } else {
                StopReason::EmptyPage
            };
        }
        if output.pages == max_pages {
            let pages = output.pages;
            return Err(ScanIncompleteError {
                pages,
                partial: output,
            }
            .into());
        }

        check_page_index(last_page.as_ref(), &snapshot, output.pages);
        output.pages += 1;
        output.rows.extend(snapshot.rows.iter().cloned());
        debug!("Accepted page {} ({} rows)", output.pages, snapshot.rows.len());

        if snapshot.end_of_list {
            break StopReason::EndOfList;
        }

        last_frame = Some(frame);
        last_page = Some(snapshot);
        source.advance()?;
    };

    info!(
        "Scan finished after {} pages, {} rows ({:?})",
        output.pages,
        output.rows.len(),
        reason
    );
    Ok(output)
}

/// Warns when the on-screen page number does not follow on from the last.
fn check_page_index(previous: Option<&PageSnapshot>, current: &PageSnapshot, accepted: u32) {
    let Some(index) = current.page_index else {
        return;
    };
    match previous.and_then(|p| p.page_index) {
        None if accepted == 0 && index != 1 => warn!(
            "Scan started on page {}; pulls on earlier pages are not captured this run",
            index
        ),
        Some(prev) if index != prev + 1 => warn!(
            "Page number jumped from {} to {}; rows in between may be missing",
            prev, index
        ),
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use image::{Rgba, RgbaImage};

    use super::{PageReader, PageSnapshot, RawRow, ScanError};
    use crate::capture::{CaptureError, FrameSource};
    use crate::ocr::{BoundingBox, OcrWord};

    /// In-memory frames, each identified by its first pixel.
    pub struct FakeSource {
        frames: Vec<u8>,
        cursor: usize,
        pub advances: u32,
    }

    impl FakeSource {
        pub fn new(frames: &[u8]) -> Self {
            Self {
                frames: frames.to_vec(),
                cursor: 0,
                advances: 0,
            }
        }
    }

    impl FrameSource for FakeSource {
        fn grab(&mut self) -> Result<RgbaImage, CaptureError> {
            let id = self.frames[self.cursor];
            Ok(RgbaImage::from_pixel(4, 4, Rgba([id, 0, 0, 255])))
        }

        fn advance(&mut self) -> Result<(), CaptureError> {
            self.advances += 1;
            if self.cursor + 1 < self.frames.len() {
                self.cursor += 1;
            }
            Ok(())
        }
    }

    pub fn word(text: &str, left: u32) -> OcrWord {
        OcrWord {
            text: text.to_string(),
            confidence: 90.0,
            bbox: BoundingBox {
                left,
                top: 0,
                width: 40,
                height: 20,
            },
        }
    }

    /// Pages keyed by frame id.
    #[derive(Default)]
    pub struct FakeReader {
        pages: HashMap<u8, PageSnapshot>,
        account_id: Option<String>,
    }

    impl FakeReader {
        pub fn account(mut self, id: &str) -> Self {
            self.account_id = Some(id.to_string());
            self
        }

        /// Page of single-word rows.
        pub fn page(self, id: u8, index: Option<u32>, texts: &[&str], end_of_list: bool) -> Self {
            let rows = texts.iter().map(|text| vec![word(text, 0)]).collect();
            self.page_of_words(id, index, rows, end_of_list)
        }

        pub fn page_of_words(
            mut self,
            id: u8,
            index: Option<u32>,
            rows: Vec<Vec<OcrWord>>,
            end_of_list: bool,
        ) -> Self {
            let rows = rows
                .into_iter()
                .enumerate()
                .map(|(i, words)| RawRow {
                    page: 0,
                    row: i as u32,
                    words,
                    star_marker: None,
                })
                .collect();
            self.pages.insert(
                id,
                PageSnapshot {
                    page_index: index,
                    rows,
                    end_of_list,
                },
            );
            self
        }
    }

    impl PageReader for FakeReader {
        fn read_page(&self, frame: &RgbaImage, page: u32) -> Result<PageSnapshot, ScanError> {
            let id = frame.get_pixel(0, 0)[0];
            let mut snapshot = self.pages.get(&id).cloned().unwrap_or_default();
            for row in &mut snapshot.rows {
                row.page = page;
            }
            Ok(snapshot)
        }

        fn read_account_id(&self, _frame: &RgbaImage) -> Result<Option<String>, ScanError> {
            Ok(self.account_id.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FakeReader, FakeSource};
    use super::*;

    fn texts(output: &ScanOutput) -> Vec<String> {
        output.rows.iter().map(RawRow::text).collect()
    }

    #[test]
    fn test_stops_on_identical_frame() {
        let mut source = FakeSource::new(&[1, 2]);
        let reader = FakeReader::default()
            .account("100234")
            .page(1, Some(1), &["a", "b"], false)
            .page(2, Some(2), &["c"], false);

        let output = scan(&mut source, &reader, 10).unwrap();

        assert_eq!(output.pages, 2);
        assert_eq!(texts(&output), vec!["a", "b", "c"]);
        assert_eq!(output.rows[2].page, 2);
        assert_eq!(output.account_id.as_deref(), Some("100234"));
    }

    #[test]
    fn test_stops_on_end_of_list() {
        let mut source = FakeSource::new(&[1, 2, 3]);
        let reader = FakeReader::default()
            .page(1, Some(1), &["a"], false)
            .page(2, Some(2), &["b"], true)
            .page(3, Some(3), &["never"], false);

        let output = scan(&mut source, &reader, 10).unwrap();

        assert_eq!(texts(&output), vec!["a", "b"]);
        assert_eq!(source.advances, 1);
    }

    #[test]
    fn test_stops_when_page_reads_the_same() {
        // Frames differ (e.g. an animation) but OCR gives the same page
        let mut source = FakeSource::new(&[1, 2, 3]);
        let reader = FakeReader::default()
            .page(1, Some(1), &["a"], false)
            .page(2, Some(1), &["a"], false)
            .page(3, Some(2), &["b"], false);

        let output = scan(&mut source, &reader, 10).unwrap();
        assert_eq!(output.pages, 1);
        assert_eq!(texts(&output), vec!["a"]);
    }

    #[test]
    fn test_stops_on_empty_page() {
        let mut source = FakeSource::new(&[1, 9]);
        let reader = FakeReader::default().page(1, None, &["a"], false);

        let output = scan(&mut source, &reader, 10).unwrap();
        assert_eq!(output.pages, 1);
    }

    #[test]
    fn test_page_limit_returns_partial_rows() {
        let mut source = FakeSource::new(&[1, 2, 3]);
        let reader = FakeReader::default()
            .page(1, Some(1), &["a"], false)
            .page(2, Some(2), &["b"], false)
            .page(3, Some(3), &["c"], false);

        let incomplete = match scan(&mut source, &reader, 2) {
            Err(ScanError::Incomplete(incomplete)) => incomplete,
            other => panic!("expected incomplete scan, got {:?}", other),
        };
        assert_eq!(incomplete.pages, 2);
        assert_eq!(texts(&incomplete.partial), vec!["a", "b"]);
    }

    #[test]
    fn test_full_list_at_exact_limit_is_complete() {
        let mut source = FakeSource::new(&[1, 2]);
        let reader = FakeReader::default()
            .page(1, Some(1), &["a"], false)
            .page(2, Some(2), &["b"], false);

        let output = scan(&mut source, &reader, 2).unwrap();
        assert_eq!(output.pages, 2);
    }
}
