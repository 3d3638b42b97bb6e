//! Pixel layout of the gacha history screen, in 1920x1080 reference pixels.

use serde::{Deserialize, Serialize};

use crate::capture::Region;

/// Horizontal span `[left, right)` of one table column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpan {
    pub left: u32,
    pub right: u32,
}

impl ColumnSpan {
    pub const fn new(left: u32, right: u32) -> Self {
        Self { left, right }
    }

    pub fn contains(&self, x: u32) -> bool {
        x >= self.left && x < self.right
    }
}

/// The record field a column holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Item,
    Kind,
    Pool,
    Time,
    Rarity,
}

/// Column boundaries of the history table.
///
/// The game lists one banner at a time and has no pool column, so `pool` is
/// unset by default and the pool comes from the run context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Columns {
    pub item: ColumnSpan,
    /// Character/weapon label between item and time
    pub kind: Option<ColumnSpan>,
    pub time: ColumnSpan,
    pub pool: Option<ColumnSpan>,
    pub rarity: Option<ColumnSpan>,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            item: ColumnSpan::new(367, 883),
            kind: Some(ColumnSpan::new(883, 1216)),
            time: ColumnSpan::new(1216, 1548),
            pool: None,
            rarity: None,
        }
    }
}

impl Columns {
    fn spans(&self) -> impl Iterator<Item = (Field, ColumnSpan)> + '_ {
        [
            Some((Field::Item, self.item)),
            Some((Field::Time, self.time)),
            self.kind.map(|span| (Field::Kind, span)),
            self.pool.map(|span| (Field::Pool, span)),
            self.rarity.map(|span| (Field::Rarity, span)),
        ]
        .into_iter()
        .flatten()
    }

    /// Which field a word belongs to, by the x coordinate of its centre.
    pub fn field_at(&self, x: u32) -> Option<Field> {
        self.spans()
            .find(|(_, span)| span.contains(x))
            .map(|(field, _)| field)
    }

    /// Leftmost and rightmost x covered by any column.
    pub fn extent(&self) -> (u32, u32) {
        self.spans().fold((u32::MAX, 0), |(lo, hi), (_, span)| {
            (lo.min(span.left), hi.max(span.right))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanLayout {
    /// Top edge of the first row
    pub first_row_top: u32,
    /// Height of one row's text strip
    pub row_height: u32,
    /// Distance between the tops of consecutive rows
    pub row_pitch: f32,
    pub max_rows: u32,
    pub columns: Columns,
    /// x of the coloured rarity bar left of each row
    pub star_marker_x: u32,
    /// Page number shown between the page buttons
    pub page_index: Region,
    /// "UID: ..." label
    pub account_id: Region,
    /// Texts that mark the end of the list when found in a row
    pub end_markers: Vec<String>,
}

impl Default for ScanLayout {
    fn default() -> Self {
        Self {
            first_row_top: 207,
            row_height: 32,
            // Ten rows span 207..846: 10 * 32 + 9 gaps of 319/9
            row_pitch: 32.0 + 319.0 / 9.0,
            max_rows: 10,
            columns: Columns::default(),
            star_marker_x: 352,
            page_index: Region::new(1577, 464, 174, 113),
            account_id: Region::new(1600, 1040, 300, 32),
            end_markers: vec!["没有更多记录".to_string(), "No more records".to_string()],
        }
    }
}

impl ScanLayout {
    pub fn row_top(&self, row: u32) -> u32 {
        self.first_row_top + (self.row_pitch * row as f32).round() as u32
    }

    /// The text strip of `row`, spanning every configured column.
    pub fn row_region(&self, row: u32) -> Region {
        let (left, right) = self.columns.extent();
        Region::new(left, self.row_top(row), right - left, self.row_height)
    }

    /// Pixel sampled for the rarity colour of `row`.
    pub fn marker_point(&self, row: u32) -> (u32, u32) {
        (
            self.star_marker_x,
            self.row_top(row) + (self.row_height + 1) / 2,
        )
    }

    pub fn is_end_marker(&self, text: &str) -> bool {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        self.end_markers.iter().any(|marker| {
            let marker: String = marker.chars().filter(|c| !c.is_whitespace()).collect();
            !marker.is_empty() && compact.contains(&marker)
        })
    }
}
