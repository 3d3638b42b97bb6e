//! Raw OCR rows to typed pull records.
//!
//! Words are assigned to fields by the x coordinate of their centre, each
//! field goes through the misread tables in `correction`, and rarity is taken
//! from (in order) star glyphs in the text, the row's marker colour, or the
//! item catalog. Rows that cannot become a record are dropped with a
//! warning; parsing always continues with the next row.

pub mod catalog;
pub mod correction;

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::warn;

use crate::record::{CaptureBatch, ItemKind, PullRecord, Rarity};
use crate::scan::layout::{Columns, Field};
use crate::scan::RawRow;

pub use catalog::ItemCatalog;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unparsable timestamp {text:?}")]
    UnparsableTimestamp { text: String },
    #[error("unknown item {name:?}, rarity left unresolved")]
    UnknownItem { name: String },
    #[error("unknown item kind {text:?}")]
    UnknownItemKind { text: String },
    #[error("missing {field} field")]
    MissingField { field: &'static str },
}

/// A problem with one row, with the row's position and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub page: u32,
    pub row: u32,
    pub row_text: String,
    pub error: ParseError,
}

impl ParseWarning {
    /// Whether the row was dropped (as opposed to kept with a gap).
    pub fn dropped(&self) -> bool {
        !matches!(self.error, ParseError::UnknownItem { .. })
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {} row {}: {} ({:?})",
            self.page,
            self.row + 1,
            self.error,
            self.row_text
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub batch: CaptureBatch,
    pub warnings: Vec<ParseWarning>,
}

/// Field texts of one row.
#[derive(Debug, Default)]
struct RowFields {
    item: String,
    kind: String,
    pool: String,
    time: String,
    rarity: String,
}

impl RowFields {
    fn split(row: &RawRow, columns: &Columns) -> Self {
        let mut words: Vec<_> = row.words.iter().collect();
        words.sort_by_key(|w| w.bbox.left);

        let mut fields = Self::default();
        for word in words {
            let target = match columns.field_at(word.bbox.center_x()) {
                Some(Field::Item) => &mut fields.item,
                Some(Field::Kind) => &mut fields.kind,
                Some(Field::Pool) => &mut fields.pool,
                Some(Field::Time) => &mut fields.time,
                Some(Field::Rarity) => &mut fields.rarity,
                None => continue,
            };
            if !target.is_empty() {
                target.push(' ');
            }
            target.push_str(&word.text);
        }
        fields
    }
}

pub struct RecordParser<'a> {
    catalog: &'a ItemCatalog,
    columns: &'a Columns,
    default_pool: Option<&'a str>,
}

impl<'a> RecordParser<'a> {
    pub fn new(
        catalog: &'a ItemCatalog,
        columns: &'a Columns,
        default_pool: Option<&'a str>,
    ) -> Self {
        Self {
            catalog,
            columns,
            default_pool,
        }
    }

    /// Parses one row. A kept record may come with an `UnknownItem` note.
    pub fn parse_row(
        &self,
        row: &RawRow,
    ) -> Result<(PullRecord, Option<ParseError>), ParseError> {
        let fields = RowFields::split(row, self.columns);

        let timestamp = correction::parse_timestamp(&fields.time).ok_or_else(|| {
            ParseError::UnparsableTimestamp {
                text: fields.time.clone(),
            }
        })?;

        let item_text: String = fields
            .item
            .chars()
            .filter(|c| !matches!(c, '★' | '☆'))
            .collect();
        let mut item_name = correction::clean_name(&item_text);
        if item_name.is_empty() {
            return Err(ParseError::MissingField { field: "item" });
        }
        if let Some(known) = self.catalog.snap_name(&item_name) {
            item_name = known.to_string();
        }

        let item_kind = self.resolve_kind(&fields)?;

        let pool_name = match correction::clean_name(&fields.pool) {
            pool if !pool.is_empty() => pool,
            _ => self
                .default_pool
                .map(str::to_string)
                .ok_or(ParseError::MissingField { field: "pool" })?,
        };

        let rarity = self.resolve_rarity(&fields, row, &item_name);
        let note = rarity.is_none().then(|| ParseError::UnknownItem {
            name: item_name.clone(),
        });

        Ok((
            PullRecord::new(timestamp, pool_name, item_name, rarity, None).with_kind(item_kind),
            note,
        ))
    }

    /// `None` only when the layout has no kind column; a configured column
    /// that reads as nothing known rejects the row.
    fn resolve_kind(&self, fields: &RowFields) -> Result<Option<ItemKind>, ParseError> {
        if self.columns.kind.is_none() {
            return Ok(None);
        }
        if fields.kind.trim().is_empty() {
            return Err(ParseError::MissingField { field: "kind" });
        }
        correction::item_kind(&fields.kind)
            .map(Some)
            .ok_or_else(|| ParseError::UnknownItemKind {
                text: fields.kind.clone(),
            })
    }

    fn resolve_rarity(
        &self,
        fields: &RowFields,
        row: &RawRow,
        item_name: &str,
    ) -> Option<Rarity> {
        correction::rarity_from_text(&fields.rarity)
            .or_else(|| correction::rarity_from_text(&fields.item))
            .or(row.star_marker)
            .or_else(|| self.catalog.rarity_of(item_name))
    }

    /// Parses rows in display order into a batch, then numbers repeated
    /// pulls of one item within a minute.
    pub fn parse_rows(&self, rows: &[RawRow]) -> ParseOutput {
        let mut records = Vec::with_capacity(rows.len());
        let mut warnings = Vec::new();

        for row in rows {
            let mut note = |error: ParseError| {
                let warning = ParseWarning {
                    page: row.page,
                    row: row.row,
                    row_text: row.text(),
                    error,
                };
                warn!("{}", warning);
                warnings.push(warning);
            };

            match self.parse_row(row) {
                Ok((record, unknown)) => {
                    if let Some(error) = unknown {
                        note(error);
                    }
                    records.push(record);
                }
                Err(error) => note(error),
            }
        }

        assign_sequence_hints(&mut records);
        ParseOutput {
            batch: CaptureBatch::new(records),
            warnings,
        }
    }
}

/// Numbers records with equal `(pool, timestamp, item)` from the bottom of
/// the list up: the oldest gets 0. Counting from the oldest keeps the hints
/// of stored pulls unchanged when newer pulls in the same minute appear
/// above them. Only same-item rows share a counter, so a dropped row of
/// another item cannot shift the hint of a stored pull.
pub fn assign_sequence_hints(records: &mut [PullRecord]) {
    let mut seen: HashMap<(String, NaiveDateTime, String), u32> = HashMap::new();
    for record in records.iter_mut().rev() {
        let count = seen
            .entry((
                record.pool_name.clone(),
                record.timestamp,
                record.item_name.clone(),
            ))
            .or_insert(0);
        record.sequence_hint = Some(*count);
        *count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{BoundingBox, OcrWord};
    use crate::record::timestamp_text;

    fn word(text: &str, left: u32) -> OcrWord {
        OcrWord {
            text: text.to_string(),
            confidence: 80.0,
            bbox: BoundingBox {
                left,
                top: 210,
                width: 40,
                height: 20,
            },
        }
    }

    /// Row with item text at x=380 and the time at x=1250.
    fn row(index: u32, item: &str, time: &str) -> RawRow {
        let mut words = Vec::new();
        if !item.is_empty() {
            words.push(word(item, 380));
        }
        words.push(word("角色", 1000));
        if !time.is_empty() {
            words.push(word(time, 1250));
        }
        RawRow {
            page: 1,
            row: index,
            words,
            star_marker: None,
        }
    }

    fn catalog() -> ItemCatalog {
        ItemCatalog::from_entries(&[("Acacia", 5), ("Enya", 4), ("Training Rifle", 3)], &[])
    }

    #[test]
    fn test_parse_row_fields_by_position() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        let (record, note) = parser.parse_row(&row(0, "Acacla", "2024-06-0l 12:3O")).unwrap();

        assert_eq!(record.item_name, "Acacia");
        assert_eq!(record.pool_name, "Standard");
        assert_eq!(record.timestamp, timestamp_text::parse("2024-06-01 12:30").unwrap());
        assert_eq!(record.rarity, Some(Rarity::Five));
        assert_eq!(record.item_kind, Some(ItemKind::Character));
        assert_eq!(note, None);
    }

    #[test]
    fn test_item_kind_column() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        let mut weapon = row(0, "Training Rifle", "2024-06-01 12:30");
        weapon.words[1].text = "Weap0n".to_string();
        let (record, _) = parser.parse_row(&weapon).unwrap();
        assert_eq!(record.item_kind, Some(ItemKind::Weapon));

        weapon.words[1].text = "Armor".to_string();
        assert_eq!(
            parser.parse_row(&weapon).unwrap_err(),
            ParseError::UnknownItemKind {
                text: "Armor".to_string()
            }
        );

        weapon.words.remove(1);
        assert_eq!(
            parser.parse_row(&weapon).unwrap_err(),
            ParseError::MissingField { field: "kind" }
        );

        // Layouts without a kind column leave it unset
        let no_kind = Columns {
            kind: None,
            ..Columns::default()
        };
        let parser = RecordParser::new(&catalog, &no_kind, Some("Standard"));
        assert_eq!(parser.parse_row(&weapon).unwrap().0.item_kind, None);
    }

    #[test]
    fn test_rarity_priority() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        // Marker colour beats the catalog
        let mut marked = row(0, "Acacia", "2024-06-01 12:30");
        marked.star_marker = Some(Rarity::Four);
        assert_eq!(parser.parse_row(&marked).unwrap().0.rarity, Some(Rarity::Four));

        // Explicit glyphs beat the marker, and are not part of the name
        marked.words[0].text = "★★★ Acacia".to_string();
        let (record, _) = parser.parse_row(&marked).unwrap();
        assert_eq!(record.rarity, Some(Rarity::Three));
        assert_eq!(record.item_name, "Acacia");
    }

    #[test]
    fn test_unknown_item_kept_without_rarity() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        let output = parser.parse_rows(&[row(0, "Mystery Box", "2024-06-01 12:30")]);

        assert_eq!(output.batch.len(), 1);
        assert_eq!(output.batch.records()[0].rarity, None);
        assert_eq!(output.warnings.len(), 1);
        assert!(!output.warnings[0].dropped());
        assert_eq!(
            output.warnings[0].error,
            ParseError::UnknownItem {
                name: "Mystery Box".to_string()
            }
        );
    }

    #[test]
    fn test_bad_rows_dropped_and_parsing_continues() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        let rows = vec![
            row(0, "Acacia", "2024-06-01 12:32"),
            row(1, "Enya", "20X4-??-01 1Y:30"),
            row(2, "", "2024-06-01 12:31"),
            row(3, "Training Rifle", "2024-06-01 12:30"),
        ];
        let output = parser.parse_rows(&rows);

        let names: Vec<&str> = output
            .batch
            .records()
            .iter()
            .map(|r| r.item_name.as_str())
            .collect();
        assert_eq!(names, vec!["Acacia", "Training Rifle"]);

        assert_eq!(output.warnings.len(), 2);
        assert!(matches!(
            output.warnings[0].error,
            ParseError::UnparsableTimestamp { .. }
        ));
        assert_eq!(output.warnings[0].row, 1);
        assert!(output.warnings[0].row_text.contains("Enya"));
        assert_eq!(
            output.warnings[1].error,
            ParseError::MissingField { field: "item" }
        );
    }

    #[test]
    fn test_missing_pool_without_default_is_rejected() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, None);

        let err = parser.parse_row(&row(0, "Acacia", "2024-06-01 12:30")).unwrap_err();
        assert_eq!(err, ParseError::MissingField { field: "pool" });
    }

    #[test]
    fn test_pool_column_overrides_default() {
        let catalog = catalog();
        let columns = Columns {
            kind: None,
            pool: Some(crate::scan::layout::ColumnSpan::new(883, 1100)),
            ..Columns::default()
        };
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        let (record, _) = parser.parse_row(&row(0, "Acacia", "2024-06-01 12:30")).unwrap();
        assert_eq!(record.pool_name, "角色");
    }

    #[test]
    fn test_sequence_hints_count_same_item_from_oldest() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        let rows = vec![
            row(0, "Enya", "2024-06-01 12:31"),
            row(1, "Enya", "2024-06-01 12:30"),
            row(2, "Acacia", "2024-06-01 12:30"),
            row(3, "Enya", "2024-06-01 12:30"),
            row(4, "Training Rifle", "2024-06-01 12:30"),
        ];
        let output = parser.parse_rows(&rows);
        let hints: Vec<Option<u32>> = output
            .batch
            .records()
            .iter()
            .map(|r| r.sequence_hint)
            .collect();
        assert_eq!(hints, vec![Some(0), Some(1), Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn test_dropped_row_does_not_shift_other_hints() {
        let catalog = catalog();
        let columns = Columns::default();
        let parser = RecordParser::new(&catalog, &columns, Some("Standard"));

        let clean = vec![
            row(0, "Acacia", "2024-06-01 12:30"),
            row(1, "Enya", "2024-06-01 12:30"),
            row(2, "Training Rifle", "2024-06-01 12:30"),
        ];
        let mut misread = clean.clone();
        misread[1] = row(1, "Enya", "2024-O?-01 1?:30");

        let hint_of = |rows: &[RawRow]| {
            parser
                .parse_rows(rows)
                .batch
                .records()
                .iter()
                .find(|r| r.item_name == "Acacia")
                .and_then(|r| r.sequence_hint)
        };
        assert_eq!(hint_of(&clean), hint_of(&misread));
    }
}
