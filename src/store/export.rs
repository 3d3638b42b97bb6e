//! Readable table of an account's pulls with pity counters.
//!
//! Regenerated in full from the stored history; never read back.

use serde::Serialize;

use crate::parse::ItemCatalog;
use crate::record::{AccountHistory, ItemKind, Rarity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub pool: String,
    pub time: String,
    pub item: String,
    /// Character or weapon, blank for records stored without it
    pub kind: Option<ItemKind>,
    /// Star count, blank when unresolved
    pub rarity: Option<u8>,
    /// Pulls since the previous 5-star, counting this one
    pub since_5_star: u32,
    /// Pulls since the previous 4-star or better, counting this one
    pub since_4_star: u32,
    /// Pulls left until the 5-star guarantee, blank when the pool's pity is unknown
    pub to_pity: Option<u32>,
}

/// Projects every pool timeline into export rows, pools in name order and
/// each pool newest first.
///
/// Counters run from the oldest pull of a pool. Pulls with unresolved rarity
/// count as below 4-star.
pub fn project(history: &AccountHistory, catalog: &ItemCatalog) -> Vec<ExportRow> {
    let mut rows = Vec::with_capacity(history.len());

    for (pool, timeline) in history.pools() {
        let pity = catalog.pity_of(pool);
        let mut since_five = 0;
        let mut since_four = 0;

        let mut pool_rows: Vec<ExportRow> = timeline
            .iter()
            .rev()
            .map(|record| {
                since_five += 1;
                since_four += 1;
                let row = ExportRow {
                    pool: pool.clone(),
                    time: record.readable_time(),
                    item: record.item_name.clone(),
                    kind: record.item_kind,
                    rarity: record.rarity.map(Rarity::stars),
                    since_5_star: since_five,
                    since_4_star: since_four,
                    to_pity: pity.map(|p| p.saturating_sub(since_five)),
                };
                match record.rarity {
                    Some(Rarity::Five) => {
                        since_five = 0;
                        since_four = 0;
                    }
                    Some(Rarity::Four) => since_four = 0,
                    _ => {}
                }
                row
            })
            .collect();

        pool_rows.reverse();
        rows.extend(pool_rows);
    }

    rows
}

/// Renders the export as CSV with a header row.
pub fn render_table(rows: &[ExportRow]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    if rows.is_empty() {
        writer.write_record([
            "pool",
            "time",
            "item",
            "kind",
            "rarity",
            "since_5_star",
            "since_4_star",
            "to_pity",
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
