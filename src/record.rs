//! Pull records, capture batches and per-account histories.
//!
//! A history keeps one newest-first timeline per pool. Timelines only ever
//! grow at the front; see `crate::merge` for the code that does that.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Timestamp as shown on the history screen.
pub const TIMESTAMP_FORMAT_MINUTES: &str = "%Y-%m-%d %H:%M";
/// Timestamp with seconds, used by some game builds.
pub const TIMESTAMP_FORMAT_SECONDS: &str = "%Y-%m-%d %H:%M:%S";

/// Item rarity in stars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Rarity {
    Three,
    Four,
    Five,
}

impl Rarity {
    pub fn stars(self) -> u8 {
        match self {
            Rarity::Three => 3,
            Rarity::Four => 4,
            Rarity::Five => 5,
        }
    }

    pub fn from_stars(stars: u8) -> Option<Self> {
        match stars {
            3 => Some(Rarity::Three),
            4 => Some(Rarity::Four),
            5 => Some(Rarity::Five),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Rarity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rarity::from_stars(value).ok_or_else(|| format!("invalid star count {}", value))
    }
}

impl From<Rarity> for u8 {
    fn from(rarity: Rarity) -> Self {
        rarity.stars()
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}★", self.stars())
    }
}

/// Whether a pull gave a character or a weapon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Character,
    Weapon,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Character, ItemKind::Weapon];

    /// Labels the history screen uses for this kind, one per game language.
    pub fn screen_labels(self) -> &'static [&'static str] {
        match self {
            ItemKind::Character => &["角色", "Operative"],
            ItemKind::Weapon => &["武器", "Weapon"],
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.screen_labels().contains(&label))
    }

    pub fn name(self) -> &'static str {
        match self {
            ItemKind::Character => "character",
            ItemKind::Weapon => "weapon",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One gacha draw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRecord {
    #[serde(with = "timestamp_text")]
    pub timestamp: NaiveDateTime,
    pub pool_name: String,
    pub item_name: String,
    /// `None` when neither a star marker nor the item catalog resolved it.
    #[serde(default)]
    pub rarity: Option<Rarity>,
    /// `None` for records stored before the kind column was read, or when
    /// the layout has no kind column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_kind: Option<ItemKind>,
    /// Position among pulls of the same item in the same pool sharing this
    /// timestamp, counted from the oldest one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_hint: Option<u32>,
}

/// Borrowed duplicate key of a record. Rarity and item kind are not part
/// of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey<'a> {
    pub timestamp: NaiveDateTime,
    pub pool_name: &'a str,
    pub item_name: &'a str,
    pub sequence_hint: Option<u32>,
}

impl PullRecord {
    pub fn new(
        timestamp: NaiveDateTime,
        pool_name: impl Into<String>,
        item_name: impl Into<String>,
        rarity: Option<Rarity>,
        sequence_hint: Option<u32>,
    ) -> Self {
        Self {
            timestamp,
            pool_name: pool_name.into(),
            item_name: item_name.into(),
            rarity,
            item_kind: None,
            sequence_hint,
        }
    }

    pub fn with_kind(mut self, item_kind: Option<ItemKind>) -> Self {
        self.item_kind = item_kind;
        self
    }

    pub fn key(&self) -> RecordKey<'_> {
        RecordKey {
            timestamp: self.timestamp,
            pool_name: &self.pool_name,
            item_name: &self.item_name,
            sequence_hint: self.sequence_hint,
        }
    }

    /// Exact duplicate-key equality.
    pub fn same_pull(&self, other: &PullRecord) -> bool {
        self.key() == other.key()
    }

    pub fn readable_time(&self) -> String {
        timestamp_text::format(&self.timestamp)
    }
}

impl fmt::Display for PullRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} / {}",
            self.readable_time(),
            self.pool_name,
            self.item_name
        )?;
        if let Some(rarity) = self.rarity {
            write!(f, " {}", rarity)?;
        }
        if let Some(hint) = self.sequence_hint {
            write!(f, " #{}", hint)?;
        }
        Ok(())
    }
}

/// Serde helpers that store timestamps the way the game displays them.
pub(crate) mod timestamp_text {
    use super::{TIMESTAMP_FORMAT_MINUTES, TIMESTAMP_FORMAT_SECONDS};
    use chrono::{NaiveDateTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(timestamp: &NaiveDateTime) -> String {
        if timestamp.second() == 0 {
            timestamp.format(TIMESTAMP_FORMAT_MINUTES).to_string()
        } else {
            timestamp.format(TIMESTAMP_FORMAT_SECONDS).to_string()
        }
    }

    pub fn parse(text: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT_SECONDS)
            .or_else(|_| NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT_MINUTES))
            .ok()
    }

    pub fn serialize<S: Serializer>(
        timestamp: &NaiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(timestamp))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {:?}", text)))
    }
}

/// Records produced by one scan, newest first in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureBatch {
    records: Vec<PullRecord>,
}

impl CaptureBatch {
    pub fn new(records: Vec<PullRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[PullRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<PullRecord> for CaptureBatch {
    fn from_iter<I: IntoIterator<Item = PullRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Maximum accepted UID length.
const MAX_ACCOUNT_ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid account id {0:?}: expected 1-32 ASCII letters, digits, '-' or '_'")]
pub struct InvalidAccountId(pub String);

/// In-game UID used as the persistence key. Safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: &str) -> Result<Self, InvalidAccountId> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_ACCOUNT_ID_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidAccountId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountId {
    type Error = InvalidAccountId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountId::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// All recorded pulls of one account, one newest-first timeline per pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHistory {
    account_id: AccountId,
    pools: BTreeMap<String, Vec<PullRecord>>,
}

impl AccountHistory {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            pools: BTreeMap::new(),
        }
    }

    pub(crate) fn from_pools(
        account_id: AccountId,
        pools: BTreeMap<String, Vec<PullRecord>>,
    ) -> Self {
        Self { account_id, pools }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn pools(&self) -> &BTreeMap<String, Vec<PullRecord>> {
        &self.pools
    }

    /// Newest-first timeline of one pool; empty if the pool was never seen.
    pub fn timeline(&self, pool_name: &str) -> &[PullRecord] {
        self.pools.get(pool_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.pools.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.values().all(Vec::is_empty)
    }

    /// Every record of every pool, newest first.
    ///
    /// Records with equal timestamps keep their per-pool order.
    pub fn records(&self) -> Vec<&PullRecord> {
        let mut all: Vec<&PullRecord> = self.pools.values().flatten().collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all
    }

    /// Puts `records` in front of the pool's timeline.
    pub(crate) fn prepend(&mut self, pool_name: &str, records: Vec<PullRecord>) {
        if records.is_empty() {
            return;
        }
        let timeline = self.pools.entry(pool_name.to_string()).or_default();
        timeline.splice(0..0, records);
    }
}
