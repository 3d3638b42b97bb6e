//! Known item names with their rarity, and per-pool pity lengths.
//!
//! File format (`resources/items.json`):
//!
//! ```json
//! {
//!   "items": { "Acacia": 5, "Enya": 4 },
//!   "pools": { "Standard Character Banner": { "pity": 80 } }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strsim::levenshtein;
use thiserror::Error;
use tracing::{info, warn};

use crate::record::Rarity;

/// Names shorter than this are never snapped; a single edit there changes
/// too much of the name.
const MIN_SNAP_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("item {item:?} has rarity {stars}, expected 3, 4 or 5")]
    InvalidRarity { item: String, stars: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PoolInfo {
    /// Pulls that guarantee a 5-star
    pub pity: u32,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: BTreeMap<String, u8>,
    #[serde(default)]
    pools: BTreeMap<String, PoolInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    items: HashMap<String, Rarity>,
    pools: HashMap<String, PoolInfo>,
}

impl ItemCatalog {
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(text)?;
        let items = file
            .items
            .into_iter()
            .map(|(item, stars)| match Rarity::from_stars(stars) {
                Some(rarity) => Ok((item, rarity)),
                None => Err(CatalogError::InvalidRarity { item, stars }),
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self {
            items,
            pools: file.pools.into_iter().collect(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Loads the catalog, or an empty one with a warning. Without a catalog
    /// rarity comes only from the screen.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => {
                info!(
                    "Loaded item catalog {} ({} items, {} pools)",
                    path.display(),
                    catalog.items.len(),
                    catalog.pools.len()
                );
                catalog
            }
            Err(e) => {
                warn!("{}. Continuing without item catalog.", e);
                Self::default()
            }
        }
    }

    #[cfg(test)]
    pub fn from_entries(items: &[(&str, u8)], pools: &[(&str, u32)]) -> Self {
        Self {
            items: items
                .iter()
                .filter_map(|(name, stars)| Some((name.to_string(), Rarity::from_stars(*stars)?)))
                .collect(),
            pools: pools
                .iter()
                .map(|(name, pity)| (name.to_string(), PoolInfo { pity: *pity }))
                .collect(),
        }
    }

    pub fn rarity_of(&self, item_name: &str) -> Option<Rarity> {
        self.items.get(item_name).copied()
    }

    pub fn pity_of(&self, pool_name: &str) -> Option<u32> {
        self.pools.get(pool_name).map(|info| info.pity)
    }

    /// The catalog spelling of `name`: the name itself when known, else the
    /// single catalog name one edit away. Ambiguous or distant names are not
    /// snapped.
    pub fn snap_name(&self, name: &str) -> Option<&str> {
        if let Some((known, _)) = self.items.get_key_value(name) {
            return Some(known.as_str());
        }
        if name.chars().count() < MIN_SNAP_LEN {
            return None;
        }

        let mut candidates = self
            .items
            .keys()
            .filter(|known| levenshtein(known, name) == 1);
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Some(only.as_str()),
            _ => None,
        }
    }
}
