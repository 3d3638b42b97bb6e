//! Per-account persistence.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/<account_id>/history.json   source of truth
//! <data_dir>/<account_id>/history.csv    readable export, regenerated
//! ```
//!
//! Both files are replaced atomically: written to a temporary file in the
//! same directory, synced, then renamed over the old one.

pub mod export;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::parse::ItemCatalog;
use crate::record::{AccountHistory, AccountId, InvalidAccountId, PullRecord};

pub const HISTORY_VERSION: u32 = 1;
const HISTORY_FILE: &str = "history.json";
const EXPORT_FILE: &str = "history.csv";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidAccountId(#[from] InvalidAccountId),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed history file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to render export {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} has format version {found}, this build reads version {HISTORY_VERSION}")]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Deserialize)]
struct HistoryFile {
    account_id: AccountId,
    #[serde(default)]
    pools: BTreeMap<String, Vec<PullRecord>>,
}

#[derive(Serialize)]
struct HistoryFileRef<'a> {
    version: u32,
    account_id: &'a AccountId,
    pools: &'a BTreeMap<String, Vec<PullRecord>>,
}

/// Account histories stored under one data directory.
#[derive(Debug, Clone)]
pub struct AccountStore {
    root: PathBuf,
}

impl AccountStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history_path(&self, account_id: &AccountId) -> PathBuf {
        self.root.join(account_id.as_str()).join(HISTORY_FILE)
    }

    pub fn export_path(&self, account_id: &AccountId) -> PathBuf {
        self.root.join(account_id.as_str()).join(EXPORT_FILE)
    }

    /// Loads an account's history; an account never seen before is empty.
    pub fn load(&self, account_id: &AccountId) -> Result<AccountHistory, StoreError> {
        let path = self.history_path(account_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No stored history for {}", account_id);
                return Ok(AccountHistory::new(account_id.clone()));
            }
            Err(e) => return Err(io_error(&path)(e)),
        };

        let json_error = |source| StoreError::Json {
            path: path.clone(),
            source,
        };
        let header: VersionHeader = serde_json::from_str(&text).map_err(json_error)?;
        if header.version != HISTORY_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path,
                found: header.version,
            });
        }
        let file: HistoryFile = serde_json::from_str(&text).map_err(json_error)?;
        if &file.account_id != account_id {
            warn!(
                "{} names account {}, expected {}",
                path.display(),
                file.account_id,
                account_id
            );
        }

        let history = AccountHistory::from_pools(account_id.clone(), file.pools);
        info!(
            "Loaded {} stored pulls for account {}",
            history.len(),
            account_id
        );
        Ok(history)
    }

    /// Replaces the stored history of the account.
    pub fn save(&self, history: &AccountHistory) -> Result<PathBuf, StoreError> {
        let path = self.history_path(history.account_id());
        let file = HistoryFileRef {
            version: HISTORY_VERSION,
            account_id: history.account_id(),
            pools: history.pools(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomically(&path, &json).map_err(io_error(&path))?;
        info!("Saved {} pulls to {}", history.len(), path.display());
        Ok(path)
    }

    /// Regenerates the readable table from `history`.
    pub fn write_export(
        &self,
        history: &AccountHistory,
        catalog: &ItemCatalog,
    ) -> Result<PathBuf, StoreError> {
        let path = self.export_path(history.account_id());
        let rows = export::project(history, catalog);
        let table = export::render_table(&rows).map_err(|source| StoreError::Csv {
            path: path.clone(),
            source,
        })?;
        write_atomically(&path, &table).map_err(io_error(&path))?;
        info!("Wrote {} rows to {}", rows.len(), path.display());
        Ok(path)
    }

    /// Accounts that have a stored history, sorted.
    pub fn list_accounts(&self) -> Result<Vec<AccountId>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root)(e)),
        };

        let mut accounts: Vec<AccountId> = entries
            .flatten()
            .filter(|entry| entry.path().join(HISTORY_FILE).is_file())
            .filter_map(|entry| {
                let name = entry.file_name();
                AccountId::parse(&name.to_string_lossy()).ok()
            })
            .collect();
        accounts.sort();
        Ok(accounts)
    }
}

/// Writes `contents` to a temporary file next to `path`, syncs it and renames
/// it over `path`.
fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
