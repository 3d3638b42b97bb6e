//! One export run: scan, parse, merge, persist.
//!
//! Everything a run needs travels in a `RunContext`; the account being
//! written is decided per run from the screen or the command line.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};

use crate::capture::FrameSource;
use crate::merge::{merge, MergeWarning};
use crate::parse::{ItemCatalog, ParseWarning, RecordParser};
use crate::record::{AccountId, PullRecord};
use crate::scan::layout::Columns;
use crate::scan::{scan, PageReader, ScanError, ScanOutput};
use crate::store::AccountStore;

/// Inputs of one run.
pub struct RunContext {
    /// Account to write, overriding the UID read from screen.
    pub account: Option<AccountId>,
    /// Pool of rows that carry no pool column.
    pub default_pool: Option<String>,
    pub max_pages: u32,
    pub columns: Columns,
    pub catalog: ItemCatalog,
    pub store: AccountStore,
}

/// What a run did.
#[derive(Debug)]
pub struct RunReport {
    pub account_id: AccountId,
    pub pages: u32,
    /// The scan hit the page limit before the end of the list.
    pub incomplete: bool,
    pub parsed: usize,
    pub newly_added: Vec<PullRecord>,
    pub parse_warnings: Vec<ParseWarning>,
    pub merge_warnings: Vec<MergeWarning>,
    pub total: usize,
    pub export_path: Option<PathBuf>,
}

/// Picks the account for this run. An explicit account wins over the
/// screen; a mismatch between the two is logged.
pub fn identify_account(
    explicit: Option<&AccountId>,
    on_screen: Option<&str>,
) -> Result<AccountId> {
    match (explicit, on_screen) {
        (Some(account), screen) => {
            if let Some(screen) = screen.filter(|s| *s != account.as_str()) {
                warn!(
                    "Screen shows UID {}, writing to account {} as requested",
                    screen, account
                );
            }
            Ok(account.clone())
        }
        (None, Some(screen)) => AccountId::parse(screen)
            .with_context(|| "UID read from screen is not usable, pass --account"),
        (None, None) => Err(anyhow!(
            "could not read the UID from screen, pass --account <uid>"
        )),
    }
}

/// Runs the whole pipeline against `source`.
///
/// A capture or OCR failure aborts before anything is written. A scan that
/// stops at the page limit is merged with a warning. Without a pool column
/// the pool must be given, or pulls would be filed under the wrong banner.
pub fn run_export<S, R>(source: &mut S, reader: &R, ctx: &RunContext) -> Result<RunReport>
where
    S: FrameSource + ?Sized,
    R: PageReader + ?Sized,
{
    if ctx.columns.pool.is_none() && ctx.default_pool.is_none() {
        return Err(anyhow!(
            "no pool selected: pass --pool <name> for the banner shown on screen"
        ));
    }

    let (output, incomplete) = match scan(source, reader, ctx.max_pages) {
        Ok(output) => (output, false),
        Err(ScanError::Incomplete(err)) => {
            warn!("{}; merging the pages read so far", err);
            (err.partial, true)
        }
        Err(err) => return Err(err).context("scanning the history screen failed"),
    };
    let ScanOutput {
        rows,
        pages,
        account_id,
    } = output;

    let account_id = identify_account(ctx.account.as_ref(), account_id.as_deref())?;
    info!("Account {}: {} rows on {} pages", account_id, rows.len(), pages);

    let parser = RecordParser::new(
        &ctx.catalog,
        &ctx.columns,
        ctx.default_pool.as_deref(),
    );
    let parsed = parser.parse_rows(&rows);
    let dropped = parsed.warnings.iter().filter(|w| w.dropped()).count();
    if dropped > 0 {
        warn!(
            "{} of {} rows could not be read and were skipped",
            dropped,
            rows.len()
        );
    }

    let existing = ctx
        .store
        .load(&account_id)
        .with_context(|| format!("loading history of account {}", account_id))?;
    let outcome = merge(existing, &parsed.batch);

    for warning in &outcome.warnings {
        if warning.is_gap() {
            error!("{}", warning);
        } else {
            warn!("{}", warning);
        }
    }

    if outcome.newly_added.is_empty() {
        info!("No new pulls for account {}", account_id);
    } else {
        ctx.store
            .save(&outcome.history)
            .with_context(|| format!("saving history of account {}", account_id))?;
        info!(
            "Added {} new pulls for account {}",
            outcome.newly_added.len(),
            account_id
        );
    }

    let export_path = if outcome.history.is_empty() {
        None
    } else {
        let path = ctx
            .store
            .write_export(&outcome.history, &ctx.catalog)
            .with_context(|| format!("writing export of account {}", account_id))?;
        Some(path)
    };

    Ok(RunReport {
        pages,
        incomplete,
        parsed: parsed.batch.len(),
        total: outcome.history.len(),
        newly_added: outcome.newly_added,
        parse_warnings: parsed.warnings,
        merge_warnings: outcome.warnings,
        export_path,
        account_id,
    })
}

/// Regenerates the readable table of a stored account.
pub fn regenerate_export(
    store: &AccountStore,
    catalog: &ItemCatalog,
    account: &AccountId,
) -> Result<PathBuf> {
    let history = store
        .load(account)
        .with_context(|| format!("loading history of account {}", account))?;
    if history.is_empty() {
        return Err(anyhow!("no stored history for account {}", account));
    }
    Ok(store.write_export(&history, catalog)?)
}
