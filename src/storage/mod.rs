//! Persistence layer.
//!
//! Accounts and bet records live in a single JSON file behind a `Mutex`.
//! The lock is never held across an await point; engine code reads owned
//! snapshots and writes back through field-level patches, so concurrent
//! tasks never share a live account reference.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{
    Account, AccountPatch, AccountStatus, BetRecord, OverallStatus, Platform, PlacementStatus,
    Region, Settlement,
};

/// Default store file path.
const DEFAULT_STORE_FILE: &str = "syndicate_store.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    accounts: Vec<Account>,
    bets: Vec<BetRecord>,
}

/// JSON-file backed store for accounts and bet records.
pub struct Store {
    path: PathBuf,
    data: Mutex<StoreData>,
}

/// Account query filter. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub owner: Option<String>,
    pub platform: Option<Platform>,
    pub status: Option<AccountStatus>,
}

/// Bet history query filter with pagination.
#[derive(Debug, Clone)]
pub struct BetFilter {
    pub owner: Option<String>,
    pub platform: Option<Platform>,
    pub status: Option<OverallStatus>,
    /// Case-insensitive substring match on the order code.
    pub order_code: Option<String>,
    pub region: Option<Region>,
    pub bet_type: Option<String>,
    pub from: Option<chrono::NaiveDate>,
    pub to: Option<chrono::NaiveDate>,
    pub page: usize,
    pub limit: usize,
}

impl Default for BetFilter {
    fn default() -> Self {
        BetFilter {
            owner: None,
            platform: None,
            status: None,
            order_code: None,
            region: None,
            bet_type: None,
            from: None,
            to: None,
            page: 0,
            limit: 20,
        }
    }
}

impl Store {
    /// Open the store file, or start fresh if it doesn't exist.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let path = PathBuf::from(path.unwrap_or(DEFAULT_STORE_FILE));

        let data = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store from {}", path.display()))?;
            let data: StoreData = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse store from {}", path.display()))?;
            info!(
                path = %path.display(),
                accounts = data.accounts.len(),
                bets = data.bets.len(),
                "Store loaded from disk"
            );
            data
        } else {
            info!(path = %path.display(), "No store file found, starting fresh");
            StoreData::default()
        };

        Ok(Store {
            path,
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        let json =
            serde_json::to_string_pretty(data).context("Failed to serialise store")?;
        std::fs::write(&self.path, &json)
            .with_context(|| format!("Failed to write store to {}", self.path.display()))?;
        debug!(path = %self.path.display(), "Store saved");
        Ok(())
    }

    // -- accounts ---------------------------------------------------------

    /// Accounts matching the filter, in insertion order.
    pub fn accounts(&self, filter: &AccountFilter) -> Vec<Account> {
        let data = self.data.lock().expect("store lock poisoned");
        data.accounts
            .iter()
            .filter(|a| filter.owner.as_ref().is_none_or(|o| &a.owner == o))
            .filter(|a| filter.platform.is_none_or(|p| a.platform == p))
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .cloned()
            .collect()
    }

    /// Read one account by id.
    pub fn account(&self, id: &str) -> Option<Account> {
        let data = self.data.lock().expect("store lock poisoned");
        data.accounts.iter().find(|a| a.id == id).cloned()
    }

    /// Insert or replace an account (matched by id).
    pub fn upsert_account(&self, account: Account) -> Result<()> {
        let mut data = self.data.lock().expect("store lock poisoned");
        match data.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => data.accounts.push(account),
        }
        self.persist(&data)
    }

    /// Apply a field-level patch to an account. Unknown ids are a no-op
    /// (the account may have been deleted since the snapshot was taken).
    pub fn apply(&self, id: &str, patch: &AccountPatch) -> Result<()> {
        let mut data = self.data.lock().expect("store lock poisoned");
        if let Some(account) = data.accounts.iter_mut().find(|a| a.id == id) {
            patch.apply_to(account);
            self.persist(&data)?;
        } else {
            debug!(account_id = id, "Patch for unknown account ignored");
        }
        Ok(())
    }

    // -- bet records ------------------------------------------------------

    /// Persist a new bet record. Records with no successful placement are
    /// rejected; the orchestrator never creates them.
    pub fn insert_bet(&self, record: BetRecord) -> Result<()> {
        let has_success = record
            .accounts_used
            .iter()
            .any(|u| u.bet_status == PlacementStatus::Success);
        if !has_success {
            anyhow::bail!(
                "refusing to persist bet {} with no successful placement",
                record.order_code
            );
        }
        let mut data = self.data.lock().expect("store lock poisoned");
        data.bets.push(record);
        self.persist(&data)
    }

    /// Read one bet record by exact order code.
    pub fn bet(&self, order_code: &str) -> Option<BetRecord> {
        let data = self.data.lock().expect("store lock poisoned");
        data.bets.iter().find(|b| b.order_code == order_code).cloned()
    }

    /// Filtered, paginated history, newest first. Returns the page and the
    /// total match count.
    pub fn bets(&self, filter: &BetFilter) -> (Vec<BetRecord>, usize) {
        let data = self.data.lock().expect("store lock poisoned");
        let needle = filter.order_code.as_ref().map(|c| c.to_lowercase());

        let mut matches: Vec<&BetRecord> = data
            .bets
            .iter()
            .filter(|b| filter.owner.as_ref().is_none_or(|o| &b.owner == o))
            .filter(|b| filter.platform.is_none_or(|p| b.platform == p))
            .filter(|b| filter.status.is_none_or(|s| b.overall_status == s))
            .filter(|b| filter.region.is_none_or(|r| b.region == r))
            .filter(|b| {
                filter
                    .bet_type
                    .as_ref()
                    .is_none_or(|t| b.bet_type.eq_ignore_ascii_case(t))
            })
            .filter(|b| {
                needle
                    .as_ref()
                    .is_none_or(|n| b.order_code.to_lowercase().contains(n))
            })
            .filter(|b| filter.from.is_none_or(|d| b.bet_date >= d))
            .filter(|b| filter.to.is_none_or(|d| b.bet_date <= d))
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matches.len();

        let page = matches
            .into_iter()
            .skip(filter.page * filter.limit)
            .take(filter.limit)
            .cloned()
            .collect();
        (page, total)
    }

    /// Records waiting on settlement: unchecked and at least partly placed.
    pub fn settlement_candidates(&self) -> Vec<BetRecord> {
        let data = self.data.lock().expect("store lock poisoned");
        data.bets
            .iter()
            .filter(|b| b.is_settleable())
            .cloned()
            .collect()
    }

    /// Write a settlement onto a record. The `checked` flag gates the
    /// write: a record that already settled is left untouched. Returns
    /// whether anything was written.
    pub fn write_settlement(&self, order_code: &str, settlement: Settlement) -> Result<bool> {
        let mut data = self.data.lock().expect("store lock poisoned");
        let Some(record) = data.bets.iter_mut().find(|b| b.order_code == order_code) else {
            anyhow::bail!("settlement for unknown bet {order_code}");
        };
        if record.settlement.checked {
            debug!(order_code, "Settlement already written, skipping");
            return Ok(false);
        }
        record.settlement = settlement;
        record.settlement.checked = true;
        self.persist(&data)?;
        Ok(true)
    }

    /// Delete the store file (for testing or reset).
    pub fn delete_file(path: &str) -> Result<()> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to delete store file {path}"))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
