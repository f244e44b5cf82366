//! Settlement reconciliation.
//!
//! Walks the unchecked bet records that are past their region's result
//! cutoff, pulls each placing account's remote ledger for the bet date,
//! and matches rows back by order code. One account's absence or failure
//! never blocks its siblings, and one bad record never aborts the pass.
//! The settlement write is gated on `checked`, so redundant passes are
//! no-ops.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RegionSettings;
use crate::credentials::CredentialManager;
use crate::platforms::{platform_tz, LedgerRow, LottoPlatform, PlatformRegistry};
use crate::relay::{RelayChecker, RelayDescriptor};
use crate::storage::Store;
use crate::types::{
    AccountSettlement, AccountUsage, BetRecord, Region, Settlement, SettlementOutcome,
};

/// What a reconciliation pass touched.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileReport {
    /// Due records the pass attempted.
    pub checked: usize,
    /// Records whose settlement was written.
    pub updated: usize,
}

/// Daily result cutoffs per region, in the platform timezone.
#[derive(Debug, Clone)]
pub struct RegionCutoffs {
    north: NaiveTime,
    central: NaiveTime,
    south: NaiveTime,
}

impl RegionCutoffs {
    pub fn from_settings(settings: &RegionSettings) -> anyhow::Result<Self> {
        Ok(RegionCutoffs {
            north: parse_cutoff(&settings.north_cutoff)?,
            central: parse_cutoff(&settings.central_cutoff)?,
            south: parse_cutoff(&settings.south_cutoff)?,
        })
    }

    pub fn for_region(&self, region: Region) -> NaiveTime {
        match region {
            Region::North => self.north,
            Region::Central => self.central,
            Region::South => self.south,
        }
    }
}

fn parse_cutoff(raw: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|e| anyhow::anyhow!("invalid cutoff time {raw:?}: {e}"))
}

pub struct Reconciler {
    store: Arc<Store>,
    registry: Arc<PlatformRegistry>,
    credentials: Arc<CredentialManager>,
    relay_checker: RelayChecker,
    cutoffs: RegionCutoffs,
}

impl Reconciler {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<PlatformRegistry>,
        credentials: Arc<CredentialManager>,
        relay_checker: RelayChecker,
        cutoffs: RegionCutoffs,
    ) -> Self {
        Reconciler {
            store,
            registry,
            credentials,
            relay_checker,
            cutoffs,
        }
    }

    /// A record is due once the platform-timezone clock passes its
    /// region's cutoff on the bet date, or the bet date is past.
    pub fn is_due(&self, record: &BetRecord, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&platform_tz());
        let today = local.date_naive();
        if record.bet_date < today {
            return true;
        }
        record.bet_date == today && local.time() >= self.cutoffs.for_region(record.region)
    }

    /// Reconcile every due record. Safe to call redundantly; failures
    /// are logged and skipped, never surfaced.
    pub async fn reconcile_due(&self) -> ReconcileReport {
        let now = Utc::now();
        let candidates = self.store.settlement_candidates();
        let mut report = ReconcileReport::default();

        for record in candidates {
            if !self.is_due(&record, now) {
                debug!(order_code = %record.order_code, "Not yet due, skipping");
                continue;
            }
            report.checked += 1;
            match self.reconcile_record(&record).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(order_code = %record.order_code, error = %e, "Reconciliation failed for record");
                }
            }
        }

        if report.checked > 0 {
            info!(checked = report.checked, updated = report.updated, "Reconciliation pass done");
        }
        report
    }

    async fn reconcile_record(&self, record: &BetRecord) -> anyhow::Result<bool> {
        let platform = self.registry.get(record.platform)?;

        let mut entries = Vec::with_capacity(record.accounts_used.len());
        for usage in &record.accounts_used {
            entries.push(self.reconcile_account(&platform, record, usage).await);
        }

        let settlement = aggregate(record, entries);
        let updated = self
            .store
            .write_settlement(&record.order_code, settlement)?;
        Ok(updated)
    }

    /// One account's share of a record. Every failure path folds into an
    /// `Error` entry so the sibling accounts still get reconciled.
    async fn reconcile_account(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        record: &BetRecord,
        usage: &AccountUsage,
    ) -> AccountSettlement {
        let Some(code) = usage.remote_order_code.as_deref() else {
            return error_entry(usage, "no remote order code recorded");
        };
        let Some(account) = self.store.account(&usage.account_id) else {
            return error_entry(usage, "account no longer exists");
        };

        let relay = match &account.relay {
            None => None,
            Some(raw) => match RelayDescriptor::parse(raw) {
                Err(e) => return error_entry(usage, &format!("invalid relay spec: {e}")),
                Ok(descriptor) => {
                    let health = self.relay_checker.check(&descriptor).await;
                    if !health.healthy {
                        return error_entry(usage, &format!("relay unhealthy: {}", health.detail));
                    }
                    Some(descriptor)
                }
            },
        };

        let relay_ref = relay.as_ref();
        let account_ref = &account;
        let bet_date = record.bet_date;
        let ledger = self
            .credentials
            .with_reauth(platform, account_ref, relay_ref, |token| async move {
                platform
                    .fetch_ledger(account_ref, relay_ref, &token, bet_date)
                    .await
            })
            .await;
        let rows = match ledger {
            Ok(rows) => rows,
            Err(e) => return error_entry(usage, &e.to_string()),
        };

        let matched = match_rows(&rows, code);
        if matched.is_empty() {
            debug!(
                username = %usage.username,
                order_code = code,
                ledger_rows = rows.len(),
                "No ledger rows matched"
            );
            return AccountSettlement {
                status: SettlementOutcome::NotFound,
                ..empty_entry(usage)
            };
        }

        settle_account(usage, &matched)
    }
}

/// Ledger rows whose order code matches, trimmed and case-insensitive.
fn match_rows<'a>(rows: &'a [LedgerRow], code: &str) -> Vec<&'a LedgerRow> {
    let wanted = code.trim().to_uppercase();
    rows.iter()
        .filter(|r| r.order_code.trim().to_uppercase() == wanted)
        .collect()
}

fn empty_entry(usage: &AccountUsage) -> AccountSettlement {
    AccountSettlement {
        account_id: usage.account_id.clone(),
        username: usage.username.clone(),
        order_code: usage.remote_order_code.clone().unwrap_or_default(),
        status: SettlementOutcome::Error,
        total_stake: 0.0,
        total_win_loss: 0.0,
        record_count: 0,
        winning_numbers: Vec::new(),
        winning_numbers_by_channel: HashMap::new(),
        channel_results: HashMap::new(),
        error: None,
    }
}

fn error_entry(usage: &AccountUsage, message: &str) -> AccountSettlement {
    warn!(username = %usage.username, error = message, "Account reconciliation error");
    AccountSettlement {
        error: Some(message.to_string()),
        ..empty_entry(usage)
    }
}

/// Aggregate an account's matched ledger rows.
fn settle_account(usage: &AccountUsage, rows: &[&LedgerRow]) -> AccountSettlement {
    let mut entry = empty_entry(usage);
    entry.record_count = rows.len();

    let mut has_win = false;
    for row in rows {
        entry.total_stake += row.stake;
        entry.total_win_loss += row.win_loss;
        if row.is_win() || row.win_loss > 0.0 {
            has_win = true;
        }
        if row.is_win() {
            entry.winning_numbers.extend(row.numbers.iter().cloned());
        }

        for channel in &row.channels {
            let won = row.channel_win.iter().any(|c| c == channel);
            let outcome = entry.channel_results.entry(channel.clone()).or_default();
            outcome.stake += row.stake;
            outcome.win_loss += row.win_loss;
            outcome.numbers.extend(row.numbers.iter().cloned());
            if !outcome.accounts.contains(&usage.username) {
                outcome.accounts.push(usage.username.clone());
            }
            if won {
                outcome.status = Some(SettlementOutcome::Win);
                outcome.winning_numbers.extend(row.numbers.iter().cloned());
                entry
                    .winning_numbers_by_channel
                    .entry(channel.clone())
                    .or_default()
                    .extend(row.numbers.iter().cloned());
            }
        }
    }

    dedup(&mut entry.winning_numbers);
    for outcome in entry.channel_results.values_mut() {
        dedup(&mut outcome.numbers);
        dedup(&mut outcome.winning_numbers);
        if outcome.status.is_none() {
            outcome.status = Some(SettlementOutcome::derive(false, outcome.win_loss));
        }
    }
    for numbers in entry.winning_numbers_by_channel.values_mut() {
        dedup(numbers);
    }

    entry.status = SettlementOutcome::derive(has_win, entry.total_win_loss);
    entry
}

/// Fold the per-account entries into the whole-bet settlement.
fn aggregate(record: &BetRecord, entries: Vec<AccountSettlement>) -> Settlement {
    let mut settlement = Settlement {
        total_accounts: record.accounts_used.len(),
        checked_at: Some(Utc::now()),
        ..Settlement::default()
    };

    let mut has_any_win = false;
    for entry in &entries {
        match entry.status {
            SettlementOutcome::Error | SettlementOutcome::NotFound => continue,
            SettlementOutcome::Win => has_any_win = true,
            _ => {}
        }
        settlement.processed_accounts += 1;
        settlement.total_stake += entry.total_stake;
        settlement.total_win_amount += entry.total_win_loss;
        settlement
            .winning_numbers
            .extend(entry.winning_numbers.iter().cloned());

        for (channel, numbers) in &entry.winning_numbers_by_channel {
            settlement
                .winning_numbers_by_channel
                .entry(channel.clone())
                .or_default()
                .extend(numbers.iter().cloned());
        }
        for (channel, part) in &entry.channel_results {
            let outcome = settlement
                .channel_results
                .entry(channel.clone())
                .or_default();
            outcome.stake += part.stake;
            outcome.win_loss += part.win_loss;
            outcome.numbers.extend(part.numbers.iter().cloned());
            outcome
                .winning_numbers
                .extend(part.winning_numbers.iter().cloned());
            for username in &part.accounts {
                if !outcome.accounts.contains(username) {
                    outcome.accounts.push(username.clone());
                }
            }
            if part.status == Some(SettlementOutcome::Win) {
                outcome.status = Some(SettlementOutcome::Win);
            }
        }
    }

    dedup(&mut settlement.winning_numbers);
    for numbers in settlement.winning_numbers_by_channel.values_mut() {
        dedup(numbers);
    }
    for outcome in settlement.channel_results.values_mut() {
        dedup(&mut outcome.numbers);
        dedup(&mut outcome.winning_numbers);
        if outcome.status.is_none() {
            outcome.status = Some(SettlementOutcome::derive(false, outcome.win_loss));
        }
    }

    settlement.status = Some(SettlementOutcome::derive(
        has_any_win,
        settlement.total_win_amount,
    ));
    settlement.account_results = entries;
    settlement
}

/// In-place order-preserving dedup.
fn dedup(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
