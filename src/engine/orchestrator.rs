//! Multi-round retry engine.
//!
//! Splits a wager's items across a worker pool and keeps retrying the
//! unplaced remainder with substitute workers until everything is placed,
//! the pool runs dry, or the round cap is hit. A worker is touched at
//! most once per submission, success or failure, so the loop always
//! terminates. Partial placement is a normal, reported outcome.

use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetrySettings;
use crate::distribution::distribute;
use crate::engine::placement::{PlacementOutcome, Placer};
use crate::platforms::{today_in_platform_tz, LottoPlatform, PlatformRegistry};
use crate::storage::{AccountFilter, Store};
use crate::types::{
    Account, AccountStatus, BetRecord, DistributionPolicy, Settlement, WagerRequest,
};

/// Retry knobs, injected so tests can run with zero pauses.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub batch_size: usize,
    pub inter_batch_pause: Duration,
    pub inter_round_pause: Duration,
    pub max_rounds: u32,
}

impl RetryConfig {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        RetryConfig {
            batch_size: settings.batch_size.max(1),
            inter_batch_pause: Duration::from_millis(settings.inter_batch_pause_ms),
            inter_round_pause: Duration::from_millis(settings.inter_round_pause_ms),
            max_rounds: settings.max_rounds.max(1),
        }
    }

    /// Zero-pause variant for deterministic tests.
    pub fn without_pauses(batch_size: usize, max_rounds: u32) -> Self {
        RetryConfig {
            batch_size: batch_size.max(1),
            inter_batch_pause: Duration::ZERO,
            inter_round_pause: Duration::ZERO,
            max_rounds: max_rounds.max(1),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Summary counters over every placement attempt of a submission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmissionSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub relay_errors: usize,
    pub accounts_available: usize,
    pub accounts_used: usize,
}

/// Multi-round trace for the split policies.
#[derive(Debug, Clone, Serialize)]
pub struct RetryTrace {
    pub rounds: u32,
    pub original_items: usize,
    pub placed_items: usize,
    pub unplaced_items: Vec<String>,
    /// placed / original.
    pub success_rate: f64,
}

/// What `submit` always returns, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_code: Option<String>,
    pub outcomes: Vec<PlacementOutcome>,
    /// username → items assigned over the whole submission.
    pub distribution: HashMap<String, Vec<String>>,
    pub summary: SubmissionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryTrace>,
}

impl SubmissionReport {
    fn rejected(message: impl Into<String>) -> Self {
        SubmissionReport {
            success: false,
            message: message.into(),
            order_code: None,
            outcomes: Vec::new(),
            distribution: HashMap::new(),
            summary: SubmissionSummary::default(),
            retry: None,
        }
    }
}

pub struct Orchestrator {
    store: Arc<Store>,
    registry: Arc<PlatformRegistry>,
    placer: Arc<Placer>,
    config: RetryConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<PlatformRegistry>,
        placer: Arc<Placer>,
        config: RetryConfig,
    ) -> Self {
        Orchestrator {
            store,
            registry,
            placer,
            config,
        }
    }

    /// Place a wager across the owner's active accounts. Never fails:
    /// pool exhaustion, total placement failure, and partial placement
    /// all come back as a structured report.
    pub async fn submit(&self, request: WagerRequest) -> SubmissionReport {
        let platform = match self.registry.get(request.platform) {
            Ok(p) => p,
            Err(e) => return SubmissionReport::rejected(e.to_string()),
        };

        let pool = self.store.accounts(&AccountFilter {
            owner: Some(request.owner.clone()),
            platform: Some(request.platform),
            status: Some(AccountStatus::Active),
        });
        if pool.is_empty() {
            return SubmissionReport::rejected(format!(
                "no active {} accounts for owner {}",
                request.platform, request.owner
            ));
        }

        let worker_count = request.worker_count.max(1).min(pool.len());
        let bet_date = request.bet_date.unwrap_or_else(today_in_platform_tz);
        info!(
            request = %request,
            %bet_date,
            pool = pool.len(),
            workers = worker_count,
            "Submitting wager"
        );

        let run = match request.policy {
            DistributionPolicy::All => {
                self.run_single_round(&platform, &request, &pool[..worker_count], bet_date)
                    .await
            }
            DistributionPolicy::Equal | DistributionPolicy::Random => {
                self.run_rounds(&platform, &request, &pool, worker_count, bet_date)
                    .await
            }
        };

        self.finish(&platform, &request, bet_date, pool.len(), run)
    }

    /// `all` policy: every selected worker gets the full list, one
    /// round, no reassignment.
    async fn run_single_round(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        request: &WagerRequest,
        workers: &[Account],
        bet_date: chrono::NaiveDate,
    ) -> RoundsResult {
        let assignment = distribute(
            &request.numbers,
            &ids(workers),
            DistributionPolicy::All,
        );
        let assigned: Vec<(&Account, Vec<String>)> = workers
            .iter()
            .filter_map(|w| assignment.get(&w.id).map(|items| (w, items.clone())))
            .collect();

        let outcomes = self
            .execute_batches(platform, request, &assigned, bet_date)
            .await;

        RoundsResult {
            outcomes,
            unplaced: Vec::new(),
            rounds: 1,
            touched: assigned.iter().map(|(w, _)| w.id.clone()).collect(),
            traced: false,
        }
    }

    /// Split policies: the bounded multi-round loop.
    async fn run_rounds(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        request: &WagerRequest,
        pool: &[Account],
        worker_count: usize,
        bet_date: chrono::NaiveDate,
    ) -> RoundsResult {
        let mut remaining: Vec<String> = request.numbers.clone();
        let mut available: Vec<Account> = pool[..worker_count].to_vec();
        let mut touched: HashSet<String> = HashSet::new();
        let mut outcomes: Vec<PlacementOutcome> = Vec::new();
        let mut rounds = 0u32;

        while rounds < self.config.max_rounds && !remaining.is_empty() {
            if available.is_empty() {
                available = pool
                    .iter()
                    .filter(|a| !touched.contains(&a.id))
                    .cloned()
                    .collect();
                if available.is_empty() {
                    warn!(
                        unplaced = remaining.len(),
                        "Worker pool exhausted with items unplaced"
                    );
                    break;
                }
                info!(substitutes = available.len(), "Refilled worker pool from unused accounts");
            }

            rounds += 1;
            if rounds > 1 {
                tokio::time::sleep(self.config.inter_round_pause).await;
            }

            let assignment = distribute(&remaining, &ids(&available), request.policy);
            let assigned: Vec<(&Account, Vec<String>)> = available
                .iter()
                .filter_map(|w| assignment.get(&w.id).map(|items| (w, items.clone())))
                .collect();
            info!(
                round = rounds,
                remaining = remaining.len(),
                workers = assigned.len(),
                "Starting placement round"
            );

            let round_outcomes = self
                .execute_batches(platform, request, &assigned, bet_date)
                .await;

            let placed: HashSet<&String> = round_outcomes
                .iter()
                .filter(|o| o.success)
                .flat_map(|o| o.numbers_assigned.iter())
                .collect();
            remaining.retain(|n| !placed.contains(n));

            for (worker, _) in &assigned {
                touched.insert(worker.id.clone());
            }
            available.retain(|a| !touched.contains(&a.id));

            outcomes.extend(round_outcomes);
        }

        RoundsResult {
            outcomes,
            unplaced: remaining,
            rounds,
            touched,
            traced: true,
        }
    }

    /// Run the assigned workers in fixed-size concurrency batches with
    /// the inter-batch pause between chunks.
    async fn execute_batches(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        request: &WagerRequest,
        assigned: &[(&Account, Vec<String>)],
        bet_date: chrono::NaiveDate,
    ) -> Vec<PlacementOutcome> {
        let mut outcomes = Vec::with_capacity(assigned.len());
        for (i, chunk) in assigned.chunks(self.config.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_batch_pause).await;
            }
            let futures = chunk.iter().map(|(account, items)| {
                self.placer
                    .place_for_account(platform, account, request, items, bet_date)
            });
            outcomes.extend(join_all(futures).await);
        }
        outcomes
    }

    /// Fold the rounds into the report and persist the bet record when
    /// at least one item landed.
    fn finish(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        request: &WagerRequest,
        bet_date: chrono::NaiveDate,
        pool_size: usize,
        run: RoundsResult,
    ) -> SubmissionReport {
        let RoundsResult {
            outcomes,
            unplaced,
            rounds,
            touched,
            traced,
        } = run;

        let successes: Vec<&PlacementOutcome> = outcomes.iter().filter(|o| o.success).collect();
        let placed_union: Vec<String> = {
            let mut seen = HashSet::new();
            successes
                .iter()
                .flat_map(|o| o.numbers_assigned.iter())
                .filter(|n| seen.insert((*n).clone()))
                .cloned()
                .collect()
        };

        let summary = SubmissionSummary {
            total: outcomes.len(),
            success: successes.len(),
            failed: outcomes.len() - successes.len(),
            relay_errors: outcomes.iter().filter(|o| o.relay_error).count(),
            accounts_available: pool_size,
            accounts_used: touched.len(),
        };

        let mut distribution: HashMap<String, Vec<String>> = HashMap::new();
        for outcome in &outcomes {
            distribution
                .entry(outcome.username.clone())
                .or_default()
                .extend(outcome.numbers_assigned.iter().cloned());
        }

        let retry = traced.then(|| RetryTrace {
            rounds,
            original_items: request.numbers.len(),
            placed_items: placed_union.len(),
            unplaced_items: unplaced.clone(),
            success_rate: if request.numbers.is_empty() {
                0.0
            } else {
                placed_union.len() as f64 / request.numbers.len() as f64
            },
        });

        let order_code = if successes.is_empty() {
            None
        } else {
            Some(self.persist_record(platform, request, bet_date, &outcomes, &placed_union, touched.len()))
        };

        let success = !successes.is_empty();
        let message = if !success {
            "no items could be placed".to_string()
        } else if unplaced.is_empty() {
            format!("all {} items placed", placed_union.len())
        } else {
            format!(
                "{} of {} items placed, {} unplaced",
                placed_union.len(),
                request.numbers.len(),
                unplaced.len()
            )
        };

        SubmissionReport {
            success,
            message,
            order_code,
            outcomes,
            distribution,
            summary,
            retry,
        }
    }

    fn persist_record(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        request: &WagerRequest,
        bet_date: chrono::NaiveDate,
        outcomes: &[PlacementOutcome],
        placed_union: &[String],
        attempted: usize,
    ) -> String {
        let order_code = outcomes
            .iter()
            .filter(|o| o.success)
            .find_map(|o| o.order_code.clone())
            .unwrap_or_else(BetRecord::generate_order_code);

        let accounts_used: Vec<_> = outcomes
            .iter()
            .filter(|o| o.success)
            .cloned()
            .map(PlacementOutcome::into_usage)
            .collect();

        let mut record = BetRecord {
            order_code: order_code.clone(),
            owner: request.owner.clone(),
            platform: request.platform,
            region: request.region,
            bet_type: platform.normalize_bet_type(&request.bet_type),
            bet_type_display: request.bet_type.clone(),
            channels: request.channels.clone(),
            numbers: placed_union.to_vec(),
            points: request.points,
            total_stake: 0.0,
            policy: request.policy,
            accounts_used,
            total_accounts_used: 0,
            successful_bets: 0,
            failed_bets: 0,
            overall_status: crate::types::OverallStatus::Pending,
            settlement: Settlement::default(),
            bet_date,
            created_at: chrono::Utc::now(),
        };
        record.update_statistics(attempted);

        info!(%record, "Persisting bet record");
        if let Err(e) = self.store.insert_bet(record) {
            warn!(order_code, error = %e, "Failed to persist bet record");
        }
        order_code
    }
}

struct RoundsResult {
    outcomes: Vec<PlacementOutcome>,
    unplaced: Vec<String>,
    rounds: u32,
    touched: HashSet<String>,
    traced: bool,
}

fn ids(workers: &[Account]) -> Vec<String> {
    workers.iter().map(|w| w.id.clone()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
