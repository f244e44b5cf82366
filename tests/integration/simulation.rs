//! End-to-end submission and reconciliation scenarios against the mock
//! platform, with zero-pause retry config for determinism.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;

use syndicate::config::{CredentialSettings, RegionSettings};
use syndicate::credentials::CredentialManager;
use syndicate::engine::reconciler::RegionCutoffs;
use syndicate::engine::{Orchestrator, Placer, Reconciler, RetryConfig};
use syndicate::platforms::PlatformRegistry;
use syndicate::relay::RelayChecker;
use syndicate::storage::Store;
use syndicate::types::{
    Account, AccountStatus, AccountUsage, BetRecord, DistributionPolicy, OverallStatus,
    PlacementStatus, Platform, Region, Settlement, SettlementOutcome, WagerRequest,
};

use crate::mock_platform::MockPlatform;

struct Harness {
    store: Arc<Store>,
    orchestrator: Orchestrator,
    reconciler: Reconciler,
    path: String,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = Store::delete_file(&self.path);
    }
}

fn harness(mock: Arc<MockPlatform>) -> Harness {
    let mut path = std::env::temp_dir();
    path.push(format!("syndicate_sim_{}.json", uuid::Uuid::new_v4()));
    let path = path.to_string_lossy().to_string();

    let store = Arc::new(Store::open(Some(&path)).unwrap());
    let registry = Arc::new(PlatformRegistry::with_adapters(Some(mock), None));
    let credentials = Arc::new(CredentialManager::new(
        store.clone(),
        &CredentialSettings::default(),
    ));
    let relay_checker = RelayChecker::new(
        "http://127.0.0.1:1/".to_string(),
        Duration::from_millis(50),
    );
    let placer = Arc::new(Placer::new(
        store.clone(),
        credentials.clone(),
        relay_checker.clone(),
    ));
    let orchestrator = Orchestrator::new(
        store.clone(),
        registry.clone(),
        placer,
        RetryConfig::without_pauses(5, 5),
    );
    let reconciler = Reconciler::new(
        store.clone(),
        registry,
        credentials,
        relay_checker,
        RegionCutoffs::from_settings(&RegionSettings::default()).unwrap(),
    );

    Harness {
        store,
        orchestrator,
        reconciler,
        path,
    }
}

fn account(id: &str, username: &str) -> Account {
    Account {
        id: id.to_string(),
        owner: "owner-1".to_string(),
        platform: Platform::Sgd666,
        username: username.to_string(),
        password: "secret".to_string(),
        relay: None,
        access_token: None,
        token_expiry: None,
        status: AccountStatus::Active,
        balance: 0.0,
        last_check: None,
        created_at: Utc::now(),
    }
}

fn request(numbers: &[&str], policy: DistributionPolicy, workers: usize) -> WagerRequest {
    WagerRequest {
        owner: "owner-1".to_string(),
        platform: Platform::Sgd666,
        region: Region::North,
        bet_type: "bao-lo".to_string(),
        channels: vec!["hanoi".to_string()],
        numbers: numbers.iter().map(|s| s.to_string()).collect(),
        points: 10.0,
        policy,
        worker_count: workers,
        bet_date: Some(NaiveDate::from_ymd_opt(2026, 8, 20).unwrap()),
    }
}

fn seed_accounts(store: &Store, usernames: &[&str]) {
    for (i, username) in usernames.iter().enumerate() {
        store
            .upsert_account(account(&format!("a{i}"), username))
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_equal_policy_places_everything_in_one_round() {
    let mock = MockPlatform::new(Platform::Sgd666);
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1", "u2", "u3"]);

    let report = h
        .orchestrator
        .submit(request(&["01", "02", "03", "04", "05", "06"], DistributionPolicy::Equal, 3))
        .await;

    assert!(report.success);
    assert_eq!(report.summary.success, 3);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.accounts_used, 3);

    let retry = report.retry.expect("split policy carries a retry trace");
    assert_eq!(retry.rounds, 1);
    assert_eq!(retry.placed_items, 6);
    assert!(retry.unplaced_items.is_empty());
    assert!((retry.success_rate - 1.0).abs() < 1e-10);

    // Each worker was touched exactly once.
    let state = mock.state();
    for u in ["u1", "u2", "u3"] {
        assert_eq!(state.place_calls[u], 1);
    }
    drop(state);

    // Persisted record carries the placed union and per-subset stakes.
    let code = report.order_code.expect("order code persisted");
    let record = h.store.bet(&code).expect("record persisted");
    assert_eq!(record.overall_status, OverallStatus::Completed);
    let mut numbers = record.numbers.clone();
    numbers.sort();
    assert_eq!(numbers, vec!["01", "02", "03", "04", "05", "06"]);
    // 2 numbers × 10 pts × 1 channel per account.
    for usage in &record.accounts_used {
        assert!((usage.stake_amount - 20.0).abs() < 1e-10);
    }
    assert!((record.total_stake - 60.0).abs() < 1e-10);
}

#[tokio::test]
async fn test_failing_worker_is_replaced_next_round() {
    let mock = MockPlatform::new(Platform::Sgd666);
    mock.fail_always("u2");
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1", "u2", "u3"]);

    let report = h
        .orchestrator
        .submit(request(&["01", "02", "03", "04"], DistributionPolicy::Equal, 2))
        .await;

    assert!(report.success);
    let retry = report.retry.unwrap();
    assert_eq!(retry.rounds, 2);
    assert_eq!(retry.placed_items, 4);
    assert!(retry.unplaced_items.is_empty());

    // u2 failed its one shot and was never retried; u3 substituted.
    let state = mock.state();
    assert_eq!(state.place_calls["u1"], 1);
    assert_eq!(state.place_calls["u2"], 1);
    assert_eq!(state.place_calls["u3"], 1);
    drop(state);

    let record = h.store.bet(&report.order_code.unwrap()).unwrap();
    assert_eq!(record.overall_status, OverallStatus::PartialSuccess);
    assert_eq!(record.successful_bets, 2);
    assert_eq!(record.failed_bets, 1);
}

#[tokio::test]
async fn test_all_policy_replicates_without_retry() {
    let mock = MockPlatform::new(Platform::Sgd666);
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1", "u2"]);

    let report = h
        .orchestrator
        .submit(request(&["11", "22"], DistributionPolicy::All, 2))
        .await;

    assert!(report.success);
    assert!(report.retry.is_none());
    assert_eq!(report.summary.success, 2);

    // Both workers received the full list.
    let state = mock.state();
    assert_eq!(state.placed.len(), 2);
    for (_, numbers, _) in state.placed.iter() {
        assert_eq!(*numbers, vec!["11".to_string(), "22".to_string()]);
    }
}

#[tokio::test]
async fn test_pool_exhaustion_reports_partial_placement() {
    let mock = MockPlatform::new(Platform::Sgd666);
    mock.fail_always("u2");
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1", "u2"]);

    let report = h
        .orchestrator
        .submit(request(&["01", "02", "03", "04"], DistributionPolicy::Equal, 2))
        .await;

    // Half placed, pool exhausted: still a success with a remainder.
    assert!(report.success);
    let retry = report.retry.unwrap();
    assert_eq!(retry.placed_items, 2);
    assert_eq!(retry.unplaced_items.len(), 2);
    assert!((retry.success_rate - 0.5).abs() < 1e-10);

    let record = h.store.bet(&report.order_code.unwrap()).unwrap();
    assert_eq!(record.numbers.len(), 2);
}

#[tokio::test]
async fn test_total_failure_persists_nothing() {
    let mock = MockPlatform::new(Platform::Sgd666);
    mock.fail_always("u1");
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1"]);

    let report = h
        .orchestrator
        .submit(request(&["01", "02"], DistributionPolicy::Equal, 1))
        .await;

    assert!(!report.success);
    assert!(report.order_code.is_none());
    let (bets, total) = h.store.bets(&Default::default());
    assert!(bets.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_round_cap_stops_retrying() {
    let mock = MockPlatform::new(Platform::Sgd666);
    let h = harness(mock.clone());
    // Six accounts, every placement refused: with one worker per round
    // the loop must stop at the cap, not the pool.
    seed_accounts(&h.store, &["u1", "u2", "u3", "u4", "u5", "u6"]);
    for u in ["u1", "u2", "u3", "u4", "u5", "u6"] {
        mock.fail_always(u);
    }

    let report = h
        .orchestrator
        .submit(request(&["01"], DistributionPolicy::Equal, 1))
        .await;

    assert!(!report.success);
    assert!(report.order_code.is_none());

    let retry = report.retry.unwrap();
    assert_eq!(retry.rounds, 5);
    assert_eq!(retry.placed_items, 0);
    assert_eq!(retry.unplaced_items, vec!["01".to_string()]);
    assert!((retry.success_rate - 0.0).abs() < 1e-10);

    // One substitute per round, each touched exactly once, and the
    // sixth account never spent.
    assert_eq!(report.summary.total, 5);
    assert_eq!(report.summary.accounts_used, 5);
    let state = mock.state();
    for u in ["u1", "u2", "u3", "u4", "u5"] {
        assert_eq!(state.place_calls[u], 1);
    }
    assert!(!state.place_calls.contains_key("u6"));
}

#[tokio::test]
async fn test_remainder_shrinks_monotonically_across_rounds() {
    let mock = MockPlatform::new(Platform::Sgd666);
    // u1 places its chunk, u2 refuses, u3 picks up the remainder.
    mock.fail_always("u2");
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1", "u2", "u3"]);

    let report = h
        .orchestrator
        .submit(request(&["01", "02", "03", "04", "05", "06"], DistributionPolicy::Equal, 2))
        .await;

    assert!(report.success);
    let retry = report.retry.unwrap();
    assert_eq!(retry.rounds, 2);
    assert_eq!(retry.placed_items, 6);
    assert!(retry.unplaced_items.is_empty());

    // Round 1 assigned 3+3 over two workers; round 2 carried only u2's
    // unplaced half to the substitute, never re-placing u1's chunk.
    let state = mock.state();
    let round_two = state
        .placed
        .iter()
        .find(|(username, _, _)| username == "u3")
        .expect("substitute placed");
    assert_eq!(round_two.1.len(), 3);
    let round_one = state
        .placed
        .iter()
        .find(|(username, _, _)| username == "u1")
        .expect("first worker placed");
    assert!(round_one.1.iter().all(|n| !round_two.1.contains(n)));
}

#[tokio::test]
async fn test_no_active_accounts_is_structured_failure() {
    let mock = MockPlatform::new(Platform::Sgd666);
    let h = harness(mock);

    let report = h
        .orchestrator
        .submit(request(&["01"], DistributionPolicy::Equal, 1))
        .await;

    assert!(!report.success);
    assert!(report.message.contains("no active"));
    assert_eq!(report.summary.total, 0);
}

// ---------------------------------------------------------------------------
// Reauthentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reauth_retries_exactly_once_and_succeeds() {
    let mock = MockPlatform::new(Platform::Sgd666);
    mock.unauthorized_once("u1");
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1"]);

    let report = h
        .orchestrator
        .submit(request(&["01", "02"], DistributionPolicy::Equal, 1))
        .await;

    assert!(report.success);
    let state = mock.state();
    // First sign-in, 401 on placement, forced refresh, one retry.
    assert_eq!(state.sign_in_calls, 2);
    assert_eq!(state.place_calls["u1"], 2);
}

#[tokio::test]
async fn test_reauth_failure_on_retry_is_terminal() {
    let mock = MockPlatform::new(Platform::Sgd666);
    mock.unauthorized_always("u1");
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1"]);

    let report = h
        .orchestrator
        .submit(request(&["01"], DistributionPolicy::Equal, 1))
        .await;

    assert!(!report.success);
    let state = mock.state();
    // Exactly one extra round-trip, never unbounded.
    assert_eq!(state.sign_in_calls, 2);
    assert_eq!(state.place_calls["u1"], 2);
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

fn settled_record(code: &str, usages: Vec<AccountUsage>) -> BetRecord {
    BetRecord {
        order_code: code.to_string(),
        owner: "owner-1".to_string(),
        platform: Platform::Sgd666,
        region: Region::North,
        bet_type: "ALL_LOT".to_string(),
        bet_type_display: "bao-lo".to_string(),
        channels: vec!["hanoi".to_string()],
        numbers: vec!["12".to_string(), "34".to_string()],
        points: 10.0,
        total_stake: 360.0,
        policy: DistributionPolicy::Equal,
        total_accounts_used: usages.len(),
        successful_bets: usages.len(),
        failed_bets: 0,
        accounts_used: usages,
        overall_status: OverallStatus::Completed,
        settlement: Settlement::default(),
        // Well in the past: due regardless of cutoff.
        bet_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        created_at: Utc::now(),
    }
}

fn usage(account_id: &str, username: &str, code: &str) -> AccountUsage {
    AccountUsage {
        account_id: account_id.to_string(),
        username: username.to_string(),
        numbers_assigned: vec!["12".to_string(), "34".to_string()],
        stake_amount: 360.0,
        bet_status: PlacementStatus::Success,
        remote_order_code: Some(code.to_string()),
        response: None,
        error_message: None,
    }
}

#[tokio::test]
async fn test_reconcile_win_and_not_found() {
    let mock = MockPlatform::new(Platform::Sgd666);
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1", "u2"]);

    // u1's ledger settles the order as a win; u2's ledger has no match.
    mock.seed_ledger("u1", vec![MockPlatform::ledger_row("RC1", 360.0, 180.0, "WIN")]);
    mock.seed_ledger("u2", vec![MockPlatform::ledger_row("OTHER", 50.0, -50.0, "LOSE")]);

    h.store
        .insert_bet(settled_record(
            "RC1",
            vec![usage("a0", "u1", "RC1"), usage("a1", "u2", "RC1")],
        ))
        .unwrap();

    let report = h.reconciler.reconcile_due().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.updated, 1);

    let record = h.store.bet("RC1").unwrap();
    let settlement = &record.settlement;
    assert!(settlement.checked);
    assert_eq!(settlement.status, Some(SettlementOutcome::Win));
    assert_eq!(settlement.total_accounts, 2);
    assert_eq!(settlement.processed_accounts, 1);
    assert!((settlement.total_win_amount - 180.0).abs() < 1e-10);
    assert_eq!(settlement.winning_numbers, vec!["12".to_string(), "34".to_string()]);

    let by_account: Vec<_> = settlement
        .account_results
        .iter()
        .map(|r| (r.username.as_str(), r.status))
        .collect();
    assert!(by_account.contains(&("u1", SettlementOutcome::Win)));
    assert!(by_account.contains(&("u2", SettlementOutcome::NotFound)));
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let mock = MockPlatform::new(Platform::Sgd666);
    let h = harness(mock.clone());
    seed_accounts(&h.store, &["u1"]);
    mock.seed_ledger("u1", vec![MockPlatform::ledger_row("RC2", 360.0, -360.0, "LOSE")]);

    h.store
        .insert_bet(settled_record("RC2", vec![usage("a0", "u1", "RC2")]))
        .unwrap();

    let first = h.reconciler.reconcile_due().await;
    assert_eq!(first.updated, 1);
    let settled = h.store.bet("RC2").unwrap();
    assert_eq!(settled.settlement.status, Some(SettlementOutcome::Loss));

    // Checked records drop out of the candidate set.
    let second = h.reconciler.reconcile_due().await;
    assert_eq!(second.checked, 0);
    assert_eq!(second.updated, 0);
}

#[tokio::test]
async fn test_reconcile_account_error_does_not_block_siblings() {
    let mock = MockPlatform::new(Platform::Sgd666);
    let h = harness(mock.clone());
    // a1/u2 exists in the ledger but not in the account store.
    seed_accounts(&h.store, &["u1"]);
    mock.seed_ledger("u1", vec![MockPlatform::ledger_row("RC3", 360.0, 100.0, "WIN")]);

    h.store
        .insert_bet(settled_record(
            "RC3",
            vec![usage("missing", "ghost", "RC3"), usage("a0", "u1", "RC3")],
        ))
        .unwrap();

    let report = h.reconciler.reconcile_due().await;
    assert_eq!(report.updated, 1);

    let record = h.store.bet("RC3").unwrap();
    let settlement = &record.settlement;
    assert_eq!(settlement.status, Some(SettlementOutcome::Win));
    let ghost = settlement
        .account_results
        .iter()
        .find(|r| r.username == "ghost")
        .unwrap();
    assert_eq!(ghost.status, SettlementOutcome::Error);
    assert!(ghost.error.is_some());
}
