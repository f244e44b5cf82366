//! Mock platform for integration testing.
//!
//! A deterministic in-memory `LottoPlatform`: sign-ins and placements
//! are counted, failures are scripted per username, and ledgers are
//! seeded from test code. No network anywhere.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use syndicate::platforms::{LedgerRow, LottoPlatform, OrderReceipt, OrderTicket};
use syndicate::relay::RelayDescriptor;
use syndicate::types::{Account, BetError, Platform};

#[derive(Default)]
pub struct MockState {
    pub sign_in_calls: usize,
    pub sign_in_fails: bool,
    /// Placement attempts per username.
    pub place_calls: HashMap<String, usize>,
    /// Usernames whose placements always fail.
    pub always_fail: HashSet<String>,
    /// Usernames whose next placement returns HTTP 401, once.
    pub unauthorized_once: HashSet<String>,
    /// Usernames whose placements always return HTTP 401.
    pub unauthorized_always: HashSet<String>,
    /// Successful placements: (username, numbers, order code).
    pub placed: Vec<(String, Vec<String>, String)>,
    /// Seeded ledgers per username.
    pub ledgers: HashMap<String, Vec<LedgerRow>>,
    pub balances: HashMap<String, f64>,
    next_code: usize,
}

pub struct MockPlatform {
    kind: Platform,
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new(kind: Platform) -> Arc<Self> {
        Arc::new(MockPlatform {
            kind,
            state: Arc::new(Mutex::new(MockState::default())),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn fail_always(&self, username: &str) {
        self.state().always_fail.insert(username.to_string());
    }

    pub fn unauthorized_once(&self, username: &str) {
        self.state().unauthorized_once.insert(username.to_string());
    }

    pub fn unauthorized_always(&self, username: &str) {
        self.state().unauthorized_always.insert(username.to_string());
    }

    pub fn seed_ledger(&self, username: &str, rows: Vec<LedgerRow>) {
        self.state().ledgers.insert(username.to_string(), rows);
    }

    /// A ledger row matching the given order code.
    pub fn ledger_row(code: &str, stake: f64, win_loss: f64, status: &str) -> LedgerRow {
        LedgerRow {
            order_code: code.to_string(),
            stake,
            win_loss,
            status: status.to_string(),
            numbers: vec!["12".to_string(), "34".to_string()],
            channels: vec!["hanoi".to_string()],
            channel_win: if status == "WIN" {
                vec!["hanoi".to_string()]
            } else {
                Vec::new()
            },
            bet_type: "ALL_LOT".to_string(),
            bet_type_child: "TWO_NUMBERS".to_string(),
        }
    }
}

#[async_trait]
impl LottoPlatform for MockPlatform {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn kind(&self) -> Platform {
        self.kind
    }

    async fn sign_in(
        &self,
        account: &Account,
        _relay: Option<&RelayDescriptor>,
    ) -> Result<Value, BetError> {
        let mut state = self.state();
        state.sign_in_calls += 1;
        if state.sign_in_fails {
            return Err(BetError::Credential(format!(
                "mock sign-in refused for {}",
                account.username
            )));
        }
        Ok(json!({ "token": format!("mock-token-{}", state.sign_in_calls) }))
    }

    fn token_fields(&self) -> &'static [&'static str] {
        &["token"]
    }

    fn validate(&self, ticket: &OrderTicket) -> Result<(), BetError> {
        if ticket.numbers.is_empty() {
            return Err(BetError::order("number list is empty"));
        }
        if ticket.points <= 0.0 {
            return Err(BetError::order("stake per number must be positive"));
        }
        Ok(())
    }

    fn stake_for(
        &self,
        _bet_type: &str,
        number_count: usize,
        points: f64,
        channel_count: usize,
    ) -> f64 {
        number_count as f64 * points * channel_count as f64
    }

    async fn place_order(
        &self,
        account: &Account,
        _relay: Option<&RelayDescriptor>,
        _token: &str,
        ticket: &OrderTicket,
    ) -> Result<OrderReceipt, BetError> {
        let mut state = self.state();
        *state
            .place_calls
            .entry(account.username.clone())
            .or_default() += 1;

        if state.always_fail.contains(&account.username) {
            return Err(BetError::order("mock placement refused"));
        }
        if state.unauthorized_always.contains(&account.username)
            || state.unauthorized_once.remove(&account.username)
        {
            return Err(BetError::order_with_status(401, "unauthorized"));
        }

        state.next_code += 1;
        let order_code = format!("MOCK{:04}", state.next_code);
        state.placed.push((
            account.username.clone(),
            ticket.numbers.clone(),
            order_code.clone(),
        ));
        Ok(OrderReceipt {
            order_code,
            details: json!({ "accepted": ticket.numbers.len() }),
        })
    }

    async fn fetch_ledger(
        &self,
        account: &Account,
        _relay: Option<&RelayDescriptor>,
        _token: &str,
        _date: NaiveDate,
    ) -> Result<Vec<LedgerRow>, BetError> {
        Ok(self
            .state()
            .ledgers
            .get(&account.username)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_balance(
        &self,
        account: &Account,
        _relay: Option<&RelayDescriptor>,
        _token: &str,
    ) -> Result<f64, BetError> {
        Ok(self
            .state()
            .balances
            .get(&account.username)
            .copied()
            .unwrap_or(100.0))
    }
}
