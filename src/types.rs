//! Shared types for the syndicate service.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that platform, engine,
//! and storage modules can depend on them without circular references.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Betting site a worker account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Sgd666,
    One789,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sgd666 => "sgd666",
            Platform::One789 => "one789",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sgd666" => Ok(Platform::Sgd666),
            "one789" => Ok(Platform::One789),
            _ => Err(anyhow::anyhow!("Unknown platform: {s}")),
        }
    }
}

/// Draw region. Each region has its own station schedule and result cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    North,
    Central,
    South,
}

impl Region {
    pub const ALL: &'static [Region] = &[Region::North, Region::Central, Region::South];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::North => "north",
            Region::Central => "central",
            Region::South => "south",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "north" | "mb" => Ok(Region::North),
            "central" | "mt" => Ok(Region::Central),
            "south" | "mn" => Ok(Region::South),
            _ => Err(anyhow::anyhow!("Unknown region: {s}")),
        }
    }
}

/// Worker account health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    RelayError,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Inactive => write!(f, "inactive"),
            AccountStatus::RelayError => write!(f, "relay_error"),
        }
    }
}

/// How a submission's numbers are spread over worker accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionPolicy {
    /// Every worker plays the full number list.
    All,
    /// Contiguous even chunks in submission order.
    Equal,
    /// Shuffle first, then even chunks.
    Random,
}

impl fmt::Display for DistributionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionPolicy::All => write!(f, "all"),
            DistributionPolicy::Equal => write!(f, "equal"),
            DistributionPolicy::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for DistributionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(DistributionPolicy::All),
            "equal" => Ok(DistributionPolicy::Equal),
            "random" => Ok(DistributionPolicy::Random),
            _ => Err(anyhow::anyhow!("Unknown distribution policy: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// A worker account on a betting site.
///
/// Engine code only ever holds an owned snapshot of this; mutations go
/// through the store as an [`AccountPatch`] so that concurrent tasks
/// never share a live reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub owner: String,
    pub platform: Platform,
    pub username: String,
    pub password: String,
    /// Raw relay spec: `host:port` or `host:port:user:pass`.
    #[serde(default)]
    pub relay: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}, relay: {})",
            self.platform,
            self.username,
            self.status,
            if self.relay.is_some() { "yes" } else { "no" },
        )
    }
}

impl Account {
    /// Whether the cached token can still be used without a fresh sign-in.
    /// The margin keeps us from reusing a token that expires mid-request.
    pub fn is_token_valid(&self, margin: Duration) -> bool {
        match (&self.access_token, &self.token_expiry) {
            (Some(token), Some(expiry)) if !token.is_empty() => Utc::now() < *expiry - margin,
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn sample(id: &str, platform: Platform) -> Self {
        Account {
            id: id.to_string(),
            owner: "owner-1".to_string(),
            platform,
            username: format!("user_{id}"),
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
}

/// Field-level account update, applied through the store.
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub access_token: Option<Option<String>>,
    pub token_expiry: Option<Option<DateTime<Utc>>>,
    pub status: Option<AccountStatus>,
    pub balance: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
}

impl AccountPatch {
    pub fn status(status: AccountStatus) -> Self {
        AccountPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn token(token: String, expiry: DateTime<Utc>) -> Self {
        AccountPatch {
            access_token: Some(Some(token)),
            token_expiry: Some(Some(expiry)),
            status: Some(AccountStatus::Active),
            ..Default::default()
        }
    }

    pub fn clear_token() -> Self {
        AccountPatch {
            access_token: Some(None),
            token_expiry: Some(None),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, account: &mut Account) {
        if let Some(token) = &self.access_token {
            account.access_token = token.clone();
        }
        if let Some(expiry) = &self.token_expiry {
            account.token_expiry = *expiry;
        }
        if let Some(status) = self.status {
            account.status = status;
        }
        if let Some(balance) = self.balance {
            account.balance = balance;
        }
        if let Some(last_check) = self.last_check {
            account.last_check = Some(last_check);
        }
    }
}

// ---------------------------------------------------------------------------
// Wager submission
// ---------------------------------------------------------------------------

/// An incoming multi-account wager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerRequest {
    pub owner: String,
    pub platform: Platform,
    pub region: Region,
    /// Display form of the bet type (normalized per platform at the wire).
    pub bet_type: String,
    /// Stations (sub-channels) the wager targets.
    pub channels: Vec<String>,
    pub numbers: Vec<String>,
    /// Stake per number item.
    pub points: f64,
    pub policy: DistributionPolicy,
    /// How many workers to draw from the active pool.
    pub worker_count: usize,
    /// Draw date; defaults to today in the platform timezone when absent.
    #[serde(default)]
    pub bet_date: Option<NaiveDate>,
}

impl fmt::Display for WagerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} × {} numbers @ {} pts over {} workers ({})",
            self.platform,
            self.region,
            self.bet_type,
            self.numbers.len(),
            self.points,
            self.worker_count,
            self.policy,
        )
    }
}

/// Per-account placement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStatus {
    Pending,
    Success,
    Failed,
}

/// One account's part in a persisted bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountUsage {
    pub account_id: String,
    pub username: String,
    pub numbers_assigned: Vec<String>,
    /// Stake recomputed for the assigned subset via the platform formula.
    pub stake_amount: f64,
    pub bet_status: PlacementStatus,
    #[serde(default)]
    pub remote_order_code: Option<String>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Bet record
// ---------------------------------------------------------------------------

/// Whole-submission outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pending,
    Completed,
    PartialSuccess,
    Failed,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Pending => write!(f, "pending"),
            OverallStatus::Completed => write!(f, "completed"),
            OverallStatus::PartialSuccess => write!(f, "partial_success"),
            OverallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A persisted multi-account bet with its settlement state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRecord {
    /// Internal order code: first remote code, else `BET{millis}{RAND6}`.
    pub order_code: String,
    pub owner: String,
    pub platform: Platform,
    pub region: Region,
    /// Normalized bet type (wire form).
    pub bet_type: String,
    /// Bet type as the operator entered it.
    pub bet_type_display: String,
    pub channels: Vec<String>,
    /// Union of the items that were actually placed.
    pub numbers: Vec<String>,
    pub points: f64,
    pub total_stake: f64,
    pub policy: DistributionPolicy,
    /// Successful placements only.
    pub accounts_used: Vec<AccountUsage>,
    pub total_accounts_used: usize,
    pub successful_bets: usize,
    pub failed_bets: usize,
    pub overall_status: OverallStatus,
    pub settlement: Settlement,
    pub bet_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for BetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}] {} numbers, stake {:.0}, {} accounts, {}",
            self.order_code,
            self.platform,
            self.region,
            self.numbers.len(),
            self.total_stake,
            self.total_accounts_used,
            self.overall_status,
        )
    }
}

impl BetRecord {
    /// Generate an internal order code: `BET` + epoch millis + 6 random
    /// uppercase alphanumerics.
    pub fn generate_order_code() -> String {
        use rand::Rng;
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        format!("BET{}{}", Utc::now().timestamp_millis(), suffix)
    }

    /// Derive the aggregate counters and overall status from the usages
    /// plus the number of workers that were attempted this submission.
    pub fn update_statistics(&mut self, attempted: usize) {
        self.total_accounts_used = self.accounts_used.len();
        self.successful_bets = self
            .accounts_used
            .iter()
            .filter(|u| u.bet_status == PlacementStatus::Success)
            .count();
        self.failed_bets = attempted.saturating_sub(self.successful_bets);
        self.total_stake = self
            .accounts_used
            .iter()
            .filter(|u| u.bet_status == PlacementStatus::Success)
            .map(|u| u.stake_amount)
            .sum();
        self.overall_status = if self.successful_bets == 0 {
            OverallStatus::Failed
        } else if self.failed_bets == 0 {
            OverallStatus::Completed
        } else {
            OverallStatus::PartialSuccess
        };
    }

    /// Whether the record is waiting on a settlement pass.
    pub fn is_settleable(&self) -> bool {
        !self.settlement.checked
            && matches!(
                self.overall_status,
                OverallStatus::Completed | OverallStatus::PartialSuccess
            )
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Settlement outcome, for a whole bet or a single account's part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    Win,
    Loss,
    Draw,
    NotFound,
    Error,
}

impl fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementOutcome::Win => write!(f, "WIN"),
            SettlementOutcome::Loss => write!(f, "LOSS"),
            SettlementOutcome::Draw => write!(f, "DRAW"),
            SettlementOutcome::NotFound => write!(f, "NOT_FOUND"),
            SettlementOutcome::Error => write!(f, "ERROR"),
        }
    }
}

impl SettlementOutcome {
    /// Outcome from the matched-ledger aggregates: a win needs both a
    /// winning row and a positive net; an exact zero net is a draw.
    pub fn derive(has_win: bool, net: f64) -> Self {
        if has_win && net > 0.0 {
            SettlementOutcome::Win
        } else if net == 0.0 {
            SettlementOutcome::Draw
        } else {
            SettlementOutcome::Loss
        }
    }
}

/// Per-station settlement breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelOutcome {
    pub stake: f64,
    pub win_loss: f64,
    pub numbers: Vec<String>,
    #[serde(default)]
    pub status: Option<SettlementOutcome>,
    pub winning_numbers: Vec<String>,
    /// Usernames whose ledgers contributed to this channel.
    pub accounts: Vec<String>,
}

/// One account's settlement result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettlement {
    pub account_id: String,
    pub username: String,
    pub order_code: String,
    pub status: SettlementOutcome,
    pub total_stake: f64,
    pub total_win_loss: f64,
    /// Matched ledger rows.
    pub record_count: usize,
    pub winning_numbers: Vec<String>,
    pub winning_numbers_by_channel: HashMap<String, Vec<String>>,
    pub channel_results: HashMap<String, ChannelOutcome>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Settlement state embedded in a bet record. Written exactly once:
/// the `checked` flag gates every subsequent write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settlement {
    pub checked: bool,
    #[serde(default)]
    pub status: Option<SettlementOutcome>,
    pub total_stake: f64,
    pub total_win_amount: f64,
    pub winning_numbers: Vec<String>,
    pub winning_numbers_by_channel: HashMap<String, Vec<String>>,
    pub channel_results: HashMap<String, ChannelOutcome>,
    pub account_results: Vec<AccountSettlement>,
    pub processed_accounts: usize,
    pub total_accounts: usize,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reason an operation failed in a way that calls for re-authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReauthSignal {
    /// The site reported the session was taken over or expired.
    ExplicitLogout,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
}

/// Domain error taxonomy. Engine code folds these into structured
/// per-unit outcomes; only setup-level failures propagate as `Err`.
#[derive(Debug, thiserror::Error)]
pub enum BetError {
    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Order error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Order {
        status: Option<u16>,
        message: String,
    },

    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BetError {
    pub fn order(message: impl Into<String>) -> Self {
        BetError::Order {
            status: None,
            message: message.into(),
        }
    }

    pub fn order_with_status(status: u16, message: impl Into<String>) -> Self {
        BetError::Order {
            status: Some(status),
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            BetError::Order { status, .. } => *status,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
