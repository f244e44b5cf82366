//! Betting site integrations.
//!
//! Defines the `LottoPlatform` trait and provides implementations for:
//! - sgd666 — two-phase create+confirm order protocol
//! - one789 — single-call signed ticket protocol
//!
//! Adapters own the wire formats: bet-type normalization, stake
//! formulas, request signing, and ledger row shapes all live here so the
//! engine stays platform-agnostic.

pub mod one789;
pub mod sgd666;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::PlatformsConfig;
use crate::relay::RelayDescriptor;
use crate::types::{Account, BetError, Platform, ReauthSignal, Region};

/// Both sites run draws on Indochina time.
pub fn platform_tz() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).expect("valid fixed offset")
}

/// Today's date in the platform timezone.
pub fn today_in_platform_tz() -> NaiveDate {
    Utc::now().with_timezone(&platform_tz()).date_naive()
}

/// A validated order as the engine hands it to an adapter. The stake is
/// the caller's declared total; adapters recompute it and fail closed on
/// mismatch before anything touches the wire.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    pub region: Region,
    /// Display form; adapters normalize to their wire code.
    pub bet_type: String,
    pub channels: Vec<String>,
    pub numbers: Vec<String>,
    /// Stake per number item.
    pub points: f64,
    pub total_stake: f64,
    pub bet_date: NaiveDate,
}

/// What a successful placement yields.
#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_code: String,
    pub details: serde_json::Value,
}

/// A normalized settlement-ledger row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerRow {
    pub order_code: String,
    pub stake: f64,
    pub win_loss: f64,
    /// Remote row status, uppercased (`WIN`, `LOSE`, ...).
    pub status: String,
    pub numbers: Vec<String>,
    pub channels: Vec<String>,
    /// Channels the row reports as winning.
    pub channel_win: Vec<String>,
    pub bet_type: String,
    pub bet_type_child: String,
}

impl LedgerRow {
    pub fn is_win(&self) -> bool {
        self.status.eq_ignore_ascii_case("WIN")
    }
}

/// Abstraction over betting sites.
///
/// Implementors own sign-in, order placement, ledger fetch, and balance
/// lookup. Every remote call goes through the account's relay when one
/// is configured; `relay` is `None` for direct accounts.
#[async_trait]
pub trait LottoPlatform: Send + Sync {
    /// Platform name for logging and identification.
    fn name(&self) -> &'static str;

    fn kind(&self) -> Platform;

    /// Authenticate and return the raw sign-in response body.
    async fn sign_in(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
    ) -> Result<serde_json::Value, BetError>;

    /// Ordered token field candidates for this site's sign-in response.
    fn token_fields(&self) -> &'static [&'static str];

    /// Local fail-closed validation: shape checks plus the declared-vs-
    /// recomputed stake comparison. Runs before any remote call.
    fn validate(&self, ticket: &OrderTicket) -> Result<(), BetError>;

    /// Recompute the total stake for a number subset.
    fn stake_for(&self, bet_type: &str, number_count: usize, points: f64, channel_count: usize)
        -> f64;

    /// The site's wire form of a display bet type, as recorded on the
    /// persisted bet.
    fn normalize_bet_type(&self, display: &str) -> String {
        display.to_string()
    }

    /// Place an order with a live token.
    async fn place_order(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
        ticket: &OrderTicket,
    ) -> Result<OrderReceipt, BetError>;

    /// Fetch the settlement ledger for a draw date.
    async fn fetch_ledger(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
        date: NaiveDate,
    ) -> Result<Vec<LedgerRow>, BetError>;

    /// Current account balance.
    async fn fetch_balance(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
    ) -> Result<f64, BetError>;

    /// Classify an error as a re-authentication signal, if it is one.
    /// The default covers the shared HTTP statuses and session-takeover
    /// phrasing; sites with bespoke wording override this.
    fn reauth_signal(&self, err: &BetError) -> Option<ReauthSignal> {
        classify_reauth(err)
    }
}

/// Shared reauth classification: HTTP 401/403 plus the explicit
/// session-takeover messages the sites return with a 200.
pub fn classify_reauth(err: &BetError) -> Option<ReauthSignal> {
    match err.http_status() {
        Some(401) => return Some(ReauthSignal::Unauthorized),
        Some(403) => return Some(ReauthSignal::Forbidden),
        _ => {}
    }
    let message = err.to_string().to_lowercase();
    let explicit = message.contains("signed in from another device")
        || message.contains("signed in elsewhere")
        || message.contains("please sign in again")
        || message.contains("session expired");
    explicit.then_some(ReauthSignal::ExplicitLogout)
}

/// Build the adapter registry from config. Disabled platforms are absent;
/// asking for one is a setup error surfaced at the call site.
pub struct PlatformRegistry {
    sgd666: Option<Arc<dyn LottoPlatform>>,
    one789: Option<Arc<dyn LottoPlatform>>,
}

impl PlatformRegistry {
    pub fn from_config(cfg: &PlatformsConfig) -> anyhow::Result<Self> {
        let sgd666 = if cfg.sgd666.enabled {
            Some(Arc::new(sgd666::Sgd666Client::from_config(&cfg.sgd666)?)
                as Arc<dyn LottoPlatform>)
        } else {
            None
        };
        let one789 = if cfg.one789.enabled {
            Some(Arc::new(one789::One789Client::from_config(&cfg.one789)?)
                as Arc<dyn LottoPlatform>)
        } else {
            None
        };
        Ok(PlatformRegistry { sgd666, one789 })
    }

    /// Registry with explicit adapters (used by tests).
    pub fn with_adapters(
        sgd666: Option<Arc<dyn LottoPlatform>>,
        one789: Option<Arc<dyn LottoPlatform>>,
    ) -> Self {
        PlatformRegistry { sgd666, one789 }
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn LottoPlatform>, BetError> {
        let adapter = match platform {
            Platform::Sgd666 => &self.sgd666,
            Platform::One789 => &self.one789,
        };
        adapter
            .clone()
            .ok_or_else(|| BetError::order(format!("platform {platform} is not enabled")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_statuses() {
        assert_eq!(
            classify_reauth(&BetError::order_with_status(401, "nope")),
            Some(ReauthSignal::Unauthorized)
        );
        assert_eq!(
            classify_reauth(&BetError::order_with_status(403, "nope")),
            Some(ReauthSignal::Forbidden)
        );
        assert_eq!(classify_reauth(&BetError::order_with_status(500, "boom")), None);
    }

    #[test]
    fn test_classify_explicit_messages() {
        assert_eq!(
            classify_reauth(&BetError::order(
                "Account signed in from another device, please sign in again"
            )),
            Some(ReauthSignal::ExplicitLogout)
        );
        assert_eq!(
            classify_reauth(&BetError::order("Session expired")),
            Some(ReauthSignal::ExplicitLogout)
        );
        assert_eq!(classify_reauth(&BetError::order("insufficient balance")), None);
        // Non-order errors never classify via status but can via message.
        assert_eq!(classify_reauth(&BetError::Relay("tunnel down".to_string())), None);
    }

    #[test]
    fn test_ledger_row_win() {
        let row = LedgerRow {
            status: "win".to_string(),
            ..Default::default()
        };
        assert!(row.is_win());
        let row = LedgerRow {
            status: "LOSE".to_string(),
            ..Default::default()
        };
        assert!(!row.is_win());
    }
}
