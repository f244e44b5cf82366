//! Per-account placement pipeline.
//!
//! One account, one assigned number subset, one outcome. The pipeline
//! gates on relay health before spending a credential, validates the
//! ticket locally, then places the order under the single-retry reauth
//! wrapper. Failures never propagate as `Err`; every path folds into a
//! `PlacementOutcome` the orchestrator can count.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::credentials::CredentialManager;
use crate::platforms::{LottoPlatform, OrderTicket};
use crate::relay::{RelayChecker, RelayDescriptor};
use crate::storage::Store;
use crate::types::{
    Account, AccountPatch, AccountStatus, AccountUsage, PlacementStatus, WagerRequest,
};

/// One account's result for one round.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementOutcome {
    pub account_id: String,
    pub username: String,
    pub numbers_assigned: Vec<String>,
    pub stake_amount: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure was the relay, not the site.
    pub relay_error: bool,
}

impl PlacementOutcome {
    fn failure(account: &Account, numbers: &[String], error: String, relay_error: bool) -> Self {
        PlacementOutcome {
            account_id: account.id.clone(),
            username: account.username.clone(),
            numbers_assigned: numbers.to_vec(),
            stake_amount: 0.0,
            success: false,
            order_code: None,
            response: None,
            error: Some(error),
            relay_error,
        }
    }

    pub fn into_usage(self) -> AccountUsage {
        AccountUsage {
            account_id: self.account_id,
            username: self.username,
            numbers_assigned: self.numbers_assigned,
            stake_amount: self.stake_amount,
            bet_status: if self.success {
                PlacementStatus::Success
            } else {
                PlacementStatus::Failed
            },
            remote_order_code: self.order_code,
            response: self.response,
            error_message: self.error,
        }
    }
}

pub struct Placer {
    store: Arc<Store>,
    credentials: Arc<CredentialManager>,
    relay_checker: RelayChecker,
}

impl Placer {
    pub fn new(
        store: Arc<Store>,
        credentials: Arc<CredentialManager>,
        relay_checker: RelayChecker,
    ) -> Self {
        Placer {
            store,
            credentials,
            relay_checker,
        }
    }

    /// Resolve and probe the account's relay, if it has one. A bad spec
    /// or a dead tunnel patches the account to `RelayError` and returns
    /// the failure message.
    pub async fn relay_gate(
        &self,
        account: &Account,
    ) -> Result<Option<RelayDescriptor>, String> {
        let Some(raw) = &account.relay else {
            return Ok(None);
        };
        let descriptor = match RelayDescriptor::parse(raw) {
            Ok(d) => d,
            Err(e) => {
                self.flag_relay_error(account);
                return Err(format!("invalid relay spec: {e}"));
            }
        };
        let health = self.relay_checker.check(&descriptor).await;
        if !health.healthy {
            self.flag_relay_error(account);
            return Err(format!("relay unhealthy: {}", health.detail));
        }
        Ok(Some(descriptor))
    }

    /// Run the full pipeline for one account and one number subset.
    pub async fn place_for_account(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        account: &Account,
        request: &WagerRequest,
        numbers: &[String],
        bet_date: NaiveDate,
    ) -> PlacementOutcome {
        let relay = match self.relay_gate(account).await {
            Ok(relay) => relay,
            Err(message) => {
                warn!(username = %account.username, error = %message, "Relay gate failed");
                return PlacementOutcome::failure(account, numbers, message, true);
            }
        };

        let stake = platform.stake_for(
            &request.bet_type,
            numbers.len(),
            request.points,
            request.channels.len(),
        );
        let ticket = OrderTicket {
            region: request.region,
            bet_type: request.bet_type.clone(),
            channels: request.channels.clone(),
            numbers: numbers.to_vec(),
            points: request.points,
            total_stake: stake,
            bet_date,
        };

        if let Err(e) = platform.validate(&ticket) {
            warn!(username = %account.username, error = %e, "Ticket rejected locally");
            return PlacementOutcome::failure(account, numbers, e.to_string(), false);
        }

        let relay_ref = relay.as_ref();
        let result = self
            .credentials
            .with_reauth(platform, account, relay_ref, |token| {
                let ticket = ticket.clone();
                async move {
                    platform
                        .place_order(account, relay_ref, &token, &ticket)
                        .await
                }
            })
            .await;

        match result {
            Ok(receipt) => {
                info!(
                    username = %account.username,
                    order_code = %receipt.order_code,
                    stake,
                    items = numbers.len(),
                    "Order placed"
                );
                PlacementOutcome {
                    account_id: account.id.clone(),
                    username: account.username.clone(),
                    numbers_assigned: numbers.to_vec(),
                    stake_amount: stake,
                    success: true,
                    order_code: Some(receipt.order_code),
                    response: Some(receipt.details),
                    error: None,
                    relay_error: false,
                }
            }
            Err(e) => {
                warn!(username = %account.username, error = %e, "Order failed");
                PlacementOutcome::failure(account, numbers, e.to_string(), false)
            }
        }
    }

    fn flag_relay_error(&self, account: &Account) {
        if let Err(e) = self
            .store
            .apply(&account.id, &AccountPatch::status(AccountStatus::RelayError))
        {
            warn!(username = %account.username, error = %e, "Failed to flag relay error");
        }
    }
}
