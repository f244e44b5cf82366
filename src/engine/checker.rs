//! Bulk account status and balance check.
//!
//! Runs a list of accounts in small concurrent batches: relay gate,
//! token reuse or fresh sign-in, balance fetch, then a status patch.
//! A failing account never aborts the batch.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CheckSettings;
use crate::credentials::CredentialManager;
use crate::platforms::PlatformRegistry;
use crate::relay::{RelayChecker, RelayDescriptor};
use crate::storage::Store;
use crate::types::{Account, AccountPatch, AccountStatus};

#[derive(Debug, Clone, Serialize)]
pub struct AccountCheckResult {
    pub account_id: String,
    pub username: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub relay_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub results: Vec<AccountCheckResult>,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub relay_errors: usize,
}

pub struct AccountChecker {
    store: Arc<Store>,
    registry: Arc<PlatformRegistry>,
    credentials: Arc<CredentialManager>,
    relay_checker: RelayChecker,
    batch_size: usize,
    inter_batch_pause: Duration,
}

impl AccountChecker {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<PlatformRegistry>,
        credentials: Arc<CredentialManager>,
        relay_checker: RelayChecker,
        settings: &CheckSettings,
    ) -> Self {
        AccountChecker {
            store,
            registry,
            credentials,
            relay_checker,
            batch_size: settings.batch_size.max(1),
            inter_batch_pause: Duration::from_millis(settings.inter_batch_pause_ms),
        }
    }

    /// Check the given accounts in batches. Always returns a full
    /// per-account result list.
    pub async fn check_accounts(&self, ids: &[String]) -> CheckReport {
        info!(count = ids.len(), "Checking accounts");
        let mut results = Vec::with_capacity(ids.len());

        for (i, chunk) in ids.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inter_batch_pause).await;
            }
            let futures = chunk.iter().map(|id| self.check_one(id));
            results.extend(join_all(futures).await);
        }

        let success = results.iter().filter(|r| r.success).count();
        let relay_errors = results.iter().filter(|r| r.relay_error).count();
        CheckReport {
            total: results.len(),
            success,
            failed: results.len() - success,
            relay_errors,
            results,
        }
    }

    async fn check_one(&self, id: &str) -> AccountCheckResult {
        let Some(account) = self.store.account(id) else {
            return AccountCheckResult {
                account_id: id.to_string(),
                username: String::new(),
                success: false,
                balance: None,
                status: AccountStatus::Inactive,
                error: Some("unknown account".to_string()),
                relay_error: false,
            };
        };

        let platform = match self.registry.get(account.platform) {
            Ok(p) => p,
            Err(e) => return self.failure(&account, e.to_string(), false),
        };

        let relay = match &account.relay {
            None => None,
            Some(raw) => match RelayDescriptor::parse(raw) {
                Err(e) => {
                    self.patch(&account, AccountPatch::status(AccountStatus::RelayError));
                    return self.failure(&account, format!("invalid relay spec: {e}"), true);
                }
                Ok(descriptor) => {
                    let health = self.relay_checker.check(&descriptor).await;
                    if !health.healthy {
                        self.patch(&account, AccountPatch::status(AccountStatus::RelayError));
                        return self
                            .failure(&account, format!("relay unhealthy: {}", health.detail), true);
                    }
                    Some(descriptor)
                }
            },
        };

        let relay_ref = relay.as_ref();
        let account_ref = &account;
        let platform_ref = &platform;
        let balance = self
            .credentials
            .with_reauth(platform_ref, account_ref, relay_ref, |token| async move {
                platform_ref
                    .fetch_balance(account_ref, relay_ref, &token)
                    .await
            })
            .await;

        match balance {
            Ok(balance) => {
                info!(username = %account.username, balance, "Account check ok");
                self.patch(
                    &account,
                    AccountPatch {
                        balance: Some(balance),
                        status: Some(AccountStatus::Active),
                        last_check: Some(Utc::now()),
                        ..Default::default()
                    },
                );
                AccountCheckResult {
                    account_id: account.id.clone(),
                    username: account.username.clone(),
                    success: true,
                    balance: Some(balance),
                    status: AccountStatus::Active,
                    error: None,
                    relay_error: false,
                }
            }
            Err(e) => {
                self.patch(
                    &account,
                    AccountPatch {
                        last_check: Some(Utc::now()),
                        ..Default::default()
                    },
                );
                self.failure(&account, e.to_string(), false)
            }
        }
    }

    fn failure(&self, account: &Account, error: String, relay_error: bool) -> AccountCheckResult {
        warn!(username = %account.username, error = %error, "Account check failed");
        AccountCheckResult {
            account_id: account.id.clone(),
            username: account.username.clone(),
            success: false,
            balance: None,
            status: self
                .store
                .account(&account.id)
                .map(|a| a.status)
                .unwrap_or(account.status),
            error: Some(error),
            relay_error,
        }
    }

    fn patch(&self, account: &Account, patch: AccountPatch) {
        if let Err(e) = self.store.apply(&account.id, &patch) {
            warn!(username = %account.username, error = %e, "Failed to patch account");
        }
    }
}
