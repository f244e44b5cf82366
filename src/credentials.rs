//! Token lifecycle for worker accounts.
//!
//! Tokens are cached on the account record and reused while they have
//! at least the safety margin left. Expiry comes from the JWT payload
//! when the token carries one, otherwise a fixed TTL is assumed. A
//! failed sign-in marks the account inactive so it drops out of worker
//! selection until the next successful check.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CredentialSettings;
use crate::platforms::LottoPlatform;
use crate::relay::RelayDescriptor;
use crate::storage::Store;
use crate::types::{Account, AccountPatch, AccountStatus, BetError};

pub struct CredentialManager {
    store: Arc<Store>,
    safety_margin: Duration,
    fallback_ttl: Duration,
}

impl CredentialManager {
    pub fn new(store: Arc<Store>, settings: &CredentialSettings) -> Self {
        CredentialManager {
            store,
            safety_margin: Duration::seconds(settings.safety_margin_secs),
            fallback_ttl: Duration::hours(settings.fallback_ttl_hours),
        }
    }

    /// A usable token for the account: the cached one when it still has
    /// margin left, otherwise a fresh sign-in. `force` skips the cache.
    pub async fn acquire(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        account: &Account,
        relay: Option<&RelayDescriptor>,
        force: bool,
    ) -> Result<String, BetError> {
        if !force && account.is_token_valid(self.safety_margin) {
            if let Some(token) = &account.access_token {
                debug!(username = %account.username, "Reusing cached token");
                return Ok(token.clone());
            }
        }

        info!(username = %account.username, platform = platform.name(), force, "Signing in");
        let body = match platform.sign_in(account, relay).await {
            Ok(body) => body,
            Err(e) => {
                self.mark_inactive(account);
                return Err(e);
            }
        };

        let Some(token) = extract_token(&body, platform.token_fields()) else {
            self.mark_inactive(account);
            return Err(BetError::Credential(format!(
                "sign-in response for {} carried no token",
                account.username
            )));
        };

        let expiry = jwt_expiry(&token).unwrap_or_else(|| {
            debug!(username = %account.username, "Token has no usable exp claim, assuming fallback TTL");
            Utc::now() + self.fallback_ttl
        });

        if let Err(e) = self
            .store
            .apply(&account.id, &AccountPatch::token(token.clone(), expiry))
        {
            return Err(BetError::Storage(format!(
                "failed to persist token for {}: {e}",
                account.username
            )));
        }
        Ok(token)
    }

    /// Run an authenticated operation, retrying exactly once on a
    /// re-authentication signal with a forced token refresh.
    pub async fn with_reauth<T, F, Fut>(
        &self,
        platform: &Arc<dyn LottoPlatform>,
        account: &Account,
        relay: Option<&RelayDescriptor>,
        op: F,
    ) -> Result<T, BetError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, BetError>>,
    {
        let token = self.acquire(platform, account, relay, false).await?;
        let err = match op(token).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(signal) = platform.reauth_signal(&err) else {
            return Err(err);
        };
        warn!(
            username = %account.username,
            signal = ?signal,
            error = %err,
            "Re-authentication signal, refreshing token and retrying once"
        );
        if let Err(e) = self.store.apply(&account.id, &AccountPatch::clear_token()) {
            warn!(username = %account.username, error = %e, "Failed to clear stale token");
        }

        let token = self.acquire(platform, account, relay, true).await?;
        op(token).await
    }

    fn mark_inactive(&self, account: &Account) {
        if let Err(e) = self
            .store
            .apply(&account.id, &AccountPatch::status(AccountStatus::Inactive))
        {
            warn!(username = %account.username, error = %e, "Failed to mark account inactive");
        }
    }
}

/// Pull the first populated token field from a sign-in response,
/// checking each candidate at the top level and under `data`.
pub fn extract_token(body: &Value, fields: &[&str]) -> Option<String> {
    for field in fields {
        for candidate in [&body[*field], &body["data"][*field]] {
            if let Some(token) = candidate.as_str() {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}

/// Expiry from a JWT's `exp` claim. Tolerates both padded and unpadded
/// base64url payloads. `None` for opaque tokens.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims["exp"].as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_extract_token_top_level() {
        let body = json!({"token": "abc"});
        assert_eq!(
            extract_token(&body, &["token", "accessToken"]),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_extract_token_under_data() {
        let body = json!({"data": {"IdToken": "xyz"}});
        assert_eq!(
            extract_token(&body, &["IdToken"]),
            Some("xyz".to_string())
        );
    }

    #[test]
    fn test_extract_token_field_priority() {
        let body = json!({"accessToken": "second", "token": "first"});
        assert_eq!(
            extract_token(&body, &["token", "accessToken"]),
            Some("first".to_string())
        );
    }

    #[test]
    fn test_extract_token_skips_empty_and_missing() {
        assert_eq!(extract_token(&json!({"token": ""}), &["token"]), None);
        assert_eq!(extract_token(&json!({"other": "x"}), &["token"]), None);
        assert_eq!(extract_token(&json!({"token": 42}), &["token"]), None);
    }

    #[test]
    fn test_jwt_expiry_decodes_exp() {
        let exp = 1_900_000_000;
        let expiry = jwt_expiry(&jwt_with_exp(exp)).unwrap();
        assert_eq!(expiry.timestamp(), exp);
    }

    #[test]
    fn test_jwt_expiry_tolerates_padding() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#);
        // Payload length chosen so standard base64 would pad it.
        let payload_json = r#"{"exp":1900000000,"a":"b"}"#;
        let padded = {
            use base64::engine::general_purpose::URL_SAFE;
            URL_SAFE.encode(payload_json)
        };
        let token = format!("{header}.{padded}.sig");
        assert_eq!(jwt_expiry(&token).unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_jwt_expiry_opaque_token() {
        assert!(jwt_expiry("not-a-jwt").is_none());
        assert!(jwt_expiry("a.b.c").is_none());
        let no_exp = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode("{}"),
            URL_SAFE_NO_PAD.encode(r#"{"sub":"u1"}"#)
        );
        assert!(jwt_expiry(&no_exp).is_none());
    }
}
