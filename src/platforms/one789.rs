//! one789 adapter.
//!
//! Sign-in rides the site's Cognito-style gate: the credentials travel
//! with an `EncodedData` block, a base64 envelope holding a device
//! context payload and an HMAC-SHA256 signature over
//! `username|userPoolId|timestamp|contextData`. Orders are a single
//! signed-session POST carrying one ticket per channel.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use hmac::{Hmac, Mac};
use rand::RngCore;
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use super::{LedgerRow, LottoPlatform, OrderReceipt, OrderTicket};
use crate::config::{AppConfig, One789Config};
use crate::relay::{client_via, RelayDescriptor};
use crate::types::{Account, BetError, Platform, Region};

type HmacSha256 = Hmac<Sha256>;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";

/// Display-slug → numeric wire bet type. Unknown slugs fall back to 0,
/// the plain two-digit game.
const BET_TYPES: &[(&str, i64)] = &[
    ("de", 0),
    ("de-dau", 21),
    ("de-giai1", 22),
    ("de-dau-giai1", 23),
    ("de-thanh-tai", 24),
    ("de-dau-than-tai", 25),
    ("lo-xien", 1),
    ("lo-truot", 6),
    ("lo-dau", 29),
    ("2d-dau", 7),
    ("2d-duoi", 8),
    ("2d-18lo", 15),
    ("2d-18lo-dau", 30),
    ("2d-dau-mb2", 7),
    ("3d-dau", 10),
    ("3d-duoi", 11),
    ("3d-17lo", 17),
    ("3d-7lo", 18),
    ("3d-23lo-mb2", 12),
    ("4d-duoi", 13),
    ("4d-16lo", 19),
];

/// Wire bet types that require an `Additional` block, and the alias the
/// site expects for each.
const ADDITIONAL_ALIAS: &[(i64, i64)] = &[
    (7, 128),
    (8, 256),
    (9, 512),
    (10, 1024),
    (15, 2048),
    (16, 4096),
    (30, 2048),
];

pub struct One789Client {
    auth_base: String,
    play_base: String,
    origin: String,
    user_pool_id: String,
    signing_key: String,
    timeout: Duration,
}

impl One789Client {
    pub fn new(
        auth_base: String,
        play_base: String,
        origin: String,
        user_pool_id: String,
        signing_key: String,
        timeout: Duration,
    ) -> Self {
        One789Client {
            auth_base: auth_base.trim_end_matches('/').to_string(),
            play_base: play_base.trim_end_matches('/').to_string(),
            origin,
            user_pool_id,
            signing_key,
            timeout,
        }
    }

    pub fn from_config(cfg: &One789Config) -> anyhow::Result<Self> {
        let signing_key = AppConfig::resolve_env(&cfg.signing_key_env)?;
        Ok(Self::new(
            cfg.auth_base.clone(),
            cfg.play_base.clone(),
            cfg.origin.clone(),
            cfg.user_pool_id.clone(),
            signing_key,
            Duration::from_secs(cfg.timeout_secs),
        ))
    }

    /// Build the `EncodedData` envelope for a sign-in attempt. The
    /// signature covers `username|userPoolId|timestamp|contextData`
    /// with the context serialized exactly as embedded in the payload.
    fn encoded_data(&self, username: &str) -> Result<String, BetError> {
        let timestamp = Utc::now().timestamp_millis();
        let context = device_context();
        let context_json = serde_json::to_string(&context)
            .map_err(|e| BetError::Credential(format!("failed to serialise context: {e}")))?;

        let message = format!(
            "{username}|{}|{timestamp}|{context_json}",
            self.user_pool_id
        );
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .map_err(|e| BetError::Credential(format!("invalid signing key: {e}")))?;
        mac.update(message.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let payload = json!({
            "contextData": context,
            "username": username,
            "userPoolId": self.user_pool_id,
            "timestamp": timestamp,
        });
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| BetError::Credential(format!("failed to serialise payload: {e}")))?;

        let envelope = json!({
            "payload": payload_json,
            "signature": signature,
            "version": "JS20171115",
        });
        let envelope_json = serde_json::to_string(&envelope)
            .map_err(|e| BetError::Credential(format!("failed to serialise envelope: {e}")))?;
        Ok(BASE64.encode(envelope_json))
    }

    fn request(&self, client: &Client, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        client
            .request(method, url)
            .header("accept", "application/json, text/plain, */*")
            .header("accept-language", "vi")
            .header("origin", &self.origin)
            .header("referer", format!("{}/", self.origin))
            .header("user-agent", USER_AGENT)
    }

    fn map_bet_type(&self, display: &str) -> i64 {
        match BET_TYPES.iter().find(|(slug, _)| *slug == display) {
            Some((_, wire)) => *wire,
            None => {
                warn!(bet_type = display, "Unknown bet type, defaulting to 0");
                0
            }
        }
    }

    /// Game type for one channel. The north draw is game 0 (or 1 for
    /// the second wheel); southern channels index into that weekday's
    /// station rota, offset by 2.
    fn game_type(&self, region: Region, channel: &str, date: NaiveDate) -> i64 {
        match region {
            Region::North | Region::Central => {
                if channel == "mb2" {
                    1
                } else {
                    0
                }
            }
            Region::South => {
                let rota = south_rota(date.weekday());
                match rota.iter().position(|s| *s == channel) {
                    Some(idx) => 2 + idx as i64,
                    None => {
                        warn!(channel, %date, "Channel not in southern rota, defaulting to 2");
                        2
                    }
                }
            }
        }
    }

    fn ticket_payload(&self, ticket: &OrderTicket) -> Value {
        let wire_type = self.map_bet_type(&ticket.bet_type);
        let items: Vec<Value> = ticket
            .numbers
            .iter()
            .map(|n| json!({ "Numbers": [n], "Point": ticket.points, "Price": 0 }))
            .collect();

        let tickets: Vec<Value> = ticket
            .channels
            .iter()
            .map(|channel| {
                let mut t = json!({
                    "GameType": self.game_type(ticket.region, channel, ticket.bet_date),
                    "BetType": wire_type,
                    "Items": items.clone(),
                });
                if let Some((_, alias)) = ADDITIONAL_ALIAS.iter().find(|(bt, _)| *bt == wire_type) {
                    t["Additional"] = json!({ "Row": 0, "Alias": alias, "Reverse": false });
                }
                t
            })
            .collect();

        json!({
            "Term": ticket.bet_date.format("%Y-%m-%d").to_string(),
            "IgnorePrice": true,
            "Tickets": tickets,
        })
    }

    async fn send_json(&self, builder: reqwest::RequestBuilder) -> Result<Value, BetError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| BetError::order(format!("request failed: {e}")))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| BetError::order(format!("invalid response body: {e}")))?;
        if !status.is_success() {
            let message = body["message"]
                .as_str()
                .or_else(|| body["Message"].as_str())
                .or_else(|| body["error"].as_str())
                .unwrap_or("request rejected")
                .to_string();
            return Err(BetError::order_with_status(status.as_u16(), message));
        }
        Ok(body)
    }
}

#[async_trait]
impl LottoPlatform for One789Client {
    fn name(&self) -> &'static str {
        "one789"
    }

    fn kind(&self) -> Platform {
        Platform::One789
    }

    async fn sign_in(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
    ) -> Result<Value, BetError> {
        let client = client_via(relay, self.timeout)?;
        let body = json!({
            "Username": account.username,
            "Password": account.password,
            "EncodedData": self.encoded_data(&account.username)?,
            "VisitorId": visitor_id(),
        });
        let url = format!("{}/auth/sign-in", self.auth_base);

        let resp = self
            .request(&client, reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BetError::Credential(format!("sign-in request failed: {e}")))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| BetError::Credential(format!("invalid sign-in response: {e}")))?;
        if !status.is_success() {
            let message = body["message"]
                .as_str()
                .or_else(|| body["Message"].as_str())
                .unwrap_or("sign-in rejected");
            return Err(BetError::Credential(format!("HTTP {status}: {message}")));
        }
        Ok(body)
    }

    fn token_fields(&self) -> &'static [&'static str] {
        &["IdToken", "idToken", "id_token", "token"]
    }

    fn validate(&self, ticket: &OrderTicket) -> Result<(), BetError> {
        if ticket.numbers.is_empty() {
            return Err(BetError::order("number list is empty"));
        }
        if ticket.points <= 0.0 {
            return Err(BetError::order("stake per number must be positive"));
        }
        if ticket.channels.is_empty() {
            return Err(BetError::order("at least one channel is required"));
        }
        if matches!(ticket.region, Region::Central) {
            return Err(BetError::order("central draws are not offered on this site"));
        }

        let width = digit_width(&ticket.bet_type);
        for number in &ticket.numbers {
            if number.len() != width || !number.chars().all(|c| c.is_ascii_digit()) {
                return Err(BetError::order(format!(
                    "number {number} is not a {width}-digit value for bet type {}",
                    ticket.bet_type
                )));
            }
        }

        let expected = self.stake_for(
            &ticket.bet_type,
            ticket.numbers.len(),
            ticket.points,
            ticket.channels.len(),
        );
        if (ticket.total_stake - expected).abs() > 1e-9 {
            return Err(BetError::order(format!(
                "stake mismatch: expected {expected}, declared {}",
                ticket.total_stake
            )));
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
        // Flat per-point pricing; the site quotes odds at settlement.
        number_count as f64 * points * channel_count as f64
    }

    fn normalize_bet_type(&self, display: &str) -> String {
        self.map_bet_type(display).to_string()
    }

    async fn place_order(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
        ticket: &OrderTicket,
    ) -> Result<OrderReceipt, BetError> {
        let client = client_via(relay, self.timeout)?;
        let payload = self.ticket_payload(ticket);

        debug!(username = %account.username, tickets = ticket.channels.len(), "Submitting play");
        let url = format!("{}/game-play/player/play", self.play_base);
        let body = self
            .send_json(
                self.request(&client, reqwest::Method::POST, url)
                    .header("authorization", format!("Bearer {token}"))
                    .json(&payload),
            )
            .await?;

        Ok(OrderReceipt {
            order_code: receipt_code(&body, &account.username),
            details: body,
        })
    }

    async fn fetch_ledger(
        &self,
        _account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
        date: NaiveDate,
    ) -> Result<Vec<LedgerRow>, BetError> {
        let client = client_via(relay, self.timeout)?;
        let term = date.format("%Y-%m-%d").to_string();
        let url = format!("{}/game-play/player/records", self.play_base);

        let body = self
            .send_json(
                self.request(&client, reqwest::Method::GET, url)
                    .header("authorization", format!("Bearer {token}"))
                    .query(&[("term", term.as_str())]),
            )
            .await?;

        let rows = body
            .as_array()
            .or_else(|| body["data"].as_array())
            .cloned()
            .unwrap_or_default();

        Ok(rows.iter().map(normalize_record).collect())
    }

    async fn fetch_balance(
        &self,
        _account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
    ) -> Result<f64, BetError> {
        let client = client_via(relay, self.timeout)?;
        let url = format!("{}/users/profile", self.auth_base);
        let body = self
            .send_json(
                self.request(&client, reqwest::Method::GET, url)
                    .header("authorization", format!("Bearer {token}")),
            )
            .await?;
        Ok(first_f64(&[
            &body["Balance"],
            &body["balance"],
            &body["data"]["Balance"],
            &body["data"]["balance"],
        ]))
    }
}

/// Southern station rota per weekday; a channel's rota position picks
/// its game number.
fn south_rota(day: Weekday) -> &'static [&'static str] {
    match day {
        Weekday::Mon => &["tp-hcm", "dong-thap", "ca-mau"],
        Weekday::Tue => &["ben-tre", "vung-tau", "bac-lieu"],
        Weekday::Wed => &["dong-nai", "can-tho", "soc-trang"],
        Weekday::Thu => &["tay-ninh", "an-giang", "binh-thuan"],
        Weekday::Fri => &["vinh-long", "binh-duong", "tra-vinh"],
        Weekday::Sat => &["tp-hcm", "long-an", "binh-phuoc", "hau-giang"],
        Weekday::Sun => &["tien-giang", "kien-giang", "da-lat"],
    }
}

/// Required digit count for a bet type's numbers.
fn digit_width(bet_type: &str) -> usize {
    if bet_type.contains("4d") {
        4
    } else if bet_type.contains("3d") {
        3
    } else {
        2
    }
}

/// The play response is an array of acknowledgements; the transaction
/// id moves between fields across site versions, and some drop it
/// entirely, so a synthetic code is the last resort.
fn receipt_code(body: &Value, username: &str) -> String {
    let first = &body[0];
    for field in ["Tx", "orderId", "id"] {
        if let Some(code) = value_as_code(&first[field]) {
            return code;
        }
    }
    format!("ONE789_{}_{username}", Utc::now().timestamp_millis())
}

fn value_as_code(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn device_context() -> Value {
    json!({
        "UserAgent": USER_AGENT,
        "DeviceId": device_id(),
        "DeviceLanguage": "vi-VN",
        "DeviceFingerprint": format!("{USER_AGENT}PDF Viewer:Chrome PDF Viewer:Chromium PDF Viewer:Microsoft Edge PDF Viewer:WebKit built-in PDF:vi-VN"),
        "DevicePlatform": "Win32",
        "ClientTimezone": "07:00",
    })
}

fn device_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}:{}", hex::encode(bytes), Utc::now().timestamp_millis())
}

fn visitor_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn first_f64(candidates: &[&Value]) -> f64 {
    candidates
        .iter()
        .find_map(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0.0)
}

/// Normalize a play record to the shared ledger shape. Field casing is
/// inconsistent across endpoints, so both spellings are tried.
fn normalize_record(raw: &Value) -> LedgerRow {
    let pick = |keys: &[&str]| -> Value {
        keys.iter()
            .map(|k| raw[*k].clone())
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null)
    };
    let strings = |v: &Value| -> Vec<String> {
        v.as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| value_as_code(i))
                    .collect()
            })
            .unwrap_or_default()
    };

    LedgerRow {
        order_code: value_as_code(&pick(&["Tx", "tx", "orderCode"])).unwrap_or_default(),
        stake: first_f64(&[&pick(&["Stake", "stake", "Amount"])]),
        win_loss: first_f64(&[&pick(&["WinLoss", "winLoss", "memberWinLoss"])]),
        status: pick(&["Status", "status"])
            .as_str()
            .unwrap_or_default()
            .to_uppercase(),
        numbers: strings(&pick(&["Numbers", "numbers"])),
        channels: strings(&pick(&["Channels", "channels"])),
        channel_win: strings(&pick(&["ChannelWin", "channelWin"])),
        bet_type: value_as_code(&pick(&["BetType", "betType"])).unwrap_or_default(),
        bet_type_child: value_as_code(&pick(&["BetTypeChild", "betTypeChild"])).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
