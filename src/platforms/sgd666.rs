//! sgd666 adapter.
//!
//! Orders go out in two phases: a signed create call that yields an
//! `orderCode`, then a confirm PATCH against that code. A confirmation
//! is only trusted when the response body reports `data.code == 200`.
//! Request bodies are canonical compact JSON, carried base64-encoded
//! alongside an HMAC-SHA256 signature keyed by the site secret.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Datelike, NaiveDate};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use super::{LedgerRow, LottoPlatform, OrderReceipt, OrderTicket};
use crate::config::{AppConfig, Sgd666Config};
use crate::relay::{client_via, RelayDescriptor};
use crate::types::{Account, BetError, Platform, Region};

type HmacSha256 = Hmac<Sha256>;

/// Display-slug → wire-code bet type table. Unknown slugs fall back to
/// `LAST`, matching what the site itself assumes.
const BET_TYPES: &[(&str, &str)] = &[
    ("bao-lo", "ALL_LOT"),
    ("dau-duoi", "FIRST_LAST"),
    ("duoi", "LAST"),
    ("dau", "FIRST"),
    ("da", "KICK_STRAIGHT"),
    ("7-lo", "SEVEN_LOT"),
    ("7-lo-dau", "SEVEN_LOT_FIRST"),
    ("7-lo-duoi", "SEVEN_LOT_LAST"),
    ("7-lo-giua", "SEVEN_LOT_BETWEEN"),
    ("giai-7", "PRIZE_SEVEN"),
    ("giai-6", "PRIZE_SIX"),
    ("giai-5", "PRIZE_FIVE"),
    ("giai-4", "PRIZE_FOUR"),
    ("giai-3", "PRIZE_THREE"),
    ("giai-2", "PRIZE_TWO"),
    ("giai-1", "PRIZE_ONE"),
];

/// Station slug → wire station name. Unknown stations pass through
/// lowercased (the site accepts most of them verbatim).
const STATIONS: &[(&str, &str)] = &[
    ("mb1", "mb1"),
    ("mb2", "mb2"),
    ("ha-noi", "hanoi"),
    ("quang-ninh", "quangninh"),
    ("bac-ninh", "bacninh"),
    ("hai-phong", "haiphong"),
    ("nam-dinh", "namdinh"),
    ("thai-binh", "thaibinh"),
    ("tp-hcm", "thanhpho"),
    ("dong-thap", "dongthap"),
    ("ca-mau", "camau"),
    ("ben-tre", "bentre"),
    ("vung-tau", "vungtau"),
    ("bac-lieu", "baclieu"),
    ("can-tho", "cantho"),
    ("soc-trang", "soctrang"),
    ("tay-ninh", "tayninh"),
    ("an-giang", "angiang"),
    ("binh-thuan", "binhthuan"),
    ("vinh-long", "vinhlong"),
    ("tra-vinh", "travinh"),
    ("long-an", "longan"),
    ("binh-phuoc", "binhphuoc"),
    ("hau-giang", "haugiang"),
    ("tien-giang", "tiengiang"),
    ("kien-giang", "kiengiang"),
    ("da-lat", "dalat"),
    ("thua-thien-hue", "thuathienhue"),
    ("phu-yen", "phuyen"),
    ("dak-lak", "daklak"),
    ("quang-nam", "quangnam"),
    ("da-nang", "danang"),
    ("khanh-hoa", "khanhhoa"),
    ("binh-dinh", "binhdinh"),
    ("quang-tri", "quangtri"),
    ("ninh-thuan", "ninhthuan"),
    ("quang-binh", "quangbinh"),
    ("gia-lai", "gialai"),
    ("quang-ngai", "quangngai"),
    ("dak-nong", "daknong"),
    ("kon-tum", "kontum"),
];

pub struct Sgd666Client {
    api_base: String,
    origin: String,
    signing_key: String,
    timeout: Duration,
}

impl Sgd666Client {
    pub fn new(api_base: String, origin: String, signing_key: String, timeout: Duration) -> Self {
        Sgd666Client {
            api_base: api_base.trim_end_matches('/').to_string(),
            origin,
            signing_key,
            timeout,
        }
    }

    pub fn from_config(cfg: &Sgd666Config) -> anyhow::Result<Self> {
        let signing_key = AppConfig::resolve_env(&cfg.signing_key_env)?;
        Ok(Self::new(
            cfg.api_base.clone(),
            cfg.origin.clone(),
            signing_key,
            Duration::from_secs(cfg.timeout_secs),
        ))
    }

    /// Canonical compact JSON of `body`, base64-encoded, with an
    /// HMAC-SHA256 signature over the same bytes.
    fn signed_payload(&self, body: &Value) -> Result<Value, BetError> {
        let canonical = serde_json::to_string(body)
            .map_err(|e| BetError::order(format!("failed to serialise order body: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .map_err(|e| BetError::order(format!("invalid signing key: {e}")))?;
        mac.update(canonical.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(json!({
            "hash": BASE64.encode(canonical),
            "signature": signature,
        }))
    }

    fn request(&self, client: &Client, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        client
            .request(method, url)
            .header("accept", "application/json, text/plain, */*")
            .header("accept-language", "vi")
            .header("origin", &self.origin)
            .header("referer", format!("{}/", self.origin))
    }

    fn map_bet_type(&self, display: &str) -> String {
        if let Some((_, wire)) = BET_TYPES.iter().find(|(slug, _)| *slug == display) {
            return wire.to_string();
        }
        // Already a wire code, or unknown.
        if display.chars().all(|c| c.is_ascii_uppercase() || c == '_') && !display.is_empty() {
            return display.to_string();
        }
        warn!(bet_type = display, "Unknown bet type, defaulting to LAST");
        "LAST".to_string()
    }

    fn map_station(&self, station: &str) -> String {
        match STATIONS.iter().find(|(slug, _)| *slug == station) {
            Some((_, wire)) => wire.to_string(),
            None => {
                warn!(station, "Unknown station, passing through lowercased");
                station.to_lowercase()
            }
        }
    }

    fn map_region(&self, region: Region) -> &'static str {
        match region {
            Region::North => "NORTH",
            Region::Central => "CENTRAL",
            Region::South => "SOUTH",
        }
    }

    fn multiplier(&self, bet_type: &str, number_count: usize) -> f64 {
        match bet_type {
            "ALL_LOT" => 18.0,
            "FIRST_LAST" => 2.0,
            "KICK_STRAIGHT" => 18.0 * (number_count.saturating_sub(1)) as f64,
            "SEVEN_LOT" | "SEVEN_LOT_FIRST" | "SEVEN_LOT_LAST" | "SEVEN_LOT_BETWEEN" => 7.0,
            _ => 1.0,
        }
    }

    /// The single-element order array the site expects.
    fn order_body(&self, ticket: &OrderTicket) -> Value {
        let wire_type = self.map_bet_type(&ticket.bet_type);
        let channels: Vec<String> = ticket.channels.iter().map(|c| self.map_station(c)).collect();
        json!([{
            "stake": ticket.total_stake,
            "region": self.map_region(ticket.region),
            "channels": channels,
            "betType": [wire_type],
            "betTypeChild": "TWO_NUMBERS",
            "numbers": ticket.numbers,
            "stakePerBet": ticket.points.to_string(),
            "date": format_date(ticket.bet_date),
            "confirm": false,
            "site": "member",
        }])
    }

    async fn send_json(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Value, BetError> {
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
                .unwrap_or("request rejected")
                .to_string();
            return Err(BetError::order_with_status(status.as_u16(), message));
        }
        Ok(body)
    }
}

#[async_trait]
impl LottoPlatform for Sgd666Client {
    fn name(&self) -> &'static str {
        "sgd666"
    }

    fn kind(&self) -> Platform {
        Platform::Sgd666
    }

    async fn sign_in(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
    ) -> Result<Value, BetError> {
        let client = client_via(relay, self.timeout)?;
        let body = json!({
            "userName": account.username,
            "password": account.password,
            "origin": "member",
        });
        let payload = self.signed_payload(&body)?;
        let url = format!("{}/authentication/sign-in", self.api_base);

        let resp = self
            .request(&client, reqwest::Method::POST, url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BetError::Credential(format!("sign-in request failed: {e}")))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| BetError::Credential(format!("invalid sign-in response: {e}")))?;
        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("sign-in rejected");
            return Err(BetError::Credential(format!("HTTP {status}: {message}")));
        }
        Ok(body)
    }

    fn token_fields(&self) -> &'static [&'static str] {
        &["token", "accessToken", "access_token"]
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
        bet_type: &str,
        number_count: usize,
        points: f64,
        channel_count: usize,
    ) -> f64 {
        let wire_type = self.map_bet_type(bet_type);
        number_count as f64 * points * self.multiplier(&wire_type, number_count) * channel_count as f64
    }

    fn normalize_bet_type(&self, display: &str) -> String {
        self.map_bet_type(display)
    }

    async fn place_order(
        &self,
        account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
        ticket: &OrderTicket,
    ) -> Result<OrderReceipt, BetError> {
        let client = client_via(relay, self.timeout)?;
        let payload = self.signed_payload(&self.order_body(ticket))?;

        let create_url = format!("{}/app/loto/order", self.api_base);
        let body = self
            .send_json(
                self.request(&client, reqwest::Method::POST, create_url)
                    .header("token", format!("Bearer {token}"))
                    .json(&payload),
            )
            .await?;

        let Some(order_code) = body["orderCode"].as_str().map(str::to_string) else {
            let message = body["message"].as_str().unwrap_or("no orderCode received");
            return Err(BetError::order(format!("order rejected: {message}")));
        };

        debug!(username = %account.username, order_code, "Confirming order");
        let confirm_url = format!("{}/app/loto/order/{}", self.api_base, order_code);
        let confirm = self
            .send_json(
                self.request(&client, reqwest::Method::PATCH, confirm_url)
                    .header("token", format!("Bearer {token}"))
                    .json(&json!({ "confirm": true, "orderCode": order_code })),
            )
            .await?;

        if !confirm_ok(&confirm) {
            let message = confirm["message"].as_str().unwrap_or("confirmation failed");
            return Err(BetError::order(format!(
                "order confirmation failed: {message}"
            )));
        }

        Ok(OrderReceipt {
            order_code,
            details: confirm,
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
        let date_str = format_date(date);
        let url = format!("{}/app/statement/details", self.api_base);

        let body = self
            .send_json(
                self.request(&client, reqwest::Method::GET, url)
                    .header("token", format!("Bearer {token}"))
                    .query(&[
                        ("start", date_str.as_str()),
                        ("end", date_str.as_str()),
                        ("page", "0"),
                        ("limit", "50"),
                    ]),
            )
            .await?;

        let rows = body["data"]["data"]
            .as_array()
            .or_else(|| body["data"].as_array())
            .cloned()
            .unwrap_or_default();

        Ok(rows.iter().map(normalize_row).collect())
    }

    async fn fetch_balance(
        &self,
        _account: &Account,
        relay: Option<&RelayDescriptor>,
        token: &str,
    ) -> Result<f64, BetError> {
        let client = client_via(relay, self.timeout)?;
        let url = format!("{}/app/account/details", self.api_base);
        let body = self
            .send_json(
                self.request(&client, reqwest::Method::GET, url)
                    .header("token", format!("Bearer {token}")),
            )
            .await?;
        Ok(lenient_f64(&body["data"]["plInfo"]["credit"]))
    }
}

/// A confirm response is only a success when the nested payload says so.
fn confirm_ok(body: &Value) -> bool {
    body["data"]["code"].as_i64() == Some(200)
}

fn format_date(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{}", date.day(), date.month(), date.year())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatementRow {
    order_code: String,
    stake: Value,
    member_win_loss: Value,
    status: String,
    numbers: Vec<Value>,
    channels: Vec<Value>,
    channel_win: Vec<Value>,
    bet_type: String,
    bet_type_child: String,
}

fn normalize_row(raw: &Value) -> LedgerRow {
    let row: StatementRow = serde_json::from_value(raw.clone()).unwrap_or_default();
    LedgerRow {
        order_code: row.order_code,
        stake: lenient_f64(&row.stake),
        win_loss: lenient_f64(&row.member_win_loss),
        status: row.status.to_uppercase(),
        numbers: string_vec(&row.numbers),
        channels: string_vec(&row.channels),
        channel_win: string_vec(&row.channel_win),
        bet_type: row.bet_type,
        bet_type_child: row.bet_type_child,
    }
}

/// The site returns amounts as numbers or numeric strings depending on
/// the endpoint.
fn lenient_f64(v: &Value) -> f64 {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

fn string_vec(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Sgd666Client {
        Sgd666Client::new(
            "https://api.sgd666.example/api/v1".to_string(),
            "https://sgd666.example".to_string(),
            "test-signing-key".to_string(),
            Duration::from_secs(30),
        )
    }

    fn ticket(bet_type: &str, numbers: &[&str], points: f64, channels: &[&str], total: f64) -> OrderTicket {
        OrderTicket {
            region: Region::North,
            bet_type: bet_type.to_string(),
            channels: channels.iter().map(|s| s.to_string()).collect(),
            numbers: numbers.iter().map(|s| s.to_string()).collect(),
            points,
            total_stake: total,
            bet_date: NaiveDate::from_ymd_opt(2026, 8, 25).unwrap(),
        }
    }

    // -- mapping tables --

    #[test]
    fn test_bet_type_mapping() {
        let c = client();
        assert_eq!(c.map_bet_type("bao-lo"), "ALL_LOT");
        assert_eq!(c.map_bet_type("da"), "KICK_STRAIGHT");
        assert_eq!(c.map_bet_type("ALL_LOT"), "ALL_LOT"); // wire passthrough
        assert_eq!(c.map_bet_type("mystery"), "LAST");
    }

    #[test]
    fn test_station_mapping() {
        let c = client();
        assert_eq!(c.map_station("tp-hcm"), "thanhpho");
        assert_eq!(c.map_station("ha-noi"), "hanoi");
        assert_eq!(c.map_station("Novel-Station"), "novel-station");
    }

    // -- stake formula --

    #[test]
    fn test_multipliers() {
        let c = client();
        assert_eq!(c.multiplier("ALL_LOT", 3), 18.0);
        assert_eq!(c.multiplier("FIRST_LAST", 3), 2.0);
        assert_eq!(c.multiplier("KICK_STRAIGHT", 3), 36.0);
        assert_eq!(c.multiplier("SEVEN_LOT_BETWEEN", 3), 7.0);
        assert_eq!(c.multiplier("PRIZE_ONE", 3), 1.0);
    }

    #[test]
    fn test_stake_for_all_lot() {
        // 2 numbers × 10 pts × 18 × 2 channels = 720.
        let c = client();
        assert!((c.stake_for("bao-lo", 2, 10.0, 2) - 720.0).abs() < 1e-10);
    }

    #[test]
    fn test_validate_accepts_exact_stake() {
        let c = client();
        let t = ticket("bao-lo", &["12", "34"], 10.0, &["mb1", "mb2"], 720.0);
        assert!(c.validate(&t).is_ok());
    }

    #[test]
    fn test_validate_rejects_stake_mismatch() {
        let c = client();
        let t = ticket("bao-lo", &["12", "34"], 10.0, &["mb1", "mb2"], 700.0);
        let err = c.validate(&t).unwrap_err();
        assert!(err.to_string().contains("stake mismatch"));
    }

    #[test]
    fn test_validate_rejects_empty_shapes() {
        let c = client();
        assert!(c.validate(&ticket("bao-lo", &[], 10.0, &["mb1"], 0.0)).is_err());
        assert!(c.validate(&ticket("bao-lo", &["12"], 0.0, &["mb1"], 0.0)).is_err());
        assert!(c.validate(&ticket("bao-lo", &["12"], 10.0, &[], 180.0)).is_err());
    }

    // -- wire payloads --

    #[test]
    fn test_order_body_shape() {
        let c = client();
        let t = ticket("bao-lo", &["12", "34"], 10.0, &["mb1", "ha-noi"], 720.0);
        let body = c.order_body(&t);
        let order = &body[0];
        assert_eq!(order["region"], "NORTH");
        assert_eq!(order["betType"][0], "ALL_LOT");
        assert_eq!(order["betTypeChild"], "TWO_NUMBERS");
        assert_eq!(order["channels"][1], "hanoi");
        assert_eq!(order["stakePerBet"], "10");
        assert_eq!(order["date"], "25/08/2026");
        assert_eq!(order["confirm"], false);
        assert_eq!(order["site"], "member");
        assert_eq!(order["stake"], 720.0);
    }

    #[test]
    fn test_signed_payload_roundtrip() {
        let c = client();
        let body = json!({"userName": "alice", "password": "pw", "origin": "member"});
        let payload = c.signed_payload(&body).unwrap();

        let hash = payload["hash"].as_str().unwrap();
        let canonical = String::from_utf8(BASE64.decode(hash).unwrap()).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&canonical).unwrap(),
            body
        );

        let signature = payload["signature"].as_str().unwrap();
        assert_eq!(signature.len(), 64); // hex sha256
        // Signature is deterministic for a fixed key and body.
        let again = c.signed_payload(&body).unwrap();
        assert_eq!(again["signature"], payload["signature"]);
    }

    #[test]
    fn test_confirm_ok() {
        assert!(confirm_ok(&json!({"data": {"code": 200}})));
        assert!(!confirm_ok(&json!({"data": {"code": 500}})));
        assert!(!confirm_ok(&json!({"message": "ok"})));
    }

    #[test]
    fn test_format_date() {
        assert_eq!(
            format_date(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()),
            "05/01/2026"
        );
    }

    // -- ledger normalization --

    #[test]
    fn test_normalize_row_lenient_amounts() {
        let raw = json!({
            "orderCode": "OC123",
            "stake": "360",
            "memberWinLoss": 540.5,
            "status": "win",
            "numbers": ["12", 34],
            "channels": ["hanoi"],
            "channelWin": ["hanoi"],
            "betType": "ALL_LOT",
            "betTypeChild": "TWO_NUMBERS"
        });
        let row = normalize_row(&raw);
        assert_eq!(row.order_code, "OC123");
        assert!((row.stake - 360.0).abs() < 1e-10);
        assert!((row.win_loss - 540.5).abs() < 1e-10);
        assert_eq!(row.status, "WIN");
        assert!(row.is_win());
        assert_eq!(row.numbers, vec!["12".to_string(), "34".to_string()]);
        assert_eq!(row.channel_win, vec!["hanoi".to_string()]);
    }

    #[test]
    fn test_normalize_row_missing_fields() {
        let row = normalize_row(&json!({"orderCode": "OC9"}));
        assert_eq!(row.order_code, "OC9");
        assert_eq!(row.stake, 0.0);
        assert!(!row.is_win());
        assert!(row.numbers.is_empty());
    }

    #[test]
    fn test_token_fields_order() {
        assert_eq!(client().token_fields(), &["token", "accessToken", "access_token"]);
    }
}
