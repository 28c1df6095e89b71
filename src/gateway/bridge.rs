//! REST client for the terminal bridge.
//!
//! Each account endpoint points at a small HTTP bridge colocated with the
//! venue terminal. The bridge holds at most one logged-in session at a
//! time, which is why the copier connects, works, and disconnects around
//! every batch of operations instead of keeping sessions open.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{AccountProfile, Position, Side};

use super::{FillMode, Gateway, GatewayError, GatewaySession, OpenRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom added to the HTTP deadline so a transport timeout cannot fire
/// before the venue-side login budget it wraps.
const LOGIN_HTTP_HEADROOM: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    login: u64,
    password: String,
    server: String,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    login: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionInfo {
    ticket: u64,
    symbol: String,
    side: Side,
    volume: Decimal,
    open_price: Decimal,
    #[serde(default)]
    stop_loss: Decimal,
    #[serde(default)]
    take_profit: Decimal,
    #[serde(default)]
    comment: String,
    /// Unix seconds
    open_time: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    action: &'static str,
    symbol: String,
    side: Side,
    volume: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    fill_mode: FillMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    retcode: String,
    #[serde(default)]
    ticket: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    stop_loss: Decimal,
    take_profit: Decimal,
}

/// Map an order retcode onto the typed failure kinds.
fn order_error(retcode: &str, message: Option<String>, fill: FillMode) -> GatewayError {
    match retcode {
        "requote" => GatewayError::Requote,
        "invalid_fill" => GatewayError::UnsupportedFill(fill),
        other => GatewayError::Rejected(message.unwrap_or_else(|| other.to_string())),
    }
}

/// Convert a wire snapshot into positions.
///
/// One bad entry fails the whole snapshot: callers diff against the result,
/// and a partial book would read as closes for every position it is missing.
fn positions_from_wire(items: Vec<PositionInfo>) -> Result<Vec<Position>, GatewayError> {
    items
        .into_iter()
        .map(|p| {
            let open_time = Utc.timestamp_opt(p.open_time, 0).single().ok_or_else(|| {
                GatewayError::Transport(format!(
                    "position {} has unrepresentable open time {}",
                    p.ticket, p.open_time
                ))
            })?;

            Ok(Position {
                ticket: p.ticket,
                symbol: p.symbol,
                side: p.side,
                volume: p.volume,
                open_price: p.open_price,
                stop_loss: p.stop_loss,
                take_profit: p.take_profit,
                comment: p.comment,
                open_time,
            })
        })
        .collect()
}

/// Gateway that talks to terminal bridges over HTTP.
///
/// One instance serves every account; per-account state lives entirely in
/// the session it hands out.
pub struct BridgeGateway {
    client: Option<Client>,
}

impl BridgeGateway {
    pub fn new() -> Self {
        let client = match Client::builder().timeout(DEFAULT_TIMEOUT).build() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Failed to create HTTP client, bridge gateway unavailable");
                None
            }
        };

        Self { client }
    }
}

impl Default for BridgeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for BridgeGateway {
    fn available(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(
        &self,
        profile: &AccountProfile,
        timeout: Duration,
    ) -> Result<Box<dyn GatewaySession>, GatewayError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| GatewayError::Transport("HTTP client unavailable".to_string()))?;

        let base_url = profile.endpoint.trim_end_matches('/').to_string();
        let url = format!("{}/session", base_url);

        debug!(url = %url, login = profile.login, "Opening bridge session");

        let request = SessionRequest {
            login: profile.login,
            password: profile.password.clone(),
            server: profile.server.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        let response = client
            .post(&url)
            .timeout(timeout + LOGIN_HTTP_HEADROOM)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Session(format!("{} - {}", status, body)));
        }

        let info: SessionInfo = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("bad session response: {}", e)))?;

        debug!(
            login = info.login,
            account = %info.name,
            balance = %info.balance,
            "Bridge session open"
        );

        Ok(Box::new(BridgeSession {
            client: client.clone(),
            base_url,
            login: profile.login,
        }))
    }
}

/// One logged-in bridge session.
struct BridgeSession {
    client: Client,
    base_url: String,
    login: u64,
}

impl BridgeSession {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, GatewayError> {
        let url = self.url("/orders");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{} - {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("bad order response: {}", e)))
    }
}

#[async_trait]
impl GatewaySession for BridgeSession {
    async fn open_positions(&mut self) -> Result<Vec<Position>, GatewayError> {
        let url = self.url("/positions");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Session(format!("{} - {}", status, body)));
        }

        let items: Vec<PositionInfo> = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("bad positions response: {}", e)))?;

        positions_from_wire(items)
    }

    async fn open(&mut self, req: &OpenRequest) -> Result<u64, GatewayError> {
        let request = OrderRequest {
            action: "open",
            symbol: req.symbol.clone(),
            side: req.side,
            volume: req.volume,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            comment: Some(req.comment.clone()),
            fill_mode: req.fill,
            ticket: None,
        };

        let response = self.place_order(&request).await?;
        match response.retcode.as_str() {
            "done" => response.ticket.ok_or_else(|| {
                GatewayError::Transport("order done but no ticket returned".to_string())
            }),
            other => Err(order_error(other, response.message, req.fill)),
        }
    }

    async fn close(&mut self, target: &Position, fill: FillMode) -> Result<(), GatewayError> {
        let request = OrderRequest {
            action: "close",
            symbol: target.symbol.clone(),
            side: target.side.opposite(),
            volume: target.volume,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            comment: None,
            fill_mode: fill,
            ticket: Some(target.ticket),
        };

        let response = self.place_order(&request).await?;
        match response.retcode.as_str() {
            "done" => Ok(()),
            other => Err(order_error(other, response.message, fill)),
        }
    }

    async fn modify(
        &mut self,
        ticket: u64,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<(), GatewayError> {
        let url = self.url(&format!("/positions/{}", ticket));

        let response = self
            .client
            .patch(&url)
            .json(&ModifyRequest {
                stop_loss,
                take_profit,
            })
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{} - {}", status, body)));
        }

        Ok(())
    }

    async fn disconnect(&mut self) {
        let url = self.url("/session");

        if let Err(e) = self.client.delete(&url).send().await {
            debug!(login = self.login, error = %e, "Bridge logout failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retcode_mapping() {
        assert!(order_error("requote", None, FillMode::Ioc).is_requote());
        assert_eq!(
            order_error("invalid_fill", None, FillMode::Fok).unsupported_fill(),
            Some(FillMode::Fok)
        );

        let rejected = order_error("rejected", Some("not enough money".to_string()), FillMode::Ioc);
        assert_eq!(rejected.to_string(), "rejected: not enough money");

        // Unknown retcodes fall through as rejections carrying the raw code
        let unknown = order_error("market_closed", None, FillMode::Ioc);
        assert_eq!(unknown.to_string(), "rejected: market_closed");
    }

    #[test]
    fn test_order_request_wire_shape() {
        let request = OrderRequest {
            action: "open",
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.50),
            stop_loss: dec!(1.0900),
            take_profit: dec!(0),
            comment: Some("MC-42".to_string()),
            fill_mode: FillMode::Ioc,
            ticket: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["action"], "open");
        assert_eq!(json["side"], "BUY");
        assert_eq!(json["fillMode"], "IOC");
        assert_eq!(json["stopLoss"], "1.0900");
        assert!(json.get("ticket").is_none());
    }

    #[test]
    fn test_bad_open_time_fails_the_whole_snapshot() {
        // One parseable entry, one with a timestamp far outside chrono's
        // range. The good entry must not survive as a partial book: the
        // tracker would read the missing ticket as a close.
        let items: Vec<PositionInfo> = serde_json::from_str(
            r#"[
                {
                    "ticket": 1,
                    "symbol": "EURUSD",
                    "side": "BUY",
                    "volume": "1.0",
                    "openPrice": "1.1000",
                    "openTime": 1700000000
                },
                {
                    "ticket": 2,
                    "symbol": "GBPUSD",
                    "side": "SELL",
                    "volume": "0.5",
                    "openPrice": "1.2500",
                    "openTime": 9223372036854775807
                }
            ]"#,
        )
        .unwrap();

        let err = positions_from_wire(items).unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert!(err.to_string().contains("position 2"));
    }

    #[test]
    fn test_clean_snapshot_converts_every_entry() {
        let items: Vec<PositionInfo> = serde_json::from_str(
            r#"[
                {
                    "ticket": 1,
                    "symbol": "EURUSD",
                    "side": "BUY",
                    "volume": "1.0",
                    "openPrice": "1.1000",
                    "openTime": 1700000000
                },
                {
                    "ticket": 2,
                    "symbol": "GBPUSD",
                    "side": "SELL",
                    "volume": "0.5",
                    "openPrice": "1.2500",
                    "openTime": 1700000100
                }
            ]"#,
        )
        .unwrap();

        let positions = positions_from_wire(items).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].ticket, 1);
        assert_eq!(positions[1].open_time.timestamp(), 1_700_000_100);
    }

    #[test]
    fn test_position_info_wire_shape() {
        let info: PositionInfo = serde_json::from_str(
            r#"{
                "ticket": 9001,
                "symbol": "EURUSD",
                "side": "SELL",
                "volume": "0.25",
                "openPrice": "1.1000",
                "stopLoss": "1.1100",
                "openTime": 1700000000
            }"#,
        )
        .unwrap();

        assert_eq!(info.ticket, 9001);
        assert_eq!(info.side, Side::Sell);
        assert_eq!(info.take_profit, Decimal::ZERO);
        assert_eq!(info.comment, "");
    }
}
