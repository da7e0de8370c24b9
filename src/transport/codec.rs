//! Wire format of the simulated exchange.
//!
//! Everything the replay core sends or receives passes through a
//! [`MarketCodec`]; [`BybitCodec`] speaks the Bybit v5 dialect.

use crate::models::{Candle, KlineInterval, PositionSnapshot, Side};
use crate::{ReplayError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

/// Validated order-placement request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub side: Side,
    pub quantity: Decimal,
    /// Zero when unset
    pub take_profit: Decimal,
    /// Zero when unset
    pub stop_loss: Decimal,
}

/// Validated stop-update request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingStopRequest {
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
}

/// Inbound application-level control message
///
/// Only pings need an answer; the private handshake accepts any first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Ping,
    Other,
}

pub trait MarketCodec: Send + Sync {
    fn encode_market_event(&self, candle: &Candle) -> Result<String>;
    fn encode_position_event(&self, snapshot: &PositionSnapshot) -> Result<String>;
    fn decode_order_request(&self, body: &[u8]) -> Result<OrderRequest>;
    fn decode_trading_stop(&self, body: &[u8]) -> Result<TradingStopRequest>;
    fn decode_control(&self, text: &str) -> ControlFrame;
    fn encode_auth_ack(&self) -> Result<String>;
    fn encode_pong(&self) -> Result<String>;
    fn encode_order_ack(&self, order_id: Uuid) -> Result<String>;
    fn encode_trading_stop_ack(&self) -> Result<String>;
}

/// Bybit v5 public kline / private position dialect
#[derive(Debug, Clone)]
pub struct BybitCodec {
    category: String,
    symbol: String,
    interval: KlineInterval,
    conn_id: String,
}

impl BybitCodec {
    pub fn new(category: impl Into<String>, symbol: impl Into<String>, interval: KlineInterval) -> Self {
        Self {
            category: category.into(),
            symbol: symbol.into(),
            interval,
            conn_id: Uuid::new_v4().to_string(),
        }
    }

    fn kline_topic(&self) -> String {
        format!("kline.{}.{}", self.interval, self.symbol)
    }

    fn check_symbol(&self, symbol: Option<&str>) -> Result<()> {
        match symbol {
            Some(s) if !s.is_empty() && s != self.symbol => Err(ReplayError::InvalidOrderRequest(
                format!("symbol '{}' is not replayed (serving '{}')", s, self.symbol),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Serialize)]
struct KlineEvent<'a> {
    topic: String,
    #[serde(rename = "type")]
    kind: &'a str,
    ts: i64,
    data: Vec<KlineData>,
}

#[derive(Debug, Serialize)]
struct KlineData {
    start: i64,
    end: i64,
    interval: String,
    open: Decimal,
    close: Decimal,
    high: Decimal,
    low: Decimal,
    volume: Decimal,
    turnover: Decimal,
    confirm: bool,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionEvent {
    id: String,
    topic: &'static str,
    creation_time: i64,
    data: Vec<PositionData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionData {
    category: String,
    symbol: String,
    side: &'static str,
    size: String,
    entry_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    take_profit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<String>,
    updated_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCreateOrder {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    qty: Option<String>,
    #[serde(default)]
    take_profit: Option<String>,
    #[serde(default)]
    stop_loss: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTradingStop {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    take_profit: Option<String>,
    #[serde(default)]
    stop_loss: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawControl {
    op: String,
}

/// Parse an optional price field; absent or empty means unset
fn optional_price(field: &str, value: Option<&str>) -> Result<Option<Decimal>> {
    let raw = match value.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    let price = Decimal::from_str(raw).map_err(|e| {
        ReplayError::InvalidOrderRequest(format!("{} '{}' is not a decimal: {}", field, raw, e))
    })?;
    if price.is_sign_negative() {
        return Err(ReplayError::InvalidOrderRequest(format!(
            "{} must not be negative",
            field
        )));
    }
    Ok(Some(price))
}

fn fixed(value: Decimal, dp: u32) -> String {
    format!("{:.*}", dp as usize, value.round_dp(dp))
}

impl MarketCodec for BybitCodec {
    fn encode_market_event(&self, candle: &Candle) -> Result<String> {
        let event = KlineEvent {
            topic: self.kline_topic(),
            kind: "snapshot",
            ts: candle.start_time,
            data: vec![KlineData {
                start: candle.start_time,
                end: candle.start_time + self.interval.duration_ms() - 1,
                interval: self.interval.to_string(),
                open: candle.open,
                close: candle.close,
                high: candle.high,
                low: candle.low,
                volume: candle.volume,
                turnover: candle.turnover,
                confirm: true,
                timestamp: candle.start_time,
            }],
        };
        Ok(serde_json::to_string(&event)?)
    }

    fn encode_position_event(&self, snapshot: &PositionSnapshot) -> Result<String> {
        let side = match snapshot.side {
            None => "None",
            Some(Side::Buy) => "Buy",
            Some(Side::Sell) => "Sell",
        };

        let event = PositionEvent {
            id: Uuid::new_v4().to_string(),
            topic: "position",
            creation_time: Utc::now().timestamp_millis(),
            data: vec![PositionData {
                category: self.category.clone(),
                symbol: self.symbol.clone(),
                side,
                size: fixed(snapshot.size, 4),
                entry_price: fixed(snapshot.entry_price, 2),
                take_profit: snapshot.take_profit.map(|p| fixed(p, 4)),
                stop_loss: snapshot.stop_loss.map(|p| fixed(p, 4)),
                updated_time: snapshot.updated_time.timestamp_millis().to_string(),
            }],
        };
        Ok(serde_json::to_string(&event)?)
    }

    fn decode_order_request(&self, body: &[u8]) -> Result<OrderRequest> {
        let raw: RawCreateOrder = serde_json::from_slice(body)
            .map_err(|e| ReplayError::InvalidOrderRequest(e.to_string()))?;

        self.check_symbol(raw.symbol.as_deref())?;

        if let Some(order_type) = raw.order_type.as_deref() {
            if !order_type.eq_ignore_ascii_case("market") {
                return Err(ReplayError::InvalidOrderRequest(format!(
                    "order type '{}' not supported, only Market",
                    order_type
                )));
            }
        }

        let side = raw
            .side
            .as_deref()
            .ok_or_else(|| ReplayError::InvalidOrderRequest("missing side".into()))?
            .parse::<Side>()
            .map_err(ReplayError::InvalidOrderRequest)?;

        let qty_raw = raw
            .qty
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| ReplayError::InvalidOrderRequest("missing qty".into()))?;
        let quantity = Decimal::from_str(qty_raw).map_err(|e| {
            ReplayError::InvalidOrderRequest(format!("qty '{}' is not a decimal: {}", qty_raw, e))
        })?;
        if quantity <= Decimal::ZERO {
            return Err(ReplayError::InvalidOrderRequest(format!(
                "qty must be positive, got {}",
                quantity
            )));
        }

        Ok(OrderRequest {
            side,
            quantity,
            take_profit: optional_price("takeProfit", raw.take_profit.as_deref())?
                .unwrap_or_default(),
            stop_loss: optional_price("stopLoss", raw.stop_loss.as_deref())?.unwrap_or_default(),
        })
    }

    fn decode_trading_stop(&self, body: &[u8]) -> Result<TradingStopRequest> {
        let raw: RawTradingStop = serde_json::from_slice(body)
            .map_err(|e| ReplayError::InvalidOrderRequest(e.to_string()))?;

        self.check_symbol(raw.symbol.as_deref())?;

        Ok(TradingStopRequest {
            take_profit: optional_price("takeProfit", raw.take_profit.as_deref())?,
            stop_loss: optional_price("stopLoss", raw.stop_loss.as_deref())?,
        })
    }

    fn decode_control(&self, text: &str) -> ControlFrame {
        match serde_json::from_str::<RawControl>(text) {
            Ok(control) if control.op == "ping" => ControlFrame::Ping,
            _ => ControlFrame::Other,
        }
    }

    fn encode_auth_ack(&self) -> Result<String> {
        Ok(serde_json::to_string(&json!({
            "success": true,
            "ret_msg": "",
            "op": "auth",
            "conn_id": self.conn_id,
        }))?)
    }

    fn encode_pong(&self) -> Result<String> {
        Ok(serde_json::to_string(&json!({
            "success": true,
            "ret_msg": "pong",
            "conn_id": self.conn_id,
            "op": "ping",
        }))?)
    }

    fn encode_order_ack(&self, order_id: Uuid) -> Result<String> {
        Ok(serde_json::to_string(&json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": { "orderId": order_id.to_string(), "orderLinkId": "" },
            "retExtInfo": {},
            "time": Utc::now().timestamp_millis(),
        }))?)
    }

    fn encode_trading_stop_ack(&self) -> Result<String> {
        Ok(serde_json::to_string(&json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {},
            "retExtInfo": {},
            "time": Utc::now().timestamp_millis(),
        }))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::Value;

    fn codec() -> BybitCodec {
        BybitCodec::new("linear", "BTCUSDT", KlineInterval::Minutes(1))
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_market_event_shape() {
        let candle = Candle {
            start_time: 1_700_000_040_000,
            open: dec!(37000.5),
            high: dec!(37010),
            low: dec!(36990),
            close: dec!(37005.1),
            volume: dec!(12.5),
            turnover: dec!(462500),
        };

        let json = parse(&codec().encode_market_event(&candle).unwrap());

        assert_eq!(json["topic"], "kline.1.BTCUSDT");
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["ts"], 1_700_000_040_000i64);
        let data = &json["data"][0];
        assert_eq!(data["start"], 1_700_000_040_000i64);
        assert_eq!(data["end"], 1_700_000_099_999i64);
        assert_eq!(data["open"], "37000.5");
        assert_eq!(data["close"], "37005.1");
        assert_eq!(data["confirm"], true);
    }

    #[test]
    fn test_position_event_open() {
        let snapshot = PositionSnapshot {
            side: Some(Side::Buy),
            entry_price: dec!(100),
            size: dec!(0.5),
            take_profit: Some(dec!(110)),
            stop_loss: None,
            updated_time: Utc::now(),
        };

        let json = parse(&codec().encode_position_event(&snapshot).unwrap());
        let data = &json["data"][0];

        assert_eq!(json["topic"], "position");
        assert_eq!(data["side"], "Buy");
        assert_eq!(data["entryPrice"], "100.00");
        assert_eq!(data["size"], "0.5000");
        assert_eq!(data["takeProfit"], "110.0000");
        assert!(data.get("stopLoss").is_none());
    }

    #[test]
    fn test_position_event_flat() {
        let snapshot = PositionSnapshot {
            side: None,
            entry_price: Decimal::ZERO,
            size: Decimal::ZERO,
            take_profit: None,
            stop_loss: None,
            updated_time: Utc::now(),
        };

        let json = parse(&codec().encode_position_event(&snapshot).unwrap());
        assert_eq!(json["data"][0]["side"], "None");
    }

    #[test]
    fn test_decode_order_request() {
        let body = br#"{"category":"linear","symbol":"BTCUSDT","side":"Sell","orderType":"Market","qty":"0.01","takeProfit":"90","stopLoss":""}"#;
        let request = codec().decode_order_request(body).unwrap();

        assert_eq!(
            request,
            OrderRequest {
                side: Side::Sell,
                quantity: dec!(0.01),
                take_profit: dec!(90),
                stop_loss: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn test_decode_order_request_rejects_malformed() {
        let codec = codec();
        let bad: [&[u8]; 8] = [
            b"not json",
            br#"{"qty":"1"}"#,
            br#"{"side":"Buy"}"#,
            br#"{"side":"Hold","qty":"1"}"#,
            br#"{"side":"Buy","qty":"abc"}"#,
            br#"{"side":"Buy","qty":"0"}"#,
            br#"{"side":"Buy","qty":"1","orderType":"Limit"}"#,
            br#"{"side":"Buy","qty":"1","symbol":"ETHUSDT"}"#,
        ];

        for body in bad {
            let result = codec.decode_order_request(body);
            assert!(
                matches!(result, Err(ReplayError::InvalidOrderRequest(_))),
                "accepted {}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_decode_trading_stop() {
        let codec = codec();
        let request = codec
            .decode_trading_stop(br#"{"symbol":"BTCUSDT","takeProfit":"120"}"#)
            .unwrap();
        assert_eq!(request.take_profit, Some(dec!(120)));
        assert_eq!(request.stop_loss, None);

        assert!(codec
            .decode_trading_stop(br#"{"stopLoss":"-1"}"#)
            .is_err());
    }

    #[test]
    fn test_decode_control() {
        let codec = codec();
        assert_eq!(codec.decode_control(r#"{"op":"ping"}"#), ControlFrame::Ping);
        assert_eq!(codec.decode_control(r#"{"op":"auth","args":[]}"#), ControlFrame::Other);
        assert_eq!(codec.decode_control("hello"), ControlFrame::Other);
    }

    #[test]
    fn test_acks() {
        let codec = codec();
        let id = Uuid::new_v4();

        let ack = parse(&codec.encode_order_ack(id).unwrap());
        assert_eq!(ack["retCode"], 0);
        assert_eq!(ack["result"]["orderId"], id.to_string());

        let pong = parse(&codec.encode_pong().unwrap());
        assert_eq!(pong["ret_msg"], "pong");

        let auth = parse(&codec.encode_auth_ack().unwrap());
        assert_eq!(auth["success"], true);
    }
}
