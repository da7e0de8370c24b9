use futures::{SinkExt, StreamExt};
use marketreplay::api::InMemorySource;
use marketreplay::config::PathsConfig;
use marketreplay::ledger::MemorySink;
use marketreplay::replay::ReplaySettings;
use marketreplay::session::{SessionFactory, SessionManager};
use marketreplay::transport::codec::{
    BybitCodec, ControlFrame, MarketCodec, OrderRequest, TradingStopRequest,
};
use marketreplay::transport::{router, AppState};
use marketreplay::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const T0: i64 = 1_700_000_000_000;
const WAIT: Duration = Duration::from_secs(5);

fn candles(count: i64) -> Vec<Candle> {
    (0..count)
        .map(|i| Candle {
            start_time: T0 + i * 60_000,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(1),
            turnover: dec!(100),
        })
        .collect()
}

fn manager(sink: Arc<MemorySink>) -> Arc<SessionManager> {
    let factory = SessionFactory::new(
        Arc::new(InMemorySource::new(candles(500), 50)),
        sink,
        (T0, T0 + 500 * 60_000),
        Decimal::ZERO,
    );
    Arc::new(SessionManager::new(factory))
}

async fn spawn_server(sessions: Arc<SessionManager>, codec: Arc<dyn MarketCodec>) -> SocketAddr {
    let state = AppState {
        sessions,
        codec,
        replay: ReplaySettings {
            tick_interval: Duration::from_millis(20),
            emit_latency: Duration::ZERO,
        },
        shutdown: CancellationToken::new(),
        exit_on_exhaustion: false,
    };
    let app = router(state, &PathsConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

async fn connect(address: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{}{}", address, path))
        .await
        .unwrap();
    client
}

/// Next text frame as JSON, skipping transport-level frames
async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("channel closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// True once the server has closed the channel
async fn closed_by_server(client: &mut Client) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => {}
        }
    }
}

#[tokio::test]
async fn test_market_and_private_channels() {
    let sink = Arc::new(MemorySink::new());
    let sessions = manager(sink.clone());
    let codec = Arc::new(BybitCodec::new("linear", "BTCUSDT", KlineInterval::Minutes(1)));
    let address = spawn_server(sessions.clone(), codec).await;

    // Private channel stays silent until the handshake
    let mut private = connect(address, "/v5/private").await;
    let early = tokio::time::timeout(Duration::from_millis(150), private.next()).await;
    assert!(early.is_err());

    private
        .send(Message::Text(r#"{"op":"auth","args":["key",1,"sig"]}"#.into()))
        .await
        .unwrap();
    let ack = next_json(&mut private).await;
    assert_eq!(ack["op"], "auth");
    assert_eq!(ack["success"], true);

    let mut market = connect(address, "/v5/public/linear").await;
    let first = next_json(&mut market).await;
    assert_eq!(first["topic"], "kline.1.BTCUSDT");
    assert_eq!(first["data"][0]["start"], T0);

    market
        .send(Message::Text(r#"{"op":"ping"}"#.into()))
        .await
        .unwrap();
    let mut klines = 1;
    loop {
        let frame = next_json(&mut market).await;
        if frame["op"] == "ping" {
            assert_eq!(frame["ret_msg"], "pong");
            break;
        }
        assert_eq!(frame["topic"], "kline.1.BTCUSDT");
        klines += 1;
    }
    assert!(klines >= 1);

    let response = reqwest::Client::new()
        .post(format!("http://{}/v5/order/create", address))
        .body(r#"{"category":"linear","symbol":"BTCUSDT","side":"Buy","orderType":"Market","qty":"1"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let position = next_json(&mut private).await;
    assert_eq!(position["topic"], "position");
    assert_eq!(position["data"][0]["side"], "Buy");
    assert_eq!(position["data"][0]["size"], "1.0000");

    // Closing the market channel ends the session and the private channel with it
    market.close(None).await.unwrap();
    assert!(closed_by_server(&mut private).await);

    let deadline = tokio::time::Instant::now() + WAIT;
    while sink.records().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].side, Side::Buy);
    assert!(sessions.active().is_none());
}

/// Delegates to the Bybit codec but cannot encode the handshake ack
struct BrokenAckCodec(BybitCodec);

impl MarketCodec for BrokenAckCodec {
    fn encode_market_event(&self, candle: &Candle) -> marketreplay::Result<String> {
        self.0.encode_market_event(candle)
    }
    fn encode_position_event(&self, snapshot: &PositionSnapshot) -> marketreplay::Result<String> {
        self.0.encode_position_event(snapshot)
    }
    fn decode_order_request(&self, body: &[u8]) -> marketreplay::Result<OrderRequest> {
        self.0.decode_order_request(body)
    }
    fn decode_trading_stop(&self, body: &[u8]) -> marketreplay::Result<TradingStopRequest> {
        self.0.decode_trading_stop(body)
    }
    fn decode_control(&self, text: &str) -> ControlFrame {
        self.0.decode_control(text)
    }
    fn encode_auth_ack(&self) -> marketreplay::Result<String> {
        let err = serde_json::from_str::<Value>("not json").unwrap_err();
        Err(ReplayError::EncodeFailure(err))
    }
    fn encode_pong(&self) -> marketreplay::Result<String> {
        self.0.encode_pong()
    }
    fn encode_order_ack(&self, order_id: Uuid) -> marketreplay::Result<String> {
        self.0.encode_order_ack(order_id)
    }
    fn encode_trading_stop_ack(&self) -> marketreplay::Result<String> {
        self.0.encode_trading_stop_ack()
    }
}

#[tokio::test]
async fn test_failed_handshake_ack_terminates_session() {
    let sessions = manager(Arc::new(MemorySink::new()));
    let codec = Arc::new(BrokenAckCodec(BybitCodec::new(
        "linear",
        "BTCUSDT",
        KlineInterval::Minutes(1),
    )));
    let address = spawn_server(sessions.clone(), codec).await;

    let mut private = connect(address, "/v5/private").await;
    private
        .send(Message::Text(r#"{"op":"auth"}"#.into()))
        .await
        .unwrap();

    assert!(closed_by_server(&mut private).await);
    assert!(sessions.active().is_none());
}
