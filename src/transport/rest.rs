use super::AppState;
use crate::ReplayError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

impl IntoResponse for ReplayError {
    fn into_response(self) -> Response {
        let status = match &self {
            ReplayError::InvalidOrderRequest(_) => StatusCode::BAD_REQUEST,
            ReplayError::OrderRejected(_) | ReplayError::FeedExhausted => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn json_body(text: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], text).into_response()
}

/// Place a market order on the active session
pub async fn create_order(State(state): State<AppState>, body: Bytes) -> Result<Response, ReplayError> {
    let request = state.codec.decode_order_request(&body).map_err(|e| {
        warn!("Rejected order request: {}", e);
        e
    })?;

    let session = state
        .sessions
        .active()
        .ok_or_else(|| ReplayError::OrderRejected("no replay session is running".into()))?;

    let order_id = session.place_order(&request).map_err(|e| {
        warn!(session = %session.id(), side = %request.side, qty = %request.quantity, "Order not executed: {}", e);
        e
    })?;

    info!(
        session = %session.id(),
        %order_id,
        side = %request.side,
        qty = %request.quantity,
        take_profit = %request.take_profit,
        stop_loss = %request.stop_loss,
        "Order executed"
    );

    Ok(json_body(state.codec.encode_order_ack(order_id)?))
}

/// Acknowledge a stop update; thresholds are only set at entry
pub async fn set_trading_stop(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ReplayError> {
    let request = state.codec.decode_trading_stop(&body)?;

    info!(
        take_profit = ?request.take_profit,
        stop_loss = ?request.stop_loss,
        "Trading stop update acknowledged"
    );

    Ok(json_body(state.codec.encode_trading_stop_ack()?))
}
