//! Client-facing surface: websocket channels and REST entry points.

pub mod codec;
pub mod rest;
pub mod ws;

use crate::config::PathsConfig;
use crate::replay::ReplaySettings;
use crate::session::SessionManager;
use axum::routing::{get, post};
use axum::Router;
use codec::MarketCodec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub codec: Arc<dyn MarketCodec>,
    pub replay: ReplaySettings,
    /// Cancelled by a kline handler when the process should stop
    pub shutdown: CancellationToken,
    pub exit_on_exhaustion: bool,
}

pub fn router(state: AppState, paths: &PathsConfig) -> Router {
    Router::new()
        .route(&paths.kline_ws, get(ws::kline_handler))
        .route(&paths.private_ws, get(ws::private_handler))
        .route(&paths.create_order, post(rest::create_order))
        .route(&paths.set_trading_stop, post(rest::set_trading_stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
