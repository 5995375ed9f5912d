// =============================================================================
// WebSocket streaming transport — StreamPrices
// =============================================================================
//
// Not wrapped by ResilienceGate: streaming bypasses the rate limiter and
// circuit breaker by design (an open connection is not a retryable request).
// Each client gets its own StreamFanout subscriber; the write loop below
// drains that subscriber's outbound queue until the socket closes.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::types::Ric;
use crate::upstream::UpstreamFeed;

#[derive(Deserialize)]
pub struct StreamQuery {
    ric: String,
}

pub async fn stream_handler<F: UpstreamFeed + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<F>>>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.ric))
}

async fn handle_socket<F: UpstreamFeed + 'static>(
    mut socket: WebSocket,
    state: Arc<AppState<F>>,
    ric_csv: String,
) {
    let rics: Vec<Ric> = ric_csv
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| Ric::new(s).ok())
        .collect();

    if rics.is_empty() {
        let _ = socket
            .send(Message::Text("{\"error\":\"no valid ric supplied\"}".into()))
            .await;
        return;
    }

    let (subscriber, mut rx) = state.fanout.register(rics);
    info!(subscriber = %subscriber.id(), "stream subscriber connected");

    loop {
        tokio::select! {
            quote = rx.recv() => {
                match quote {
                    Some(quote) => {
                        let payload = match serde_json::to_string(&quote) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.fanout.unregister(subscriber.id());
    debug!(subscriber = %subscriber.id(), "stream subscriber disconnected");
}
