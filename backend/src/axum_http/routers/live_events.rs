use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use booking_core::realtime::connection_registry::ConnectionRegistry;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{auth::AuthUser, axum_http::app_state::AppState};

pub fn routes(state: AppState) -> Router {
    Router::new().route("/", get(live)).with_state(state)
}

pub async fn live(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    auth: AuthUser,
) -> impl IntoResponse {
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_socket(socket, registry, auth.user_id))
}

/// Pushes booking events to one socket until either side closes. The
/// registry entry lives exactly as long as the socket.
async fn handle_socket(socket: WebSocket, registry: Arc<ConnectionRegistry>, user_id: Uuid) {
    let (connection_id, mut events) = registry.add(user_id);
    info!(%user_id, "live_events: connection opened");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if sender.send(Message::Text(event)).await.is_err() {
                break;
            }
        }
    });

    // Clients only listen; anything they send besides close is ignored.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            debug!(%user_id, "live_events: send side finished");
            recv_task.abort();
        },
        _ = (&mut recv_task) => {
            debug!(%user_id, "live_events: client went away");
            send_task.abort();
        },
    }

    registry.remove(user_id, connection_id);
    info!(%user_id, "live_events: connection closed");
}
