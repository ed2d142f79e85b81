//! WebSocket push delivery of the live feed

use crate::api::AppState;
use crate::stream::feed::FeedSubscription;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tracing::{debug, info, warn};

/// Close code for "internal error" (RFC 6455)
const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub async fn transactions(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    match state.feed() {
        Ok(feed) => {
            let subscription = feed.subscribe();
            ws.on_upgrade(move |socket| deliver(socket, subscription))
        }
        Err(e) => {
            warn!(error = %e, "Rejecting push subscriber, feed not ready");
            let reason = e.to_string();
            ws.on_upgrade(move |mut socket| async move {
                let frame = CloseFrame {
                    code: CLOSE_INTERNAL_ERROR,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            })
        }
    }
}

/// Forward feed items until either side goes away
async fn deliver(mut socket: WebSocket, mut subscription: FeedSubscription) {
    info!("Push subscriber connected");

    loop {
        tokio::select! {
            item = subscription.next() => {
                let Some(item) = item else {
                    debug!("Feed closed, ending push delivery");
                    break;
                };
                let text = match serde_json::to_string(&item) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(id = item.id, error = %e, "Failed to encode stream item");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound messages are ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("Push subscriber disconnected");
}
