//! Push channel. A client connects, then drives its single subscription
//! with `{"action":"subscribe",...}` / `{"action":"unsubscribe"}` text
//! frames; the server pushes `candle:update`, `prediction:update`,
//! `training:progress` and `subscribed` events. Subscriptions die with
//! the connection; there is no replay buffer.

use crate::application::system::Application;
use crate::domain::market::Timeframe;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe {
        symbol: String,
        timeframe: Timeframe,
    },
    Unsubscribe,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<Arc<Application>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, app))
}

async fn handle_connection(socket: WebSocket, app: Arc<Application>) {
    let (client_id, mut events) = app.hub.register().await;
    info!("ws client {} connected", client_id);

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            // Hub events: a closed queue means the hub dropped us as a
            // slow consumer; close the socket and let the client
            // reconnect.
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("ws client {}: serialize failed: {}", client_id, e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { symbol, timeframe }) => {
                                app.hub.subscribe(client_id, &symbol, timeframe).await;
                            }
                            Ok(ClientMessage::Unsubscribe) => {
                                app.hub.unsubscribe(client_id).await;
                            }
                            Err(e) => {
                                debug!("ws client {}: ignoring frame: {}", client_id, e);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("ws client {} read error: {}", client_id, e);
                        break;
                    }
                }
            }
        }
    }

    app.hub.unregister(client_id).await;
    info!("ws client {} disconnected", client_id);
}
