// handlers.rs
//
// WebSocket endpoints. The path selects the connection's role (and, for
// devices, its class) at upgrade time; the role is immutable afterwards.
// Each connection runs a send task draining its hub queue and a receive
// task feeding the hub, torn down together.

use axum::extract::{
    State, WebSocketUpgrade,
    ws::{Message, WebSocket},
};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::hub::DevicePush;
use crate::messages::{ControllerMessage, DeviceMessage, HubToDevice};
use crate::models::{AppState, DeviceClass};

pub async fn shutters_device_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("shutters device connection attempt");
    ws.on_upgrade(move |socket| handle_device(socket, state, DeviceClass::Shutters))
}

pub async fn irrigation_device_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("irrigation device connection attempt");
    ws.on_upgrade(move |socket| handle_device(socket, state, DeviceClass::Irrigation))
}

pub async fn robots_device_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("robot bridge connection attempt");
    ws.on_upgrade(move |socket| handle_device(socket, state, DeviceClass::Robots))
}

pub async fn controller_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("controller connection attempt");
    ws.on_upgrade(move |socket| handle_controller(socket, state))
}

async fn handle_device(socket: WebSocket, state: AppState, class: DeviceClass) {
    let (mut sender, mut receiver) = socket.split();

    // The very first message must be AUTH. Anything else, or a bad secret,
    // is fatal to this connection; a fresh connection is required to retry.
    let Some(Ok(first)) = receiver.next().await else {
        return;
    };
    let secret = match first
        .to_text()
        .ok()
        .and_then(|text| serde_json::from_str::<DeviceMessage>(text).ok())
    {
        Some(DeviceMessage::Auth { secret }) => secret,
        _ => {
            warn!(%class, "first device message was not auth, closing");
            let _ = send_json(&mut sender, &HubToDevice::AuthRejected).await;
            return;
        }
    };

    let (id, mut push_rx) = match state.hub.connect_device(class, &secret) {
        Ok(pair) => pair,
        Err(_) => {
            let _ = send_json(&mut sender, &HubToDevice::AuthRejected).await;
            return;
        }
    };

    let send_task = tokio::spawn(async move {
        while let Some(push) = push_rx.recv().await {
            match push {
                DevicePush::Message(msg) => {
                    if send_json(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
                DevicePush::Close => {
                    let _ = sender.close().await;
                    break;
                }
            }
        }
    });

    let hub = Arc::clone(&state.hub);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Ok(text) = msg.to_text() else { continue };
            match serde_json::from_str::<DeviceMessage>(text) {
                Ok(parsed) => hub.handle_device_message(class, id, parsed),
                Err(err) => {
                    // Post-auth: discard the one message, keep the
                    // connection.
                    warn!(%class, %id, error = %err, "malformed device message dropped");
                    crate::metrics::message_dropped();
                }
            }
        }
    });

    tokio::pin!(send_task, recv_task);
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    state.hub.device_closed(class, id);
}

async fn handle_controller(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut push_rx) = state.hub.add_controller();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = push_rx.recv().await {
            if send_json(&mut sender, &msg).await.is_err() {
                break;
            }
        }
    });

    let hub = Arc::clone(&state.hub);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Ok(text) = msg.to_text() else { continue };
            match serde_json::from_str::<ControllerMessage>(text) {
                Ok(parsed) => hub.handle_controller_message(id, parsed),
                Err(err) => {
                    debug!(%id, error = %err, "malformed controller message dropped");
                    crate::metrics::message_dropped();
                }
            }
        }
    });

    tokio::pin!(send_task, recv_task);
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    state.hub.remove_controller(id);
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}
