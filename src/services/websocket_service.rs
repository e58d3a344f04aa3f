use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::ViewerControlMessage,
    services::relay_service,
    state::{RoomHandle, ViewerConnection},
};

/// Handle the full lifecycle of one viewer WebSocket attached to `room`.
pub async fn handle_socket(room: RoomHandle, socket: WebSocket, buffer: usize) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut outbound_rx) = ViewerConnection::new(buffer);
    let viewer_id = connection.id;
    let evicted = connection.evicted.clone();
    // Control replies (pongs, close) go through their own channel so a full relay buffer
    // never delays them.
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps relayed events flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(message) = control_rx.recv() => message,
                Some(message) = outbound_rx.recv() => message,
                else => break,
            };
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    if !relay_service::subscribe(&room, connection).await {
        finalize(writer_task, control_tx).await;
        return;
    }

    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = evicted.notified() => {
                info!(room = %room.key(), viewer = %viewer_id, "closing evicted viewer");
                let _ = control_tx.send(Message::Close(None));
                break;
            }
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ViewerControlMessage>(&text) {
                    Ok(control) => {
                        debug!(viewer = %viewer_id, message = ?control, "ignoring reserved control message")
                    }
                    Err(err) => {
                        debug!(viewer = %viewer_id, error = %err, "ignoring unparseable viewer message")
                    }
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = control_tx.send(Message::Pong(payload));
            }
            Some(Ok(Message::Close(frame))) => {
                info!(room = %room.key(), viewer = %viewer_id, "viewer closed");
                let _ = control_tx.send(Message::Close(frame));
                break;
            }
            Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Err(err)) => {
                warn!(viewer = %viewer_id, error = %err, "websocket error");
                break;
            }
            None => break,
        }
    }

    relay_service::unsubscribe(&room, &viewer_id);
    finalize(writer_task, control_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, control_tx: mpsc::UnboundedSender<Message>) {
    drop(control_tx);
    let _ = writer_task.await;
}
