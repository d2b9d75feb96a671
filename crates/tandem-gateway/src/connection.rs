use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_exchange::{ExchangeError, ExchangeService};
use tandem_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a WebSocket whose JWT was already validated at the HTTP upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    service: Arc<ExchangeService>,
    user_id: Uuid,
) {
    let (mut sender, mut receiver) = socket.split();
    info!("{} connected to gateway", user_id);

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        return;
    }

    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;
    // Replies to this connection's own commands.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = user_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                event = reply_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        let reply = handle_command(&service, user_id, cmd).await;
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            preview(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("{} disconnected from gateway", user_id);
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

/// Run one client command against the exchange service. The reply is the
/// caller's view of the exchange, or the reason the command was refused.
pub async fn handle_command(
    service: &ExchangeService,
    user_id: Uuid,
    cmd: GatewayCommand,
) -> GatewayEvent {
    let result = match cmd {
        GatewayCommand::RequestSelfie { receiver_id } => service.create(user_id, receiver_id).await,
        GatewayCommand::AcceptSelfie { exchange_id } => service.accept(exchange_id, user_id).await,
        GatewayCommand::SubmitSelfie {
            exchange_id,
            object_key,
            content_hash,
        } => {
            service
                .submit(exchange_id, user_id, &object_key, &content_hash)
                .await
        }
        GatewayCommand::CancelSelfie { exchange_id } => {
            match service.cancel(exchange_id, user_id).await {
                Ok(()) => service.view(exchange_id, user_id).await,
                Err(e) => Err(e),
            }
        }
    };

    match result {
        Ok(view) => GatewayEvent::ExchangeState(view),
        Err(e) => {
            if let ExchangeError::Storage(ref inner) = e {
                warn!("Command from {} failed: {}", user_id, inner);
            }
            GatewayEvent::CommandRejected {
                reason: e.to_string(),
            }
        }
    }
}

/// At most the first 200 characters of a raw frame, for logs.
fn preview(text: &str) -> &str {
    text.char_indices().nth(200).map_or(text, |(i, _)| &text[..i])
}
