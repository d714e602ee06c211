//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, StreamExt};
use std::fmt::Display;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::combatant::CombatantId;
use crate::game::CoordinatorHandle;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, Envelope, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    match state.coordinator() {
        Ok(handle) => {
            let handle = handle.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, handle))
        }
        Err(e) => {
            error!(error = %e, "Refusing WebSocket upgrade");
            (StatusCode::SERVICE_UNAVAILABLE, "Match not running").into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, handle: CoordinatorHandle) {
    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before joining so the private roster is not missed
    let outbound_rx = handle.subscribe();

    let combatant_id = match handle.join().await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Failed to join match");
            return;
        }
    };

    info!(combatant_id = %combatant_id, "New WebSocket connection");

    let welcome = ServerMsg::Welcome {
        combatant_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(combatant_id = %combatant_id, error = %e, "Failed to send welcome");
        let _ = handle.leave(combatant_id).await;
        return;
    }

    run_session(combatant_id, &handle, ws_sink, ws_stream, outbound_rx).await;

    // Cleanup on disconnect
    if let Err(e) = handle.leave(combatant_id).await {
        debug!(combatant_id = %combatant_id, error = %e, "Leave after coordinator stopped");
    }

    info!(combatant_id = %combatant_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    combatant_id: CombatantId,
    handle: &CoordinatorHandle,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound_rx: broadcast::Receiver<Envelope>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: coordinator broadcasts -> WebSocket
    let writer_coordinator = handle.clone();
    let writer_handle = tokio::spawn(async move {
        forward_outbound(
            combatant_id,
            &mut ws_sink,
            &mut outbound_rx,
            &writer_coordinator,
        )
        .await;
    });

    // Reader loop: WebSocket -> coordinator
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(combatant_id = %combatant_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        if handle.submit(combatant_id, client_msg).await.is_err() {
                            debug!(combatant_id = %combatant_id, "Coordinator stopped");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(combatant_id = %combatant_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(combatant_id = %combatant_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(combatant_id = %combatant_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(combatant_id = %combatant_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Forward outbound envelopes addressed to `combatant_id` until the channel
/// closes, a send fails, or the client has been sent to the lobby.
///
/// Messages are deltas, so a lagged receiver asks the coordinator for a full
/// `StateSync`; it arrives behind everything already queued.
async fn forward_outbound<S>(
    combatant_id: CombatantId,
    sink: &mut S,
    outbound_rx: &mut broadcast::Receiver<Envelope>,
    handle: &CoordinatorHandle,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        match outbound_rx.recv().await {
            Ok(envelope) => {
                if !envelope.is_for(combatant_id) {
                    continue;
                }
                let lobby = matches!(envelope.msg, ServerMsg::ReturnToLobby { .. });
                if let Err(e) = send_msg(sink, &envelope.msg).await {
                    debug!(combatant_id = %combatant_id, error = %e, "WebSocket send failed");
                    break;
                }
                if lobby {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(
                    combatant_id = %combatant_id,
                    lagged_count = n,
                    "Client lagged, requesting state sync"
                );
                if handle.resync(combatant_id).await.is_err() {
                    debug!(combatant_id = %combatant_id, "Coordinator stopped");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(combatant_id = %combatant_id, "Outbound channel closed");
                break;
            }
        }
    }
}

/// Send a message over WebSocket
async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchSettings;
    use crate::game::events::{EventBus, StateEvent};
    use crate::game::r#match::OUTBOUND_CAPACITY;
    use crate::game::{CoordinatorEvent, MatchCoordinator};
    use futures::channel::mpsc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn decode(frame: &Message) -> Option<ServerMsg> {
        match frame {
            Message::Text(text) => serde_json::from_str(text).ok(),
            _ => None,
        }
    }

    async fn frames(mut rx: mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.next().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn writer_skips_other_combatants_and_closes_after_lobby() {
        let bus = Arc::new(EventBus::new());
        let (mut coordinator, handle, _events_rx) =
            MatchCoordinator::new(Uuid::new_v4(), MatchSettings::default(), bus.clone());
        let me = coordinator.handle_join();
        let other = coordinator.handle_join();
        let mut outbound_rx = handle.subscribe();

        coordinator.handle_client_msg(other, ClientMsg::Ping { t: 1 });
        coordinator.handle_client_msg(me, ClientMsg::Ping { t: 2 });
        bus.publish(&StateEvent::ReturnToLobby {
            destination: "lobby".to_string(),
        });
        // Nothing after the handoff reaches the socket
        bus.publish(&StateEvent::RoundStarted { round: 9 });

        let (mut sink, sink_rx) = mpsc::unbounded();
        forward_outbound(me, &mut sink, &mut outbound_rx, &handle).await;
        drop(sink);

        let frames = frames(sink_rx).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(decode(&frames[0]), Some(ServerMsg::Pong { t: 2 }));
        assert_eq!(
            decode(&frames[1]),
            Some(ServerMsg::ReturnToLobby {
                destination: "lobby".to_string()
            })
        );
        assert!(matches!(frames[2], Message::Close(None)));
    }

    #[tokio::test]
    async fn lagging_writer_requests_state_sync() {
        let bus = Arc::new(EventBus::new());
        let (mut coordinator, handle, mut events_rx) =
            MatchCoordinator::new(Uuid::new_v4(), MatchSettings::default(), bus.clone());
        let me = coordinator.handle_join();
        let mut outbound_rx = handle.subscribe();

        for round in 0..(OUTBOUND_CAPACITY as u32 + 8) {
            bus.publish(&StateEvent::RoundStarted { round });
        }
        bus.publish(&StateEvent::ReturnToLobby {
            destination: "lobby".to_string(),
        });

        let (mut sink, sink_rx) = mpsc::unbounded();
        forward_outbound(me, &mut sink, &mut outbound_rx, &handle).await;
        drop(sink);

        let frames = frames(sink_rx).await;
        assert!(frames.len() <= OUTBOUND_CAPACITY + 1);
        assert!(matches!(frames.last(), Some(Message::Close(None))));

        let request = events_rx.try_recv().unwrap();
        assert!(matches!(
            request,
            CoordinatorEvent::Resync { combatant_id } if combatant_id == me
        ));

        let mut sync_rx = handle.subscribe();
        coordinator.handle_event(request);
        let envelope = sync_rx.try_recv().unwrap();
        assert!(envelope.is_for(me));
        assert!(matches!(envelope.msg, ServerMsg::StateSync { ref combatants, .. } if combatants.len() == 1));
    }
}
