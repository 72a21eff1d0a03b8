use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use kindred_types::events::topic_user;
use kindred_types::stomp::{Command, Frame, HEARTBEAT, HEARTBEAT_GRACE, HeartBeat, STOMP_VERSION};

use crate::push::{Outbound, PushHub};

/// Heart-beat the server offers: send and expect every second.
const SERVER_HEARTBEAT: Duration = Duration::from_millis(1000);

/// Time a client gets to send CONNECT after the upgrade.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocket, Message>;

/// Serve one STOMP session over an upgraded socket.
///
/// Clients may only subscribe to `/topic/{userId}` destinations; SEND is not
/// part of this endpoint.
pub async fn handle_socket(socket: WebSocket, hub: PushHub) {
    let session_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let connect = match tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connect(&mut receiver)).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!("Session {} closed before CONNECT", session_id);
            return;
        }
        Err(_) => {
            warn!("Session {} sent no CONNECT within {}s", session_id, CONNECT_TIMEOUT.as_secs());
            return;
        }
    };

    let ours = HeartBeat::new(SERVER_HEARTBEAT, SERVER_HEARTBEAT);
    let theirs = HeartBeat::parse(connect.get("heart-beat").unwrap_or("0,0"));
    let (send_every, expect_every) = ours.negotiate(&theirs);

    let connected = Frame::new(Command::Connected)
        .header("version", STOMP_VERSION)
        .header("heart-beat", ours.to_string())
        .header("session", session_id.to_string());
    if send_text(&mut sender, connected.encode()).await.is_err() {
        return;
    }
    info!("STOMP session {} connected", session_id);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let mut heartbeat = (!send_every.is_zero()).then(|| {
        let mut interval = tokio::time::interval_at(Instant::now() + send_every, send_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let stale_after = expect_every * HEARTBEAT_GRACE;
    let mut last_received = Instant::now();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        last_received = Instant::now();
                        continue;
                    }
                    Some(Err(e)) => {
                        debug!("Session {} read error: {}", session_id, e);
                        break;
                    }
                };
                last_received = Instant::now();

                let frame = match Frame::decode(text.as_str()) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        trace!("Heart-beat from session {}", session_id);
                        continue;
                    }
                    Err(e) => {
                        send_error(&mut sender, &format!("malformed frame: {}", e)).await;
                        break;
                    }
                };

                match frame.command {
                    Command::Subscribe => {
                        let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) else {
                            send_error(&mut sender, "SUBSCRIBE requires id and destination").await;
                            break;
                        };
                        if topic_user(destination).is_none() {
                            send_error(&mut sender, &format!("unknown destination {}", destination)).await;
                            break;
                        }
                        hub.subscribe(session_id, id.to_string(), destination.to_string(), out_tx.clone()).await;
                        send_receipt(&mut sender, &frame).await;
                    }
                    Command::Unsubscribe => {
                        if let Some(id) = frame.get("id") {
                            hub.unsubscribe(session_id, id).await;
                        }
                        send_receipt(&mut sender, &frame).await;
                    }
                    Command::Disconnect => {
                        send_receipt(&mut sender, &frame).await;
                        debug!("Session {} sent DISCONNECT", session_id);
                        break;
                    }
                    other => {
                        send_error(&mut sender, &format!("{} is not supported", other)).await;
                        break;
                    }
                }
            }

            Some(out) = out_rx.recv() => {
                let frame = Frame::new(Command::Message)
                    .header("subscription", out.subscription)
                    .header("message-id", Uuid::new_v4().to_string())
                    .header("destination", out.destination)
                    .header("content-type", "application/json")
                    .body(out.body);
                if send_text(&mut sender, frame.encode()).await.is_err() {
                    break;
                }
            }

            _ = async {
                match heartbeat.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if send_text(&mut sender, HEARTBEAT.to_string()).await.is_err() {
                    break;
                }
            }

            _ = tokio::time::sleep_until(last_received + stale_after), if !stale_after.is_zero() => {
                warn!("Session {} missed heart-beats, closing", session_id);
                break;
            }
        }
    }

    hub.remove_session(session_id).await;
    let _ = sender.close().await;
    info!("STOMP session {} closed", session_id);
}

/// Read until CONNECT (or STOMP). Anything else before it is ignored.
async fn wait_for_connect(receiver: &mut SplitStream<WebSocket>) -> Option<Frame> {
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        match Frame::decode(text.as_str()) {
            Ok(Some(frame)) if matches!(frame.command, Command::Connect | Command::Stomp) => {
                return Some(frame);
            }
            Ok(Some(frame)) => debug!("Ignoring {} before CONNECT", frame.command),
            Ok(None) => {}
            Err(e) => debug!("Ignoring malformed frame before CONNECT: {}", e),
        }
    }
    None
}

async fn send_text(sender: &mut WsSink, text: String) -> Result<(), axum::Error> {
    sender.send(Message::Text(text.into())).await
}

async fn send_receipt(sender: &mut WsSink, frame: &Frame) {
    if let Some(receipt) = frame.get("receipt") {
        let reply = Frame::new(Command::Receipt).header("receipt-id", receipt);
        let _ = send_text(sender, reply.encode()).await;
    }
}

async fn send_error(sender: &mut WsSink, message: &str) {
    warn!("Closing STOMP session: {}", message);
    let frame = Frame::new(Command::Error).header("message", message);
    let _ = send_text(sender, frame.encode()).await;
}
