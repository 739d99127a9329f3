use futures_util::{SinkExt, StreamExt};
use pcc_core::console_ipc::{encode_frame, HelloPayload, WireEnvelope, WireMsg, DEFAULT_MAX_FRAME_BYTES};
use pcc_core::session::ConnId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum HubEvent {
    Connected(ConnId),
    Frame(ConnId, Vec<u8>),
    Disconnected(ConnId),
}

/// Outbound message bound to the connection it was produced for. Messages for
/// a connection that is already gone are discarded instead of leaking into the
/// next one.
#[derive(Debug)]
pub struct HubCommand {
    pub conn_id: ConnId,
    pub msg: WireMsg,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub ws_url: Url,
    pub client_id: String,
}

/// `http://host:port[/base]` becomes `ws://host:port[/base]/ws`.
pub fn ws_url(hub_url: &Url) -> Result<Url, String> {
    let mut url = hub_url.clone();
    let scheme = match hub_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(format!("unsupported hub scheme '{other}'")),
    };
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot use scheme '{scheme}' for {hub_url}"))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

fn frame_for(config: &LinkConfig, msg: WireMsg) -> Option<Message> {
    let envelope = WireEnvelope::new(config.client_id.clone(), msg);
    match encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES) {
        Ok(text) => Some(Message::Text(text)),
        Err(err) => {
            warn!(event = "hub_encode_error", error = %err);
            None
        }
    }
}

pub async fn hub_loop(
    config: LinkConfig,
    tx: mpsc::Sender<HubEvent>,
    mut command_rx: mpsc::Receiver<HubCommand>,
) {
    let mut backoff = Duration::from_secs(1);
    let mut conn_counter: ConnId = 0;

    loop {
        let mut socket = match tokio_tungstenite::connect_async(config.ws_url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(err) => {
                debug!(event = "hub_connect_error", url = %config.ws_url, error = %err);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };

        let hello = WireMsg::Hello(HelloPayload {
            client_id: config.client_id.clone(),
        });
        let Some(hello) = frame_for(&config, hello) else {
            return;
        };
        if let Err(err) = socket.send(hello).await {
            warn!(event = "hub_hello_failed", error = %err);
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
            continue;
        }
        backoff = Duration::from_secs(1);

        conn_counter += 1;
        let conn_id = conn_counter;
        info!(event = "hub_connected", conn_id, url = %config.ws_url);
        if tx.send(HubEvent::Connected(conn_id)).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                inbound = socket.next() => {
                    let payload = match inbound {
                        Some(Ok(Message::Text(text))) => text.into_bytes(),
                        Some(Ok(Message::Binary(bytes))) => bytes,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            warn!(event = "hub_read_error", conn_id, error = %err);
                            break;
                        }
                    };
                    if tx.send(HubEvent::Frame(conn_id, payload)).await.is_err() {
                        return;
                    }
                }
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        let _ = socket.close(None).await;
                        return;
                    };
                    if command.conn_id != conn_id {
                        debug!(event = "hub_command_stale", conn_id = command.conn_id, kind = command.msg.kind());
                        continue;
                    }
                    let Some(frame) = frame_for(&config, command.msg) else {
                        continue;
                    };
                    if let Err(err) = socket.send(frame).await {
                        warn!(event = "hub_write_error", conn_id, error = %err);
                        break;
                    }
                }
            }
        }

        info!(event = "hub_disconnected", conn_id);
        if tx.send(HubEvent::Disconnected(conn_id)).await.is_err() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}
