use crate::env_file::EnvFile;
use crate::history::ProcessHistory;
use crate::supervisor::ProcessSlot;
use crate::Config;
use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use pcc_core::console_ipc::{
    decode_frame, encode_frame, ErrorPayload, LogPayload, ProcessId, StatusPayload, WireEnvelope,
    WireMsg, DEFAULT_MAX_FRAME_BYTES,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

pub const REFRESH_NOTICE: &str = "[SYSTEM] console state refreshed.";
const OUTBOUND_QUEUE: usize = 256;
/// Room left in a frame for the envelope around a `log_full` payload.
const SNAPSHOT_ENVELOPE_BYTES: usize = 4096;

pub struct Client {
    pub conn_id: String,
    pub client_id: String,
    sender: mpsc::Sender<Message>,
    last_seen: AsyncMutex<Instant>,
}

impl Client {
    async fn touch(&self) {
        let mut last = self.last_seen.lock().await;
        *last = Instant::now();
    }

    async fn last_seen(&self) -> Instant {
        *self.last_seen.lock().await
    }

    async fn send_text(&self, text: &str) -> bool {
        self.sender.send(Message::Text(text.to_string())).await.is_ok()
    }

    async fn close(&self, reason: &str) {
        let _ = self
            .sender
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: 1008,
                reason: reason.to_string().into(),
            })))
            .await;
    }
}

pub struct HubState {
    pub config: Config,
    pub env_file: EnvFile,
    pub http: reqwest::Client,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    histories: [AsyncMutex<ProcessHistory>; 2],
    pub(crate) slots: [AsyncMutex<ProcessSlot>; 2],
}

fn encode_envelope(msg: WireMsg) -> Option<String> {
    let kind = msg.kind();
    match encode_frame(&WireEnvelope::from_hub(msg), DEFAULT_MAX_FRAME_BYTES) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(event = "encode_failed", kind = kind, error = %err);
            None
        }
    }
}

fn with_line_break(text: &str) -> String {
    let mut data = text.to_string();
    if !data.ends_with('\n') {
        data.push('\n');
    }
    data
}

impl HubState {
    pub fn new(config: Config, histories: [ProcessHistory; 2], http: reqwest::Client) -> Self {
        let env_file = EnvFile::new(config.env_file.clone());
        let [tracker, notifier] = histories;
        Self {
            config,
            env_file,
            http,
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            histories: [AsyncMutex::new(tracker), AsyncMutex::new(notifier)],
            slots: [
                AsyncMutex::new(ProcessSlot::default()),
                AsyncMutex::new(ProcessSlot::default()),
            ],
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn register_client(&self, client: Arc<Client>) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        info!(
            event = "client_connected",
            conn_id = %client.conn_id,
            client_id = %client.client_id
        );
    }

    async fn remove_client(&self, client: &Client, reason: &str) {
        client.close(reason).await;
        let removed = self.clients.write().await.remove(&client.conn_id).is_some();
        if removed {
            info!(
                event = "client_disconnected",
                conn_id = %client.conn_id,
                client_id = %client.client_id,
                reason = reason
            );
        }
    }

    async fn snapshot_clients(&self) -> Vec<Arc<Client>> {
        self.clients.read().await.values().cloned().collect()
    }

    async fn send_msg(&self, client: &Client, msg: WireMsg) -> bool {
        match encode_envelope(msg) {
            Some(text) => client.send_text(&text).await,
            None => false,
        }
    }

    async fn broadcast(&self, msg: WireMsg) {
        let Some(text) = encode_envelope(msg) else {
            return;
        };
        for client in self.snapshot_clients().await {
            if !client.send_text(&text).await {
                warn!(event = "send_error", conn_id = %client.conn_id);
                self.remove_client(&client, "send_error").await;
            }
        }
    }

    /// Records `text` in the process history and pushes it to every client.
    /// The history lock is held across the broadcast so a concurrent snapshot
    /// either contains the line or is queued ahead of it.
    pub async fn emit_log(&self, process: ProcessId, text: &str) {
        let data = with_line_break(text);
        let mut history = self.histories[process.index()].lock().await;
        history.record(&data).await;
        self.broadcast(WireMsg::LogIncremental(LogPayload { process, data }))
            .await;
    }

    pub async fn emit_status(&self, process: ProcessId, running: bool) {
        self.broadcast(WireMsg::Status(StatusPayload { process, running }))
            .await;
    }

    pub async fn history_text(&self, process: ProcessId) -> String {
        self.histories[process.index()].lock().await.full_text()
    }

    async fn send_statuses(&self, client: &Client) -> bool {
        for process in ProcessId::ALL {
            let running = self.is_running(process).await;
            if !self
                .send_msg(client, WireMsg::Status(StatusPayload { process, running }))
                .await
            {
                return false;
            }
        }
        true
    }

    async fn send_snapshot(&self, client: &Client) {
        if !self.send_statuses(client).await {
            warn!(event = "snapshot_error", conn_id = %client.conn_id);
            self.remove_client(client, "snapshot_error").await;
            return;
        }
        for process in ProcessId::ALL {
            let history = self.histories[process.index()].lock().await;
            let sent = self
                .send_msg(
                    client,
                    WireMsg::LogFull(LogPayload {
                        process,
                        data: history.snapshot_text(
                            self.config.snapshot_lines,
                            DEFAULT_MAX_FRAME_BYTES - SNAPSHOT_ENVELOPE_BYTES,
                        ),
                    }),
                )
                .await;
            drop(history);
            if !sent {
                warn!(event = "snapshot_error", conn_id = %client.conn_id);
                self.remove_client(client, "snapshot_error").await;
                return;
            }
        }
        self.send_msg(
            client,
            WireMsg::LogIncremental(LogPayload {
                process: ProcessId::Tracker,
                data: with_line_break(REFRESH_NOTICE),
            }),
        )
        .await;
        info!(event = "snapshot_sent", conn_id = %client.conn_id);
    }

    pub fn start_stale_reaper(self: Arc<Self>) {
        if self.config.stale_seconds == 0 {
            return;
        }
        let stale_after = Duration::from_secs(self.config.stale_seconds);
        let interval = stale_after / 2;
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for client in hub.snapshot_clients().await {
                    let last_seen = client.last_seen().await;
                    if Instant::now().duration_since(last_seen) > stale_after {
                        warn!(event = "stale_close", conn_id = %client.conn_id);
                        hub.remove_client(&client, "stale").await;
                    }
                }
            }
        });
    }

    fn start_ping(self: Arc<Self>, client: Arc<Client>) {
        if self.config.ping_interval.is_zero() {
            return;
        }
        let interval = self.config.ping_interval;
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if client.sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!(event = "ping_stopped", conn_id = %client.conn_id);
                    hub.remove_client(&client, "ping_failed").await;
                    return;
                }
            }
        });
    }

    async fn handle_message(self: &Arc<Self>, client: &Client, envelope: WireEnvelope) {
        let request_id = envelope.request_id.as_deref();
        match envelope.msg {
            WireMsg::Command(command) => {
                info!(
                    event = "command",
                    conn_id = %client.conn_id,
                    command = command.command.as_str(),
                    process = %command.process
                );
                self.clone().run_command(command).await;
            }
            WireMsg::RequestSnapshot(_) => {
                self.send_snapshot(client).await;
            }
            WireMsg::Hello(_) => {
                self.send_error(client, "unexpected_hello", "unexpected hello", request_id)
                    .await;
                warn!(event = "unexpected_hello", conn_id = %client.conn_id);
            }
            other => {
                self.send_error(
                    client,
                    "unexpected_message",
                    "message type is hub-to-client only",
                    request_id,
                )
                .await;
                warn!(event = "unexpected_message", conn_id = %client.conn_id, kind = other.kind());
            }
        }
    }

    async fn send_error(
        &self,
        client: &Client,
        code: &str,
        message: &str,
        request_id: Option<&str>,
    ) {
        let mut envelope = WireEnvelope::from_hub(WireMsg::Error(ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
        }));
        envelope.request_id = request_id.map(str::to_string);
        if let Ok(text) = encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES) {
            let _ = client.send_text(&text).await;
        }
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                let send = ws_sender.send(msg);
                match tokio::time::timeout(write_timeout, send).await {
                    Ok(Ok(())) if !closing => {}
                    _ => return,
                }
            }
        });

        let first = match ws_receiver.next().await {
            Some(Ok(msg)) => msg,
            _ => return,
        };
        let Some(data) = message_bytes(first) else {
            return;
        };
        let envelope: WireEnvelope = match decode_frame(&data, DEFAULT_MAX_FRAME_BYTES) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "hello_parse", remote = %remote, error = %err);
                return;
            }
        };
        if let Err(err) = envelope.validate() {
            warn!(event = "hello_envelope", remote = %remote, error = err);
            return;
        }
        let WireMsg::Hello(hello) = envelope.msg else {
            warn!(event = "expected_hello", remote = %remote);
            return;
        };
        if hello.client_id.is_empty() || hello.client_id != envelope.sender_id {
            warn!(event = "client_id_mismatch", remote = %remote);
            return;
        }

        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            client_id: hello.client_id,
            sender: tx.clone(),
            last_seen: AsyncMutex::new(Instant::now()),
        });
        info!(
            event = "handshake_ok",
            conn_id = %client.conn_id,
            client_id = %client.client_id,
            remote = %remote
        );

        self.register_client(client.clone()).await;
        self.clone().start_ping(client.clone());
        if !self.send_statuses(&client).await {
            self.remove_client(&client, "send_error").await;
        }

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                    break;
                }
            };
            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %client.conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    client.touch().await;
                    continue;
                }
            };
            client.touch().await;
            if self.config.debug {
                debug!(event = "message_received", conn_id = %client.conn_id, raw = %String::from_utf8_lossy(&data));
            }
            let envelope: WireEnvelope = match decode_frame(&data, DEFAULT_MAX_FRAME_BYTES) {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "message_invalid", conn_id = %client.conn_id, error = %err);
                    self.send_error(&client, "invalid_frame", &err.to_string(), None)
                        .await;
                    continue;
                }
            };
            if let Err(err) = envelope.validate() {
                warn!(event = "message_invalid", conn_id = %client.conn_id, error = err);
                self.send_error(&client, err, "invalid envelope", envelope.request_id.as_deref())
                    .await;
                continue;
            }
            self.handle_message(&client, envelope).await;
        }

        self.remove_client(&client, "disconnect").await;
        drop(client);
        drop(tx);
        let _ = write_task.await;
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

fn message_bytes(msg: Message) -> Option<Vec<u8>> {
    match msg {
        Message::Text(text) => Some(text.into_bytes()),
        Message::Binary(bytes) => Some(bytes),
        Message::Close(_) | Message::Ping(_) | Message::Pong(_) => None,
    }
}
