//! Client-side session state for one hub connection at a time.
//!
//! The session is a projection of the last events it has seen. Every
//! (re)connect starts with a snapshot request; incremental log lines for a
//! process are refused until that process's full log has arrived on the
//! current connection, so nothing is ever appended onto a stale buffer.

use crate::autoscroll::{AutoscrollPolicy, ScrollDecision, Viewport};
use crate::console_ipc::{
    decode_frame, CommandPayload, ErrorPayload, LogPayload, ProcessId, SnapshotRequestPayload,
    StatusPayload, WireEnvelope, WireMsg, DEFAULT_MAX_FRAME_BYTES,
};
use crate::log_buffer::{AppendOutcome, LogBuffer, DEFAULT_LOG_CAPACITY};
use crate::process_state::{ProcessStateSync, ProcessStatus, RunState};

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    AwaitingSnapshot,
    Live,
}

impl LinkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPhase::Disconnected => "disconnected",
            LinkPhase::AwaitingSnapshot => "syncing",
            LinkPhase::Live => "live",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessView {
    pub logs: LogBuffer,
    pub viewport: Viewport,
    synced: bool,
}

impl ProcessView {
    fn new(capacity: usize) -> Self {
        Self {
            logs: LogBuffer::new(capacity),
            viewport: Viewport::default(),
            synced: false,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    fn relayout(&mut self, policy: &AutoscrollPolicy) -> ScrollDecision {
        self.viewport.after_mutation(policy, self.logs.len() as i64)
    }
}

/// What a single inbound frame did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Status {
        process: ProcessId,
        changed: bool,
    },
    LogAppended {
        process: ProcessId,
        outcome: AppendOutcome,
        scroll: ScrollDecision,
    },
    LogReplaced {
        process: ProcessId,
        lines: usize,
        scroll: ScrollDecision,
    },
    HubError(ErrorPayload),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    InvalidEnvelope(&'static str),
    StaleConnection,
    AwaitingSnapshot,
    UnexpectedKind(&'static str),
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::InvalidEnvelope(reason) => reason,
            DropReason::StaleConnection => "stale_connection",
            DropReason::AwaitingSnapshot => "awaiting_snapshot",
            DropReason::UnexpectedKind(kind) => kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    conn_id: Option<ConnId>,
    connects: u64,
    processes: ProcessStateSync,
    views: [ProcessView; 2],
    policy: AutoscrollPolicy,
    dropped: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY, AutoscrollPolicy::default())
    }
}

impl Session {
    pub fn new(capacity: usize, policy: AutoscrollPolicy) -> Self {
        Self {
            conn_id: None,
            connects: 0,
            processes: ProcessStateSync::new(),
            views: [ProcessView::new(capacity), ProcessView::new(capacity)],
            policy,
            dropped: 0,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        if self.conn_id.is_none() {
            LinkPhase::Disconnected
        } else if self.views.iter().all(ProcessView::is_synced) {
            LinkPhase::Live
        } else {
            LinkPhase::AwaitingSnapshot
        }
    }

    pub fn conn_id(&self) -> Option<ConnId> {
        self.conn_id
    }

    pub fn connects(&self) -> u64 {
        self.connects
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn view(&self, process: ProcessId) -> &ProcessView {
        &self.views[process.index()]
    }

    pub fn view_mut(&mut self, process: ProcessId) -> &mut ProcessView {
        &mut self.views[process.index()]
    }

    pub fn policy(&self) -> &AutoscrollPolicy {
        &self.policy
    }

    pub fn run_state(&self, process: ProcessId) -> RunState {
        self.processes.state(process)
    }

    pub fn process_status(&self, process: ProcessId) -> ProcessStatus {
        self.processes.status(process)
    }

    /// Starts a new connection epoch. The returned message must be sent before
    /// anything else; until its answers arrive incremental logs are refused.
    pub fn on_connected(&mut self, conn_id: ConnId) -> WireMsg {
        self.conn_id = Some(conn_id);
        self.connects += 1;
        for view in &mut self.views {
            view.synced = false;
        }
        self.processes.clear_pending();
        WireMsg::RequestSnapshot(SnapshotRequestPayload::default())
    }

    /// Buffers are kept on screen but marked stale; the next snapshot overwrites them.
    pub fn on_disconnected(&mut self) {
        self.conn_id = None;
        for view in &mut self.views {
            view.synced = false;
        }
        self.processes.clear_pending();
    }

    pub fn request_refresh(&self) -> Option<WireMsg> {
        self.conn_id
            .map(|_| WireMsg::RequestSnapshot(SnapshotRequestPayload::default()))
    }

    /// Returns `None` while offline; a request with no connection to carry it
    /// would only ever be a stuck pending marker.
    pub fn request_toggle(&mut self, process: ProcessId) -> Option<CommandPayload> {
        self.conn_id?;
        Some(self.processes.request_toggle(process))
    }

    pub fn set_viewport_height(&mut self, process: ProcessId, rows: i64) {
        let policy = self.policy;
        self.views[process.index()].viewport.resize(&policy, rows);
    }

    pub fn handle_frame(&mut self, conn_id: ConnId, raw: &[u8]) -> Dispatch {
        let envelope: WireEnvelope = match decode_frame(raw, DEFAULT_MAX_FRAME_BYTES) {
            Ok(value) => value,
            Err(_) => return self.drop_event(DropReason::Malformed),
        };
        if let Err(reason) = envelope.validate() {
            return self.drop_event(DropReason::InvalidEnvelope(reason));
        }
        self.handle_envelope(conn_id, envelope)
    }

    pub fn handle_envelope(&mut self, conn_id: ConnId, envelope: WireEnvelope) -> Dispatch {
        if self.conn_id != Some(conn_id) {
            return self.drop_event(DropReason::StaleConnection);
        }
        match envelope.msg {
            WireMsg::Status(payload) => self.apply_status(payload),
            WireMsg::LogIncremental(payload) => self.apply_incremental(payload),
            WireMsg::LogFull(payload) => self.apply_full(payload),
            WireMsg::Error(payload) => Dispatch::HubError(payload),
            other => self.drop_event(DropReason::UnexpectedKind(other.kind())),
        }
    }

    fn apply_status(&mut self, payload: StatusPayload) -> Dispatch {
        let changed = self.processes.apply_status(payload);
        Dispatch::Status {
            process: payload.process,
            changed,
        }
    }

    fn apply_incremental(&mut self, payload: LogPayload) -> Dispatch {
        let policy = self.policy;
        let view = &mut self.views[payload.process.index()];
        if !view.synced {
            return self.drop_event(DropReason::AwaitingSnapshot);
        }
        let outcome = view.logs.append_incremental(&payload.data);
        let scroll = view.relayout(&policy);
        Dispatch::LogAppended {
            process: payload.process,
            outcome,
            scroll,
        }
    }

    fn apply_full(&mut self, payload: LogPayload) -> Dispatch {
        let policy = self.policy;
        let view = &mut self.views[payload.process.index()];
        view.logs.replace_full(&payload.data);
        view.synced = true;
        let scroll = view.relayout(&policy);
        Dispatch::LogReplaced {
            process: payload.process,
            lines: view.logs.len(),
            scroll,
        }
    }

    fn drop_event(&mut self, reason: DropReason) -> Dispatch {
        self.dropped += 1;
        Dispatch::Dropped(reason)
    }
}
