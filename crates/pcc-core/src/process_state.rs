use crate::console_ipc::{CommandPayload, ProcessCommand, ProcessId, StatusPayload};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Stopped,
    Running,
}

impl RunState {
    pub fn from_running(running: bool) -> Self {
        if running {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Running => "running",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessStatus {
    pub state: RunState,
    /// Last command sent for this process that no status event has answered yet.
    pub pending: Option<ProcessCommand>,
}

/// Run state of both managed processes as last confirmed by the hub.
///
/// Commands are requests: they are recorded as pending and handed back for the
/// caller to send, but only a `status` event moves a process between states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStateSync {
    slots: [ProcessStatus; 2],
}

impl ProcessStateSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, process: ProcessId) -> ProcessStatus {
        self.slots[process.index()]
    }

    pub fn state(&self, process: ProcessId) -> RunState {
        self.slots[process.index()].state
    }

    pub fn request(&mut self, process: ProcessId, command: ProcessCommand) -> CommandPayload {
        self.slots[process.index()].pending = Some(command);
        CommandPayload { command, process }
    }

    /// Start when stopped, stop when running, judged on the confirmed state.
    pub fn request_toggle(&mut self, process: ProcessId) -> CommandPayload {
        let command = if self.state(process).is_running() {
            ProcessCommand::Stop
        } else {
            ProcessCommand::Start
        };
        self.request(process, command)
    }

    /// Applies an authoritative status event. Returns true when the state changed.
    pub fn apply_status(&mut self, payload: StatusPayload) -> bool {
        let slot = &mut self.slots[payload.process.index()];
        let next = RunState::from_running(payload.running);
        let changed = slot.state != next;
        slot.state = next;
        slot.pending = None;
        changed
    }

    /// Pending requests die with the connection that carried them.
    pub fn clear_pending(&mut self) {
        for slot in &mut self.slots {
            slot.pending = None;
        }
    }
}
