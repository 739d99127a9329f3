use crate::hub::HubState;
use pcc_core::console_ipc::{CommandPayload, ProcessCommand, ProcessId};
use std::collections::BTreeMap;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Supervision state for one managed process.
#[derive(Default)]
pub struct ProcessSlot {
    running: Option<RunningChild>,
    generation: u64,
}

struct RunningChild {
    pid: Option<u32>,
    generation: u64,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessSlot {
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

pub fn exit_code_label(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("-{signal}");
        }
    }
    "unknown".to_string()
}

fn spawn_child(argv: &[String], env: &BTreeMap<String, String>) -> io::Result<Child> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"));
    };
    Command::new(program)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

async fn forward_lines<R>(hub: Arc<HubState>, process: ProcessId, reader: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let prefix = process.log_prefix();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                hub.emit_log(process, &format!("{prefix} {line}")).await;
            }
            Err(err) => {
                warn!(event = "output_read_failed", process = %process, error = %err);
                hub.emit_log(process, &format!("{prefix} ERROR: {err}")).await;
                break;
            }
        }
    }
}

impl HubState {
    pub async fn is_running(&self, process: ProcessId) -> bool {
        self.slots[process.index()].lock().await.is_running()
    }

    pub async fn run_command(self: Arc<Self>, command: CommandPayload) {
        match command.command {
            ProcessCommand::Start => self.start_process(command.process).await,
            ProcessCommand::Stop => self.stop_process(command.process).await,
        }
    }

    pub async fn start_process(self: Arc<Self>, process: ProcessId) {
        let prefix = process.log_prefix();
        let mut slot = self.slots[process.index()].lock().await;
        if slot.is_running() {
            self.emit_log(process, &format!("{prefix} already running."))
                .await;
            self.emit_status(process, true).await;
            return;
        }

        self.emit_log(
            process,
            &format!("[SYSTEM] starting {}...", process.display_name()),
        )
        .await;

        let env = match self.env_file.read_values() {
            Ok(values) => values,
            Err(err) => {
                warn!(event = "env_read_failed", process = %process, error = %err);
                BTreeMap::new()
            }
        };
        let argv = self.config.command_for(process);
        let mut child = match spawn_child(argv, &env) {
            Ok(child) => child,
            Err(err) => {
                let line = if err.kind() == io::ErrorKind::NotFound {
                    format!(
                        "{prefix} failed to start: executable '{}' not found.",
                        argv.first().map(String::as_str).unwrap_or_default()
                    )
                } else {
                    format!("{prefix} failed to start: {err}")
                };
                error!(event = "spawn_failed", process = %process, error = %err);
                self.emit_log(process, &line).await;
                self.emit_status(process, false).await;
                return;
            }
        };

        slot.generation += 1;
        let generation = slot.generation;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        slot.running = Some(RunningChild {
            pid,
            generation,
            kill_tx: Some(kill_tx),
        });
        info!(event = "process_started", process = %process, pid = ?pid);
        self.emit_log(process, &format!("{prefix} started.")).await;
        self.emit_status(process, true).await;
        drop(slot);

        let stdout_task = child.stdout.take().map(|stdout| {
            let hub = self.clone();
            tokio::spawn(forward_lines(hub, process, stdout))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            let hub = self.clone();
            tokio::spawn(forward_lines(hub, process, stderr))
        });

        let hub = self.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                let _ = task.await;
            }
            let code = match &status {
                Ok(status) => exit_code_label(status),
                Err(err) => {
                    warn!(event = "wait_failed", process = %process, error = %err);
                    "unknown".to_string()
                }
            };
            hub.finish_process(process, generation, &code).await;
        });
    }

    async fn finish_process(&self, process: ProcessId, generation: u64, code: &str) {
        {
            let mut slot = self.slots[process.index()].lock().await;
            match slot.running.as_ref() {
                Some(running) if running.generation == generation => slot.running = None,
                _ => return,
            }
        }
        info!(event = "process_exited", process = %process, code = code);
        self.emit_log(
            process,
            &format!("{} stopped, exit code: {code}", process.log_prefix()),
        )
        .await;
        self.emit_status(process, false).await;
    }

    /// Sends SIGTERM and lets the exit watcher report the status change.
    pub async fn stop_process(self: Arc<Self>, process: ProcessId) {
        let mut slot = self.slots[process.index()].lock().await;
        let Some(running) = slot.running.as_mut() else {
            drop(slot);
            self.emit_log(process, &format!("{} not running.", process.log_prefix()))
                .await;
            self.emit_status(process, false).await;
            return;
        };

        let terminated = match running.pid {
            Some(pid) => send_terminate(pid),
            None => false,
        };
        if !terminated {
            if let Some(kill_tx) = running.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
        drop(slot);
        info!(event = "process_stop_requested", process = %process, graceful = terminated);
        self.emit_log(
            process,
            &format!("[SYSTEM] stop signal sent to {}.", process.display_name()),
        )
        .await;
    }

    /// Hard-kills whatever is still running; used on hub shutdown.
    pub async fn kill_all(&self) {
        for process in ProcessId::ALL {
            let mut slot = self.slots[process.index()].lock().await;
            if let Some(kill_tx) = slot.running.as_mut().and_then(|running| running.kill_tx.take()) {
                info!(event = "process_killed", process = %process);
                let _ = kill_tx.send(());
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            warn!(event = "terminate_failed", pid = pid, error = %err);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> bool {
    false
}
