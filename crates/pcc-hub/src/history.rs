use pcc_core::console_ipc::ProcessId;
use pcc_core::log_buffer::LogBuffer;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

/// Upper bound on how much of an existing log file is read back at start.
pub const RELOAD_TAIL_BYTES: u64 = 4 * 1024 * 1024;

pub fn log_file_name(process: ProcessId) -> &'static str {
    match process {
        ProcessId::Tracker => "tracker.log",
        ProcessId::Notifier => "bark.log",
    }
}

/// Server-side history for one process: the in-memory tail used for snapshots
/// plus the append-only log file it is mirrored to.
pub struct ProcessHistory {
    process: ProcessId,
    buffer: LogBuffer,
    path: Option<PathBuf>,
    file: Option<File>,
}

impl ProcessHistory {
    pub fn in_memory(process: ProcessId, capacity: usize) -> Self {
        Self {
            process,
            buffer: LogBuffer::new(capacity),
            path: None,
            file: None,
        }
    }

    /// Loads the tail of the existing log file, then keeps it open for appends.
    pub async fn open(process: ProcessId, capacity: usize, log_dir: &Path) -> io::Result<Self> {
        tokio::fs::create_dir_all(log_dir).await?;
        let path = log_dir.join(log_file_name(process));
        let mut buffer = LogBuffer::new(capacity);
        match read_tail(&path, RELOAD_TAIL_BYTES).await {
            Ok(text) => buffer.replace_full(&text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            process,
            buffer,
            path: Some(path),
            file: Some(file),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    pub fn full_text(&self) -> String {
        self.buffer.to_text()
    }

    /// Newest lines, at most `max_lines`, whose JSON-escaped size stays within
    /// `max_bytes`. Used for `log_full` so the frame always encodes.
    pub fn snapshot_text(&self, max_lines: usize, max_bytes: usize) -> String {
        let mut used = 0usize;
        let mut tail = Vec::new();
        for line in self.buffer.lines().rev().take(max_lines) {
            // quotes of the encoded string stand in for the escaped line break
            let cost = serde_json::to_string(line)
                .map_or(line.len() * 6 + 2, |encoded| encoded.len());
            if used + cost > max_bytes {
                break;
            }
            used += cost;
            tail.push(line);
        }
        let mut text = String::with_capacity(used);
        for line in tail.into_iter().rev() {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Records `text` in memory and on disk. A failing disk write is logged and
    /// the file is dropped; the in-memory history keeps working.
    pub async fn record(&mut self, text: &str) {
        self.buffer.append_incremental(text);
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut data = text.to_string();
        if !data.ends_with('\n') {
            data.push('\n');
        }
        let result = async {
            file.write_all(data.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = result {
            warn!(
                event = "history_write_failed",
                process = %self.process,
                error = %err
            );
            self.file = None;
        }
    }
}

/// Reads at most the last `max_bytes` of `path`, starting at a line boundary.
async fn read_tail(path: &Path, max_bytes: u64) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start)).await?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    if start > 0 {
        // the first line is cut
        let skip = bytes
            .iter()
            .position(|byte| *byte == b'\n')
            .map_or(bytes.len(), |pos| pos + 1);
        bytes.drain(..skip);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reopening_restores_the_tail_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut history = ProcessHistory::open(ProcessId::Tracker, 10, dir.path())
                .await
                .expect("open");
            history.record("[TRACKER] one").await;
            history.record("[TRACKER] two\n[TRACKER] three\n").await;
        }
        let raw = std::fs::read_to_string(dir.path().join("tracker.log")).expect("read");
        assert_eq!(raw, "[TRACKER] one\n[TRACKER] two\n[TRACKER] three\n");

        let history = ProcessHistory::open(ProcessId::Tracker, 2, dir.path())
            .await
            .expect("reopen");
        assert_eq!(
            history.buffer().to_vec(),
            vec!["[TRACKER] two", "[TRACKER] three"]
        );
    }

    #[tokio::test]
    async fn notifier_history_uses_its_own_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut history = ProcessHistory::open(ProcessId::Notifier, 10, dir.path())
            .await
            .expect("open");
        history.record("[BARK] listening").await;
        assert_eq!(history.path(), Some(dir.path().join("bark.log").as_path()));
        assert_eq!(history.full_text(), "[BARK] listening\n");
    }

    #[tokio::test]
    async fn reload_reads_only_the_end_of_a_large_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tracker.log");
        std::fs::write(&path, "aaaa\nbbbb\ncccc\ndddd\n").expect("write");

        let text = read_tail(&path, 12).await.expect("tail");
        assert_eq!(text, "cccc\ndddd\n");
        let whole = read_tail(&path, RELOAD_TAIL_BYTES).await.expect("whole");
        assert_eq!(whole, "aaaa\nbbbb\ncccc\ndddd\n");
    }

    #[tokio::test]
    async fn snapshot_text_keeps_the_newest_lines_within_budget() {
        let mut history = ProcessHistory::in_memory(ProcessId::Tracker, 100);
        for line in ["[TRACKER] one", "[TRACKER] two", "[TRACKER] three"] {
            history.record(line).await;
        }
        assert_eq!(history.snapshot_text(2, usize::MAX), "[TRACKER] two\n[TRACKER] three\n");
        // "[TRACKER] three" costs 17 encoded bytes, "[TRACKER] two" costs 15
        assert_eq!(history.snapshot_text(100, 32), "[TRACKER] two\n[TRACKER] three\n");
        assert_eq!(history.snapshot_text(100, 31), "[TRACKER] three\n");
        assert_eq!(history.snapshot_text(100, 5), "");
    }

    #[tokio::test]
    async fn in_memory_history_is_bounded() {
        let mut history = ProcessHistory::in_memory(ProcessId::Tracker, 2);
        for line in ["a", "b", "c"] {
            history.record(line).await;
        }
        assert_eq!(history.buffer().to_vec(), vec!["b", "c"]);
        assert!(history.path().is_none());
    }
}
