use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Bounded, ordered log of display lines. Appends evict from the front once
/// `capacity` is reached; a full replace keeps only the newest `capacity` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub appended: usize,
    pub evicted: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogBuffer {
    /// A zero capacity is bumped to one so the buffer can always show the newest line.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.lines.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Joins the buffer back into payload form, one `\n`-terminated record per line.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|line| line.len() + 1).sum());
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn append_incremental(&mut self, raw: &str) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();
        for line in split_display_lines(raw) {
            self.lines.push_back(line);
            outcome.appended += 1;
        }
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
            outcome.evicted += 1;
        }
        outcome
    }

    /// Authoritative overwrite: nothing from before the call survives.
    pub fn replace_full(&mut self, raw: &str) {
        let lines = split_display_lines(raw);
        let skip = lines.len().saturating_sub(self.capacity);
        self.lines.clear();
        self.lines.extend(lines.into_iter().skip(skip));
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Splits a payload at its embedded line breaks. A trailing break terminates
/// the last line rather than opening an empty one, and `\r\n` counts as one break.
pub fn split_display_lines(raw: &str) -> Vec<String> {
    raw.lines().map(str::to_string).collect()
}
