//! Remote relay health: the probe result record and the polling state machine.
//!
//! The poller owns at most one repeating timer. Timers are created and torn
//! down through a [`TimerDriver`], so the same logic runs against a tokio
//! interval in the console and a recording fake in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Wire form served by the hub's `/remote_bark_status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub configured: bool,
    pub url: String,
    pub ok: bool,
    pub status_code: Option<u16>,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthResult {
    pub fn from_report(report: HealthReport, checked_at: DateTime<Utc>) -> Self {
        Self {
            configured: report.configured,
            url: report.url,
            ok: report.ok,
            status_code: report.status_code,
            latency_ms: report.latency_ms,
            error: report.error,
            checked_at,
        }
    }

    /// Interprets a raw probe response. A non-2xx answer, or a body that is
    /// not a JSON report, is a failed probe carrying the HTTP status, never a
    /// parse error.
    pub fn from_response(
        previous: Option<&HealthResult>,
        http_status: u16,
        body: &[u8],
        checked_at: DateTime<Utc>,
    ) -> Self {
        if (200..300).contains(&http_status) {
            if let Ok(report) = serde_json::from_slice::<HealthReport>(body) {
                return Self::from_report(report, checked_at);
            }
        }
        let detail = error_message(body)
            .unwrap_or_else(|| "response was not a status report".to_string());
        Self::failure(
            previous,
            Some(http_status),
            format!("HTTP {http_status}: {detail}"),
            checked_at,
        )
    }

    /// The one partial result: identity fields survive from the previous probe
    /// when the request itself failed and produced no report.
    pub fn failure(
        previous: Option<&HealthResult>,
        status_code: Option<u16>,
        error: impl Into<String>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            configured: previous.map(|prev| prev.configured).unwrap_or(false),
            url: previous.map(|prev| prev.url.clone()).unwrap_or_default(),
            ok: false,
            status_code,
            latency_ms: None,
            error: Some(error.into()),
            checked_at,
        }
    }

    pub fn summary(&self) -> String {
        if !self.configured {
            return match self.error.as_deref() {
                Some(error) => format!("not configured ({error})"),
                None => "not configured".to_string(),
            };
        }
        let mut out = if self.ok {
            "ok".to_string()
        } else {
            "down".to_string()
        };
        if let Some(code) = self.status_code {
            out.push_str(&format!(" · HTTP {code}"));
        }
        if let Some(latency) = self.latency_ms {
            out.push_str(&format!(" · {latency:.0} ms"));
        }
        if let Some(error) = self.error.as_deref() {
            out.push_str(&format!(" · {error}"));
        }
        out
    }
}

/// `message` or `error` text from a JSON error body.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|field| field.as_str()))
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    #[default]
    Manual,
    Auto,
}

impl PollMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollMode::Manual => "manual",
            PollMode::Auto => "auto",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            PollMode::Manual => PollMode::Auto,
            PollMode::Auto => PollMode::Manual,
        }
    }
}

impl fmt::Display for PollMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An interval as the operator edits it: separate minute and second fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PollInterval {
    pub minutes: u64,
    pub seconds: u64,
}

impl PollInterval {
    pub fn new(minutes: u64, seconds: u64) -> Self {
        Self { minutes, seconds }
    }

    pub fn from_total_seconds(total: u64) -> Self {
        Self {
            minutes: total / 60,
            seconds: total % 60,
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.minutes.saturating_mul(60).saturating_add(self.seconds)
    }

    /// `None` when the interval is too short to drive a timer.
    pub fn period(&self) -> Option<Duration> {
        match self.total_seconds() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m{:02}s", self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollingConfig {
    pub mode: PollMode,
    pub draft: PollInterval,
    pub applied: PollInterval,
}

pub type TimerId = u64;

pub trait TimerDriver {
    type Handle;

    /// Starts a repeating timer whose first firing is one `period` from now.
    fn start(&mut self, timer_id: TimerId, period: Duration) -> Self::Handle;

    fn cancel(&mut self, handle: Self::Handle);
}

struct ActiveTimer<H> {
    id: TimerId,
    period: Duration,
    handle: H,
}

/// What the caller should do after a poller transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    ProbeNow,
    Idle,
}

pub struct HealthPoller<D: TimerDriver> {
    driver: D,
    config: PollingConfig,
    active: Option<ActiveTimer<D::Handle>>,
    next_timer_id: TimerId,
    last: Option<HealthResult>,
    probes_started: u64,
}

impl<D: TimerDriver> HealthPoller<D> {
    pub fn new(driver: D, applied: PollInterval) -> Self {
        Self {
            driver,
            config: PollingConfig {
                mode: PollMode::Manual,
                draft: applied,
                applied,
            },
            active: None,
            next_timer_id: 0,
            last: None,
            probes_started: 0,
        }
    }

    pub fn config(&self) -> PollingConfig {
        self.config
    }

    pub fn mode(&self) -> PollMode {
        self.config.mode
    }

    pub fn last_result(&self) -> Option<&HealthResult> {
        self.last.as_ref()
    }

    pub fn active_timer(&self) -> Option<(TimerId, Duration)> {
        self.active.as_ref().map(|timer| (timer.id, timer.period))
    }

    pub fn probes_started(&self) -> u64 {
        self.probes_started
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Switching to auto probes once right away and starts the timer;
    /// switching to manual cancels it.
    pub fn set_mode(&mut self, mode: PollMode) -> PollAction {
        self.config.mode = mode;
        match mode {
            PollMode::Auto => {
                self.restart_timer();
                self.probe_now()
            }
            PollMode::Manual => {
                self.cancel_timer();
                PollAction::Idle
            }
        }
    }

    pub fn set_draft(&mut self, draft: PollInterval) {
        self.config.draft = draft;
    }

    /// Commits the draft; the running timer (if any) is replaced, never doubled.
    pub fn apply_interval(&mut self, minutes: u64, seconds: u64) {
        self.config.draft = PollInterval::new(minutes, seconds);
        self.config.applied = self.config.draft;
        if self.config.mode == PollMode::Auto {
            self.restart_timer();
        } else {
            self.cancel_timer();
        }
    }

    pub fn apply_draft(&mut self) {
        let draft = self.config.draft;
        self.apply_interval(draft.minutes, draft.seconds);
    }

    /// Manual probe request; allowed in either mode.
    pub fn probe_now(&mut self) -> PollAction {
        self.probes_started += 1;
        PollAction::ProbeNow
    }

    /// Ticks from a timer that has since been replaced are ignored.
    pub fn on_tick(&mut self, timer_id: TimerId) -> PollAction {
        match self.active.as_ref() {
            Some(timer) if timer.id == timer_id && self.config.mode == PollMode::Auto => {
                self.probe_now()
            }
            _ => PollAction::Idle,
        }
    }

    /// Probe completions land whenever they land, even after a mode switch.
    pub fn record_result(&mut self, result: HealthResult) {
        self.last = Some(result);
    }

    pub fn shutdown(&mut self) {
        self.cancel_timer();
    }

    fn restart_timer(&mut self) {
        self.cancel_timer();
        let Some(period) = self.config.applied.period() else {
            return;
        };
        self.next_timer_id += 1;
        let id = self.next_timer_id;
        let handle = self.driver.start(id, period);
        self.active = Some(ActiveTimer { id, period, handle });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.active.take() {
            self.driver.cancel(timer.handle);
        }
    }
}

impl<D: TimerDriver> Drop for HealthPoller<D> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingDriver {
        started: Vec<(TimerId, Duration)>,
        cancelled: Vec<TimerId>,
    }

    impl RecordingDriver {
        fn live(&self) -> Vec<TimerId> {
            self.started
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| !self.cancelled.contains(id))
                .collect()
        }
    }

    impl TimerDriver for RecordingDriver {
        type Handle = TimerId;

        fn start(&mut self, timer_id: TimerId, period: Duration) -> TimerId {
            self.started.push((timer_id, period));
            timer_id
        }

        fn cancel(&mut self, handle: TimerId) {
            self.cancelled.push(handle);
        }
    }

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn auto_mode_with_zero_interval_never_starts_a_timer() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 0));
        let action = poller.set_mode(PollMode::Auto);
        assert_eq!(action, PollAction::ProbeNow);
        assert!(poller.active_timer().is_none());
        assert!(poller.driver().started.is_empty());
    }

    #[test]
    fn auto_mode_starts_exactly_one_timer_at_applied_period() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 30));
        assert_eq!(poller.set_mode(PollMode::Auto), PollAction::ProbeNow);
        assert_eq!(poller.driver().started, vec![(1, Duration::from_secs(30))]);
        assert_eq!(poller.driver().live(), vec![1]);
        assert_eq!(poller.on_tick(1), PollAction::ProbeNow);
        assert_eq!(poller.probes_started(), 2);
    }

    #[test]
    fn apply_interval_replaces_running_timer() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 30));
        poller.set_mode(PollMode::Auto);
        poller.apply_interval(1, 5);
        assert_eq!(poller.driver().cancelled, vec![1]);
        assert_eq!(poller.driver().live(), vec![2]);
        assert_eq!(poller.active_timer(), Some((2, Duration::from_secs(65))));
        // the cancelled timer's late tick does not fire a probe
        assert_eq!(poller.on_tick(1), PollAction::Idle);
        assert_eq!(poller.on_tick(2), PollAction::ProbeNow);
    }

    #[test]
    fn draft_does_not_touch_running_timer_until_applied() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 30));
        poller.set_mode(PollMode::Auto);
        poller.set_draft(PollInterval::new(0, 5));
        assert_eq!(poller.active_timer(), Some((1, Duration::from_secs(30))));
        assert_eq!(poller.config().applied, PollInterval::new(0, 30));
        poller.apply_draft();
        assert_eq!(poller.active_timer(), Some((2, Duration::from_secs(5))));
    }

    #[test]
    fn apply_in_manual_mode_only_commits() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 0));
        poller.apply_interval(0, 45);
        assert!(poller.driver().started.is_empty());
        assert_eq!(poller.config().applied.total_seconds(), 45);
    }

    #[test]
    fn manual_mode_cancels_and_ignores_ticks() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 10));
        poller.set_mode(PollMode::Auto);
        assert_eq!(poller.set_mode(PollMode::Manual), PollAction::Idle);
        assert!(poller.driver().live().is_empty());
        assert_eq!(poller.on_tick(1), PollAction::Idle);
    }

    #[test]
    fn re_entering_auto_does_not_stack_timers() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 10));
        poller.set_mode(PollMode::Auto);
        poller.set_mode(PollMode::Auto);
        assert_eq!(poller.driver().live(), vec![2]);
    }

    #[test]
    fn applying_zero_in_auto_stops_polling() {
        let mut poller = HealthPoller::new(RecordingDriver::default(), PollInterval::new(0, 10));
        poller.set_mode(PollMode::Auto);
        poller.apply_interval(0, 0);
        assert!(poller.active_timer().is_none());
        assert!(poller.driver().live().is_empty());
    }

    #[test]
    fn non_json_body_becomes_failure_with_status() {
        let previous = HealthResult::from_report(
            HealthReport {
                configured: true,
                url: "https://relay.example".to_string(),
                ok: true,
                status_code: Some(200),
                latency_ms: Some(12.0),
                error: None,
            },
            at(),
        );
        let result = HealthResult::from_response(Some(&previous), 502, b"<html>bad gateway</html>", at());
        assert!(!result.ok);
        assert!(result.configured);
        assert_eq!(result.url, "https://relay.example");
        assert_eq!(result.status_code, Some(502));
        assert!(result.latency_ms.is_none());
        assert!(result.error.as_deref().unwrap_or_default().contains("502"));
    }

    #[test]
    fn error_status_with_json_body_is_a_failure() {
        let body = br#"{"status":"error","message":"maintenance"}"#;
        let result = HealthResult::from_response(None, 503, body, at());
        assert!(!result.ok);
        assert!(!result.configured);
        assert_eq!(result.status_code, Some(503));
        assert_eq!(result.error.as_deref(), Some("HTTP 503: maintenance"));
        assert_eq!(result.summary(), "not configured (HTTP 503: maintenance)");

        let previous = HealthResult::from_report(
            HealthReport {
                configured: true,
                url: "https://relay.example".to_string(),
                ok: true,
                ..HealthReport::default()
            },
            at(),
        );
        let result = HealthResult::from_response(Some(&previous), 503, body, at());
        assert_eq!(result.summary(), "down · HTTP 503 · HTTP 503: maintenance");
    }

    #[test]
    fn json_body_replaces_result_wholesale() {
        let body = br#"{"configured":true,"url":"https://relay.example","ok":false,"status_code":503,"latency_ms":88.5,"error":"upstream"}"#;
        let result = HealthResult::from_response(None, 200, body, at());
        assert_eq!(result.status_code, Some(503));
        assert_eq!(result.latency_ms, Some(88.5));
        assert_eq!(result.error.as_deref(), Some("upstream"));
        assert_eq!(result.summary(), "down · HTTP 503 · 88 ms · upstream");
    }

    #[test]
    fn interval_round_trips_through_total_seconds() {
        let interval = PollInterval::from_total_seconds(125);
        assert_eq!(interval, PollInterval::new(2, 5));
        assert_eq!(interval.total_seconds(), 125);
        assert_eq!(interval.to_string(), "2m05s");
    }
}
