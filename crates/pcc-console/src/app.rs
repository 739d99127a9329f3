use crate::api::SaveOutcome;
use crate::editor::{ConfigEditor, EditorOutcome};
use crate::hub_link::HubEvent;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use pcc_core::console_ipc::{ProcessId, WireMsg};
use pcc_core::env_config::EnvSettings;
use pcc_core::health::{HealthPoller, HealthResult, PollAction, PollInterval, TimerDriver, TimerId};
use pcc_core::session::{ConnId, Dispatch, Session};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const MAX_DRAFT_MINUTES: u64 = 59;
const MAX_DRAFT_SECONDS: u64 = 59;

/// Side effects the event loop performs on the app's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send { conn_id: ConnId, msg: WireMsg },
    Probe(Option<HealthResult>),
    Save(BTreeMap<String, String>),
    LoadSettings,
}

pub struct App<D: TimerDriver> {
    pub hub_url: String,
    pub session: Session,
    pub poller: HealthPoller<D>,
    pub focus: ProcessId,
    pub editor: Option<ConfigEditor>,
    pub settings: Option<EnvSettings>,
    pub status_note: Option<String>,
    pub save_note: Option<String>,
    pub help_open: bool,
    effects: Vec<Effect>,
}

impl<D: TimerDriver> App<D> {
    pub fn new(hub_url: String, session: Session, poller: HealthPoller<D>) -> Self {
        Self {
            hub_url,
            session,
            poller,
            focus: ProcessId::Tracker,
            editor: None,
            settings: None,
            status_note: None,
            save_note: None,
            help_open: false,
            effects: vec![Effect::LoadSettings],
        }
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn send(&mut self, msg: WireMsg) {
        if let Some(conn_id) = self.session.conn_id() {
            self.effects.push(Effect::Send { conn_id, msg });
        }
    }

    fn run_poll_action(&mut self, action: PollAction) {
        if action == PollAction::ProbeNow {
            let previous = self.poller.last_result().cloned();
            self.effects.push(Effect::Probe(previous));
        }
    }

    pub fn apply_hub_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected(conn_id) => {
                let request = self.session.on_connected(conn_id);
                self.send(request);
                self.status_note = Some("hub connected".to_string());
            }
            HubEvent::Disconnected(conn_id) => {
                if self.session.conn_id() == Some(conn_id) {
                    self.session.on_disconnected();
                    self.status_note = Some("hub offline; reconnecting".to_string());
                }
            }
            HubEvent::Frame(conn_id, bytes) => match self.session.handle_frame(conn_id, &bytes) {
                Dispatch::HubError(payload) => {
                    warn!(event = "hub_error", code = %payload.code, message = %payload.message);
                    self.status_note = Some(format!("hub error: {}", payload.message));
                }
                Dispatch::Dropped(reason) => {
                    debug!(event = "frame_dropped", conn_id, reason = reason.as_str());
                }
                Dispatch::Status { process, changed } if changed => {
                    info!(
                        event = "process_status",
                        process = %process,
                        state = %self.session.run_state(process)
                    );
                }
                _ => {}
            },
        }
    }

    pub fn on_timer_tick(&mut self, timer_id: TimerId) {
        let action = self.poller.on_tick(timer_id);
        self.run_poll_action(action);
    }

    pub fn on_probe_result(&mut self, result: HealthResult) {
        debug!(event = "probe_result", ok = result.ok, configured = result.configured);
        self.poller.record_result(result);
    }

    pub fn on_save_result(&mut self, outcome: SaveOutcome) {
        info!(event = "config_saved", ok = outcome.ok);
        if outcome.ok {
            self.effects.push(Effect::LoadSettings);
        }
        self.save_note = Some(outcome.line());
    }

    pub fn on_settings_loaded(&mut self, settings: Result<EnvSettings, String>) {
        match settings {
            Ok(settings) => self.settings = Some(settings),
            Err(err) => {
                warn!(event = "settings_load_failed", error = %err);
                self.status_note = Some(format!("failed to load configuration: {err}"));
            }
        }
    }

    /// Pane heights come from the terminal layout; resizing keeps a tailing
    /// pane pinned.
    pub fn set_pane_heights(&mut self, heights: [u16; 2]) {
        for process in ProcessId::ALL {
            self.session
                .set_viewport_height(process, i64::from(heights[process.index()]));
        }
    }

    pub fn shutdown(&mut self) {
        self.poller.shutdown();
    }

    fn toggle_process(&mut self, process: ProcessId) {
        match self.session.request_toggle(process) {
            Some(command) => {
                info!(
                    event = "process_command",
                    process = %process,
                    command = command.command.as_str()
                );
                self.status_note = Some(format!(
                    "{} requested for {}",
                    command.command.as_str(),
                    process.display_name()
                ));
                self.send(WireMsg::Command(command));
            }
            None => {
                self.status_note = Some("hub offline; command not sent".to_string());
            }
        }
    }

    fn adjust_draft(&mut self, minutes: i64, seconds: i64) {
        let draft = self.poller.config().draft;
        let step = |value: u64, delta: i64, max: u64| -> u64 {
            (value as i64 + delta).clamp(0, max as i64) as u64
        };
        self.poller.set_draft(PollInterval::new(
            step(draft.minutes, minutes, MAX_DRAFT_MINUTES),
            step(draft.seconds, seconds, MAX_DRAFT_SECONDS),
        ));
    }

    fn scroll_focused(&mut self, scroll: impl FnOnce(&mut pcc_core::autoscroll::Viewport)) {
        scroll(&mut self.session.view_mut(self.focus).viewport);
    }

    fn open_editor(&mut self) {
        let settings = self.settings.clone().unwrap_or_default();
        if self.settings.is_none() {
            self.effects.push(Effect::LoadSettings);
        }
        self.editor = Some(ConfigEditor::from_settings(&settings));
        self.save_note = None;
    }
}

pub fn handle_input<D: TimerDriver>(event: Event, app: &mut App<D>) -> bool {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, app),
        _ => false,
    }
}

/// Returns true when the console should quit.
pub fn handle_key<D: TimerDriver>(key: KeyEvent, app: &mut App<D>) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }
    if let Some(editor) = app.editor.as_mut() {
        match editor.handle_key(key) {
            EditorOutcome::Continue => {}
            EditorOutcome::Close => app.editor = None,
            EditorOutcome::Save(values) => {
                app.save_note = Some("saving...".to_string());
                app.effects.push(Effect::Save(values));
            }
            EditorOutcome::Invalid(message) => app.save_note = Some(format!("✖ {message}")),
        }
        return false;
    }
    if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
        app.help_open = !app.help_open;
        return false;
    }
    if key.code == KeyCode::Esc && app.help_open {
        app.help_open = false;
        return false;
    }
    if app.help_open {
        return false;
    }

    let page = app.session.view(app.focus).viewport.geometry().client_height.max(1);
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('t') => app.toggle_process(ProcessId::Tracker),
        KeyCode::Char('b') => app.toggle_process(ProcessId::Notifier),
        KeyCode::Char('r') => match app.session.request_refresh() {
            Some(msg) => {
                app.send(msg);
                app.status_note = Some("snapshot requested".to_string());
            }
            None => app.status_note = Some("hub offline; refresh not sent".to_string()),
        },
        KeyCode::Char('p') => {
            let action = app.poller.probe_now();
            app.run_poll_action(action);
        }
        KeyCode::Char('m') => {
            let mode = app.poller.mode().toggled();
            let action = app.poller.set_mode(mode);
            app.run_poll_action(action);
            app.status_note = Some(format!("poll mode: {mode}"));
        }
        KeyCode::Char('[') => app.adjust_draft(0, -1),
        KeyCode::Char(']') => app.adjust_draft(0, 1),
        KeyCode::Char('{') => app.adjust_draft(-1, 0),
        KeyCode::Char('}') => app.adjust_draft(1, 0),
        KeyCode::Char('a') => {
            app.poller.apply_draft();
            let config = app.poller.config();
            app.status_note = Some(if config.applied.period().is_some() {
                format!("poll interval applied: {}", config.applied)
            } else {
                "poll interval 0s: automatic polling off".to_string()
            });
        }
        KeyCode::Char('e') => app.open_editor(),
        KeyCode::Tab => {
            app.focus = match app.focus {
                ProcessId::Tracker => ProcessId::Notifier,
                ProcessId::Notifier => ProcessId::Tracker,
            };
        }
        KeyCode::Up | KeyCode::Char('k') => app.scroll_focused(|view| view.scroll_by(-1)),
        KeyCode::Down | KeyCode::Char('j') => app.scroll_focused(|view| view.scroll_by(1)),
        KeyCode::PageUp => app.scroll_focused(|view| view.scroll_by(-page)),
        KeyCode::PageDown => app.scroll_focused(|view| view.scroll_by(page)),
        KeyCode::Home | KeyCode::Char('g') => app.scroll_focused(|view| view.scroll_to_top()),
        KeyCode::End | KeyCode::Char('G') => app.scroll_focused(|view| view.scroll_to_bottom()),
        _ => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcc_core::autoscroll::{AutoscrollPolicy, DEFAULT_ROW_SLACK};
    use pcc_core::console_ipc::{
        encode_frame, CommandPayload, LogPayload, ProcessCommand, StatusPayload, WireEnvelope,
        DEFAULT_MAX_FRAME_BYTES,
    };
    use pcc_core::health::PollMode;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTimers {
        live: Vec<TimerId>,
    }

    impl TimerDriver for FakeTimers {
        type Handle = TimerId;

        fn start(&mut self, timer_id: TimerId, _period: Duration) -> TimerId {
            self.live.push(timer_id);
            timer_id
        }

        fn cancel(&mut self, handle: TimerId) {
            self.live.retain(|id| *id != handle);
        }
    }

    fn test_app() -> App<FakeTimers> {
        test_app_with_capacity(100)
    }

    fn test_app_with_capacity(capacity: usize) -> App<FakeTimers> {
        let mut app = App::new(
            "http://127.0.0.1:6060".to_string(),
            Session::new(capacity, AutoscrollPolicy::new(DEFAULT_ROW_SLACK)),
            HealthPoller::new(FakeTimers::default(), PollInterval::new(1, 0)),
        );
        app.take_effects();
        app
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn frame(msg: WireMsg) -> Vec<u8> {
        encode_frame(&WireEnvelope::from_hub(msg), DEFAULT_MAX_FRAME_BYTES)
            .expect("encode")
            .into_bytes()
    }

    fn connect_and_sync(app: &mut App<FakeTimers>, conn_id: ConnId) {
        app.apply_hub_event(HubEvent::Connected(conn_id));
        for process in ProcessId::ALL {
            app.apply_hub_event(HubEvent::Frame(
                conn_id,
                frame(WireMsg::LogFull(LogPayload {
                    process,
                    data: String::new(),
                })),
            ));
        }
        app.take_effects();
    }

    #[test]
    fn connect_requests_a_snapshot_on_that_connection() {
        let mut app = test_app();
        app.apply_hub_event(HubEvent::Connected(4));
        let effects = app.take_effects();
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &effects[0],
            Effect::Send { conn_id: 4, msg: WireMsg::RequestSnapshot(_) }
        ));
    }

    #[test]
    fn toggle_keys_send_commands_but_do_not_change_state() {
        let mut app = test_app();
        connect_and_sync(&mut app, 1);

        assert!(!handle_key(key(KeyCode::Char('t')), &mut app));
        let effects = app.take_effects();
        assert_eq!(
            effects,
            vec![Effect::Send {
                conn_id: 1,
                msg: WireMsg::Command(CommandPayload {
                    command: ProcessCommand::Start,
                    process: ProcessId::Tracker,
                }),
            }]
        );
        assert!(!app.session.run_state(ProcessId::Tracker).is_running());
        assert_eq!(
            app.session.process_status(ProcessId::Tracker).pending,
            Some(ProcessCommand::Start)
        );

        app.apply_hub_event(HubEvent::Frame(
            1,
            frame(WireMsg::Status(StatusPayload {
                process: ProcessId::Tracker,
                running: true,
            })),
        ));
        assert!(app.session.run_state(ProcessId::Tracker).is_running());

        handle_key(key(KeyCode::Char('t')), &mut app);
        assert!(matches!(
            app.take_effects().as_slice(),
            [Effect::Send {
                msg: WireMsg::Command(CommandPayload { command: ProcessCommand::Stop, .. }),
                ..
            }]
        ));
    }

    #[test]
    fn offline_commands_are_not_queued() {
        let mut app = test_app();
        handle_key(key(KeyCode::Char('b')), &mut app);
        handle_key(key(KeyCode::Char('r')), &mut app);
        assert!(app.take_effects().is_empty());
        assert!(app.status_note.as_deref().unwrap_or_default().contains("offline"));
    }

    #[test]
    fn stale_disconnect_does_not_reset_the_session() {
        let mut app = test_app();
        connect_and_sync(&mut app, 1);
        app.apply_hub_event(HubEvent::Connected(2));
        app.apply_hub_event(HubEvent::Disconnected(1));
        assert_eq!(app.session.conn_id(), Some(2));
    }

    #[test]
    fn mode_toggle_probes_and_ticks_follow_the_active_timer() {
        let mut app = test_app();
        handle_key(key(KeyCode::Char('m')), &mut app);
        assert_eq!(app.poller.mode(), PollMode::Auto);
        assert!(matches!(app.take_effects().as_slice(), [Effect::Probe(None)]));
        let (timer_id, period) = app.poller.active_timer().expect("timer");
        assert_eq!(period, Duration::from_secs(60));

        app.on_timer_tick(timer_id);
        assert_eq!(app.take_effects().len(), 1);
        app.on_timer_tick(timer_id + 100);
        assert!(app.take_effects().is_empty());

        handle_key(key(KeyCode::Char('m')), &mut app);
        assert!(app.poller.active_timer().is_none());
        assert!(app.poller.driver().live.is_empty());
    }

    #[test]
    fn draft_changes_only_apply_on_request() {
        let mut app = test_app();
        handle_key(key(KeyCode::Char('m')), &mut app);
        for _ in 0..30 {
            handle_key(key(KeyCode::Char(']')), &mut app);
        }
        handle_key(key(KeyCode::Char('{')), &mut app);
        let config = app.poller.config();
        assert_eq!(config.draft, PollInterval::new(0, 30));
        assert_eq!(config.applied, PollInterval::new(1, 0));
        assert_eq!(app.poller.active_timer().map(|(_, period)| period), Some(Duration::from_secs(60)));

        handle_key(key(KeyCode::Char('a')), &mut app);
        assert_eq!(app.poller.active_timer().map(|(_, period)| period), Some(Duration::from_secs(30)));
        assert_eq!(app.poller.driver().live.len(), 1);
    }

    #[test]
    fn probe_results_carry_the_previous_record() {
        let mut app = test_app();
        let result = HealthResult::failure(None, Some(502), "bad gateway", chrono::Utc::now());
        app.on_probe_result(result.clone());
        handle_key(key(KeyCode::Char('p')), &mut app);
        assert_eq!(app.take_effects(), vec![Effect::Probe(Some(result))]);
    }

    #[test]
    fn editor_captures_keys_until_closed() {
        let mut app = test_app();
        app.on_settings_loaded(Ok(EnvSettings::default()));
        handle_key(key(KeyCode::Char('e')), &mut app);
        assert!(app.editor.is_some());

        handle_key(key(KeyCode::Char('q')), &mut app);
        assert!(app.editor.is_some());
        assert_eq!(
            app.editor.as_ref().map(|editor| editor.tracking_number.as_str()),
            Some("q")
        );

        let save = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        handle_key(save, &mut app);
        assert!(matches!(app.take_effects().as_slice(), [Effect::Save(_)]));

        app.on_save_result(SaveOutcome {
            ok: true,
            message: "updated 6 configuration values.".to_string(),
        });
        assert_eq!(app.save_note.as_deref(), Some("✔ updated 6 configuration values."));
        assert_eq!(app.take_effects(), vec![Effect::LoadSettings]);

        handle_key(key(KeyCode::Esc), &mut app);
        assert!(app.editor.is_none());
        assert!(handle_key(key(KeyCode::Char('q')), &mut app));
    }

    #[test]
    fn scrolling_up_stops_tailing() {
        let mut app = test_app();
        connect_and_sync(&mut app, 1);
        app.set_pane_heights([5, 5]);
        let text: String = (0..40).map(|n| format!("[TRACKER] line {n}\n")).collect();
        app.apply_hub_event(HubEvent::Frame(
            1,
            frame(WireMsg::LogIncremental(LogPayload {
                process: ProcessId::Tracker,
                data: text,
            })),
        ));
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 35);

        handle_key(key(KeyCode::PageUp), &mut app);
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 30);
        app.apply_hub_event(HubEvent::Frame(
            1,
            frame(WireMsg::LogIncremental(LogPayload {
                process: ProcessId::Tracker,
                data: "[TRACKER] more\n".to_string(),
            })),
        ));
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 30);

        handle_key(key(KeyCode::End), &mut app);
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 36);
    }

    #[test]
    fn paging_up_twice_is_not_pulled_back_by_new_lines() {
        let mut app = test_app_with_capacity(500);
        connect_and_sync(&mut app, 1);
        app.set_pane_heights([20, 20]);
        let text: String = (0..200).map(|n| format!("[TRACKER] line {n}\n")).collect();
        app.apply_hub_event(HubEvent::Frame(
            1,
            frame(WireMsg::LogIncremental(LogPayload {
                process: ProcessId::Tracker,
                data: text,
            })),
        ));
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 180);

        handle_key(key(KeyCode::PageUp), &mut app);
        handle_key(key(KeyCode::PageUp), &mut app);
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 140);
        app.apply_hub_event(HubEvent::Frame(
            1,
            frame(WireMsg::LogIncremental(LogPayload {
                process: ProcessId::Tracker,
                data: "[TRACKER] more\n".to_string(),
            })),
        ));
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 140);

        handle_key(key(KeyCode::End), &mut app);
        handle_key(key(KeyCode::Up), &mut app);
        app.apply_hub_event(HubEvent::Frame(
            1,
            frame(WireMsg::LogIncremental(LogPayload {
                process: ProcessId::Tracker,
                data: "[TRACKER] within slack\n".to_string(),
            })),
        ));
        assert_eq!(app.session.view(ProcessId::Tracker).viewport.scroll_top(), 182);
    }
}
