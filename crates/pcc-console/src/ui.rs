use crate::app::App;
use crate::editor::{ConfigEditor, Field};
use pcc_core::console_ipc::{ProcessCommand, ProcessId};
use pcc_core::health::{PollMode, TimerDriver};
use pcc_core::process_state::RunState;
use pcc_core::session::LinkPhase;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

const SIDE_BY_SIDE_WIDTH: u16 = 140;
const HEADER_HEIGHT: u16 = 5;
const HEALTH_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 1;

#[derive(Clone, Copy)]
pub struct ConsoleTheme {
    bg: Color,
    surface: Color,
    border: Color,
    focus: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
    info: Color,
}

pub fn console_theme() -> ConsoleTheme {
    ConsoleTheme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        focus: Color::Rgb(56, 189, 248),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
        info: Color::Rgb(59, 130, 246),
    }
}

struct ScreenAreas {
    header: Rect,
    health: Rect,
    panes: [Rect; 2],
    footer: Rect,
}

fn screen_areas(size: Rect) -> ScreenAreas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Length(HEALTH_HEIGHT),
            Constraint::Min(0),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(size);
    let direction = if size.width >= SIDE_BY_SIDE_WIDTH {
        Direction::Horizontal
    } else {
        Direction::Vertical
    };
    let panes = Layout::default()
        .direction(direction)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[2]);
    ScreenAreas {
        header: rows[0],
        health: rows[1],
        panes: [panes[0], panes[1]],
        footer: rows[3],
    }
}

/// Visible log rows per pane for a terminal of the given size.
pub fn log_pane_heights(size: Rect) -> [u16; 2] {
    let areas = screen_areas(size);
    areas.panes.map(|pane| pane.height.saturating_sub(2))
}

pub fn render_ui<D: TimerDriver>(frame: &mut ratatui::Frame, app: &App<D>) {
    let size = frame.size();
    let theme = console_theme();
    let areas = screen_areas(size);
    frame.render_widget(render_header(app, theme), areas.header);
    frame.render_widget(render_health(app, theme), areas.health);
    for process in ProcessId::ALL {
        frame.render_widget(
            render_log_pane(app, process, theme),
            areas.panes[process.index()],
        );
    }
    frame.render_widget(render_footer(theme), areas.footer);
    if let Some(editor) = app.editor.as_ref() {
        render_editor_overlay(frame, editor, app.save_note.as_deref(), theme);
    } else if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn titled_block(title: String, border: Color, theme: ConsoleTheme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(theme.bg))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn phase_color(phase: LinkPhase, theme: ConsoleTheme) -> Color {
    match phase {
        LinkPhase::Live => theme.ok,
        LinkPhase::AwaitingSnapshot => theme.warn,
        LinkPhase::Disconnected => theme.critical,
    }
}

fn process_spans<D: TimerDriver>(app: &App<D>, process: ProcessId, theme: ConsoleTheme) -> Vec<Span<'static>> {
    let status = app.session.process_status(process);
    let color = match status.state {
        RunState::Running => theme.ok,
        RunState::Stopped => theme.muted,
    };
    let mut spans = vec![
        Span::styled(
            format!("{}: ", process.display_name()),
            Style::default().fg(theme.text),
        ),
        Span::styled(
            status.state.as_str().to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(command) = status.pending {
        let label = match command {
            ProcessCommand::Start => " (start requested)",
            ProcessCommand::Stop => " (stop requested)",
        };
        spans.push(Span::styled(label, Style::default().fg(theme.warn)));
    }
    spans
}

fn status_note_color(note: &str, theme: ConsoleTheme) -> Color {
    let normalized = note.to_ascii_lowercase();
    if normalized.contains("failed") || normalized.contains("error") || normalized.contains("offline") {
        return theme.critical;
    }
    if normalized.contains("requested") || normalized.contains("connected") {
        return theme.info;
    }
    theme.warn
}

fn render_header<D: TimerDriver>(app: &App<D>, theme: ConsoleTheme) -> Paragraph<'static> {
    let phase = app.session.phase();
    let mut hub_line = vec![
        Span::styled("Hub: ", Style::default().fg(theme.muted)),
        Span::styled(app.hub_url.clone(), Style::default().fg(theme.text)),
        Span::raw("  "),
        Span::styled(
            phase.as_str(),
            Style::default()
                .fg(phase_color(phase, theme))
                .add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(conn_id) = app.session.conn_id() {
        hub_line.push(Span::styled(
            format!("  conn #{conn_id}"),
            Style::default().fg(theme.muted),
        ));
    }

    let mut process_line = process_spans(app, ProcessId::Tracker, theme);
    process_line.push(Span::raw("   "));
    process_line.extend(process_spans(app, ProcessId::Notifier, theme));

    let action = match app.status_note.as_deref() {
        Some(note) => Line::from(Span::styled(
            format!("Last action: {note}"),
            Style::default().fg(status_note_color(note, theme)),
        )),
        None => Line::from(Span::styled(
            "Last action: ready (? help)",
            Style::default().fg(theme.muted),
        )),
    };

    Paragraph::new(Text::from(vec![
        Line::from(hub_line),
        Line::from(process_line),
        action,
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(titled_block("Package Console".to_string(), theme.border, theme))
}

fn render_health<D: TimerDriver>(app: &App<D>, theme: ConsoleTheme) -> Paragraph<'static> {
    let mut spans = Vec::new();
    match app.poller.last_result() {
        Some(result) => {
            let color = if result.ok {
                theme.ok
            } else if result.configured {
                theme.critical
            } else {
                theme.warn
            };
            spans.push(Span::styled(
                result.summary(),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::styled(
                format!(
                    "  checked {}",
                    result.checked_at.with_timezone(&chrono::Local).format("%H:%M:%S")
                ),
                Style::default().fg(theme.muted),
            ));
        }
        None => spans.push(Span::styled("not checked yet", Style::default().fg(theme.muted))),
    }

    let config = app.poller.config();
    let mode_color = match config.mode {
        PollMode::Auto => theme.accent,
        PollMode::Manual => theme.muted,
    };
    spans.push(Span::raw("  │  "));
    spans.push(Span::styled(
        format!("poll {}", config.mode),
        Style::default().fg(mode_color),
    ));
    let applied = if config.applied.period().is_some() {
        format!(" every {}", config.applied)
    } else {
        " off (0s)".to_string()
    };
    spans.push(Span::styled(applied, Style::default().fg(theme.text)));
    let (draft_text, draft_color) = if config.draft == config.applied {
        (format!("  draft {}", config.draft), theme.muted)
    } else {
        (format!("  draft {} (a to apply)", config.draft), theme.warn)
    };
    spans.push(Span::styled(draft_text, Style::default().fg(draft_color)));

    Paragraph::new(Line::from(spans))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(titled_block("Relay Health".to_string(), theme.border, theme))
}

fn log_line_color(line: &str, theme: ConsoleTheme) -> Color {
    if line.starts_with("[SYSTEM]") {
        return theme.info;
    }
    let normalized = line.to_ascii_lowercase();
    if normalized.contains("error") || normalized.contains("failed") || normalized.contains("traceback") {
        return theme.critical;
    }
    if normalized.contains("warn") {
        return theme.warn;
    }
    theme.text
}

fn render_log_pane<D: TimerDriver>(app: &App<D>, process: ProcessId, theme: ConsoleTheme) -> Paragraph<'static> {
    let view = app.session.view(process);
    let lines: Vec<Line<'static>> = view
        .logs
        .lines()
        .map(|line| {
            Line::from(Span::styled(
                line.to_string(),
                Style::default().fg(log_line_color(line, theme)),
            ))
        })
        .collect();
    let mut title = format!("{} log · {}", process.display_name(), app.session.run_state(process));
    if !view.is_synced() {
        title.push_str(" · stale");
    }
    let border = if app.focus == process && app.editor.is_none() {
        theme.focus
    } else {
        theme.border
    };
    let scroll = u16::try_from(view.viewport.scroll_top()).unwrap_or(u16::MAX);
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(titled_block(title, border, theme))
        .scroll((scroll, 0))
}

fn render_footer(theme: ConsoleTheme) -> Paragraph<'static> {
    Paragraph::new(Line::from(Span::styled(
        " t tracker · b bark · r refresh · p probe · m mode · [ ] { } draft · a apply · e config · Tab pane · ? help · q quit",
        Style::default().fg(theme.muted),
    )))
    .style(Style::default().bg(theme.bg))
}

fn render_editor_overlay(
    frame: &mut ratatui::Frame,
    editor: &ConfigEditor,
    save_note: Option<&str>,
    theme: ConsoleTheme,
) {
    let area = centered_rect(72, 80, frame.size());
    let mut lines = Vec::new();
    for field in editor.fields() {
        if field == Field::RawQuery {
            lines.push(Line::from(""));
        }
        let focused = editor.focus() == field;
        let marker = if focused { "▶ " } else { "  " };
        let label_style = if focused {
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.muted)
        };
        let value_style = if focused {
            Style::default()
                .fg(theme.text)
                .add_modifier(Modifier::REVERSED)
        } else {
            Style::default().fg(theme.text)
        };
        let label = match field {
            Field::Param(_) => "  ·".to_string(),
            other => other.label().to_string(),
        };
        lines.push(Line::from(vec![
            Span::styled(marker, label_style),
            Span::styled(format!("{label:<20}"), label_style),
            Span::styled(editor.value_of(field), value_style),
        ]));
    }
    lines.extend([
        Line::from(""),
        Line::from(Span::styled(
            "Tab/↑↓ move · ←→ cycle values · Enter toggle/add · Del remove · Ctrl-S save · Esc close",
            Style::default().fg(theme.muted),
        )),
    ]);
    if let Some(note) = save_note {
        let color = if note.starts_with('✔') {
            theme.ok
        } else if note.starts_with('✖') {
            theme.critical
        } else {
            theme.info
        };
        lines.push(Line::from(Span::styled(
            note.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )));
    }
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(theme.border))
                    .style(Style::default().bg(theme.surface))
                    .title(Span::styled(
                        "Configuration",
                        Style::default()
                            .fg(theme.title)
                            .add_modifier(Modifier::BOLD),
                    )),
            )
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: ConsoleTheme) {
    let area = centered_rect(70, 70, frame.size());
    let heading = |text: &'static str| {
        Line::from(Span::styled(
            text,
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ))
    };
    let lines = vec![
        heading("Processes"),
        Line::from("  t        start/stop the tracking script"),
        Line::from("  b        start/stop the bark server"),
        Line::from("  r        request a fresh snapshot from the hub"),
        Line::from(""),
        heading("Relay health"),
        Line::from("  p        probe now"),
        Line::from("  m        toggle manual/auto polling"),
        Line::from("  [ ]      draft seconds -/+"),
        Line::from("  { }      draft minutes -/+"),
        Line::from("  a        apply draft interval"),
        Line::from(""),
        heading("Logs"),
        Line::from("  Tab      switch pane"),
        Line::from("  ↑/↓ j/k  scroll one line"),
        Line::from("  PgUp/Dn  scroll one page"),
        Line::from("  Home/End jump to top/bottom (bottom resumes tailing)"),
        Line::from("           panes within --slack rows of the bottom keep tailing"),
        Line::from(""),
        heading("Other"),
        Line::from("  e        edit configuration"),
        Line::from("  ? or F1  toggle this help"),
        Line::from("  q        quit"),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(theme.border))
                    .style(Style::default().bg(theme.surface))
                    .title(Span::styled(
                        "Help",
                        Style::default()
                            .fg(theme.title)
                            .add_modifier(Modifier::BOLD),
                    )),
            )
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}
