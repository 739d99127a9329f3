mod api;
mod app;
mod editor;
mod hub_link;
mod timer;
mod ui;

use api::HubApi;
use app::{handle_input, App, Effect};
use clap::Parser;
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use hub_link::{hub_loop, HubCommand, LinkConfig};
use pcc_core::autoscroll::{AutoscrollPolicy, DEFAULT_ROW_SLACK};
use pcc_core::health::{HealthPoller, PollInterval};
use pcc_core::session::Session;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{error::Error, fs::OpenOptions, io, path::PathBuf, sync::Mutex, time::Duration};
use timer::TokioTimerDriver;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_HUB_URL: &str = "http://127.0.0.1:6060";
const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
struct Config {
    hub_url: Url,
    client_id: String,
    debug: bool,
    log_dir: String,
    capacity: usize,
    slack: i64,
    poll_interval: PollInterval,
    request_timeout: Duration,
}

#[derive(Parser, Debug)]
#[command(name = "pcc-console")]
struct Args {
    #[arg(long, default_value = "")]
    hub_url: String,
    #[arg(long, default_value = "")]
    client_id: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 500)]
    capacity: usize,
    /// Rows from the bottom that still count as tailing.
    #[arg(long, default_value_t = DEFAULT_ROW_SLACK)]
    slack: i64,
    #[arg(long, default_value_t = 60)]
    poll_seconds: u64,
    #[arg(long, default_value_t = 10)]
    request_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config()?;
    init_logging(&config);
    info!(event = "console_start", hub = %config.hub_url, client_id = %config.client_id);

    let api = HubApi::new(config.hub_url.clone(), config.request_timeout)?;
    let link = LinkConfig {
        ws_url: hub_link::ws_url(&config.hub_url)?,
        client_id: config.client_id.clone(),
    };

    let (hub_tx, mut hub_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel::<HubCommand>(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(hub_loop(link, hub_tx, cmd_rx));

    let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
    let (probe_tx, mut probe_rx) = mpsc::unbounded_channel();
    let (save_tx, mut save_rx) = mpsc::unbounded_channel();
    let (settings_tx, mut settings_rx) = mpsc::unbounded_channel();

    let session = Session::new(config.capacity, AutoscrollPolicy::new(config.slack));
    let poller = HealthPoller::new(TokioTimerDriver::new(tick_tx), config.poll_interval);
    let mut app = App::new(config.hub_url.to_string(), session, poller);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();

    loop {
        for effect in app.take_effects() {
            match effect {
                Effect::Send { conn_id, msg } => {
                    if let Err(err) = cmd_tx.try_send(HubCommand { conn_id, msg }) {
                        warn!(event = "hub_command_dropped", error = %err);
                        app.status_note = Some("command queue full; request dropped".to_string());
                    }
                }
                Effect::Probe(previous) => {
                    let api = api.clone();
                    let probe_tx = probe_tx.clone();
                    tokio::spawn(async move {
                        let _ = probe_tx.send(api.probe(previous).await);
                    });
                }
                Effect::Save(values) => {
                    let api = api.clone();
                    let save_tx = save_tx.clone();
                    tokio::spawn(async move {
                        let _ = save_tx.send(api.save_settings(&values).await);
                    });
                }
                Effect::LoadSettings => {
                    let api = api.clone();
                    let settings_tx = settings_tx.clone();
                    tokio::spawn(async move {
                        let result = api.load_settings().await.map_err(|err| err.to_string());
                        let _ = settings_tx.send(result);
                    });
                }
            }
        }

        let size = terminal.size()?;
        app.set_pane_heights(ui::log_pane_heights(size));
        terminal.draw(|frame| ui::render_ui(frame, &app))?;

        tokio::select! {
            Some(event) = hub_rx.recv() => {
                app.apply_hub_event(event);
            }
            Some(timer_id) = tick_rx.recv() => {
                app.on_timer_tick(timer_id);
            }
            Some(result) = probe_rx.recv() => {
                app.on_probe_result(result);
            }
            Some(outcome) = save_rx.recv() => {
                app.on_save_result(outcome);
            }
            Some(settings) = settings_rx.recv() => {
                app.on_settings_loaded(settings);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(event)) => {
                        if handle_input(event, &mut app) {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(event = "terminal_event_error", error = %err);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    app.shutdown();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!(event = "console_stop");
    Ok(())
}

fn load_config() -> Result<Config, Box<dyn Error>> {
    let args = Args::parse();
    let hub_url = Url::parse(&resolve_setting(&args.hub_url, "PCC_HUB_URL", DEFAULT_HUB_URL))?;
    let client_id = if args.client_id.trim().is_empty() {
        format!("pcc-console-{}", std::process::id())
    } else {
        args.client_id
    };
    Ok(Config {
        hub_url,
        client_id,
        debug: args.debug || env_true("PCC_CONSOLE_DEBUG"),
        log_dir: resolve_setting(&args.log_dir, "PCC_LOG_DIR", "logs"),
        capacity: args.capacity.max(1),
        slack: args.slack.max(0),
        poll_interval: PollInterval::from_total_seconds(args.poll_seconds),
        request_timeout: Duration::from_secs(args.request_timeout.max(1)),
    })
}

/// The terminal belongs to the UI, so logs only go to the console log file.
fn init_logging(config: &Config) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("PCC_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let dir = PathBuf::from(&config.log_dir);
    let file = std::fs::create_dir_all(&dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("pcc-console.log"))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);
    let result = match file {
        Ok(file) => builder.with_writer(Mutex::new(file)).try_init(),
        Err(_) => builder.with_writer(io::sink).try_init(),
    };
    if let Err(err) = result {
        eprintln!("logging_init_error: {err}");
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_setting(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}
