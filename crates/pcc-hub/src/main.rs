mod env_file;
mod history;
mod http;
mod hub;
mod supervisor;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use history::ProcessHistory;
use hub::HubState;
use pcc_core::console_ipc::ProcessId;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ADDR: &str = "0.0.0.0:6060";
const DEFAULT_TRACKER_CMD: &str = "python3 -u main.py";
const DEFAULT_NOTIFIER_CMD: &str = "./bark-server_linux_amd64 -addr 0.0.0.0:8080 -data ./bark-data";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub debug: bool,
    pub stale_seconds: u64,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub probe_timeout: Duration,
    pub log_dir: String,
    pub env_file: PathBuf,
    pub history_lines: usize,
    pub snapshot_lines: usize,
    pub tracker_cmd: Vec<String>,
    pub notifier_cmd: Vec<String>,
}

impl Config {
    pub fn command_for(&self, process: ProcessId) -> &[String] {
        match process {
            ProcessId::Tracker => &self.tracker_cmd,
            ProcessId::Notifier => &self.notifier_cmd,
        }
    }

    #[cfg(test)]
    pub fn for_tests(dir: &std::path::Path) -> Self {
        Self {
            addr: "127.0.0.1:0".to_string(),
            debug: false,
            stale_seconds: 0,
            ping_interval: Duration::ZERO,
            write_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
            log_dir: dir.join("logs").display().to_string(),
            env_file: dir.join(".env"),
            history_lines: 100,
            snapshot_lines: 100,
            tracker_cmd: split_command(DEFAULT_TRACKER_CMD),
            notifier_cmd: split_command(DEFAULT_NOTIFIER_CMD),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pcc-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 30)]
    stale_seconds: u64,
    #[arg(long, default_value_t = 10)]
    ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value_t = 5)]
    probe_timeout: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value = "")]
    env_file: String,
    #[arg(long, default_value_t = 5000)]
    history_lines: usize,
    #[arg(long, default_value_t = 500)]
    snapshot_lines: usize,
    #[arg(long, default_value = "")]
    tracker_cmd: String,
    #[arg(long, default_value = "")]
    notifier_cmd: String,
}

pub fn build_router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws", get(hub::ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/env", get(http::env_values))
        .route("/update_env", post(http::update_env))
        .route("/remote_bark_status", get(http::remote_bark_status))
        .with_state(hub)
}

async fn open_history(config: &Config, process: ProcessId) -> ProcessHistory {
    let log_dir = PathBuf::from(&config.log_dir);
    match ProcessHistory::open(process, config.history_lines, &log_dir).await {
        Ok(history) => {
            info!(
                event = "history_loaded",
                process = %process,
                lines = history.buffer().len(),
                path = ?history.path()
            );
            history
        }
        Err(err) => {
            warn!(event = "history_unavailable", process = %process, error = %err);
            ProcessHistory::in_memory(process, config.history_lines)
        }
    }
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let http = match reqwest::Client::builder()
        .timeout(config.probe_timeout)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            error!(event = "http_client_error", error = %err);
            return;
        }
    };
    let histories = [
        open_history(&config, ProcessId::Tracker).await,
        open_history(&config, ProcessId::Notifier).await,
    ];
    let hub = Arc::new(HubState::new(config.clone(), histories, http));
    hub.clone().start_stale_reaper();

    let app = build_router(hub.clone());
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        env_file = %config.env_file.display(),
        log_dir = %config.log_dir
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "hub_error", error = %err);
    }
    hub.kill_all().await;
    info!(event = "hub_stop");
}

fn load_config() -> Config {
    let args = Args::parse();
    let debug = args.debug || env_true("PCC_HUB_DEBUG");
    Config {
        addr: resolve_setting(&args.addr, "PCC_HUB_ADDR", DEFAULT_ADDR),
        debug,
        stale_seconds: args.stale_seconds,
        ping_interval: Duration::from_secs(args.ping_interval),
        write_timeout: Duration::from_secs(args.write_timeout),
        probe_timeout: Duration::from_secs(args.probe_timeout.max(1)),
        log_dir: resolve_setting(&args.log_dir, "PCC_LOG_DIR", "logs"),
        env_file: PathBuf::from(resolve_setting(&args.env_file, "PCC_ENV_FILE", ".env")),
        history_lines: args.history_lines.max(1),
        snapshot_lines: args.snapshot_lines.max(1),
        tracker_cmd: split_command(&resolve_setting(
            &args.tracker_cmd,
            "PCC_TRACKER_CMD",
            DEFAULT_TRACKER_CMD,
        )),
        notifier_cmd: split_command(&resolve_setting(
            &args.notifier_cmd,
            "PCC_NOTIFIER_CMD",
            DEFAULT_NOTIFIER_CMD,
        )),
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("PCC_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Tees log output to stdout and the hub log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("pcc-hub.log"))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
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

/// Whitespace-separated argv; managed commands do not need shell quoting.
fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
