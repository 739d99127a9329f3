use crate::hub::HubState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use pcc_core::console_ipc::ProcessId;
use pcc_core::env_config::{EnvSettings, DISPLAY_KEYS};
use pcc_core::health::HealthReport;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("relay not configured")]
    NotConfigured,
    #[error("invalid relay url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("relay request failed: {0}")]
    Request(#[from] reqwest::Error),
}

fn reply(status: StatusCode, outcome: &str, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "status": outcome, "message": message.into() })),
    )
}

pub async fn env_values(State(hub): State<Arc<HubState>>) -> (StatusCode, Json<Value>) {
    match hub.env_file.read_keys(&DISPLAY_KEYS) {
        Ok(values) => (StatusCode::OK, Json(json!(values))),
        Err(err) => {
            warn!(event = "env_read_failed", error = %err);
            reply(StatusCode::INTERNAL_SERVER_ERROR, "error", err.to_string())
        }
    }
}

pub async fn update_env(
    State(hub): State<Arc<HubState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let object = match body {
        Ok(Json(Value::Object(object))) if !object.is_empty() => object,
        _ => return reply(StatusCode::BAD_REQUEST, "error", "invalid request data"),
    };

    let mut values = BTreeMap::new();
    let mut errors = Vec::new();
    for (key, value) in object {
        match value {
            Value::String(text) => {
                values.insert(key, text);
            }
            Value::Number(number) => {
                values.insert(key, number.to_string());
            }
            other => errors.push(format!("{key}: unsupported value {other}")),
        }
    }

    let report = match hub.env_file.update(&values) {
        Ok(report) => report,
        Err(err) => {
            warn!(event = "env_write_failed", error = %err);
            errors.push(err.to_string());
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error",
                format!("no values were updated: {}", errors.join("; ")),
            );
        }
    };
    errors.extend(report.errors);

    if report.updated.is_empty() {
        return reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error",
            format!("no values were updated: {}", errors.join("; ")),
        );
    }

    let mut message = format!("updated {} configuration values.", report.updated.len());
    if !errors.is_empty() {
        message.push_str(&format!(" some values failed: {}", errors.join("; ")));
    }
    info!(event = "env_updated", keys = ?report.updated, failed = errors.len());
    hub.emit_log(
        ProcessId::Tracker,
        &format!("[SYSTEM] {message}\n[SYSTEM] changes apply the next time the processes start."),
    )
    .await;
    reply(StatusCode::OK, "success", message)
}

fn ping_url(server: &str) -> Result<reqwest::Url, ProbeError> {
    let base = server.trim().trim_end_matches('/');
    reqwest::Url::parse(&format!("{base}/ping")).map_err(|err| ProbeError::InvalidUrl {
        url: server.to_string(),
        reason: err.to_string(),
    })
}

/// One GET against the relay's ping endpoint. Non-2xx answers are a report
/// with `ok: false`; only transport problems are errors.
pub async fn probe_relay(
    http: &reqwest::Client,
    settings: &EnvSettings,
    timeout: Duration,
) -> Result<HealthReport, ProbeError> {
    if !settings.relay_configured() {
        return Err(ProbeError::NotConfigured);
    }
    let url = ping_url(&settings.bark_server)?;
    let started = Instant::now();
    let response = http.get(url).timeout(timeout).send().await?;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    let status = response.status();
    Ok(HealthReport {
        configured: true,
        url: settings.bark_server.clone(),
        ok: status.is_success(),
        status_code: Some(status.as_u16()),
        latency_ms: Some(latency_ms),
        error: if status.is_success() {
            None
        } else {
            Some(format!("relay answered HTTP {}", status.as_u16()))
        },
    })
}

pub async fn remote_bark_status(State(hub): State<Arc<HubState>>) -> Json<HealthReport> {
    let settings = match hub
        .env_file
        .read_values()
        .map_err(|err| err.to_string())
        .and_then(|values| EnvSettings::from_map(&values).map_err(|err| err.to_string()))
    {
        Ok(settings) => settings,
        Err(err) => {
            return Json(HealthReport {
                error: Some(err),
                ..HealthReport::default()
            })
        }
    };

    let report = match probe_relay(&hub.http, &settings, hub.config.probe_timeout).await {
        Ok(report) => report,
        Err(ProbeError::NotConfigured) => HealthReport {
            configured: false,
            url: settings.bark_server.clone(),
            error: Some("relay disabled or BARK_SERVER is empty".to_string()),
            ..HealthReport::default()
        },
        Err(err) => {
            let status_code = match &err {
                ProbeError::Request(inner) => inner.status().map(|status| status.as_u16()),
                _ => None,
            };
            HealthReport {
                configured: true,
                url: settings.bark_server.clone(),
                ok: false,
                status_code,
                latency_ms: None,
                error: Some(err.to_string()),
            }
        }
    };
    info!(
        event = "relay_probe",
        configured = report.configured,
        ok = report.ok,
        status_code = ?report.status_code
    );
    Json(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ProcessHistory;
    use crate::Config;
    use axum::{routing::get, Router};

    fn hub_in(dir: &tempfile::TempDir, env: &str) -> Arc<HubState> {
        let config = Config::for_tests(dir.path());
        std::fs::write(&config.env_file, env).expect("write env");
        let histories = [
            ProcessHistory::in_memory(ProcessId::Tracker, 50),
            ProcessHistory::in_memory(ProcessId::Notifier, 50),
        ];
        Arc::new(HubState::new(config, histories, reqwest::Client::new()))
    }

    async fn serve_ping(status: StatusCode) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = Router::new().route("/ping", get(move || async move { (status, "pong") }));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hub = hub_in(&dir, "");
        let (status, Json(body)) = update_env(State(hub), Ok(Json(json!({})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn update_writes_file_and_logs_a_notice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hub = hub_in(&dir, "CHECK_INTERVAL=300\n");
        let (status, Json(body)) = update_env(
            State(hub.clone()),
            Ok(Json(json!({ "CHECK_INTERVAL": "95", "BARK_URL_ENABLED": "1" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let values = hub.env_file.read_values().expect("read");
        assert_eq!(values.get("CHECK_INTERVAL").map(String::as_str), Some("95"));
        let log = hub.history_text(ProcessId::Tracker).await;
        assert!(log.contains("[SYSTEM] updated 2 configuration values.\n"));
        assert!(log.ends_with("[SYSTEM] changes apply the next time the processes start.\n"));
    }

    #[tokio::test]
    async fn update_with_only_bad_keys_is_a_server_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hub = hub_in(&dir, "");
        let (status, Json(body)) =
            update_env(State(hub), Ok(Json(json!({ "BAD KEY": "1" })))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn env_values_only_exposes_display_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hub = hub_in(&dir, "BARK_KEY=abc\nUNRELATED=1\n");
        let (status, Json(body)) = env_values(State(hub)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "BARK_KEY": "abc" }));
    }

    #[tokio::test]
    async fn disabled_relay_reports_not_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hub = hub_in(&dir, "BARK_SERVER=https://relay.example\nBARK_URL_ENABLED=0\n");
        let Json(report) = remote_bark_status(State(hub)).await;
        assert!(!report.configured);
        assert!(!report.ok);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn healthy_relay_reports_ok_with_latency() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = serve_ping(StatusCode::OK).await;
        let hub = hub_in(&dir, &format!("BARK_SERVER={server}/\nBARK_URL_ENABLED=1\n"));
        let Json(report) = remote_bark_status(State(hub)).await;
        assert!(report.configured);
        assert!(report.ok, "{report:?}");
        assert_eq!(report.status_code, Some(200));
        assert!(report.latency_ms.is_some());
    }

    #[tokio::test]
    async fn failing_relay_reports_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = serve_ping(StatusCode::SERVICE_UNAVAILABLE).await;
        let hub = hub_in(&dir, &format!("BARK_SERVER={server}\nBARK_URL_ENABLED=1\n"));
        let Json(report) = remote_bark_status(State(hub)).await;
        assert!(!report.ok);
        assert_eq!(report.status_code, Some(503));
    }

    #[test]
    fn ping_url_joins_without_double_slash() {
        let url = ping_url("https://relay.example/base/").expect("url");
        assert_eq!(url.as_str(), "https://relay.example/base/ping");
        assert!(ping_url("not a url").is_err());
    }
}
