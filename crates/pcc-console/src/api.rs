use chrono::{DateTime, Utc};
use pcc_core::env_config::{format_enabled_flag, EnvSettings, DISPLAY_KEYS, KEY_CHECK_INTERVAL};
use pcc_core::health::HealthResult;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid endpoint {path}: {reason}")]
    Endpoint { path: String, reason: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response (HTTP {status})")]
    Body { status: u16 },
}

/// Outcome of a configuration save, rendered as a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub ok: bool,
    pub message: String,
}

impl SaveOutcome {
    pub fn line(&self) -> String {
        let marker = if self.ok { "✔" } else { "✖" };
        format!("{marker} {}", self.message)
    }
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

pub fn save_outcome_from(http_status: u16, body: &[u8]) -> SaveOutcome {
    match serde_json::from_slice::<StatusReply>(body) {
        Ok(reply) => SaveOutcome {
            ok: (200..300).contains(&http_status) && reply.status == "success",
            message: if reply.message.is_empty() {
                format!("hub answered HTTP {http_status}")
            } else {
                reply.message
            },
        },
        Err(_) => SaveOutcome {
            ok: false,
            message: format!("unexpected response from hub (HTTP {http_status})"),
        },
    }
}

/// Keeps only the displayed keys and stringifies what the hub returned.
pub fn settings_from_json(values: &serde_json::Map<String, serde_json::Value>) -> BTreeMap<String, String> {
    DISPLAY_KEYS
        .iter()
        .filter_map(|key| {
            let value = values.get(*key)?;
            let text = match value {
                serde_json::Value::String(text) => text.clone(),
                serde_json::Value::Number(number) => number.to_string(),
                serde_json::Value::Bool(flag) => format_enabled_flag(*flag).to_string(),
                _ => return None,
            };
            Some((key.to_string(), text))
        })
        .collect()
}

#[derive(Clone)]
pub struct HubApi {
    client: reqwest::Client,
    base: Url,
}

impl HubApi {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(path).map_err(|err| ApiError::Endpoint {
            path: path.to_string(),
            reason: err.to_string(),
        })
    }

    /// Never fails: transport problems and malformed answers become a failed
    /// result that keeps the last known relay url.
    pub async fn probe(&self, previous: Option<HealthResult>) -> HealthResult {
        let checked_at: DateTime<Utc> = Utc::now();
        let url = match self.endpoint("remote_bark_status") {
            Ok(url) => url,
            Err(err) => return HealthResult::failure(previous.as_ref(), None, err.to_string(), checked_at),
        };
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                return HealthResult::failure(
                    previous.as_ref(),
                    err.status().map(|status| status.as_u16()),
                    format!("hub unreachable: {err}"),
                    checked_at,
                )
            }
        };
        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => HealthResult::from_response(previous.as_ref(), status, &body, checked_at),
            Err(err) => HealthResult::failure(previous.as_ref(), Some(status), err.to_string(), checked_at),
        }
    }

    pub async fn load_settings(&self) -> Result<EnvSettings, ApiError> {
        let response = self.client.get(self.endpoint("env")?).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        let values: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&body).map_err(|_| ApiError::Body { status })?;
        if !(200..300).contains(&status) {
            return Err(ApiError::Body { status });
        }
        let mut map = settings_from_json(&values);
        match EnvSettings::from_map(&map) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!(event = "env_settings_invalid", error = %err);
                map.remove(KEY_CHECK_INTERVAL);
                Ok(EnvSettings::from_map(&map).unwrap_or_default())
            }
        }
    }

    pub async fn save_settings(&self, values: &BTreeMap<String, String>) -> SaveOutcome {
        let url = match self.endpoint("update_env") {
            Ok(url) => url,
            Err(err) => {
                return SaveOutcome {
                    ok: false,
                    message: err.to_string(),
                }
            }
        };
        let response = match self.client.post(url).json(values).send().await {
            Ok(response) => response,
            Err(err) => {
                return SaveOutcome {
                    ok: false,
                    message: format!("failed to save configuration: {err}"),
                }
            }
        };
        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => save_outcome_from(status, &body),
            Err(err) => SaveOutcome {
                ok: false,
                message: format!("failed to save configuration: {err}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_outcome_reads_hub_reply() {
        let body = json!({ "status": "success", "message": "updated 3 configuration values." });
        let outcome = save_outcome_from(200, body.to_string().as_bytes());
        assert!(outcome.ok);
        assert_eq!(outcome.line(), "✔ updated 3 configuration values.");

        let body = json!({ "status": "error", "message": "invalid request data" });
        let outcome = save_outcome_from(400, body.to_string().as_bytes());
        assert!(!outcome.ok);
        assert_eq!(outcome.line(), "✖ invalid request data");
    }

    #[test]
    fn non_json_save_reply_is_a_failure() {
        let outcome = save_outcome_from(502, b"<html>bad gateway</html>");
        assert!(!outcome.ok);
        assert!(outcome.message.contains("HTTP 502"));
    }

    #[test]
    fn settings_from_json_filters_and_stringifies() {
        let value = json!({
            "CHECK_INTERVAL": 120,
            "BARK_URL_ENABLED": true,
            "BARK_KEY": "abc",
            "UNRELATED": "x",
            "BARK_SERVER": null
        });
        let map = settings_from_json(value.as_object().expect("object"));
        assert_eq!(map.get("CHECK_INTERVAL").map(String::as_str), Some("120"));
        assert_eq!(map.get("BARK_URL_ENABLED").map(String::as_str), Some("1"));
        assert_eq!(map.get("BARK_KEY").map(String::as_str), Some("abc"));
        assert!(!map.contains_key("UNRELATED"));
        assert!(!map.contains_key("BARK_SERVER"));
    }

    #[test]
    fn endpoints_keep_a_base_path() {
        let api = HubApi::new(
            Url::parse("http://127.0.0.1:6060/console").expect("url"),
            Duration::from_secs(1),
        )
        .expect("client");
        assert_eq!(
            api.endpoint("update_env").expect("endpoint").as_str(),
            "http://127.0.0.1:6060/console/update_env"
        );
        let api = HubApi::new(Url::parse("http://127.0.0.1:6060").expect("url"), Duration::from_secs(1))
            .expect("client");
        assert_eq!(
            api.endpoint("env").expect("endpoint").as_str(),
            "http://127.0.0.1:6060/env"
        );
    }

    #[tokio::test]
    async fn unreachable_hub_probe_keeps_previous_url() {
        let api = HubApi::new(Url::parse("http://127.0.0.1:9").expect("url"), Duration::from_millis(500))
            .expect("client");
        let previous = HealthResult::from_response(
            None,
            200,
            json!({ "configured": true, "url": "https://relay.example", "ok": true }).to_string().as_bytes(),
            Utc::now(),
        );
        let result = api.probe(Some(previous)).await;
        assert!(!result.ok);
        assert!(result.configured);
        assert_eq!(result.url, "https://relay.example");
        assert!(result.error.is_some());
    }
}
