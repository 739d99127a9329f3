//! Configuration keys shared by the hub's `.env` endpoints and the console's
//! editor, plus the catalog of known relay query parameters.

use crate::query::ParamSet;
use std::collections::BTreeMap;
use thiserror::Error;

pub const KEY_TRACKING_NUMBER: &str = "TRACKING_NUMBER";
pub const KEY_CHECK_INTERVAL: &str = "CHECK_INTERVAL";
pub const KEY_BARK_SERVER: &str = "BARK_SERVER";
pub const KEY_BARK_KEY: &str = "BARK_KEY";
pub const KEY_BARK_QUERY_PARAMS: &str = "BARK_QUERY_PARAMS";
pub const KEY_BARK_URL_ENABLED: &str = "BARK_URL_ENABLED";

pub const DISPLAY_KEYS: [&str; 6] = [
    KEY_TRACKING_NUMBER,
    KEY_CHECK_INTERVAL,
    KEY_BARK_SERVER,
    KEY_BARK_KEY,
    KEY_BARK_QUERY_PARAMS,
    KEY_BARK_URL_ENABLED,
];

pub const DEFAULT_QUERY_PARAMS: &str = "?sound=minuet&level=timeSensitive";
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvConfigError {
    #[error("{key} must be a whole number of seconds, got {value:?}")]
    InvalidInterval { key: &'static str, value: String },
    #[error("configuration key must not be empty")]
    EmptyKey,
    #[error("configuration key {0:?} contains characters not allowed in a .env key")]
    InvalidKey(String),
}

pub fn split_check_interval(total_seconds: u64) -> (u64, u64) {
    (total_seconds / 60, total_seconds % 60)
}

pub fn join_check_interval(minutes: u64, seconds: u64) -> u64 {
    minutes.saturating_mul(60).saturating_add(seconds)
}

pub fn parse_check_interval(raw: &str) -> Result<u64, EnvConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_CHECK_INTERVAL_SECS);
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| EnvConfigError::InvalidInterval {
            key: KEY_CHECK_INTERVAL,
            value: raw.to_string(),
        })
}

pub fn parse_enabled_flag(raw: &str) -> bool {
    raw.trim() == "1"
}

pub fn format_enabled_flag(enabled: bool) -> &'static str {
    if enabled {
        "1"
    } else {
        "0"
    }
}

pub fn validate_key(key: &str) -> Result<(), EnvConfigError> {
    if key.is_empty() {
        return Err(EnvConfigError::EmptyKey);
    }
    let valid = key
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-');
    if !valid {
        return Err(EnvConfigError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamOption {
    pub key: &'static str,
    pub description: &'static str,
    pub values: &'static [&'static str],
}

pub const PARAM_CATALOG: &[ParamOption] = &[
    ParamOption {
        key: "sound",
        description: "notification sound",
        values: &[
            "alarm",
            "anticipate",
            "bell",
            "birdsong",
            "bloom",
            "calypso",
            "chime",
            "choo",
            "descent",
            "electronic",
            "fanfare",
            "glass",
            "gotosleep",
            "healthnotification",
            "horn",
            "ladder",
            "mailsent",
            "minuet",
            "multiwayinvitation",
            "newmail",
            "newsflash",
            "noir",
            "paymentsuccess",
            "shake",
            "sherwoodforest",
            "silence",
            "spell",
            "suspense",
            "telegraph",
            "tiptoes",
            "typewriters",
            "update",
        ],
    },
    ParamOption {
        key: "level",
        description: "interruption level",
        values: &["active", "timeSensitive", "passive", "critical"],
    },
    ParamOption {
        key: "badge",
        description: "badge number",
        values: &[],
    },
    ParamOption {
        key: "autoCopy",
        description: "copy automatically (1 = on)",
        values: &["1"],
    },
    ParamOption {
        key: "copy",
        description: "text to copy",
        values: &[],
    },
    ParamOption {
        key: "group",
        description: "message group",
        values: &[],
    },
    ParamOption {
        key: "url",
        description: "URL opened on tap",
        values: &[],
    },
    ParamOption {
        key: "icon",
        description: "custom icon URL",
        values: &[],
    },
    ParamOption {
        key: "isArchive",
        description: "keep in history (1 = keep)",
        values: &["1"],
    },
    ParamOption {
        key: "call",
        description: "repeat the sound (1 = on)",
        values: &["1"],
    },
    ParamOption {
        key: "action",
        description: "no popup on tap",
        values: &["none"],
    },
    ParamOption {
        key: "volume",
        description: "critical alert volume (0-10)",
        values: &[],
    },
];

pub fn param_option(key: &str) -> Option<&'static ParamOption> {
    PARAM_CATALOG.iter().find(|option| option.key == key)
}

/// Catalog entries the current set does not use yet, in catalog order.
pub fn available_params(current: &ParamSet) -> Vec<&'static ParamOption> {
    PARAM_CATALOG
        .iter()
        .filter(|option| !current.contains_key(option.key))
        .collect()
}

/// Value a freshly added parameter starts with.
pub fn seed_value(key: &str) -> String {
    param_option(key)
        .and_then(|option| option.values.first())
        .map(|value| value.to_string())
        .unwrap_or_default()
}

/// Typed view of the displayed configuration keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub tracking_number: String,
    pub check_interval_secs: u64,
    pub bark_server: String,
    pub bark_key: String,
    pub bark_query_params: String,
    pub bark_url_enabled: bool,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            tracking_number: String::new(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            bark_server: String::new(),
            bark_key: String::new(),
            bark_query_params: DEFAULT_QUERY_PARAMS.to_string(),
            bark_url_enabled: false,
        }
    }
}

impl EnvSettings {
    pub fn from_map(values: &BTreeMap<String, String>) -> Result<Self, EnvConfigError> {
        let defaults = Self::default();
        let text = |key: &str| values.get(key).cloned();
        Ok(Self {
            tracking_number: text(KEY_TRACKING_NUMBER).unwrap_or_default(),
            check_interval_secs: match values.get(KEY_CHECK_INTERVAL) {
                Some(raw) => parse_check_interval(raw)?,
                None => defaults.check_interval_secs,
            },
            bark_server: text(KEY_BARK_SERVER).unwrap_or_default(),
            bark_key: text(KEY_BARK_KEY).unwrap_or_default(),
            bark_query_params: text(KEY_BARK_QUERY_PARAMS).unwrap_or(defaults.bark_query_params),
            bark_url_enabled: values
                .get(KEY_BARK_URL_ENABLED)
                .map(|raw| parse_enabled_flag(raw))
                .unwrap_or(defaults.bark_url_enabled),
        })
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert(KEY_TRACKING_NUMBER.to_string(), self.tracking_number.clone());
        values.insert(
            KEY_CHECK_INTERVAL.to_string(),
            self.check_interval_secs.to_string(),
        );
        values.insert(KEY_BARK_SERVER.to_string(), self.bark_server.clone());
        values.insert(KEY_BARK_KEY.to_string(), self.bark_key.clone());
        values.insert(
            KEY_BARK_QUERY_PARAMS.to_string(),
            self.bark_query_params.clone(),
        );
        values.insert(
            KEY_BARK_URL_ENABLED.to_string(),
            format_enabled_flag(self.bark_url_enabled).to_string(),
        );
        values
    }

    /// The relay counts as configured only when enabled and given a server.
    pub fn relay_configured(&self) -> bool {
        self.bark_url_enabled && !self.bark_server.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::decode;

    #[test]
    fn check_interval_splits_and_joins() {
        assert_eq!(split_check_interval(300), (5, 0));
        assert_eq!(split_check_interval(95), (1, 35));
        assert_eq!(join_check_interval(1, 35), 95);
        assert_eq!(join_check_interval(0, 0), 0);
    }

    #[test]
    fn check_interval_parse_rejects_garbage() {
        assert_eq!(parse_check_interval(" 120 "), Ok(120));
        assert_eq!(parse_check_interval(""), Ok(DEFAULT_CHECK_INTERVAL_SECS));
        assert!(matches!(
            parse_check_interval("5m"),
            Err(EnvConfigError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn enabled_flag_is_strictly_one() {
        assert!(parse_enabled_flag("1"));
        assert!(!parse_enabled_flag("0"));
        assert!(!parse_enabled_flag("true"));
        assert_eq!(format_enabled_flag(true), "1");
    }

    #[test]
    fn available_params_skip_present_keys() {
        let current = decode(DEFAULT_QUERY_PARAMS);
        let keys: Vec<_> = available_params(&current)
            .into_iter()
            .map(|option| option.key)
            .collect();
        assert!(!keys.contains(&"sound"));
        assert!(!keys.contains(&"level"));
        assert_eq!(keys.first(), Some(&"badge"));
        assert_eq!(keys.len(), PARAM_CATALOG.len() - 2);
    }

    #[test]
    fn seed_value_uses_first_suggestion() {
        assert_eq!(seed_value("sound"), "alarm");
        assert_eq!(seed_value("action"), "none");
        assert_eq!(seed_value("badge"), "");
        assert_eq!(seed_value("unknown"), "");
    }

    #[test]
    fn settings_round_trip_through_map() {
        let mut values = BTreeMap::new();
        values.insert(KEY_CHECK_INTERVAL.to_string(), "90".to_string());
        values.insert(KEY_BARK_SERVER.to_string(), "https://relay.example".to_string());
        values.insert(KEY_BARK_URL_ENABLED.to_string(), "1".to_string());
        let settings = EnvSettings::from_map(&values).expect("settings");
        assert_eq!(settings.check_interval_secs, 90);
        assert_eq!(settings.bark_query_params, DEFAULT_QUERY_PARAMS);
        assert!(settings.relay_configured());

        let map = settings.to_map();
        assert_eq!(map.get(KEY_BARK_URL_ENABLED).map(String::as_str), Some("1"));
        assert_eq!(EnvSettings::from_map(&map), Ok(settings));
    }

    #[test]
    fn keys_are_validated() {
        assert!(validate_key("BARK_KEY").is_ok());
        assert_eq!(validate_key(""), Err(EnvConfigError::EmptyKey));
        assert!(validate_key("BAD KEY").is_err());
    }
}
