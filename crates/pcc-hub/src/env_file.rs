use pcc_core::env_config::validate_key;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("env file io error: {0}")]
    Io(#[from] io::Error),
    #[error("env file unreadable: {0}")]
    Parse(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub errors: Vec<String>,
}

/// The `.env` file shared by the hub and both managed processes.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All parseable entries; a missing file reads as empty and bad lines are skipped.
    pub fn read_values(&self) -> Result<BTreeMap<String, String>, EnvFileError> {
        let mut values = BTreeMap::new();
        if !self.path.is_file() {
            return Ok(values);
        }
        let iter = dotenvy::from_path_iter(&self.path)
            .map_err(|err| EnvFileError::Parse(err.to_string()))?;
        for item in iter {
            match item {
                Ok((key, value)) => {
                    values.insert(key, value);
                }
                Err(err) => {
                    warn!(event = "env_entry_invalid", path = %self.path.display(), error = %err);
                }
            }
        }
        Ok(values)
    }

    pub fn read_keys(&self, keys: &[&str]) -> Result<BTreeMap<String, String>, EnvFileError> {
        let mut values = self.read_values()?;
        values.retain(|key, _| keys.contains(&key.as_str()));
        Ok(values)
    }

    pub fn set_key(&self, key: &str, value: &str) -> Result<(), EnvFileError> {
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value.to_string());
        let report = self.update(&values)?;
        match report.errors.into_iter().next() {
            Some(error) => Err(EnvFileError::Parse(error)),
            None => Ok(()),
        }
    }

    /// Writes every valid key in one pass: existing assignments are replaced in
    /// place, new keys are appended. Invalid keys are reported, not written.
    pub fn update(&self, values: &BTreeMap<String, String>) -> Result<UpdateReport, EnvFileError> {
        let mut report = UpdateReport::default();
        let existing = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();

        for (key, value) in values {
            if let Err(err) = validate_key(key) {
                report.errors.push(format!("{key}: {err}"));
                continue;
            }
            let rendered = format!("{key}={}", quote_value(value));
            let mut found = false;
            lines.retain_mut(|line| {
                if assigned_key(line) != Some(key.as_str()) {
                    return true;
                }
                if found {
                    return false;
                }
                found = true;
                *line = rendered.clone();
                true
            });
            if !found {
                lines.push(rendered);
            }
            report.updated.push(key.clone());
        }

        if report.updated.is_empty() {
            return Ok(report);
        }
        let mut text = lines.join("\n");
        text.push('\n');
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(report)
    }
}

fn assigned_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, _) = trimmed.split_once('=')?;
    Some(key.trim())
}

fn quote_value(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' | '"' | '$' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_in(dir: &tempfile::TempDir, contents: &str) -> EnvFile {
        let path = dir.path().join(".env");
        fs::write(&path, contents).expect("write env");
        EnvFile::new(path)
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = EnvFile::new(dir.path().join(".env"));
        assert!(env.read_values().expect("read").is_empty());
    }

    #[test]
    fn update_replaces_in_place_and_appends_new_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = env_in(
            &dir,
            "# tracker\nTRACKING_NUMBER=old\nCHECK_INTERVAL=300\nexport CHECK_INTERVAL=10\n",
        );
        let mut values = BTreeMap::new();
        values.insert("CHECK_INTERVAL".to_string(), "90".to_string());
        values.insert(
            "BARK_QUERY_PARAMS".to_string(),
            "?sound=minuet&level=timeSensitive".to_string(),
        );
        let report = env.update(&values).expect("update");
        assert_eq!(report.updated.len(), 2);
        assert!(report.errors.is_empty());

        let text = fs::read_to_string(env.path()).expect("read back");
        assert_eq!(
            text,
            "# tracker\nTRACKING_NUMBER=old\nCHECK_INTERVAL='90'\nBARK_QUERY_PARAMS='?sound=minuet&level=timeSensitive'\n"
        );
        let parsed = env.read_values().expect("parse");
        assert_eq!(parsed.get("CHECK_INTERVAL").map(String::as_str), Some("90"));
        assert_eq!(
            parsed.get("BARK_QUERY_PARAMS").map(String::as_str),
            Some("?sound=minuet&level=timeSensitive")
        );
    }

    #[test]
    fn values_with_single_quotes_survive_a_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = env_in(&dir, "");
        env.set_key("TRACKING_NUMBER", "SF it's here").expect("set");
        let parsed = env.read_values().expect("parse");
        assert_eq!(
            parsed.get("TRACKING_NUMBER").map(String::as_str),
            Some("SF it's here")
        );
    }

    #[test]
    fn invalid_keys_are_reported_and_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = env_in(&dir, "A=1\n");
        let mut values = BTreeMap::new();
        values.insert("BAD KEY".to_string(), "x".to_string());
        let report = env.update(&values).expect("update");
        assert!(report.updated.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(fs::read_to_string(env.path()).expect("read"), "A=1\n");
    }

    #[test]
    fn read_keys_filters_to_requested_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = env_in(&dir, "BARK_KEY=abc\nSECRET=zzz\n");
        let values = env.read_keys(&["BARK_KEY", "BARK_SERVER"]).expect("read");
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("BARK_KEY").map(String::as_str), Some("abc"));
    }
}
