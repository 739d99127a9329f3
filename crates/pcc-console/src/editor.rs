//! Configuration form shown over the log panes.
//!
//! The relay query is edited two ways at once: as the raw string and as a list
//! of parameters. Both views go through one [`QueryBinding`], so an edit on
//! either side is reflected on the other without feeding back into itself.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use pcc_core::env_config::{
    available_params, format_enabled_flag, join_check_interval, param_option, seed_value,
    split_check_interval, EnvSettings, ParamOption, KEY_BARK_KEY, KEY_BARK_QUERY_PARAMS,
    KEY_BARK_SERVER, KEY_BARK_URL_ENABLED, KEY_CHECK_INTERVAL, KEY_TRACKING_NUMBER,
};
use pcc_core::query::{encode, QueryBinding};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    TrackingNumber,
    IntervalMinutes,
    IntervalSeconds,
    BarkServer,
    BarkKey,
    Enabled,
    RawQuery,
    Param(usize),
    AddParam,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::TrackingNumber => "Tracking number",
            Field::IntervalMinutes => "Check every (min)",
            Field::IntervalSeconds => "Check every (sec)",
            Field::BarkServer => "Relay server",
            Field::BarkKey => "Relay key",
            Field::Enabled => "Relay enabled",
            Field::RawQuery => "Query string",
            Field::Param(_) => "Parameter",
            Field::AddParam => "Add parameter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorOutcome {
    Continue,
    Close,
    Save(BTreeMap<String, String>),
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct ConfigEditor {
    pub tracking_number: String,
    pub interval_minutes: String,
    pub interval_seconds: String,
    pub bark_server: String,
    pub bark_key: String,
    pub enabled: bool,
    query: QueryBinding,
    focus: Field,
    add_choice: usize,
}

impl ConfigEditor {
    pub fn from_settings(settings: &EnvSettings) -> Self {
        let (minutes, seconds) = split_check_interval(settings.check_interval_secs);
        Self {
            tracking_number: settings.tracking_number.clone(),
            interval_minutes: minutes.to_string(),
            interval_seconds: seconds.to_string(),
            bark_server: settings.bark_server.clone(),
            bark_key: settings.bark_key.clone(),
            enabled: settings.bark_url_enabled,
            query: QueryBinding::from_raw(settings.bark_query_params.clone()),
            focus: Field::TrackingNumber,
            add_choice: 0,
        }
    }

    pub fn focus(&self) -> Field {
        self.focus
    }

    pub fn query(&self) -> &QueryBinding {
        &self.query
    }

    /// Form fields in display order.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields = vec![
            Field::TrackingNumber,
            Field::IntervalMinutes,
            Field::IntervalSeconds,
            Field::BarkServer,
            Field::BarkKey,
            Field::Enabled,
            Field::RawQuery,
        ];
        fields.extend((0..self.query.params().len()).map(Field::Param));
        if !self.addable().is_empty() {
            fields.push(Field::AddParam);
        }
        fields
    }

    pub fn addable(&self) -> Vec<&'static ParamOption> {
        available_params(self.query.params())
    }

    /// Catalog entry the add row currently points at.
    pub fn add_candidate(&self) -> Option<&'static ParamOption> {
        let options = self.addable();
        if options.is_empty() {
            return None;
        }
        options.get(self.add_choice % options.len()).copied()
    }

    pub fn param_at(&self, index: usize) -> Option<(&str, &str)> {
        self.query.params().iter().nth(index)
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> EditorOutcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('s') if ctrl => match self.to_values() {
                Ok(values) => EditorOutcome::Save(values),
                Err(message) => EditorOutcome::Invalid(message),
            },
            KeyCode::Esc => EditorOutcome::Close,
            KeyCode::Tab | KeyCode::Down => {
                self.move_focus(1);
                EditorOutcome::Continue
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.move_focus(-1);
                EditorOutcome::Continue
            }
            KeyCode::Left => {
                self.cycle(-1);
                EditorOutcome::Continue
            }
            KeyCode::Right => {
                self.cycle(1);
                EditorOutcome::Continue
            }
            KeyCode::Enter => {
                match self.focus {
                    Field::Enabled => self.enabled = !self.enabled,
                    Field::AddParam => self.add_selected(),
                    _ => self.move_focus(1),
                }
                EditorOutcome::Continue
            }
            KeyCode::Delete => {
                if let Field::Param(index) = self.focus {
                    self.remove_param(index);
                }
                EditorOutcome::Continue
            }
            KeyCode::Backspace => {
                self.edit_text(|text| {
                    text.pop();
                });
                EditorOutcome::Continue
            }
            KeyCode::Char(' ') if self.focus == Field::Enabled => {
                self.enabled = !self.enabled;
                EditorOutcome::Continue
            }
            KeyCode::Char(ch) if !ctrl => {
                self.edit_text(|text| text.push(ch));
                EditorOutcome::Continue
            }
            _ => EditorOutcome::Continue,
        }
    }

    fn move_focus(&mut self, delta: isize) {
        let fields = self.fields();
        let current = fields
            .iter()
            .position(|field| *field == self.focus)
            .unwrap_or(0) as isize;
        let len = fields.len() as isize;
        let next = (current + delta).rem_euclid(len) as usize;
        self.focus = fields[next];
    }

    fn clamp_focus(&mut self) {
        let fields = self.fields();
        if fields.contains(&self.focus) {
            return;
        }
        self.focus = match self.focus {
            Field::Param(_) | Field::AddParam => fields
                .iter()
                .rev()
                .find(|field| matches!(field, Field::Param(_) | Field::AddParam))
                .copied()
                .unwrap_or(Field::RawQuery),
            _ => Field::TrackingNumber,
        };
    }

    /// Left/Right step through suggested values on a parameter row and through
    /// the catalog on the add row.
    fn cycle(&mut self, delta: isize) {
        match self.focus {
            Field::Param(index) => {
                let Some((key, value)) = self.param_at(index) else {
                    return;
                };
                let Some(option) = param_option(key) else {
                    return;
                };
                if option.values.is_empty() {
                    return;
                }
                let len = option.values.len() as isize;
                let next = match option.values.iter().position(|candidate| *candidate == value) {
                    Some(current) => (current as isize + delta).rem_euclid(len),
                    None if delta >= 0 => 0,
                    None => len - 1,
                };
                let key = key.to_string();
                let value = option.values[next as usize].to_string();
                self.query.edit_params(|params| params.set(key, value));
            }
            Field::AddParam => {
                let len = self.addable().len();
                if len > 0 {
                    self.add_choice = (self.add_choice as isize + delta).rem_euclid(len as isize) as usize;
                }
            }
            Field::Enabled => self.enabled = !self.enabled,
            _ => {}
        }
    }

    fn add_selected(&mut self) {
        let Some(option) = self.add_candidate() else {
            return;
        };
        let value = seed_value(option.key);
        self.query.edit_params(|params| params.set(option.key, value));
        self.add_choice = 0;
        let index = self.query.params().len().saturating_sub(1);
        self.focus = Field::Param(index);
    }

    fn remove_param(&mut self, index: usize) {
        let Some((key, _)) = self.param_at(index) else {
            return;
        };
        let key = key.to_string();
        self.query.edit_params(|params| {
            params.remove(&key);
        });
        self.clamp_focus();
    }

    fn edit_text(&mut self, edit: impl FnOnce(&mut String)) {
        match self.focus {
            Field::TrackingNumber => edit(&mut self.tracking_number),
            Field::IntervalMinutes => edit(&mut self.interval_minutes),
            Field::IntervalSeconds => edit(&mut self.interval_seconds),
            Field::BarkServer => edit(&mut self.bark_server),
            Field::BarkKey => edit(&mut self.bark_key),
            Field::RawQuery => {
                let mut raw = self.query.raw().to_string();
                edit(&mut raw);
                self.query.set_raw(raw);
                self.clamp_focus();
            }
            Field::Param(index) => {
                let Some((key, value)) = self.param_at(index) else {
                    return;
                };
                let key = key.to_string();
                let mut value = value.to_string();
                edit(&mut value);
                self.query.edit_params(|params| params.set(key, value));
            }
            Field::Enabled | Field::AddParam => {}
        }
    }

    /// Text shown for a field, without decoration.
    pub fn value_of(&self, field: Field) -> String {
        match field {
            Field::TrackingNumber => self.tracking_number.clone(),
            Field::IntervalMinutes => self.interval_minutes.clone(),
            Field::IntervalSeconds => self.interval_seconds.clone(),
            Field::BarkServer => self.bark_server.clone(),
            Field::BarkKey => self.bark_key.clone(),
            Field::Enabled => {
                let label = if self.enabled { "yes" } else { "no" };
                label.to_string()
            }
            Field::RawQuery => self.query.raw().to_string(),
            Field::Param(index) => self
                .param_at(index)
                .map(|(key, value)| format!("{key} = {value}"))
                .unwrap_or_default(),
            Field::AddParam => self
                .add_candidate()
                .map(|option| format!("{} ({})", option.key, option.description))
                .unwrap_or_default(),
        }
    }

    /// Values posted to the hub. The query is saved in its canonical encoding.
    pub fn to_values(&self) -> Result<BTreeMap<String, String>, String> {
        let minutes = parse_count(&self.interval_minutes, "minutes")?;
        let seconds = parse_count(&self.interval_seconds, "seconds")?;
        let mut values = BTreeMap::new();
        values.insert(KEY_TRACKING_NUMBER.to_string(), self.tracking_number.trim().to_string());
        values.insert(
            KEY_CHECK_INTERVAL.to_string(),
            join_check_interval(minutes, seconds).to_string(),
        );
        values.insert(KEY_BARK_SERVER.to_string(), self.bark_server.trim().to_string());
        values.insert(KEY_BARK_KEY.to_string(), self.bark_key.trim().to_string());
        values.insert(KEY_BARK_QUERY_PARAMS.to_string(), encode(self.query.params()));
        values.insert(
            KEY_BARK_URL_ENABLED.to_string(),
            format_enabled_flag(self.enabled).to_string(),
        );
        Ok(values)
    }
}

fn parse_count(raw: &str, unit: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| format!("check interval {unit} must be a whole number, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(editor: &mut ConfigEditor, code: KeyCode) -> EditorOutcome {
        editor.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(editor: &mut ConfigEditor, text: &str) {
        for ch in text.chars() {
            press(editor, KeyCode::Char(ch));
        }
    }

    fn focus_on(editor: &mut ConfigEditor, field: Field) {
        for _ in 0..32 {
            if editor.focus() == field {
                return;
            }
            press(editor, KeyCode::Tab);
        }
        panic!("field {field:?} not reachable");
    }

    fn sample() -> ConfigEditor {
        ConfigEditor::from_settings(&EnvSettings {
            tracking_number: "SF100".to_string(),
            check_interval_secs: 125,
            bark_server: "https://relay.example".to_string(),
            bark_key: "k".to_string(),
            bark_query_params: "?sound=minuet&level=timeSensitive".to_string(),
            bark_url_enabled: true,
        })
    }

    #[test]
    fn interval_is_split_for_editing_and_joined_on_save() {
        let mut editor = sample();
        assert_eq!(editor.interval_minutes, "2");
        assert_eq!(editor.interval_seconds, "5");

        focus_on(&mut editor, Field::IntervalSeconds);
        press(&mut editor, KeyCode::Backspace);
        type_text(&mut editor, "30");
        let values = editor.to_values().expect("values");
        assert_eq!(values.get(KEY_CHECK_INTERVAL).map(String::as_str), Some("150"));
        assert_eq!(values.get(KEY_BARK_URL_ENABLED).map(String::as_str), Some("1"));
    }

    #[test]
    fn typing_the_raw_query_updates_parameter_rows() {
        let mut editor = sample();
        focus_on(&mut editor, Field::RawQuery);
        type_text(&mut editor, "&badge=3");
        assert_eq!(editor.query().params().get("badge"), Some("3"));
        assert_eq!(editor.query().raw(), "?sound=minuet&level=timeSensitive&badge=3");
        assert!(editor.fields().contains(&Field::Param(2)));
    }

    #[test]
    fn editing_a_parameter_rewrites_the_raw_query() {
        let mut editor = sample();
        focus_on(&mut editor, Field::Param(1));
        for _ in 0.."timeSensitive".len() {
            press(&mut editor, KeyCode::Backspace);
        }
        type_text(&mut editor, "passive");
        assert_eq!(editor.query().raw(), "?sound=minuet&level=passive");
    }

    #[test]
    fn adding_and_removing_parameters_from_the_catalog() {
        let mut editor = sample();
        focus_on(&mut editor, Field::AddParam);
        let candidate = editor.add_candidate().expect("candidate").key;
        assert_ne!(candidate, "sound");
        press(&mut editor, KeyCode::Enter);
        assert!(editor.query().params().contains_key(candidate));
        assert_eq!(editor.focus(), Field::Param(2));

        press(&mut editor, KeyCode::Delete);
        assert!(!editor.query().params().contains_key(candidate));
        assert_eq!(editor.query().raw(), "?sound=minuet&level=timeSensitive");
        assert!(matches!(editor.focus(), Field::Param(_) | Field::AddParam));
    }

    #[test]
    fn arrows_cycle_suggested_values() {
        let mut editor = sample();
        focus_on(&mut editor, Field::Param(1));
        press(&mut editor, KeyCode::Right);
        let level = editor.query().params().get("level").map(str::to_string);
        assert_ne!(level.as_deref(), Some("timeSensitive"));
        press(&mut editor, KeyCode::Left);
        assert_eq!(editor.query().params().get("level"), Some("timeSensitive"));
    }

    #[test]
    fn ctrl_s_saves_and_rejects_bad_numbers() {
        let mut editor = sample();
        let save = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL);
        assert!(matches!(editor.handle_key(save), EditorOutcome::Save(_)));

        focus_on(&mut editor, Field::IntervalMinutes);
        type_text(&mut editor, "x");
        assert!(matches!(editor.handle_key(save), EditorOutcome::Invalid(_)));
        assert_eq!(press(&mut editor, KeyCode::Esc), EditorOutcome::Close);
    }

    #[test]
    fn enter_toggles_the_enable_flag() {
        let mut editor = sample();
        focus_on(&mut editor, Field::Enabled);
        press(&mut editor, KeyCode::Enter);
        assert!(!editor.enabled);
        let values = editor.to_values().expect("values");
        assert_eq!(values.get(KEY_BARK_URL_ENABLED).map(String::as_str), Some("0"));
    }
}
