//! Relay query-string codec and the raw/structured binding used by the
//! configuration editor.

use std::borrow::Cow;

/// Ordered set of query parameters. Keys are unique; re-setting a key keeps its
/// original position. Equality ignores order.
#[derive(Debug, Clone, Default, Eq)]
pub struct ParamSet {
    pairs: Vec<(String, String)>,
}

impl PartialEq for ParamSet {
    fn eq(&self, other: &Self) -> bool {
        self.pairs.len() == other.pairs.len()
            && self
                .pairs
                .iter()
                .all(|(key, value)| other.get(key) == Some(value.as_str()))
    }
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.pairs.iter().position(|(existing, _)| existing == key)?;
        Some(self.pairs.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(key, _)| key.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = ParamSet::new();
        for (key, value) in iter {
            set.set(key, value);
        }
        set
    }
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .unwrap_or_else(|_| Cow::Borrowed(raw))
        .into_owned()
}

pub fn decode(query: &str) -> ParamSet {
    let body = query.strip_prefix('?').unwrap_or(query);
    let mut params = ParamSet::new();
    for segment in body.split('&').filter(|segment| !segment.is_empty()) {
        let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
        params.set(decode_component(key), decode_component(value));
    }
    params
}

pub fn encode(params: &ParamSet) -> String {
    if params.is_empty() {
        return String::new();
    }
    let body = params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("?{body}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingUpdate {
    pub raw_changed: bool,
    pub params_changed: bool,
}

/// Keeps a raw query string and its structured form consistent while either
/// side is edited. Each side only rewrites the other when the recomputed
/// encoding differs, so echoing an update back is a no-op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBinding {
    raw: String,
    params: ParamSet,
}

impl QueryBinding {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let params = decode(&raw);
        Self { raw, params }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn set_raw(&mut self, raw: impl Into<String>) -> BindingUpdate {
        let raw = raw.into();
        let mut update = BindingUpdate::default();
        if raw != self.raw {
            self.raw = raw;
            update.raw_changed = true;
        }
        let decoded = decode(&self.raw);
        if encode(&decoded) != encode(&self.params) {
            self.params = decoded;
            update.params_changed = true;
        }
        update
    }

    pub fn set_params(&mut self, params: ParamSet) -> BindingUpdate {
        let mut update = BindingUpdate::default();
        if encode(&params) != encode(&self.params) {
            update.params_changed = true;
        }
        self.params = params;
        let encoded = encode(&self.params);
        if encoded != self.raw {
            self.raw = encoded;
            update.raw_changed = true;
        }
        update
    }

    /// Structured edit helper: applies `edit` to a copy of the params and
    /// routes the result through `set_params`.
    pub fn edit_params(&mut self, edit: impl FnOnce(&mut ParamSet)) -> BindingUpdate {
        let mut next = self.params.clone();
        edit(&mut next);
        self.set_params(next)
    }
}
