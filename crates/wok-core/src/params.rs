//! Multi-valued request parameters and their query encoding.
//!
//! Encoding matches `application/x-www-form-urlencoded` as browsers and the
//! Go standard library produce it: keys sorted, unreserved bytes
//! (`A-Z a-z 0-9 - _ . ~`) kept, space written as `+`, everything else
//! percent-escaped with uppercase hex.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, WokError};

const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Mapping from parameter name to its ordered list of values.
///
/// Key order is irrelevant (kept sorted), value order is significant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Vec<String>>);

impl Params {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert replacing all values of `key`.
    #[must_use]
    pub fn with<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.set(key, values);
        self
    }

    /// Replace all values of `key`.
    pub fn set<I, V>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let _ = self
            .0
            .insert(key.into(), values.into_iter().map(Into::into).collect());
    }

    /// Append a single value to `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Remove `key`, returning its values.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    /// All values of `key` (empty slice when absent).
    pub fn values(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.values(key).first().map(String::as_str)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no keys are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, values)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Restrict to `keys`. An empty key list keeps everything.
    #[must_use]
    pub fn filtered(&self, keys: &[String]) -> Self {
        if keys.is_empty() {
            return self.clone();
        }
        Self(
            keys.iter()
                .filter_map(|k| self.0.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        )
    }

    /// Overlay `other` on top of `self`, replacing values per key.
    pub fn merge(&mut self, other: &Params) {
        for (key, values) in other.iter() {
            let _ = self.0.insert(key.clone(), values.clone());
        }
    }

    /// Encode as a query string (no leading `?`).
    pub fn to_query(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.0 {
            let key = query_escape(key);
            for value in values {
                if !out.is_empty() {
                    out.push('&');
                }
                out.push_str(&key);
                out.push('=');
                out.push_str(&query_escape(value));
            }
        }
        out
    }

    /// Decode a query string.
    ///
    /// Empty pairs are skipped. A pair without `=` yields an empty value.
    /// Semicolons and malformed escapes are rejected.
    pub fn from_query(query: &str) -> Result<Self> {
        let mut params = Self::new();
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            if pair.contains(';') {
                return Err(invalid_query("semicolon in query"));
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.add(query_unescape(key)?, query_unescape(value)?);
        }
        Ok(params)
    }
}

impl<K, V> FromIterator<(K, Vec<V>)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, Vec<V>)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }
}

fn invalid_query(reason: &str) -> WokError {
    WokError::InvalidHeader {
        name: "query".into(),
        reason: reason.into(),
    }
}

fn query_escape(s: &str) -> String {
    utf8_percent_encode(s, QUERY_ESCAPE)
        .to_string()
        .replace("%20", "+")
}

fn query_unescape(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(invalid_query("malformed percent escape"));
            }
        }
    }
    let spaced = s.replace('+', " ");
    Ok(percent_decode_str(&spaced).decode_utf8_lossy().into_owned())
}

/// Whether any key in `keys` differs between `old` and `new`.
///
/// Values are compared by length, then element-wise in order.
pub fn params_changed(old: &Params, new: &Params, keys: &[String]) -> bool {
    keys.iter().any(|key| old.values(key) != new.values(key))
}
