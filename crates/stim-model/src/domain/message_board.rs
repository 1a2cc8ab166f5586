use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Forwarded to the session service to open a pilot session.
pub const PILOT_TOKEN_KEY: &str = "__pilotToken";
/// Suppresses result saving entirely (automated smoke tests).
pub const NO_OUTPUT_KEY: &str = "__noOutput";

const PREFIX: &str = "__";

/// Server-directed control flags taken from the run URL.
///
/// Only query parameters starting with a double underscore are kept; keys keep their prefix.
/// The board is immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBoard(BTreeMap<String, String>);

impl MessageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the board from decoded query pairs, ignoring non-prefixed parameters.
    ///
    /// When a key repeats, the last occurrence wins.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .filter(|(k, _)| k.as_ref().starts_with(PREFIX) && k.as_ref().len() > PREFIX.len())
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn pilot_token(&self) -> Option<&str> {
        self.get(PILOT_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    /// Returns `true` when the run must not save any output.
    pub fn no_output(&self) -> bool {
        self.contains(NO_OUTPUT_KEY)
    }
}
