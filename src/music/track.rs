//! A single playable track: a URL plus playback options

use std::collections::BTreeMap;
use std::fmt;

use crate::error::MusicError;

/// Option keys a client is allowed to set on a track
pub const ALLOWED_OPTIONS: [&str; 2] = ["start", "stop"];

/// A track as queued by a client.
///
/// Identity is structural: two `Music` values with the same URL and the same
/// options are the same track, which is what the registry deduplicates on.
/// Options live in a sorted map so equality, hashing and the rendered option
/// string do not depend on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Music {
    url: String,
    options: BTreeMap<String, String>,
}

impl Music {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: BTreeMap::new(),
        }
    }

    /// Set a playback option, rejecting keys outside [`ALLOWED_OPTIONS`]
    pub fn set_option(&mut self, key: &str, value: impl Into<String>) -> Result<(), MusicError> {
        if !ALLOWED_OPTIONS.contains(&key) {
            return Err(MusicError::OptionNotAllowed(key.to_string()));
        }
        self.options.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Remove an option; unsetting a missing option is a no-op
    pub fn unset_option(&mut self, key: &str) {
        self.options.remove(key);
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Options rendered for the audio backend, e.g. `start=10,stop=42`
    pub fn options(&self) -> String {
        self.options
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Music {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.options.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{} [{}]", self.url, self.options())
        }
    }
}
