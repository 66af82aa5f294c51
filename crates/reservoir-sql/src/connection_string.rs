//! Connection string parsing.
//!
//! Connection strings are `key=value` pairs separated by `;`. Keys are
//! compared case-insensitively with all whitespace removed, so
//! `Max Pool Size`, `max pool size` and `MaxPoolSize` name the same
//! setting. Only the first `=` of a segment separates key from value.

use std::fmt;
use std::str::FromStr;

use reservoir::config::DEFAULT_POOL_SIZE;

use crate::error::ConnectionStringError;

const MAX_POOL_SIZE: &str = "maxpoolsize";
const MIN_POOL_SIZE: &str = "minpoolsize";
const SECRET_KEYS: &[&str] = &["password", "pwd"];

/// A parsed connection string.
///
/// The raw text is kept as given and handed to the session factory;
/// the parsed pairs are only used to derive pool settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    pairs: Vec<(String, String)>,
}

/// Normalize a connection string key for comparison.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl ConnectionString {
    /// Parse a connection string.
    ///
    /// Empty segments are skipped. A segment without `=`, or with an empty
    /// key, is an error.
    pub fn parse(conn_str: &str) -> Result<Self, ConnectionStringError> {
        let mut pairs = Vec::new();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::InvalidSegment(part.to_string()))?;

            let key = normalize_key(key);
            if key.is_empty() {
                return Err(ConnectionStringError::MissingKey(part.to_string()));
            }
            pairs.push((key, value.trim().to_string()));
        }

        Ok(Self {
            raw: conn_str.to_string(),
            pairs,
        })
    }

    /// The connection string as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Look up a value by key. The last occurrence wins.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Check if a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over normalized keys and their values, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `Max Pool Size` value, if present and numeric.
    #[must_use]
    pub fn max_pool_size(&self) -> Option<i64> {
        self.get(MAX_POOL_SIZE).and_then(|v| v.parse().ok())
    }

    /// Pool capacity for this connection string.
    ///
    /// `Max Pool Size` when it is a positive integer, otherwise
    /// [`DEFAULT_POOL_SIZE`].
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.max_pool_size()
            .filter(|n| *n > 0)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_POOL_SIZE)
    }

    /// Number of sessions to open ahead of demand.
    ///
    /// `Min Pool Size` when present and numeric, capped at
    /// [`pool_size`](Self::pool_size); zero otherwise.
    #[must_use]
    pub fn min_pool_size(&self) -> usize {
        self.get(MIN_POOL_SIZE)
            .and_then(|v| v.parse::<usize>().ok())
            .map_or(0, |n| n.min(self.pool_size()))
    }

    /// The connection string with secrets masked, for logging.
    #[must_use]
    pub fn redacted(&self) -> String {
        self.raw
            .split(';')
            .map(|part| match part.split_once('=') {
                Some((key, _)) if SECRET_KEYS.contains(&normalize_key(key).as_str()) => {
                    format!("{key}=****")
                }
                _ => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
