//!
//! portal-session durable state
//! ----------------------------
//! A tiny string key-value surface with local-storage semantics: synchronous,
//! survives a process restart (for `FileKv`), cleared explicitly on logout.
//! The controller keeps exactly two keys here: the login stamp and the id of
//! the last session it ended.
//!
//! Stamps are written as RFC 3339 UTC with millisecond precision; older
//! epoch-millisecond stamps are still accepted when read.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::AppResult;

mod kv;

pub use kv::{FileKv, MemoryKv};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
}

pub fn encode_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored login stamp; `None` for anything unreadable.
pub fn parse_stamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() { return None; }
    if let Ok(ms) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc))
}
