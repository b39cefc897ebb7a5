//! Change feed reader
//!
//! Readers page forward by opaque cursor. The feed is append-only, so reads
//! take no locks; a reader that re-polls with an old cursor sees entries
//! again, never skips one.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sel_common::{Error, Result};
use serde::Serialize;

use crate::db::{changes, Store};
use crate::models::{ChangeAction, ChangeEntry};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

const CURSOR_PREFIX: &str = "seq_";

pub fn encode_cursor(sequence: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}{}", CURSOR_PREFIX, sequence))
}

pub fn decode_cursor(cursor: &str) -> Result<i64> {
    let invalid = || Error::InvalidInput(format!("invalid cursor '{}'", cursor));
    let bytes = URL_SAFE_NO_PAD.decode(cursor.trim()).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse::<i64>().ok())
        .filter(|n| *n >= 0)
        .ok_or_else(invalid)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangePage {
    pub changes: Vec<ChangeEntry>,
    /// Position after the last returned entry; the input position when empty
    pub next_cursor: String,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct ChangeFeed {
    store: Store,
}

impl ChangeFeed {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
        action: Option<ChangeAction>,
    ) -> Result<ChangePage> {
        let after = cursor.map(decode_cursor).transpose()?.unwrap_or(0);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;

        let mut conn = self.store.read().await?;
        let mut entries = changes::list_changes(&mut conn, after, limit as i64 + 1, action).await?;

        let has_more = entries.len() > limit;
        entries.truncate(limit);
        let next = entries.last().map_or(after, |e| e.sequence_number);

        Ok(ChangePage {
            changes: entries,
            next_cursor: encode_cursor(next),
            has_more,
        })
    }

    pub async fn latest_sequence(&self) -> Result<i64> {
        let mut conn = self.store.read().await?;
        changes::latest_sequence(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        let cursor = encode_cursor(42);
        assert!(!cursor.contains('='));
        assert_eq!(decode_cursor(&cursor).unwrap(), 42);
        assert_eq!(URL_SAFE_NO_PAD.decode(&cursor).unwrap(), b"seq_42");
    }

    #[test]
    fn malformed_cursors_rejected() {
        let bad = vec![
            String::new(),
            "!!!".to_string(),
            URL_SAFE_NO_PAD.encode("page_3"),
            URL_SAFE_NO_PAD.encode("seq_-1"),
        ];
        for cursor in &bad {
            assert!(matches!(decode_cursor(cursor), Err(Error::InvalidInput(_))), "{}", cursor);
        }
    }
}
