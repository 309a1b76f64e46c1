use chrono::{DateTime, TimeZone, Utc};
use sqlx::FromRow;

use crate::error::{ApiError, ApiResult};

/// A stored paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paste {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<i64>,
    pub view_count: i64,
}

impl Paste {
    /// Whether the paste may be served at `now`.
    ///
    /// This is evaluated against the counter *before* the access that is
    /// about to happen increments it.
    pub fn is_accessible(&self, now: DateTime<Utc>) -> bool {
        let fresh = self.expires_at.map_or(true, |expires_at| now < expires_at);
        let has_views = self
            .max_views
            .map_or(true, |max_views| self.view_count < max_views);
        fresh && has_views
    }

    /// Views left after the current counter value, `None` when unlimited.
    pub fn remaining_views(&self) -> Option<i64> {
        self.max_views
            .map(|max_views| (max_views - self.view_count).max(0))
    }
}

/// Row layout of the `pastes` table. Timestamps are epoch milliseconds so
/// every backend can compare them as plain integers.
#[derive(FromRow)]
pub(crate) struct PasteRow {
    pub id: String,
    pub content: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub max_views: Option<i64>,
    pub view_count: i64,
}

impl TryFrom<PasteRow> for Paste {
    type Error = ApiError;

    fn try_from(row: PasteRow) -> ApiResult<Self> {
        Ok(Paste {
            created_at: from_millis(row.created_at)?,
            expires_at: row.expires_at.map(from_millis).transpose()?,
            id: row.id,
            content: row.content,
            max_views: row.max_views,
            view_count: row.view_count,
        })
    }
}

fn from_millis(millis: i64) -> ApiResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| ApiError::Database {
        source: sqlx::Error::Decode(format!("timestamp out of range: {millis}").into()),
    })
}
