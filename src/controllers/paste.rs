use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::html;
use crate::keys::generate_key;
use crate::models::Paste;
use crate::types::api::{PasteView, UploadPaste};
use crate::App;

/// A paste as submitted by a client, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaste {
    pub content: String,
    pub ttl_seconds: Option<i64>,
    pub max_views: Option<i64>,
}

impl NewPaste {
    pub fn validate(&self) -> ApiResult<()> {
        if self.content.trim().is_empty() {
            return Err(ApiError::validation(
                "content is required and must be a non-empty string",
            ));
        }
        if matches!(self.ttl_seconds, Some(ttl) if ttl < 1) {
            return Err(ApiError::validation("ttl_seconds must be an integer >= 1"));
        }
        if matches!(self.max_views, Some(max) if max < 1) {
            return Err(ApiError::validation("max_views must be an integer >= 1"));
        }
        Ok(())
    }

    fn expires_at(&self, now: DateTime<Utc>) -> ApiResult<Option<DateTime<Utc>>> {
        let Some(ttl) = self.ttl_seconds else { return Ok(None) };
        ttl.checked_mul(1000)
            .and_then(|millis| now.checked_add_signed(Duration::milliseconds(millis)))
            .map(Some)
            .ok_or_else(|| ApiError::validation("ttl_seconds is too large"))
    }
}

pub async fn create(app: &App, new: NewPaste, now: DateTime<Utc>) -> ApiResult<UploadPaste> {
    new.validate()?;
    let expires_at = new.expires_at(now)?;
    let id = generate_key();

    info!(
        "new paste: id='{id}', size={size}, ttl={ttl:?}, max_views={max_views:?}",
        size = new.content.len(),
        ttl = new.ttl_seconds,
        max_views = new.max_views,
    );

    let paste = app
        .database
        .insert_paste(&id, &new.content, expires_at, new.max_views, now)
        .await?;

    Ok(UploadPaste {
        url: paste_url(&app.config.base_url, &paste.id),
        id: paste.id,
    })
}

pub fn paste_url(base_url: &str, id: &str) -> String {
    format!("{base_url}/p/{id}")
}

/// Load a paste and spend one of its views.
///
/// Unknown, expired and exhausted pastes all come back as
/// [`ApiError::NotFound`].
pub async fn access(app: &App, id: &str, now: DateTime<Utc>) -> ApiResult<Paste> {
    let paste = app.database.get_paste(id).await?;
    if !paste.is_accessible(now) {
        debug!("paste '{id}' is no longer accessible");
        return Err(ApiError::NotFound);
    }

    // a concurrent request may have taken the last view since the read above
    app.database
        .consume_view(id, now)
        .await?
        .ok_or(ApiError::NotFound)
}

pub async fn fetch(app: &App, id: &str, now: DateTime<Utc>) -> ApiResult<PasteView> {
    let paste = access(app, id, now).await?;
    Ok(PasteView {
        remaining_views: paste.remaining_views(),
        expires_at: paste.expires_at,
        content: paste.content,
    })
}

pub async fn render(app: &App, id: &str, now: DateTime<Utc>) -> ApiResult<String> {
    let paste = access(app, id, now).await?;
    Ok(html::paste_page(&paste.content, app.config.frontend_url()))
}

pub async fn purge_expired(app: &App, now: DateTime<Utc>) -> ApiResult<u64> {
    let count = app.database.purge_inaccessible(now).await?;
    if count > 0 {
        info!("deleted {count} pastes");
    }
    Ok(count)
}
