use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::controllers::paste::NewPaste;
use crate::error::{ApiError, ApiResult};

/// Body of `POST /api/pastes`.
///
/// Fields are kept loosely typed so that wrong types come back as a 400 with
/// a useful message rather than a generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct CreatePaste {
    pub content: Option<Value>,
    pub ttl_seconds: Option<Value>,
    pub max_views: Option<Value>,
}

impl CreatePaste {
    pub fn into_new_paste(self) -> ApiResult<NewPaste> {
        let content = match self.content {
            Some(Value::String(content)) => content,
            _ => {
                return Err(ApiError::validation(
                    "content is required and must be a non-empty string",
                ))
            }
        };
        Ok(NewPaste {
            content,
            ttl_seconds: integer_field("ttl_seconds", self.ttl_seconds)?,
            max_views: integer_field("max_views", self.max_views)?,
        })
    }
}

fn integer_field(name: &str, value: Option<Value>) -> ApiResult<Option<i64>> {
    let Some(value) = value else { return Ok(None) };
    let integer = match &value {
        Value::Number(n) => n.as_i64().or_else(|| {
            // 5.0 is still an integer
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    };
    integer
        .map(Some)
        .ok_or_else(|| ApiError::validation(format!("{name} must be an integer >= 1")))
}

#[derive(Debug, Serialize)]
pub struct UploadPaste {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PasteView {
    pub content: String,
    pub remaining_views: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
