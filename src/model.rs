use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

/// Display names longer than this are cut off.
pub const MAX_USER_LEN: usize = 64;

pub const ANONYMOUS: &str = "Anonymous";

/// One persisted chat event. Ids are assigned by the store on append and
/// increase monotonically with `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub id: i64,
    pub user: String,
    pub body: EventBody,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    Text(String),
    Image { url: String, mime: String },
}

/// Record shape pushed to clients over the socket and returned by the
/// history route. Exactly one of `text`/`image_url` is non-null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireEvent {
    pub user: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub timestamp: String,
}

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Render a unix timestamp as `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_timestamp(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&TIMESTAMP_FORMAT)
        .unwrap_or_default()
}

impl WireEvent {
    pub fn from_event(event: &ChatEvent) -> Self {
        let (text, image_url) = match &event.body {
            EventBody::Text(t) => (Some(t.clone()), None),
            EventBody::Image { url, .. } => (None, Some(url.clone())),
        };
        Self {
            user: event.user.clone(),
            text,
            image_url,
            timestamp: format_timestamp(event.created_at),
        }
    }
}

/// Normalize a client-supplied display name: trimmed, capped at
/// [`MAX_USER_LEN`] characters, `"Anonymous"` when nothing usable is left.
/// The name is otherwise opaque text and is never interpreted.
pub fn normalize_user(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or("");
    if trimmed.is_empty() {
        return ANONYMOUS.into();
    }
    trimmed.chars().take(MAX_USER_LEN).collect()
}
