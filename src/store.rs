use crate::db::DbPool;
use crate::model::{ChatEvent, EventBody};
use rusqlite::{params, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// An event accepted by the coordinator but not yet persisted.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub user: String,
    pub body: EventBody,
    pub created_at: i64,
}

/// Durable, append-only log of chat events. No update or delete exists;
/// ids increase strictly in append order and are never reused.
pub trait MessageStore: Send + Sync {
    /// Record the event, returning it with its assigned id.
    fn append(&self, event: NewEvent) -> Result<ChatEvent, StoreError>;
    /// The full log, ascending by id.
    fn list_all(&self) -> Result<Vec<ChatEvent>, StoreError>;
}

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<ChatEvent> {
    let text: Option<String> = row.get(2)?;
    let image_url: Option<String> = row.get(3)?;
    let mime: Option<String> = row.get(4)?;
    let body = if let Some(t) = text {
        EventBody::Text(t)
    } else {
        EventBody::Image {
            url: image_url.unwrap_or_default(),
            mime: mime.unwrap_or_default(),
        }
    };
    Ok(ChatEvent {
        id: row.get(0)?,
        user: row.get(1)?,
        body,
        created_at: row.get(5)?,
    })
}

impl MessageStore for SqliteStore {
    fn append(&self, event: NewEvent) -> Result<ChatEvent, StoreError> {
        let conn = self.pool.get()?;
        let (text, image_url, mime) = match &event.body {
            EventBody::Text(t) => (Some(t.as_str()), None, None),
            EventBody::Image { url, mime } => (None, Some(url.as_str()), Some(mime.as_str())),
        };
        conn.execute(
            "INSERT INTO messages (user, text, image_url, mime, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![event.user, text, image_url, mime, event.created_at],
        )?;
        Ok(ChatEvent {
            id: conn.last_insert_rowid(),
            user: event.user,
            body: event.body,
            created_at: event.created_at,
        })
    }

    fn list_all(&self) -> Result<Vec<ChatEvent>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, user, text, image_url, mime, created_at FROM messages ORDER BY id",
        )?;
        let iter = stmt.query_map([], row_to_event)?;
        let mut events = Vec::new();
        for event in iter {
            events.push(event?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_store() -> (SqliteStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::init_pool(tmp.path().join("chat.db")).unwrap();
        (SqliteStore::new(pool), tmp)
    }

    #[test]
    fn ids_increase_in_append_order() {
        let (store, _tmp) = test_store();
        for i in 0..5 {
            let event = store
                .append(NewEvent {
                    user: "Alice".into(),
                    body: EventBody::Text(format!("m{i}")),
                    created_at: 100 + i,
                })
                .unwrap();
            assert_eq!(event.id, i + 1);
        }
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[0].id < pair[1].id);
        }
        assert_eq!(all[0].body, EventBody::Text("m0".into()));
        assert_eq!(all[4].body, EventBody::Text("m4".into()));
    }

    #[test]
    fn image_events_round_trip() {
        let (store, _tmp) = test_store();
        store
            .append(NewEvent {
                user: "Bob".into(),
                body: EventBody::Image {
                    url: "/uploads/ab.png".into(),
                    mime: "image/png".into(),
                },
                created_at: 7,
            })
            .unwrap();
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(
            all[0].body,
            EventBody::Image {
                url: "/uploads/ab.png".into(),
                mime: "image/png".into(),
            }
        );
        assert_eq!(all[0].created_at, 7);
    }
}
