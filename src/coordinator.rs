use crate::model::{normalize_user, ChatEvent, EventBody, WireEvent};
use crate::registry::{Session, SessionRegistry};
use crate::store::{MessageStore, NewEvent, StoreError};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Nothing left after trimming. Callers drop the submission silently;
    /// no record is created and nothing is broadcast.
    #[error("empty message")]
    EmptyMessage,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Accepts inbound events, persists them, and fans them out to every
/// connected session.
///
/// A single order lock serializes each persist+publish sequence and each
/// snapshot+register sequence. That gives every session the same view of
/// the stream: events arrive in the order the store assigned their ids,
/// and a connecting session's history snapshot is a strict prefix of the
/// live stream it then receives, with no gap and no duplicate between
/// the two.
pub struct Coordinator {
    store: Arc<dyn MessageStore>,
    registry: SessionRegistry,
    order: Mutex<()>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            registry: SessionRegistry::default(),
            order: Mutex::new(()),
        }
    }

    /// Accept a text message. Whitespace-only input is rejected before
    /// anything is recorded or broadcast.
    pub async fn submit_text(
        &self,
        user: Option<&str>,
        raw: &str,
    ) -> Result<ChatEvent, SubmitError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyMessage);
        }
        self.accept(user, EventBody::Text(text.to_string())).await
    }

    /// Announce an image whose bytes are already durably in the blob
    /// store; store-then-announce ordering is the upload route's job.
    pub async fn submit_image(
        &self,
        user: Option<&str>,
        image_url: &str,
        mime: &str,
    ) -> Result<ChatEvent, SubmitError> {
        self.accept(
            user,
            EventBody::Image {
                url: image_url.to_string(),
                mime: mime.to_string(),
            },
        )
        .await
    }

    async fn accept(&self, user: Option<&str>, body: EventBody) -> Result<ChatEvent, SubmitError> {
        let user = normalize_user(user);
        let _order = self.order.lock().await;
        let created_at = OffsetDateTime::now_utc().unix_timestamp();
        let event = self.store.append(NewEvent {
            user,
            body,
            created_at,
        })?;
        // The append committed; only now may any session observe the
        // event. The sender's own session receives the echo like everyone
        // else and renders from it.
        let frame = serde_json::to_string(&WireEvent::from_event(&event)).unwrap();
        self.registry.broadcast(&frame);
        tracing::debug!(id = event.id, sessions = self.registry.len(), "event accepted");
        Ok(event)
    }

    /// Connect handshake: deliver the full transcript to the session as
    /// one batch, then subscribe it to the live stream. Both steps happen
    /// under the order lock, so no event accepted in between can be
    /// missed by or duplicated for the joining session.
    pub async fn connect(&self, session: Session) -> Result<(), StoreError> {
        let _order = self.order.lock().await;
        let history = self.store.list_all()?;
        let records: Vec<WireEvent> = history.iter().map(WireEvent::from_event).collect();
        let frame = serde_json::to_string(&records).unwrap();
        if session.tx.send(frame).is_err() {
            // Client went away before the handshake finished.
            return Ok(());
        }
        self.registry.add(session);
        Ok(())
    }

    /// Idempotent; disconnecting a session that is already gone is a
    /// no-op.
    pub fn disconnect(&self, id: &Uuid) {
        self.registry.remove(id);
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}
