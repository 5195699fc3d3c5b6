use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One live client connection eligible for broadcast delivery. The sender
/// pushes serialized frames to the connection task; nothing else is kept
/// per session.
pub struct Session {
    pub id: Uuid,
    pub tx: mpsc::UnboundedSender<String>,
}

impl Session {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id: Uuid::new_v4(), tx }, rx)
    }
}

/// The set of currently connected sessions. Mutated by connects and
/// disconnects, read by every broadcast.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl SessionRegistry {
    pub fn add(&self, session: Session) {
        self.sessions.lock().insert(session.id, session.tx);
    }

    /// No-op when the session is already gone.
    pub fn remove(&self, id: &Uuid) {
        self.sessions.lock().remove(id);
    }

    /// Deliver `frame` to every registered session. A session whose
    /// receiver is gone is removed on the spot; the rest still get the
    /// frame.
    pub fn broadcast(&self, frame: &str) {
        self.sessions.lock().retain(|id, tx| {
            let delivered = tx.send(frame.to_string()).is_ok();
            if !delivered {
                tracing::debug!(session = %id, "dropping dead session");
            }
            delivered
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
