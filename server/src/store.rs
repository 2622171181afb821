use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use shared::prelude::*;

/// Process-wide registry of per-connection message history.
///
/// The map lock is only held to insert, remove or look up an entry; each
/// history has its own mutex, so appends on different connections proceed
/// independently.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<SessionEntry>>>,
}

struct SessionEntry {
    opened_at: SystemTime,
    history: Mutex<Vec<QuizMessage>>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub connection_id: Uuid,
    pub opened_at: SystemTime,
    pub messages: usize,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty history. An existing entry under the same id is replaced.
    pub fn open(&self, connection_id: Uuid) {
        let entry = Arc::new(SessionEntry {
            opened_at: SystemTime::now(),
            history: Mutex::new(Vec::new()),
        });
        if self.sessions.write().insert(connection_id, entry).is_some() {
            warn!(connection = %connection_id, "session id reused, previous history replaced");
        }
    }

    pub fn append(&self, connection_id: Uuid, message: QuizMessage) -> Result<(), StoreError> {
        let entry = self
            .entry(connection_id)
            .ok_or(StoreError::UnknownConnection(connection_id))?;
        entry.history.lock().push(message);
        Ok(())
    }

    pub fn history(&self, connection_id: Uuid) -> Option<Vec<QuizMessage>> {
        self.entry(connection_id)
            .map(|entry| entry.history.lock().clone())
    }

    /// Evict a session, returning its history.
    pub fn remove(&self, connection_id: Uuid) -> Option<Vec<QuizMessage>> {
        let entry = self.sessions.write().remove(&connection_id)?;
        let history = std::mem::take(&mut *entry.history.lock());
        Some(history)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Snapshot of every known session, oldest first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let entries: Vec<(Uuid, Arc<SessionEntry>)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        let mut summaries: Vec<SessionSummary> = entries
            .into_iter()
            .map(|(connection_id, entry)| SessionSummary {
                connection_id,
                opened_at: entry.opened_at,
                messages: entry.history.lock().len(),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.opened_at);
        summaries
    }

    fn entry(&self, connection_id: Uuid) -> Option<Arc<SessionEntry>> {
        self.sessions.read().get(&connection_id).cloned()
    }
}
