use crate::config::Config;
use crate::error::ConvertError;
use crate::session::ConversionSession;
use crate::worker::WorkerPool;
use chrono::{TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

type Sessions = HashMap<Uuid, Arc<ConversionSession>>;

/// Application state shared across handlers
pub struct AppState {
    pub worker_pool: WorkerPool,
    pub config: Arc<Config>,
    sessions: Mutex<Sessions>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            worker_pool: WorkerPool::new(config.worker_count),
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// A session that is not tied to any id, for one-shot requests.
    pub fn ephemeral_session(&self) -> ConversionSession {
        ConversionSession::new(self.worker_pool.clone(), self.config.limits())
    }

    pub fn session(&self, id: Uuid) -> Option<Arc<ConversionSession>> {
        self.lock_sessions().get(&id).cloned()
    }

    /// Fetch the session for `id`, creating it if there is room.
    ///
    /// Creating a session first evicts idle sessions older than the TTL, and
    /// when the map is still full, the least recently active idle one.
    pub fn session_or_create(&self, id: Uuid) -> Result<Arc<ConversionSession>, ConvertError> {
        let mut sessions = self.lock_sessions();
        if let Some(session) = sessions.get(&id) {
            return Ok(session.clone());
        }
        self.evict_idle(&mut sessions);
        if sessions.len() >= self.config.max_sessions {
            return Err(ConvertError::SessionLimit);
        }
        let session = Arc::new(self.ephemeral_session());
        sessions.insert(id, session.clone());
        Ok(session)
    }

    pub fn remove_session(&self, id: Uuid) -> Option<Arc<ConversionSession>> {
        self.lock_sessions().remove(&id)
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    fn evict_idle(&self, sessions: &mut Sessions) {
        let before = sessions.len();

        let ttl = i64::try_from(self.config.session_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds);
        if let Some(cutoff) = ttl.and_then(|ttl| Utc::now().checked_sub_signed(ttl)) {
            sessions.retain(|_, s| !(s.is_idle() && s.last_activity() < cutoff));
        }

        if sessions.len() >= self.config.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, s)| s.is_idle())
                .min_by_key(|(_, s)| s.last_activity())
                .map(|(id, _)| *id);
            if let Some(id) = oldest {
                sessions.remove(&id);
            }
        }

        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
