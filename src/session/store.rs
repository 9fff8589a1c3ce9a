use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use super::Session;
use crate::types::{AppError, AppResult};

pub type SharedSession = Arc<Mutex<Session>>;

struct Entry {
    session: SharedSession,
    last_seen: Instant,
}

/// Live sessions keyed by id. Each session carries its own lock so a slow
/// question only blocks the session that asked it.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl SessionStore {
    pub async fn insert(&self, session: Session) -> Uuid {
        let id = session.id();
        let mut guard = self.inner.write().await;
        guard.insert(
            id,
            Entry {
                session: Arc::new(Mutex::new(session)),
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Look up a session and mark it as active.
    pub async fn get(&self, id: Uuid) -> AppResult<SharedSession> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?;
        entry.last_seen = Instant::now();
        Ok(entry.session.clone())
    }

    pub async fn remove(&self, id: Uuid) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        guard
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop sessions untouched for longer than `ttl`.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        match Instant::now().checked_sub(ttl) {
            Some(cutoff) => self.evict_older_than(cutoff).await,
            None => 0,
        }
    }

    /// Drop sessions last seen before `cutoff`. A session whose lock is held
    /// is mid-request and stays.
    pub async fn evict_older_than(&self, cutoff: Instant) -> usize {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.last_seen >= cutoff || entry.session.try_lock().is_err());
        before - guard.len()
    }

    /// Periodically evict sessions idle for longer than `ttl`.
    pub fn spawn_sweeper(&self, ttl: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = store.evict_idle(ttl).await;
                if evicted > 0 {
                    let remaining = store.len().await;
                    info!(evicted, remaining, "Evicted idle sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataConfig, LLMConfig};
    use crate::llm::client::testing::{CountingConnector, ScriptedAdapter};
    use crate::llm::ClientFactory;

    fn session() -> Session {
        let connector = Arc::new(CountingConnector::new(ScriptedAdapter::replying("ok")));
        Session::new(ClientFactory::new(connector, LLMConfig::default()), DataConfig::default())
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = SessionStore::default();
        assert!(store.is_empty().await);

        let id = store.insert(session()).await;
        let shared = store.get(id).await.unwrap();
        assert_eq!(shared.lock().await.id(), id);
        assert_eq!(store.len().await, 1);

        store.remove(id).await.unwrap();
        assert!(matches!(store.get(id).await, Err(AppError::NotFound(_))));
        assert!(matches!(store.remove(id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = SessionStore::default();
        let a = store.insert(session()).await;
        let b = store.insert(session()).await;
        assert_ne!(a, b);

        let shared_a = store.get(a).await.unwrap();
        let _held = shared_a.lock().await;
        // b stays reachable while a is locked
        let shared_b = store.get(b).await.unwrap();
        assert!(shared_b.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::default();
        let active = store.insert(session()).await;
        let idle = store.insert(session()).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let cutoff = Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.get(active).await.unwrap();

        assert_eq!(store.evict_older_than(cutoff).await, 1);
        assert!(store.get(active).await.is_ok());
        assert!(matches!(store.get(idle).await, Err(AppError::NotFound(_))));

        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_busy_session_survives_eviction() {
        let store = SessionStore::default();
        let id = store.insert(session()).await;
        let shared = store.get(id).await.unwrap();
        let held = shared.lock().await;

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(store.evict_older_than(later).await, 0);
        drop(held);
        assert_eq!(store.evict_older_than(later).await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweeper_clears_idle_sessions() {
        let store = SessionStore::default();
        store.insert(session()).await;

        let sweeper = store.spawn_sweeper(Duration::from_millis(1), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();
        assert!(store.is_empty().await);
    }
}
