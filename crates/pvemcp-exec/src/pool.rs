//! Per-node session pool with scoped checkout
//!
//! A session is owned by exactly one [`PooledSession`] guard while a command
//! runs on it. Dropping the guard either parks the session for reuse or closes
//! it; sessions marked broken or already closed are never parked.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// A connection that can be parked in a [`SessionPool`]
pub trait PoolableSession: Send + 'static {
    /// Whether the underlying connection has gone away
    fn is_closed(&self) -> bool;

    /// Release the underlying connection
    fn close(self);
}

struct PoolInner<S> {
    idle: Mutex<HashMap<String, Vec<S>>>,
    keep_alive: bool,
    max_idle_per_key: usize,
}

impl<S> PoolInner<S> {
    fn idle(&self) -> MutexGuard<'_, HashMap<String, Vec<S>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Idle sessions grouped by connection key
pub struct SessionPool<S: PoolableSession> {
    inner: Arc<PoolInner<S>>,
}

impl<S: PoolableSession> Clone for SessionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PoolableSession> SessionPool<S> {
    /// Create a pool
    ///
    /// With `keep_alive` off every session is closed when its guard drops.
    #[must_use]
    pub fn new(keep_alive: bool, max_idle_per_key: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(HashMap::new()),
                keep_alive,
                max_idle_per_key,
            }),
        }
    }

    /// Take an idle, still-open session for `key`
    ///
    /// Closed sessions found on the way are dropped.
    pub fn take_idle(&self, key: &str) -> Option<PooledSession<S>> {
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.inner.idle();
            let sessions = idle.get_mut(key)?;
            let mut found = None;
            while let Some(session) = sessions.pop() {
                if session.is_closed() {
                    stale.push(session);
                } else {
                    found = Some(session);
                    break;
                }
            }
            found
        };

        if !stale.is_empty() {
            debug!(key, discarded = stale.len(), "discarding closed pooled sessions");
        }
        for session in stale {
            session.close();
        }

        found.map(|session| self.attach(key, session))
    }

    /// Wrap a freshly opened session in a guard owned by this pool
    pub fn attach(&self, key: &str, session: S) -> PooledSession<S> {
        PooledSession {
            session: Some(session),
            key: key.to_string(),
            pool: Arc::clone(&self.inner),
            reusable: true,
        }
    }

    /// Number of idle sessions parked for `key`
    #[must_use]
    pub fn idle_count(&self, key: &str) -> usize {
        self.inner.idle().get(key).map_or(0, Vec::len)
    }

    /// Close every idle session
    pub fn clear(&self) {
        let drained: Vec<S> = self.inner.idle().drain().flat_map(|(_, v)| v).collect();
        for session in drained {
            session.close();
        }
    }
}

/// Exclusive handle on one session for the duration of a command
pub struct PooledSession<S: PoolableSession> {
    session: Option<S>,
    key: String,
    pool: Arc<PoolInner<S>>,
    reusable: bool,
}

impl<S: PoolableSession> PooledSession<S> {
    /// Never return this session to the pool
    pub fn discard(&mut self) {
        self.reusable = false;
    }

    /// Pool key this session belongs to
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<S: PoolableSession> Deref for PooledSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        // Only `Drop` takes the session out.
        self.session.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<S: PoolableSession> DerefMut for PooledSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<S: PoolableSession> Drop for PooledSession<S> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if self.reusable && self.pool.keep_alive && !session.is_closed() {
            let mut idle = self.pool.idle();
            let parked = idle.entry(self.key.clone()).or_default();
            if parked.len() < self.pool.max_idle_per_key {
                parked.push(session);
                return;
            }
            drop(idle);
        }

        session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeSession {
        id: usize,
        closed: Arc<AtomicBool>,
        close_calls: Arc<AtomicUsize>,
    }

    impl FakeSession {
        fn new(id: usize, close_calls: &Arc<AtomicUsize>) -> Self {
            Self {
                id,
                closed: Arc::new(AtomicBool::new(false)),
                close_calls: Arc::clone(close_calls),
            }
        }
    }

    impl PoolableSession for FakeSession {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn close(self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_without_keep_alive_sessions_close_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = SessionPool::new(false, 2);

        drop(pool.attach("n1", FakeSession::new(1, &closes)));

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count("n1"), 0);
    }

    #[test]
    fn test_keep_alive_parks_and_reuses_session() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = SessionPool::new(true, 2);

        drop(pool.attach("n1", FakeSession::new(7, &closes)));
        assert_eq!(pool.idle_count("n1"), 1);

        let reused = pool.take_idle("n1").unwrap();
        assert_eq!(reused.id, 7);
        // checked out sessions are not visible to other callers
        assert_eq!(pool.idle_count("n1"), 0);
        assert!(pool.take_idle("n1").is_none());

        drop(reused);
        assert_eq!(pool.idle_count("n1"), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discarded_session_is_never_parked() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = SessionPool::new(true, 2);

        let mut guard = pool.attach("n1", FakeSession::new(1, &closes));
        guard.discard();
        drop(guard);

        assert_eq!(pool.idle_count("n1"), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_idle_session_skipped_on_checkout() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = SessionPool::new(true, 4);

        let healthy = FakeSession::new(1, &closes);
        let broken = FakeSession::new(2, &closes);
        let broken_flag = Arc::clone(&broken.closed);

        drop(pool.attach("n1", healthy));
        drop(pool.attach("n1", broken));
        broken_flag.store(true, Ordering::SeqCst);

        let guard = pool.take_idle("n1").unwrap();
        assert_eq!(guard.id, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_cap_per_key() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = SessionPool::new(true, 1);

        let a = pool.attach("n1", FakeSession::new(1, &closes));
        let b = pool.attach("n1", FakeSession::new(2, &closes));
        drop(a);
        drop(b);

        assert_eq!(pool.idle_count("n1"), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        pool.clear();
        assert_eq!(pool.idle_count("n1"), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }
}
