// Connection pool - bounded set of live connections keyed by feed identity
use crate::application::feed_key::FeedKey;
use crate::application::live_transport::ConnectionHandle;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;

pub const DEFAULT_MAX_CONNECTIONS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub struct Connection {
    pub id: ConnectionId,
    pub key: FeedKey,
    pub opened_at: DateTime<Utc>,
    handle: Box<dyn ConnectionHandle>,
}

/// Owns every live connection. At most one per key, at most `max` overall;
/// the oldest arrival is evicted first regardless of key.
///
/// `open` takes `&mut self` for the whole factory call, so a factory cannot
/// re-enter the pool and register a duplicate under the same key.
pub struct ConnectionPool {
    max_connections: usize,
    by_key: HashMap<FeedKey, Connection>,
    arrival: VecDeque<FeedKey>,
    next_id: u64,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        if max_connections == 0 {
            tracing::warn!("max_connections of 0 is not valid, using 1");
        }
        Self {
            max_connections: max_connections.max(1),
            by_key: HashMap::new(),
            arrival: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Returns the existing connection for `key`, or opens one with `factory`.
    /// A failing factory leaves the pool untouched and its error is returned.
    pub fn open<F, E>(&mut self, key: FeedKey, factory: F) -> Result<ConnectionId, E>
    where
        F: FnOnce(ConnectionId) -> Result<Box<dyn ConnectionHandle>, E>,
    {
        if let Some(existing) = self.by_key.get(&key) {
            tracing::debug!("Reusing {} for {}", existing.id, key);
            return Ok(existing.id);
        }

        let id = ConnectionId(self.next_id);
        let handle = factory(id)?;
        self.next_id += 1;

        tracing::info!("Opened {} for {}", id, key);
        self.arrival.push_back(key.clone());
        self.by_key.insert(
            key.clone(),
            Connection {
                id,
                key,
                opened_at: Utc::now(),
                handle,
            },
        );

        self.prune();
        Ok(id)
    }

    /// Closes and forgets the connection for `key`. No-op when absent.
    pub fn close(&mut self, key: &FeedKey) -> bool {
        let Some(mut connection) = self.by_key.remove(key) else {
            return false;
        };
        self.arrival.retain(|k| k != key);
        connection.handle.close();
        tracing::info!("Closed {} for {}", connection.id, key);
        true
    }

    pub fn close_all(&mut self) {
        let count = self.by_key.len();
        for (_, mut connection) in self.by_key.drain() {
            connection.handle.close();
        }
        self.arrival.clear();
        if count > 0 {
            tracing::info!("Closed all {} live connections", count);
        }
    }

    pub fn get(&self, key: &FeedKey) -> Option<&Connection> {
        self.by_key.get(key)
    }

    pub fn contains(&self, key: &FeedKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Keys from oldest to newest arrival.
    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &FeedKey> {
        self.arrival.iter()
    }

    fn prune(&mut self) {
        while self.by_key.len() > self.max_connections {
            let Some(oldest) = self.arrival.pop_front() else {
                break;
            };
            if let Some(mut connection) = self.by_key.remove(&oldest) {
                connection.handle.close();
                tracing::info!("Evicted {} for {} (pool limit {})", connection.id, oldest, self.max_connections);
            }
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::feed_key::build_key;
    use crate::domain::params::{AddressingParams, ControlParams};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle(Arc<AtomicUsize>);

    impl ConnectionHandle for CountingHandle {
        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn key(sensor: &str) -> FeedKey {
        build_key(
            &AddressingParams::new("F1", "B1", sensor),
            &ControlParams::default(),
        )
        .unwrap()
    }

    fn counting(closes: &Arc<AtomicUsize>) -> Result<Box<dyn ConnectionHandle>, String> {
        Ok(Box::new(CountingHandle(closes.clone())))
    }

    #[test]
    fn test_open_reuses_existing_key() {
        let mut pool = ConnectionPool::new(1);
        let closes = Arc::new(AtomicUsize::new(0));
        let mut factory_calls = 0;

        let first = pool
            .open(key("temperature"), |_| {
                factory_calls += 1;
                counting(&closes)
            })
            .unwrap();
        let second = pool
            .open(key("temperature"), |_| {
                factory_calls += 1;
                counting(&closes)
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(factory_calls, 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_new_key_evicts_oldest() {
        let mut pool = ConnectionPool::new(1);
        let closes_a = Arc::new(AtomicUsize::new(0));
        let closes_b = Arc::new(AtomicUsize::new(0));

        pool.open(key("temperature"), |_| counting(&closes_a)).unwrap();
        let b = pool.open(key("humidity"), |_| counting(&closes_b)).unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&key("humidity")).unwrap().id, b);
        assert!(!pool.contains(&key("temperature")));
        assert_eq!(closes_a.load(Ordering::SeqCst), 1);
        assert_eq!(closes_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_eviction_is_fifo_by_arrival() {
        let mut pool = ConnectionPool::new(2);
        let closes = Arc::new(AtomicUsize::new(0));

        pool.open(key("a"), |_| counting(&closes)).unwrap();
        pool.open(key("b"), |_| counting(&closes)).unwrap();
        // reopening "a" is a reuse, so it keeps its original arrival slot
        pool.open(key("a"), |_| counting(&closes)).unwrap();
        pool.open(key("c"), |_| counting(&closes)).unwrap();

        let keys: Vec<_> = pool.keys().cloned().collect();
        assert_eq!(keys, vec![key("b"), key("c")]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_factory_registers_nothing() {
        let mut pool = ConnectionPool::new(1);
        let result: Result<ConnectionId, String> =
            pool.open(key("temperature"), |_| Err("refused".to_string()));

        assert_eq!(result, Err("refused".to_string()));
        assert!(pool.is_empty());
        assert_eq!(pool.keys().count(), 0);
    }

    #[test]
    fn test_close_and_close_all() {
        let mut pool = ConnectionPool::new(3);
        let closes = Arc::new(AtomicUsize::new(0));
        pool.open(key("a"), |_| counting(&closes)).unwrap();
        pool.open(key("b"), |_| counting(&closes)).unwrap();
        pool.open(key("c"), |_| counting(&closes)).unwrap();

        assert!(pool.close(&key("b")));
        assert!(!pool.close(&key("b")));
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        pool.close_all();
        assert!(pool.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let mut pool = ConnectionPool::new(0);
        let closes = Arc::new(AtomicUsize::new(0));
        pool.open(key("a"), |_| counting(&closes)).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
