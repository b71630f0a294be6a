use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which UDP endpoint wants notifications for which user.
///
/// Cheap to clone; every clone shares the same map. At most one endpoint per
/// user: a newer registration overwrites the older one. Entries never expire.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<i64, SocketAddr>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the endpoint for `user_id`. Returns the previous
    /// endpoint, if any.
    pub async fn register(&self, user_id: i64, addr: SocketAddr) -> Option<SocketAddr> {
        self.entries.write().await.insert(user_id, addr)
    }

    /// Remove the endpoint for `user_id`. Removing an absent user is a no-op.
    pub async fn unregister(&self, user_id: i64) -> Option<SocketAddr> {
        self.entries.write().await.remove(&user_id)
    }

    pub async fn lookup(&self, user_id: i64) -> Option<SocketAddr> {
        self.entries.read().await.get(&user_id).copied()
    }

    /// Point-in-time copy of every registration, ordered by user id.
    pub async fn snapshot(&self) -> Vec<(i64, SocketAddr)> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, addr)| (*id, *addr))
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn latest_registration_wins() {
        let registry = Registry::new();
        assert_eq!(registry.register(7, addr(9000)).await, None);
        assert_eq!(registry.register(7, addr(9001)).await, Some(addr(9000)));
        assert_eq!(registry.lookup(7).await, Some(addr(9001)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = Registry::new();
        registry.register(1, addr(9000)).await;
        assert_eq!(registry.unregister(1).await, Some(addr(9000)));
        assert_eq!(registry.unregister(1).await, None);
        assert_eq!(registry.lookup(1).await, None);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let registry = Registry::new();
        let other = registry.clone();
        other.register(3, addr(9003)).await;
        assert_eq!(registry.lookup(3).await, Some(addr(9003)));
    }

    #[tokio::test]
    async fn snapshot_is_sorted_and_detached() {
        let registry = Registry::new();
        registry.register(5, addr(9005)).await;
        registry.register(2, addr(9002)).await;
        let snap = registry.snapshot().await;
        registry.unregister(5).await;
        assert_eq!(snap, vec![(2, addr(9002)), (5, addr(9005))]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_entries() {
        let registry = Registry::new();
        let mut handles = Vec::new();
        for id in 0..64_i64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let port = 10_000 + u16::try_from(id).unwrap();
                registry.register(id, addr(port)).await;
                registry.lookup(id).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(registry.len().await, 64);
    }
}
