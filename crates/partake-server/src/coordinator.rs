//! Cross-instance room ownership.
//!
//! When several server instances sit behind one load balancer, two peers in
//! the same room can land on different instances and never see each other.
//! Instances therefore claim rooms in a shared store: the first instance to
//! claim a room owns it, and any other instance a member lands on redirects
//! the client to the owner.
//!
//! Claims carry a TTL and are refreshed at half-life by a background task,
//! so a crashed instance's rooms become claimable again without cleanup.

use crate::error::ServerError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// How long a room claim lives without a refresh.
pub const CLAIM_TTL: Duration = Duration::from_secs(300);

/// Shared store of room claims.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Claim `room` for `instance` if unclaimed. Returns `true` on success.
    async fn try_claim(
        &self,
        room: &str,
        instance: &str,
        ttl: Duration,
    ) -> Result<bool, ServerError>;

    /// Current owner of `room`, if any.
    async fn get_owner(&self, room: &str) -> Result<Option<String>, ServerError>;

    /// Extend an existing claim's TTL.
    async fn refresh(&self, room: &str, instance: &str, ttl: Duration) -> Result<(), ServerError>;

    /// Release `room` if `instance` owns it.
    async fn release(&self, room: &str, instance: &str) -> Result<(), ServerError>;
}

/// In-process claim store for single-instance runs and tests.
#[derive(Debug, Default)]
pub struct MemoryClaimStore {
    claims: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryClaimStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn try_claim(
        &self,
        room: &str,
        instance: &str,
        ttl: Duration,
    ) -> Result<bool, ServerError> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|_| ServerError::ClaimStore("claim map poisoned".into()))?;
        let now = Instant::now();
        match claims.get(room) {
            Some((owner, expires)) if *expires > now && owner != instance => Ok(false),
            _ => {
                claims.insert(room.to_owned(), (instance.to_owned(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn get_owner(&self, room: &str) -> Result<Option<String>, ServerError> {
        let claims = self
            .claims
            .lock()
            .map_err(|_| ServerError::ClaimStore("claim map poisoned".into()))?;
        Ok(claims
            .get(room)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(owner, _)| owner.clone()))
    }

    async fn refresh(&self, room: &str, instance: &str, ttl: Duration) -> Result<(), ServerError> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|_| ServerError::ClaimStore("claim map poisoned".into()))?;
        if let Some((owner, expires)) = claims.get_mut(room)
            && owner == instance
        {
            *expires = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn release(&self, room: &str, instance: &str) -> Result<(), ServerError> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|_| ServerError::ClaimStore("claim map poisoned".into()))?;
        if claims.get(room).is_some_and(|(owner, _)| owner == instance) {
            claims.remove(room);
        }
        Ok(())
    }
}

/// Redis-backed claim store: `SET key instance NX EX ttl`.
pub struct RedisClaimStore {
    client: redis::Client,
}

impl RedisClaimStore {
    /// Open a client against `url`. Connections are established lazily.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ClaimStore` when the URL is malformed.
    pub fn open(url: &str) -> Result<Self, ServerError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    fn key(room: &str) -> String {
        format!("partake:room:{room}")
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn try_claim(
        &self,
        room: &str,
        instance: &str,
        ttl: Duration,
    ) -> Result<bool, ServerError> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let set: Option<String> = redis::cmd("SET")
            .arg(Self::key(room))
            .arg(instance)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        if set.is_some() {
            return Ok(true);
        }
        // NX lost: it may be our own claim from a previous connection
        let owner: Option<String> = redis::cmd("GET")
            .arg(Self::key(room))
            .query_async(&mut conn)
            .await?;
        Ok(owner.as_deref() == Some(instance))
    }

    async fn get_owner(&self, room: &str) -> Result<Option<String>, ServerError> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let owner: Option<String> = redis::cmd("GET")
            .arg(Self::key(room))
            .query_async(&mut conn)
            .await?;
        Ok(owner)
    }

    async fn refresh(&self, room: &str, instance: &str, ttl: Duration) -> Result<(), ServerError> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let owner: Option<String> = redis::cmd("GET")
            .arg(Self::key(room))
            .query_async(&mut conn)
            .await?;
        if owner.as_deref() == Some(instance) {
            let _: () = redis::cmd("EXPIRE")
                .arg(Self::key(room))
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn release(&self, room: &str, instance: &str) -> Result<(), ServerError> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let owner: Option<String> = redis::cmd("GET")
            .arg(Self::key(room))
            .query_async(&mut conn)
            .await?;
        if owner.as_deref() == Some(instance) {
            let _: () = redis::cmd("DEL")
                .arg(Self::key(room))
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }
}

/// Outcome of trying to take ownership of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomOwnership {
    /// This instance owns the room; proceed with the join
    Ours,
    /// Another instance owns the room; redirect the client there
    Foreign(String),
}

/// Tracks which rooms this instance owns and keeps their claims alive.
pub struct Coordinator {
    store: Option<Arc<dyn ClaimStore>>,
    instance_id: String,
    held: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    /// Build a coordinator. With no store every room is owned locally and
    /// no background refresh runs.
    #[must_use]
    pub fn new(instance_id: String, store: Option<Arc<dyn ClaimStore>>) -> Arc<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let coordinator = Arc::new(Self {
            store,
            instance_id,
            held: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        });
        if coordinator.store.is_some() {
            tokio::spawn(run_refresh(Arc::clone(&coordinator), shutdown_rx));
        }
        coordinator
    }

    /// Try to take ownership of `room` for this instance.
    ///
    /// A store failure degrades to local ownership with a warning rather
    /// than refusing service: a flaky Redis should not take down transfers
    /// that happen to land on one instance anyway.
    pub async fn acquire(&self, room: &str) -> RoomOwnership {
        let Some(store) = &self.store else {
            return RoomOwnership::Ours;
        };
        match store.try_claim(room, &self.instance_id, CLAIM_TTL).await {
            Ok(true) => {
                self.remember(room);
                RoomOwnership::Ours
            }
            Ok(false) => match store.get_owner(room).await {
                Ok(Some(owner)) if owner != self.instance_id => RoomOwnership::Foreign(owner),
                Ok(_) => {
                    // claim expired between the two calls; ours now
                    self.remember(room);
                    RoomOwnership::Ours
                }
                Err(err) => {
                    warn!(room, %err, "claim store unavailable, assuming sole ownership");
                    RoomOwnership::Ours
                }
            },
            Err(err) => {
                warn!(room, %err, "claim store unavailable, assuming sole ownership");
                RoomOwnership::Ours
            }
        }
    }

    /// Release this instance's claim on `room` after the room is destroyed.
    pub async fn release(&self, room: &str) {
        self.forget(room);
        if let Some(store) = &self.store
            && let Err(err) = store.release(room, &self.instance_id).await
        {
            warn!(room, %err, "failed to release room claim");
        }
    }

    /// Stop the background refresh task.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn remember(&self, room: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.insert(room.to_owned());
        }
    }

    fn forget(&self, room: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(room);
        }
    }

    fn held_rooms(&self) -> Vec<String> {
        match self.held.lock() {
            Ok(held) => held.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

async fn run_refresh(coordinator: Arc<Coordinator>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(CLAIM_TTL / 2);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
        let Some(store) = &coordinator.store else {
            return;
        };
        for room in coordinator.held_rooms() {
            match store
                .refresh(&room, &coordinator.instance_id, CLAIM_TTL)
                .await
            {
                Ok(()) => debug!(room, "refreshed room claim"),
                Err(err) => warn!(room, %err, "failed to refresh room claim"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_claims() {
        let store = MemoryClaimStore::new();
        assert!(store.try_claim("r", "a", CLAIM_TTL).await.unwrap());
        assert!(!store.try_claim("r", "b", CLAIM_TTL).await.unwrap());
        // re-claiming our own room succeeds
        assert!(store.try_claim("r", "a", CLAIM_TTL).await.unwrap());
        assert_eq!(store.get_owner("r").await.unwrap().as_deref(), Some("a"));

        // only the owner can release
        store.release("r", "b").await.unwrap();
        assert_eq!(store.get_owner("r").await.unwrap().as_deref(), Some("a"));
        store.release("r", "a").await.unwrap();
        assert!(store.get_owner("r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_claim_is_reclaimable() {
        let store = MemoryClaimStore::new();
        assert!(store.try_claim("r", "a", Duration::ZERO).await.unwrap());
        assert!(store.get_owner("r").await.unwrap().is_none());
        assert!(store.try_claim("r", "b", CLAIM_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_instance_gets_foreign() {
        let store: Arc<dyn ClaimStore> = Arc::new(MemoryClaimStore::new());
        let first = Coordinator::new("one".into(), Some(Arc::clone(&store)));
        let second = Coordinator::new("two".into(), Some(Arc::clone(&store)));

        assert_eq!(first.acquire("room").await, RoomOwnership::Ours);
        assert_eq!(
            second.acquire("room").await,
            RoomOwnership::Foreign("one".into())
        );

        first.release("room").await;
        assert_eq!(second.acquire("room").await, RoomOwnership::Ours);

        first.shutdown();
        second.shutdown();
    }

    #[tokio::test]
    async fn test_no_store_owns_everything() {
        let coordinator = Coordinator::new("solo".into(), None);
        assert_eq!(coordinator.acquire("any").await, RoomOwnership::Ours);
        coordinator.release("any").await;
    }

    struct FailingStore;

    #[async_trait]
    impl ClaimStore for FailingStore {
        async fn try_claim(&self, _: &str, _: &str, _: Duration) -> Result<bool, ServerError> {
            Err(ServerError::ClaimStore("down".into()))
        }
        async fn get_owner(&self, _: &str) -> Result<Option<String>, ServerError> {
            Err(ServerError::ClaimStore("down".into()))
        }
        async fn refresh(&self, _: &str, _: &str, _: Duration) -> Result<(), ServerError> {
            Err(ServerError::ClaimStore("down".into()))
        }
        async fn release(&self, _: &str, _: &str) -> Result<(), ServerError> {
            Err(ServerError::ClaimStore("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_local_ownership() {
        let coordinator = Coordinator::new("solo".into(), Some(Arc::new(FailingStore)));
        assert_eq!(coordinator.acquire("room").await, RoomOwnership::Ours);
        coordinator.shutdown();
    }
}
