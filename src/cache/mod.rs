use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Config;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process key-value store with per-entry TTL. Deliberately minimal:
/// get, set, and delete-by-explicit-key-list only, no pattern scans, so the
/// backend could be swapped for any external store offering the same three
/// operations.
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn set(&self, key: String, value: Value, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn remove(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
    }

    /// Drops entries whose TTL has lapsed. Reads already ignore them; this
    /// just bounds memory between sweeps.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-optimized mirror of capacity state with one TTL per granularity:
/// seat entries turn over fastest, event aggregates slowest. Strictly an
/// acceleration layer; mutation decisions always go back to the database.
pub struct AvailabilityCache {
    store: CacheStore,
    seat_ttl: Duration,
    zone_ttl: Duration,
    event_ttl: Duration,
}

impl AvailabilityCache {
    pub fn new(config: &Config) -> Self {
        Self {
            store: CacheStore::new(),
            seat_ttl: config.cache_seat_ttl,
            zone_ttl: config.cache_zone_ttl,
            event_ttl: config.cache_event_ttl,
        }
    }

    pub fn seat_key(seat_id: Uuid) -> String {
        format!("availability:seat:{seat_id}")
    }

    pub fn zone_key(zone_id: Uuid) -> String {
        format!("availability:zone:{zone_id}")
    }

    pub fn event_key(event_id: Uuid) -> String {
        format!("availability:event:{event_id}")
    }

    pub async fn get_seat(&self, seat_id: Uuid) -> Option<Value> {
        self.store.get(&Self::seat_key(seat_id)).await
    }

    pub async fn get_zone(&self, zone_id: Uuid) -> Option<Value> {
        self.store.get(&Self::zone_key(zone_id)).await
    }

    pub async fn get_event(&self, event_id: Uuid) -> Option<Value> {
        self.store.get(&Self::event_key(event_id)).await
    }

    pub async fn put_seat(&self, seat_id: Uuid, snapshot: Value) {
        self.store
            .set(Self::seat_key(seat_id), snapshot, self.seat_ttl)
            .await;
    }

    pub async fn put_zone(&self, zone_id: Uuid, snapshot: Value) {
        self.store
            .set(Self::zone_key(zone_id), snapshot, self.zone_ttl)
            .await;
    }

    pub async fn put_event(&self, event_id: Uuid, snapshot: Value) {
        self.store
            .set(Self::event_key(event_id), snapshot, self.event_ttl)
            .await;
    }

    /// A seat write invalidates the seat itself plus its zone and event
    /// aggregates.
    pub async fn invalidate_seat(&self, seat_id: Uuid, zone_id: Uuid, event_id: Uuid) {
        self.store
            .remove(&[
                Self::seat_key(seat_id),
                Self::zone_key(zone_id),
                Self::event_key(event_id),
            ])
            .await;
    }

    /// A zone-quantity write (general-admission lock/reservation) touches the
    /// zone and event entries but no individual seat.
    pub async fn invalidate_zone(&self, zone_id: Uuid, event_id: Uuid) {
        self.store
            .remove(&[Self::zone_key(zone_id), Self::event_key(event_id)])
            .await;
    }

    /// An order write invalidates every zone/seat its items reference.
    pub async fn invalidate_items(
        &self,
        event_id: Uuid,
        touched: impl IntoIterator<Item = (Uuid, Option<Uuid>)>,
    ) {
        let mut keys = vec![Self::event_key(event_id)];
        for (zone_id, seat_id) in touched {
            keys.push(Self::zone_key(zone_id));
            if let Some(seat_id) = seat_id {
                keys.push(Self::seat_key(seat_id));
            }
        }
        self.store.remove(&keys).await;
    }

    pub async fn evict_expired(&self) -> usize {
        self.store.evict_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_cache() -> AvailabilityCache {
        AvailabilityCache {
            store: CacheStore::new(),
            seat_ttl: Duration::from_secs(5),
            zone_ttl: Duration::from_secs(30),
            event_ttl: Duration::from_secs(120),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_by_granularity() {
        let cache = test_cache();
        let seat = Uuid::new_v4();
        let zone = Uuid::new_v4();

        cache.put_seat(seat, json!({"status": "AVAILABLE"})).await;
        cache.put_zone(zone, json!({"available": 10})).await;

        tokio::time::advance(Duration::from_secs(6)).await;

        // Seat TTL (5s) lapsed, zone TTL (30s) still live.
        assert!(cache.get_seat(seat).await.is_none());
        assert!(cache.get_zone(zone).await.is_some());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get_zone(zone).await.is_none());
    }

    #[tokio::test]
    async fn seat_invalidation_cascades_to_zone_and_event() {
        let cache = test_cache();
        let (seat, zone, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        cache.put_seat(seat, json!(1)).await;
        cache.put_zone(zone, json!(2)).await;
        cache.put_event(event, json!(3)).await;

        cache.invalidate_seat(seat, zone, event).await;

        assert!(cache.get_seat(seat).await.is_none());
        assert!(cache.get_zone(zone).await.is_none());
        assert!(cache.get_event(event).await.is_none());
    }

    #[tokio::test]
    async fn zone_invalidation_leaves_unrelated_seats() {
        let cache = test_cache();
        let (seat, zone, event) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        cache.put_seat(seat, json!(1)).await;
        cache.put_zone(zone, json!(2)).await;
        cache.put_event(event, json!(3)).await;

        cache.invalidate_zone(zone, event).await;

        assert!(cache.get_seat(seat).await.is_some());
        assert!(cache.get_zone(zone).await.is_none());
        assert!(cache.get_event(event).await.is_none());
    }

    #[tokio::test]
    async fn order_invalidation_covers_all_item_keys() {
        let cache = test_cache();
        let event = Uuid::new_v4();
        let (zone_a, zone_b) = (Uuid::new_v4(), Uuid::new_v4());
        let seat = Uuid::new_v4();

        cache.put_event(event, json!(0)).await;
        cache.put_zone(zone_a, json!(1)).await;
        cache.put_zone(zone_b, json!(2)).await;
        cache.put_seat(seat, json!(3)).await;

        cache
            .invalidate_items(event, [(zone_a, Some(seat)), (zone_b, None)])
            .await;

        assert!(cache.get_event(event).await.is_none());
        assert!(cache.get_zone(zone_a).await.is_none());
        assert!(cache.get_zone(zone_b).await.is_none());
        assert!(cache.get_seat(seat).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_expired_drops_only_lapsed_entries() {
        let cache = test_cache();
        let seat = Uuid::new_v4();
        let event = Uuid::new_v4();

        cache.put_seat(seat, json!(1)).await;
        cache.put_event(event, json!(2)).await;

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(cache.evict_expired().await, 1);
        assert!(cache.get_event(event).await.is_some());
    }
}
