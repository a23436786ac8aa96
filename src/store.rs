// The TTL-bounded cache of active PreBook holds, keyed by offer key. This is
// the middleware between the customer-facing handlers and the supplier: it
// owns the "does a valid hold already exist" decision, so expiry is enforced
// here and nowhere else.

use crate::clock::Clock;
use crate::model::{Hold, HoldStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_entries: usize,
    pub sweep_interval_seconds: u64,
    pub sweep_grace_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            sweep_interval_seconds: 60,
            sweep_grace_seconds: 300,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("reservation store at capacity ({0} entries)")]
    CapacityExhausted(usize),
}

#[derive(Debug, Default)]
struct StoreStats {
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
    expired_count: AtomicUsize,
    put_count: AtomicUsize,
    eviction_count: AtomicUsize,
}

#[derive(Debug, Default, Clone)]
pub struct StoreStatsReport {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub put_count: usize,
    pub eviction_count: usize,
}

pub struct ReservationStore {
    holds: DashMap<String, Hold>,
    // One async mutex per offer key. The engine takes it around its whole
    // read-then-possibly-create sequence, so the mutual-exclusion domain is
    // the key, not the map: unrelated offers never serialize.
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    stats: StoreStats,
}

impl ReservationStore {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            holds: DashMap::new(),
            key_locks: DashMap::new(),
            clock,
            config,
            stats: StoreStats::default(),
        }
    }

    /// The per-key critical-section handle. Holding the returned mutex is
    /// what makes "check, then maybe create" race-free for one offer.
    pub fn key_lock(&self, offer_key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(offer_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Returns the active hold for the key, applying lazy expiry: an entry
    /// past `expires_at` is evicted and reported as a miss, never returned
    /// stale.
    pub fn get(&self, offer_key: &str) -> Option<Hold> {
        let now = self.clock.now();
        let stale = match self.holds.get(offer_key) {
            Some(entry) if entry.is_active_at(now) => {
                self.stats.hit_count.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            Some(entry) => entry.status == HoldStatus::Active && entry.is_expired_at(now),
            None => false,
        };
        if stale {
            let removed = self
                .holds
                .remove_if(offer_key, |_, hold| hold.is_expired_at(now))
                .is_some();
            if removed {
                self.stats.expired_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(offer_key, "evicted expired hold on read");
            }
        }
        self.stats.miss_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Status-corrected read without eviction: an expired entry comes back
    /// with `HoldStatus::Expired`. Used to explain why a finalize was
    /// rejected.
    pub fn peek(&self, offer_key: &str) -> Option<Hold> {
        let now = self.clock.now();
        self.holds.get(offer_key).map(|entry| {
            let mut hold = entry.clone();
            if hold.status == HoldStatus::Active && hold.is_expired_at(now) {
                hold.status = HoldStatus::Expired;
            }
            hold
        })
    }

    /// Stores a hold under its offer key, replacing any previous entry for
    /// that key. At capacity, the entry closest to expiry is evicted first.
    pub fn put(&self, hold: Hold) -> Result<(), StoreError> {
        if self.holds.len() >= self.config.max_entries && !self.holds.contains_key(&hold.offer_key)
        {
            if !self.evict_soonest_expiring() {
                return Err(StoreError::CapacityExhausted(self.config.max_entries));
            }
        }
        self.stats.put_count.fetch_add(1, Ordering::Relaxed);
        self.holds.insert(hold.offer_key.clone(), hold);
        Ok(())
    }

    pub fn remove(&self, offer_key: &str) -> Option<Hold> {
        self.holds.remove(offer_key).map(|(_, hold)| hold)
    }

    /// Time until the active hold for this key lapses; zero if absent,
    /// expired, or already terminal. Surfaced to the UI countdown.
    pub fn time_remaining(&self, offer_key: &str) -> Duration {
        let now = self.clock.now();
        match self.holds.get(offer_key) {
            Some(hold) if hold.is_active_at(now) => {
                (hold.expires_at - now).to_std().unwrap_or(Duration::ZERO)
            }
            _ => Duration::ZERO,
        }
    }

    pub fn mark_consumed(&self, offer_key: &str) -> bool {
        self.set_status(offer_key, HoldStatus::Consumed)
    }

    pub fn mark_failed(&self, offer_key: &str) -> bool {
        self.set_status(offer_key, HoldStatus::Failed)
    }

    fn set_status(&self, offer_key: &str, status: HoldStatus) -> bool {
        match self.holds.get_mut(offer_key) {
            Some(mut hold) => {
                hold.status = status;
                true
            }
            None => false,
        }
    }

    /// Removes entries whose expiry lies more than `grace` in the past, and
    /// terminal (consumed/failed) entries past expiry. Correctness never
    /// depends on this running; `get` already enforces expiry.
    pub fn sweep_expired(&self, grace: Duration) -> usize {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::seconds(grace.as_secs() as i64);
        let before = self.holds.len();
        self.holds.retain(|_, hold| {
            let dead_past_grace = hold.expires_at <= cutoff;
            let terminal_and_lapsed =
                hold.status != HoldStatus::Active && hold.is_expired_at(now);
            !(dead_past_grace || terminal_and_lapsed)
        });
        let removed = before.saturating_sub(self.holds.len());
        self.stats
            .expired_count
            .fetch_add(removed, Ordering::Relaxed);
        // Drop lock entries nobody holds for keys that no longer exist.
        self.key_locks
            .retain(|key, lock| self.holds.contains_key(key) || Arc::strong_count(lock) > 1);
        removed
    }

    /// Background sweeper for memory reclamation, per the configured
    /// interval and grace.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.sweep_interval_seconds.max(1));
        let grace = Duration::from_secs(self.config.sweep_grace_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired(grace);
                if removed > 0 {
                    tracing::debug!(removed, "sweeper reclaimed lapsed holds");
                }
            }
        })
    }

    fn evict_soonest_expiring(&self) -> bool {
        let victim = self
            .holds
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());
        match victim {
            Some(key) => {
                self.holds.remove(&key);
                self.stats.eviction_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(offer_key = %key, "store at capacity, evicted soonest-expiring hold");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }

    pub fn stats(&self) -> StoreStatsReport {
        StoreStatsReport {
            items_count: self.holds.len(),
            hit_count: self.stats.hit_count.load(Ordering::Relaxed),
            miss_count: self.stats.miss_count.load(Ordering::Relaxed),
            expired_count: self.stats.expired_count.load(Ordering::Relaxed),
            put_count: self.stats.put_count.load(Ordering::Relaxed),
            eviction_count: self.stats.eviction_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn hold(offer_key: &str, created_at: chrono::DateTime<Utc>, ttl_minutes: i64) -> Hold {
        Hold {
            offer_key: offer_key.to_string(),
            token: format!("tok-{offer_key}"),
            locked_price: 120.5,
            currency: "GBP".to_string(),
            created_at,
            expires_at: created_at + chrono::Duration::minutes(ttl_minutes),
            status: HoldStatus::Active,
        }
    }

    fn store_at(
        start: chrono::DateTime<Utc>,
        config: StoreConfig,
    ) -> (Arc<ManualClock>, ReservationStore) {
        let clock = Arc::new(ManualClock::new(start));
        let store = ReservationStore::new(config, clock.clone());
        (clock, store)
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn get_applies_lazy_expiry() {
        let (clock, store) = store_at(t0(), StoreConfig::default());
        store.put(hold("A", t0(), 30)).unwrap();

        assert!(store.get("A").is_some());

        clock.advance(chrono::Duration::minutes(29));
        assert!(store.get("A").is_some());

        // At the boundary the hold is gone and the entry is evicted.
        clock.advance(chrono::Duration::minutes(1));
        assert!(store.get("A").is_none());
        assert_eq!(store.len(), 0);

        let stats = store.stats();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.expired_count, 1);
    }

    #[test]
    fn peek_reports_expired_status_without_evicting() {
        let (clock, store) = store_at(t0(), StoreConfig::default());
        store.put(hold("A", t0(), 30)).unwrap();

        clock.advance(chrono::Duration::hours(1));
        let peeked = store.peek("A").unwrap();
        assert_eq!(peeked.status, HoldStatus::Expired);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn time_remaining_counts_down_to_zero() {
        let (clock, store) = store_at(t0(), StoreConfig::default());
        store.put(hold("A", t0(), 30)).unwrap();

        assert_eq!(store.time_remaining("A"), Duration::from_secs(30 * 60));

        clock.advance(chrono::Duration::minutes(10));
        assert_eq!(store.time_remaining("A"), Duration::from_secs(20 * 60));

        clock.advance(chrono::Duration::minutes(25));
        assert_eq!(store.time_remaining("A"), Duration::ZERO);
        assert_eq!(store.time_remaining("absent"), Duration::ZERO);
    }

    #[test]
    fn consumed_holds_are_not_returned() {
        let (_clock, store) = store_at(t0(), StoreConfig::default());
        store.put(hold("A", t0(), 30)).unwrap();

        assert!(store.mark_consumed("A"));
        assert!(store.get("A").is_none());
        assert_eq!(store.peek("A").unwrap().status, HoldStatus::Consumed);
        assert_eq!(store.time_remaining("A"), Duration::ZERO);
    }

    #[test]
    fn capacity_evicts_soonest_expiring_entry() {
        let config = StoreConfig {
            max_entries: 2,
            ..StoreConfig::default()
        };
        let (_clock, store) = store_at(t0(), config);

        store.put(hold("soon", t0(), 5)).unwrap();
        store.put(hold("late", t0(), 60)).unwrap();
        store.put(hold("new", t0(), 30)).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("soon").is_none());
        assert!(store.get("late").is_some());
        assert!(store.get("new").is_some());
        assert_eq!(store.stats().eviction_count, 1);
    }

    #[test]
    fn sweep_removes_lapsed_entries_past_grace() {
        let (clock, store) = store_at(t0(), StoreConfig::default());
        store.put(hold("old", t0(), 30)).unwrap();
        store.put(hold("fresh", t0() + chrono::Duration::hours(1), 30)).unwrap();

        clock.advance(chrono::Duration::minutes(40));
        // "old" lapsed 10 minutes ago, past the 5-minute grace.
        let removed = store.sweep_expired(Duration::from_secs(300));
        assert_eq!(removed, 1);
        assert!(store.peek("old").is_none());
        assert!(store.peek("fresh").is_some());
    }

    #[test]
    fn concurrent_readers_and_writers_agree_on_one_hold() {
        use std::thread;

        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(ReservationStore::new(StoreConfig::default(), clock));
        let mut handles = Vec::new();

        for worker in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("offer-{}", i % 20);
                    if (worker + i) % 3 == 0 {
                        let _ = store.put(hold(&key, t0(), 30));
                    } else {
                        let _ = store.get(&key);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // One entry per key, never duplicates.
        assert!(store.len() <= 20);
        let stats = store.stats();
        assert!(stats.put_count > 0);
        assert!(stats.hit_count + stats.miss_count > 0);
    }
}
