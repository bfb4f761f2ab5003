//! In-memory cache store keyed by query identity.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::key::{QueryIdentity, QueryKey};
use super::result::CacheResult;
use crate::error::RemoteResult;

/// Capacity of the change notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One stored query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub identity: QueryIdentity,
  pub value: Value,
  pub fetched_at: DateTime<Utc>,
  /// Set by `invalidate`; the value is still served until a refetch lands
  pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
  entry: CacheEntry,
}

impl Slot {
  fn fresh(identity: QueryIdentity, value: Value) -> Self {
    Self {
      entry: CacheEntry {
        identity,
        value,
        fetched_at: Utc::now(),
        stale: false,
      },
    }
  }
}

/// Change notification for store consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
  Updated(QueryIdentity),
  Invalidated(QueryIdentity),
  Removed(QueryIdentity),
}

impl CacheEvent {
  pub fn identity(&self) -> &QueryIdentity {
    match self {
      CacheEvent::Updated(id) | CacheEvent::Invalidated(id) | CacheEvent::Removed(id) => id,
    }
  }
}

/// Handle for one in-flight read. Results of tickets issued before a
/// `cancel_queries` on the same identity are discarded.
#[derive(Debug, Clone)]
pub struct FetchTicket {
  identity: QueryIdentity,
  generation: u64,
  epoch: u64,
}

impl FetchTicket {
  pub fn identity(&self) -> &QueryIdentity {
    &self.identity
  }
}

/// Exact copy of a set of entries, including which ones were absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
  entries: Vec<(QueryIdentity, Option<Slot>)>,
}

impl Snapshot {
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn identities(&self) -> impl Iterator<Item = &QueryIdentity> {
    self.entries.iter().map(|(id, _)| id)
  }

  /// Captured entry for `identity`: `None` if not captured, `Some(None)` if it was absent.
  pub fn get(&self, identity: &QueryIdentity) -> Option<Option<&CacheEntry>> {
    self
      .entries
      .iter()
      .find(|(id, _)| id == identity)
      .map(|(_, slot)| slot.as_ref().map(|slot| &slot.entry))
  }

  /// Add entries from `other` that are not captured yet.
  pub fn merge(&mut self, other: Snapshot) {
    for (id, slot) in other.entries {
      if self.get(&id).is_none() {
        self.entries.push((id, slot));
      }
    }
  }
}

#[derive(Debug, Default)]
struct StoreState {
  entries: HashMap<String, Slot>,
  generations: HashMap<String, (QueryIdentity, u64)>,
  /// Bumped by `clear`; tickets from an earlier epoch never land
  epoch: u64,
}

/// Shared store of last-known-good query results.
///
/// Every mutation funnels through `write`, `update`, `rewrite_where`,
/// `restore` and `complete_fetch`, each applied under a single lock, so a
/// reader never observes a partial write. The store performs no I/O; it
/// only notifies subscribers.
#[derive(Clone)]
pub struct CacheStore {
  state: Arc<Mutex<StoreState>>,
  events: broadcast::Sender<CacheEvent>,
  /// How long before a fetched value is considered stale
  stale_time: Duration,
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    Self {
      state: Arc::new(Mutex::new(StoreState::default())),
      events,
      stale_time: Duration::minutes(1),
    }
  }

  /// Set the stale time for fetched data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn stale_time(&self) -> Duration {
    self.stale_time
  }

  // Writers never leave the state half-updated, so a poisoned lock is still consistent.
  fn lock(&self) -> MutexGuard<'_, StoreState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, events: Vec<CacheEvent>) {
    for event in events {
      // No subscribers is fine
      let _ = self.events.send(event);
    }
  }

  /// Receive a notification for every write, invalidation and removal.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  fn slot_is_stale(&self, slot: &Slot) -> bool {
    slot.entry.stale || Utc::now() - slot.entry.fetched_at > self.stale_time
  }

  /// Read and deserialize the value cached for `key`.
  pub fn read<T: DeserializeOwned>(&self, key: &impl QueryKey) -> Option<T> {
    self.read_typed::<T>(&key.identity()).map(|(data, _)| data)
  }

  pub fn read_entry(&self, key: &impl QueryKey) -> Option<CacheEntry> {
    let hash = key.identity().cache_hash();
    self.lock().entries.get(&hash).map(|slot| slot.entry.clone())
  }

  /// True when the entry was invalidated or is older than the stale time.
  pub fn is_stale(&self, key: &impl QueryKey) -> bool {
    let hash = key.identity().cache_hash();
    let state = self.lock();
    state.entries.get(&hash).map_or(false, |slot| self.slot_is_stale(slot))
  }

  pub fn contains(&self, key: &impl QueryKey) -> bool {
    let hash = key.identity().cache_hash();
    self.lock().entries.contains_key(&hash)
  }

  fn read_typed<T: DeserializeOwned>(&self, identity: &QueryIdentity) -> Option<(T, Slot)> {
    let slot = self.lock().entries.get(&identity.cache_hash()).cloned()?;
    match serde_json::from_value(slot.entry.value.clone()) {
      Ok(data) => Some((data, slot)),
      Err(e) => {
        warn!(identity = %identity, error = %e, "cached value has unexpected shape");
        None
      }
    }
  }

  /// Unconditional overwrite, used for both server and optimistic values.
  pub fn write<T: Serialize>(&self, key: &impl QueryKey, value: &T) {
    let identity = key.identity();
    match serde_json::to_value(value) {
      Ok(value) => self.write_value(identity, value),
      Err(e) => warn!(identity = %identity, error = %e, "failed to serialize cache value"),
    }
  }

  pub fn write_value(&self, identity: QueryIdentity, value: Value) {
    {
      let mut state = self.lock();
      state
        .entries
        .insert(identity.cache_hash(), Slot::fresh(identity.clone(), value));
    }
    trace!(identity = %identity, "cache write");
    self.emit(vec![CacheEvent::Updated(identity)]);
  }

  /// Transform the value cached for `key` in place. Returns false when absent.
  pub fn update<T, F>(&self, key: &impl QueryKey, transform: F) -> bool
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(T) -> T,
  {
    let identity = key.identity();
    let changed = {
      let mut state = self.lock();
      match state.entries.get_mut(&identity.cache_hash()) {
        Some(slot) => apply_transform(&mut slot.entry, transform),
        None => false,
      }
    };
    if changed {
      self.emit(vec![CacheEvent::Updated(identity)]);
    }
    changed
  }

  /// Apply `transform` to every entry whose identity matches `predicate`.
  ///
  /// Entries whose value does not deserialize as `T` are skipped. Returns
  /// the number of entries whose value changed.
  pub fn rewrite_where<T, P, F>(&self, predicate: P, transform: F) -> usize
  where
    T: Serialize + DeserializeOwned,
    P: Fn(&QueryIdentity) -> bool,
    F: Fn(T) -> T,
  {
    let touched: Vec<QueryIdentity> = {
      let mut state = self.lock();
      state
        .entries
        .values_mut()
        .map(|slot| &mut slot.entry)
        .filter(|entry| predicate(&entry.identity))
        .filter_map(|entry| apply_transform(entry, &transform).then(|| entry.identity.clone()))
        .collect()
    };
    let count = touched.len();
    if count > 0 {
      debug!(entries = count, "cache rewrite");
    }
    self.emit(touched.into_iter().map(CacheEvent::Updated).collect());
    count
  }

  /// Mark matching entries stale. Values stay readable until refetched.
  pub fn invalidate<P>(&self, predicate: P) -> usize
  where
    P: Fn(&QueryIdentity) -> bool,
  {
    let invalidated: Vec<QueryIdentity> = {
      let mut state = self.lock();
      state
        .entries
        .values_mut()
        .filter(|slot| predicate(&slot.entry.identity))
        .map(|slot| {
          slot.entry.stale = true;
          slot.entry.identity.clone()
        })
        .collect()
    };
    for identity in &invalidated {
      debug!(identity = %identity, "cache invalidate");
    }
    let count = invalidated.len();
    self.emit(invalidated.into_iter().map(CacheEvent::Invalidated).collect());
    count
  }

  pub fn invalidate_key(&self, key: &impl QueryKey) -> bool {
    let identity = key.identity();
    self.invalidate(|id| *id == identity) > 0
  }

  /// Supersede every in-flight read for matching identities.
  pub fn cancel_queries<P>(&self, predicate: P) -> usize
  where
    P: Fn(&QueryIdentity) -> bool,
  {
    let mut state = self.lock();
    let mut cancelled = 0;
    for (identity, generation) in state.generations.values_mut() {
      if predicate(identity) {
        *generation += 1;
        cancelled += 1;
        trace!(identity = %identity, "cancelled in-flight reads");
      }
    }
    cancelled
  }

  /// Register an in-flight read for `identity`.
  pub fn begin_fetch(&self, identity: &QueryIdentity) -> FetchTicket {
    let mut state = self.lock();
    let (_, generation) = state
      .generations
      .entry(identity.cache_hash())
      .or_insert_with(|| (identity.clone(), 0));
    let generation = *generation;
    FetchTicket {
      identity: identity.clone(),
      generation,
      epoch: state.epoch,
    }
  }

  /// Store a fetched value unless the read was cancelled since `begin_fetch`.
  pub fn complete_fetch<T: Serialize>(&self, ticket: &FetchTicket, value: &T) -> bool {
    let value = match serde_json::to_value(value) {
      Ok(value) => value,
      Err(e) => {
        warn!(identity = %ticket.identity, error = %e, "failed to serialize fetched value");
        return false;
      }
    };
    let hash = ticket.identity.cache_hash();
    {
      let mut state = self.lock();
      let current = state.generations.get(&hash).map(|(_, g)| *g);
      if state.epoch != ticket.epoch || current != Some(ticket.generation) {
        debug!(identity = %ticket.identity, "discarding superseded fetch result");
        return false;
      }
      state
        .entries
        .insert(hash, Slot::fresh(ticket.identity.clone(), value));
    }
    self.emit(vec![CacheEvent::Updated(ticket.identity.clone())]);
    true
  }

  /// Capture every entry whose identity matches `predicate`.
  pub fn snapshot<P>(&self, predicate: P) -> Snapshot
  where
    P: Fn(&QueryIdentity) -> bool,
  {
    let state = self.lock();
    let mut entries: Vec<_> = state
      .entries
      .values()
      .filter(|slot| predicate(&slot.entry.identity))
      .map(|slot| (slot.entry.identity.clone(), Some(slot.clone())))
      .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Snapshot { entries }
  }

  /// Capture the given identities, remembering which ones are absent.
  pub fn snapshot_of(&self, identities: &[QueryIdentity]) -> Snapshot {
    let state = self.lock();
    let entries = identities
      .iter()
      .map(|id| (id.clone(), state.entries.get(&id.cache_hash()).cloned()))
      .collect();
    Snapshot { entries }
  }

  /// Put captured entries back exactly as they were.
  pub fn restore(&self, snapshot: &Snapshot) {
    let mut events = Vec::with_capacity(snapshot.len());
    {
      let mut state = self.lock();
      for (identity, slot) in &snapshot.entries {
        let hash = identity.cache_hash();
        match slot {
          Some(slot) => {
            state.entries.insert(hash, slot.clone());
            events.push(CacheEvent::Updated(identity.clone()));
          }
          None => {
            if state.entries.remove(&hash).is_some() {
              events.push(CacheEvent::Removed(identity.clone()));
            }
          }
        }
      }
    }
    debug!(entries = snapshot.len(), "cache restore");
    self.emit(events);
  }

  pub fn remove<P>(&self, predicate: P) -> usize
  where
    P: Fn(&QueryIdentity) -> bool,
  {
    let removed: Vec<QueryIdentity> = {
      let mut state = self.lock();
      let hashes: Vec<String> = state
        .entries
        .iter()
        .filter(|(_, slot)| predicate(&slot.entry.identity))
        .map(|(hash, _)| hash.clone())
        .collect();
      hashes
        .into_iter()
        .filter_map(|hash| state.entries.remove(&hash).map(|slot| slot.entry.identity))
        .collect()
    };
    let count = removed.len();
    self.emit(removed.into_iter().map(CacheEvent::Removed).collect());
    count
  }

  /// Drop every entry and supersede every in-flight read (session teardown).
  pub fn clear(&self) {
    {
      let mut state = self.lock();
      state.generations.clear();
      state.epoch += 1;
    }
    let removed = self.remove(|_| true);
    debug!(entries = removed, "cache cleared");
  }

  pub fn identities<P>(&self, predicate: P) -> Vec<QueryIdentity>
  where
    P: Fn(&QueryIdentity) -> bool,
  {
    let state = self.lock();
    let mut ids: Vec<_> = state
      .entries
      .values()
      .filter(|slot| predicate(&slot.entry.identity))
      .map(|slot| slot.entry.identity.clone())
      .collect();
    ids.sort();
    ids
  }

  /// Cache-first read.
  ///
  /// 1. Fresh entry: return it without calling `fetcher`
  /// 2. Stale or missing: fetch and store, unless an optimistic write
  ///    cancelled the read in the meantime (the store value then wins)
  /// 3. Transport failure with a cached value: serve it as offline data
  pub async fn fetch_query<K, T, F, Fut>(&self, key: &K, fetcher: F) -> RemoteResult<CacheResult<T>>
  where
    K: QueryKey,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
  {
    let identity = key.identity();

    match self.read_typed::<T>(&identity) {
      Some((data, slot)) => {
        if !self.slot_is_stale(&slot) {
          return Ok(CacheResult::from_cache(data, slot.entry.fetched_at, false));
        }

        let ticket = self.begin_fetch(&identity);
        match fetcher().await {
          Ok(fresh) => Ok(self.settle_fetch(&ticket, fresh)),
          Err(e) if e.requires_resync() => {
            warn!(identity = %identity, error = %e, "refetch failed, serving cached value");
            Ok(CacheResult::offline(data, slot.entry.fetched_at))
          }
          Err(e) => Err(e),
        }
      }
      None => {
        let ticket = self.begin_fetch(&identity);
        let fresh = fetcher().await?;
        Ok(self.settle_fetch(&ticket, fresh))
      }
    }
  }

  fn settle_fetch<T>(&self, ticket: &FetchTicket, fresh: T) -> CacheResult<T>
  where
    T: Serialize + DeserializeOwned,
  {
    if self.complete_fetch(ticket, &fresh) {
      return CacheResult::from_network(fresh);
    }
    match self.read_typed::<T>(&ticket.identity) {
      Some((data, slot)) => {
        let stale = self.slot_is_stale(&slot);
        CacheResult::from_cache(data, slot.entry.fetched_at, stale)
      }
      None => CacheResult::from_network(fresh),
    }
  }
}

fn apply_transform<T, F>(entry: &mut CacheEntry, transform: F) -> bool
where
  T: Serialize + DeserializeOwned,
  F: FnOnce(T) -> T,
{
  let current: T = match serde_json::from_value(entry.value.clone()) {
    Ok(current) => current,
    Err(_) => {
      trace!(identity = %entry.identity, "skipping entry of a different shape");
      return false;
    }
  };
  match serde_json::to_value(transform(current)) {
    Ok(next) if next != entry.value => {
      entry.value = next;
      entry.fetched_at = Utc::now();
      true
    }
    Ok(_) => false,
    Err(e) => {
      warn!(identity = %entry.identity, error = %e, "failed to serialize patched value");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{ErrorKind, RemoteError};
  use crate::cache::CacheSource;
  use pretty_assertions::assert_eq;

  fn feed(community: &str) -> QueryIdentity {
    QueryIdentity::new("feed", [community])
  }

  #[test]
  fn test_write_then_read() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1, 2, 3]);
    assert_eq!(store.read::<Vec<i32>>(&feed("c1")), Some(vec![1, 2, 3]));
    assert_eq!(store.read::<Vec<i32>>(&feed("c2")), None);
  }

  #[test]
  fn test_read_with_wrong_shape_is_absent() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &"text");
    assert_eq!(store.read::<Vec<i32>>(&feed("c1")), None);
  }

  #[test]
  fn test_rewrite_where_only_touches_matching_entries() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1]);
    store.write(&feed("c2"), &vec![2]);
    store.write(&QueryIdentity::new("posts", ["p1"]), &vec![3]);

    let changed = store.rewrite_where(
      |id| id.class() == "feed",
      |mut v: Vec<i32>| {
        v.push(0);
        v
      },
    );

    assert_eq!(changed, 2);
    assert_eq!(store.read::<Vec<i32>>(&feed("c1")), Some(vec![1, 0]));
    assert_eq!(store.read::<Vec<i32>>(&feed("c2")), Some(vec![2, 0]));
    assert_eq!(store.read::<Vec<i32>>(&QueryIdentity::new("posts", ["p1"])), Some(vec![3]));
  }

  #[test]
  fn test_rewrite_where_skips_other_shapes() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1]);
    store.write(&feed("c2"), &"not a list");
    let changed = store.rewrite_where(|_| true, |v: Vec<i32>| v.into_iter().map(|n| n + 1).collect());
    assert_eq!(changed, 1);
    assert_eq!(store.read::<String>(&feed("c2")).as_deref(), Some("not a list"));
  }

  #[test]
  fn test_invalidate_keeps_value() {
    let store = CacheStore::new();
    let mut events = store.subscribe();
    store.write(&feed("c1"), &1);
    assert_eq!(store.invalidate(|id| id.class() == "feed"), 1);

    assert!(store.is_stale(&feed("c1")));
    assert_eq!(store.read::<i32>(&feed("c1")), Some(1));

    assert_eq!(events.try_recv().unwrap(), CacheEvent::Updated(feed("c1")));
    assert_eq!(events.try_recv().unwrap(), CacheEvent::Invalidated(feed("c1")));
  }

  #[test]
  fn test_cancelled_fetch_is_discarded() {
    let store = CacheStore::new();
    let ticket = store.begin_fetch(&feed("c1"));

    store.cancel_queries(|id| *id == feed("c1"));
    store.write(&feed("c1"), &"optimistic");

    assert!(!store.complete_fetch(&ticket, &"stale server value"));
    assert_eq!(store.read::<String>(&feed("c1")).as_deref(), Some("optimistic"));

    let next = store.begin_fetch(&feed("c1"));
    assert!(store.complete_fetch(&next, &"fresh"));
    assert_eq!(store.read::<String>(&feed("c1")).as_deref(), Some("fresh"));
  }

  #[test]
  fn test_snapshot_restore_is_exact() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1, 2]);
    store.invalidate_key(&feed("c1"));
    let snapshot = store.snapshot_of(&[feed("c1"), feed("c2")]);
    let before = store.read_entry(&feed("c1")).unwrap();

    store.write(&feed("c1"), &vec![9]);
    store.write(&feed("c2"), &vec![7]);
    store.restore(&snapshot);

    assert_eq!(store.read_entry(&feed("c1")).unwrap(), before);
    assert!(store.is_stale(&feed("c1")));
    assert!(!store.contains(&feed("c2")));
  }

  #[test]
  fn test_snapshot_merge_keeps_first_capture() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &1);
    let mut first = store.snapshot_of(&[feed("c1")]);
    store.write(&feed("c1"), &2);
    first.merge(store.snapshot_of(&[feed("c1"), feed("c2")]));

    assert_eq!(first.len(), 2);
    assert_eq!(first.get(&feed("c1")).flatten().unwrap().value, serde_json::json!(1));
    assert_eq!(first.get(&feed("c2")), Some(None));
  }

  #[test]
  fn test_clear_removes_everything() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &1);
    store.write(&feed("c2"), &2);
    store.clear();
    assert!(store.identities(|_| true).is_empty());
  }

  #[test]
  fn test_reads_started_before_clear_never_land() {
    let store = CacheStore::new();
    let cancelled = store.begin_fetch(&feed("c1"));
    store.cancel_queries(|id| *id == feed("c1"));
    let pending = store.begin_fetch(&feed("c2"));

    store.clear();

    assert!(!store.complete_fetch(&cancelled, &vec![1]));
    assert!(!store.complete_fetch(&pending, &vec![2]));
    assert!(store.identities(|_| true).is_empty());

    let after = store.begin_fetch(&feed("c1"));
    assert!(store.complete_fetch(&after, &vec![3]));
    assert_eq!(store.read::<Vec<i32>>(&feed("c1")), Some(vec![3]));
  }

  #[test]
  fn test_entry_exposes_stale_mark() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &1);
    assert!(!store.read_entry(&feed("c1")).unwrap().stale);
    store.invalidate_key(&feed("c1"));
    assert!(store.read_entry(&feed("c1")).unwrap().stale);
  }

  #[tokio::test]
  async fn test_fetch_query_serves_fresh_cache() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1]);

    let result = store
      .fetch_query(&feed("c1"), || async { Ok::<Vec<i32>, RemoteError>(vec![2]) })
      .await
      .unwrap();
    assert_eq!(result.data, vec![1]);
    assert_eq!(result.source, CacheSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_fetch_query_refetches_stale_entry() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1]);
    store.invalidate_key(&feed("c1"));

    let result = store
      .fetch_query(&feed("c1"), || async { Ok::<Vec<i32>, RemoteError>(vec![2]) })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(store.read::<Vec<i32>>(&feed("c1")), Some(vec![2]));
  }

  #[tokio::test]
  async fn test_fetch_query_offline_fallback() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1]);
    store.invalidate_key(&feed("c1"));

    let result = store
      .fetch_query(&feed("c1"), || async {
        Err::<Vec<i32>, _>(RemoteError::transport("offline"))
      })
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, vec![1]);
  }

  #[tokio::test]
  async fn test_fetch_query_propagates_server_errors() {
    let store = CacheStore::new();
    store.write(&feed("c1"), &vec![1]);
    store.invalidate_key(&feed("c1"));

    let err = store
      .fetch_query(&feed("c1"), || async {
        Err::<Vec<i32>, _>(RemoteError::new(ErrorKind::Permission, "denied"))
      })
      .await
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Permission);
  }

  #[tokio::test]
  async fn test_fetch_query_miss_without_network() {
    let store = CacheStore::new();
    let err = store
      .fetch_query(&feed("c1"), || async {
        Err::<Vec<i32>, _>(RemoteError::transport("offline"))
      })
      .await
      .unwrap_err();
    assert!(err.requires_resync());
  }
}
