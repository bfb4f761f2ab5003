//! Tick-polled query observer backed by the cache store.
//!
//! Inspired by TanStack Query, a `QueryObserver<T>` owns the fetching logic
//! for one query identity and tracks loading/success/error state, while the
//! data itself always lives in the shared [`CacheStore`]. Optimistic patches
//! written to the store are therefore visible through `data()` immediately,
//! and an invalidation of the observed identity triggers a background refetch.
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let key = CommunityKey::Messages { conversation_id: id.clone() };
//! let mut query = QueryObserver::new(store.clone(), &key, move || {
//!     let api = api.clone();
//!     let id = id.clone();
//!     async move { api.messages_page(&id, None).await.map(PagedList::from_page) }
//! });
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State or data changed, re-render from query.data()
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::cache::{CacheEvent, CacheStore, QueryIdentity, QueryKey};
use crate::error::{RemoteError, RemoteResult};

/// The fetch state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatus {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Last fetch completed successfully
  Success,
  /// Last fetch failed; previously cached data stays readable
  Error(RemoteError),
}

impl QueryStatus {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryStatus::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryStatus::Success)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryStatus::Error(_))
  }

  pub fn error(&self) -> Option<&RemoteError> {
    match self {
      QueryStatus::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A boxed future that returns a RemoteResult<T>
type BoxFuture<T> = Pin<Box<dyn Future<Output = RemoteResult<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Observer of one cached query.
pub struct QueryObserver<T> {
  identity: QueryIdentity,
  store: CacheStore,
  state: QueryStatus,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<RemoteResult<()>>>,
  events: broadcast::Receiver<CacheEvent>,
}

impl<T> QueryObserver<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Create an observer for `key` with the given fetcher.
  ///
  /// The fetcher is called each time `fetch()`, `refetch()` or an
  /// invalidation of the identity starts a read.
  pub fn new<K, F, Fut>(store: CacheStore, key: &K, fetcher: F) -> Self
  where
    K: QueryKey,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<T>> + Send + 'static,
  {
    let events = store.subscribe();
    Self {
      identity: key.identity(),
      store,
      state: QueryStatus::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      events,
    }
  }

  pub fn identity(&self) -> &QueryIdentity {
    &self.identity
  }

  pub fn status(&self) -> &QueryStatus {
    &self.state
  }

  /// Current cached value, including any optimistic patch.
  pub fn data(&self) -> Option<T> {
    self.store.read(&self.identity)
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&RemoteError> {
    self.state.error()
  }

  /// Check if the cached data was invalidated or outlived the stale time.
  pub fn is_stale(&self) -> bool {
    self.store.is_stale(&self.identity)
  }

  /// Start fetching data if not already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, superseding any pending read.
  pub fn refetch(&mut self) {
    self.store.cancel_queries(|id| *id == self.identity);
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for fetch results and cache events.
  ///
  /// Returns `true` if the state or the cached data changed. Call this in
  /// your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_fetch();

    let mut needs_refetch = false;
    loop {
      match self.events.try_recv() {
        Ok(event) if *event.identity() == self.identity => {
          changed = true;
          if matches!(event, CacheEvent::Invalidated(_)) {
            needs_refetch = true;
          }
        }
        Ok(_) => {}
        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
          trace!(identity = %self.identity, skipped, "cache events lagged");
          changed = true;
        }
        Err(_) => break,
      }
    }

    if needs_refetch && !self.state.is_loading() {
      debug!(identity = %self.identity, "invalidated, refetching");
      self.start_fetch();
    }
    changed
  }

  fn poll_fetch(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(())) => {
        self.state = QueryStatus::Success;
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryStatus::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending
        self.state = QueryStatus::Error(RemoteError::transport("query was cancelled"));
        self.receiver = None;
        true
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryStatus::Loading;

    let ticket = self.store.begin_fetch(&self.identity);
    let store = self.store.clone();
    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await.map(|data| {
        // A cancelled ticket leaves the newer store value in place
        store.complete_fetch(&ticket, &data);
      });
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("identity", &self.identity)
      .field("status", &self.state)
      .finish_non_exhaustive()
  }
}
