//! Provenance of a cache-first read.

use chrono::{DateTime, Utc};

/// Where a [`CacheResult`] was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  /// Cached and younger than the store's stale time
  CacheFresh,
  /// Cached but stale; a newer fetch superseded ours
  CacheStale,
  /// The fetch failed at the transport level and the last good value was served
  Offline,
}

#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Fetch time of the served entry; `None` for network data
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    let source = if is_stale {
      CacheSource::CacheStale
    } else {
      CacheSource::CacheFresh
    };
    Self {
      data,
      source,
      cached_at: Some(cached_at),
    }
  }

  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }

  /// Keep the provenance while transforming the payload.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}
