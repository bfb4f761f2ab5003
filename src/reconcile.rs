//! Reconciliation of optimistic cache state once the server answers.
//!
//! Two policies exist, chosen per entity class:
//!
//! - **Swap**: the optimistic record is replaced in place by the
//!   authoritative one (found by correlation id), keeping client-only state
//!   the server does not return. On error the optimistic record is removed.
//! - **Deferred**: the optimistically patched lists are trusted as-is on
//!   success and only the narrow "my state" records are refreshed. Counts may
//!   briefly disagree across devices until the next organic refetch; that
//!   staleness is accepted product behavior. On error the captured snapshot
//!   is restored and a broad invalidation follows.
//!
//! Any transport error additionally invalidates everything the mutation
//! could have touched, since the true server state is unknown.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, IdentityScope, PagedList, QueryIdentity, Snapshot};
use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
  Swap,
  Deferred,
}

/// Reconciliation policy per entity class.
#[derive(Debug, Clone)]
pub struct PolicyTable {
  policies: HashMap<String, ReconcilePolicy>,
  fallback: ReconcilePolicy,
}

impl Default for PolicyTable {
  fn default() -> Self {
    Self::new(ReconcilePolicy::Deferred)
  }
}

impl PolicyTable {
  pub fn new(fallback: ReconcilePolicy) -> Self {
    Self {
      policies: HashMap::new(),
      fallback,
    }
  }

  pub fn with(mut self, class: impl Into<String>, policy: ReconcilePolicy) -> Self {
    self.policies.insert(class.into(), policy);
    self
  }

  pub fn policy_for(&self, class: &str) -> ReconcilePolicy {
    self.policies.get(class).copied().unwrap_or(self.fallback)
  }
}

/// Records that can stand in optimistically for a server row.
pub trait Correlated {
  /// Server id (a placeholder while pending).
  fn record_id(&self) -> &str;

  /// Client-generated id linking the optimistic record to its mutation.
  fn correlation_id(&self) -> Option<Uuid>;

  fn is_pending(&self) -> bool;

  /// Carry client-only state from the optimistic record onto `self`.
  fn adopt_transient(&mut self, _optimistic: &Self) {}
}

/// Everything `on_before_send` captured for reconciliation.
#[derive(Debug, Clone)]
pub struct OptimisticContext {
  /// Entity class whose policy applies
  pub class: String,
  pub correlation_id: Option<Uuid>,
  /// Pre-mutation copy of every entry the patch touched
  pub snapshot: Snapshot,
  /// Entries holding the optimistic change
  pub affected: IdentityScope,
  /// Lightweight records of the current user's own state
  pub my_state: Vec<QueryIdentity>,
  /// Everything to resync when the damage cannot be bounded
  pub broad: IdentityScope,
}

impl OptimisticContext {
  pub fn new(class: impl Into<String>, snapshot: Snapshot) -> Self {
    Self {
      class: class.into(),
      correlation_id: None,
      snapshot,
      affected: IdentityScope::none(),
      my_state: Vec::new(),
      broad: IdentityScope::none(),
    }
  }

  pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
    self.correlation_id = Some(correlation_id);
    self
  }

  pub fn affecting(mut self, scope: IdentityScope) -> Self {
    self.affected = scope;
    self
  }

  pub fn with_my_state(mut self, identities: Vec<QueryIdentity>) -> Self {
    self.my_state = identities;
    self
  }

  pub fn with_broad(mut self, scope: IdentityScope) -> Self {
    self.broad = scope;
    self
  }
}

/// Applies the per-class policy to settled mutations.
#[derive(Clone)]
pub struct Reconciler {
  store: CacheStore,
  policies: PolicyTable,
}

impl Reconciler {
  pub fn new(store: CacheStore, policies: PolicyTable) -> Self {
    Self { store, policies }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn policy_for(&self, class: &str) -> ReconcilePolicy {
    self.policies.policy_for(class)
  }

  /// Settle a successful mutation whose authoritative record is `record`.
  pub fn settle_success<T>(&self, context: &OptimisticContext, record: &T)
  where
    T: Correlated + Clone + Serialize + DeserializeOwned,
  {
    match self.policy_for(&context.class) {
      ReconcilePolicy::Swap => match context.correlation_id {
        Some(correlation_id) => {
          let swapped = swap_record(&self.store, &context.affected, correlation_id, record);
          debug!(class = %context.class, %correlation_id, entries = swapped, "swapped optimistic record");
        }
        None => {
          warn!(class = %context.class, "swap without correlation id, invalidating instead");
          self.store.invalidate(|id| context.affected.matches(id));
        }
      },
      ReconcilePolicy::Deferred => self.confirm_deferred(context),
    }
  }

  /// Settle a successful mutation whose response carries no record.
  pub fn settle_ack(&self, context: &OptimisticContext) {
    match self.policy_for(&context.class) {
      ReconcilePolicy::Deferred => self.confirm_deferred(context),
      ReconcilePolicy::Swap => {
        // Nothing to swap in; let a refetch supply the authoritative rows
        self.store.invalidate(|id| context.affected.matches(id));
      }
    }
  }

  /// Settle a successful mutation under the deferred policy.
  pub fn confirm_deferred(&self, context: &OptimisticContext) {
    let refreshed = self.store.invalidate(|id| context.my_state.contains(id));
    debug!(class = %context.class, entries = refreshed, "refreshed own state");
  }

  /// Restore cache consistency after a failed mutation.
  ///
  /// `T` is the record type held in the affected lists (Swap only).
  pub fn settle_error<T>(&self, context: &OptimisticContext, error: &RemoteError)
  where
    T: Correlated + Clone + Serialize + DeserializeOwned,
  {
    let policy = self.policy_for(&context.class);
    match (policy, context.correlation_id) {
      (ReconcilePolicy::Swap, Some(correlation_id)) => {
        let removed = discard_record::<T>(&self.store, &context.affected, correlation_id);
        debug!(class = %context.class, %correlation_id, entries = removed, "discarded optimistic record");
      }
      _ => self.store.restore(&context.snapshot),
    }

    if policy == ReconcilePolicy::Deferred || error.requires_resync() {
      let invalidated = self
        .store
        .invalidate(|id| context.broad.matches(id) || context.affected.matches(id));
      debug!(class = %context.class, kind = %error.kind, entries = invalidated, "resync after failed mutation");
    }
  }
}

/// Replace the pending record carrying `correlation_id` with `record` in
/// every affected list, keeping list length and position.
///
/// If the authoritative id is already present (a refetch raced the
/// acknowledgement), the optimistic record is dropped instead so the list
/// never holds a duplicate. If a refetch replaced the list with rows that
/// carry neither, the authoritative record is prepended.
pub fn swap_record<T>(store: &CacheStore, scope: &IdentityScope, correlation_id: Uuid, record: &T) -> usize
where
  T: Correlated + Clone + Serialize + DeserializeOwned,
{
  store.rewrite_where(
    |id| scope.matches(id),
    |mut list: PagedList<T>| {
      let is_optimistic =
        |item: &T| item.is_pending() && item.correlation_id() == Some(correlation_id);
      let already_present = list
        .items()
        .any(|item| !item.is_pending() && item.record_id() == record.record_id());

      if already_present {
        list.retain(|item| !is_optimistic(item));
        return list;
      }
      let mut swapped = false;
      for item in list.items_mut() {
        if is_optimistic(&*item) {
          let mut confirmed = record.clone();
          confirmed.adopt_transient(&*item);
          *item = confirmed;
          swapped = true;
        }
      }
      if !swapped {
        list.prepend(record.clone());
      }
      list
    },
  )
}

/// Remove the pending record carrying `correlation_id` from every affected list.
pub fn discard_record<T>(store: &CacheStore, scope: &IdentityScope, correlation_id: Uuid) -> usize
where
  T: Correlated + Serialize + DeserializeOwned,
{
  store.rewrite_where(
    |id| scope.matches(id),
    |mut list: PagedList<T>| {
      list.retain(|item| !(item.is_pending() && item.correlation_id() == Some(correlation_id)));
      list
    },
  )
}
