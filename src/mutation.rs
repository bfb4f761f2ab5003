//! Mutation executor with optimistic lifecycle callbacks.
//!
//! One executor wraps one logical action type. Per `execute` call:
//!
//! 1. `on_before_send` runs before the network call and returns a context
//!    (typically a pre-mutation snapshot plus a correlation id)
//! 2. the remote write is awaited exactly once, with no automatic retry
//! 3. exactly one of `on_success` / `on_error` sees that same context
//! 4. `on_settled` consumes the context after either outcome
//!
//! The executor has no dedup logic. Callers prevent double submission of
//! the same logical action with an [`InFlight`] set.

use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult, SideEffectFailure};

/// Lifecycle callbacks for one action type.
pub trait MutationHooks<A> {
  /// State handed from `on_before_send` to the outcome callbacks.
  type Context;
  /// Value returned by the server on success.
  type Output;

  fn on_before_send(&self, action: &A) -> Self::Context;

  fn on_success(&self, _output: &Self::Output, _action: &A, _context: &Self::Context) {}

  fn on_error(&self, _error: &RemoteError, _action: &A, _context: &Self::Context) {}

  fn on_settled(&self, _action: &A, _context: Self::Context) {}
}

/// Issues one remote write per action and drives the hooks around it.
pub struct MutationExecutor<A, H, F> {
  name: &'static str,
  hooks: H,
  send: F,
  _action: PhantomData<fn(A)>,
}

impl<A, H, F> MutationExecutor<A, H, F> {
  /// Create an executor. `send` performs the remote write for one action.
  pub fn new(name: &'static str, hooks: H, send: F) -> Self {
    Self {
      name,
      hooks,
      send,
      _action: PhantomData,
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn hooks(&self) -> &H {
    &self.hooks
  }
}

impl<A, H, F, Fut> MutationExecutor<A, H, F>
where
  A: Clone + Debug,
  H: MutationHooks<A>,
  F: Fn(A) -> Fut,
  Fut: Future<Output = RemoteResult<H::Output>>,
{
  /// Run one mutation. The result is returned unchanged after the hooks ran.
  pub async fn execute(&self, action: A) -> RemoteResult<H::Output> {
    let context = self.hooks.on_before_send(&action);
    debug!(mutation = self.name, action = ?action, "mutation sent");

    let result = (self.send)(action.clone()).await;

    match &result {
      Ok(output) => {
        debug!(mutation = self.name, "mutation succeeded");
        self.hooks.on_success(output, &action, &context);
      }
      Err(error) => {
        warn!(mutation = self.name, kind = %error.kind, error = %error, "mutation failed");
        self.hooks.on_error(error, &action, &context);
      }
    }

    self.hooks.on_settled(&action, context);
    result
  }
}

/// Outcome of a feature-level submit guarded by an [`InFlight`] set.
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted<T> {
  Sent(T),
  /// The same logical action is still awaiting its acknowledgement
  AlreadyPending,
}

impl<T> Submitted<T> {
  pub fn sent(self) -> Option<T> {
    match self {
      Submitted::Sent(value) => Some(value),
      Submitted::AlreadyPending => None,
    }
  }

  pub fn is_already_pending(&self) -> bool {
    matches!(self, Submitted::AlreadyPending)
  }
}

/// Set of logical action ids awaiting acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
  ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
    self.ids.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Claim `id`; `None` if it is already in flight.
  pub fn try_acquire(&self, id: impl Into<String>) -> Option<InFlightGuard> {
    let id = id.into();
    if !self.lock().insert(id.clone()) {
      return None;
    }
    Some(InFlightGuard {
      ids: Arc::clone(&self.ids),
      id,
    })
  }

  pub fn contains(&self, id: &str) -> bool {
    self.lock().contains(id)
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }
}

/// Releases its id when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
  ids: Arc<Mutex<HashSet<String>>>,
  id: String,
}

impl InFlightGuard {
  pub fn id(&self) -> &str {
    &self.id
  }
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self
      .ids
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&self.id);
  }
}

/// Observer for failures of detached side effects.
pub type Diagnostics = Arc<dyn Fn(&SideEffectFailure) + Send + Sync>;

/// Run a best-effort secondary call detached from the primary mutation.
///
/// Its failure never reaches the primary result; it is logged and handed
/// to `diagnostics` when one is installed.
pub fn spawn_side_effect<T, Fut>(
  effect: &'static str,
  future: Fut,
  diagnostics: Option<Diagnostics>,
) -> JoinHandle<()>
where
  T: Send + 'static,
  Fut: Future<Output = RemoteResult<T>> + Send + 'static,
{
  tokio::spawn(async move {
    match future.await {
      Ok(_) => debug!(effect, "side effect completed"),
      Err(source) => {
        let failure = SideEffectFailure { effect, source };
        warn!(effect, error = %failure.source, "side effect failed");
        if let Some(diagnostics) = diagnostics {
          diagnostics(&failure);
        }
      }
    }
  })
}
