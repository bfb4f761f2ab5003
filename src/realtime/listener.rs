use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{ChangeEvent, ChannelBinding, RealtimeTransport};
use crate::cache::{CacheStore, IdentityScope};

/// Lifecycle of one listener.
///
/// `Unsubscribed -> Subscribing -> Subscribed -> Unsubscribed`; the final
/// state is terminal. There is no retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
  Unsubscribed,
  Subscribing,
  Subscribed,
}

/// What a listener subscribes to and what it invalidates.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
  pub binding: ChannelBinding,
  pub invalidate: IdentityScope,
  /// Row column naming the author; events authored by the session user are skipped
  pub actor_column: Option<String>,
}

impl ListenerSpec {
  pub fn new(binding: ChannelBinding, invalidate: IdentityScope) -> Self {
    Self {
      binding,
      invalidate,
      actor_column: None,
    }
  }

  pub fn skip_actor(mut self, column: impl Into<String>) -> Self {
    self.actor_column = Some(column.into());
    self
  }

  /// Whether the event was authored by `session_user`.
  pub fn is_self_authored(&self, event: &ChangeEvent, session_user: &str) -> bool {
    self
      .actor_column
      .as_deref()
      .and_then(|column| event.column(column))
      .is_some_and(|actor| actor == session_user)
  }
}

/// Apply one pushed event: invalidate the configured identities unless the
/// event is filtered out or self-authored. Returns the number invalidated.
pub fn handle_event(store: &CacheStore, spec: &ListenerSpec, session_user: &str, event: &ChangeEvent) -> usize {
  if !spec.binding.event.matches(event.event_type) {
    return 0;
  }
  if spec.is_self_authored(event, session_user) {
    trace!(channel = %spec.binding.channel, "skipping self-authored event");
    return 0;
  }
  let invalidated = store.invalidate(|id| spec.invalidate.matches(id));
  debug!(
    channel = %spec.binding.channel,
    event = ?event.event_type,
    entries = invalidated,
    "realtime invalidation"
  );
  invalidated
}

/// A realtime subscription bound to the scope that owns it.
///
/// Dropping the listener tears the subscription down.
#[derive(Debug)]
pub struct ChangeListener {
  channel: String,
  state: Arc<watch::Sender<ListenerState>>,
  closed: Arc<AtomicBool>,
  task: Option<JoinHandle<()>>,
}

/// Move the task-visible state to `next` unless the listener was torn down.
///
/// The check runs under the watch lock, so a transition can never overwrite
/// the `Unsubscribed` set by `unsubscribe`.
fn advance(state: &watch::Sender<ListenerState>, closed: &AtomicBool, next: ListenerState) -> bool {
  state.send_if_modified(|current| {
    if closed.load(Ordering::SeqCst) || *current == next {
      return false;
    }
    *current = next;
    true
  })
}

impl ChangeListener {
  /// Start subscribing in the background.
  pub fn spawn(
    transport: Arc<dyn RealtimeTransport>,
    store: CacheStore,
    spec: ListenerSpec,
    session_user: impl Into<String>,
  ) -> Self {
    let (state, _) = watch::channel(ListenerState::Unsubscribed);
    let state = Arc::new(state);
    let session_user = session_user.into();
    let channel = spec.binding.channel.clone();

    let closed = Arc::new(AtomicBool::new(false));
    state.send_replace(ListenerState::Subscribing);
    let task_state = Arc::clone(&state);
    let task_closed = Arc::clone(&closed);
    let task = tokio::spawn(async move {
      let mut stream = match transport.subscribe(&spec.binding).await {
        Ok(stream) => stream,
        Err(e) => {
          warn!(channel = %spec.binding.channel, error = %e, "realtime subscribe failed");
          advance(&task_state, &task_closed, ListenerState::Unsubscribed);
          return;
        }
      };
      if !advance(&task_state, &task_closed, ListenerState::Subscribed) {
        return;
      }
      info!(channel = %spec.binding.channel, table = %spec.binding.table, "realtime subscribed");

      while let Some(event) = stream.next().await {
        handle_event(&store, &spec, &session_user, &event);
      }

      info!(channel = %spec.binding.channel, "realtime channel ended");
      advance(&task_state, &task_closed, ListenerState::Unsubscribed);
    });

    Self {
      channel,
      state,
      closed,
      task: Some(task),
    }
  }

  pub fn channel(&self) -> &str {
    &self.channel
  }

  pub fn state(&self) -> ListenerState {
    *self.state.borrow()
  }

  /// Receiver for state transitions.
  pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
    self.state.subscribe()
  }

  /// Tear the subscription down. Idempotent.
  pub fn unsubscribe(&mut self) {
    self.closed.store(true, Ordering::SeqCst);
    self.state.send_replace(ListenerState::Unsubscribed);
    if let Some(task) = self.task.take() {
      // Aborting drops the stream, which releases the channel
      task.abort();
      debug!(channel = %self.channel, "realtime unsubscribed");
    }
  }
}

impl Drop for ChangeListener {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}
