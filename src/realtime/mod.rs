//! Server-pushed change notifications.
//!
//! A [`RealtimeTransport`] opens one channel per [`ChannelBinding`] and
//! yields [`ChangeEvent`]s through a [`ChangeStream`]. Payloads are treated as
//! opaque rows: listeners only inspect them for the actor column and then
//! invalidate cache identities, never splice rows into cached lists.

mod listener;
mod local;
mod phoenix;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::RealtimeError;

pub use listener::{handle_event, ChangeListener, ListenerSpec, ListenerState};
pub use local::LocalTransport;
pub use phoenix::PhoenixTransport;

/// Kind of row change reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
  Insert,
  Update,
  Delete,
}

/// Which change types a binding wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
  Insert,
  Update,
  Delete,
  #[default]
  Any,
}

impl EventFilter {
  /// Wire name used in channel join configs.
  pub fn as_str(&self) -> &'static str {
    match self {
      EventFilter::Insert => "INSERT",
      EventFilter::Update => "UPDATE",
      EventFilter::Delete => "DELETE",
      EventFilter::Any => "*",
    }
  }

  pub fn matches(&self, change: ChangeType) -> bool {
    match self {
      EventFilter::Insert => change == ChangeType::Insert,
      EventFilter::Update => change == ChangeType::Update,
      EventFilter::Delete => change == ChangeType::Delete,
      EventFilter::Any => true,
    }
  }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
  pub channel: String,
  pub table: String,
  pub event: EventFilter,
  /// Row filter in `column=eq.value` form
  pub filter: Option<String>,
}

impl ChannelBinding {
  pub fn new(channel: impl Into<String>, table: impl Into<String>, event: EventFilter) -> Self {
    Self {
      channel: channel.into(),
      table: table.into(),
      event,
      filter: None,
    }
  }

  /// Only deliver rows whose `column` equals `value`.
  pub fn filter_eq(mut self, column: &str, value: &str) -> Self {
    self.filter = Some(format!("{}=eq.{}", column, value));
    self
  }

  /// Check an event against table, event type and row filter.
  ///
  /// Remote transports filter server-side; this is used by in-process ones.
  pub fn accepts(&self, event: &ChangeEvent) -> bool {
    if event.table != self.table || !self.event.matches(event.event_type) {
      return false;
    }
    let Some(filter) = &self.filter else {
      return true;
    };
    match filter.split_once("=eq.") {
      Some((column, value)) => event.column(column) == Some(value),
      // Unknown operators are left to the server
      None => true,
    }
  }
}

/// One row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
  pub event_type: ChangeType,
  pub table: String,
  #[serde(default)]
  pub new_row: Value,
  #[serde(default)]
  pub old_row: Value,
}

impl ChangeEvent {
  pub fn new(event_type: ChangeType, table: impl Into<String>, new_row: Value) -> Self {
    Self {
      event_type,
      table: table.into(),
      new_row,
      old_row: Value::Null,
    }
  }

  pub fn with_old_row(mut self, old_row: Value) -> Self {
    self.old_row = old_row;
    self
  }

  /// The row describing the change: the old row for deletes.
  pub fn row(&self) -> &Value {
    match self.event_type {
      ChangeType::Delete => &self.old_row,
      _ => &self.new_row,
    }
  }

  /// String value of `column` in [`row`](Self::row).
  pub fn column(&self, column: &str) -> Option<&str> {
    self.row().get(column).and_then(Value::as_str)
  }
}

/// Events of one open channel.
///
/// Closing or dropping the stream releases the channel.
#[derive(Debug)]
pub struct ChangeStream {
  events: mpsc::UnboundedReceiver<ChangeEvent>,
  closer: Option<oneshot::Sender<()>>,
}

impl ChangeStream {
  pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>, closer: oneshot::Sender<()>) -> Self {
    Self {
      events,
      closer: Some(closer),
    }
  }

  /// Next event, or `None` once the channel is gone.
  pub async fn next(&mut self) -> Option<ChangeEvent> {
    self.events.recv().await
  }

  pub fn close(&mut self) {
    if let Some(closer) = self.closer.take() {
      let _ = closer.send(());
    }
    self.events.close();
  }
}

impl Drop for ChangeStream {
  fn drop(&mut self) {
    self.close();
  }
}

/// Opens realtime channels.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
  async fn subscribe(&self, binding: &ChannelBinding) -> Result<ChangeStream, RealtimeError>;
}
