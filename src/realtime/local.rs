use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace};

use super::{ChangeEvent, ChangeStream, ChannelBinding, RealtimeTransport};
use crate::error::RealtimeError;

/// In-process realtime hub.
///
/// Every published event is offered to all open channels; each channel
/// keeps the ones its binding accepts.
#[derive(Debug, Clone)]
pub struct LocalTransport {
  hub: broadcast::Sender<ChangeEvent>,
  open: Arc<AtomicUsize>,
}

impl Default for LocalTransport {
  fn default() -> Self {
    Self::new()
  }
}

impl LocalTransport {
  pub fn new() -> Self {
    let (hub, _) = broadcast::channel(256);
    Self {
      hub,
      open: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// Push an event to every open channel. Returns the number of channels reached.
  pub fn publish(&self, event: ChangeEvent) -> usize {
    self.hub.send(event).unwrap_or(0)
  }

  /// Number of channels not yet released.
  pub fn open_channels(&self) -> usize {
    self.open.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RealtimeTransport for LocalTransport {
  async fn subscribe(&self, binding: &ChannelBinding) -> Result<ChangeStream, RealtimeError> {
    let mut hub = self.hub.subscribe();
    let (tx, events) = mpsc::unbounded_channel();
    let (closer, mut closed) = oneshot::channel();
    let binding = binding.clone();
    let open = Arc::clone(&self.open);
    open.fetch_add(1, Ordering::SeqCst);
    debug!(channel = %binding.channel, table = %binding.table, "local channel opened");

    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = &mut closed => break,
          _ = tx.closed() => break,
          received = hub.recv() => match received {
            Ok(event) if binding.accepts(&event) => {
              if tx.send(event).is_err() {
                break;
              }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
              trace!(channel = %binding.channel, skipped, "local channel lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
          },
        }
      }
      open.fetch_sub(1, Ordering::SeqCst);
      debug!(channel = %binding.channel, "local channel released");
    });

    Ok(ChangeStream::new(events, closer))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::realtime::{ChangeType, EventFilter};
  use serde_json::json;
  use std::time::Duration;

  #[tokio::test]
  async fn test_delivers_matching_events_only() {
    let transport = LocalTransport::new();
    let binding = ChannelBinding::new("feed", "posts", EventFilter::Insert);
    let mut stream = transport.subscribe(&binding).await.unwrap();

    transport.publish(ChangeEvent::new(ChangeType::Insert, "messages", json!({})));
    transport.publish(ChangeEvent::new(ChangeType::Insert, "posts", json!({"id": "p1"})));

    let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(event.column("id"), Some("p1"));
  }

  #[tokio::test]
  async fn test_closing_stream_releases_channel() {
    let transport = LocalTransport::new();
    let binding = ChannelBinding::new("feed", "posts", EventFilter::Any);
    let stream = transport.subscribe(&binding).await.unwrap();
    assert_eq!(transport.open_channels(), 1);

    drop(stream);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.open_channels(), 0);
  }
}
