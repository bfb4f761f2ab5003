//! Supabase-style realtime over a Phoenix channel socket.
//!
//! One WebSocket connection per subscribed channel. The join carries a
//! `postgres_changes` config so the server filters rows before pushing them.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{ChangeEvent, ChangeStream, ChangeType, ChannelBinding, RealtimeTransport};
use crate::error::RealtimeError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const JOIN_REF: &str = "1";
const PROTOCOL_VERSION: &str = "1.0.0";

/// Wire frame of the Phoenix protocol (v1 JSON object encoding).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
  topic: String,
  event: String,
  #[serde(default)]
  payload: Value,
  #[serde(rename = "ref", default)]
  reference: Option<String>,
}

impl Frame {
  fn new(topic: impl Into<String>, event: &str, payload: Value, reference: impl Into<String>) -> Self {
    Self {
      topic: topic.into(),
      event: event.to_string(),
      payload,
      reference: Some(reference.into()),
    }
  }

  fn to_message(&self) -> Result<Message, RealtimeError> {
    Ok(Message::Text(serde_json::to_string(self)?))
  }
}

#[derive(Debug, Deserialize)]
struct PostgresChange {
  #[serde(rename = "type")]
  change_type: ChangeType,
  table: String,
  #[serde(default)]
  record: Value,
  #[serde(default)]
  old_record: Value,
}

fn topic_for(binding: &ChannelBinding) -> String {
  format!("realtime:{}", binding.channel)
}

fn join_frame(binding: &ChannelBinding, access_token: Option<&str>) -> Frame {
  let mut change = json!({
    "event": binding.event.as_str(),
    "schema": "public",
    "table": binding.table,
  });
  if let Some(filter) = &binding.filter {
    change["filter"] = json!(filter);
  }
  let mut payload = json!({
    "config": {
      "broadcast": { "self": false },
      "presence": { "key": "" },
      "postgres_changes": [change],
    }
  });
  if let Some(token) = access_token {
    payload["access_token"] = json!(token);
  }
  Frame::new(topic_for(binding), "phx_join", payload, JOIN_REF)
}

/// Extract a row change from a `postgres_changes` frame.
fn decode_change(frame: &Frame) -> Result<Option<ChangeEvent>, RealtimeError> {
  if frame.event != "postgres_changes" {
    return Ok(None);
  }
  let data = frame.payload.get("data").cloned().unwrap_or(Value::Null);
  let change: PostgresChange = serde_json::from_value(data)?;
  Ok(Some(ChangeEvent {
    event_type: change.change_type,
    table: change.table,
    new_row: change.record,
    old_row: change.old_record,
  }))
}

/// Outcome of a `phx_reply` to our join, if `frame` is one.
fn join_reply(frame: &Frame) -> Option<Result<(), RealtimeError>> {
  if frame.event != "phx_reply" || frame.reference.as_deref() != Some(JOIN_REF) {
    return None;
  }
  match frame.payload.get("status").and_then(Value::as_str) {
    Some("ok") => Some(Ok(())),
    _ => {
      let reason = frame
        .payload
        .get("response")
        .map(Value::to_string)
        .unwrap_or_else(|| "no response".to_string());
      Some(Err(RealtimeError::Join(reason)))
    }
  }
}

/// Realtime transport speaking the Phoenix channel protocol.
#[derive(Debug, Clone)]
pub struct PhoenixTransport {
  endpoint: Url,
  api_key: String,
  access_token: Option<String>,
}

impl PhoenixTransport {
  /// `endpoint` is the realtime base URL, e.g. `wss://host/realtime/v1`.
  pub fn new(endpoint: &str, api_key: impl Into<String>) -> Result<Self, RealtimeError> {
    let endpoint = Url::parse(endpoint).map_err(|e| RealtimeError::Connect(e.to_string()))?;
    Ok(Self {
      endpoint,
      api_key: api_key.into(),
      access_token: None,
    })
  }

  pub fn with_access_token(mut self, token: Option<String>) -> Self {
    self.access_token = token;
    self
  }

  fn socket_url(&self) -> Url {
    let mut url = self.endpoint.clone();
    let path = format!("{}/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url
      .query_pairs_mut()
      .append_pair("apikey", &self.api_key)
      .append_pair("vsn", PROTOCOL_VERSION);
    url
  }
}

#[async_trait]
impl RealtimeTransport for PhoenixTransport {
  async fn subscribe(&self, binding: &ChannelBinding) -> Result<ChangeStream, RealtimeError> {
    let url = self.socket_url();
    debug!(host = ?url.host_str(), channel = %binding.channel, "connecting to realtime");

    let (ws_stream, _) = connect_async(url.as_str())
      .await
      .map_err(|e| RealtimeError::Connect(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let join = join_frame(binding, self.access_token.as_deref());
    write
      .send(join.to_message()?)
      .await
      .map_err(|e| RealtimeError::Connect(e.to_string()))?;

    // Wait for the join acknowledgement
    loop {
      match read.next().await {
        Some(Ok(Message::Text(text))) => {
          let frame: Frame = serde_json::from_str(&text)?;
          if let Some(reply) = join_reply(&frame) {
            reply?;
            break;
          }
          trace!(event = %frame.event, "frame before join reply");
        }
        Some(Ok(Message::Close(_))) | None => return Err(RealtimeError::Closed),
        Some(Ok(_)) => {}
        Some(Err(e)) => return Err(RealtimeError::Connect(e.to_string())),
      }
    }
    info!(channel = %binding.channel, "realtime channel joined");

    let (tx, events) = mpsc::unbounded_channel();
    let (closer, mut closed) = oneshot::channel::<()>();
    let topic = topic_for(binding);

    tokio::spawn(async move {
      let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
      // The first tick completes immediately
      heartbeat.tick().await;
      let mut next_ref: u64 = 2;

      loop {
        tokio::select! {
          _ = &mut closed => break,
          _ = tx.closed() => break,
          _ = heartbeat.tick() => {
            let frame = Frame::new("phoenix", "heartbeat", json!({}), next_ref.to_string());
            next_ref += 1;
            let sent = match frame.to_message() {
              Ok(message) => write.send(message).await.is_ok(),
              Err(_) => false,
            };
            if !sent {
              warn!(topic = %topic, "heartbeat failed");
              break;
            }
          }
          received = read.next() => match received {
            Some(Ok(Message::Text(text))) => {
              let frame: Frame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                  warn!(topic = %topic, error = %e, "malformed realtime frame");
                  continue;
                }
              };
              match frame.event.as_str() {
                "phx_error" | "phx_close" => {
                  info!(topic = %topic, event = %frame.event, "realtime channel closed by server");
                  return;
                }
                _ => match decode_change(&frame) {
                  Ok(Some(event)) => {
                    if tx.send(event).is_err() {
                      break;
                    }
                  }
                  Ok(None) => trace!(event = %frame.event, "ignoring realtime frame"),
                  Err(e) => warn!(topic = %topic, error = %e, "undecodable change payload"),
                },
              }
            }
            Some(Ok(Message::Close(_))) | None => {
              info!(topic = %topic, "realtime socket closed");
              return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
              warn!(topic = %topic, error = %e, "realtime read error");
              return;
            }
          },
        }
      }

      let leave = Frame::new(topic.clone(), "phx_leave", json!({}), next_ref.to_string());
      if let Ok(message) = leave.to_message() {
        let _ = write.send(message).await;
      }
      let _ = write.close().await;
      debug!(topic = %topic, "realtime channel left");
    });

    Ok(ChangeStream::new(events, closer))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::realtime::EventFilter;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_join_frame_shape() {
    let binding = ChannelBinding::new("chat:c1", "messages", EventFilter::Insert).filter_eq("conversation_id", "c1");
    let frame = join_frame(&binding, Some("jwt"));

    assert_eq!(frame.topic, "realtime:chat:c1");
    assert_eq!(frame.event, "phx_join");
    assert_eq!(
      frame.payload["config"]["postgres_changes"],
      json!([{
        "event": "INSERT",
        "schema": "public",
        "table": "messages",
        "filter": "conversation_id=eq.c1",
      }])
    );
    assert_eq!(frame.payload["access_token"], json!("jwt"));
  }

  #[test]
  fn test_decode_postgres_change() {
    let frame: Frame = serde_json::from_value(json!({
      "topic": "realtime:chat:c1",
      "event": "postgres_changes",
      "ref": null,
      "payload": {
        "data": {
          "type": "INSERT",
          "schema": "public",
          "table": "messages",
          "record": {"id": "m9", "sender_id": "r2"},
          "old_record": null,
          "commit_timestamp": "2024-05-01T10:00:00Z"
        },
        "ids": [1]
      }
    }))
    .unwrap();

    let event = decode_change(&frame).unwrap().unwrap();
    assert_eq!(event.event_type, ChangeType::Insert);
    assert_eq!(event.table, "messages");
    assert_eq!(event.column("sender_id"), Some("r2"));
  }

  #[test]
  fn test_join_reply_error() {
    let frame: Frame = serde_json::from_value(json!({
      "topic": "realtime:chat:c1",
      "event": "phx_reply",
      "ref": "1",
      "payload": {"status": "error", "response": {"reason": "unauthorized"}}
    }))
    .unwrap();
    assert!(matches!(join_reply(&frame), Some(Err(RealtimeError::Join(_)))));

    let heartbeat_reply = Frame::new("phoenix", "phx_reply", json!({"status": "ok"}), "7");
    assert!(join_reply(&heartbeat_reply).is_none());
  }

  #[test]
  fn test_socket_url() {
    let transport = PhoenixTransport::new("wss://db.example.org/realtime/v1", "anon").unwrap();
    assert_eq!(
      transport.socket_url().as_str(),
      "wss://db.example.org/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
    );
  }
}
