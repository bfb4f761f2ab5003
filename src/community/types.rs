use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::patch::Tally;
use crate::reconcile::Correlated;

/// A community feed post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
  pub id: String,
  pub community_id: String,
  pub author_id: String,
  pub body: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub like_count: u32,
  #[serde(default)]
  pub poll: Option<Poll>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
  pub id: String,
  pub question: String,
  #[serde(default)]
  pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
  pub id: String,
  pub label: String,
  #[serde(default)]
  pub vote_count: u32,
}

impl Tally for PollOption {
  fn choice_id(&self) -> &str {
    &self.id
  }

  fn tally(&self) -> u32 {
    self.vote_count
  }

  fn set_tally(&mut self, tally: u32) {
    self.vote_count = tally;
  }
}

// Posts are never inserted optimistically, only patched in place
impl Correlated for Post {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn correlation_id(&self) -> Option<Uuid> {
    None
  }

  fn is_pending(&self) -> bool {
    false
  }
}

/// Post ids the current resident has liked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LikedPosts {
  pub resident_id: String,
  pub post_ids: BTreeSet<String>,
}

impl LikedPosts {
  pub fn contains(&self, post_id: &str) -> bool {
    self.post_ids.contains(post_id)
  }
}

/// Poll option chosen by the current resident, per post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollVotes {
  pub resident_id: String,
  pub choices: BTreeMap<String, String>,
}

impl PollVotes {
  pub fn choice_for(&self, post_id: &str) -> Option<&str> {
    self.choices.get(post_id).map(String::as_str)
  }
}

/// Excerpt of the message being replied to, shown above a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
  pub message_id: String,
  pub sender_id: String,
  pub excerpt: String,
}

impl ReplyPreview {
  const EXCERPT_CHARS: usize = 80;

  pub fn of(message: &Message) -> Self {
    Self {
      message_id: message.id.clone(),
      sender_id: message.sender_id.clone(),
      excerpt: message.body.chars().take(Self::EXCERPT_CHARS).collect(),
    }
  }
}

/// A chat message. `client_id`, `pending` and `reply_preview` only exist client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub id: String,
  pub conversation_id: String,
  pub sender_id: String,
  pub body: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub reply_to: Option<String>,
  #[serde(default)]
  pub client_id: Option<Uuid>,
  #[serde(default)]
  pub pending: bool,
  #[serde(default)]
  pub reply_preview: Option<ReplyPreview>,
}

impl Message {
  /// Placeholder shown until the server assigns an id.
  pub fn optimistic(draft: &MessageDraft, client_id: Uuid, reply_preview: Option<ReplyPreview>) -> Self {
    Self {
      id: format!("pending-{}", client_id),
      conversation_id: draft.conversation_id.clone(),
      sender_id: draft.sender_id.clone(),
      body: draft.body.clone(),
      created_at: Utc::now(),
      reply_to: draft.reply_to.clone(),
      client_id: Some(client_id),
      pending: true,
      reply_preview,
    }
  }
}

impl Correlated for Message {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn correlation_id(&self) -> Option<Uuid> {
    self.client_id
  }

  fn is_pending(&self) -> bool {
    self.pending
  }

  fn adopt_transient(&mut self, optimistic: &Self) {
    self.client_id = optimistic.client_id;
    if self.reply_preview.is_none() {
      self.reply_preview = optimistic.reply_preview.clone();
    }
  }
}

/// Row sent to the backend for a new message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageDraft {
  pub conversation_id: String,
  pub sender_id: String,
  pub body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reply_to: Option<String>,
}

/// Row of the conversation list procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
  pub id: String,
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub last_message: Option<String>,
  #[serde(default)]
  pub last_message_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub unread_count: u32,
}
