//! In-memory [`CommunityApi`] for tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use super::api::CommunityApi;
use super::types::{Conversation, LikedPosts, Message, MessageDraft, PollVotes, Post};
use crate::cache::Page;
use crate::error::{ErrorKind, RemoteError, RemoteResult};

#[derive(Default)]
pub struct FakeApi {
  pub posts: Mutex<Vec<Post>>,
  pub likes: Mutex<BTreeSet<(String, String)>>,
  pub votes: Mutex<BTreeMap<(String, String), String>>,
  pub messages: Mutex<Vec<Message>>,
  /// Outcomes for upcoming writes; `None` entries succeed
  pub write_failures: Mutex<VecDeque<Option<RemoteError>>>,
  pub notify_failure: Mutex<Option<RemoteError>>,
  /// Runs at the start of every write, while the request is in flight
  pub during_write: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
  pub write_calls: AtomicU64,
  pub notify_calls: AtomicU64,
  next_id: AtomicU64,
}

impl FakeApi {
  pub fn with_posts(posts: Vec<Post>) -> Self {
    Self {
      posts: Mutex::new(posts),
      ..Self::default()
    }
  }

  pub fn fail_next_write(&self, error: RemoteError) {
    self.write_failures.lock().unwrap().push_back(Some(error));
  }

  fn write_outcome(&self) -> RemoteResult<()> {
    self.write_calls.fetch_add(1, Ordering::SeqCst);
    let hook = self.during_write.lock().unwrap().clone();
    if let Some(hook) = hook {
      hook();
    }
    match self.write_failures.lock().unwrap().pop_front() {
      Some(Some(error)) => Err(error),
      _ => Ok(()),
    }
  }
}

#[async_trait]
impl CommunityApi for FakeApi {
  async fn feed_page(&self, community_id: &str, _before: Option<&str>) -> RemoteResult<Page<Post>> {
    let posts = self.posts.lock().unwrap();
    let items = posts.iter().filter(|p| p.community_id == community_id).cloned().collect();
    Ok(Page::new(items, None))
  }

  async fn post(&self, post_id: &str) -> RemoteResult<Post> {
    let posts = self.posts.lock().unwrap();
    posts
      .iter()
      .find(|p| p.id == post_id)
      .cloned()
      .ok_or_else(|| RemoteError::new(ErrorKind::NotFound, post_id))
  }

  async fn liked_posts(&self, resident_id: &str) -> RemoteResult<LikedPosts> {
    let likes = self.likes.lock().unwrap();
    Ok(LikedPosts {
      resident_id: resident_id.to_string(),
      post_ids: likes
        .iter()
        .filter(|(_, r)| r == resident_id)
        .map(|(p, _)| p.clone())
        .collect(),
    })
  }

  async fn poll_votes(&self, resident_id: &str) -> RemoteResult<PollVotes> {
    let votes = self.votes.lock().unwrap();
    Ok(PollVotes {
      resident_id: resident_id.to_string(),
      choices: votes
        .iter()
        .filter(|((_, r), _)| r == resident_id)
        .map(|((p, _), o)| (p.clone(), o.clone()))
        .collect(),
    })
  }

  async fn messages_page(&self, conversation_id: &str, _before: Option<&str>) -> RemoteResult<Page<Message>> {
    let messages = self.messages.lock().unwrap();
    let items = messages
      .iter()
      .rev()
      .filter(|m| m.conversation_id == conversation_id)
      .cloned()
      .collect();
    Ok(Page::new(items, None))
  }

  async fn conversations(&self, _resident_id: &str) -> RemoteResult<Vec<Conversation>> {
    Ok(Vec::new())
  }

  async fn like_post(&self, post_id: &str, resident_id: &str) -> RemoteResult<()> {
    self.write_outcome()?;
    let inserted = self
      .likes
      .lock()
      .unwrap()
      .insert((post_id.to_string(), resident_id.to_string()));
    if !inserted {
      return Err(RemoteError::new(ErrorKind::Conflict, "already liked").with_code("23505"));
    }
    if let Some(post) = self.posts.lock().unwrap().iter_mut().find(|p| p.id == post_id) {
      post.like_count += 1;
    }
    Ok(())
  }

  async fn unlike_post(&self, post_id: &str, resident_id: &str) -> RemoteResult<()> {
    self.write_outcome()?;
    let removed = self
      .likes
      .lock()
      .unwrap()
      .remove(&(post_id.to_string(), resident_id.to_string()));
    if removed {
      if let Some(post) = self.posts.lock().unwrap().iter_mut().find(|p| p.id == post_id) {
        post.like_count = post.like_count.saturating_sub(1);
      }
    }
    Ok(())
  }

  async fn cast_vote(&self, post_id: &str, option_id: &str, resident_id: &str) -> RemoteResult<()> {
    self.write_outcome()?;
    self
      .votes
      .lock()
      .unwrap()
      .insert((post_id.to_string(), resident_id.to_string()), option_id.to_string());
    Ok(())
  }

  async fn send_message(&self, draft: &MessageDraft) -> RemoteResult<Message> {
    self.write_outcome()?;
    let n = self.next_id.fetch_add(1, Ordering::SeqCst);
    let message = Message {
      id: format!("m{}", n),
      conversation_id: draft.conversation_id.clone(),
      sender_id: draft.sender_id.clone(),
      body: draft.body.clone(),
      created_at: Utc::now(),
      reply_to: draft.reply_to.clone(),
      client_id: None,
      pending: false,
      reply_preview: None,
    };
    self.messages.lock().unwrap().push(message.clone());
    Ok(message)
  }

  async fn notify_conversation(&self, _conversation_id: &str, _message_id: &str, _sender_id: &str) -> RemoteResult<()> {
    self.notify_calls.fetch_add(1, Ordering::SeqCst);
    match self.notify_failure.lock().unwrap().clone() {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }
}
