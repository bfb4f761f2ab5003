//! Composition root of one signed-in session.
//!
//! The session owns the cache store, the API client, the realtime transport
//! and every listener registered through it. Ending the session tears the
//! listeners down and empties the store.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};

use crate::backend::RestClient;
use crate::cache::CacheStore;
use crate::community::{default_policies, ChatActions, CommunityApi, CommunityClient, FeedActions};
use crate::config::Config;
use crate::realtime::{ChangeListener, ListenerSpec, PhoenixTransport, RealtimeTransport};
use crate::reconcile::Reconciler;

pub struct Session {
  user_id: String,
  community_id: Option<String>,
  store: CacheStore,
  transport: Arc<dyn RealtimeTransport>,
  feed: FeedActions,
  chat: ChatActions,
  listeners: Vec<ChangeListener>,
}

impl Session {
  /// Build the live session described by `config`.
  pub fn start(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let access_token = Config::get_access_token();

    let rest = RestClient::new(&config.backend.url, api_key.clone())
      .map_err(|e| eyre!("Invalid backend url {}: {}", config.backend.url, e))?
      .with_access_token(access_token.clone());
    let endpoint = config
      .backend
      .realtime_endpoint()
      .map_err(|e| eyre!("Invalid realtime endpoint for {}: {}", config.backend.url, e))?;
    let transport = PhoenixTransport::new(endpoint.as_str(), api_key)
      .map_err(|e| eyre!("Invalid realtime endpoint: {}", e))?
      .with_access_token(access_token);

    let stale_secs = i64::try_from(config.cache.stale_time_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    let stale_time = chrono::Duration::seconds(stale_secs);
    let store = CacheStore::new().with_stale_time(stale_time);

    info!(user_id = %config.session.user_id, "session started");
    let session = Self::from_parts(
      config.session.user_id.clone(),
      Arc::new(CommunityClient::new(rest)),
      Arc::new(transport),
      store,
    );
    Ok(session.with_community(config.session.community_id.clone()))
  }

  /// Assemble a session from explicit collaborators.
  pub fn from_parts(
    user_id: impl Into<String>,
    api: Arc<dyn CommunityApi>,
    transport: Arc<dyn RealtimeTransport>,
    store: CacheStore,
  ) -> Self {
    let user_id = user_id.into();
    let reconciler = Reconciler::new(store.clone(), default_policies());
    Self {
      feed: FeedActions::new(Arc::clone(&api), reconciler.clone(), user_id.clone()),
      chat: ChatActions::new(api, reconciler, user_id.clone()),
      user_id,
      community_id: None,
      store,
      transport,
      listeners: Vec::new(),
    }
  }

  pub fn with_community(mut self, community_id: Option<String>) -> Self {
    self.community_id = community_id;
    self
  }

  pub fn user_id(&self) -> &str {
    &self.user_id
  }

  pub fn community_id(&self) -> Option<&str> {
    self.community_id.as_deref()
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn feed(&self) -> FeedActions {
    self.feed.clone()
  }

  pub fn chat(&self) -> ChatActions {
    self.chat.clone()
  }

  /// Start a realtime listener that lives until the session ends.
  pub fn listen(&mut self, spec: ListenerSpec) -> &ChangeListener {
    let listener = ChangeListener::spawn(Arc::clone(&self.transport), self.store.clone(), spec, self.user_id.clone());
    debug!(channel = %listener.channel(), "listener registered");
    self.listeners.push(listener);
    &self.listeners[self.listeners.len() - 1]
  }

  pub fn listeners(&self) -> &[ChangeListener] {
    &self.listeners
  }

  /// Tear down every listener and drop all cached data.
  pub fn end(mut self) {
    for listener in &mut self.listeners {
      listener.unsubscribe();
    }
    self.listeners.clear();
    self.store.clear();
    info!(user_id = %self.user_id, "session ended");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Page, PagedList};
  use crate::community::fake::FakeApi;
  use crate::community::{CommunityKey, Message};
  use crate::realtime::{ChangeEvent, ChangeType, ListenerState, LocalTransport};
  use serde_json::json;
  use std::time::Duration;

  async fn subscribed(listener: &ChangeListener) {
    let mut rx = listener.watch_state();
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == ListenerState::Subscribed))
      .await
      .unwrap()
      .unwrap();
  }

  #[tokio::test]
  async fn test_listeners_invalidate_shared_store() {
    let transport = LocalTransport::new();
    let mut session = Session::from_parts(
      "r1",
      Arc::new(FakeApi::default()),
      Arc::new(transport.clone()),
      CacheStore::new(),
    );
    let key = CommunityKey::Messages { conversation_id: "c1".into() };
    session
      .store()
      .write(&key, &PagedList::<Message>::from_page(Page::new(vec![], None)));

    let spec = session.chat().message_listener("c1");
    subscribed(session.listen(spec)).await;

    transport.publish(ChangeEvent::new(
      ChangeType::Insert,
      "messages",
      json!({"conversation_id": "c1", "sender_id": "r2"}),
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.store().is_stale(&key));
  }

  #[tokio::test]
  async fn test_end_releases_everything() {
    let transport = LocalTransport::new();
    let mut session = Session::from_parts(
      "r1",
      Arc::new(FakeApi::default()),
      Arc::new(transport.clone()),
      CacheStore::new(),
    );
    let store = session.store().clone();
    store.write(&CommunityKey::Post { post_id: "p1".into() }, &json!({"id": "p1"}));

    let spec = session.chat().conversation_listener();
    subscribed(session.listen(spec)).await;
    assert_eq!(transport.open_channels(), 1);

    session.end();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.open_channels(), 0);
    assert!(store.identities(|_| true).is_empty());
  }

  #[tokio::test]
  async fn test_action_handles_share_one_store() {
    let session = Session::from_parts(
      "r1",
      Arc::new(FakeApi::default()),
      Arc::new(LocalTransport::new()),
      CacheStore::new(),
    );
    let key = CommunityKey::Post { post_id: "p1".into() };
    session.feed().store().write(&key, &json!({"id": "p1"}));
    assert!(session.chat().store().contains(&key));
    assert_eq!(session.feed().resident_id(), "r1");
    assert!(session.listeners().is_empty());
  }
}
