//! Conversations and optimistic message sending.
//!
//! Sending uses the swap policy: the message appears immediately with a
//! client id and is replaced in place by the stored row once acknowledged,
//! so replies and reactions can target its real id.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::cache::{CacheResult, CacheStore, IdentityScope, PagedList, QueryKey};
use crate::error::{ErrorKind, RemoteError, RemoteResult};
use crate::mutation::{spawn_side_effect, Diagnostics, MutationExecutor, MutationHooks};
use crate::patch::PatchIntent;
use crate::query::QueryObserver;
use crate::realtime::{ChannelBinding, EventFilter, ListenerSpec};
use crate::reconcile::{OptimisticContext, Reconciler};

use super::api::CommunityApi;
use super::intents::AppendMessage;
use super::keys::{entity, CommunityKey};
use super::types::{Conversation, Message, MessageDraft, ReplyPreview};

#[derive(Debug, Clone)]
struct SendMessage {
  draft: MessageDraft,
  client_id: Uuid,
}

struct SendHooks {
  reconciler: Reconciler,
  api: Arc<dyn CommunityApi>,
  diagnostics: Option<Diagnostics>,
}

impl SendHooks {
  fn messages_key(action: &SendMessage) -> CommunityKey {
    CommunityKey::Messages {
      conversation_id: action.draft.conversation_id.clone(),
    }
  }

  fn conversations_key(action: &SendMessage) -> CommunityKey {
    CommunityKey::Conversations {
      resident_id: action.draft.sender_id.clone(),
    }
  }
}

impl MutationHooks<SendMessage> for SendHooks {
  type Context = OptimisticContext;
  type Output = Message;

  fn on_before_send(&self, action: &SendMessage) -> OptimisticContext {
    let store = self.reconciler.store();
    let key = Self::messages_key(action);
    let affected = IdentityScope::exact(&key);

    store.cancel_queries(|id| affected.matches(id));
    let snapshot = store.snapshot_of(&[key.identity()]);

    let reply_preview = action.draft.reply_to.as_deref().and_then(|reply_to| {
      store
        .read::<PagedList<Message>>(&key)
        .and_then(|list| list.items().find(|m| m.id == reply_to).map(ReplyPreview::of))
    });
    let intent = AppendMessage {
      message: Message::optimistic(&action.draft, action.client_id, reply_preview),
    };
    store.update(&key, |list: PagedList<Message>| intent.build_patch(list));

    OptimisticContext::new(entity::MESSAGES, snapshot)
      .with_correlation(action.client_id)
      .affecting(affected.clone())
      .with_broad(affected.or(IdentityScope::exact(&Self::conversations_key(action))))
  }

  fn on_success(&self, message: &Message, action: &SendMessage, context: &OptimisticContext) {
    self.reconciler.settle_success(context, message);
    // Conversation previews are not patched optimistically
    self.reconciler.store().invalidate_key(&Self::conversations_key(action));

    let api = Arc::clone(&self.api);
    let conversation_id = message.conversation_id.clone();
    let message_id = message.id.clone();
    let sender_id = message.sender_id.clone();
    spawn_side_effect(
      "notify_conversation",
      async move {
        api
          .notify_conversation(&conversation_id, &message_id, &sender_id)
          .await
      },
      self.diagnostics.clone(),
    );
  }

  fn on_error(&self, error: &RemoteError, _action: &SendMessage, context: &OptimisticContext) {
    self.reconciler.settle_error::<Message>(context, error);
  }
}

/// Chat operations of one resident.
#[derive(Clone)]
pub struct ChatActions {
  api: Arc<dyn CommunityApi>,
  reconciler: Reconciler,
  resident_id: String,
  diagnostics: Option<Diagnostics>,
}

impl ChatActions {
  pub fn new(api: Arc<dyn CommunityApi>, reconciler: Reconciler, resident_id: impl Into<String>) -> Self {
    Self {
      api,
      reconciler,
      resident_id: resident_id.into(),
      diagnostics: None,
    }
  }

  /// Observe failures of the notification side effect.
  pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
    self.diagnostics = Some(diagnostics);
    self
  }

  pub fn store(&self) -> &CacheStore {
    self.reconciler.store()
  }

  pub async fn messages(&self, conversation_id: &str) -> RemoteResult<CacheResult<PagedList<Message>>> {
    let key = CommunityKey::Messages {
      conversation_id: conversation_id.to_string(),
    };
    let api = Arc::clone(&self.api);
    self
      .store()
      .fetch_query(&key, || async move {
        api.messages_page(conversation_id, None).await.map(PagedList::from_page)
      })
      .await
  }

  pub async fn conversations(&self) -> RemoteResult<CacheResult<Vec<Conversation>>> {
    let key = CommunityKey::Conversations {
      resident_id: self.resident_id.clone(),
    };
    let api = Arc::clone(&self.api);
    let resident_id = self.resident_id.as_str();
    self
      .store()
      .fetch_query(&key, || async move { api.conversations(resident_id).await })
      .await
  }

  /// Tick-polled observer of one conversation's messages.
  pub fn observe_messages(&self, conversation_id: &str) -> QueryObserver<PagedList<Message>> {
    let key = CommunityKey::Messages {
      conversation_id: conversation_id.to_string(),
    };
    let api = Arc::clone(&self.api);
    let conversation_id = conversation_id.to_string();
    QueryObserver::new(self.store().clone(), &key, move || {
      let api = Arc::clone(&api);
      let conversation_id = conversation_id.clone();
      async move { api.messages_page(&conversation_id, None).await.map(PagedList::from_page) }
    })
  }

  /// Send a message, showing it immediately as pending.
  pub async fn send_message(&self, conversation_id: &str, body: &str, reply_to: Option<&str>) -> RemoteResult<Message> {
    let body = body.trim();
    if body.is_empty() {
      return Err(RemoteError::new(ErrorKind::Validation, "message body is empty"));
    }

    let hooks = SendHooks {
      reconciler: self.reconciler.clone(),
      api: Arc::clone(&self.api),
      diagnostics: self.diagnostics.clone(),
    };
    let api = Arc::clone(&self.api);
    let executor = MutationExecutor::new("send_message", hooks, move |action: SendMessage| {
      let api = Arc::clone(&api);
      async move { api.send_message(&action.draft).await }
    });

    let action = SendMessage {
      draft: MessageDraft {
        conversation_id: conversation_id.to_string(),
        sender_id: self.resident_id.clone(),
        body: body.to_string(),
        reply_to: reply_to.map(str::to_string),
      },
      client_id: Uuid::new_v4(),
    };
    let message = executor.execute(action).await?;
    info!(conversation_id, message_id = %message.id, "message sent");
    Ok(message)
  }

  /// Refetch a conversation when other members post into it.
  pub fn message_listener(&self, conversation_id: &str) -> ListenerSpec {
    ListenerSpec::new(
      ChannelBinding::new(format!("messages:{}", conversation_id), "messages", EventFilter::Insert)
        .filter_eq("conversation_id", conversation_id),
      IdentityScope::exact(&CommunityKey::Messages {
        conversation_id: conversation_id.to_string(),
      }),
    )
    .skip_actor("sender_id")
  }

  /// Refetch the conversation list on any new message visible to the resident.
  pub fn conversation_listener(&self) -> ListenerSpec {
    ListenerSpec::new(
      ChannelBinding::new(format!("conversations:{}", self.resident_id), "messages", EventFilter::Insert),
      IdentityScope::exact(&CommunityKey::Conversations {
        resident_id: self.resident_id.clone(),
      }),
    )
    .skip_actor("sender_id")
  }
}
