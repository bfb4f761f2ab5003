//! Feed reads plus optimistic likes and poll votes.
//!
//! Both writes use the deferred policy: the patched counters are trusted on
//! success and only the resident's own liked/voted records are refetched.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheResult, CacheStore, IdentityScope, PagedList, QueryKey};
use crate::error::{RemoteError, RemoteResult};
use crate::mutation::{InFlight, MutationExecutor, MutationHooks, Submitted};
use crate::patch::PatchIntent;
use crate::query::QueryObserver;
use crate::realtime::{ChannelBinding, EventFilter, ListenerSpec};
use crate::reconcile::{OptimisticContext, Reconciler};

use super::api::CommunityApi;
use super::intents::{ChangeVote, ToggleLike};
use super::keys::{class, entity, post_views, CommunityKey};
use super::types::{LikedPosts, PollVotes, Post};

/// Patch every cached view of a post with `intent`.
fn patch_post_views<I>(store: &CacheStore, post_id: &str, intent: &I)
where
  I: PatchIntent<Post> + PatchIntent<PagedList<Post>>,
{
  store.rewrite_where(
    |id| id.class() == class::FEED,
    |list: PagedList<Post>| <I as PatchIntent<PagedList<Post>>>::build_patch(intent, list),
  );
  store.update(&CommunityKey::Post { post_id: post_id.to_string() }, |post: Post| {
    <I as PatchIntent<Post>>::build_patch(intent, post)
  });
}

struct LikeHooks {
  reconciler: Reconciler,
}

impl MutationHooks<ToggleLike> for LikeHooks {
  type Context = OptimisticContext;
  type Output = ();

  fn on_before_send(&self, action: &ToggleLike) -> OptimisticContext {
    let store = self.reconciler.store();
    let liked_key = CommunityKey::LikedPosts {
      resident_id: action.resident_id.clone(),
    };
    let affected = post_views().or(IdentityScope::exact(&liked_key));

    // A slower in-flight read must not overwrite the optimistic value
    store.cancel_queries(|id| affected.matches(id));
    let snapshot = store.snapshot(|id| affected.matches(id));

    patch_post_views(store, &action.post_id, action);
    store.update(&liked_key, |liked: LikedPosts| action.build_patch(liked));

    OptimisticContext::new(entity::POSTS, snapshot)
      .affecting(affected)
      .with_my_state(vec![liked_key.identity()])
      .with_broad(post_views())
  }

  fn on_success(&self, _output: &(), _action: &ToggleLike, context: &OptimisticContext) {
    self.reconciler.settle_ack(context);
  }

  fn on_error(&self, error: &RemoteError, _action: &ToggleLike, context: &OptimisticContext) {
    self.reconciler.settle_error::<Post>(context, error);
  }
}

struct VoteHooks {
  reconciler: Reconciler,
}

impl MutationHooks<ChangeVote> for VoteHooks {
  type Context = OptimisticContext;
  type Output = ();

  fn on_before_send(&self, action: &ChangeVote) -> OptimisticContext {
    let store = self.reconciler.store();
    let votes_key = CommunityKey::PollVotes {
      resident_id: action.resident_id.clone(),
    };
    let affected = post_views().or(IdentityScope::exact(&votes_key));

    store.cancel_queries(|id| affected.matches(id));
    let snapshot = store.snapshot(|id| affected.matches(id));

    patch_post_views(store, &action.post_id, action);
    store.update(&votes_key, |votes: PollVotes| action.build_patch(votes));

    OptimisticContext::new(entity::POLLS, snapshot)
      .affecting(affected)
      .with_my_state(vec![votes_key.identity()])
      .with_broad(post_views())
  }

  fn on_success(&self, _output: &(), _action: &ChangeVote, context: &OptimisticContext) {
    self.reconciler.settle_ack(context);
  }

  fn on_error(&self, error: &RemoteError, _action: &ChangeVote, context: &OptimisticContext) {
    self.reconciler.settle_error::<Post>(context, error);
  }
}

/// Feed operations of one resident.
#[derive(Clone)]
pub struct FeedActions {
  api: Arc<dyn CommunityApi>,
  reconciler: Reconciler,
  resident_id: String,
  in_flight: InFlight,
}

impl FeedActions {
  pub fn new(api: Arc<dyn CommunityApi>, reconciler: Reconciler, resident_id: impl Into<String>) -> Self {
    Self {
      api,
      reconciler,
      resident_id: resident_id.into(),
      in_flight: InFlight::new(),
    }
  }

  pub fn store(&self) -> &CacheStore {
    self.reconciler.store()
  }

  pub fn resident_id(&self) -> &str {
    &self.resident_id
  }

  /// First page of a community feed, cache first.
  pub async fn feed(&self, community_id: &str) -> RemoteResult<CacheResult<PagedList<Post>>> {
    let key = CommunityKey::Feed {
      community_id: community_id.to_string(),
    };
    let api = Arc::clone(&self.api);
    self
      .store()
      .fetch_query(&key, || async move { api.feed_page(community_id, None).await.map(PagedList::from_page) })
      .await
  }

  /// Append the next page to the cached feed. Returns false at the end.
  pub async fn load_more(&self, community_id: &str) -> RemoteResult<bool> {
    let key = CommunityKey::Feed {
      community_id: community_id.to_string(),
    };
    let Some(list) = self.store().read::<PagedList<Post>>(&key) else {
      return Ok(false);
    };
    let Some(cursor) = list.next_cursor().map(str::to_string) else {
      return Ok(false);
    };
    let page = self.api.feed_page(community_id, Some(&cursor)).await?;
    self.store().update(&key, |mut list: PagedList<Post>| {
      list.append_page(page);
      list
    });
    Ok(true)
  }

  pub async fn post(&self, post_id: &str) -> RemoteResult<CacheResult<Post>> {
    let key = CommunityKey::Post {
      post_id: post_id.to_string(),
    };
    let api = Arc::clone(&self.api);
    self.store().fetch_query(&key, || async move { api.post(post_id).await }).await
  }

  pub async fn liked_posts(&self) -> RemoteResult<CacheResult<LikedPosts>> {
    let key = CommunityKey::LikedPosts {
      resident_id: self.resident_id.clone(),
    };
    let api = Arc::clone(&self.api);
    let resident_id = self.resident_id.as_str();
    self
      .store()
      .fetch_query(&key, || async move { api.liked_posts(resident_id).await })
      .await
  }

  pub async fn poll_votes(&self) -> RemoteResult<CacheResult<PollVotes>> {
    let key = CommunityKey::PollVotes {
      resident_id: self.resident_id.clone(),
    };
    let api = Arc::clone(&self.api);
    let resident_id = self.resident_id.as_str();
    self
      .store()
      .fetch_query(&key, || async move { api.poll_votes(resident_id).await })
      .await
  }

  /// Tick-polled observer of a community feed.
  pub fn observe_feed(&self, community_id: &str) -> QueryObserver<PagedList<Post>> {
    let key = CommunityKey::Feed {
      community_id: community_id.to_string(),
    };
    let api = Arc::clone(&self.api);
    let community_id = community_id.to_string();
    QueryObserver::new(self.store().clone(), &key, move || {
      let api = Arc::clone(&api);
      let community_id = community_id.clone();
      async move { api.feed_page(&community_id, None).await.map(PagedList::from_page) }
    })
  }

  /// Like or unlike `post_id`. `was_liked` is the state the user saw.
  pub async fn toggle_like(&self, post_id: &str, was_liked: bool) -> RemoteResult<Submitted<()>> {
    let Some(_guard) = self.in_flight.try_acquire(format!("like:{}", post_id)) else {
      return Ok(Submitted::AlreadyPending);
    };

    let hooks = LikeHooks {
      reconciler: self.reconciler.clone(),
    };
    let api = Arc::clone(&self.api);
    let executor = MutationExecutor::new("toggle_like", hooks, move |action: ToggleLike| {
      let api = Arc::clone(&api);
      async move {
        if action.was_liked {
          api.unlike_post(&action.post_id, &action.resident_id).await
        } else {
          api.like_post(&action.post_id, &action.resident_id).await
        }
      }
    });

    let action = ToggleLike {
      post_id: post_id.to_string(),
      resident_id: self.resident_id.clone(),
      was_liked,
    };
    executor.execute(action).await?;
    info!(post_id, liked = !was_liked, "like toggled");
    Ok(Submitted::Sent(()))
  }

  /// Vote for `option_id`, moving the resident's `previous` vote if any.
  pub async fn cast_vote(&self, post_id: &str, option_id: &str, previous: Option<&str>) -> RemoteResult<Submitted<()>> {
    let Some(_guard) = self.in_flight.try_acquire(format!("vote:{}", post_id)) else {
      return Ok(Submitted::AlreadyPending);
    };

    let hooks = VoteHooks {
      reconciler: self.reconciler.clone(),
    };
    let api = Arc::clone(&self.api);
    let executor = MutationExecutor::new("cast_vote", hooks, move |action: ChangeVote| {
      let api = Arc::clone(&api);
      async move {
        api
          .cast_vote(&action.post_id, &action.option_id, &action.resident_id)
          .await
      }
    });

    let action = ChangeVote {
      post_id: post_id.to_string(),
      option_id: option_id.to_string(),
      resident_id: self.resident_id.clone(),
      previous: previous.map(str::to_string),
    };
    executor.execute(action).await?;
    info!(post_id, option_id, "vote cast");
    Ok(Submitted::Sent(()))
  }

  /// Refetch feeds when neighbors post or edit.
  pub fn feed_listener(&self, community_id: &str) -> ListenerSpec {
    ListenerSpec::new(
      ChannelBinding::new(format!("feed:{}", community_id), "posts", EventFilter::Any)
        .filter_eq("community_id", community_id),
      IdentityScope::exact(&CommunityKey::Feed {
        community_id: community_id.to_string(),
      }),
    )
    .skip_actor("author_id")
  }
}
