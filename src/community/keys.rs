use crate::cache::{IdentityScope, QueryIdentity, QueryKey};
use crate::reconcile::{PolicyTable, ReconcilePolicy};

/// Entity classes used to pick a reconciliation policy.
pub mod entity {
  pub const POSTS: &str = "posts";
  pub const POLLS: &str = "polls";
  pub const MESSAGES: &str = "messages";
}

/// Identity classes of cached queries.
pub mod class {
  pub const FEED: &str = "feed";
  pub const POST: &str = "post";
  pub const LIKED_POSTS: &str = "liked_posts";
  pub const POLL_VOTES: &str = "poll_votes";
  pub const MESSAGES: &str = "messages";
  pub const CONVERSATIONS: &str = "conversations";
}

/// Every cached query of the community client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommunityKey {
  Feed { community_id: String },
  Post { post_id: String },
  LikedPosts { resident_id: String },
  PollVotes { resident_id: String },
  Messages { conversation_id: String },
  Conversations { resident_id: String },
}

impl QueryKey for CommunityKey {
  fn identity(&self) -> QueryIdentity {
    match self {
      CommunityKey::Feed { community_id } => QueryIdentity::new(class::FEED, [community_id]),
      CommunityKey::Post { post_id } => QueryIdentity::new(class::POST, [post_id]),
      CommunityKey::LikedPosts { resident_id } => QueryIdentity::new(class::LIKED_POSTS, [resident_id]),
      CommunityKey::PollVotes { resident_id } => QueryIdentity::new(class::POLL_VOTES, [resident_id]),
      CommunityKey::Messages { conversation_id } => QueryIdentity::new(class::MESSAGES, [conversation_id]),
      CommunityKey::Conversations { resident_id } => QueryIdentity::new(class::CONVERSATIONS, [resident_id]),
    }
  }

  fn description(&self) -> String {
    match self {
      CommunityKey::Feed { community_id } => format!("feed of community {}", community_id),
      CommunityKey::Post { post_id } => format!("post {}", post_id),
      CommunityKey::LikedPosts { resident_id } => format!("posts liked by {}", resident_id),
      CommunityKey::PollVotes { resident_id } => format!("poll votes of {}", resident_id),
      CommunityKey::Messages { conversation_id } => format!("messages of {}", conversation_id),
      CommunityKey::Conversations { resident_id } => format!("conversations of {}", resident_id),
    }
  }
}

/// Every cached view that renders posts: all feeds plus post details.
pub fn post_views() -> IdentityScope {
  IdentityScope::class(class::FEED).or(IdentityScope::class(class::POST))
}

/// Messages are identity-sensitive (replies need the real id); likes and
/// votes only move counters.
pub fn default_policies() -> PolicyTable {
  PolicyTable::new(ReconcilePolicy::Deferred)
    .with(entity::MESSAGES, ReconcilePolicy::Swap)
    .with(entity::POSTS, ReconcilePolicy::Deferred)
    .with(entity::POLLS, ReconcilePolicy::Deferred)
}
