//! Community features built on the optimistic cache: the neighborhood feed
//! (likes, poll votes) and resident chat.

mod api;
mod chat;
#[cfg(test)]
pub(crate) mod fake;
mod feed;
mod intents;
mod keys;
mod types;

pub use api::{CommunityApi, CommunityClient};
pub use chat::ChatActions;
pub use feed::FeedActions;
pub use intents::{AppendMessage, ChangeVote, ToggleLike};
pub use keys::{class, default_policies, entity, post_views, CommunityKey};
pub use types::{
  Conversation, LikedPosts, Message, MessageDraft, Poll, PollOption, PollVotes, Post, ReplyPreview,
};
