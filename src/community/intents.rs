//! Optimistic intents of the community features.

use crate::cache::PagedList;
use crate::patch::{change_choice, toggle_count, toggle_membership, PatchIntent};

use super::types::{LikedPosts, Message, PollVotes, Post};

/// Like or unlike a post, given whether it was liked before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleLike {
  pub post_id: String,
  pub resident_id: String,
  pub was_liked: bool,
}

impl PatchIntent<Post> for ToggleLike {
  fn build_patch(&self, mut post: Post) -> Post {
    if post.id == self.post_id {
      post.like_count = toggle_count(post.like_count, self.was_liked);
    }
    post
  }
}

impl PatchIntent<PagedList<Post>> for ToggleLike {
  fn build_patch(&self, list: PagedList<Post>) -> PagedList<Post> {
    list.map_items(|post| self.build_patch(post))
  }
}

impl PatchIntent<LikedPosts> for ToggleLike {
  fn build_patch(&self, mut liked: LikedPosts) -> LikedPosts {
    liked.post_ids = toggle_membership(liked.post_ids, &self.post_id, self.was_liked);
    liked
  }
}

/// Vote on a post's poll, moving any previous vote of the same resident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeVote {
  pub post_id: String,
  pub option_id: String,
  pub resident_id: String,
  pub previous: Option<String>,
}

impl PatchIntent<Post> for ChangeVote {
  fn build_patch(&self, mut post: Post) -> Post {
    if post.id != self.post_id {
      return post;
    }
    if let Some(poll) = post.poll.as_mut() {
      let options = std::mem::take(&mut poll.options);
      poll.options = change_choice(options, self.previous.as_deref(), &self.option_id);
    }
    post
  }
}

impl PatchIntent<PagedList<Post>> for ChangeVote {
  fn build_patch(&self, list: PagedList<Post>) -> PagedList<Post> {
    list.map_items(|post| self.build_patch(post))
  }
}

impl PatchIntent<PollVotes> for ChangeVote {
  fn build_patch(&self, mut votes: PollVotes) -> PollVotes {
    votes.choices.insert(self.post_id.clone(), self.option_id.clone());
    votes
  }
}

/// Show a not yet acknowledged message at the head of its conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendMessage {
  pub message: Message,
}

impl PatchIntent<PagedList<Message>> for AppendMessage {
  fn build_patch(&self, mut list: PagedList<Message>) -> PagedList<Message> {
    // Lists are newest first
    list.prepend(self.message.clone());
    list
  }
}
