use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::RestClient;
use crate::cache::Page;
use crate::error::{ErrorKind, RemoteError, RemoteResult};

use super::types::{Conversation, LikedPosts, Message, MessageDraft, PollVotes, Post};

const DEFAULT_PAGE_SIZE: usize = 20;
const POST_COLUMNS: &str = "*,poll:polls(id,question,options:poll_options(id,label,vote_count))";

/// Remote operations of the community features.
#[async_trait]
pub trait CommunityApi: Send + Sync {
  /// Posts of a community, newest first, older than `before` when given.
  async fn feed_page(&self, community_id: &str, before: Option<&str>) -> RemoteResult<Page<Post>>;

  async fn post(&self, post_id: &str) -> RemoteResult<Post>;

  async fn liked_posts(&self, resident_id: &str) -> RemoteResult<LikedPosts>;

  async fn poll_votes(&self, resident_id: &str) -> RemoteResult<PollVotes>;

  /// Messages of a conversation, newest first.
  async fn messages_page(&self, conversation_id: &str, before: Option<&str>) -> RemoteResult<Page<Message>>;

  async fn conversations(&self, resident_id: &str) -> RemoteResult<Vec<Conversation>>;

  async fn like_post(&self, post_id: &str, resident_id: &str) -> RemoteResult<()>;

  async fn unlike_post(&self, post_id: &str, resident_id: &str) -> RemoteResult<()>;

  async fn cast_vote(&self, post_id: &str, option_id: &str, resident_id: &str) -> RemoteResult<()>;

  async fn send_message(&self, draft: &MessageDraft) -> RemoteResult<Message>;

  /// Push notification fan-out for a new message.
  async fn notify_conversation(&self, conversation_id: &str, message_id: &str, sender_id: &str) -> RemoteResult<()>;
}

#[derive(Debug, Deserialize)]
struct LikeRow {
  post_id: String,
}

#[derive(Debug, Deserialize)]
struct VoteRow {
  post_id: String,
  option_id: String,
}

/// [`CommunityApi`] over the REST backend.
#[derive(Debug, Clone)]
pub struct CommunityClient {
  rest: RestClient,
  page_size: usize,
}

impl CommunityClient {
  pub fn new(rest: RestClient) -> Self {
    Self {
      rest,
      page_size: DEFAULT_PAGE_SIZE,
    }
  }

  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  /// Newest-first page query on `created_at`.
  fn page_query(&self, scope_column: &str, scope_id: &str, select: &str, before: Option<&str>) -> Vec<(String, String)> {
    let mut query = vec![
      ("select".to_string(), select.to_string()),
      (scope_column.to_string(), format!("eq.{}", scope_id)),
      ("order".to_string(), "created_at.desc".to_string()),
      ("limit".to_string(), self.page_size.to_string()),
    ];
    if let Some(cursor) = before {
      query.push(("created_at".to_string(), format!("lt.{}", cursor)));
    }
    query
  }

  fn to_page<T>(&self, items: Vec<T>, cursor_of: impl Fn(&T) -> String) -> Page<T> {
    let next_cursor = if items.len() >= self.page_size {
      items.last().map(cursor_of)
    } else {
      None
    };
    Page::new(items, next_cursor)
  }
}

#[async_trait]
impl CommunityApi for CommunityClient {
  async fn feed_page(&self, community_id: &str, before: Option<&str>) -> RemoteResult<Page<Post>> {
    let query = self.page_query("community_id", community_id, POST_COLUMNS, before);
    let posts: Vec<Post> = self.rest.select("posts", &query).await?;
    debug!(community_id, count = posts.len(), "loaded feed page");
    Ok(self.to_page(posts, |p| p.created_at.to_rfc3339()))
  }

  async fn post(&self, post_id: &str) -> RemoteResult<Post> {
    let id = format!("eq.{}", post_id);
    let posts: Vec<Post> = self
      .rest
      .select("posts", &[("select", POST_COLUMNS), ("id", id.as_str()), ("limit", "1")])
      .await?;
    posts
      .into_iter()
      .next()
      .ok_or_else(|| RemoteError::new(ErrorKind::NotFound, format!("post {} not found", post_id)))
  }

  async fn liked_posts(&self, resident_id: &str) -> RemoteResult<LikedPosts> {
    let resident = format!("eq.{}", resident_id);
    let rows: Vec<LikeRow> = self
      .rest
      .select("post_likes", &[("select", "post_id"), ("resident_id", resident.as_str())])
      .await?;
    Ok(LikedPosts {
      resident_id: resident_id.to_string(),
      post_ids: rows.into_iter().map(|r| r.post_id).collect(),
    })
  }

  async fn poll_votes(&self, resident_id: &str) -> RemoteResult<PollVotes> {
    let resident = format!("eq.{}", resident_id);
    let rows: Vec<VoteRow> = self
      .rest
      .select("poll_votes", &[("select", "post_id,option_id"), ("resident_id", resident.as_str())])
      .await?;
    Ok(PollVotes {
      resident_id: resident_id.to_string(),
      choices: rows.into_iter().map(|r| (r.post_id, r.option_id)).collect(),
    })
  }

  async fn messages_page(&self, conversation_id: &str, before: Option<&str>) -> RemoteResult<Page<Message>> {
    let query = self.page_query("conversation_id", conversation_id, "*", before);
    let messages: Vec<Message> = self.rest.select("messages", &query).await?;
    Ok(self.to_page(messages, |m| m.created_at.to_rfc3339()))
  }

  async fn conversations(&self, resident_id: &str) -> RemoteResult<Vec<Conversation>> {
    self
      .rest
      .rpc("get_conversation_list", &json!({ "p_resident_id": resident_id }))
      .await
  }

  async fn like_post(&self, post_id: &str, resident_id: &str) -> RemoteResult<()> {
    let _: Value = self
      .rest
      .insert("post_likes", &json!({ "post_id": post_id, "resident_id": resident_id }))
      .await?;
    Ok(())
  }

  async fn unlike_post(&self, post_id: &str, resident_id: &str) -> RemoteResult<()> {
    let post = format!("eq.{}", post_id);
    let resident = format!("eq.{}", resident_id);
    self
      .rest
      .delete("post_likes", &[("post_id", post.as_str()), ("resident_id", resident.as_str())])
      .await
  }

  async fn cast_vote(&self, post_id: &str, option_id: &str, resident_id: &str) -> RemoteResult<()> {
    let _: Value = self
      .rest
      .rpc(
        "cast_poll_vote",
        &json!({ "p_post_id": post_id, "p_option_id": option_id, "p_resident_id": resident_id }),
      )
      .await?;
    Ok(())
  }

  async fn send_message(&self, draft: &MessageDraft) -> RemoteResult<Message> {
    self.rest.insert("messages", draft).await
  }

  async fn notify_conversation(&self, conversation_id: &str, message_id: &str, sender_id: &str) -> RemoteResult<()> {
    let _: Value = self
      .rest
      .rpc(
        "notify_conversation_members",
        &json!({
          "p_conversation_id": conversation_id,
          "p_message_id": message_id,
          "p_sender_id": sender_id,
        }),
      )
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use wiremock::matchers::{body_json, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn client(server: &MockServer) -> CommunityClient {
    CommunityClient::new(RestClient::new(&server.uri(), "anon").unwrap()).with_page_size(2)
  }

  #[tokio::test]
  async fn test_feed_page_sets_cursor_when_full() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/posts"))
      .and(query_param("community_id", "eq.c1"))
      .and(query_param("order", "created_at.desc"))
      .and(query_param("limit", "2"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": "p2", "community_id": "c1", "author_id": "r1", "body": "b", "created_at": "2024-05-02T00:00:00Z", "like_count": 1},
        {"id": "p1", "community_id": "c1", "author_id": "r1", "body": "a", "created_at": "2024-05-01T00:00:00Z",
         "poll": {"id": "q", "question": "?", "options": [{"id": "o1", "label": "yes", "vote_count": 3}]}}
      ])))
      .mount(&server)
      .await;

    let page = client(&server).await.feed_page("c1", None).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[1].poll.as_ref().unwrap().options[0].vote_count, 3);
    assert_eq!(page.next_cursor.as_deref(), Some("2024-05-01T00:00:00+00:00"));
  }

  #[tokio::test]
  async fn test_missing_post_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/posts"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
      .mount(&server)
      .await;

    let err = client(&server).await.post("gone").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
  }

  #[tokio::test]
  async fn test_cast_vote_calls_procedure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/rest/v1/rpc/cast_poll_vote"))
      .and(body_json(json!({"p_post_id": "p1", "p_option_id": "o2", "p_resident_id": "r1"})))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;

    client(&server).await.cast_vote("p1", "o2", "r1").await.unwrap();
  }

  #[tokio::test]
  async fn test_liked_posts_collects_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/post_likes"))
      .and(query_param("resident_id", "eq.r1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"post_id": "p1"}, {"post_id": "p3"}])))
      .mount(&server)
      .await;

    let liked = client(&server).await.liked_posts("r1").await.unwrap();
    assert!(liked.contains("p1") && liked.contains("p3"));
    assert_eq!(liked.post_ids.len(), 2);
  }
}
