use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::error::{ErrorKind, RemoteError, RemoteResult};

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
  #[serde(default)]
  code: Option<String>,
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  details: Option<String>,
}

/// Map a failed response to an error kind.
///
/// The backend code wins over the HTTP status when both are known.
pub fn classify(status: u16, code: Option<&str>) -> ErrorKind {
  match code {
    Some("23505") => return ErrorKind::Conflict,
    Some("42501") => return ErrorKind::Permission,
    Some("PGRST116") => return ErrorKind::NotFound,
    Some(c) if c.starts_with("22") || c.starts_with("23") => return ErrorKind::Validation,
    _ => {}
  }
  match status {
    409 => ErrorKind::Conflict,
    400 | 422 => ErrorKind::Validation,
    401 | 403 => ErrorKind::Permission,
    404 => ErrorKind::NotFound,
    _ => ErrorKind::Transport,
  }
}

/// Row and procedure client for the community backend.
#[derive(Debug, Clone)]
pub struct RestClient {
  http: Client,
  base: Url,
  api_key: String,
  access_token: Option<String>,
}

impl RestClient {
  /// `base_url` is the project URL; requests go to `{base_url}/rest/v1/...`.
  pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, url::ParseError> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    Ok(Self {
      http: Client::new(),
      base: base.join("rest/v1/")?,
      api_key: api_key.into(),
      access_token: None,
    })
  }

  /// Act as a signed-in user instead of the anonymous role.
  pub fn with_access_token(mut self, token: Option<String>) -> Self {
    self.access_token = token;
    self
  }

  fn endpoint(&self, path: &str) -> RemoteResult<Url> {
    self
      .base
      .join(path)
      .map_err(|e| RemoteError::new(ErrorKind::Validation, format!("invalid path {}: {}", path, e)))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
    self
      .http
      .request(method, url)
      .header("apikey", &self.api_key)
      .header("Authorization", format!("Bearer {}", bearer))
  }

  /// Read rows of `table` matching PostgREST query parameters.
  pub async fn select<T, Q>(&self, table: &str, query: &Q) -> RemoteResult<Vec<T>>
  where
    T: DeserializeOwned,
    Q: Serialize + ?Sized,
  {
    let url = self.endpoint(table)?;
    let response = send(self.request(Method::GET, url).query(query)).await?;
    decode(response).await
  }

  /// Insert one row and return the stored representation.
  pub async fn insert<B, T>(&self, table: &str, row: &B) -> RemoteResult<T>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let url = self.endpoint(table)?;
    let request = self
      .request(Method::POST, url)
      .header("Prefer", "return=representation")
      .json(row);
    let rows: Vec<T> = decode(send(request).await?).await?;
    rows
      .into_iter()
      .next()
      .ok_or_else(|| RemoteError::new(ErrorKind::NotFound, format!("insert into {} returned no row", table)))
  }

  /// Delete rows of `table` matching the filters.
  pub async fn delete<Q: Serialize + ?Sized>(&self, table: &str, query: &Q) -> RemoteResult<()> {
    let url = self.endpoint(table)?;
    send(self.request(Method::DELETE, url).query(query)).await?;
    Ok(())
  }

  /// Call a server procedure.
  pub async fn rpc<B, T>(&self, name: &str, args: &B) -> RemoteResult<T>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let url = self.endpoint(&format!("rpc/{}", name))?;
    let response = send(self.request(Method::POST, url).json(args)).await?;
    decode(response).await
  }
}

async fn send(request: RequestBuilder) -> RemoteResult<Response> {
  let response = request
    .send()
    .await
    .map_err(|e| RemoteError::transport(format!("network error: {}", e)))?;

  let status = response.status();
  trace!(status = status.as_u16(), url = %response.url().path(), "backend response");
  if status.is_success() {
    return Ok(response);
  }

  let text = response.text().await.unwrap_or_default();
  Err(error_from_body(status, &text))
}

fn error_from_body(status: StatusCode, text: &str) -> RemoteError {
  let body: ApiErrorBody = serde_json::from_str(text).unwrap_or_default();
  let kind = classify(status.as_u16(), body.code.as_deref());
  let message = body
    .message
    .or(body.details)
    .unwrap_or_else(|| format!("request failed with status {}", status));
  debug!(status = status.as_u16(), code = ?body.code, %kind, "backend rejected request");

  let error = RemoteError::new(kind, message);
  match body.code {
    Some(code) => error.with_code(code),
    None => error,
  }
}

async fn decode<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
  // Empty bodies (204, void procedures) decode as JSON null
  let bytes = response
    .bytes()
    .await
    .map_err(|e| RemoteError::transport(format!("failed to read response: {}", e)))?;
  let body: &[u8] = if bytes.is_empty() { b"null" } else { &bytes[..] };
  serde_json::from_slice(body).map_err(|e| RemoteError::transport(format!("failed to parse response: {}", e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::{json, Value};
  use wiremock::matchers::{body_json, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn client(server: &MockServer) -> RestClient {
    RestClient::new(&server.uri(), "anon")
      .unwrap()
      .with_access_token(Some("jwt".into()))
  }

  #[test]
  fn test_classify() {
    assert_eq!(classify(409, Some("23505")), ErrorKind::Conflict);
    assert_eq!(classify(400, Some("23503")), ErrorKind::Validation);
    assert_eq!(classify(400, Some("22P02")), ErrorKind::Validation);
    assert_eq!(classify(403, Some("42501")), ErrorKind::Permission);
    assert_eq!(classify(406, Some("PGRST116")), ErrorKind::NotFound);
    assert_eq!(classify(422, None), ErrorKind::Validation);
    assert_eq!(classify(401, None), ErrorKind::Permission);
    assert_eq!(classify(404, None), ErrorKind::NotFound);
    assert_eq!(classify(503, None), ErrorKind::Transport);
  }

  #[tokio::test]
  async fn test_select_sends_auth_headers_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/posts"))
      .and(header("apikey", "anon"))
      .and(header("Authorization", "Bearer jwt"))
      .and(query_param("community_id", "eq.c1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "p1"}])))
      .mount(&server)
      .await;

    let rows: Vec<Value> = client(&server)
      .await
      .select("posts", &[("community_id", "eq.c1")])
      .await
      .unwrap();
    assert_eq!(rows, vec![json!({"id": "p1"})]);
  }

  #[tokio::test]
  async fn test_insert_conflict_maps_to_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/rest/v1/post_likes"))
      .and(header("Prefer", "return=representation"))
      .respond_with(ResponseTemplate::new(409).set_body_json(json!({
        "code": "23505",
        "message": "duplicate key value violates unique constraint",
        "details": null,
        "hint": null
      })))
      .mount(&server)
      .await;

    let err = client(&server)
      .await
      .insert::<_, Value>("post_likes", &json!({"post_id": "p1"}))
      .await
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(err.code.as_deref(), Some("23505"));
    assert!(err.message.starts_with("duplicate key"));
  }

  #[tokio::test]
  async fn test_insert_returns_first_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/rest/v1/messages"))
      .and(body_json(json!({"body": "hi"})))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": "m1", "body": "hi"}])))
      .mount(&server)
      .await;

    let row: Value = client(&server)
      .await
      .insert("messages", &json!({"body": "hi"}))
      .await
      .unwrap();
    assert_eq!(row["id"], "m1");
  }

  #[tokio::test]
  async fn test_rpc_permission_and_void_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/rest/v1/rpc/cast_poll_vote"))
      .respond_with(ResponseTemplate::new(403).set_body_json(json!({"code": "42501", "message": "rls"})))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/rest/v1/rpc/notify_conversation_members"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;

    let rest = client(&server).await;
    let err = rest.rpc::<_, Value>("cast_poll_vote", &json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Permission);

    rest
      .rpc::<_, ()>("notify_conversation_members", &json!({}))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_server_error_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
      .and(path("/rest/v1/post_likes"))
      .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
      .mount(&server)
      .await;

    let err = client(&server)
      .await
      .delete("post_likes", &[("post_id", "eq.p1")])
      .await
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.requires_resync());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_transport() {
    let rest = RestClient::new("http://127.0.0.1:9", "anon").unwrap();
    let err = rest.select::<Value, _>("posts", &[("select", "*")]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
  }
}
