//! Error taxonomy shared by the cache, mutation and realtime layers.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Machine-readable classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// The server state contradicts the optimistic assumption (e.g. duplicate action)
  Conflict,
  /// Malformed input rejected server-side
  Validation,
  /// Caller is not authorized for the operation
  Permission,
  /// Target entity vanished before the server confirmed
  NotFound,
  /// Network or infrastructure failure, no server opinion at all
  Transport,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Conflict => "conflict",
      ErrorKind::Validation => "validation",
      ErrorKind::Permission => "permission",
      ErrorKind::NotFound => "not_found",
      ErrorKind::Transport => "transport",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Error returned by any remote read, write or procedure call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
  pub kind: ErrorKind,
  pub message: String,
  /// Backend-specific code (SQLSTATE or gateway code) when one was reported
  pub code: Option<String>,
}

impl RemoteError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      code: None,
    }
  }

  pub fn with_code(mut self, code: impl Into<String>) -> Self {
    self.code = Some(code.into());
    self
  }

  pub fn transport(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Transport, message)
  }

  /// Conflict and validation failures always reach the user.
  pub fn is_user_facing(&self) -> bool {
    matches!(self.kind, ErrorKind::Conflict | ErrorKind::Validation)
  }

  /// Permission and not-found failures must never be re-attempted.
  pub fn is_retryable(&self) -> bool {
    !matches!(self.kind, ErrorKind::Permission | ErrorKind::NotFound)
  }

  /// The true server state is unknown; callers must resync broadly.
  pub fn requires_resync(&self) -> bool {
    self.kind == ErrorKind::Transport
  }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failure of a detached secondary call issued after a primary mutation.
#[derive(Debug, Clone, Error)]
#[error("side effect `{effect}` failed: {source}")]
pub struct SideEffectFailure {
  pub effect: &'static str,
  #[source]
  pub source: RemoteError,
}

/// Errors raised while establishing or running a realtime subscription.
#[derive(Debug, Error)]
pub enum RealtimeError {
  #[error("failed to connect to realtime endpoint: {0}")]
  Connect(String),
  #[error("channel join rejected: {0}")]
  Join(String),
  #[error("realtime channel closed")]
  Closed,
  #[error("malformed realtime frame: {0}")]
  Protocol(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_kind_policies() {
    let conflict = RemoteError::new(ErrorKind::Conflict, "duplicate like");
    assert!(conflict.is_user_facing());
    assert!(conflict.is_retryable());
    assert!(!conflict.requires_resync());

    let denied = RemoteError::new(ErrorKind::Permission, "rls");
    assert!(!denied.is_user_facing());
    assert!(!denied.is_retryable());

    let gone = RemoteError::new(ErrorKind::NotFound, "post deleted");
    assert!(!gone.is_retryable());

    let offline = RemoteError::transport("connection reset");
    assert!(offline.requires_resync());
    assert!(!offline.is_user_facing());
  }

  #[test]
  fn test_display_includes_kind() {
    let err = RemoteError::new(ErrorKind::Validation, "body too long").with_code("22001");
    assert_eq!(err.to_string(), "validation: body too long");
    assert_eq!(err.code.as_deref(), Some("22001"));
  }

  #[test]
  fn test_side_effect_failure_display() {
    let failure = SideEffectFailure {
      effect: "notify_conversation",
      source: RemoteError::transport("timed out"),
    };
    assert_eq!(
      failure.to_string(),
      "side effect `notify_conversation` failed: transport: timed out"
    );
  }
}
