//! The kind-classified error shared by every Davenport crate.
//!
//! Callers branch on the kind, not on the message: a write that loses an
//! optimistic version race is a `Conflict`, an absent document or metadata
//! entry is `NotFound`, and everything else (validation, backend failures,
//! user-callback failures) is `Other`.

use thiserror::Error;

/// Broad classification consumers can test against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Unclassified failure.
  Other,
  /// An optimistic-concurrency version check failed.
  Conflict,
  /// The requested document or metadata entry does not exist.
  NotFound,
}

/// An error carrying an [`ErrorKind`], a human-readable message, and an
/// optional wrapped cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
  kind:    ErrorKind,
  message: String,
  #[source]
  source:  Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
  fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self { kind, message: message.into(), source: None }
  }

  pub fn other(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Other, message)
  }

  pub fn conflict(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Conflict, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::NotFound, message)
  }

  /// Attach the underlying cause.
  pub fn with_source(
    mut self,
    source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
  ) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn kind(&self) -> ErrorKind { self.kind }

  pub fn is_conflict(&self) -> bool { self.kind == ErrorKind::Conflict }

  pub fn is_not_found(&self) -> bool { self.kind == ErrorKind::NotFound }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Error::other("serialization error").with_source(err)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_are_observable() {
    assert_eq!(Error::other("x").kind(), ErrorKind::Other);
    assert!(Error::conflict("x").is_conflict());
    assert!(Error::not_found("x").is_not_found());
    assert!(!Error::other("x").is_conflict());
  }

  #[test]
  fn message_is_display() {
    let err = Error::conflict("version mismatched: 1 vs 2");
    assert_eq!(err.to_string(), "version mismatched: 1 vs 2");
  }

  #[test]
  fn source_is_preserved() {
    let cause = serde_json::from_str::<i64>("not json").unwrap_err();
    let err = Error::other("decode failed").with_source(cause);
    assert!(std::error::Error::source(&err).is_some());
  }
}
