//! Conversions between transport errors and the kind-classified error.

use davenport_core::Error;

/// Convert a `tokio_rusqlite` error into a store error.
///
/// Domain errors raised inside a connection closure travel through the
/// `Other` transport variant; unwrap them instead of double-wrapping.
pub(crate) fn from_db(err: tokio_rusqlite::Error) -> Error {
  match err {
    tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Error>() {
      Ok(domain) => *domain,
      Err(inner) => Error::other("database error").with_source(inner),
    },
    other => Error::other("database error").with_source(other),
  }
}

/// Wrap a domain error for transport out of a connection closure.
pub(crate) fn into_db(err: Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(err))
}

#[cfg(test)]
mod tests {
  use davenport_core::ErrorKind;

  use super::*;

  #[test]
  fn domain_errors_round_trip() {
    let err = from_db(into_db(Error::conflict("version mismatched: 1 vs 2")));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.to_string(), "version mismatched: 1 vs 2");
  }

  #[test]
  fn transport_errors_become_other() {
    let err = from_db(tokio_rusqlite::Error::ConnectionClosed);
    assert_eq!(err.kind(), ErrorKind::Other);
  }
}
