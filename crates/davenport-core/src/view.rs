//! View parameter and result types.
//!
//! The query surface mirrors CouchDB's view API: key ranges with
//! inclusive/exclusive endpoints, descending order, skip/limit, stale
//! modes, `include_docs` and `update_seq`. Keys are opaque UTF-8 strings;
//! their byte order defines view ordering and structural encoding is left
//! to the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{i64_is_zero, Document};

/// A single mapper emission: an opaque key plus a JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEntry {
  pub key:   String,
  pub value: Value,
}

/// The `(key, doc_id)` pair identifying one mapper row fed to a reducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewReduceKey {
  pub key:    String,
  pub doc_id: String,
}

/// Query-time staleness policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stale {
  /// Refresh the view before answering.
  #[default]
  Fresh,
  /// Answer from the current state; perform no refresh.
  Ok,
  /// Answer from the current state, then refresh in the background.
  UpdateAfter,
}

impl Stale {
  /// Whether the query path skips the up-front refresh.
  pub fn skips_refresh(self) -> bool { !matches!(self, Stale::Fresh) }
}

/// View query parameters. All fields are optional; the defaults match
/// CouchDB (`reduce=true`, `inclusive_end=true`).
#[derive(Debug, Clone, Default)]
pub struct ViewQueryParam {
  /// Exact key match. Mutually exclusive with `keys`.
  pub key:              Option<String>,
  /// Match any of these keys; `keys[0]` must be non-empty.
  pub keys:             Vec<String>,
  pub start_key:        Option<String>,
  pub end_key:          Option<String>,
  pub start_key_doc_id: Option<String>,
  pub end_key_doc_id:   Option<String>,
  /// Maximum number of rows; 0 means unlimited.
  pub limit:            i64,
  /// Rows to skip before the first returned row.
  pub skip:             i64,
  pub stale:            Stale,
  /// Reverse the key order; swaps `start_key` and `end_key`.
  pub descending:       bool,
  /// Skip the reducer even when one is configured (CouchDB
  /// `reduce=false`).
  pub no_reduce:        bool,
  /// Attach the full document to each row.
  pub include_docs:     bool,
  /// Treat `end_key` as exclusive (CouchDB `inclusive_end=false`).
  pub exclusive_end:    bool,
  /// Report the sequence the view was answered at.
  pub update_seq:       bool,
}

/// The result of a view query; empty fields are omitted when serialised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewResult {
  #[serde(skip_serializing_if = "i64_is_zero", default)]
  pub total_rows: i64,
  #[serde(skip_serializing_if = "i64_is_zero", default)]
  pub offset:     i64,
  #[serde(skip_serializing_if = "i64_is_zero", default)]
  pub update_seq: i64,
  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub rows:       Vec<ViewResultRow>,
}

/// One row of a view query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewResultRow {
  #[serde(skip_serializing_if = "String::is_empty", default)]
  pub key:   String,
  #[serde(skip_serializing_if = "String::is_empty", default)]
  pub id:    String,
  #[serde(skip_serializing_if = "Value::is_null", default)]
  pub value: Value,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub doc:   Option<Document>,
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn empty_fields_are_omitted() {
    let result = ViewResult {
      total_rows: 2,
      offset:     0,
      update_seq: 0,
      rows:       vec![ViewResultRow {
        key:   String::new(),
        id:    String::new(),
        value: json!(3),
        doc:   None,
      }],
    };
    assert_eq!(
      serde_json::to_value(&result).unwrap(),
      json!({"total_rows": 2, "rows": [{"value": 3}]})
    );
  }

  #[test]
  fn empty_result_is_an_empty_object() {
    assert_eq!(
      serde_json::to_value(ViewResult::default()).unwrap(),
      json!({})
    );
  }

  #[test]
  fn stale_default_refreshes() {
    assert!(!Stale::default().skips_refresh());
    assert!(Stale::Ok.skips_refresh());
    assert!(Stale::UpdateAfter.skips_refresh());
  }
}
