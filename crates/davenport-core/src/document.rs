//! Document — a versioned JSON payload addressed by a string id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// One revision of a document.
///
/// `version` counts per id starting at 1 and increments on every write,
/// deletes included. `seq` is the table-wide write counter assigned by the
/// backend. A tombstone carries `deleted = true` and `Value::Null` data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  #[serde(skip_serializing_if = "String::is_empty", default)]
  pub id:       String,
  #[serde(skip_serializing_if = "i64_is_zero", default)]
  pub version:  i64,
  #[serde(skip_serializing_if = "i64_is_zero", default)]
  pub seq:      i64,
  pub modified: DateTime<Utc>,
  #[serde(skip_serializing_if = "bool_is_false", default)]
  pub deleted:  bool,
  #[serde(skip_serializing_if = "Value::is_null", default)]
  pub data:     Value,
}

impl Document {
  /// Decode the JSON payload into a concrete type.
  pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
    Ok(serde_json::from_value(self.data.clone())?)
  }
}

pub(crate) fn i64_is_zero(n: &i64) -> bool { *n == 0 }

pub(crate) fn bool_is_false(b: &bool) -> bool { !*b }

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  #[test]
  fn tombstone_serialises_without_data() {
    let doc = Document {
      id:       "p:1".into(),
      version:  3,
      seq:      7,
      modified: Utc.timestamp_opt(0, 0).unwrap(),
      deleted:  true,
      data:     Value::Null,
    };
    let encoded = serde_json::to_value(&doc).unwrap();
    assert_eq!(
      encoded,
      json!({
        "id": "p:1",
        "version": 3,
        "seq": 7,
        "modified": "1970-01-01T00:00:00Z",
        "deleted": true,
      })
    );
  }

  #[test]
  fn data_as_decodes_payload() {
    let doc = Document {
      id:       "p:1".into(),
      version:  1,
      seq:      1,
      modified: Utc.timestamp_opt(0, 0).unwrap(),
      deleted:  false,
      data:     json!({"title": "hello world"}),
    };

    #[derive(Deserialize)]
    struct Payload {
      title: String,
    }
    let payload: Payload = doc.data_as().unwrap();
    assert_eq!(payload.title, "hello world");
  }
}
