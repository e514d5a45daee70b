//! Hierarchical key/value persistence for small structural state.
//!
//! Each view stores its per-input progress under
//! `view/<name>/<input-table>/last_seq`; nothing here is hot-path data.

use rusqlite::OptionalExtension as _;
use serde::{de::DeserializeOwned, Serialize};
use tokio_rusqlite::Connection;

use davenport_core::{Error, Result};

use crate::{error::from_db, schema::METADATA_TABLE};

/// A handle to one slash-joined path inside the metadata table.
///
/// The root handle lives at the empty path; [`MetaStore::at`] derives
/// children by appending `/<sub>` without normalisation. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct MetaStore {
  conn: Connection,
  path: String,
}

impl MetaStore {
  pub(crate) fn new(conn: Connection) -> Self {
    Self { conn, path: String::new() }
  }

  /// A child handle at `base + "/" + sub`.
  pub fn at(&self, sub: &str) -> MetaStore {
    MetaStore {
      conn: self.conn.clone(),
      path: format!("{}/{}", self.path, sub),
    }
  }

  pub fn path(&self) -> &str { &self.path }

  /// Insert or overwrite the value at this path.
  pub async fn set<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    let path = self.path.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO {METADATA_TABLE} (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value"
          ),
          rusqlite::params![path, encoded],
        )?;
        Ok(())
      })
      .await
      .map_err(from_db)
  }

  /// Load and decode the value at this path; `NotFound` when absent.
  pub async fn get<T: DeserializeOwned>(&self) -> Result<T> {
    let path = self.path.clone();
    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT value FROM {METADATA_TABLE} WHERE key = $1"),
              rusqlite::params![path],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await
      .map_err(from_db)?;

    match raw {
      Some(raw) => Ok(serde_json::from_str(&raw)?),
      None => Err(Error::not_found(format!("metadata not found {}", self.path))),
    }
  }
}
