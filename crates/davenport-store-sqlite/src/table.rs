//! Document tables — per-table versioned append logs with
//! optimistic-concurrency writes.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use serde::Serialize;
use serde_json::Value;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use davenport_core::{name::check_order_by, Document, Error, Result};

use crate::{
  error::{from_db, into_db},
  query_builder::QueryBuilder,
};

/// A handle to one document table. Cloning is cheap; clones share the
/// database connection.
#[derive(Clone, Debug)]
pub struct Table {
  conn:       Connection,
  name:       String,
  data_table: String,
}

/// Optional filters for [`Table::read_multi`].
#[derive(Debug, Clone, Default)]
pub struct TableReadParams {
  /// Equality on document id.
  pub id:              Option<String>,
  /// Lowest sequence number to return, inclusive; 0 means unbounded.
  pub min_seq:         i64,
  /// Report tombstones too.
  pub include_deleted: bool,
  /// Only the `latest` row per id.
  pub latest:          bool,
  /// Order expression such as `"seq asc"`; validated, then spliced into
  /// the statement text.
  pub order_by:        Option<String>,
  /// 0 means no offset / no limit.
  pub offset:          i64,
  pub limit:           i64,
}

impl Table {
  pub(crate) fn new(conn: Connection, name: &str, data_table: String) -> Self {
    Self { conn, name: name.to_owned(), data_table }
  }

  pub fn name(&self) -> &str { &self.name }

  /// Write a new version of `id`.
  ///
  /// `exist_version` must match the current latest version (0 when the
  /// document does not exist yet) or the write fails with a `Conflict`;
  /// callers are expected to reload and retry.
  pub async fn put<T: Serialize + ?Sized>(
    &self,
    id: &str,
    exist_version: i64,
    data: &T,
  ) -> Result<()> {
    let encoded = serde_json::to_string(data)?;
    self.insert_internal(id, exist_version, Some(encoded), false).await
  }

  /// Append a tombstone for `id`. Version rules are the same as for
  /// [`Table::put`].
  pub async fn delete(&self, id: &str, version: i64) -> Result<()> {
    self.insert_internal(id, version, None, true).await
  }

  /// The current latest, non-deleted revision of `id`.
  pub async fn get(&self, id: &str) -> Result<Document> {
    let mut found: Vec<Document> = Vec::new();
    self
      .read_multi(
        TableReadParams {
          id: Some(id.to_owned()),
          latest: true,
          ..Default::default()
        },
        |doc| {
          found.push(doc.clone());
          Ok(())
        },
      )
      .await?;

    match found.len() {
      0 => Err(Error::not_found(format!("record not found: {id}"))),
      1 => Ok(found.remove(0)),
      _ => Err(Error::other("data inconsistent")),
    }
  }

  /// Stream documents matching `params`, in order, through `action`.
  ///
  /// Rows are fully buffered and the statement finalised before `action`
  /// runs, so the callback may issue further queries through the same
  /// connection.
  pub async fn read_multi(
    &self,
    params: TableReadParams,
    mut action: impl FnMut(&Document) -> Result<()>,
  ) -> Result<()> {
    let mut qb = QueryBuilder::new();
    qb.add(
      &format!(
        "SELECT seq, id, version, data, modified, deleted FROM {} WHERE TRUE",
        self.data_table
      ),
      vec![],
    );
    if !params.include_deleted {
      qb.add(" AND deleted = FALSE", vec![]);
    }
    qb.add_if_not_zero(" AND id = $1", params.id.clone());
    qb.add_if_not_zero(" AND seq >= $1", params.min_seq);
    qb.add_if_not_zero(" AND latest = $1", params.latest);
    if let Some(order_by) = params.order_by.as_deref().filter(|s| !s.is_empty()) {
      check_order_by(order_by)?;
      qb.add(&format!(" ORDER BY {order_by}"), vec![]);
    }
    // SQLite only accepts OFFSET after a LIMIT.
    if !qb.add_if_not_zero(" LIMIT $1", params.limit) && params.offset != 0 {
      qb.add(" LIMIT -1", vec![]);
    }
    qb.add_if_not_zero(" OFFSET $1", params.offset);

    let docs = qb.query(&self.conn, decode_row).await?;
    for doc in &docs {
      action(doc)?;
    }
    Ok(())
  }

  /// The shared write path behind `put` and `delete`: version check,
  /// `latest` hand-over and insert run in one transaction.
  async fn insert_internal(
    &self,
    id: &str,
    exist_version: i64,
    data: Option<String>,
    deleted: bool,
  ) -> Result<()> {
    let data_table = self.data_table.clone();
    let id = id.to_owned();
    let write_uuid = Uuid::new_v4().hyphenated().to_string();
    let modified = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let pre_version: i64 = tx
          .query_row(
            &format!("SELECT version FROM {data_table} WHERE id = $1 AND latest = TRUE"),
            rusqlite::params![id],
            |row| row.get(0),
          )
          .optional()?
          .unwrap_or(0);

        if exist_version != pre_version {
          return Err(into_db(Error::conflict(format!(
            "version mismatched: {exist_version} vs {pre_version}"
          ))));
        }

        tx.execute(
          &format!("UPDATE {data_table} SET latest = FALSE WHERE id = $1 AND latest = TRUE"),
          rusqlite::params![id],
        )?;
        tx.execute(
          &format!(
            "INSERT INTO {data_table} (id, version, uuid, data, modified, latest, deleted)
             VALUES ($1, $2, $3, $4, $5, TRUE, $6)"
          ),
          rusqlite::params![id, exist_version + 1, write_uuid, data, modified, deleted],
        )?;

        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(from_db)
  }
}

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
  let data: Option<String> = row.get(3)?;
  let modified: String = row.get(4)?;
  Ok(Document {
    seq:      row.get(0)?,
    id:       row.get(1)?,
    version:  row.get(2)?,
    data:     match data {
      Some(raw) => serde_json::from_str(&raw).map_err(|err| decode_failure(3, err))?,
      None => Value::Null,
    },
    modified: decode_dt(&modified).map_err(|err| decode_failure(4, err))?,
    deleted:  row.get(5)?,
  })
}

pub(crate) fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

fn decode_dt(s: &str) -> chrono::ParseResult<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn decode_failure(
  column: usize,
  err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
  rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}
