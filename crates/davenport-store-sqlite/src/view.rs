//! The incremental map/reduce view engine.
//!
//! A view materialises a user map function (and optionally a reduce
//! function) over one document table. Refresh is change-driven: it
//! consumes the input's change feed past the view's persisted `last_seq`
//! marker, remaps each changed document, and (for reduced views)
//! recomputes a memoised reducer row for the querying parameters.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::warn;

use davenport_core::{
  name::check_name,
  view::{Stale, ViewEntry, ViewQueryParam, ViewReduceKey, ViewResult, ViewResultRow},
  Document, Error, Result,
};

use crate::{
  error::from_db,
  metadata::MetaStore,
  query_builder::QueryBuilder,
  schema,
  table::{Table, TableReadParams},
};

/// How long a background refresh spawned by [`Stale::UpdateAfter`] may
/// run.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// User map function: called once per changed document, emitting zero or
/// more entries through the supplied callback.
pub type Mapper =
  Arc<dyn Fn(&Document, &mut dyn FnMut(ViewEntry)) -> Result<()> + Send + Sync>;

/// User reduce function. With `rereduce = false` the values are mapper
/// outputs for the paired keys; with `rereduce = true` they are prior
/// reducer outputs and the key slice is empty.
pub type Reducer =
  Arc<dyn Fn(&[ViewReduceKey], &[Value], bool) -> Result<Value> + Send + Sync>;

/// Configuration for [`crate::Database::view`].
#[derive(Clone)]
pub struct ViewConfig {
  pub name:    String,
  /// Participates in the backing table names; bump it to rebuild the view
  /// from scratch.
  pub version: String,
  /// The single input table the view materialises.
  pub input:   Table,
  pub mapper:  Mapper,
  pub reducer: Option<Reducer>,
}

impl std::fmt::Debug for ViewConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ViewConfig")
      .field("name", &self.name)
      .field("version", &self.version)
      .field("input", &self.input)
      .field("mapper", &"<fn>")
      .field("reducer", &self.reducer.as_ref().map(|_| "<fn>"))
      .finish()
  }
}

impl ViewConfig {
  /// A map-only view configuration.
  pub fn new<F>(
    name: impl Into<String>,
    version: impl Into<String>,
    input: &Table,
    mapper: F,
  ) -> Self
  where
    F: Fn(&Document, &mut dyn FnMut(ViewEntry)) -> Result<()> + Send + Sync + 'static,
  {
    Self {
      name:    name.into(),
      version: version.into(),
      input:   input.clone(),
      mapper:  Arc::new(mapper),
      reducer: None,
    }
  }

  /// Attach a reduce function.
  pub fn with_reducer<F>(mut self, reducer: F) -> Self
  where
    F: Fn(&[ViewReduceKey], &[Value], bool) -> Result<Value> + Send + Sync + 'static,
  {
    self.reducer = Some(Arc::new(reducer));
    self
  }
}

/// A named, versioned map/reduce materialisation over one document table.
///
/// Cloning is cheap; clones share all state, including the refresh lock
/// that admits a single in-flight refresh per view.
#[derive(Clone, Debug)]
pub struct View {
  inner: Arc<ViewInner>,
}

#[derive(Debug)]
struct ViewInner {
  conn:         Connection,
  config:       ViewConfig,
  map_table:    String,
  reduce_table: Option<String>,
  meta:         MetaStore,
  refresh_lock: Mutex<()>,
}

/// A memoised reducer row.
struct ReduceRow {
  value:      Value,
  total_rows: i64,
}

impl View {
  pub(crate) async fn create(
    conn: Connection,
    meta: MetaStore,
    config: ViewConfig,
  ) -> Result<Self> {
    if config.name.is_empty() {
      return Err(Error::other("empty view name"));
    }
    let map_table = format!("da_view_map_{}_{}", config.name, config.version);
    check_name(&map_table)?;
    let reduce_table = config
      .reducer
      .is_some()
      .then(|| format!("da_view_reduce_{}_{}", config.name, config.version));

    let map_ddl = schema::map_table_ddl(&map_table);
    let reduce_ddl = reduce_table.as_deref().map(schema::reduce_table_ddl);
    conn
      .call(move |conn| {
        conn.execute_batch(&map_ddl)?;
        if let Some(ddl) = reduce_ddl {
          conn.execute_batch(&ddl)?;
        }
        Ok(())
      })
      .await
      .map_err(from_db)?;

    let meta = meta.at("view").at(&config.name);
    Ok(Self {
      inner: Arc::new(ViewInner {
        conn,
        config,
        map_table,
        reduce_table,
        meta,
        refresh_lock: Mutex::new(()),
      }),
    })
  }

  pub fn name(&self) -> &str { &self.inner.config.name }

  /// Bring the view up to the input table's current tail, returning the
  /// sequence the view is now current to.
  ///
  /// Concurrent refreshes coalesce: one caller consumes the change
  /// window, late arrivals re-read the marker under the lock and find
  /// nothing left to do.
  pub async fn refresh(&self, params: &ViewQueryParam) -> Result<i64> {
    let _in_flight = self.inner.refresh_lock.lock().await;

    let seq_store = self.seq_store();
    let last_seq = match seq_store.get::<i64>().await {
      Ok(seq) => seq,
      Err(err) if err.is_not_found() => 0,
      Err(err) => return Err(err),
    };

    let mut changes = Vec::new();
    self
      .inner
      .config
      .input
      .read_multi(
        TableReadParams {
          min_seq: last_seq + 1,
          latest: true,
          include_deleted: true,
          order_by: Some("seq asc".to_owned()),
          ..Default::default()
        },
        |doc| {
          changes.push(doc.clone());
          Ok(())
        },
      )
      .await?;

    let mut seq = last_seq;
    for doc in &changes {
      self.apply_change(doc).await?;
      seq = doc.seq;
    }

    // Only rewrite the marker when the window was non-empty.
    if seq != last_seq {
      seq_store.set(&seq).await?;
    }

    if self.inner.config.reducer.is_some() && !params.no_reduce {
      self.refresh_reduce(params, seq).await?;
    }

    Ok(seq)
  }

  /// Answer a query, refreshing first unless a stale mode is requested.
  pub async fn query(&self, params: &ViewQueryParam) -> Result<ViewResult> {
    let mut current_seq = None;
    if !params.stale.skips_refresh() {
      current_seq = Some(self.refresh(params).await?);
    }
    let last_seq = match current_seq {
      Some(seq) => seq,
      None => self.load_last_seq().await?,
    };

    if params.no_reduce || self.inner.config.reducer.is_none() {
      let mut result = self.query_map(params).await?;
      if params.include_docs {
        for row in &mut result.rows {
          let doc = self.inner.config.input.get(&row.id).await?;
          row.doc = Some(doc);
        }
      }
      if params.update_seq {
        result.update_seq = last_seq;
      }
      if params.stale == Stale::UpdateAfter {
        self.spawn_refresh(params.clone());
      }
      return Ok(result);
    }

    let hash = param_hash(params);
    let memo = match self.load_reduce_row(&hash, last_seq).await? {
      Some(memo) => memo,
      None => {
        // First reduced query for these parameters at this sequence (a
        // stale query can land here): materialise the memo from the
        // current mapper rows without touching the input table.
        self.refresh_reduce(params, last_seq).await?;
        self
          .load_reduce_row(&hash, last_seq)
          .await?
          .ok_or_else(|| Error::other("reduce row missing after refresh"))?
      }
    };

    let mut result = ViewResult {
      total_rows: memo.total_rows,
      rows: vec![ViewResultRow {
        key: params.key.clone().unwrap_or_default(),
        id: String::new(),
        value: memo.value,
        doc: None,
      }],
      ..Default::default()
    };
    if params.update_seq {
      result.update_seq = last_seq;
    }
    if params.stale == Stale::UpdateAfter {
      self.spawn_refresh(params.clone());
    }
    Ok(result)
  }

  /// Map-only shortcut: refresh, then stream the values recorded under
  /// exactly `key` through `each`.
  pub async fn read(
    &self,
    key: &str,
    mut each: impl FnMut(&ViewEntry) -> Result<()>,
  ) -> Result<()> {
    let params = ViewQueryParam { no_reduce: true, ..Default::default() };
    self.refresh(&params).await?;

    let mut qb = QueryBuilder::new();
    qb.add(
      &format!(
        "SELECT key, value FROM {} WHERE deleted != TRUE",
        self.inner.map_table
      ),
      vec![],
    );
    qb.add(" AND key = $1", vec![key.to_owned().into()]);

    let entries = qb
      .query(&self.inner.conn, |row| {
        let key: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let value = decode_json(1, &raw)?;
        Ok(ViewEntry { key, value })
      })
      .await?;

    for entry in &entries {
      each(entry)?;
    }
    Ok(())
  }

  /// Apply one changed document: soft-delete its prior mapper rows, then
  /// upsert the fresh emissions, in a single transaction.
  async fn apply_change(&self, doc: &Document) -> Result<()> {
    let entries = if doc.deleted {
      Vec::new()
    } else {
      let mut entries = Vec::new();
      (self.inner.config.mapper)(doc, &mut |entry| entries.push(entry))
        .map_err(|err| Error::other(format!("mapper error: {err}")))?;
      entries
    };

    let encoded: Vec<(String, String)> = entries
      .iter()
      .map(|entry| Ok((entry.key.clone(), serde_json::to_string(&entry.value)?)))
      .collect::<Result<_>>()?;

    let map_table = self.inner.map_table.clone();
    let doc_id = doc.id.clone();
    let doc_seq = doc.seq;
    self
      .inner
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          &format!("UPDATE {map_table} SET deleted = TRUE WHERE doc_id = $1"),
          rusqlite::params![doc_id],
        )?;
        for (key, value) in &encoded {
          tx.execute(
            &format!(
              "INSERT INTO {map_table} (key, value, doc_id, doc_seq) VALUES ($1, $2, $3, $4)
               ON CONFLICT (doc_id) DO UPDATE SET
               key = excluded.key,
               value = excluded.value,
               doc_seq = excluded.doc_seq,
               deleted = FALSE"
            ),
            rusqlite::params![key, value, doc_id, doc_seq],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(|err| {
        let cause = from_db(err);
        let message = format!("emit error: {cause}");
        Error::other(message).with_source(cause)
      })
  }

  /// Recompute and memoise the reduced value for `params` at `map_seq`.
  async fn refresh_reduce(&self, params: &ViewQueryParam, map_seq: i64) -> Result<()> {
    let (Some(reducer), Some(reduce_table)) = (
      self.inner.config.reducer.clone(),
      self.inner.reduce_table.clone(),
    ) else {
      return Ok(());
    };

    let mapped = self.query_map(params).await?;

    // Contiguous rows sharing a key form one bucket.
    let mut bucket_results = Vec::new();
    let mut start = 0;
    while start < mapped.rows.len() {
      let mut end = start + 1;
      while end < mapped.rows.len() && mapped.rows[end].key == mapped.rows[start].key {
        end += 1;
      }
      let bucket = &mapped.rows[start..end];
      let keys: Vec<ViewReduceKey> = bucket
        .iter()
        .map(|row| ViewReduceKey { key: row.key.clone(), doc_id: row.id.clone() })
        .collect();
      let values: Vec<Value> = bucket.iter().map(|row| row.value.clone()).collect();
      bucket_results.push(
        reducer(&keys, &values, false)
          .map_err(|err| Error::other(format!("reducer error: {err}")))?,
      );
      start = end;
    }
    let value = reducer(&[], &bucket_results, true)
      .map_err(|err| Error::other(format!("reducer error: {err}")))?;

    let encoded = serde_json::to_string(&value)?;
    let hash = param_hash(params);
    let total_rows = mapped.total_rows;
    self
      .inner
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO {reduce_table} (param, value, map_seq, total_rows)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (param, map_seq) DO UPDATE SET
             value = excluded.value,
             total_rows = excluded.total_rows"
          ),
          rusqlite::params![hash, encoded, map_seq, total_rows],
        )?;
        Ok(())
      })
      .await
      .map_err(from_db)
  }

  /// Plan and run the SELECT over the mapper table for `params`.
  async fn query_map(&self, params: &ViewQueryParam) -> Result<ViewResult> {
    let mut start_key = params.start_key.clone();
    let mut end_key = params.end_key.clone();
    let order_by = if params.descending {
      std::mem::swap(&mut start_key, &mut end_key);
      "key DESC, doc_id DESC"
    } else {
      "key ASC, doc_id ASC"
    };

    if params.key.as_deref().is_some_and(|k| !k.is_empty()) && !params.keys.is_empty() {
      return Err(Error::other(format!(
        "cannot supply both key and keys parameter key: {} keys: {:?}",
        params.key.as_deref().unwrap_or(""),
        params.keys,
      )));
    }

    let mut qb = QueryBuilder::new();
    qb.add(
      &format!(
        "SELECT key, doc_id, value FROM {} WHERE deleted != TRUE",
        self.inner.map_table
      ),
      vec![],
    );
    qb.add_if_not_zero(" AND key = $1", params.key.clone());
    if !params.keys.is_empty() {
      if params.keys[0].is_empty() {
        return Err(Error::other("parameter keys[0] cannot be empty string"));
      }
      qb.add(" AND (key = $1", vec![params.keys[0].clone().into()]);
      for key in &params.keys[1..] {
        qb.add_if_not_zero(" OR key = $1", key.clone());
      }
      qb.add(")", vec![]);
    }
    qb.add_if_not_zero(" AND key >= $1", start_key);
    let eq = if params.exclusive_end { "" } else { "=" };
    qb.add_if_not_zero(&format!(" AND key <{eq} $1"), end_key);
    qb.add_if_not_zero(" AND doc_id >= $1", params.start_key_doc_id.clone());
    qb.add_if_not_zero(" AND doc_id <= $1", params.end_key_doc_id.clone());
    qb.add(&format!(" ORDER BY {order_by}"), vec![]);
    // SQLite only accepts OFFSET after a LIMIT.
    if !qb.add_if_not_zero(" LIMIT $1", params.limit) && params.skip != 0 {
      qb.add(" LIMIT -1", vec![]);
    }
    qb.add_if_not_zero(" OFFSET $1", params.skip);

    let rows = qb
      .query(&self.inner.conn, |row| {
        let key: String = row.get(0)?;
        let id: String = row.get(1)?;
        let raw: String = row.get(2)?;
        let value = decode_json(2, &raw)?;
        Ok(ViewResultRow { key, id, value, doc: None })
      })
      .await?;

    let map_table = self.inner.map_table.clone();
    let total_rows: i64 = self
      .inner
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!("SELECT count(*) FROM {map_table} WHERE deleted != TRUE"),
          [],
          |row| row.get(0),
        )?)
      })
      .await
      .map_err(from_db)?;

    Ok(ViewResult {
      total_rows,
      offset: params.skip,
      update_seq: 0,
      rows,
    })
  }

  async fn load_last_seq(&self) -> Result<i64> {
    match self.seq_store().get::<i64>().await {
      Ok(seq) => Ok(seq),
      Err(err) if err.is_not_found() => Ok(0),
      Err(err) => Err(err),
    }
  }

  async fn load_reduce_row(&self, hash: &str, map_seq: i64) -> Result<Option<ReduceRow>> {
    let Some(reduce_table) = self.inner.reduce_table.clone() else {
      return Ok(None);
    };
    let hash = hash.to_owned();
    let row: Option<(String, i64)> = self
      .inner
      .conn
      .call(move |conn| {
        use rusqlite::OptionalExtension as _;
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT value, total_rows FROM {reduce_table} WHERE param = $1 AND map_seq = $2"
              ),
              rusqlite::params![hash, map_seq],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        )
      })
      .await
      .map_err(from_db)?;

    match row {
      Some((raw, total_rows)) => Ok(Some(ReduceRow {
        value: serde_json::from_str(&raw)?,
        total_rows,
      })),
      None => Ok(None),
    }
  }

  /// Run a refresh on the runtime with a bounded timeout, logging
  /// failures instead of surfacing them.
  fn spawn_refresh(&self, params: ViewQueryParam) {
    let view = self.clone();
    tokio::spawn(async move {
      match tokio::time::timeout(REFRESH_TIMEOUT, view.refresh(&params)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
          warn!(view = view.name(), error = %err, "background refresh failed");
        }
        Err(_) => warn!(view = view.name(), "background refresh timed out"),
      }
    });
  }

  fn seq_store(&self) -> MetaStore {
    self.inner.meta.at(self.inner.config.input.name()).at("last_seq")
  }
}

/// Deterministic fingerprint of the parameters that affect a reduced
/// value. `stale`, `include_docs`, `update_seq` and `no_reduce` are
/// excluded: they never change what the reducer computes.
fn param_hash(params: &ViewQueryParam) -> String {
  let canonical = serde_json::json!([
    params.key,
    params.keys,
    params.start_key,
    params.end_key,
    params.start_key_doc_id,
    params.end_key_doc_id,
    params.limit,
    params.skip,
    params.descending,
    params.exclusive_end,
  ]);
  let mut hasher = Sha256::new();
  hasher.update(canonical.to_string().as_bytes());
  hex::encode(hasher.finalize())
}

fn decode_json(column: usize, raw: &str) -> rusqlite::Result<Value> {
  serde_json::from_str(raw).map_err(|err| {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn param_hash_ignores_presentation_fields() {
    let base = ViewQueryParam { key: Some("a".into()), ..Default::default() };
    let mut presentation = base.clone();
    presentation.stale = Stale::Ok;
    presentation.include_docs = true;
    presentation.update_seq = true;
    assert_eq!(param_hash(&base), param_hash(&presentation));
  }

  #[test]
  fn param_hash_tracks_selection_fields() {
    let base = ViewQueryParam::default();
    let mut ranged = base.clone();
    ranged.start_key = Some("m".into());
    assert_ne!(param_hash(&base), param_hash(&ranged));

    let mut limited = base.clone();
    limited.limit = 10;
    assert_ne!(param_hash(&base), param_hash(&limited));
  }
}
