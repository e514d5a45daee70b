//! The database handle — lifetime root that vends tables and views.

use std::path::Path;

use tokio_rusqlite::Connection;
use tracing::debug;

use davenport_core::{name::check_name, Result};

use crate::{
  error::from_db,
  metadata::MetaStore,
  schema,
  table::Table,
  view::{View, ViewConfig},
};

/// A Davenport database over one SQLite file (or an in-memory database).
///
/// Cloning is cheap — the inner connection is reference-counted and all
/// clones, along with every table and view vended from them, share it.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
  meta: MetaStore,
}

impl Database {
  /// Open (or create) a database at `path`.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_owned();
    let conn = Connection::open(path).await.map_err(from_db)?;
    Self::init(conn).await
  }

  /// Open an in-memory database — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().await.map_err(from_db)?;
    Self::init(conn).await
  }

  async fn init(conn: Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(schema::INIT_DDL)?;
        Ok(())
      })
      .await
      .map_err(from_db)?;
    debug!("opened database");
    Ok(Self { meta: MetaStore::new(conn.clone()), conn })
  }

  /// The metadata store rooted at the empty path.
  pub fn metadata(&self) -> &MetaStore { &self.meta }

  /// A handle to the document table `name`, creating its backing relation
  /// on first touch.
  pub async fn table(&self, name: &str) -> Result<Table> {
    check_name(name)?;
    let data_table = format!("da_data_{name}");
    let ddl = schema::data_table_ddl(&data_table);
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await
      .map_err(from_db)?;
    debug!(table = name, "opened document table");
    Ok(Table::new(self.conn.clone(), name, data_table))
  }

  /// Create a view. `config.version` participates in the backing table
  /// names, so bumping it starts a fresh materialisation.
  pub async fn view(&self, config: ViewConfig) -> Result<View> {
    View::create(self.conn.clone(), self.meta.clone(), config).await
  }
}
