//! SQLite-backed storage engine for the Davenport document store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. One [`Database`] handle owns
//! the connection; [`Table`]s and [`View`]s are cheap clones sharing it.

mod error;
mod query_builder;
mod schema;

pub mod database;
pub mod metadata;
pub mod table;
pub mod view;

pub use database::Database;
pub use metadata::MetaStore;
pub use query_builder::QueryBuilder;
pub use table::{Table, TableReadParams};
pub use view::{Mapper, Reducer, View, ViewConfig};

pub use davenport_core::{Document, Error, ErrorKind, Result};
