//! DDL for the SQL objects the engine creates lazily on first touch.
//!
//! Identifier parts are validated with `check_name` before they reach
//! these templates. JSON columns are declared TEXT: an unrecognised type
//! name gets NUMERIC affinity in SQLite, which would coerce JSON text such
//! as `"3"` into an integer. Sequence columns use AUTOINCREMENT so rowids
//! are never reused and stay strictly increasing.

/// Run once per connection: key/value metadata, one row per slash-joined
/// path.
pub const INIT_DDL: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS da_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT
);
";

pub const METADATA_TABLE: &str = "da_metadata";

/// The versioned append log behind one document table. Rows are never
/// physically deleted; a delete appends a tombstone.
pub fn data_table_ddl(table: &str) -> String {
  format!(
    "CREATE TABLE IF NOT EXISTS {table} (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    id        TEXT,
    version   INTEGER,
    uuid      TEXT,
    data      TEXT,
    metadata  TEXT,
    modified  TEXT,
    latest    BOOL,
    deleted   BOOL
)"
  )
}

/// One row per input document currently contributing to a view. `doc_id`
/// is unique so remapping an input replaces its prior emission.
pub fn map_table_ddl(table: &str) -> String {
  format!(
    "CREATE TABLE IF NOT EXISTS {table} (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    key       TEXT,
    value     TEXT,
    doc_id    TEXT UNIQUE,
    doc_seq   INTEGER,
    deleted   BOOL DEFAULT FALSE
)"
  )
}

/// Memoised reducer results keyed by (parameter fingerprint, mapper seq).
pub fn reduce_table_ddl(table: &str) -> String {
  format!(
    "CREATE TABLE IF NOT EXISTS {table} (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    param      TEXT,
    value      TEXT,
    map_seq    INTEGER,
    total_rows INTEGER,
    UNIQUE(param, map_seq)
)"
  )
}
