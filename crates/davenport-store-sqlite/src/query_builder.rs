//! A builder for SQL with conditional, composable fragments.
//!
//! Fragments carry 1-based `$N` placeholders local to themselves; on
//! append the builder renumbers them past the arguments accumulated so
//! far, so independent fragments compose without coordinating indexes.
//! SQLite accepts `$N` parameters natively, and because renumbered
//! placeholders appear in strictly increasing order, positional binding
//! lines up with the accumulated argument list.

use rusqlite::types::Value;
use tokio_rusqlite::Connection;

use davenport_core::Result;

use crate::error::from_db;

#[derive(Debug, Default)]
pub struct QueryBuilder {
  sql:  String,
  args: Vec<Value>,
}

impl QueryBuilder {
  pub fn new() -> Self { Self::default() }

  /// Append a fragment with its arguments.
  ///
  /// The largest `$N` in the fragment must equal `args.len()`; anything
  /// else is a programming error and panics.
  pub fn add(&mut self, fragment: &str, args: Vec<Value>) {
    let mut largest = 0;
    let rewritten = rewrite_placeholders(fragment, self.args.len(), &mut largest);
    assert!(
      largest == args.len(),
      "fragment {fragment:?} names {largest} placeholder(s) but {} argument(s) were supplied",
      args.len(),
    );
    self.sql.push_str(&rewritten);
    self.args.extend(args);
  }

  /// Append a one-placeholder fragment unless `arg` is a zero value.
  ///
  /// Zero values: SQL NULL (which `None` and JSON null convert to), the
  /// empty string, integer 0 (which `false` converts to), real 0.0, and
  /// an empty blob. Returns whether the fragment was appended.
  pub fn add_if_not_zero(&mut self, fragment: &str, arg: impl Into<Value>) -> bool {
    let arg = arg.into();
    if is_zero(&arg) {
      return false;
    }
    self.add(fragment, vec![arg]);
    true
  }

  /// Run the accumulated SELECT, draining every row through `map` before
  /// returning, so callers are free to run user callbacks (which may
  /// issue further queries) over the buffered rows afterwards.
  pub async fn query<T, F>(self, conn: &Connection, map: F) -> Result<Vec<T>>
  where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let Self { sql, args } = self;
    conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(args), map)?
          .collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(rows)
      })
      .await
      .map_err(from_db)
  }

  /// Execute the accumulated statement, returning the affected row count.
  pub async fn exec(self, conn: &Connection) -> Result<usize> {
    let Self { sql, args } = self;
    conn
      .call(move |conn| Ok(conn.execute(&sql, rusqlite::params_from_iter(args))?))
      .await
      .map_err(from_db)
  }

  pub fn sql(&self) -> &str { &self.sql }

  pub fn args(&self) -> &[Value] { &self.args }
}

/// Rewrite every `$N` to `$(N + offset)`, recording the largest `N` seen.
fn rewrite_placeholders(fragment: &str, offset: usize, largest: &mut usize) -> String {
  let mut out = String::with_capacity(fragment.len() + 4);
  let mut rest = fragment;
  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];
    let digits = after.len() - after.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
      out.push('$');
      rest = after;
      continue;
    }
    let n: usize = after[..digits].parse().expect("placeholder index fits in usize");
    if n > *largest {
      *largest = n;
    }
    out.push('$');
    out.push_str(&(n + offset).to_string());
    rest = &after[digits..];
  }
  out.push_str(rest);
  out
}

fn is_zero(v: &Value) -> bool {
  match v {
    Value::Null => true,
    Value::Integer(n) => *n == 0,
    Value::Real(f) => *f == 0.0,
    Value::Text(s) => s.is_empty(),
    Value::Blob(b) => b.is_empty(),
  }
}
