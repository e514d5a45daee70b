//! Identifier validation.
//!
//! Table and view names are interpolated directly into generated SQL, so
//! the engine relies on this gate rather than on escaping.

use crate::{Error, Result};

/// Accept only non-empty strings of ASCII letters, digits and underscores.
pub fn check_name(s: &str) -> Result<()> {
  if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return Ok(());
  }
  Err(Error::other(format!("unsupported name: {s}")))
}

/// Accept an order expression of the form `column [asc|desc]`.
///
/// Order expressions are spliced into SQL text (a bound parameter would
/// order by a constant), so they pass through the same gate as names.
pub fn check_order_by(s: &str) -> Result<()> {
  let unsupported = || Error::other(format!("unsupported order expression: {s}"));

  let mut parts = s.split_whitespace();
  let column = parts.next().ok_or_else(unsupported)?;
  check_name(column).map_err(|_| unsupported())?;

  match parts.next() {
    None => Ok(()),
    Some(dir)
      if (dir.eq_ignore_ascii_case("asc") || dir.eq_ignore_ascii_case("desc"))
        && parts.next().is_none() =>
    {
      Ok(())
    }
    Some(_) => Err(unsupported()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_word_characters() {
    check_name("posts").unwrap();
    check_name("da_data_posts_2").unwrap();
    check_name("X").unwrap();
  }

  #[test]
  fn rejects_everything_else() {
    for bad in ["", "a-b", "a b", "a;drop", "tbl\"", "café"] {
      let err = check_name(bad).unwrap_err();
      assert!(err.to_string().starts_with("unsupported name"), "{bad}");
    }
  }

  #[test]
  fn order_expressions() {
    check_order_by("seq").unwrap();
    check_order_by("seq asc").unwrap();
    check_order_by("seq DESC").unwrap();
    for bad in ["", "seq; drop", "seq asc extra", "seq sideways"] {
      check_order_by(bad).unwrap_err();
    }
  }
}
