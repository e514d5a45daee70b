//! Core types for the Davenport document store.
//!
//! This crate is deliberately free of database dependencies. The storage
//! engine (`davenport-store-sqlite`) depends on it; it depends on nothing
//! heavier than serde.

pub mod document;
pub mod error;
pub mod name;
pub mod view;

pub use document::Document;
pub use error::{Error, ErrorKind, Result};
