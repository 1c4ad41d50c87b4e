//! Core types and traits for Rowbound.
//!
//! This crate provides the building blocks the session runtime works with:
//!
//! - `Entity` trait and its accessor table for struct ↔ row mapping
//! - `DirtySet` per-instance change tracking
//! - `Value` and `Row` for data exchange with drivers
//! - `Command` structured statements and `Database` connections
//! - `Error` and `Result`

pub mod command;
pub mod connection;
pub mod dirty;
pub mod entity;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod row;
pub mod types;
pub mod value;

pub use command::{Command, Dialect};
pub use connection::Database;
pub use dirty::DirtySet;
pub use entity::{Accessor, Entity};
pub use error::{
    ConfigError, ConfigErrorKind, Error, QueryError, QueryErrorKind, Result, SchemaError,
    SchemaErrorKind, TransactionError, TransactionErrorKind, TypeError,
};
pub use field::FieldInfo;
pub use identifiers::{is_valid_identifier, quote_ident, validate_identifier};
pub use row::{ColumnSet, Row};
pub use types::SqlType;
pub use value::Value;
