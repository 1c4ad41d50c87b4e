//! Schema reconciliation for Rowbound.
//!
//! This crate provides:
//! - Live table descriptions reported by a [`SchemaProvider`]
//! - Expected table definitions extracted from entity metadata
//! - A diff engine producing [`SchemaOperation`]s under a destructive policy
//! - DDL generation for those operations
//! - [`reconcile`], the pass a session runs once on first use

pub mod ddl;
pub mod diff;
pub mod expected;
pub mod introspect;
pub mod migrate;
pub mod provider;

pub use diff::{
    DestructivePolicy, DiffWarning, SchemaDiff, SchemaOperation, WarningSeverity, diff_table,
};
pub use expected::{EntitySchema, table_schema_from_fields};
pub use introspect::{ColumnInfo, IndexInfo, TableInfo};
pub use migrate::{MigrationMode, ReconcileOptions, ReconcileReport, reconcile};
pub use provider::SchemaProvider;
