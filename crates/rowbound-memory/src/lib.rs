//! In-process driver for Rowbound.
//!
//! `rowbound-memory` keeps tables as ordered row vectors behind a
//! `parking_lot` mutex and executes structured [`Command`]s against them
//! directly. It implements both [`Database`] and [`SchemaProvider`], so a
//! single `Arc<MemoryDatabase>` can back a registered connection.
//!
//! Transactions snapshot every table on `begin` and restore the snapshot on
//! `rollback`. Call counters ([`MemoryStats`]) let callers verify when the
//! session runtime did or did not reach the database.
//!
//! [`Command`]: rowbound_core::Command
//! [`Database`]: rowbound_core::Database
//! [`SchemaProvider`]: rowbound_schema::SchemaProvider

pub mod connection;
mod raw;
mod table;

pub use connection::{MemoryDatabase, MemoryStats};
