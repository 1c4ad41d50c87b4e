//! Reconciling a live table with its expected definition.

use rowbound_core::Result;
use serde::{Deserialize, Serialize};

use crate::diff::{DestructivePolicy, SchemaOperation, diff_table};
use crate::introspect::TableInfo;
use crate::provider::SchemaProvider;

/// How far the runtime may go when a live table differs from its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Never inspect the schema.
    Off,
    /// Inspect and report differences, change nothing.
    ReadOnly,
    /// Apply additive and corrective operations.
    #[default]
    On,
    /// Additionally apply destructive operations (drops, type changes).
    Full,
}

impl MigrationMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Some(MigrationMode::Off),
            "readonly" | "read_only" | "read-only" => Some(MigrationMode::ReadOnly),
            "on" => Some(MigrationMode::On),
            "full" => Some(MigrationMode::Full),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MigrationMode::Off => "off",
            MigrationMode::ReadOnly => "read_only",
            MigrationMode::On => "on",
            MigrationMode::Full => "full",
        }
    }
}

/// Knobs for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub mode: MigrationMode,
    /// Whether destructive operations may run at all. Only the entity's
    /// default (connection, table) pairing should set this.
    pub allow_destructive: bool,
    /// Leave index creation and removal out.
    pub ignore_indexes: bool,
}

/// What a reconciliation pass did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// The table did not exist and was created.
    pub created: bool,
    /// Operations applied to the database.
    pub applied: Vec<SchemaOperation>,
    /// Operations found but not applied (read-only mode).
    pub pending: Vec<SchemaOperation>,
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.pending.is_empty()
    }
}

/// Bring the live table in line with `expected` as far as `options` allow.
#[tracing::instrument(level = "debug", skip(provider, expected), fields(table = %expected.name, mode = options.mode.as_str()))]
pub fn reconcile(
    provider: &dyn SchemaProvider,
    expected: &TableInfo,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    if options.mode == MigrationMode::Off {
        return Ok(report);
    }

    let current = provider.get_table(&expected.name)?;
    let policy = if options.mode == MigrationMode::Full && options.allow_destructive {
        DestructivePolicy::Allow
    } else {
        DestructivePolicy::Skip
    };

    let mut diff = if options.ignore_indexes {
        let mut expected = expected.clone();
        expected.indexes.clear();
        let mut diff = diff_table(current.as_ref(), &expected, policy);
        let skipped = diff.drop_index_operations();
        if !skipped.is_empty() {
            tracing::debug!(count = skipped.len(), "index operations ignored");
        }
        diff
    } else {
        diff_table(current.as_ref(), expected, policy)
    };

    for warning in &diff.warnings {
        tracing::warn!(table = %expected.name, "{}", warning.message);
    }
    report.warnings = diff.warnings.drain(..).map(|w| w.message).collect();

    if diff.is_empty() {
        return Ok(report);
    }

    if options.mode == MigrationMode::ReadOnly {
        tracing::warn!(
            table = %expected.name,
            pending = diff.len(),
            "schema differs from entity definition; read-only mode leaves it unchanged"
        );
        report.pending = diff.operations;
        return Ok(report);
    }

    provider.apply(&diff.operations)?;
    for op in &diff.operations {
        tracing::info!(table = %expected.name, operation = ?op, "applied schema operation");
    }
    report.created = diff
        .operations
        .iter()
        .any(|op| matches!(op, SchemaOperation::CreateTable(_)));
    report.applied = diff.operations;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{ColumnInfo, IndexInfo};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        table: Option<TableInfo>,
        applied: Mutex<Vec<SchemaOperation>>,
    }

    impl SchemaProvider for RecordingProvider {
        fn get_table(&self, _name: &str) -> Result<Option<TableInfo>> {
            Ok(self.table.clone())
        }

        fn apply(&self, operations: &[SchemaOperation]) -> Result<()> {
            self.applied.lock().unwrap().extend_from_slice(operations);
            Ok(())
        }
    }

    fn expected() -> TableInfo {
        TableInfo {
            columns: vec![ColumnInfo::new("id", "BIGINT"), {
                let mut age = ColumnInfo::new("age", "INTEGER");
                age.nullable = true;
                age
            }],
            primary_key: vec!["id".to_string()],
            indexes: vec![IndexInfo {
                name: "idx_age".to_string(),
                columns: vec!["age".to_string()],
                unique: false,
            }],
            ..TableInfo::new("heroes")
        }
    }

    fn live_with_legacy() -> TableInfo {
        TableInfo {
            columns: vec![ColumnInfo::new("id", "BIGINT"), {
                let mut legacy = ColumnInfo::new("legacy", "TEXT");
                legacy.nullable = true;
                legacy
            }],
            primary_key: vec!["id".to_string()],
            ..TableInfo::new("heroes")
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(MigrationMode::parse("Full"), Some(MigrationMode::Full));
        assert_eq!(MigrationMode::parse("read-only"), Some(MigrationMode::ReadOnly));
        assert_eq!(MigrationMode::parse("sometimes"), None);
        let json = serde_json::to_string(&MigrationMode::ReadOnly).unwrap();
        assert_eq!(json, "\"read_only\"");
    }

    #[test]
    fn test_missing_table_is_created() {
        let provider = RecordingProvider::default();
        let report = reconcile(&provider, &expected(), &ReconcileOptions::default()).unwrap();
        assert!(report.created);
        assert_eq!(provider.applied.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_off_mode_touches_nothing() {
        let provider = RecordingProvider::default();
        let options = ReconcileOptions {
            mode: MigrationMode::Off,
            ..ReconcileOptions::default()
        };
        let report = reconcile(&provider, &expected(), &options).unwrap();
        assert!(report.is_noop());
        assert!(provider.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_destructive_requires_full_and_default_pairing() {
        let provider = RecordingProvider {
            table: Some(live_with_legacy()),
            ..RecordingProvider::default()
        };

        let on = ReconcileOptions {
            mode: MigrationMode::On,
            allow_destructive: true,
            ignore_indexes: true,
        };
        let report = reconcile(&provider, &expected(), &on).unwrap();
        assert!(!report.applied.iter().any(SchemaOperation::is_destructive));

        let full_shard = ReconcileOptions {
            mode: MigrationMode::Full,
            allow_destructive: false,
            ignore_indexes: true,
        };
        let report = reconcile(&provider, &expected(), &full_shard).unwrap();
        assert!(!report.applied.iter().any(SchemaOperation::is_destructive));

        let full_default = ReconcileOptions {
            allow_destructive: true,
            ..full_shard
        };
        let report = reconcile(&provider, &expected(), &full_default).unwrap();
        assert!(report.applied.iter().any(SchemaOperation::is_destructive));
    }

    #[test]
    fn test_ignore_indexes() {
        let provider = RecordingProvider::default();
        let options = ReconcileOptions {
            ignore_indexes: true,
            ..ReconcileOptions::default()
        };
        let report = reconcile(&provider, &expected(), &options).unwrap();
        match &report.applied[0] {
            SchemaOperation::CreateTable(table) => assert!(table.indexes.is_empty()),
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_read_only_reports_pending() {
        let provider = RecordingProvider {
            table: Some(live_with_legacy()),
            ..RecordingProvider::default()
        };
        let options = ReconcileOptions {
            mode: MigrationMode::ReadOnly,
            ..ReconcileOptions::default()
        };
        let report = reconcile(&provider, &expected(), &options).unwrap();
        assert!(report.applied.is_empty());
        assert!(!report.pending.is_empty());
        assert!(provider.applied.lock().unwrap().is_empty());
    }
}
