//! Schema diff engine.
//!
//! Compares the live definition of one table against the definition an
//! entity expects and produces the operations that would align them.

use std::collections::HashMap;

use crate::introspect::{ColumnInfo, IndexInfo, TableInfo};

// -- Schema Operations --

/// One DDL step needed to bring a live table in line with its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOperation {
    /// Table is missing entirely.
    CreateTable(TableInfo),
    /// Entity column absent from the live table.
    AddColumn { table: String, column: ColumnInfo },
    /// Live column the entity no longer declares.
    DropColumn { table: String, column: String },
    /// Declared type differs after normalization.
    AlterColumnType {
        table: String,
        column: String,
        from_type: String,
        to_type: String,
    },
    /// NULL / NOT NULL mismatch.
    AlterColumnNullable {
        table: String,
        column: String,
        to_nullable: bool,
    },
    /// Default expression mismatch.
    AlterColumnDefault {
        table: String,
        column: String,
        to_default: Option<String>,
    },
    /// Declared index missing from the live table.
    CreateIndex { table: String, index: IndexInfo },
    /// Live index not declared by the entity.
    DropIndex { table: String, name: String },
}

impl SchemaOperation {
    /// True for steps that can discard stored data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchemaOperation::DropColumn { .. } | SchemaOperation::AlterColumnType { .. }
        )
    }

    pub fn is_index_operation(&self) -> bool {
        matches!(
            self,
            SchemaOperation::CreateIndex { .. } | SchemaOperation::DropIndex { .. }
        )
    }

    /// Table the step targets.
    pub fn table(&self) -> &str {
        match self {
            SchemaOperation::CreateTable(t) => &t.name,
            SchemaOperation::AddColumn { table, .. }
            | SchemaOperation::DropColumn { table, .. }
            | SchemaOperation::AlterColumnType { table, .. }
            | SchemaOperation::AlterColumnNullable { table, .. }
            | SchemaOperation::AlterColumnDefault { table, .. }
            | SchemaOperation::CreateIndex { table, .. }
            | SchemaOperation::DropIndex { table, .. } => table,
        }
    }

    fn priority(&self) -> u8 {
        // Drops before alters before adds; indexes last so they see final columns.
        match self {
            SchemaOperation::DropIndex { .. } => 1,
            SchemaOperation::DropColumn { .. } => 2,
            SchemaOperation::AlterColumnType { .. } => 3,
            SchemaOperation::AlterColumnNullable { .. } => 4,
            SchemaOperation::AlterColumnDefault { .. } => 5,
            SchemaOperation::AddColumn { .. } => 6,
            SchemaOperation::CreateTable(_) => 7,
            SchemaOperation::CreateIndex { .. } => 8,
        }
    }
}

// -- Diff Result --

/// How loud a diff warning is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Info,
    Warning,
    /// Applying the step may lose data.
    DataLoss,
}

/// Note attached to one planned step.
#[derive(Debug, Clone)]
pub struct DiffWarning {
    pub severity: WarningSeverity,
    pub message: String,
    /// Position of the offending step in `operations`.
    pub operation_index: Option<usize>,
}

/// What the planner does with drops and type changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestructivePolicy {
    /// Leave destructive steps out of the plan.
    #[default]
    Skip,
    /// Include destructive operations with a data-loss warning attached.
    Warn,
    /// Include destructive operations silently.
    Allow,
}

/// The result of comparing two table definitions.
#[derive(Debug)]
pub struct SchemaDiff {
    /// Policy the plan was built under.
    pub destructive_policy: DestructivePolicy,
    /// Steps in execution order.
    pub operations: Vec<SchemaOperation>,
    pub warnings: Vec<DiffWarning>,
}

impl SchemaDiff {
    pub fn new(destructive_policy: DestructivePolicy) -> Self {
        Self {
            destructive_policy,
            operations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn has_destructive(&self) -> bool {
        self.operations.iter().any(|op| op.is_destructive())
    }

    /// Puts creates first and drops last.
    pub fn order_operations(&mut self) {
        self.operations.sort_by_key(|op| op.priority());
    }

    /// Remove index creation/removal, returning what was removed.
    pub fn drop_index_operations(&mut self) -> Vec<SchemaOperation> {
        let (indexes, rest) = std::mem::take(&mut self.operations)
            .into_iter()
            .partition(|op| op.is_index_operation());
        self.operations = rest;
        indexes
    }

    fn add_op(&mut self, op: SchemaOperation) -> usize {
        let index = self.operations.len();
        self.operations.push(op);
        index
    }

    fn warn(
        &mut self,
        severity: WarningSeverity,
        message: impl Into<String>,
        operation_index: Option<usize>,
    ) {
        self.warnings.push(DiffWarning {
            severity,
            message: message.into(),
            operation_index,
        });
    }

    fn add_destructive_op(
        &mut self,
        op: SchemaOperation,
        warn_severity: WarningSeverity,
        warn_message: impl Into<String>,
    ) {
        let warn_message = warn_message.into();
        match self.destructive_policy {
            DestructivePolicy::Skip => {
                self.warn(
                    WarningSeverity::Warning,
                    format!("Skipped destructive operation: {}", warn_message),
                    None,
                );
            }
            DestructivePolicy::Warn => {
                let op_index = self.add_op(op);
                self.warn(warn_severity, warn_message, Some(op_index));
            }
            DestructivePolicy::Allow => {
                self.add_op(op);
            }
        }
    }
}

// -- Diff Entry Point --

/// Compare a live table (`None` when it does not exist) against the expected
/// definition.
pub fn diff_table(
    current: Option<&TableInfo>,
    expected: &TableInfo,
    policy: DestructivePolicy,
) -> SchemaDiff {
    let mut diff = SchemaDiff::new(policy);

    let Some(current) = current else {
        diff.add_op(SchemaOperation::CreateTable(expected.clone()));
        diff.order_operations();
        return diff;
    };

    diff_columns(current, expected, &mut diff);
    diff_indexes(&current.name, &current.indexes, &expected.indexes, &mut diff);
    diff.order_operations();
    diff
}

fn diff_columns(current_table: &TableInfo, expected_table: &TableInfo, diff: &mut SchemaDiff) {
    let table = current_table.name.as_str();
    let current_map: HashMap<&str, &ColumnInfo> = current_table
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();

    // New columns, in declaration order
    for col in &expected_table.columns {
        if !current_map.contains_key(col.name.as_str()) {
            if !col.nullable && col.default.is_none() && !col.auto_increment {
                let op_index = diff.add_op(SchemaOperation::AddColumn {
                    table: table.to_string(),
                    column: col.clone(),
                });
                diff.warn(
                    WarningSeverity::Warning,
                    format!(
                        "Adding NOT NULL column '{}.{}' without a default may fail on existing rows",
                        table, col.name
                    ),
                    Some(op_index),
                );
            } else {
                diff.add_op(SchemaOperation::AddColumn {
                    table: table.to_string(),
                    column: col.clone(),
                });
            }
        }
    }

    // Dropped columns
    for col in &current_table.columns {
        if expected_table.column(&col.name).is_none() {
            diff.add_destructive_op(
                SchemaOperation::DropColumn {
                    table: table.to_string(),
                    column: col.name.clone(),
                },
                WarningSeverity::DataLoss,
                format!("Dropping column '{}.{}' will delete data", table, col.name),
            );
        }
    }

    // Changed columns
    for expected_col in &expected_table.columns {
        if let Some(current_col) = current_map.get(expected_col.name.as_str()) {
            diff_column_details(table, current_col, expected_col, diff);
        }
    }
}

fn diff_column_details(
    table: &str,
    current: &ColumnInfo,
    expected: &ColumnInfo,
    diff: &mut SchemaDiff,
) {
    let col = &current.name;

    if normalize_type(&current.sql_type) != normalize_type(&expected.sql_type) {
        diff.add_destructive_op(
            SchemaOperation::AlterColumnType {
                table: table.to_string(),
                column: col.clone(),
                from_type: current.sql_type.clone(),
                to_type: expected.sql_type.clone(),
            },
            WarningSeverity::Warning,
            format!(
                "Changing type of '{}.{}' from {} to {} may cause data conversion issues",
                table, col, current.sql_type, expected.sql_type
            ),
        );
    }

    if current.nullable != expected.nullable {
        let op_index = diff.add_op(SchemaOperation::AlterColumnNullable {
            table: table.to_string(),
            column: col.clone(),
            to_nullable: expected.nullable,
        });
        if !expected.nullable {
            diff.warn(
                WarningSeverity::Warning,
                format!(
                    "Making '{}.{}' NOT NULL may fail if column contains NULL values",
                    table, col
                ),
                Some(op_index),
            );
        }
    }

    if current.default != expected.default {
        diff.add_op(SchemaOperation::AlterColumnDefault {
            table: table.to_string(),
            column: col.clone(),
            to_default: expected.default.clone(),
        });
    }
}

fn diff_indexes(table: &str, current: &[IndexInfo], expected: &[IndexInfo], diff: &mut SchemaDiff) {
    let current_map: HashMap<&str, &IndexInfo> =
        current.iter().map(|i| (i.name.as_str(), i)).collect();

    for index in expected {
        match current_map.get(index.name.as_str()) {
            None => {
                diff.add_op(SchemaOperation::CreateIndex {
                    table: table.to_string(),
                    index: index.clone(),
                });
            }
            Some(existing) if existing.columns != index.columns || existing.unique != index.unique => {
                diff.add_op(SchemaOperation::DropIndex {
                    table: table.to_string(),
                    name: index.name.clone(),
                });
                diff.add_op(SchemaOperation::CreateIndex {
                    table: table.to_string(),
                    index: index.clone(),
                });
            }
            Some(_) => {}
        }
    }

    for index in current {
        if !expected.iter().any(|i| i.name == index.name) {
            diff.add_op(SchemaOperation::DropIndex {
                table: table.to_string(),
                name: index.name.clone(),
            });
        }
    }
}

// -- Type Normalization --

/// Canonical spelling of a SQL type, so aliases compare equal.
fn normalize_type(sql_type: &str) -> String {
    let upper = sql_type.trim().to_uppercase();
    let compact: String = upper.split_whitespace().collect::<Vec<_>>().join(" ");
    match compact.as_str() {
        "INT" | "INT4" | "SERIAL" => "INTEGER".to_string(),
        "INT8" | "BIGSERIAL" => "BIGINT".to_string(),
        "INT2" | "SMALLSERIAL" => "SMALLINT".to_string(),
        "FLOAT8" | "DOUBLE" => "DOUBLE PRECISION".to_string(),
        "BOOL" => "BOOLEAN".to_string(),
        _ => compact.replace(", ", ","),
    }
}

// -- Unit Tests --

#[cfg(test)]
mod tests {
    use super::*;

    fn make_column(name: &str, sql_type: &str, nullable: bool) -> ColumnInfo {
        ColumnInfo {
            nullable,
            ..ColumnInfo::new(name, sql_type)
        }
    }

    fn heroes(columns: Vec<ColumnInfo>) -> TableInfo {
        TableInfo {
            columns,
            primary_key: vec!["id".to_string()],
            ..TableInfo::new("heroes")
        }
    }

    #[test]
    fn test_missing_table_is_created() {
        let expected = heroes(vec![make_column("id", "BIGINT", false)]);
        let diff = diff_table(None, &expected, DestructivePolicy::Skip);
        assert_eq!(diff.operations, vec![SchemaOperation::CreateTable(expected)]);
    }

    #[test]
    fn test_identical_tables_produce_no_ops() {
        let table = heroes(vec![
            make_column("id", "BIGINT", false),
            make_column("name", "TEXT", false),
        ]);
        assert!(diff_table(Some(&table), &table, DestructivePolicy::Allow).is_empty());
    }

    #[test]
    fn test_added_column() {
        let current = heroes(vec![make_column("id", "BIGINT", false)]);
        let expected = heroes(vec![
            make_column("id", "BIGINT", false),
            make_column("age", "INTEGER", true),
        ]);
        let diff = diff_table(Some(&current), &expected, DestructivePolicy::Skip);
        assert_eq!(diff.len(), 1);
        assert!(matches!(
            &diff.operations[0],
            SchemaOperation::AddColumn { column, .. } if column.name == "age"
        ));
        assert!(diff.warnings.is_empty());
    }

    #[test]
    fn test_skip_policy_suppresses_drops() {
        let current = heroes(vec![
            make_column("id", "BIGINT", false),
            make_column("legacy", "TEXT", true),
        ]);
        let expected = heroes(vec![make_column("id", "BIGINT", false)]);

        let skipped = diff_table(Some(&current), &expected, DestructivePolicy::Skip);
        assert!(skipped.is_empty());
        assert_eq!(skipped.warnings.len(), 1);
        assert!(skipped.warnings[0].message.starts_with("Skipped destructive operation"));

        let allowed = diff_table(Some(&current), &expected, DestructivePolicy::Allow);
        assert!(allowed.has_destructive());
        assert_eq!(
            allowed.operations,
            vec![SchemaOperation::DropColumn {
                table: "heroes".to_string(),
                column: "legacy".to_string()
            }]
        );
    }

    #[test]
    fn test_type_change_is_destructive() {
        let current = heroes(vec![make_column("age", "TEXT", true)]);
        let expected = heroes(vec![make_column("age", "INTEGER", true)]);
        let diff = diff_table(Some(&current), &expected, DestructivePolicy::Warn);
        assert!(diff.has_destructive());
        assert_eq!(diff.warnings[0].operation_index, Some(0));
    }

    #[test]
    fn test_type_synonyms_are_equal() {
        let current = heroes(vec![make_column("id", "int8", false)]);
        let expected = heroes(vec![make_column("id", "BIGINT", false)]);
        assert!(diff_table(Some(&current), &expected, DestructivePolicy::Allow).is_empty());

        let current = heroes(vec![make_column("price", "DECIMAL(10,2)", false)]);
        let expected = heroes(vec![make_column("price", "DECIMAL(10, 2)", false)]);
        assert!(diff_table(Some(&current), &expected, DestructivePolicy::Allow).is_empty());
    }

    #[test]
    fn test_index_changes_and_filtering() {
        let current = TableInfo {
            indexes: vec![IndexInfo {
                name: "idx_old".to_string(),
                columns: vec!["name".to_string()],
                unique: false,
            }],
            ..heroes(vec![make_column("name", "TEXT", false)])
        };
        let expected = TableInfo {
            indexes: vec![IndexInfo {
                name: "idx_name".to_string(),
                columns: vec!["name".to_string()],
                unique: true,
            }],
            ..heroes(vec![make_column("name", "TEXT", false)])
        };

        let mut diff = diff_table(Some(&current), &expected, DestructivePolicy::Skip);
        assert_eq!(diff.len(), 2);
        assert!(matches!(diff.operations[0], SchemaOperation::DropIndex { .. }));
        assert!(matches!(diff.operations[1], SchemaOperation::CreateIndex { .. }));

        let removed = diff.drop_index_operations();
        assert_eq!(removed.len(), 2);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_nullability_tightening_warns() {
        let current = heroes(vec![make_column("name", "TEXT", true)]);
        let expected = heroes(vec![make_column("name", "TEXT", false)]);
        let diff = diff_table(Some(&current), &expected, DestructivePolicy::Skip);
        assert_eq!(
            diff.operations,
            vec![SchemaOperation::AlterColumnNullable {
                table: "heroes".to_string(),
                column: "name".to_string(),
                to_nullable: false
            }]
        );
        assert_eq!(diff.warnings.len(), 1);
    }
}
