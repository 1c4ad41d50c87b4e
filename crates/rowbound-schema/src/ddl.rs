//! DDL generation from schema operations.
//!
//! Converts [`SchemaOperation`]s into SQL statements for a [`Dialect`]. SQL
//! backed schema providers execute these; the in-memory driver keeps them as
//! an audit log.

use rowbound_core::Dialect;

use crate::diff::SchemaOperation;
use crate::introspect::ColumnInfo;

/// Generate DDL statement(s) for a single schema operation.
pub fn generate(op: &SchemaOperation, dialect: Dialect) -> Vec<String> {
    let q = |name: &str| dialect.quote_identifier(name);
    match op {
        SchemaOperation::CreateTable(table) => {
            let mut defs: Vec<String> = table
                .columns
                .iter()
                .map(|c| format_column_def(c, dialect))
                .collect();
            if !table.primary_key.is_empty() {
                let cols: Vec<_> = table.primary_key.iter().map(|c| q(c)).collect();
                defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
            }
            let mut stmts = vec![format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                q(&table.name),
                defs.join(", ")
            )];
            stmts.extend(table.indexes.iter().flat_map(|index| {
                generate(
                    &SchemaOperation::CreateIndex {
                        table: table.name.clone(),
                        index: index.clone(),
                    },
                    dialect,
                )
            }));
            stmts
        }
        SchemaOperation::AddColumn { table, column } => vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            q(table),
            format_column_def(column, dialect)
        )],
        SchemaOperation::DropColumn { table, column } => {
            vec![format!("ALTER TABLE {} DROP COLUMN {}", q(table), q(column))]
        }
        SchemaOperation::AlterColumnType {
            table,
            column,
            to_type,
            ..
        } => vec![match dialect {
            Dialect::Mysql => format!("ALTER TABLE {} MODIFY COLUMN {} {}", q(table), q(column), to_type),
            Dialect::Postgres | Dialect::Sqlite => format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                q(table),
                q(column),
                to_type
            ),
        }],
        SchemaOperation::AlterColumnNullable {
            table,
            column,
            to_nullable,
        } => vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            q(table),
            q(column),
            if *to_nullable { "DROP NOT NULL" } else { "SET NOT NULL" }
        )],
        SchemaOperation::AlterColumnDefault {
            table,
            column,
            to_default,
        } => vec![match to_default {
            Some(default) => format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                q(table),
                q(column),
                default
            ),
            None => format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", q(table), q(column)),
        }],
        SchemaOperation::CreateIndex { table, index } => {
            let cols: Vec<_> = index.columns.iter().map(|c| q(c)).collect();
            vec![format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                q(&index.name),
                q(table),
                cols.join(", ")
            )]
        }
        SchemaOperation::DropIndex { table, name } => vec![match dialect {
            Dialect::Mysql => format!("DROP INDEX {} ON {}", q(name), q(table)),
            Dialect::Postgres | Dialect::Sqlite => format!("DROP INDEX IF EXISTS {}", q(name)),
        }],
    }
}

/// Generate DDL statements for multiple operations.
pub fn generate_all(ops: &[SchemaOperation], dialect: Dialect) -> Vec<String> {
    ops.iter().flat_map(|op| generate(op, dialect)).collect()
}

/// Format a column definition for CREATE TABLE or ADD COLUMN.
fn format_column_def(col: &ColumnInfo, dialect: Dialect) -> String {
    let mut parts = vec![dialect.quote_identifier(&col.name), col.sql_type.clone()];

    if !col.nullable {
        parts.push("NOT NULL".to_string());
    }

    if let Some(ref default) = col.default {
        parts.push(format!("DEFAULT {}", default));
    }

    if col.auto_increment {
        match dialect {
            Dialect::Mysql => parts.push("AUTO_INCREMENT".to_string()),
            Dialect::Postgres => parts.push("GENERATED BY DEFAULT AS IDENTITY".to_string()),
            // INTEGER PRIMARY KEY is already a rowid alias
            Dialect::Sqlite => {}
        }
    }

    parts.join(" ")
}
