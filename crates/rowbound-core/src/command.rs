//! Structured statements issued by the session runtime.
//!
//! The runtime describes each unit of work as a [`Command`]. Drivers may
//! execute commands directly or render them to SQL text with
//! [`Command::build`] for a given [`Dialect`].

use crate::identifiers::quote_ident;
use crate::value::Value;

/// SQL dialect used when rendering a command to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => quote_ident(name),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        }
    }
}

/// One statement against a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Insert a row. `identity` names a database-generated column whose new
    /// value the driver should report back.
    Insert {
        table: String,
        values: Vec<(String, Value)>,
        identity: Option<String>,
    },
    /// Update the `set` columns of the rows matching `key`.
    Update {
        table: String,
        set: Vec<(String, Value)>,
        key: Vec<(String, Value)>,
    },
    Delete {
        table: String,
        key: Vec<(String, Value)>,
    },
    /// Equality-filtered select of all columns.
    Select {
        table: String,
        filter: Vec<(String, Value)>,
        limit: Option<usize>,
    },
    Count {
        table: String,
        filter: Vec<(String, Value)>,
    },
    /// `MAX(column)`, used as a cheap upper bound on the row count.
    MaxKey { table: String, column: String },
    Truncate { table: String },
    /// Caller-supplied SQL, executed as-is.
    Raw { sql: String, params: Vec<Value> },
}

impl Command {
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Command::Raw {
            sql: sql.into(),
            params,
        }
    }

    /// Target table, when the command names one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Command::Insert { table, .. }
            | Command::Update { table, .. }
            | Command::Delete { table, .. }
            | Command::Select { table, .. }
            | Command::Count { table, .. }
            | Command::MaxKey { table, .. }
            | Command::Truncate { table } => Some(table),
            Command::Raw { .. } => None,
        }
    }

    /// Short statement kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Insert { .. } => "insert",
            Command::Update { .. } => "update",
            Command::Delete { .. } => "delete",
            Command::Select { .. } => "select",
            Command::Count { .. } => "count",
            Command::MaxKey { .. } => "max_key",
            Command::Truncate { .. } => "truncate",
            Command::Raw { .. } => "raw",
        }
    }

    /// Does this command rewrite or remove existing rows?
    ///
    /// Inserts and reads only add or observe rows. Raw SQL counts as
    /// update-class unless it starts with `INSERT` or `SELECT`.
    pub fn is_update_class(&self) -> bool {
        match self {
            Command::Update { .. } | Command::Delete { .. } | Command::Truncate { .. } => true,
            Command::Raw { sql, .. } => {
                let verb = leading_keyword(sql);
                !(verb.eq_ignore_ascii_case("INSERT") || verb.eq_ignore_ascii_case("SELECT"))
            }
            _ => false,
        }
    }

    /// Render SQL text and parameters for `dialect`.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let q = |name: &str| dialect.quote_identifier(name);
        match self {
            Command::Insert { table, values, .. } => {
                let columns: Vec<_> = values.iter().map(|(c, _)| q(c)).collect();
                let placeholders: Vec<_> =
                    (1..=values.len()).map(|i| dialect.placeholder(i)).collect();
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    q(table),
                    columns.join(", "),
                    placeholders.join(", ")
                );
                (sql, values.iter().map(|(_, v)| v.clone()).collect())
            }
            Command::Update { table, set, key } => {
                let mut params = Vec::with_capacity(set.len() + key.len());
                let assignments: Vec<_> = set
                    .iter()
                    .map(|(c, v)| {
                        params.push(v.clone());
                        format!("{} = {}", q(c), dialect.placeholder(params.len()))
                    })
                    .collect();
                let mut sql = format!("UPDATE {} SET {}", q(table), assignments.join(", "));
                push_where(&mut sql, &mut params, key, dialect);
                (sql, params)
            }
            Command::Delete { table, key } => {
                let mut params = Vec::with_capacity(key.len());
                let mut sql = format!("DELETE FROM {}", q(table));
                push_where(&mut sql, &mut params, key, dialect);
                (sql, params)
            }
            Command::Select {
                table,
                filter,
                limit,
            } => {
                let mut params = Vec::with_capacity(filter.len());
                let mut sql = format!("SELECT * FROM {}", q(table));
                push_where(&mut sql, &mut params, filter, dialect);
                if let Some(limit) = limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }
                (sql, params)
            }
            Command::Count { table, filter } => {
                let mut params = Vec::with_capacity(filter.len());
                let mut sql = format!("SELECT COUNT(*) FROM {}", q(table));
                push_where(&mut sql, &mut params, filter, dialect);
                (sql, params)
            }
            Command::MaxKey { table, column } => (
                format!("SELECT MAX({}) FROM {}", q(column), q(table)),
                Vec::new(),
            ),
            Command::Truncate { table } => (
                match dialect {
                    Dialect::Sqlite => format!("DELETE FROM {}", q(table)),
                    Dialect::Postgres | Dialect::Mysql => format!("TRUNCATE TABLE {}", q(table)),
                },
                Vec::new(),
            ),
            Command::Raw { sql, params } => (sql.clone(), params.clone()),
        }
    }
}

fn push_where(
    sql: &mut String,
    params: &mut Vec<Value>,
    filter: &[(String, Value)],
    dialect: Dialect,
) {
    if filter.is_empty() {
        return;
    }
    let clauses: Vec<_> = filter
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", dialect.quote_identifier(column))
            } else {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    dialect.placeholder(params.len())
                )
            }
        })
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
}

fn leading_keyword(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("")
}
