//! Error types for Rowbound operations.

use std::fmt;

/// The primary error type for all Rowbound operations.
#[derive(Debug)]
pub enum Error {
    /// Misconfiguration: unusable entity metadata, unknown connection, bad names
    Config(ConfigError),
    /// Statement execution errors reported by a database
    Query(QueryError),
    /// A value could not become the requested Rust type
    Type(TypeError),
    /// Transaction state errors
    Transaction(TransactionError),
    /// Schema reconciliation errors
    Schema(SchemaError),
    /// A wait exceeded its deadline
    Timeout,
    /// JSON settings or payloads failed to (de)serialize
    Serde(String),
    /// Free-form message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Entity type has no usable table mapping or field table
    InvalidEntity,
    /// A keyed operation was requested on an entity without a primary key
    MissingPrimaryKey,
    /// No connection registered under the requested name
    UnknownConnection,
    /// Column name not declared by the entity
    UnknownColumn,
    /// Connection or table name is not a valid identifier
    InvalidName,
    /// Session configuration could not be parsed
    InvalidSettings,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The statement did not parse
    Syntax,
    /// Constraint violation (unique, not null, etc.)
    Constraint,
    /// Referenced table or column is missing
    NotFound,
    /// Lost a lock cycle
    Deadlock,
    /// Statement ran past its limit
    Timeout,
    /// Statement kind is not understood by the driver
    Unsupported,
    /// Anything else the driver reports
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Commit or rollback without a matching begin
    NotActive,
    /// The database refused to begin
    BeginFailed,
    /// The database failed to commit; the transaction was rolled back
    CommitFailed,
    /// An inner rollback forced the outermost commit to roll back instead
    RolledBack,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// CREATE TABLE on an existing name
    TableExists,
    /// No such table
    TableNotFound,
    /// ADD COLUMN on an existing name
    ColumnExists,
    /// No such column
    ColumnNotFound,
    /// Operation not supported by the schema provider
    Unsupported,
}

impl Error {
    /// Build a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Build a query error without SQL text attached.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    /// Build a transaction state error.
    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    /// Build a schema error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Is this a configuration error? These are never worth retrying.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Is this a retryable error (deadlock, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Deadlock | QueryErrorKind::Timeout),
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Statement text that failed, when the driver supplied it.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Attach a column name to a type error; other errors pass through.
    #[must_use]
    pub fn with_column(self, column: &str) -> Self {
        match self {
            Error::Type(mut e) => {
                if e.column.is_none() {
                    e.column = Some(column.to_string());
                }
                Error::Type(e)
            }
            other => other,
        }
    }
}

impl QueryError {
    /// Attach the statement text that produced this error.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Schema(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Rowbound operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_helpers() {
        let err = Error::config(
            ConfigErrorKind::MissingPrimaryKey,
            "entity `Hero` has no primary key",
        );
        assert!(err.is_config_error());
        assert!(!err.is_retryable());
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingPrimaryKey));
        assert_eq!(
            err.to_string(),
            "Configuration error: entity `Hero` has no primary key"
        );
    }

    #[test]
    fn retryable_flags() {
        assert!(Error::query(QueryErrorKind::Deadlock, "deadlock detected").is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::query(QueryErrorKind::Constraint, "duplicate key").is_retryable());
    }

    #[test]
    fn sql_is_reported_when_attached() {
        let err: Error = QueryError {
            kind: QueryErrorKind::Syntax,
            sql: None,
            message: "near FROM".to_string(),
            source: None,
        }
        .with_sql("SELECT FROM")
        .into();
        assert_eq!(err.sql(), Some("SELECT FROM"));
    }

    #[test]
    fn with_column_fills_type_errors_only() {
        let err = Error::Type(TypeError {
            expected: "i64",
            actual: "TEXT".to_string(),
            column: None,
        })
        .with_column("age");
        assert_eq!(
            err.to_string(),
            "Type error in column 'age': expected i64, found TEXT"
        );

        let untouched = Error::Custom("boom".to_string()).with_column("age");
        assert_eq!(untouched.to_string(), "boom");
    }
}
