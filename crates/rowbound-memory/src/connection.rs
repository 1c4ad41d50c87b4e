//! The in-memory connection.
//!
//! All tables of one [`MemoryDatabase`] live behind a single mutex, so every
//! command is atomic with respect to every other. Transactions are
//! connection-wide, matching the contract of [`Database`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rowbound_core::{
    Command, Database, Dialect, Error, QueryError, QueryErrorKind, Result, Row, SchemaErrorKind,
    TransactionErrorKind, Value,
};
use rowbound_schema::{SchemaOperation, SchemaProvider, TableInfo, ddl};

use crate::raw::{self, RawStatement};
use crate::table::MemTable;

const STATEMENT_LOG_CAPACITY: usize = 1024;

/// Call counters for one [`MemoryDatabase`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub queries: u64,
    pub executes: u64,
    pub inserts: u64,
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    /// `get_table` calls through [`SchemaProvider`].
    pub schema_reads: u64,
    /// `apply` calls through [`SchemaProvider`].
    pub schema_applies: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queries: AtomicU64,
    executes: AtomicU64,
    inserts: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    schema_reads: AtomicU64,
    schema_applies: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MemoryStats {
        MemoryStats {
            queries: self.queries.load(Ordering::Relaxed),
            executes: self.executes.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            begins: self.begins.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            schema_reads: self.schema_reads.load(Ordering::Relaxed),
            schema_applies: self.schema_applies.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.queries,
            &self.executes,
            &self.inserts,
            &self.begins,
            &self.commits,
            &self.rollbacks,
            &self.schema_reads,
            &self.schema_applies,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemTable>,
    /// Table contents as of `begin`, restored on rollback.
    snapshot: Option<BTreeMap<String, MemTable>>,
    ddl: Vec<String>,
    statements: VecDeque<String>,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemTable> {
        self.tables.get(name).ok_or_else(|| no_such_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.tables.get_mut(name).ok_or_else(|| no_such_table(name))
    }

    fn log(&mut self, sql: String) {
        if self.statements.len() == STATEMENT_LOG_CAPACITY {
            self.statements.pop_front();
        }
        self.statements.push_back(sql);
    }
}

/// A named, process-local database.
///
/// # Example
///
/// ```rust,ignore
/// let db = Arc::new(MemoryDatabase::new("main"));
/// DataSource::builder("main", db.clone()).schema(db.clone()).register();
/// ```
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    dialect: Dialect,
    state: Mutex<MemoryState>,
    counters: Counters,
    count_is_slow: AtomicBool,
    fail_queries: AtomicBool,
    fail_next_commit: AtomicBool,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dialect: Dialect::default(),
            state: Mutex::new(MemoryState::default()),
            counters: Counters::default(),
            count_is_slow: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Dialect used for the statement log.
    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a table directly, bypassing schema reconciliation.
    pub fn create_table(&self, info: &TableInfo) -> Result<()> {
        let mut state = self.state.lock();
        if state.tables.contains_key(&info.name) {
            return Err(Error::schema(
                SchemaErrorKind::TableExists,
                format!("table {} already exists", info.name),
            ));
        }
        state
            .tables
            .insert(info.name.clone(), MemTable::new(info.clone()));
        Ok(())
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().tables.contains_key(name)
    }

    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.state.lock().tables.get(table).map(MemTable::len)
    }

    pub fn stats(&self) -> MemoryStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// DDL statements applied through [`SchemaProvider::apply`], in order.
    pub fn applied_ddl(&self) -> Vec<String> {
        self.state.lock().ddl.clone()
    }

    /// Most recent statements executed, rendered for this database's dialect.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.iter().cloned().collect()
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().snapshot.is_some()
    }

    /// Report `COUNT(*)` as expensive so callers try an estimate first.
    pub fn set_count_is_slow(&self, slow: bool) {
        self.count_is_slow.store(slow, Ordering::Relaxed);
    }

    /// Make every query and execute fail until switched off again.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::Relaxed);
    }

    /// Make the next `commit` fail. The open transaction stays open so it
    /// can still be rolled back.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::Relaxed);
    }

    fn check_failure(&self, command: &Command) -> Result<()> {
        if self.fail_queries.load(Ordering::Relaxed) {
            let (sql, _) = command.build(self.dialect);
            return Err(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql),
                message: format!("database {} is unavailable", self.name),
                source: None,
            }
            .into());
        }
        Ok(())
    }

    fn run_write(&self, state: &mut MemoryState, command: &Command) -> Result<u64> {
        match command {
            Command::Insert {
                table,
                values,
                identity,
            } => {
                state.table_mut(table)?.insert(values, identity.as_deref())?;
                Ok(1)
            }
            Command::Update { table, set, key } => state.table_mut(table)?.update(set, key),
            Command::Delete { table, key } => state.table_mut(table)?.delete(key),
            Command::Truncate { table } => Ok(state.table_mut(table)?.truncate()),
            Command::Raw { sql, params } => match raw::parse(sql, params)? {
                RawStatement::Update { table, set, filter } => {
                    state.table_mut(&table)?.update(&set, &filter)
                }
                RawStatement::Delete { table, filter } => state.table_mut(&table)?.delete(&filter),
                RawStatement::Insert { table, values } => {
                    state.table_mut(&table)?.insert(&values, None)?;
                    Ok(1)
                }
            },
            other => Err(unsupported(other, "reading command passed to execute")),
        }
    }

    fn apply_one(&self, state: &mut MemoryState, op: &SchemaOperation) -> Result<()> {
        match op {
            SchemaOperation::CreateTable(info) => {
                state
                    .tables
                    .entry(info.name.clone())
                    .or_insert_with(|| MemTable::new(info.clone()));
            }
            SchemaOperation::AddColumn { table, column } => {
                state.table_mut(table)?.add_column(column.clone());
            }
            SchemaOperation::DropColumn { table, column } => {
                state.table_mut(table)?.drop_column(column)?;
            }
            SchemaOperation::AlterColumnType {
                table,
                column,
                to_type,
                ..
            } => column_mut(state, table, column)?.sql_type.clone_from(to_type),
            SchemaOperation::AlterColumnNullable {
                table,
                column,
                to_nullable,
            } => column_mut(state, table, column)?.nullable = *to_nullable,
            SchemaOperation::AlterColumnDefault {
                table,
                column,
                to_default,
            } => column_mut(state, table, column)?.default.clone_from(to_default),
            SchemaOperation::CreateIndex { table, index } => {
                state.table_mut(table)?.create_index(index.clone());
            }
            SchemaOperation::DropIndex { table, name } => {
                state.table_mut(table)?.drop_index(name);
            }
        }
        state.ddl.extend(ddl::generate(op, self.dialect));
        Ok(())
    }
}

impl Database for MemoryDatabase {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, command: &Command) -> Result<Vec<Row>> {
        Counters::bump(&self.counters.queries);
        self.check_failure(command)?;
        let mut state = self.state.lock();
        state.log(command.build(self.dialect).0);

        match command {
            Command::Select {
                table,
                filter,
                limit,
            } => state.table(table)?.select(filter, *limit),
            Command::Count { table, filter } => {
                let count = state.table(table)?.count(filter)?;
                Ok(vec![Row::new(
                    vec!["count".to_string()],
                    vec![Value::BigInt(count)],
                )])
            }
            Command::MaxKey { table, column } => {
                let max = state.table(table)?.max(column)?;
                Ok(vec![Row::new(vec!["max".to_string()], vec![max])])
            }
            other => Err(unsupported(other, "only structured reads can be queried")),
        }
    }

    fn execute(&self, command: &Command) -> Result<u64> {
        Counters::bump(&self.counters.executes);
        self.check_failure(command)?;
        let mut state = self.state.lock();
        state.log(command.build(self.dialect).0);
        let affected = self.run_write(&mut state, command)?;
        tracing::trace!(db = %self.name, kind = command.kind(), affected, "executed");
        Ok(affected)
    }

    fn insert(&self, command: &Command) -> Result<Option<i64>> {
        Counters::bump(&self.counters.inserts);
        self.check_failure(command)?;
        let Command::Insert {
            table,
            values,
            identity,
        } = command
        else {
            return Err(unsupported(command, "insert expects an INSERT command"));
        };
        let mut state = self.state.lock();
        state.log(command.build(self.dialect).0);
        state.table_mut(table)?.insert(values, identity.as_deref())
    }

    fn begin(&self) -> Result<()> {
        Counters::bump(&self.counters.begins);
        let mut state = self.state.lock();
        if state.snapshot.is_some() {
            return Err(Error::transaction(
                TransactionErrorKind::BeginFailed,
                format!("database {} already has an open transaction", self.name),
            ));
        }
        state.snapshot = Some(state.tables.clone());
        tracing::debug!(db = %self.name, "transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Counters::bump(&self.counters.commits);
        let mut state = self.state.lock();
        if state.snapshot.is_none() {
            return Err(not_active(&self.name));
        }
        if self.fail_next_commit.swap(false, Ordering::Relaxed) {
            return Err(Error::query(
                QueryErrorKind::Database,
                format!("database {} failed to commit", self.name),
            ));
        }
        state.snapshot = None;
        tracing::debug!(db = %self.name, "transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        Counters::bump(&self.counters.rollbacks);
        let mut state = self.state.lock();
        let snapshot = state.snapshot.take().ok_or_else(|| not_active(&self.name))?;
        state.tables = snapshot;
        tracing::debug!(db = %self.name, "transaction rolled back");
        Ok(())
    }

    fn count_is_slow(&self) -> bool {
        self.count_is_slow.load(Ordering::Relaxed)
    }
}

impl SchemaProvider for MemoryDatabase {
    fn get_table(&self, name: &str) -> Result<Option<TableInfo>> {
        Counters::bump(&self.counters.schema_reads);
        Ok(self.state.lock().tables.get(name).map(|t| t.info.clone()))
    }

    fn apply(&self, operations: &[SchemaOperation]) -> Result<()> {
        Counters::bump(&self.counters.schema_applies);
        let mut state = self.state.lock();
        for op in operations {
            self.apply_one(&mut state, op)?;
        }
        Ok(())
    }
}

fn column_mut<'a>(
    state: &'a mut MemoryState,
    table: &str,
    column: &str,
) -> Result<&'a mut rowbound_schema::ColumnInfo> {
    state.table_mut(table)?.info.column_mut(column).ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::ColumnNotFound,
            format!("no such column: {table}.{column}"),
        )
    })
}

fn no_such_table(name: &str) -> Error {
    Error::query(QueryErrorKind::NotFound, format!("no such table: {name}"))
}

fn not_active(db: &str) -> Error {
    Error::transaction(
        TransactionErrorKind::NotActive,
        format!("database {db} has no open transaction"),
    )
}

fn unsupported(command: &Command, message: &str) -> Error {
    Error::query(
        QueryErrorKind::Unsupported,
        format!("{message} ({})", command.kind()),
    )
}
