//! Named connections.
//!
//! Entities name their connection (`Entity::CONNECTION_NAME`, or the
//! connection of an active shard scope); sessions resolve that name here on
//! every call, so re-registering a name redirects all sessions bound to it.

use std::fmt;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use rowbound_core::{ConfigErrorKind, Database, Error, Result, validate_identifier};
use rowbound_schema::SchemaProvider;

use crate::config::SessionConfig;

static SOURCES: LazyLock<DashMap<String, Arc<DataSource>>> = LazyLock::new(DashMap::new);

/// One registered connection: the database, its optional schema access and
/// the session settings that apply to it.
pub struct DataSource {
    name: String,
    db: Arc<dyn Database>,
    schema: Option<Arc<dyn SchemaProvider>>,
    config: SessionConfig,
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .field("dialect", &self.db.dialect())
            .field("has_schema", &self.schema.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl DataSource {
    pub fn builder(name: impl Into<String>, db: Arc<dyn Database>) -> DataSourceBuilder {
        DataSourceBuilder {
            name: name.into(),
            db,
            schema: None,
            config: SessionConfig::default(),
        }
    }

    /// Look up a registered connection.
    pub fn get(name: &str) -> Result<Arc<DataSource>> {
        SOURCES
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownConnection,
                    format!("no connection registered under {name:?}"),
                )
            })
    }

    pub fn is_registered(name: &str) -> bool {
        SOURCES.contains_key(name)
    }

    /// Remove a connection. Sessions bound to it fail until it is registered
    /// again.
    pub fn unregister(name: &str) -> Option<Arc<DataSource>> {
        SOURCES.remove(name).map(|(_, source)| source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn schema(&self) -> Option<&dyn SchemaProvider> {
        self.schema.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// Builder for [`DataSource`].
///
/// ```rust,ignore
/// let db = Arc::new(MemoryDatabase::new("main"));
/// DataSource::builder("main", db.clone())
///     .schema(db)
///     .config(SessionConfig::new().hold_cache(true))
///     .register()?;
/// ```
pub struct DataSourceBuilder {
    name: String,
    db: Arc<dyn Database>,
    schema: Option<Arc<dyn SchemaProvider>>,
    config: SessionConfig,
}

impl DataSourceBuilder {
    /// Attach schema access, enabling first-use reconciliation.
    pub fn schema(mut self, schema: Arc<dyn SchemaProvider>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<DataSource> {
        validate_identifier("connection", &self.name)?;
        Ok(DataSource {
            name: self.name,
            db: self.db,
            schema: self.schema,
            config: self.config,
        })
    }

    /// Build and register, replacing any connection of the same name.
    pub fn register(self) -> Result<Arc<DataSource>> {
        let source = Arc::new(self.build()?);
        if SOURCES
            .insert(source.name.clone(), Arc::clone(&source))
            .is_some()
        {
            tracing::debug!(connection = %source.name, "connection re-registered");
        } else {
            tracing::debug!(connection = %source.name, "connection registered");
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbound_memory::MemoryDatabase;

    #[test]
    fn test_register_and_lookup() {
        let db = Arc::new(MemoryDatabase::new("dal_lookup"));
        DataSource::builder("dal_lookup", db.clone())
            .schema(db)
            .config(SessionConfig::new().collection_ceiling(3))
            .register()
            .unwrap();

        let source = DataSource::get("dal_lookup").unwrap();
        assert_eq!(source.name(), "dal_lookup");
        assert!(source.schema().is_some());
        assert_eq!(source.config().collection_ceiling, 3);

        assert!(DataSource::unregister("dal_lookup").is_some());
        assert!(!DataSource::is_registered("dal_lookup"));
    }

    #[test]
    fn test_unknown_connection() {
        let err = DataSource::get("dal_never_registered").unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownConnection));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let db = Arc::new(MemoryDatabase::new("x"));
        let err = DataSource::builder("bad name;", db).register().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidName));
    }
}
