#![allow(dead_code)]

use std::sync::Arc;

use rowbound::{DataSource, SessionConfig};
use rowbound_memory::MemoryDatabase;

/// Register a fresh in-memory database under `name`.
///
/// Tests run in parallel inside one process, so every test picks a
/// connection name nobody else uses.
pub fn connect(name: &str, config: SessionConfig) -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new(name));
    DataSource::builder(name, db.clone())
        .schema(db.clone())
        .config(config)
        .register()
        .unwrap();
    db
}

pub fn hold_cache() -> SessionConfig {
    SessionConfig::new().hold_cache(true)
}
