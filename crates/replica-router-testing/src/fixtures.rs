//! Test fixture utilities.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use replica_router::{
    Column, ConnectionDescriptor, ConnectionError, ConnectionFactory, Engine, ExecutionRouter,
    QueryResult, RouterConfig, RouterError, SchemaLoader, TableSchema, Value,
};

use crate::mock::{GENERATION_COLUMN, MockFactory, SERVER_COLUMN};

/// Address of the `n`th master (1-based).
#[must_use]
pub fn master_address(n: usize) -> String {
    format!("mock://master-{n}")
}

/// Address of the `n`th replica (1-based).
#[must_use]
pub fn replica_address(n: usize) -> String {
    format!("mock://replica-{n}")
}

/// Descriptors for `count` masters.
#[must_use]
pub fn masters(count: usize) -> Vec<ConnectionDescriptor> {
    (1..=count)
        .map(|n| ConnectionDescriptor::new(master_address(n)))
        .collect()
}

/// Descriptors for `count` replicas.
#[must_use]
pub fn replicas(count: usize) -> Vec<ConnectionDescriptor> {
    (1..=count)
        .map(|n| ConnectionDescriptor::new(replica_address(n)))
        .collect()
}

/// Build a router over `master_count` masters and `replica_count` replicas.
pub async fn router(
    factory: &Arc<MockFactory>,
    master_count: usize,
    replica_count: usize,
    config: RouterConfig,
) -> Result<ExecutionRouter, RouterError> {
    ExecutionRouter::connect(
        masters(master_count),
        replicas(replica_count),
        config,
        Arc::clone(factory) as Arc<dyn ConnectionFactory>,
    )
    .await
}

/// Address of the mock server that produced `result`.
#[must_use]
pub fn served_by(result: &QueryResult) -> Option<&str> {
    match result.scalar(SERVER_COLUMN)? {
        Value::Text(address) => Some(address.as_str()),
        _ => None,
    }
}

/// Connection generation that produced `result`.
#[must_use]
pub fn generation_of(result: &QueryResult) -> Option<i64> {
    match result.scalar(GENERATION_COLUMN)? {
        Value::Int(generation) => Some(*generation),
        _ => None,
    }
}

/// The member table used across tests.
#[must_use]
pub fn member_table() -> TableSchema {
    TableSchema::new(
        "customer_member_t",
        vec![
            Column::new("member_id", "BIGINT").primary_key(),
            Column::new("email", "VARCHAR(255)").not_null(),
            Column::new("name", "VARCHAR(64)"),
        ],
    )
}

/// Schema loader returning a fixed set of tables.
#[derive(Debug, Default)]
pub struct StaticSchemaLoader {
    tables: Vec<TableSchema>,
    loads: AtomicU32,
    loaded_from: parking_lot::Mutex<Vec<String>>,
}

impl StaticSchemaLoader {
    /// Create a loader returning `tables`.
    #[must_use]
    pub fn new(tables: Vec<TableSchema>) -> Arc<Self> {
        Arc::new(Self {
            tables,
            ..Self::default()
        })
    }

    /// Number of times the loader ran.
    #[must_use]
    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    /// URLs of the engines the loader ran against.
    #[must_use]
    pub fn loaded_from(&self) -> Vec<String> {
        self.loaded_from.lock().clone()
    }
}

#[async_trait::async_trait]
impl SchemaLoader for StaticSchemaLoader {
    async fn load(&self, engine: &Engine) -> Result<Vec<TableSchema>, ConnectionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded_from.lock().push(engine.descriptor().url.clone());
        Ok(self.tables.clone())
    }
}
