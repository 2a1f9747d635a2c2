//! Scripted in-memory connections.
//!
//! Every descriptor URL maps to one [`MockServer`]. Connections opened to a
//! server share its script, so a reconnect does not reset pending failures.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use replica_router::{
    Connection, ConnectionDescriptor, ConnectionError, ConnectionFactory, QueryResult, Statement,
    Value,
};

/// Column holding the address of the server that answered.
pub const SERVER_COLUMN: &str = "server";

/// Column holding the connection generation that answered.
pub const GENERATION_COLUMN: &str = "generation";

/// Outcome of one scripted execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Return one row naming the server and connection generation.
    Succeed,
    /// Fail with a disconnect-class error.
    Disconnect,
    /// Fail with a query error on a healthy connection.
    QueryError(String),
}

/// A simulated database server.
#[derive(Debug)]
pub struct MockServer {
    address: String,
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: Mutex<MockOutcome>,
    latency: Mutex<Option<Duration>>,
    refuse_connections: AtomicBool,
    executions: AtomicU32,
    connects: AtomicU32,
    closes: AtomicU32,
    statements: Mutex<Vec<String>>,
}

impl MockServer {
    fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(MockOutcome::Succeed),
            latency: Mutex::new(None),
            refuse_connections: AtomicBool::new(false),
            executions: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            closes: AtomicU32::new(0),
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Server address (the descriptor URL).
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queue one outcome.
    pub fn push(&self, outcome: MockOutcome) -> &Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// Queue `count` copies of `outcome`.
    pub fn fail_next(&self, count: usize, outcome: MockOutcome) -> &Self {
        self.script.lock().extend(std::iter::repeat_n(outcome, count));
        self
    }

    /// Outcome used once the script is drained.
    pub fn always(&self, outcome: MockOutcome) -> &Self {
        *self.fallback.lock() = outcome;
        self
    }

    /// Delay every execution by `latency`.
    pub fn latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Refuse or accept new connections.
    pub fn refuse_connections(&self, refuse: bool) -> &Self {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
        self
    }

    /// Number of executions received.
    #[must_use]
    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Number of connections accepted.
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of connections closed.
    #[must_use]
    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// SQL text of every statement received, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// Connection to a [`MockServer`].
#[derive(Debug)]
pub struct MockConnection {
    server: Arc<MockServer>,
    generation: u32,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn execute(
        &self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disconnected(format!(
                "{} connection {} is closed",
                self.server.address, self.generation
            )));
        }

        let latency = *self.server.latency.lock();
        if let Some(latency) = latency {
            match timeout {
                Some(deadline) if deadline < latency => {
                    tokio::time::sleep(deadline).await;
                    return Err(ConnectionError::Timeout(deadline));
                }
                _ => tokio::time::sleep(latency).await,
            }
        }

        self.server.executions.fetch_add(1, Ordering::SeqCst);
        self.server
            .statements
            .lock()
            .push(statement.sql().to_string());

        match self.server.next_outcome() {
            MockOutcome::Succeed => Ok(QueryResult {
                columns: vec![SERVER_COLUMN.into(), GENERATION_COLUMN.into()],
                rows: vec![vec![
                    Value::Text(self.server.address.clone()),
                    Value::Int(i64::from(self.generation)),
                ]],
                rows_affected: 0,
            }),
            MockOutcome::Disconnect => {
                tracing::trace!(server = %self.server.address, "mock disconnect");
                Err(ConnectionError::Disconnected(format!(
                    "{} has gone away",
                    self.server.address
                )))
            }
            MockOutcome::QueryError(message) => Err(ConnectionError::Query(message)),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Factory opening [`MockConnection`]s, creating servers on first use.
#[derive(Debug, Default)]
pub struct MockFactory {
    servers: Mutex<HashMap<String, Arc<MockServer>>>,
}

impl MockFactory {
    /// Create a factory with no servers.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Server at `address`, created healthy if unknown.
    pub fn server(&self, address: &str) -> Arc<MockServer> {
        Arc::clone(
            self.servers
                .lock()
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(MockServer::new(address))),
        )
    }

    /// Executions received across all servers.
    #[must_use]
    pub fn total_executions(&self) -> u32 {
        self.servers.lock().values().map(|s| s.executions()).sum()
    }

    /// Connections accepted across all servers.
    #[must_use]
    pub fn total_connects(&self) -> u32 {
        self.servers.lock().values().map(|s| s.connects()).sum()
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let server = self.server(&descriptor.url);
        if server.refuse_connections.load(Ordering::SeqCst) {
            return Err(ConnectionError::Connect(format!(
                "{} refused the connection",
                descriptor.url
            )));
        }

        let generation = server.connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(server = %descriptor.url, generation, "mock connection opened");
        Ok(Box::new(MockConnection {
            server,
            generation,
            closed: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let factory = MockFactory::new();
        factory
            .server("mock://a")
            .push(MockOutcome::Disconnect)
            .always(MockOutcome::QueryError("boom".into()));

        let conn = factory
            .connect(&ConnectionDescriptor::new("mock://a"))
            .await
            .unwrap();
        let stmt = Statement::new("SELECT 1");

        assert!(conn.execute(&stmt, None).await.unwrap_err().is_disconnect());
        assert!(matches!(
            conn.execute(&stmt, None).await,
            Err(ConnectionError::Query(ref m)) if m == "boom"
        ));
        assert_eq!(factory.server("mock://a").executions(), 2);
        assert_eq!(factory.server("mock://a").statements(), vec!["SELECT 1", "SELECT 1"]);
    }

    #[tokio::test]
    async fn test_generation_increments_per_connect() {
        let factory = MockFactory::new();
        let descriptor = ConnectionDescriptor::new("mock://a");
        let first = factory.connect(&descriptor).await.unwrap();
        let second = factory.connect(&descriptor).await.unwrap();
        let stmt = Statement::new("SELECT 1");

        let r1 = first.execute(&stmt, None).await.unwrap();
        let r2 = second.execute(&stmt, None).await.unwrap();
        assert_eq!(r1.scalar(GENERATION_COLUMN), Some(&Value::Int(0)));
        assert_eq!(r2.scalar(GENERATION_COLUMN), Some(&Value::Int(1)));
        assert_eq!(factory.total_connects(), 2);
    }

    #[tokio::test]
    async fn test_closed_connection_reports_disconnect() {
        let factory = MockFactory::new();
        let conn = factory
            .connect(&ConnectionDescriptor::new("mock://a"))
            .await
            .unwrap();
        conn.close().await;
        conn.close().await;

        let err = conn.execute(&Statement::new("SELECT 1"), None).await.unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(factory.server("mock://a").closes(), 1);
        assert_eq!(factory.server("mock://a").executions(), 0);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let factory = MockFactory::new();
        factory.server("mock://a").refuse_connections(true);
        let err = factory
            .connect(&ConnectionDescriptor::new("mock://a"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Connect(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_exceeding_deadline() {
        let factory = MockFactory::new();
        factory.server("mock://slow").latency(Duration::from_secs(5));
        let conn = factory
            .connect(&ConnectionDescriptor::new("mock://slow"))
            .await
            .unwrap();

        let err = conn
            .execute(&Statement::new("SELECT 1"), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
        assert_eq!(factory.server("mock://slow").executions(), 0);
    }
}
