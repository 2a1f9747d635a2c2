//! The execution router.
//!
//! Every call resolves a pool kind, binds one engine into a call-scoped
//! [`RoutingContext`], executes, and drops the context on the way out. The
//! router keeps no per-call state in its own fields, so concurrent calls
//! cannot see each other's routing decisions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::Instrument;

use crate::catalog::{Catalog, SchemaLoader, TableSchema};
use crate::classifier::{RoutingHint, StatementClassifier, leading_verb};
use crate::config::{ConnectionDescriptor, RouterConfig};
use crate::connection::{ConnectionFactory, Engine, EngineHandle};
use crate::error::{Result, RouterError};
use crate::instrumentation::{DEFAULT_PREVIEW_LEN, span_names, statement_preview};
use crate::options::{CallOptions, PoolDirective};
use crate::retry::{CallIdentity, RetryPolicy};
use crate::selector::{EngineSelector, PoolKind};
use crate::statement::{QueryResult, Statement};

/// Routing state of one in-flight call.
///
/// Created when a call has resolved its pool and engine, dropped when the
/// call returns, whatever the outcome.
#[derive(Debug)]
pub struct RoutingContext<'a> {
    pool: PoolKind,
    engine: EngineHandle,
    in_flight: &'a AtomicUsize,
}

impl<'a> RoutingContext<'a> {
    pub(crate) fn bind(pool: PoolKind, engine: EngineHandle, in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            pool,
            engine,
            in_flight,
        }
    }

    /// Pool kind selected for the call.
    #[must_use]
    pub fn pool(&self) -> PoolKind {
        self.pool
    }

    /// Engine currently bound to the call.
    #[must_use]
    pub fn engine(&self) -> EngineHandle {
        Arc::clone(&self.engine)
    }

    pub(crate) fn rebind(&mut self, engine: EngineHandle) {
        self.engine = engine;
    }
}

impl Drop for RoutingContext<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`ExecutionRouter`].
#[derive(Default)]
pub struct RouterBuilder {
    masters: Vec<ConnectionDescriptor>,
    replicas: Vec<ConnectionDescriptor>,
    config: RouterConfig,
    factory: Option<Arc<dyn ConnectionFactory>>,
    schema_loader: Option<Arc<dyn SchemaLoader>>,
}

impl RouterBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a master.
    #[must_use]
    pub fn master(mut self, descriptor: ConnectionDescriptor) -> Self {
        self.masters.push(descriptor);
        self
    }

    /// Add several masters.
    #[must_use]
    pub fn masters(mut self, descriptors: impl IntoIterator<Item = ConnectionDescriptor>) -> Self {
        self.masters.extend(descriptors);
        self
    }

    /// Add a replica.
    #[must_use]
    pub fn replica(mut self, descriptor: ConnectionDescriptor) -> Self {
        self.replicas.push(descriptor);
        self
    }

    /// Add several replicas.
    #[must_use]
    pub fn replicas(mut self, descriptors: impl IntoIterator<Item = ConnectionDescriptor>) -> Self {
        self.replicas.extend(descriptors);
        self
    }

    /// Set the router configuration.
    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the connection factory.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Load a table catalog at construction.
    #[must_use]
    pub fn schema_loader(mut self, loader: Arc<dyn SchemaLoader>) -> Self {
        self.schema_loader = Some(loader);
        self
    }

    /// Validate the configuration, connect every descriptor and build the
    /// router.
    ///
    /// Configuration errors are reported before any connection is
    /// attempted.
    pub async fn build(self) -> Result<ExecutionRouter> {
        let Self {
            masters,
            replicas,
            config,
            factory,
            schema_loader,
        } = self;

        let factory = factory.ok_or_else(|| {
            RouterError::InvalidConfig("a connection factory is required".into())
        })?;
        config.validate()?;

        match (masters.is_empty(), replicas.is_empty()) {
            (true, true) => {
                return Err(RouterError::InvalidConfig(
                    "at least one master or replica is required".into(),
                ));
            }
            (true, false) if config.auto_allocation => {
                return Err(RouterError::InvalidConfig(
                    "auto_allocation requires at least one master".into(),
                ));
            }
            (false, false) => tracing::debug!("router contains masters and replicas"),
            (false, true) => tracing::debug!("router contains only masters"),
            (true, false) => tracing::debug!("router contains only replicas"),
        }

        let retry = if config.reconnect_enabled {
            Some(RetryPolicy::new(config.max_retries)?)
        } else {
            None
        };

        async move {
            let mut next_slot = 0;
            let master_engines =
                connect_pool(masters, PoolKind::Master, &mut next_slot, factory.as_ref()).await?;
            let replica_engines =
                connect_pool(replicas, PoolKind::Replica, &mut next_slot, factory.as_ref()).await?;
            let selector = EngineSelector::new(master_engines, replica_engines);

            let catalog = match schema_loader {
                Some(loader) => {
                    let engine = selector.get_any()?;
                    let tables = loader.load(&engine).await.map_err(|source| {
                        RouterError::Connection {
                            pool: PoolKind::Any,
                            source,
                        }
                    })?;
                    Catalog::new(tables)
                }
                None => Catalog::default(),
            };

            tracing::info!(
                masters = selector.master_count(),
                replicas = selector.replica_count(),
                tables = catalog.len(),
                auto_allocation = config.auto_allocation,
                "router ready"
            );

            Ok(ExecutionRouter {
                classifier: StatementClassifier::new(&config.master_verbs),
                config,
                selector,
                factory,
                retry,
                catalog,
                in_flight: AtomicUsize::new(0),
            })
        }
        .instrument(tracing::debug_span!(span_names::CONNECT))
        .await
    }
}

async fn connect_pool(
    descriptors: Vec<ConnectionDescriptor>,
    pool: PoolKind,
    next_slot: &mut u64,
    factory: &dyn ConnectionFactory,
) -> Result<Vec<EngineHandle>> {
    let mut engines = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let engine = Engine::connect(*next_slot, Arc::new(descriptor), factory)
            .await
            .map_err(|source| RouterError::Connection { pool, source })?;
        engines.push(engine);
        *next_slot += 1;
    }
    Ok(engines)
}

/// Routes statements across master and replica pools.
pub struct ExecutionRouter {
    config: RouterConfig,
    selector: EngineSelector,
    factory: Arc<dyn ConnectionFactory>,
    classifier: StatementClassifier,
    retry: Option<RetryPolicy>,
    catalog: Catalog,
    in_flight: AtomicUsize,
}

impl ExecutionRouter {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Connect masters and replicas and build a router.
    pub async fn connect(
        masters: Vec<ConnectionDescriptor>,
        replicas: Vec<ConnectionDescriptor>,
        config: RouterConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        RouterBuilder::new()
            .masters(masters)
            .replicas(replicas)
            .config(config)
            .factory(factory)
            .build()
            .await
    }

    /// Execute a statement with automatic routing.
    ///
    /// Fails with [`RouterError::NoRoutingTarget`] unless automatic
    /// allocation is enabled.
    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<QueryResult> {
        self.execute_with(statement, CallOptions::default()).await
    }

    /// Execute a statement with explicit call options.
    pub async fn execute_with(
        &self,
        statement: impl Into<Statement>,
        options: CallOptions,
    ) -> Result<QueryResult> {
        let statement = statement.into();
        options.validate()?;
        let retry = self.retry_policy(&options)?;
        let pool = self.resolve_pool(&statement, options.pool)?;
        let engine = self.selector.get(pool)?;

        let mut context = RoutingContext::bind(pool, engine, &self.in_flight);
        let timeout = options.timeout;
        let span = tracing::debug_span!(
            span_names::EXECUTE,
            call = %options.identity,
            pool = %pool
        );

        async {
            match retry {
                Some(policy) => {
                    policy
                        .run(
                            &options.identity,
                            &mut context,
                            &self.selector,
                            self.factory.as_ref(),
                            |engine| {
                                let statement = &statement;
                                async move { engine.execute(statement, timeout).await }
                            },
                        )
                        .await
                }
                None => context
                    .engine()
                    .execute(&statement, timeout)
                    .await
                    .map_err(|source| RouterError::Connection { pool, source }),
            }
        }
        .instrument(span)
        .await
    }

    /// Pin the master pool for every call made through the session.
    #[must_use]
    pub fn with_master(&self) -> RoutedSession<'_> {
        RoutedSession::new(self, PoolDirective::Master)
    }

    /// Pin the replica pool for every call made through the session.
    #[must_use]
    pub fn with_replica(&self) -> RoutedSession<'_> {
        RoutedSession::new(self, PoolDirective::Replica)
    }

    /// Allow either pool for every call made through the session.
    #[must_use]
    pub fn with_any(&self) -> RoutedSession<'_> {
        RoutedSession::new(self, PoolDirective::Any)
    }

    /// Look up a table in the catalog loaded at construction.
    pub fn table(&self, name: &str) -> Result<Arc<TableSchema>> {
        self.catalog.table(name)
    }

    /// Catalog loaded at construction.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Master and replica pools.
    #[must_use]
    pub fn selector(&self) -> &EngineSelector {
        &self.selector
    }

    /// Router configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Number of calls currently holding a routing context.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn retry_policy(&self, options: &CallOptions) -> Result<Option<RetryPolicy>> {
        match options.retry_override {
            Some(retries) => RetryPolicy::new(retries).map(Some),
            None => Ok(self.retry),
        }
    }

    fn resolve_pool(&self, statement: &Statement, directive: PoolDirective) -> Result<PoolKind> {
        if let Some(pool) = directive.pool_kind() {
            return Ok(pool);
        }
        if !self.config.auto_allocation {
            return Err(RouterError::NoRoutingTarget);
        }

        let pool = match self.classifier.classify(statement.sql())? {
            RoutingHint::Master => PoolKind::Master,
            RoutingHint::Any => PoolKind::Any,
        };
        tracing::debug!(
            verb = leading_verb(statement.sql()).unwrap_or_default(),
            pool = %pool,
            statement = %statement_preview(statement.sql(), DEFAULT_PREVIEW_LEN),
            "statement classified"
        );
        Ok(pool)
    }
}

impl fmt::Debug for ExecutionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRouter")
            .field("config", &self.config)
            .field("selector", &self.selector)
            .field("retry", &self.retry)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// A router view with a pinned pool directive.
///
/// Options passed to [`execute_with`](Self::execute_with) nest inside the
/// session: an explicit directive there wins over the session's, `Auto`
/// keeps it.
#[derive(Debug, Clone)]
pub struct RoutedSession<'r> {
    router: &'r ExecutionRouter,
    directive: PoolDirective,
    retry_override: Option<u32>,
    identity: Option<CallIdentity>,
}

impl<'r> RoutedSession<'r> {
    fn new(router: &'r ExecutionRouter, directive: PoolDirective) -> Self {
        Self {
            router,
            directive,
            retry_override: None,
            identity: None,
        }
    }

    /// Override the retry budget for calls made through the session.
    #[must_use]
    pub fn retry(mut self, retries: u32) -> Self {
        self.retry_override = Some(retries);
        self
    }

    /// Name calls made through the session.
    #[must_use]
    pub fn identity(
        mut self,
        component: impl Into<std::borrow::Cow<'static, str>>,
        operation: impl Into<std::borrow::Cow<'static, str>>,
    ) -> Self {
        self.identity = Some(CallIdentity::new(component, operation));
        self
    }

    /// Pinned directive.
    #[must_use]
    pub fn directive(&self) -> PoolDirective {
        self.directive
    }

    /// Execute a statement on the pinned pool.
    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<QueryResult> {
        self.execute_with(statement, CallOptions::default()).await
    }

    /// Execute a statement with options nested inside the session.
    pub async fn execute_with(
        &self,
        statement: impl Into<Statement>,
        mut options: CallOptions,
    ) -> Result<QueryResult> {
        options.pool = options.pool.within(self.directive);
        if options.retry_override.is_none() {
            options.retry_override = self.retry_override;
        }
        if let Some(identity) = &self.identity {
            if options.identity == CallIdentity::default() {
                options.identity = identity.clone();
            }
        }
        self.router.execute_with(statement, options).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::tests::EchoFactory;
    use crate::statement::Value;

    fn factory() -> Arc<EchoFactory> {
        Arc::new(EchoFactory::default())
    }

    async fn router(config: RouterConfig, masters: &[&str], replicas: &[&str]) -> ExecutionRouter {
        ExecutionRouter::connect(
            masters.iter().map(|u| ConnectionDescriptor::new(*u)).collect(),
            replicas.iter().map(|u| ConnectionDescriptor::new(*u)).collect(),
            config,
            factory(),
        )
        .await
        .unwrap()
    }

    fn served_by(result: &QueryResult) -> String {
        match result.scalar("url") {
            Some(Value::Text(url)) => url.clone(),
            other => format!("{other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_factory() {
        let err = ExecutionRouter::builder()
            .master(ConnectionDescriptor::new("m1"))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection factory is required"));
    }

    #[tokio::test]
    async fn test_auto_allocation_requires_master() {
        let factory = factory();
        let err = ExecutionRouter::connect(
            Vec::new(),
            vec![ConnectionDescriptor::new("r1")],
            RouterConfig::new().auto_allocation(true),
            factory.clone(),
        )
        .await
        .unwrap_err();

        assert!(err.is_configuration_error());
        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_descriptors() {
        let err = ExecutionRouter::connect(Vec::new(), Vec::new(), RouterConfig::new(), factory())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least one master or replica"));
    }

    #[tokio::test]
    async fn test_invalid_retry_budget() {
        let factory = factory();
        let err = ExecutionRouter::connect(
            vec![ConnectionDescriptor::new("m1")],
            Vec::new(),
            RouterConfig::new().max_retries(0),
            factory.clone(),
        )
        .await
        .unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_names_pool() {
        let err = ExecutionRouter::connect(
            vec![ConnectionDescriptor::new("m1")],
            vec![ConnectionDescriptor::new("down://r1")],
            RouterConfig::new(),
            factory(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.pool(), Some(PoolKind::Replica));
    }

    #[tokio::test]
    async fn test_no_routing_target() {
        let router = router(RouterConfig::new(), &["m1"], &["r1"]).await;
        let err = router.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, RouterError::NoRoutingTarget));
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_invalid_statement_before_pool() {
        let router = router(RouterConfig::new().auto_allocation(true), &["m1"], &[]).await;
        let err = router.execute("   ").await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidStatement(_)));
    }

    #[tokio::test]
    async fn test_auto_routes_mutations_to_master() {
        let config = RouterConfig::new().auto_allocation(true);
        let router = router(config, &["m1"], &["r1", "r2"]).await;
        for _ in 0..100 {
            let result = router.execute("UPDATE t SET x=1").await.unwrap();
            assert_eq!(served_by(&result), "m1");
        }
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_explicit_directive_overrides_classifier() {
        let router = router(RouterConfig::new().auto_allocation(true), &["m1"], &["r1"]).await;
        for _ in 0..50 {
            let result = router
                .execute_with("DELETE FROM t", CallOptions::new().replica())
                .await
                .unwrap();
            assert_eq!(served_by(&result), "r1");
        }
    }

    #[tokio::test]
    async fn test_session_directive_nesting() {
        let router = router(RouterConfig::new(), &["m1"], &["r1"]).await;
        let session = router.with_replica().retry(2).identity("accounts", "lookup");

        assert_eq!(served_by(&session.execute("SELECT 1").await.unwrap()), "r1");
        let inner = session
            .execute_with("SELECT 1", CallOptions::new().master())
            .await
            .unwrap();
        assert_eq!(served_by(&inner), "m1");
        assert_eq!(session.directive(), PoolDirective::Replica);
    }

    #[tokio::test]
    async fn test_replica_pool_exhausted() {
        let router = router(RouterConfig::new(), &["m1"], &[]).await;
        let err = router.with_replica().execute("SELECT 1").await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::PoolExhausted {
                pool: PoolKind::Replica
            }
        ));
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_retry_override_validated() {
        let router = router(RouterConfig::new(), &["m1"], &[]).await;
        let err = router
            .with_master()
            .retry(0)
            .execute("SELECT 1")
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_unknown_table_without_loader() {
        let router = router(RouterConfig::new(), &["m1"], &[]).await;
        assert!(router.catalog().is_empty());
        assert!(matches!(
            router.table("customer_member_t"),
            Err(RouterError::UnknownTable(_))
        ));
    }
}
