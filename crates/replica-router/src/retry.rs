//! Reconnect-and-retry for disconnect-class failures.
//!
//! On each disconnect the bound engine re-establishes itself from its
//! descriptor, the fresh handle is published to the selector, and the
//! operation runs again on it. A call with a budget of `n` retries executes
//! at most `n + 1` times.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use crate::connection::{ConnectionFactory, EngineHandle};
use crate::error::{ConnectionError, RouterError};
use crate::router::RoutingContext;
use crate::selector::EngineSelector;

/// Identity of a routed call, used in logs and errors.
///
/// Renders as `component:operation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    component: Cow<'static, str>,
    operation: Cow<'static, str>,
}

impl CallIdentity {
    /// Create a call identity.
    #[must_use]
    pub fn new(
        component: impl Into<Cow<'static, str>>,
        operation: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
        }
    }

    /// Calling component.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for CallIdentity {
    fn default() -> Self {
        Self::new("replica_router", "execute")
    }
}

impl fmt::Display for CallIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component, self.operation)
    }
}

/// Bounded retry on disconnect-class failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries.
    ///
    /// Fails with [`RouterError::InvalidConfig`] when `max_retries` is zero.
    pub fn new(max_retries: u32) -> Result<Self, RouterError> {
        if max_retries == 0 {
            return Err(RouterError::InvalidConfig(
                "retry budget must be greater than 0".into(),
            ));
        }
        Ok(Self { max_retries })
    }

    /// Retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` against the context's engine, reconnecting on disconnects.
    ///
    /// Failures that are not disconnect-class are returned on first
    /// occurrence. When the budget runs out the last disconnect is wrapped
    /// in [`RouterError::RetryExhausted`].
    pub(crate) async fn run<T, F, Fut>(
        &self,
        call: &CallIdentity,
        context: &mut RoutingContext<'_>,
        selector: &EngineSelector,
        factory: &dyn ConnectionFactory,
        mut op: F,
    ) -> Result<T, RouterError>
    where
        F: FnMut(EngineHandle) -> Fut,
        Fut: Future<Output = Result<T, ConnectionError>>,
    {
        let pool = context.pool();
        let mut attempts = 0;

        loop {
            let engine = context.engine();
            let err = match op(EngineHandle::clone(&engine)).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_disconnect() => {
                    return Err(RouterError::Connection { pool, source: err });
                }
                Err(err) => err,
            };

            attempts += 1;
            tracing::warn!(
                call = %call,
                pool = %pool,
                slot = engine.slot(),
                attempt = attempts,
                max_retries = self.max_retries,
                error = %err,
                "connection lost, reconnecting"
            );

            let last_error = match engine.reconnect(factory).await {
                Ok(fresh) => {
                    if selector.replace(pool, &engine, EngineHandle::clone(&fresh)) {
                        engine.close().await;
                        context.rebind(fresh);
                    } else {
                        // a concurrent call already refreshed this slot
                        fresh.close().await;
                        if let Some(current) = selector.slot(pool, engine.slot()) {
                            context.rebind(current);
                        }
                    }
                    err
                }
                Err(reconnect_err) if reconnect_err.is_disconnect() => {
                    tracing::warn!(
                        call = %call,
                        pool = %pool,
                        slot = engine.slot(),
                        error = %reconnect_err,
                        "reconnect failed"
                    );
                    reconnect_err
                }
                Err(reconnect_err) => {
                    return Err(RouterError::Connection {
                        pool,
                        source: reconnect_err,
                    });
                }
            };

            if attempts > self.max_retries {
                tracing::error!(
                    call = %call,
                    pool = %pool,
                    retries = self.max_retries,
                    error = %last_error,
                    "server has gone away, retry budget exhausted"
                );
                return Err(RouterError::RetryExhausted {
                    call: call.clone(),
                    pool,
                    retries: self.max_retries,
                    attempts,
                    last_error,
                });
            }
        }
    }
}
