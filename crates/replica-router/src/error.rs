//! Router error types.

use std::time::Duration;

use thiserror::Error;

use crate::retry::CallIdentity;
use crate::selector::PoolKind;

/// Errors reported by a connection or a connection factory.
///
/// Connection implementations pick the variant; the router only cares
/// whether the failure is disconnect-class (see [`is_disconnect`]).
///
/// [`is_disconnect`]: ConnectionError::is_disconnect
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The server closed the connection or stopped answering.
    #[error("server has gone away: {0}")]
    Disconnected(String),

    /// A new connection could not be established.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The statement failed on a healthy connection (syntax error,
    /// constraint violation, ...).
    #[error("query failed: {0}")]
    Query(String),

    /// The execution deadline passed before the server answered.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectionError {
    /// Check if this failure means the connection is unusable and must be
    /// re-established.
    ///
    /// Timeouts are deliberately not disconnect-class: the connection may
    /// still be healthy and the statement may have side effects.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Connect(_))
    }
}

/// Errors surfaced by the router.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouterError {
    /// Malformed construction parameters or call options.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested pool has no members.
    #[error("no {pool} connections available")]
    PoolExhausted {
        /// Pool that was asked for a connection.
        pool: PoolKind,
    },

    /// No routing hint could be read from the statement.
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// Automatic allocation is off and the call carried no directive.
    #[error("no routing target: automatic allocation is disabled and no pool directive was given")]
    NoRoutingTarget,

    /// The catalog has no table with this name.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The server stayed unreachable for the whole retry budget.
    #[error("{call} *retry:{retries}*: {pool} server has gone away after {attempts} attempts")]
    RetryExhausted {
        /// Identity of the failed call.
        call: CallIdentity,
        /// Pool the call was routed to.
        pool: PoolKind,
        /// Configured retry budget.
        retries: u32,
        /// Number of executions attempted.
        attempts: u32,
        /// Last disconnect-class failure observed.
        #[source]
        last_error: ConnectionError,
    },

    /// A connection failure that is not retried, propagated as-is.
    #[error("{pool} connection error: {source}")]
    Connection {
        /// Pool the failing connection belongs to.
        pool: PoolKind,
        /// Underlying failure.
        #[source]
        source: ConnectionError,
    },
}

impl RouterError {
    /// Check if this error was raised while validating configuration.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }

    /// Check if this error is the terminal form of a disconnect after the
    /// retry budget ran out.
    #[must_use]
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Pool kind the failing call was routed to, when one was resolved.
    #[must_use]
    pub fn pool(&self) -> Option<PoolKind> {
        match self {
            Self::PoolExhausted { pool }
            | Self::RetryExhausted { pool, .. }
            | Self::Connection { pool, .. } => Some(*pool),
            _ => None,
        }
    }

    /// Underlying connection failure, if any.
    #[must_use]
    pub fn connection_error(&self) -> Option<&ConnectionError> {
        match self {
            Self::RetryExhausted { last_error, .. } => Some(last_error),
            Self::Connection { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
