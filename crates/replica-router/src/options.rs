//! Per-call routing options.
//!
//! A call's pool directive, retry override, deadline and identity travel
//! together in one [`CallOptions`] value, validated once before dispatch.
//! Setters can be chained; the last pool directive set wins.

use std::borrow::Cow;
use std::time::Duration;

use crate::error::RouterError;
use crate::retry::CallIdentity;
use crate::selector::PoolKind;

/// Which pool a call should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PoolDirective {
    /// Classify the statement (requires automatic allocation).
    #[default]
    Auto,
    /// Force the master pool.
    Master,
    /// Force the replica pool.
    Replica,
    /// Any member of either pool.
    Any,
}

impl PoolDirective {
    /// Pool kind pinned by this directive, `None` for [`Auto`](Self::Auto).
    #[must_use]
    pub fn pool_kind(self) -> Option<PoolKind> {
        match self {
            Self::Auto => None,
            Self::Master => Some(PoolKind::Master),
            Self::Replica => Some(PoolKind::Replica),
            Self::Any => Some(PoolKind::Any),
        }
    }

    /// Resolve this directive nested inside `outer`.
    ///
    /// Directives are evaluated outside-in and the innermost explicit one
    /// wins; `Auto` defers to whatever encloses it.
    #[must_use]
    pub fn within(self, outer: PoolDirective) -> PoolDirective {
        match self {
            Self::Auto => outer,
            explicit => explicit,
        }
    }
}

impl From<PoolKind> for PoolDirective {
    fn from(kind: PoolKind) -> Self {
        match kind {
            PoolKind::Master => Self::Master,
            PoolKind::Replica => Self::Replica,
            PoolKind::Any => Self::Any,
        }
    }
}

/// Options for one routed call.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct CallOptions {
    /// Pool directive.
    pub pool: PoolDirective,

    /// Retry budget for this call only, overriding the router default.
    pub retry_override: Option<u32>,

    /// Execution deadline passed to the connection.
    pub timeout: Option<Duration>,

    /// Identity used in logs and errors.
    pub identity: CallIdentity,
}

impl CallOptions {
    /// Options with automatic routing and router defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the master pool.
    #[must_use]
    pub fn master(self) -> Self {
        self.pool(PoolDirective::Master)
    }

    /// Force the replica pool.
    #[must_use]
    pub fn replica(self) -> Self {
        self.pool(PoolDirective::Replica)
    }

    /// Allow either pool.
    #[must_use]
    pub fn any(self) -> Self {
        self.pool(PoolDirective::Any)
    }

    /// Set the pool directive.
    #[must_use]
    pub fn pool(mut self, directive: PoolDirective) -> Self {
        self.pool = directive;
        self
    }

    /// Override the retry budget for this call.
    #[must_use]
    pub fn retry(mut self, retries: u32) -> Self {
        self.retry_override = Some(retries);
        self
    }

    /// Set the execution deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Name the call for logs and errors.
    #[must_use]
    pub fn identity(
        mut self,
        component: impl Into<Cow<'static, str>>,
        operation: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.identity = CallIdentity::new(component, operation);
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.retry_override == Some(0) {
            return Err(RouterError::InvalidConfig(
                "retry override must be greater than 0".into(),
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(RouterError::InvalidConfig(
                "timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
