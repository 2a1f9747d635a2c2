//! Router and connection configuration.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::classifier::DEFAULT_MASTER_VERBS;
use crate::error::RouterError;

/// Default number of pooled connections requested from the factory.
pub const DEFAULT_POOL_SIZE: u32 = 5;

/// Default connection recycle interval.
pub const DEFAULT_POOL_RECYCLE: Duration = Duration::from_secs(3600);

/// Configuration for the execution router.
///
/// This struct is marked `#[non_exhaustive]`; use the builder methods or
/// [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RouterConfig {
    /// Classify statements and route them when the call carries no directive.
    pub auto_allocation: bool,

    /// Reconnect and retry when a connection reports a disconnect.
    pub reconnect_enabled: bool,

    /// Number of retries after the first failed execution.
    pub max_retries: u32,

    /// Leading verbs that must run on a master.
    pub master_verbs: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            auto_allocation: false,
            reconnect_enabled: true,
            max_retries: 1,
            master_verbs: DEFAULT_MASTER_VERBS.iter().map(|v| (*v).to_string()).collect(),
        }
    }
}

impl RouterConfig {
    /// Create a new router configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic allocation.
    #[must_use]
    pub fn auto_allocation(mut self, enabled: bool) -> Self {
        self.auto_allocation = enabled;
        self
    }

    /// Enable or disable reconnect-and-retry.
    #[must_use]
    pub fn reconnect_enabled(mut self, enabled: bool) -> Self {
        self.reconnect_enabled = enabled;
        self
    }

    /// Set the default retry budget.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Replace the set of verbs routed to the master pool.
    #[must_use]
    pub fn master_verbs<I, S>(mut self, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.master_verbs = verbs.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.reconnect_enabled && self.max_retries == 0 {
            return Err(RouterError::InvalidConfig(
                "max_retries must be greater than 0 when reconnect is enabled".into(),
            ));
        }
        if self.auto_allocation && self.master_verbs.is_empty() {
            return Err(RouterError::InvalidConfig(
                "master_verbs cannot be empty when auto_allocation is enabled".into(),
            ));
        }
        if let Some(verb) = self
            .master_verbs
            .iter()
            .find(|v| v.is_empty() || !v.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(RouterError::InvalidConfig(format!(
                "invalid master verb: {verb:?}"
            )));
        }
        Ok(())
    }
}

/// Description of one database endpoint, handed to the connection factory.
///
/// Descriptors are immutable once the router is built.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionDescriptor {
    /// Connection URL understood by the factory.
    pub url: String,

    /// Pool size hint for the factory.
    pub pool_size: u32,

    /// Recycle interval hint for the factory.
    pub pool_recycle: Duration,

    /// Ask the factory to echo statements.
    pub echo: bool,

    /// Factory-specific options.
    pub options: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    /// Create a descriptor for `url` with default pool parameters.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: DEFAULT_POOL_SIZE,
            pool_recycle: DEFAULT_POOL_RECYCLE,
            echo: false,
            options: BTreeMap::new(),
        }
    }

    /// Set the pool size hint.
    #[must_use]
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the recycle interval hint.
    #[must_use]
    pub fn pool_recycle(mut self, recycle: Duration) -> Self {
        self.pool_recycle = recycle;
        self
    }

    /// Enable or disable statement echo.
    #[must_use]
    pub fn echo(mut self, enabled: bool) -> Self {
        self.echo = enabled;
        self
    }

    /// Add a factory-specific option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse a descriptor from a `key=value;...` string.
    ///
    /// ```text
    /// url=mysql://app@db-1:3306/shop;pool_size=10;pool_recycle=60;charset=utf8
    /// ```
    ///
    /// `url` (alias `name`) is required. Unknown keys are kept in
    /// [`options`](Self::options).
    pub fn from_descriptor_string(s: &str) -> Result<Self, RouterError> {
        let mut url = None;
        let mut descriptor = Self::new("");

        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RouterError::InvalidConfig(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "url" | "name" => url = Some(value.to_string()),
                "pool_size" => {
                    descriptor.pool_size = value.parse().map_err(|_| {
                        RouterError::InvalidConfig(format!("invalid pool_size: {value}"))
                    })?;
                }
                "pool_recycle" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        RouterError::InvalidConfig(format!("invalid pool_recycle: {value}"))
                    })?;
                    descriptor.pool_recycle = Duration::from_secs(secs);
                }
                "echo" => {
                    descriptor.echo = value.eq_ignore_ascii_case("true")
                        || value.eq_ignore_ascii_case("yes")
                        || value == "1";
                }
                _ => {
                    descriptor.options.insert(key, value.to_string());
                }
            }
        }

        descriptor.url = url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RouterError::InvalidConfig("descriptor is missing `url`".into()))?;
        Ok(descriptor)
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_descriptor_string(s)
    }
}
