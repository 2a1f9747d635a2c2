//! Connection traits and pooled engine handles.
//!
//! Raw connection establishment is delegated to a [`ConnectionFactory`].
//! The router wraps every connection it gets in an [`Engine`], which
//! remembers the descriptor it came from so it can re-establish itself.
//!
//! Both traits use `#[async_trait]` because the router holds them as trait
//! objects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionDescriptor;
use crate::error::ConnectionError;
use crate::statement::{QueryResult, Statement};

/// A live database connection.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement.
    ///
    /// `timeout` is passed through unchanged from the call options. An
    /// implementation that supports deadlines reports expiry as
    /// [`ConnectionError::Timeout`].
    async fn execute(
        &self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, ConnectionError>;

    /// Release server-side resources before the handle is discarded.
    async fn close(&self) {}
}

/// Creates connections from descriptors.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Establish a new connection.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// Shared handle to a pooled engine.
pub type EngineHandle = Arc<Engine>;

/// A connection occupying one pool slot.
///
/// The slot id is stable across reconnects; the generation increases by one
/// each time the slot is refreshed.
pub struct Engine {
    slot: u64,
    generation: u64,
    descriptor: Arc<ConnectionDescriptor>,
    connection: Box<dyn Connection>,
}

impl Engine {
    /// Connect a new engine for `slot`.
    pub async fn connect(
        slot: u64,
        descriptor: Arc<ConnectionDescriptor>,
        factory: &dyn ConnectionFactory,
    ) -> Result<EngineHandle, ConnectionError> {
        let connection = factory.connect(&descriptor).await?;
        tracing::trace!(slot, url = %descriptor.url, "engine connected");
        Ok(Arc::new(Self {
            slot,
            generation: 0,
            descriptor,
            connection,
        }))
    }

    /// Open a replacement for this engine's connection.
    ///
    /// A new connection is created from the same descriptor; the current one
    /// is left open. The returned handle occupies the same slot with the
    /// next generation. Whoever publishes it closes the handle it displaced.
    pub async fn reconnect(
        &self,
        factory: &dyn ConnectionFactory,
    ) -> Result<EngineHandle, ConnectionError> {
        let connection = factory.connect(&self.descriptor).await?;
        tracing::trace!(
            slot = self.slot,
            generation = self.generation + 1,
            "engine reconnected"
        );
        Ok(Arc::new(Self {
            slot: self.slot,
            generation: self.generation + 1,
            descriptor: Arc::clone(&self.descriptor),
            connection,
        }))
    }

    /// Execute a statement on this engine.
    pub async fn execute(
        &self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, ConnectionError> {
        self.connection.execute(statement, timeout).await
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        tracing::trace!(slot = self.slot, generation = self.generation, "engine closed");
        self.connection.close().await;
    }

    /// Stable slot id.
    #[must_use]
    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// Number of times this slot has been reconnected.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Descriptor the engine was created from.
    #[must_use]
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("url", &self.descriptor.url)
            .finish_non_exhaustive()
    }
}
