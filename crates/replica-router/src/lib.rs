//! # replica-router
//!
//! Master/replica statement routing with reconnect-and-retry.
//!
//! The router holds a pool of master connections and a pool of replica
//! connections. Each call picks a pool, either from an explicit directive or
//! by classifying the statement's leading verb, picks one connection from it
//! at random, and executes. When a connection reports that the server has
//! gone away, the router re-establishes that pool slot and retries up to a
//! configured budget.
//!
//! ## Features
//!
//! - Uniform random selection over masters, replicas, or both
//! - Automatic routing of mutating statements to masters
//! - Per-call directives and retry overrides via [`CallOptions`]
//! - Atomic per-slot replacement after reconnect
//! - Call-scoped routing state, safe under concurrent callers
//! - Optional table catalog loaded at construction
//!
//! Connections are created by a caller-supplied [`ConnectionFactory`]; this
//! crate does not speak any wire protocol itself.
//!
//! ## Example
//!
//! ```rust,ignore
//! use replica_router::{CallOptions, ConnectionDescriptor, ExecutionRouter, RouterConfig};
//!
//! let router = ExecutionRouter::builder()
//!     .master("url=mysql://app@db-primary/shop;pool_size=5".parse()?)
//!     .replica(ConnectionDescriptor::new("mysql://app@db-replica-1/shop"))
//!     .config(RouterConfig::new().auto_allocation(true).max_retries(3))
//!     .factory(factory)
//!     .build()
//!     .await?;
//!
//! // Routed by verb: UPDATE goes to a master, SELECT to any member.
//! router.execute("UPDATE member SET name = ? WHERE id = ?").await?;
//! let rows = router.execute("SELECT name FROM member WHERE id = 1").await?;
//!
//! // Explicit directive with a per-call retry budget.
//! let rows = router
//!     .execute_with("SELECT name FROM member", CallOptions::new().replica().retry(3))
//!     .await?;
//!
//! // Or pin a pool for a series of calls.
//! let master = router.with_master();
//! master.execute("SELECT balance FROM account WHERE id = 1").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod error;
pub mod instrumentation;
pub mod options;
pub mod retry;
pub mod router;
pub mod selector;
pub mod statement;

pub use catalog::{Catalog, Column, SchemaLoader, TableSchema};
pub use classifier::{DEFAULT_MASTER_VERBS, RoutingHint, StatementClassifier};
pub use config::{ConnectionDescriptor, RouterConfig};
pub use connection::{Connection, ConnectionFactory, Engine, EngineHandle};
pub use error::{ConnectionError, Result, RouterError};
pub use options::{CallOptions, PoolDirective};
pub use retry::{CallIdentity, RetryPolicy};
pub use router::{ExecutionRouter, RoutedSession, RouterBuilder, RoutingContext};
pub use selector::{EngineSelector, PoolKind};
pub use statement::{QueryResult, Statement, Value};
