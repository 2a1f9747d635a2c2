//! # replica-router-testing
//!
//! Test infrastructure for the replica router.
//!
//! This crate provides scripted in-memory connections so routing and retry
//! behaviour can be tested without a database.
//!
//! ## Features
//!
//! - [`MockFactory`] hands out connections to named [`MockServer`]s
//! - Per-server scripts of outcomes (success, disconnect, query error)
//! - Simulated latency, honouring per-call deadlines
//! - Counters for executions, connects and closes
//! - Fixtures for descriptors, tables and router construction
//!
//! ## Example
//!
//! ```rust,ignore
//! use replica_router_testing::{MockFactory, MockOutcome, fixtures};
//!
//! #[tokio::test]
//! async fn test_recovers_from_disconnect() {
//!     let factory = MockFactory::new();
//!     factory.server("mock://master-1").fail_next(2, MockOutcome::Disconnect);
//!
//!     let router = fixtures::router(&factory, 1, 0, RouterConfig::new().max_retries(3))
//!         .await
//!         .unwrap();
//!     let result = router.with_master().execute("SELECT 1").await.unwrap();
//!     assert_eq!(fixtures::served_by(&result), Some("mock://master-1"));
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;

pub use mock::{MockConnection, MockFactory, MockOutcome, MockServer};
