//! Concurrent routed calls sharing one router.
//!
//! ```bash
//! cargo test -p replica-router-testing --test concurrency
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use replica_router::{CallOptions, PoolKind, RouterConfig};
use replica_router_testing::fixtures::{
    self, generation_of, master_address, replica_address, served_by,
};
use replica_router_testing::{MockFactory, MockOutcome};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_directives_do_not_cross() {
    let factory = MockFactory::new();
    let router = Arc::new(
        fixtures::router(&factory, 1, 2, RouterConfig::new().auto_allocation(true))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..50 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let (sql, options, expect_master) = match i % 3 {
                0 => ("UPDATE t SET x = 1", CallOptions::new(), true),
                1 => ("SELECT 1", CallOptions::new().master(), true),
                _ => ("SELECT 1", CallOptions::new().replica(), false),
            };
            tokio::task::yield_now().await;
            let result = router.execute_with(sql, options).await.unwrap();
            (expect_master, served_by(&result).unwrap().to_string())
        }));
    }

    for handle in handles {
        let (expect_master, server) = handle.await.unwrap();
        if expect_master {
            assert_eq!(server, master_address(1));
        } else {
            assert!(
                server == replica_address(1) || server == replica_address(2),
                "replica call served by {server}"
            );
        }
    }
    assert_eq!(router.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_keep_their_pool() {
    let factory = MockFactory::new();
    let router = Arc::new(
        fixtures::router(&factory, 1, 1, RouterConfig::new())
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..40 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let session = if i % 2 == 0 {
                router.with_master()
            } else {
                router.with_replica()
            };
            let mut seen = Vec::new();
            for _ in 0..5 {
                let result = session.execute("SELECT 1").await.unwrap();
                seen.push(served_by(&result).unwrap().to_string());
                tokio::task::yield_now().await;
            }
            (i, seen)
        }));
    }

    for handle in handles {
        let (i, seen) = handle.await.unwrap();
        let expected = if i % 2 == 0 {
            master_address(1)
        } else {
            replica_address(1)
        };
        assert!(seen.iter().all(|s| *s == expected), "{i}: {seen:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconnects_on_one_slot() {
    let factory = MockFactory::new();
    let master = factory.server(&master_address(1));
    master.fail_next(8, MockOutcome::Disconnect);
    let router = Arc::new(
        fixtures::router(
            &factory,
            1,
            0,
            RouterConfig::new().auto_allocation(true).max_retries(10),
        )
        .await
        .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            router.execute("UPDATE t SET x = 1").await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(generation_of(&result).is_some());
    }

    // every call eventually landed on some generation of the one slot
    let engines = router.selector().snapshot(PoolKind::Master);
    assert_eq!(engines.len(), 1);
    assert_eq!(engines[0].slot(), 0);
    assert!(engines[0].generation() >= 1);
    assert_eq!(master.executions(), 16);
    assert_eq!(router.in_flight(), 0);

    // every connection except the published one was closed exactly once,
    // whether it was displaced or lost the race to publish
    assert_eq!(master.connects() - 1, master.closes());
}
