//! Master and replica pools with random selection.
//!
//! Each pool sits behind its own `RwLock`. Selection clones an `Arc` under a
//! read lock; replacement swaps one slot under a write lock. Neither lock is
//! held across an `.await`, so callers see either the old or the new handle
//! for a slot and never anything in between.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::connection::EngineHandle;
use crate::error::RouterError;

/// Pool a call is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Writable primaries.
    Master,
    /// Read-only secondaries.
    Replica,
    /// Union of both pools.
    Any,
}

impl PoolKind {
    /// Lowercase name used in logs and errors.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Replica => "replica",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the master and replica pools.
#[derive(Debug, Default)]
pub struct EngineSelector {
    masters: RwLock<Vec<EngineHandle>>,
    replicas: RwLock<Vec<EngineHandle>>,
}

impl EngineSelector {
    /// Create a selector over the given pools.
    #[must_use]
    pub fn new(masters: Vec<EngineHandle>, replicas: Vec<EngineHandle>) -> Self {
        Self {
            masters: RwLock::new(masters),
            replicas: RwLock::new(replicas),
        }
    }

    /// Pick a master uniformly at random.
    pub fn get_master(&self) -> Result<EngineHandle, RouterError> {
        pick(&self.masters.read()).ok_or(RouterError::PoolExhausted {
            pool: PoolKind::Master,
        })
    }

    /// Pick a replica uniformly at random.
    pub fn get_replica(&self) -> Result<EngineHandle, RouterError> {
        pick(&self.replicas.read()).ok_or(RouterError::PoolExhausted {
            pool: PoolKind::Replica,
        })
    }

    /// Pick uniformly at random from the union of both pools.
    pub fn get_any(&self) -> Result<EngineHandle, RouterError> {
        let masters = self.masters.read();
        let replicas = self.replicas.read();
        let total = masters.len() + replicas.len();
        if total == 0 {
            return Err(RouterError::PoolExhausted {
                pool: PoolKind::Any,
            });
        }

        let idx = rand::thread_rng().gen_range(0..total);
        let engine = match masters.get(idx) {
            Some(engine) => engine,
            None => &replicas[idx - masters.len()],
        };
        Ok(Arc::clone(engine))
    }

    /// Pick from the pool named by `kind`.
    pub fn get(&self, kind: PoolKind) -> Result<EngineHandle, RouterError> {
        let engine = match kind {
            PoolKind::Master => self.get_master(),
            PoolKind::Replica => self.get_replica(),
            PoolKind::Any => self.get_any(),
        }?;
        tracing::trace!(pool = %kind, slot = engine.slot(), "engine selected");
        Ok(engine)
    }

    /// Swap the slot holding `old` for `new`.
    ///
    /// `PoolKind::Any` searches masters first, then replicas. Returns
    /// `false` without touching the pools when `old` is no longer present,
    /// which happens when a concurrent caller already refreshed the slot.
    pub fn replace(&self, kind: PoolKind, old: &EngineHandle, new: EngineHandle) -> bool {
        let replaced = match kind {
            PoolKind::Master => swap(&self.masters, old, new),
            PoolKind::Replica => swap(&self.replicas, old, new),
            PoolKind::Any => match swap(&self.masters, old, new) {
                Ok(()) => Ok(()),
                Err(new) => swap(&self.replicas, old, new),
            },
        }
        .is_ok();

        if replaced {
            tracing::trace!(pool = %kind, slot = old.slot(), "engine slot replaced");
        } else {
            tracing::trace!(pool = %kind, slot = old.slot(), "engine slot already replaced");
        }
        replaced
    }

    /// Handle currently occupying `slot`.
    ///
    /// `PoolKind::Any` searches masters first, then replicas.
    #[must_use]
    pub fn slot(&self, kind: PoolKind, slot: u64) -> Option<EngineHandle> {
        match kind {
            PoolKind::Master => find_slot(&self.masters, slot),
            PoolKind::Replica => find_slot(&self.replicas, slot),
            PoolKind::Any => {
                find_slot(&self.masters, slot).or_else(|| find_slot(&self.replicas, slot))
            }
        }
    }

    /// Number of masters.
    #[must_use]
    pub fn master_count(&self) -> usize {
        self.masters.read().len()
    }

    /// Number of replicas.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    /// Handles currently in the pool named by `kind`.
    #[must_use]
    pub fn snapshot(&self, kind: PoolKind) -> Vec<EngineHandle> {
        match kind {
            PoolKind::Master => self.masters.read().clone(),
            PoolKind::Replica => self.replicas.read().clone(),
            PoolKind::Any => {
                let mut all = self.masters.read().clone();
                all.extend(self.replicas.read().iter().cloned());
                all
            }
        }
    }
}

fn pick(pool: &[EngineHandle]) -> Option<EngineHandle> {
    if pool.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..pool.len());
    Some(Arc::clone(&pool[idx]))
}

fn find_slot(pool: &RwLock<Vec<EngineHandle>>, slot: u64) -> Option<EngineHandle> {
    pool.read().iter().find(|engine| engine.slot() == slot).cloned()
}

/// Swap `old` for `new`, handing `new` back if `old` is absent.
fn swap(
    pool: &RwLock<Vec<EngineHandle>>,
    old: &EngineHandle,
    new: EngineHandle,
) -> Result<(), EngineHandle> {
    let mut pool = pool.write();
    match pool.iter_mut().find(|slot| Arc::ptr_eq(slot, old)) {
        Some(slot) => {
            *slot = new;
            Ok(())
        }
        None => Err(new),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::tests::{EchoFactory, engine};
    use std::collections::HashMap;

    async fn selector(masters: &[&str], replicas: &[&str]) -> (EngineSelector, EchoFactory) {
        let factory = EchoFactory::default();
        let mut slot = 0;
        let mut m = Vec::new();
        for url in masters {
            m.push(engine(slot, url, &factory).await);
            slot += 1;
        }
        let mut r = Vec::new();
        for url in replicas {
            r.push(engine(slot, url, &factory).await);
            slot += 1;
        }
        (EngineSelector::new(m, r), factory)
    }

    fn tally(selector: &EngineSelector, kind: PoolKind, n: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let engine = selector.get(kind).unwrap();
            *counts.entry(engine.descriptor().url.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[tokio::test]
    async fn test_empty_pools() {
        let (selector, _) = selector(&[], &[]).await;
        assert!(matches!(
            selector.get_master(),
            Err(RouterError::PoolExhausted { pool: PoolKind::Master })
        ));
        assert!(matches!(
            selector.get_replica(),
            Err(RouterError::PoolExhausted { pool: PoolKind::Replica })
        ));
        assert!(matches!(
            selector.get_any(),
            Err(RouterError::PoolExhausted { pool: PoolKind::Any })
        ));
    }

    #[tokio::test]
    async fn test_masters_only_any() {
        let (selector, _) = selector(&["m1"], &[]).await;
        assert!(selector.get_replica().is_err());
        assert_eq!(selector.get_any().unwrap().descriptor().url, "m1");
    }

    #[tokio::test]
    async fn test_get_any_is_uniform_over_union() {
        let (selector, _) = selector(&["m1"], &["r1", "r2"]).await;
        let counts = tally(&selector, PoolKind::Any, 3000);

        assert_eq!(counts.len(), 3);
        for url in ["m1", "r1", "r2"] {
            let n = counts[url];
            assert!((800..=1200).contains(&n), "{url} selected {n} times");
        }
    }

    #[tokio::test]
    async fn test_get_master_never_returns_replica() {
        let (selector, _) = selector(&["m1", "m2"], &["r1"]).await;
        let counts = tally(&selector, PoolKind::Master, 500);
        assert!(!counts.contains_key("r1"));
        assert!(counts["m1"] > 0 && counts["m2"] > 0);
    }

    #[tokio::test]
    async fn test_replace_swaps_slot() {
        let (selector, factory) = selector(&["m1"], &["r1"]).await;
        let old = selector.get_replica().unwrap();
        let fresh = old.reconnect(&factory).await.unwrap();

        assert!(selector.replace(PoolKind::Replica, &old, Arc::clone(&fresh)));
        let current = selector.snapshot(PoolKind::Replica);
        assert_eq!(current.len(), 1);
        assert!(Arc::ptr_eq(&current[0], &fresh));
        assert_eq!(selector.master_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_missing_is_noop() {
        let (selector, factory) = selector(&["m1"], &["r1"]).await;
        let old = selector.get_master().unwrap();
        let first = old.reconnect(&factory).await.unwrap();
        let second = old.reconnect(&factory).await.unwrap();

        assert!(selector.replace(PoolKind::Master, &old, Arc::clone(&first)));
        // racing caller refreshed the same slot
        assert!(!selector.replace(PoolKind::Master, &old, second));
        assert!(Arc::ptr_eq(&selector.get_master().unwrap(), &first));
    }

    #[tokio::test]
    async fn test_slot_lookup_follows_replacement() {
        let (selector, factory) = selector(&["m1"], &["r1"]).await;
        let old = selector.get_replica().unwrap();
        assert_eq!(old.slot(), 1);
        let fresh = old.reconnect(&factory).await.unwrap();
        assert!(selector.replace(PoolKind::Replica, &old, Arc::clone(&fresh)));

        assert!(Arc::ptr_eq(&selector.slot(PoolKind::Replica, 1).unwrap(), &fresh));
        assert!(Arc::ptr_eq(&selector.slot(PoolKind::Any, 1).unwrap(), &fresh));
        assert!(selector.slot(PoolKind::Master, 1).is_none());
        assert_eq!(selector.slot(PoolKind::Any, 0).unwrap().descriptor().url, "m1");
    }

    #[tokio::test]
    async fn test_replace_any_searches_both_pools() {
        let (selector, factory) = selector(&["m1"], &["r1"]).await;
        let old = selector.get_replica().unwrap();
        let fresh = old.reconnect(&factory).await.unwrap();

        assert!(selector.replace(PoolKind::Any, &old, Arc::clone(&fresh)));
        assert!(Arc::ptr_eq(&selector.get_replica().unwrap(), &fresh));
    }

    #[tokio::test]
    async fn test_concurrent_replace_and_select() {
        let (selector, factory) = selector(&["m1", "m2"], &["r1", "r2"]).await;
        let selector = Arc::new(selector);
        let mut handles = Vec::new();

        for _ in 0..8 {
            let selector = Arc::clone(&selector);
            let fresh = selector.get_any().unwrap().reconnect(&factory).await.unwrap();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let old = selector.get_any().unwrap();
                    selector.replace(PoolKind::Any, &old, Arc::clone(&fresh));
                    assert_eq!(selector.snapshot(PoolKind::Any).len(), 4);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(selector.master_count(), 2);
        assert_eq!(selector.replica_count(), 2);
    }
}
