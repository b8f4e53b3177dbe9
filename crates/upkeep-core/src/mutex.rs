//! Named async exclusion locks.
//!
//! Plugins serialize access to shared system resources (dpkg's lock, the
//! network, a GUI application) through named mutexes. Locks are interned
//! on first use and never removed; waiters for a given name are served in
//! FIFO order by the underlying `tokio::sync::Mutex`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum MutexError {
    /// The registry's internal lock table was poisoned by a panic. This
    /// is fatal; the run must abort.
    #[error("mutex registry poisoned")]
    Poisoned,
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, MutexError>;

/// A guard holding one or more named locks. All names are released when
/// the guard drops.
#[derive(Debug)]
pub struct NamedGuard {
    held: Vec<(String, OwnedMutexGuard<()>)>,
}

impl NamedGuard {
    /// Names held by this guard, in acquisition (sorted) order.
    pub fn names(&self) -> Vec<&str> {
        self.held.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Global registry of named async exclusion locks.
#[derive(Debug, Default)]
pub struct MutexRegistry {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl MutexRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or intern the lock for a name.
    fn entry(&self, name: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| MutexError::Poisoned)?;
        Ok(Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        ))
    }

    /// Acquire all of the given names, waiting as needed.
    ///
    /// Names are sorted and deduplicated before locking so that any two
    /// acquires take locks in the same global order, which rules out
    /// deadlock between them.
    pub async fn acquire<S: AsRef<str>>(&self, names: &[S]) -> Result<NamedGuard> {
        let mut sorted: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut held = Vec::with_capacity(sorted.len());
        for name in sorted {
            let lock = self.entry(name)?;
            let guard = lock.lock_owned().await;
            held.push((name.to_string(), guard));
        }
        Ok(NamedGuard { held })
    }

    /// Acquire all of the given names without waiting.
    ///
    /// Returns `Ok(None)` if any name is currently held; in that case no
    /// locks remain held on return.
    pub fn try_acquire<S: AsRef<str>>(&self, names: &[S]) -> Result<Option<NamedGuard>> {
        let mut sorted: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut held = Vec::with_capacity(sorted.len());
        for name in sorted {
            let lock = self.entry(name)?;
            match lock.try_lock_owned() {
                Ok(guard) => held.push((name.to_string(), guard)),
                Err(_) => return Ok(None),
            }
        }
        Ok(Some(NamedGuard { held }))
    }

    /// Whether a name is currently held by some guard.
    pub fn is_held(&self, name: &str) -> Result<bool> {
        let lock = self.entry(name)?;
        match lock.try_lock() {
            Ok(_guard) => Ok(false),
            Err(_) => Ok(true),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn exclusion_single_name() {
        let registry = MutexRegistry::new();
        let guard = registry.acquire(&["pkgmgr:apt"]).await.unwrap();
        assert!(registry.is_held("pkgmgr:apt").unwrap());
        assert!(registry.try_acquire(&["pkgmgr:apt"]).unwrap().is_none());
        drop(guard);
        assert!(!registry.is_held("pkgmgr:apt").unwrap());
    }

    #[tokio::test]
    async fn multi_name_acquire_sorts_and_dedups() {
        let registry = MutexRegistry::new();
        let guard = registry
            .acquire(&["pkgmgr:dpkg", "pkgmgr:apt", "pkgmgr:apt"])
            .await
            .unwrap();
        assert_eq!(guard.names(), vec!["pkgmgr:apt", "pkgmgr:dpkg"]);
    }

    #[tokio::test]
    async fn try_acquire_releases_partial_holds_on_contention() {
        let registry = MutexRegistry::new();
        let _blocker = registry.acquire(&["b"]).await.unwrap();
        // "a" sorts before "b": a is taken first, then b fails, and a
        // must be released again.
        assert!(registry.try_acquire(&["a", "b"]).unwrap().is_none());
        assert!(!registry.is_held("a").unwrap());
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_order() {
        let registry = Arc::new(MutexRegistry::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let first = registry.acquire(&["m"]).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..4u32 {
            let registry = Arc::clone(&registry);
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = registry.acquire(&["m"]).await.unwrap();
                tx.send(i).unwrap();
            }));
            // Give each waiter time to join the queue before the next.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(first);
        for task in tasks {
            task.await.unwrap();
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(i) = rx.recv().await {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn independent_names_do_not_contend() {
        let registry = MutexRegistry::new();
        let _apt = registry.acquire(&["pkgmgr:apt"]).await.unwrap();
        let snap = registry.try_acquire(&["pkgmgr:snap"]).unwrap();
        assert!(snap.is_some());
    }
}
