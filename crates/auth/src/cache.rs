//! Whole-snapshot read-through caches.
//!
//! Each cache holds exactly one immutable snapshot. A miss runs the loader
//! once (concurrent readers wait on the same load), a failed load is not
//! cached, and [`Invalidate::invalidate`] drops the snapshot so the next read
//! reloads it in full.

use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;
use tracing::debug;

/// Something a scheduler can clear on a timer.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self);
}

/// Read-through cache of a single snapshot value.
#[derive(Clone)]
pub struct SnapshotCache<T> {
    name: &'static str,
    inner: Cache<(), Arc<T>>,
}

impl<T> core::fmt::Debug for SnapshotCache<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> SnapshotCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Cache::builder().build(),
        }
    }

    /// Return the cached snapshot, loading it if absent.
    ///
    /// Errors are returned to every waiter of the failed load and nothing is
    /// stored, so the next call retries.
    pub async fn get_or_load<E, F, Fut>(&self, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Clone + Send + Sync + 'static,
    {
        let name = self.name;
        self.inner
            .try_get_with((), async move {
                debug!(cache = name, "loading snapshot");
                load().await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<E>| (*e).clone())
    }
}

impl<T: Send + Sync + 'static> Invalidate for SnapshotCache<T> {
    fn invalidate(&self) {
        self.inner.invalidate_all();
        debug!(cache = self.name, "snapshot invalidated");
    }
}
