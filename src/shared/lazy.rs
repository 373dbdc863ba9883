//! Single-flight lazy initialization
//!
//! [`LazyShared`] holds a value that is expensive to construct and must exist
//! at most once. It moves through three states: uninitialized, initializing
//! (one construction in flight, any number of waiters awaiting the same
//! shared future) and ready. A failed construction returns the cell to
//! uninitialized so the next caller retries. A reset while initializing hands
//! the in-flight future back to the caller and makes current waiters fail
//! with [`InitError::Reset`].

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// In-flight construction shared by every waiter
pub type InitFuture<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, E>>>;

/// Observable state of the cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Why a caller did not get a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitError<E> {
    /// Construction failed; the cell is uninitialized again
    Failed(E),
    /// The cell was reset while this caller was waiting
    Reset,
}

/// What a reset took out of the cell
pub enum Released<T, E> {
    Nothing,
    Ready(Arc<T>),
    Initializing(InitFuture<T, E>),
}

enum Slot<T, E> {
    Uninitialized,
    Initializing(InitFuture<T, E>),
    Ready(Arc<T>),
}

/// A lazily constructed, shared, resettable value
pub struct LazyShared<T, E> {
    slot: Mutex<Slot<T, E>>,
}

impl<T, E> Default for LazyShared<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> LazyShared<T, E> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Uninitialized),
        }
    }

    pub fn state(&self) -> LazyState {
        match &*self.slot.lock() {
            Slot::Uninitialized => LazyState::Uninitialized,
            Slot::Initializing(_) => LazyState::Initializing,
            Slot::Ready(_) => LazyState::Ready,
        }
    }

    /// The value if construction has completed
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.slot.lock() {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Empty the cell, returning whatever it held
    pub fn reset(&self) -> Released<T, E> {
        match std::mem::replace(&mut *self.slot.lock(), Slot::Uninitialized) {
            Slot::Uninitialized => Released::Nothing,
            Slot::Initializing(future) => Released::Initializing(future),
            Slot::Ready(value) => Released::Ready(value),
        }
    }
}

impl<T, E> LazyShared<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Return the value, constructing it with `init` if nobody has yet
    ///
    /// `init` is only called when the cell is uninitialized. Concurrent
    /// callers await the construction started by the first one.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<T>, InitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let future = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Initializing(future) => future.clone(),
                Slot::Uninitialized => {
                    let future = init().map(|r| r.map(Arc::new)).boxed().shared();
                    *slot = Slot::Initializing(future.clone());
                    future
                }
            }
        };

        let result = future.clone().await;

        let mut slot = self.slot.lock();
        let current = match &*slot {
            Slot::Initializing(active) => active.ptr_eq(&future),
            Slot::Ready(value) => {
                // Only a waiter of the construction that produced `value` may return it
                return match result {
                    Ok(ours) if Arc::ptr_eq(&ours, value) => Ok(ours),
                    _ => Err(InitError::Reset),
                };
            }
            Slot::Uninitialized => false,
        };

        if !current {
            return Err(InitError::Reset);
        }

        match result {
            Ok(value) => {
                *slot = Slot::Ready(value.clone());
                Ok(value)
            }
            Err(e) => {
                *slot = Slot::Uninitialized;
                Err(InitError::Failed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_construction() {
        let cell: Arc<LazyShared<String, String>> = Arc::new(LazyShared::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |cell: Arc<LazyShared<String, String>>, calls: Arc<AtomicUsize>| async move {
            cell.get_or_try_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, String>("engine".to_string())
                }
            })
            .await
        };

        let (a, b) = tokio::join!(
            make(cell.clone(), calls.clone()),
            make(cell.clone(), calls.clone())
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cell.state(), LazyState::Ready);
    }

    #[tokio::test]
    async fn test_failure_allows_retry() {
        let cell: LazyShared<u32, String> = LazyShared::new();

        let first = cell
            .get_or_try_init(|| async { Err::<u32, _>("boom".to_string()) })
            .await;
        assert_eq!(first, Err(InitError::Failed("boom".to_string())));
        assert_eq!(cell.state(), LazyState::Uninitialized);

        let second = cell.get_or_try_init(|| async { Ok::<_, String>(7) }).await.unwrap();
        assert_eq!(*second, 7);
        assert_eq!(cell.get().map(|v| *v), Some(7));
    }

    #[tokio::test]
    async fn test_reset_while_initializing_discards_result() {
        let cell: Arc<LazyShared<u32, String>> = Arc::new(LazyShared::new());

        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move {
                cell.get_or_try_init(|| async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok::<_, String>(1)
                })
                .await
            })
        };

        // Let the waiter start the construction
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cell.state(), LazyState::Initializing);

        let released = cell.reset();
        let orphan = match released {
            Released::Initializing(future) => future,
            _ => panic!("expected an in-flight construction"),
        };

        assert_eq!(waiter.await.unwrap(), Err(InitError::Reset));
        assert_eq!(*orphan.await.unwrap(), 1);
        assert_eq!(cell.state(), LazyState::Uninitialized);
    }

    #[tokio::test]
    async fn test_orphaned_waiter_fails_after_newer_construction() {
        let cell: Arc<LazyShared<u32, String>> = Arc::new(LazyShared::new());

        let old_waiter = {
            let cell = cell.clone();
            tokio::spawn(async move {
                cell.get_or_try_init(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(1)
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(cell.reset(), Released::Initializing(_)));

        let fresh = cell.get_or_try_init(|| async { Ok::<_, String>(2) }).await.unwrap();
        assert_eq!(*fresh, 2);

        assert_eq!(old_waiter.await.unwrap(), Err(InitError::Reset));
        assert_eq!(cell.get().map(|v| *v), Some(2));
    }

    #[tokio::test]
    async fn test_reset_ready_returns_value() {
        let cell: LazyShared<u32, String> = LazyShared::new();
        cell.get_or_try_init(|| async { Ok::<_, String>(3) }).await.unwrap();

        match cell.reset() {
            Released::Ready(value) => assert_eq!(*value, 3),
            _ => panic!("expected a ready value"),
        }
        assert!(cell.get().is_none());
    }
}
