//! Exclusive access to the adapter.
//!
//! Platforms with a single radio cannot scan, connect and listen at the
//! same time. Every session operation goes through a [`Radio`] guard so
//! those operations never overlap.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// A stack shared behind an async lock.
pub struct Radio<S: ?Sized> {
    lock: Mutex<()>,
    stack: Arc<S>,
}

impl<S: ?Sized> Radio<S> {
    /// Wrap a stack.
    pub fn new(stack: Arc<S>) -> Self {
        Self {
            lock: Mutex::new(()),
            stack,
        }
    }

    /// Wait for exclusive use of the stack.
    pub async fn exclusive(&self) -> RadioGuard<'_, S> {
        let guard = self.lock.lock().await;
        trace!("Radio acquired");
        RadioGuard {
            _guard: guard,
            stack: &*self.stack,
        }
    }

    /// Take exclusive use of the stack if nobody else holds it.
    pub fn try_exclusive(&self) -> Option<RadioGuard<'_, S>> {
        let guard = self.lock.try_lock().ok()?;
        Some(RadioGuard {
            _guard: guard,
            stack: &*self.stack,
        })
    }
}

/// Exclusive use of a stack; released on drop.
pub struct RadioGuard<'a, S: ?Sized> {
    _guard: MutexGuard<'a, ()>,
    stack: &'a S,
}

impl<S: ?Sized> Deref for RadioGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.stack
    }
}

impl<S: ?Sized> Drop for RadioGuard<'_, S> {
    fn drop(&mut self) {
        trace!("Radio released");
    }
}
