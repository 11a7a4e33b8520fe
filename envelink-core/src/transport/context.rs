//! Transport context: the inproc endpoint table plus a terminated flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::inproc::Binding;

/// Shared transport state. Cloning yields another handle to the same context.
///
/// A socket built without a context creates its own and shuts it down on drop;
/// a socket given a context only borrows it.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    terminated: AtomicBool,
    bindings: Mutex<HashMap<String, Arc<Binding>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Mark the context terminated and drop every inproc binding. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut bindings = self.inner.bindings.lock();
            let n = bindings.len();
            bindings.clear();
            n
        };
        debug!(bindings = dropped, "context shut down");
    }

    /// Number of live inproc bindings.
    pub fn bound_endpoints(&self) -> usize {
        self.inner.bindings.lock().len()
    }

    /// Whether two handles refer to the same context.
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `binding` under `name`. Fails if the name is taken or the context is terminated.
    pub(super) fn bind(&self, name: &str, binding: Arc<Binding>) -> bool {
        if self.is_terminated() {
            return false;
        }
        let mut bindings = self.inner.bindings.lock();
        if bindings.contains_key(name) {
            return false;
        }
        bindings.insert(name.to_string(), binding);
        true
    }

    pub(super) fn lookup(&self, name: &str) -> Option<Arc<Binding>> {
        self.inner.bindings.lock().get(name).cloned()
    }

    /// Remove `name` if it still maps to `binding`.
    pub(super) fn unbind(&self, name: &str, binding: &Arc<Binding>) {
        let mut bindings = self.inner.bindings.lock();
        if bindings.get(name).is_some_and(|b| Arc::ptr_eq(b, binding)) {
            bindings.remove(name);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("terminated", &self.is_terminated())
            .field("bound_endpoints", &self.bound_endpoints())
            .finish()
    }
}
