use foldhash::fast::RandomState;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::CallHandle;

/// In-flight calls of a server, keyed by call id.
///
/// Lets the server cancel a single call, or every call on shutdown.
#[derive(Default)]
pub struct CallRegistry {
    index: AtomicU64,
    calls: dashmap::DashMap<u64, CallHandle, RandomState>,
}

/// RAII registration of one call.
///
/// Dropping it removes the call from the registry, so finished calls never
/// linger there.
pub struct CallRegistration {
    registry: Arc<CallRegistry>,
    call_id: u64,
}

impl CallRegistration {
    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }
}

impl Drop for CallRegistration {
    fn drop(&mut self) {
        self.registry.calls.remove(&self.call_id);
    }
}

impl CallRegistry {
    /// Allocates a call id and tracks `handle` under it.
    pub fn register(self: &Arc<Self>, handle: CallHandle) -> CallRegistration {
        let call_id = self.index.fetch_add(1, Ordering::SeqCst);
        self.calls.insert(call_id, handle);
        CallRegistration {
            registry: self.clone(),
            call_id,
        }
    }

    /// Cancels the call with `call_id`. Returns `false` if it is not running.
    pub fn cancel(&self, call_id: u64) -> bool {
        match self.calls.get(&call_id) {
            Some(handle) => handle.cancel(),
            None => {
                tracing::warn!("cancel of unknown call {}", call_id);
                false
            }
        }
    }

    /// Cancels every in-flight call and returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let handles = self
            .calls
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        handles.into_iter().filter(CallHandle::cancel).count()
    }

    #[must_use]
    pub fn contains(&self, call_id: u64) -> bool {
        self.calls.contains_key(&call_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("in_flight", &self.calls.len())
            .finish()
    }
}
