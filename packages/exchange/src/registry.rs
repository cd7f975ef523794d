//! Handle-keyed registry of live exchange buffers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::buffer::{lock_buffer, ExchangeBuffer, SharedBuffer};
use crate::error::{ExchangeError, Result};
use crate::memory::MemoryExchangeBuffer;

/// Integer handle naming a registered buffer.
pub type BufferHandle = u32;

/// Counters describing registry usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Buffers created or registered since the registry was built.
    pub created: u64,
    /// Buffers released.
    pub released: u64,
    /// Buffers currently live. Anything never released stays here.
    pub live: usize,
}

struct Inner {
    next: BufferHandle,
    buffers: HashMap<BufferHandle, SharedBuffer>,
    created: u64,
    released: u64,
}

/// Registry of exchange buffers, keyed by handle.
///
/// All operations serialize through one lock and are O(1). There is no
/// garbage collection: a buffer lives until [`release`](Self::release) is
/// called for its handle.
pub struct ExchangeRegistry {
    inner: Mutex<Inner>,
}

impl ExchangeRegistry {
    /// Create an empty registry. Handles start at 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: 1,
                buffers: HashMap::new(),
                created: 0,
                released: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh in-memory buffer.
    pub fn create(&self) -> BufferHandle {
        self.register(MemoryExchangeBuffer::new())
    }

    /// Register an externally supplied buffer.
    pub fn register<B: ExchangeBuffer + 'static>(&self, buffer: B) -> BufferHandle {
        self.register_boxed(Box::new(buffer))
    }

    /// Register an already boxed buffer.
    pub fn register_boxed(&self, buffer: Box<dyn ExchangeBuffer>) -> BufferHandle {
        let kind = buffer.kind();
        let mut inner = self.lock();

        // Skip zero and any handle still live after a wrap-around.
        let handle = loop {
            let candidate = inner.next;
            inner.next = inner.next.checked_add(1).unwrap_or(1);
            if candidate != 0 && !inner.buffers.contains_key(&candidate) {
                break candidate;
            }
        };

        inner.buffers.insert(handle, Arc::new(Mutex::new(buffer)));
        inner.created += 1;
        tracing::debug!(handle, kind, "registered exchange buffer");
        handle
    }

    /// Look up a buffer.
    ///
    /// `None` means the handle is unknown or released; callers log it rather
    /// than treating it as an empty buffer.
    pub fn get(&self, handle: BufferHandle) -> Option<SharedBuffer> {
        self.lock().buffers.get(&handle).cloned()
    }

    /// Run `f` against a live buffer, failing with
    /// [`ExchangeError::UnknownHandle`] if there is none.
    pub fn with_buffer<T>(
        &self,
        handle: BufferHandle,
        f: impl FnOnce(&mut dyn ExchangeBuffer) -> Result<T>,
    ) -> Result<T> {
        let buffer = self.get(handle).ok_or(ExchangeError::UnknownHandle(handle))?;
        let mut guard = lock_buffer(&buffer);
        f(guard.as_mut())
    }

    /// Remove a buffer. Releasing an unknown handle is a no-op that returns
    /// `false`.
    pub fn release(&self, handle: BufferHandle) -> bool {
        let mut inner = self.lock();
        if inner.buffers.remove(&handle).is_some() {
            inner.released += 1;
            tracing::debug!(handle, "released exchange buffer");
            true
        } else {
            tracing::debug!(handle, "release of unknown exchange buffer");
            false
        }
    }

    /// Number of live buffers.
    pub fn live_count(&self) -> usize {
        self.lock().buffers.len()
    }

    /// Usage counters.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.lock();
        RegistryStats {
            created: inner.created,
            released: inner.released,
            live: inner.buffers.len(),
        }
    }
}

impl Default for ExchangeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
