//! Call-site marshaling between host functions and guest memory.
//!
//! A [`CallSite`] is built for every host function invocation. It exposes
//! the guest's arguments and a bounds-checked view of its linear memory;
//! nothing in here dereferences a guest pointer without checking it against
//! the memory's current length first.

use wasmtime::{Caller, Extern, Val};

use crate::engine::SandboxState;
use crate::error::HostCallError;
use crate::signature::ValKind;

/// Returned to the guest when a host call fails recoverably.
pub const SENTINEL: u32 = 0xffff;

type HostResult<T> = std::result::Result<T, HostCallError>;

/// Bounds-checked view of guest linear memory.
pub struct GuestMemory<'a> {
    data: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn range(&self, offset: u32, len: u32) -> HostResult<std::ops::Range<usize>> {
        let start = offset as usize;
        start
            .checked_add(len as usize)
            .filter(|end| *end <= self.data.len())
            .map(|end| start..end)
            .ok_or(HostCallError::OutOfBounds {
                offset: offset as u64,
                len: len as u64,
            })
    }

    /// Borrow `len` bytes at `offset`.
    pub fn slice(&self, offset: u32, len: u32) -> HostResult<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.data[range])
    }

    /// Mutably borrow `len` bytes at `offset`.
    pub fn slice_mut(&mut self, offset: u32, len: u32) -> HostResult<&mut [u8]> {
        let range = self.range(offset, len)?;
        Ok(&mut self.data[range])
    }

    /// Borrow a UTF-8 string.
    pub fn str(&self, offset: u32, len: u32) -> HostResult<&str> {
        std::str::from_utf8(self.slice(offset, len)?).map_err(HostCallError::recoverable)
    }

    pub fn read_u32(&self, offset: u32) -> HostResult<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.slice(offset, 4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> HostResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| HostCallError::OutOfBounds {
            offset: offset as u64,
            len: bytes.len() as u64,
        })?;
        self.slice_mut(offset, len)?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, offset: u32, value: u8) -> HostResult<()> {
        self.write(offset, &[value])
    }

    pub fn write_u16(&mut self, offset: u32, value: u16) -> HostResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, offset: u32, value: u32) -> HostResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, offset: u32, value: u64) -> HostResult<()> {
        self.write(offset, &value.to_le_bytes())
    }
}

/// One host function invocation: its arguments, the guest's memory and the
/// sandbox state.
pub struct CallSite<'a> {
    params: &'a [Val],
    memory: GuestMemory<'a>,
    state: &'a mut SandboxState,
}

impl<'a> CallSite<'a> {
    pub fn new(params: &'a [Val], memory: GuestMemory<'a>, state: &'a mut SandboxState) -> Self {
        Self {
            params,
            memory,
            state,
        }
    }

    fn param(&self, index: usize) -> HostResult<&Val> {
        self.params.get(index).ok_or_else(|| {
            HostCallError::Fatal(wasmtime::Error::msg(format!(
                "missing host call argument {}",
                index
            )))
        })
    }

    /// An i32 argument reinterpreted as unsigned.
    pub fn param_u32(&self, index: usize) -> HostResult<u32> {
        match self.param(index)? {
            Val::I32(v) => Ok(*v as u32),
            other => Err(HostCallError::Fatal(wasmtime::Error::msg(format!(
                "argument {} is {:?}, expected i32",
                index, other
            )))),
        }
    }

    pub fn param_i32(&self, index: usize) -> HostResult<i32> {
        self.param_u32(index).map(|v| v as i32)
    }

    /// An i64 argument reinterpreted as unsigned.
    pub fn param_u64(&self, index: usize) -> HostResult<u64> {
        match self.param(index)? {
            Val::I64(v) => Ok(*v as u64),
            other => Err(HostCallError::Fatal(wasmtime::Error::msg(format!(
                "argument {} is {:?}, expected i64",
                index, other
            )))),
        }
    }

    /// A guest pointer argument, checked to lie inside guest memory.
    pub fn param_pointer(&self, index: usize) -> HostResult<u32> {
        let offset = self.param_u32(index)?;
        self.memory.range(offset, 0)?;
        Ok(offset)
    }

    /// The bytes named by a pointer and length argument pair, without copying.
    pub fn param_byte_buffer(&self, addr_index: usize, len_index: usize) -> HostResult<&[u8]> {
        let offset = self.param_u32(addr_index)?;
        let len = self.param_u32(len_index)?;
        self.memory.slice(offset, len)
    }

    /// Like [`param_byte_buffer`](Self::param_byte_buffer), as UTF-8.
    pub fn param_string(&self, addr_index: usize, len_index: usize) -> HostResult<&str> {
        let offset = self.param_u32(addr_index)?;
        let len = self.param_u32(len_index)?;
        self.memory.str(offset, len)
    }

    /// Every argument as i32, for forwarding to another guest.
    pub fn params_i32(&self) -> HostResult<Vec<i32>> {
        (0..self.params.len()).map(|i| self.param_i32(i)).collect()
    }

    pub fn memory(&self) -> &GuestMemory<'a> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut GuestMemory<'a> {
        &mut self.memory
    }

    pub fn state(&self) -> &SandboxState {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut SandboxState {
        &mut *self.state
    }

    /// Borrow memory and state at the same time.
    pub fn split(&mut self) -> (&mut GuestMemory<'a>, &mut SandboxState) {
        (&mut self.memory, &mut *self.state)
    }
}

/// Adapt a handler into a wasmtime host function.
///
/// Recoverable failures are logged and turned into [`SENTINEL`]; fatal ones
/// trap the guest.
pub(crate) fn host_func<F>(
    module: String,
    name: String,
    result: Option<ValKind>,
    handler: F,
) -> impl Fn(Caller<'_, SandboxState>, &[Val], &mut [Val]) -> wasmtime::Result<()>
       + Send
       + Sync
       + 'static
where
    F: Fn(&mut CallSite<'_>) -> HostResult<u32> + Send + Sync + 'static,
{
    move |mut caller: Caller<'_, SandboxState>, params: &[Val], results: &mut [Val]| {
        let memory = caller.get_export("memory").and_then(Extern::into_memory);
        let (memory, state): (&mut [u8], &mut SandboxState) = match memory {
            Some(memory) => memory.data_and_store_mut(&mut caller),
            None => (Default::default(), caller.data_mut()),
        };

        let trace = state.invocation().trace;
        let mut site = CallSite::new(params, GuestMemory::new(memory), state);
        let value = match handler(&mut site) {
            Ok(value) => value,
            Err(HostCallError::Fatal(error)) => return Err(error),
            Err(error) => {
                tracing::warn!(module = %module, name = %name, error = %error, "host call failed");
                SENTINEL
            }
        };

        if trace {
            tracing::info!(module = %module, name = %name, value, "host call");
        } else {
            tracing::trace!(module = %module, name = %name, value, "host call");
        }

        if let (Some(kind), Some(slot)) = (result, results.first_mut()) {
            *slot = match kind {
                ValKind::I64 => Val::I64(value as i64),
                _ => Val::I32(value as i32),
            };
        }
        Ok(())
    }
}
