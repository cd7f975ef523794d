//! The exchange buffer capability set.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;

/// A duplex byte channel with string headers and an optional status code.
///
/// Every data transfer into or out of a sandbox goes through one of these.
/// Variants that cannot support an operation return
/// [`ExchangeError::Unsupported`](crate::ExchangeError::Unsupported) and log
/// the misuse instead of silently doing nothing.
pub trait ExchangeBuffer: Send {
    /// Short variant name used in logs and errors.
    fn kind(&self) -> &'static str;

    /// Look up a header value.
    fn header(&self, name: &str) -> Result<Option<String>>;

    /// Set a header, replacing any previous value.
    fn set_header(&mut self, name: &str, value: &str) -> Result<()>;

    /// Number of headers.
    fn headers_count(&self) -> Result<usize>;

    /// Visit every header.
    fn headers(&self, visit: &mut dyn FnMut(&str, &str)) -> Result<()>;

    /// The status code carried by the buffer.
    fn status_code(&self) -> Result<u16>;

    /// Set the status code.
    fn write_status_code(&mut self, status: u16) -> Result<()>;

    /// The readable content of the buffer.
    fn buffer(&mut self) -> Result<Vec<u8>>;

    /// Append bytes, returning the number written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Close the buffer's transport, if it owns one.
    fn close(&mut self) -> Result<()>;
}

/// A registered buffer, shared between the registry and its current user.
pub type SharedBuffer = Arc<Mutex<Box<dyn ExchangeBuffer>>>;

/// Lock a shared buffer, recovering from a poisoned lock.
///
/// A panic in one host call must not make the buffer unusable for the
/// caller that reads the output afterwards.
pub fn lock_buffer(buffer: &SharedBuffer) -> MutexGuard<'_, Box<dyn ExchangeBuffer>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}
