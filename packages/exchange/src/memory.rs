//! In-memory exchange buffers.

use std::collections::BTreeMap;

use crate::buffer::ExchangeBuffer;
use crate::error::Result;

/// Append-only byte buffer with a header map and a status code.
///
/// This is what [`ExchangeRegistry::create`](crate::ExchangeRegistry::create)
/// allocates. The status code starts at `200`.
#[derive(Debug, Clone)]
pub struct MemoryExchangeBuffer {
    headers: BTreeMap<String, String>,
    bytes: Vec<u8>,
    status: u16,
}

impl MemoryExchangeBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            headers: BTreeMap::new(),
            bytes: Vec::new(),
            status: 200,
        }
    }

    /// Create a buffer pre-loaded with content.
    pub fn with_content(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Self::new()
        }
    }

    /// Borrow the content without copying.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MemoryExchangeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeBuffer for MemoryExchangeBuffer {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn header(&self, name: &str) -> Result<Option<String>> {
        Ok(self.headers.get(name).cloned())
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.headers.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn headers_count(&self) -> Result<usize> {
        Ok(self.headers.len())
    }

    fn headers(&self, visit: &mut dyn FnMut(&str, &str)) -> Result<()> {
        for (name, value) in &self.headers {
            visit(name, value);
        }
        Ok(())
    }

    fn status_code(&self) -> Result<u16> {
        Ok(self.status)
    }

    fn write_status_code(&mut self, status: u16) -> Result<()> {
        self.status = status;
        Ok(())
    }

    fn buffer(&mut self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.bytes.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
