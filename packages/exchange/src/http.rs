//! Exchange buffers backed by an HTTP exchange.
//!
//! - [`RequestExchangeBuffer`] wraps an inbound request: the body is drained
//!   once, lazily, on the first read.
//! - [`ResponseExchangeBuffer`] wraps an outbound response sink: it is
//!   write-only, and the sink owns its lifecycle.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};

use http::{HeaderName, HeaderValue, Method, Response, StatusCode, Uri};

use crate::buffer::ExchangeBuffer;
use crate::error::{unsupported, ExchangeError, Result};

/// Exchange buffer over an inbound HTTP request.
pub struct RequestExchangeBuffer {
    method: Method,
    uri: Uri,
    headers: BTreeMap<String, String>,
    body: Option<Box<dyn Read + Send>>,
}

impl RequestExchangeBuffer {
    const KIND: &'static str = "request";

    /// Wrap a request whose body is a blocking reader.
    ///
    /// Header names are lower-cased; a multi-valued header keeps its first
    /// value.
    pub fn new<B: Read + Send + 'static>(request: http::Request<B>) -> Self {
        let (parts, body) = request.into_parts();

        let mut headers = BTreeMap::new();
        for name in parts.headers.keys() {
            let mut values = parts.headers.get_all(name).iter();
            let Some(first) = values.next() else {
                continue;
            };
            if values.next().is_some() {
                tracing::warn!(header = %name, "multi-valued header, keeping the first value");
            }
            match first.to_str() {
                Ok(value) => {
                    headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
                }
                Err(_) => tracing::warn!(header = %name, "skipping non-text header value"),
            }
        }

        Self {
            method: parts.method,
            uri: parts.uri,
            headers,
            body: Some(Box::new(body)),
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl ExchangeBuffer for RequestExchangeBuffer {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn header(&self, name: &str) -> Result<Option<String>> {
        Ok(self.headers.get(&name.to_ascii_lowercase()).cloned())
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
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
        unsupported(Self::KIND, "status_code")
    }

    fn write_status_code(&mut self, _status: u16) -> Result<()> {
        unsupported(Self::KIND, "write_status_code")
    }

    fn buffer(&mut self) -> Result<Vec<u8>> {
        let Some(mut body) = self.body.take() else {
            tracing::debug!(method = %self.method, uri = %self.uri, "request body already drained");
            return Ok(Vec::new());
        };

        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).map_err(|e| {
            tracing::error!(method = %self.method, uri = %self.uri, error = %e, "cannot read request body");
            ExchangeError::Io(e)
        })?;
        Ok(bytes)
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<usize> {
        unsupported(Self::KIND, "write")
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Destination of an outbound HTTP response.
///
/// Implement this over whatever server framework accepts the connection.
pub trait ResponseSink: Send {
    /// Set a response header.
    fn set_header(&mut self, name: &str, value: &str) -> Result<()>;

    /// Read back a header previously set.
    fn header(&self, name: &str) -> Option<String>;

    /// Set the response status.
    fn set_status(&mut self, status: StatusCode) -> Result<()>;

    /// Stream body bytes to the client.
    fn write_body(&mut self, bytes: &[u8]) -> Result<usize>;
}

/// Write-only exchange buffer streaming into a [`ResponseSink`].
pub struct ResponseExchangeBuffer {
    sink: Box<dyn ResponseSink>,
}

impl ResponseExchangeBuffer {
    const KIND: &'static str = "response";

    /// Wrap a response sink.
    pub fn new<S: ResponseSink + 'static>(sink: S) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }
}

impl ExchangeBuffer for ResponseExchangeBuffer {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn header(&self, name: &str) -> Result<Option<String>> {
        Ok(self.sink.header(name))
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.sink.set_header(name, value)
    }

    fn headers_count(&self) -> Result<usize> {
        unsupported(Self::KIND, "headers_count")
    }

    fn headers(&self, _visit: &mut dyn FnMut(&str, &str)) -> Result<()> {
        unsupported(Self::KIND, "headers")
    }

    fn status_code(&self) -> Result<u16> {
        unsupported(Self::KIND, "status_code")
    }

    fn write_status_code(&mut self, status: u16) -> Result<()> {
        let status = StatusCode::from_u16(status).map_err(|_| ExchangeError::InvalidStatus(status))?;
        self.sink.set_status(status)
    }

    fn buffer(&mut self) -> Result<Vec<u8>> {
        unsupported(Self::KIND, "buffer")
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.sink.write_body(bytes)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A [`ResponseSink`] that assembles an [`http::Response`] in memory.
///
/// Clones share the same response, so a caller can keep one clone and hand
/// the other to a [`ResponseExchangeBuffer`].
#[derive(Clone, Default)]
pub struct CollectedResponse {
    inner: Arc<Mutex<Response<Vec<u8>>>>,
}

impl CollectedResponse {
    /// Create an empty `200 OK` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the response assembled so far.
    pub fn snapshot(&self) -> Response<Vec<u8>> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut response = Response::new(guard.body().clone());
        *response.status_mut() = guard.status();
        *response.headers_mut() = guard.headers().clone();
        response
    }
}

impl ResponseSink for CollectedResponse {
    fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ExchangeError::Io(std::io::Error::other(e)))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| ExchangeError::Io(std::io::Error::other(e)))?;
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.headers_mut().insert(name, value);
        Ok(())
    }

    fn header(&self, name: &str) -> Option<String> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn set_status(&mut self, status: StatusCode) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *guard.status_mut() = status;
        Ok(())
    }

    fn write_body(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.body_mut().extend_from_slice(bytes);
        Ok(bytes.len())
    }
}
