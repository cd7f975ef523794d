//! Virtual files behind POSIX file descriptors.

use faashost_exchange::{lock_buffer, SharedBuffer};
use url::Url;
use uuid::Uuid;

use crate::error::FileError;

type FileResult<T> = std::result::Result<T, FileError>;

/// A file a guest can read, write or close through a descriptor.
pub enum VirtualFile {
    /// Guest diagnostics, forwarded to `tracing`.
    StandardError(StandardError),
    /// Reads from an exchange buffer.
    Input(BufferInput),
    /// Appends to an exchange buffer.
    Output(BufferOutput),
    /// A resource fetched over HTTP on first read.
    Remote(RemoteFile),
}

impl VirtualFile {
    pub fn read(&mut self, dst: &mut [u8]) -> FileResult<usize> {
        match self {
            Self::Input(file) => file.read(dst),
            Self::Remote(file) => file.read(dst),
            Self::StandardError(_) | Self::Output(_) => Err(FileError::NotReadable),
        }
    }

    pub fn write(&mut self, src: &[u8]) -> FileResult<usize> {
        match self {
            Self::StandardError(file) => Ok(file.write(src)),
            Self::Output(file) => file.write(src),
            Self::Input(_) | Self::Remote(_) => Err(FileError::NotWritable),
        }
    }

    pub fn close(&mut self) -> FileResult<()> {
        match self {
            Self::Output(file) => file.close(),
            _ => Ok(()),
        }
    }
}

/// Copy from `content` at `position` into `dst`, advancing `position`.
fn read_at(content: &[u8], position: &mut usize, dst: &mut [u8]) -> usize {
    let remaining = content.get(*position..).unwrap_or_default();
    let count = remaining.len().min(dst.len());
    dst[..count].copy_from_slice(&remaining[..count]);
    *position += count;
    count
}

pub struct StandardError {
    invocation: Uuid,
}

impl StandardError {
    pub fn new(invocation: Uuid) -> Self {
        Self { invocation }
    }

    fn write(&mut self, src: &[u8]) -> usize {
        tracing::info!(
            target: "faashost::guest",
            invocation = %self.invocation,
            "{}",
            String::from_utf8_lossy(src).trim_end()
        );
        src.len()
    }
}

/// Exchange buffer input. The content is taken once, on first read, then
/// consumed positionally.
pub struct BufferInput {
    buffer: SharedBuffer,
    content: Option<Vec<u8>>,
    position: usize,
}

impl BufferInput {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self {
            buffer,
            content: None,
            position: 0,
        }
    }

    fn read(&mut self, dst: &mut [u8]) -> FileResult<usize> {
        if self.content.is_none() {
            self.content = Some(lock_buffer(&self.buffer).buffer()?);
        }
        let content = self.content.as_deref().unwrap_or_default();
        Ok(read_at(content, &mut self.position, dst))
    }
}

pub struct BufferOutput {
    buffer: SharedBuffer,
}

impl BufferOutput {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self { buffer }
    }

    fn write(&mut self, src: &[u8]) -> FileResult<usize> {
        Ok(lock_buffer(&self.buffer).write(src)?)
    }

    fn close(&mut self) -> FileResult<()> {
        Ok(lock_buffer(&self.buffer).close()?)
    }
}

/// A remote resource. Opening never touches the network; the GET happens on
/// the first read.
pub struct RemoteFile {
    url: Url,
    client: reqwest::blocking::Client,
    body: Option<Vec<u8>>,
    position: usize,
}

impl RemoteFile {
    pub fn new(url: Url, client: reqwest::blocking::Client) -> Self {
        Self {
            url,
            client,
            body: None,
            position: 0,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the body has been fetched yet.
    pub fn is_fetched(&self) -> bool {
        self.body.is_some()
    }

    fn fetch(&self) -> FileResult<Vec<u8>> {
        tracing::debug!(url = %self.url, "fetching remote file");
        let response = self.client.get(self.url.clone()).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }

    fn read(&mut self, dst: &mut [u8]) -> FileResult<usize> {
        if self.body.is_none() {
            self.body = Some(self.fetch()?);
        }
        let body = self.body.as_deref().unwrap_or_default();
        Ok(read_at(body, &mut self.position, dst))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use faashost_exchange::{ExchangeBuffer, MemoryExchangeBuffer};

    use super::*;

    fn shared(buffer: MemoryExchangeBuffer) -> SharedBuffer {
        Arc::new(Mutex::new(Box::new(buffer) as Box<dyn ExchangeBuffer>))
    }

    #[test]
    fn input_is_consumed_positionally() {
        let mut file = VirtualFile::Input(BufferInput::new(shared(
            MemoryExchangeBuffer::with_content("abcde"),
        )));
        let mut dst = [0u8; 3];
        assert_eq!(file.read(&mut dst).unwrap(), 3);
        assert_eq!(&dst, b"abc");
        assert_eq!(file.read(&mut dst).unwrap(), 2);
        assert_eq!(&dst[..2], b"de");
        assert_eq!(file.read(&mut dst).unwrap(), 0);
    }

    #[test]
    fn output_appends_to_buffer() {
        let buffer = shared(MemoryExchangeBuffer::new());
        let mut file = VirtualFile::Output(BufferOutput::new(buffer.clone()));
        file.write(b"ab").unwrap();
        file.write(b"c").unwrap();
        file.close().unwrap();
        assert_eq!(lock_buffer(&buffer).buffer().unwrap(), b"abc");
    }

    #[test]
    fn direction_is_enforced() {
        let mut input = VirtualFile::Input(BufferInput::new(shared(MemoryExchangeBuffer::new())));
        assert!(matches!(input.write(b"x"), Err(FileError::NotWritable)));

        let mut stderr = VirtualFile::StandardError(StandardError::new(Uuid::new_v4()));
        assert_eq!(stderr.write(b"oops\n").unwrap(), 5);
        assert!(matches!(stderr.read(&mut [0u8; 1]), Err(FileError::NotReadable)));
    }

    #[test]
    fn remote_open_does_not_fetch() {
        let url = Url::parse("http://127.0.0.1:9/never").unwrap();
        let file = RemoteFile::new(url, reqwest::blocking::Client::new());
        assert!(!file.is_fetched());
        assert_eq!(file.url().path(), "/never");
    }
}
