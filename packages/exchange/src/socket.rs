//! Exchange buffers backed by a message socket.
//!
//! Reads block on the next inbound message, writes send one message, and
//! closing sends a close frame. [`ChannelSocket`] provides an in-process
//! socket over tokio channels for hosts that bridge a real websocket on
//! another task.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::buffer::ExchangeBuffer;
use crate::error::{unsupported, ExchangeError, Result};

/// One socket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketMessage {
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Close,
}

/// A blocking, message-oriented duplex transport.
pub trait MessageSocket: Send {
    /// Block until the next message. `None` once the peer is gone.
    fn recv(&mut self) -> Option<SocketMessage>;

    /// Send one message.
    fn send(&mut self, message: SocketMessage) -> Result<()>;
}

/// A [`MessageSocket`] over a pair of tokio channels.
///
/// The blocking calls must not run on an async executor thread; sandbox
/// runs are synchronous, so this holds for guest-driven use.
pub struct ChannelSocket {
    tx: mpsc::Sender<SocketMessage>,
    rx: mpsc::Receiver<SocketMessage>,
}

impl ChannelSocket {
    /// Create two connected ends. Each end's sends arrive at the other.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (tx1, rx1) = mpsc::channel(capacity);
        let (tx2, rx2) = mpsc::channel(capacity);

        (Self { tx: tx1, rx: rx2 }, Self { tx: tx2, rx: rx1 })
    }
}

impl MessageSocket for ChannelSocket {
    fn recv(&mut self) -> Option<SocketMessage> {
        self.rx.blocking_recv()
    }

    fn send(&mut self, message: SocketMessage) -> Result<()> {
        self.tx
            .blocking_send(message)
            .map_err(|_| ExchangeError::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Text,
    Binary,
}

/// Exchange buffer over a [`MessageSocket`].
pub struct SocketExchangeBuffer {
    socket: Box<dyn MessageSocket>,
    headers: BTreeMap<String, String>,
    // Writes reuse the kind of the last message read.
    kind: MessageKind,
}

impl SocketExchangeBuffer {
    const KIND: &'static str = "socket";

    /// Wrap a socket. Header names are lower-cased.
    pub fn new<S: MessageSocket + 'static>(
        headers: impl IntoIterator<Item = (String, String)>,
        socket: S,
    ) -> Self {
        Self {
            socket: Box::new(socket),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            kind: MessageKind::Text,
        }
    }
}

impl ExchangeBuffer for SocketExchangeBuffer {
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
        tracing::warn!("status_code read on a socket exchange buffer");
        Ok(101)
    }

    fn write_status_code(&mut self, _status: u16) -> Result<()> {
        unsupported(Self::KIND, "write_status_code")
    }

    fn buffer(&mut self) -> Result<Vec<u8>> {
        match self.socket.recv() {
            Some(SocketMessage::Text(bytes)) => {
                self.kind = MessageKind::Text;
                Ok(bytes)
            }
            Some(SocketMessage::Binary(bytes)) => {
                self.kind = MessageKind::Binary;
                Ok(bytes)
            }
            Some(SocketMessage::Close) | None => {
                tracing::debug!("socket peer closed");
                Ok(Vec::new())
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let message = match self.kind {
            MessageKind::Text => SocketMessage::Text(bytes.to_vec()),
            MessageKind::Binary => SocketMessage::Binary(bytes.to_vec()),
        };
        self.socket.send(message)?;
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        self.socket.send(SocketMessage::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_next_message() {
        let (mut peer, local) = ChannelSocket::pair(4);
        let mut buffer = SocketExchangeBuffer::new(Vec::new(), local);

        peer.send(SocketMessage::Text(b"one".to_vec())).unwrap();
        peer.send(SocketMessage::Text(b"two".to_vec())).unwrap();

        assert_eq!(buffer.buffer().unwrap(), b"one");
        assert_eq!(buffer.buffer().unwrap(), b"two");
    }

    #[test]
    fn writes_reuse_last_kind() {
        let (mut peer, local) = ChannelSocket::pair(4);
        let mut buffer = SocketExchangeBuffer::new(Vec::new(), local);

        buffer.write(b"hi").unwrap();
        assert_eq!(peer.recv(), Some(SocketMessage::Text(b"hi".to_vec())));

        peer.send(SocketMessage::Binary(vec![1, 2])).unwrap();
        buffer.buffer().unwrap();
        buffer.write(&[3]).unwrap();
        assert_eq!(peer.recv(), Some(SocketMessage::Binary(vec![3])));
    }

    #[test]
    fn close_sends_close_frame() {
        let (mut peer, local) = ChannelSocket::pair(4);
        let mut buffer = SocketExchangeBuffer::new(Vec::new(), local);
        buffer.close().unwrap();
        assert_eq!(peer.recv(), Some(SocketMessage::Close));
    }

    #[test]
    fn dropped_peer_reads_empty() {
        let (peer, local) = ChannelSocket::pair(4);
        let mut buffer = SocketExchangeBuffer::new(Vec::new(), local);
        drop(peer);
        assert!(buffer.buffer().unwrap().is_empty());
        assert!(matches!(buffer.write(b"x"), Err(ExchangeError::Closed)));
    }

    #[test]
    fn headers_are_lower_case() {
        let (_peer, local) = ChannelSocket::pair(1);
        let mut buffer = SocketExchangeBuffer::new(
            vec![("Sec-WebSocket-Protocol".to_string(), "chat".to_string())],
            local,
        );
        assert_eq!(
            buffer.header("sec-websocket-protocol").unwrap().as_deref(),
            Some("chat")
        );
        assert_eq!(buffer.status_code().unwrap(), 101);
        assert!(buffer.write_status_code(200).is_err());
    }
}
