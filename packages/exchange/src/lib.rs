//! # faashost-exchange
//!
//! Exchange buffers are the only way data enters or leaves a sandbox run.
//! Each one is a duplex byte channel with string headers and an optional
//! status code, and every buffer lives in an [`ExchangeRegistry`] under an
//! integer handle that guests pass around.
//!
//! ## Variants
//!
//! | Variant | Reads | Writes | Close |
//! |---------|-------|--------|-------|
//! | [`MemoryExchangeBuffer`] | whole content | append | no-op |
//! | [`RequestExchangeBuffer`] | drains the request body once | rejected | no-op |
//! | [`ResponseExchangeBuffer`] | rejected | streamed to the sink | no-op |
//! | [`SocketExchangeBuffer`] | next message | one message | close frame |
//!
//! ## Example
//!
//! ```
//! use faashost_exchange::{ExchangeRegistry, MemoryExchangeBuffer};
//!
//! let registry = ExchangeRegistry::new();
//! let input = registry.register(MemoryExchangeBuffer::with_content("abc"));
//! let output = registry.create();
//!
//! registry.with_buffer(output, |b| b.write(b"hello")).unwrap();
//! assert_eq!(registry.with_buffer(output, |b| b.buffer()).unwrap(), b"hello");
//!
//! registry.release(input);
//! registry.release(output);
//! assert_eq!(registry.live_count(), 0);
//! ```

pub mod buffer;
pub mod error;
pub mod http;
pub mod memory;
pub mod registry;
pub mod socket;

pub use buffer::{lock_buffer, ExchangeBuffer, SharedBuffer};
pub use error::{ExchangeError, Result};
pub use crate::http::{CollectedResponse, RequestExchangeBuffer, ResponseExchangeBuffer, ResponseSink};
pub use memory::MemoryExchangeBuffer;
pub use registry::{BufferHandle, ExchangeRegistry, RegistryStats};
pub use socket::{ChannelSocket, MessageSocket, SocketExchangeBuffer, SocketMessage};
