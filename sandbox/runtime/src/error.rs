//! Error types for the sandbox runtime.

use thiserror::Error;

use crate::signature::Signature;

/// Errors that fail a whole invocation.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// No guest is registered under the alias.
    #[error("guest not found: {0}")]
    GuestNotFound(String),

    /// The guest blob is not WebAssembly.
    #[error("guest '{alias}' has unsupported content type '{content_type}'")]
    UnsupportedContentType { alias: String, content_type: String },

    /// The guest bytecode failed to parse or validate.
    #[error("guest '{alias}' failed to compile: {message}")]
    Compile { alias: String, message: String },

    /// A provider or linked guest does not supply an imported function.
    #[error("unresolved import {module}::{name}")]
    UnresolvedImport { module: String, name: String },

    /// Nothing can satisfy an imported module.
    #[error("unresolved import module '{0}'")]
    UnresolvedModule(String),

    /// An import's declared type differs from the bound function.
    #[error("signature mismatch for {module}::{name}: expected {expected}, guest declares {found}")]
    SignatureMismatch {
        module: String,
        name: String,
        expected: Signature,
        found: String,
    },

    /// The entry symbol is not an exported function.
    #[error("guest '{alias}' has no exported function '{entry}'")]
    MissingEntry { alias: String, entry: String },

    /// A nested invocation would exceed the configured link depth.
    #[error("dynamic link to '{alias}' exceeds the maximum depth of {max}")]
    LinkDepthExceeded { alias: String, max: usize },

    /// A dynamic link leads back to a guest already on the call chain.
    #[error("dynamic link cycle: {}", chain.join(" -> "))]
    LinkCycle { chain: Vec<String> },

    /// The guest trapped.
    #[error("guest '{alias}' trapped in '{entry}': {message}")]
    Trap {
        alias: String,
        entry: String,
        message: String,
    },

    /// The guest called a host function that has no implementation.
    #[error("{module}::{name} is not implemented")]
    Unimplemented { module: String, name: String },

    /// Engine, linker or store setup failed.
    #[error("engine error: {0}")]
    Engine(String),

    /// The blob or key-value store failed.
    #[error("store error: {0}")]
    Store(#[from] faashost_store::StoreError),

    /// An exchange buffer operation failed.
    #[error("exchange error: {0}")]
    Exchange(#[from] faashost_exchange::ExchangeError),

    /// Host configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Failure of a single host function call.
///
/// Recoverable failures are logged and the guest receives
/// [`SENTINEL`](crate::abi::SENTINEL); fatal ones trap the guest.
#[derive(Debug, Error)]
pub enum HostCallError {
    /// A pointer and length pair falls outside guest memory.
    #[error("guest memory access out of bounds: offset {offset}, length {len}")]
    OutOfBounds { offset: u64, len: u64 },

    /// A failure the guest can observe and handle.
    #[error("{0}")]
    Recoverable(String),

    /// A failure that aborts the invocation.
    #[error("{0}")]
    Fatal(wasmtime::Error),
}

impl HostCallError {
    /// Build a recoverable error from anything displayable.
    pub fn recoverable(message: impl std::fmt::Display) -> Self {
        Self::Recoverable(message.to_string())
    }

    /// Trap with a typed error that the engine can recognise afterwards.
    pub fn fatal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Fatal(wasmtime::Error::new(error))
    }
}

impl From<faashost_exchange::ExchangeError> for HostCallError {
    fn from(error: faashost_exchange::ExchangeError) -> Self {
        Self::recoverable(error)
    }
}

impl From<faashost_store::StoreError> for HostCallError {
    fn from(error: faashost_store::StoreError) -> Self {
        Self::recoverable(error)
    }
}

/// Errors raised by POSIX virtual files.
#[derive(Debug, Error)]
pub enum FileError {
    /// The file does not support reading.
    #[error("file is not readable")]
    NotReadable,

    /// The file does not support writing.
    #[error("file is not writable")]
    NotWritable,

    /// The backing exchange buffer failed.
    #[error(transparent)]
    Exchange(#[from] faashost_exchange::ExchangeError),

    /// Fetching a remote resource failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// Signals a guest-initiated exit through the trap path.
#[derive(Debug, Error)]
#[error("guest exited with code {0}")]
pub struct GuestExit(pub i32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_display_names_alias_and_entry() {
        let error = SandboxError::Trap {
            alias: "greeter".to_string(),
            entry: "run".to_string(),
            message: "unreachable".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "guest 'greeter' trapped in 'run': unreachable"
        );
    }

    #[test]
    fn cycle_display_shows_chain() {
        let error = SandboxError::LinkCycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(error.to_string(), "dynamic link cycle: a -> b -> a");
    }

    #[test]
    fn fatal_errors_downcast() {
        let HostCallError::Fatal(error) = HostCallError::fatal(GuestExit(3)) else {
            panic!("expected a fatal error");
        };
        assert_eq!(error.downcast_ref::<GuestExit>().map(|e| e.0), Some(3));
    }
}
