//! # faashost sandbox runtime
//!
//! Runs untrusted guest modules for a function-as-a-service host.
//!
//! A guest is WebAssembly bytecode stored in the [`BlobStore`] under an
//! alias. An invocation is described by a [`FunctionExecutionContext`] and
//! goes through two steps:
//!
//! 1. [`Host::prepare`] loads the module and resolves every import, in
//!    order, against a host API provider, another hosted guest (dynamic
//!    linking), the WASI shim for POSIX-mode guests, or the `env` hooks of
//!    managed-runtime toolchains. Anything unresolved fails here.
//! 2. [`Sandbox::run`] calls the entry function to completion on the
//!    calling thread and records the result in the context.
//!
//! All data moves through exchange buffers: the context names an input and
//! an output handle, and whatever the guest writes can be read from the
//! output buffer afterwards.
//!
//! ```
//! use faashost_exchange::MemoryExchangeBuffer;
//! use faashost_sandbox_runtime::{FunctionExecutionContext, Host, HostConfig};
//!
//! let host = Host::in_memory(HostConfig::default()).unwrap();
//! host.register_guest("echo", r#"
//!     (module
//!       (import "core" "get_input_buffer_id" (func $in (result i32)))
//!       (import "core" "get_output_buffer_id" (func $out (result i32)))
//!       (import "core" "read_exchange_buffer" (func $read (param i32 i32 i32) (result i32)))
//!       (import "core" "write_exchange_buffer" (func $write (param i32 i32 i32) (result i32)))
//!       (memory (export "memory") 1)
//!       (func (export "run") (result i32)
//!         (local $n i32)
//!         (local.set $n (call $read (call $in) (i32.const 0) (i32.const 1024)))
//!         (drop (call $write (call $out) (i32.const 0) (local.get $n)))
//!         (local.get $n)))
//! "#).unwrap();
//!
//! let input = host.registry().register(MemoryExchangeBuffer::with_content("ping"));
//! let output = host.registry().create();
//! let mut context = FunctionExecutionContext::new("echo", "run").with_buffers(input, output);
//! host.invoke(&mut context).unwrap();
//!
//! assert_eq!(context.result(), Some(4));
//! assert_eq!(host.registry().with_buffer(output, |b| b.buffer()).unwrap(), b"ping");
//! ```

pub mod abi;
pub mod config;
pub mod context;
pub mod core_api;
pub mod engine;
pub mod error;
pub mod host;
mod link;
pub mod managed;
pub mod posix;
pub mod provider;
pub mod signature;

pub use abi::{CallSite, GuestMemory, SENTINEL};
pub use config::HostConfig;
pub use context::{ExecutionMode, FunctionExecutionContext, InvocationInfo};
pub use core_api::CoreApi;
pub use engine::{Sandbox, SandboxState};
pub use error::{FileError, GuestExit, HostCallError, Result, SandboxError};
pub use faashost_store::BlobStore;
pub use host::{Host, WASM_CONTENT_TYPE};
pub use posix::{PosixShim, ShimState, VirtualFile};
pub use provider::{ApiProvider, Binder};
pub use signature::{Signature, ValKind};
