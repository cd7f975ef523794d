//! faashost sandbox: runs untrusted WebAssembly guests behind exchange
//! buffers, a curated host API and an optional POSIX shim.
//!
//! See [`faashost_sandbox_runtime`] for the execution model.

pub use faashost_sandbox_runtime::*;
