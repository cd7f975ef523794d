//! Host API providers and the binder they attach functions through.

use std::collections::{BTreeMap, BTreeSet};

use wasmtime::{FuncType, Linker};

use crate::abi::{host_func, CallSite};
use crate::engine::SandboxState;
use crate::error::{HostCallError, Result, SandboxError};
use crate::signature::{describe, Signature};

/// A named capability set a guest can import, such as the `core` API.
///
/// Providers are registered on the [`Host`](crate::Host) under a module
/// name and asked to bind whenever a guest imports that module.
pub trait ApiProvider: Send + Sync {
    /// Attach host functions for the guest's imports of this module.
    fn bind(&self, binder: &mut Binder<'_>) -> Result<()>;
}

/// Attaches host functions for one imported module of one guest.
///
/// Only functions the guest actually imports are bound; once the binder is
/// finished every remaining import of the module is an error.
pub struct Binder<'a> {
    linker: &'a mut Linker<SandboxState>,
    module: &'a str,
    imports: &'a BTreeMap<String, FuncType>,
    bound: BTreeSet<String>,
}

impl<'a> Binder<'a> {
    pub(crate) fn new(
        linker: &'a mut Linker<SandboxState>,
        module: &'a str,
        imports: &'a BTreeMap<String, FuncType>,
    ) -> Self {
        Self {
            linker,
            module,
            imports,
            bound: BTreeSet::new(),
        }
    }

    /// The imported module name this binder serves.
    pub fn module(&self) -> &str {
        self.module
    }

    /// Whether the guest imports `name` from this module.
    pub fn imports(&self, name: &str) -> bool {
        self.imports.contains_key(name)
    }

    /// Names the guest imports from this module.
    pub fn imported_names(&self) -> impl Iterator<Item = &'a str> + 'a {
        let imports: &'a BTreeMap<String, FuncType> = self.imports;
        imports.keys().map(String::as_str)
    }

    /// Bind `name` if the guest imports it, checking its declared type.
    pub fn bind<F>(&mut self, name: &str, signature: Signature, handler: F) -> Result<()>
    where
        F: Fn(&mut CallSite<'_>) -> std::result::Result<u32, HostCallError>
            + Send
            + Sync
            + 'static,
    {
        let Some(ty) = self.imports.get(name) else {
            return Ok(());
        };
        if !signature.matches(ty) {
            return Err(SandboxError::SignatureMismatch {
                module: self.module.to_string(),
                name: name.to_string(),
                expected: signature,
                found: describe(ty),
            });
        }
        self.attach(name, ty.clone(), signature.result(), handler)
    }

    /// Bind `name` with whatever type the guest declares for it.
    pub fn bind_declared<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut CallSite<'_>) -> std::result::Result<u32, HostCallError>
            + Send
            + Sync
            + 'static,
    {
        let Some(ty) = self.imports.get(name) else {
            return Ok(());
        };
        let result = Signature::of(ty).and_then(|s| s.result());
        self.attach(name, ty.clone(), result, handler)
    }

    /// Bind `name` to a stub that traps with [`SandboxError::Unimplemented`].
    pub fn bind_unimplemented(&mut self, name: &str) -> Result<()> {
        let module = self.module.to_string();
        let function = name.to_string();
        self.bind_declared(name, move |_| {
            tracing::error!(module = %module, name = %function, "called a host function that is not implemented");
            Err(HostCallError::fatal(SandboxError::Unimplemented {
                module: module.clone(),
                name: function.clone(),
            }))
        })
    }

    fn attach<F>(
        &mut self,
        name: &str,
        ty: FuncType,
        result: Option<crate::signature::ValKind>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&mut CallSite<'_>) -> std::result::Result<u32, HostCallError>
            + Send
            + Sync
            + 'static,
    {
        let func = host_func(self.module.to_string(), name.to_string(), result, handler);
        self.linker
            .func_new(self.module, name, ty, func)
            .map_err(|e| SandboxError::Engine(e.to_string()))?;
        self.bound.insert(name.to_string());
        tracing::debug!(module = self.module, name, "bound host function");
        Ok(())
    }

    /// Names imported from this module that nothing has bound yet.
    pub fn unbound(&self) -> Vec<&'a str> {
        self.imported_names()
            .filter(|name| !self.bound.contains(*name))
            .collect()
    }

    /// Fail with [`SandboxError::UnresolvedImport`] if any import is unbound.
    pub(crate) fn finish(self) -> Result<()> {
        match self.unbound().first() {
            Some(name) => Err(SandboxError::UnresolvedImport {
                module: self.module.to_string(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }
}
