//! Module loading, import resolution and execution.
//!
//! Each imported module is resolved in priority order:
//!
//! 1. a host API provider registered under the module name,
//! 2. another hosted guest registered under that alias (dynamic linking),
//! 3. the WASI shim, for POSIX-mode invocations,
//! 4. the managed-runtime hooks of module `env`.
//!
//! Anything left over fails `prepare`; there is no partial linking.

use std::collections::BTreeMap;
use std::sync::Arc;

use faashost_exchange::ExchangeRegistry;
use wasmtime::{ExternType, FuncType, Linker, Module, Store, Val};

use crate::context::{ExecutionMode, FunctionExecutionContext, InvocationInfo};
use crate::error::{GuestExit, Result, SandboxError};
use crate::host::Host;
use crate::link;
use crate::managed;
use crate::posix::{self, PosixShim};
use crate::provider::Binder;
use crate::signature::{describe, Signature, ValKind};

/// Data attached to the wasmtime store of one sandbox run.
pub struct SandboxState {
    host: Arc<Host>,
    invocation: InvocationInfo,
    pub(crate) posix: PosixShim,
}

impl SandboxState {
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn registry(&self) -> &ExchangeRegistry {
        self.host.registry()
    }

    pub fn invocation(&self) -> &InvocationInfo {
        &self.invocation
    }

    pub fn posix(&self) -> &PosixShim {
        &self.posix
    }
}

/// A guest that has been loaded and linked, ready to run once.
pub struct Sandbox<'c> {
    context: &'c mut FunctionExecutionContext,
    module: Module,
    linker: Linker<SandboxState>,
    store: Store<SandboxState>,
}

type ImportMap = BTreeMap<String, BTreeMap<String, FuncType>>;

/// Group the module's function imports by module name.
fn collect_imports(module: &Module) -> Result<ImportMap> {
    let mut imports = ImportMap::new();
    for import in module.imports() {
        let ExternType::Func(ty) = import.ty() else {
            return Err(SandboxError::UnresolvedImport {
                module: import.module().to_string(),
                name: import.name().to_string(),
            });
        };
        imports
            .entry(import.module().to_string())
            .or_default()
            .insert(import.name().to_string(), ty);
    }
    Ok(imports)
}

pub(crate) fn prepare<'c>(
    host: &Arc<Host>,
    context: &'c mut FunctionExecutionContext,
) -> Result<Sandbox<'c>> {
    let span = tracing::info_span!(
        "invocation",
        alias = context.alias(),
        entry = context.entry(),
        id = %context.id()
    );
    let _enter = span.enter();

    let max = host.config().max_link_depth;
    if context.depth() > max {
        return Err(SandboxError::LinkDepthExceeded {
            alias: context.alias().to_string(),
            max,
        });
    }

    let module = host.load_module(context.alias())?;
    if !matches!(module.get_export(context.entry()), Some(ExternType::Func(_))) {
        return Err(SandboxError::MissingEntry {
            alias: context.alias().to_string(),
            entry: context.entry().to_string(),
        });
    }

    let info = context.info();
    let imports = collect_imports(&module)?;
    let mut linker = Linker::new(host.engine());
    let mut shim = PosixShim::new();

    for (name, functions) in &imports {
        let mut binder = Binder::new(&mut linker, name, functions);
        resolve(host, context, &info, &mut binder, &mut shim)?;
        binder.finish()?;
    }

    let mut store = Store::new(
        host.engine(),
        SandboxState {
            host: host.clone(),
            invocation: info,
            posix: shim,
        },
    );
    if let Some(fuel) = host.config().fuel {
        store
            .set_fuel(fuel)
            .map_err(|e| SandboxError::Engine(e.to_string()))?;
    }

    tracing::debug!(modules = imports.len(), "sandbox prepared");
    Ok(Sandbox {
        context,
        module,
        linker,
        store,
    })
}

/// Bind one imported module according to the resolution order.
fn resolve(
    host: &Arc<Host>,
    context: &FunctionExecutionContext,
    info: &InvocationInfo,
    binder: &mut Binder<'_>,
    shim: &mut PosixShim,
) -> Result<()> {
    let name = binder.module().to_string();
    let trace = |via: &str| {
        if info.trace {
            tracing::info!(module = %name, via, "resolved import module");
        } else {
            tracing::debug!(module = %name, via, "resolved import module");
        }
    };

    if let Some(provider) = host.provider(&name) {
        provider.bind(binder)?;
        trace("provider");
        return Ok(());
    }

    if host.blobs().has_alias(&name)? {
        link::bind_guest(host, info, binder)?;
        trace("dynamic link");
        return Ok(());
    }

    if info.mode == ExecutionMode::Posix && posix::is_wasi_module(&name) {
        let program = context
            .program()
            .unwrap_or(host.config().posix_program_name.as_str());
        posix::bind(binder, shim, host, info, program, context.program_args())?;
        trace("posix shim");
        return Ok(());
    }

    if name == managed::MODULE {
        managed::bind(binder)?;
        trace("managed runtime");
        return Ok(());
    }

    Err(SandboxError::UnresolvedModule(name))
}

impl Sandbox<'_> {
    /// The state the guest's host calls see.
    pub fn state(&self) -> &SandboxState {
        self.store.data()
    }

    /// Instantiate the guest and call its entry function to completion.
    ///
    /// A `proc_exit` is a normal termination: the exit code becomes the
    /// context result. Any other trap is [`SandboxError::Trap`].
    pub fn run(mut self) -> Result<()> {
        let span = tracing::info_span!(
            "invocation",
            alias = self.context.alias(),
            entry = self.context.entry(),
            id = %self.context.id()
        );
        let _enter = span.enter();

        self.store.data_mut().posix.start();
        let outcome = self.call_entry()?;
        match outcome {
            Ok(result) => {
                self.context.set_result(result);
                Ok(())
            }
            Err(error) => self.fail(error),
        }
    }

    fn argument_values(&self, ty: &FuncType) -> Result<Vec<Val>> {
        let arguments: &[i32] = match self.context.mode() {
            ExecutionMode::Direct => self.context.arguments(),
            ExecutionMode::Posix => &[],
        };
        let expected = Signature::new(
            &vec![ValKind::I32; arguments.len()],
            Signature::of(ty).and_then(|s| s.result()),
        );
        if !expected.matches(ty) {
            return Err(SandboxError::SignatureMismatch {
                module: self.context.alias().to_string(),
                name: self.context.entry().to_string(),
                expected,
                found: describe(ty),
            });
        }
        Ok(arguments.iter().map(|a| Val::I32(*a)).collect())
    }

    /// Outer `Err` is a setup failure; inner `Err` is the guest trapping.
    fn call_entry(&mut self) -> Result<wasmtime::Result<i32>> {
        let instance = match self.linker.instantiate(&mut self.store, &self.module) {
            Ok(instance) => instance,
            Err(error) => return Ok(Err(error)),
        };
        let func = instance
            .get_func(&mut self.store, self.context.entry())
            .ok_or_else(|| SandboxError::MissingEntry {
                alias: self.context.alias().to_string(),
                entry: self.context.entry().to_string(),
            })?;

        let ty = func.ty(&self.store);
        let params = self.argument_values(&ty)?;
        let mut results = vec![Val::I32(0); ty.results().len()];
        if let Err(error) = func.call(&mut self.store, &params, &mut results) {
            return Ok(Err(error));
        }

        Ok(Ok(match results.first() {
            Some(Val::I32(v)) => *v,
            Some(Val::I64(v)) => *v as i32,
            _ => 0,
        }))
    }

    fn fail(self, error: wasmtime::Error) -> Result<()> {
        if let Some(GuestExit(code)) = error.downcast_ref::<GuestExit>() {
            tracing::debug!(code, "guest exited");
            self.context.set_exit_code(*code);
            return Ok(());
        }
        if let Some(SandboxError::Unimplemented { module, name }) =
            error.downcast_ref::<SandboxError>()
        {
            return Err(SandboxError::Unimplemented {
                module: module.clone(),
                name: name.clone(),
            });
        }

        let message = format!("{:#}", error);
        tracing::warn!(%message, "guest trapped");
        Err(SandboxError::Trap {
            alias: self.context.alias().to_string(),
            entry: self.context.entry().to_string(),
            message,
        })
    }
}
