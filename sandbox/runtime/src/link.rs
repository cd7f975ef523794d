//! Dynamic linking: satisfying imports by invoking another hosted guest.
//!
//! When a guest imports from a module name that is the alias of another
//! guest, every imported function that the other guest exports is bound to a
//! host function. Calling it runs the other guest synchronously in a nested
//! context with fresh exchange buffers, in direct mode, and returns its
//! result.

use std::sync::Arc;

use wasmtime::ExternType;

use crate::abi::CallSite;
use crate::context::{FunctionExecutionContext, InvocationInfo};
use crate::error::{HostCallError, Result, SandboxError};
use crate::host::Host;
use crate::provider::Binder;
use crate::signature::{describe, Signature, ValKind};

/// Bind the imports of `binder`'s module to exports of the guest with that
/// alias. Imports the other guest does not export are left unbound.
pub(crate) fn bind_guest(host: &Arc<Host>, info: &InvocationInfo, binder: &mut Binder<'_>) -> Result<()> {
    let alias = binder.module().to_string();
    if info.chain.contains(&alias) {
        let mut chain = info.chain.clone();
        chain.push(alias);
        return Err(SandboxError::LinkCycle { chain });
    }

    let target = host.load_module(&alias)?;
    let names: Vec<&str> = binder.imported_names().collect();
    for name in names {
        let Some(ExternType::Func(export)) = target.get_export(name) else {
            continue;
        };
        let signature = Signature::of(&export)
            .filter(|s| s.params().iter().all(|p| *p == ValKind::I32))
            .filter(|s| matches!(s.result(), None | Some(ValKind::I32)))
            .ok_or_else(|| SandboxError::SignatureMismatch {
                module: alias.clone(),
                name: name.to_string(),
                expected: Signature::i32s(export.params().len()),
                found: describe(&export),
            })?;

        let target_alias = alias.clone();
        let entry = name.to_string();
        binder.bind(name, signature, move |site| {
            call_guest(site, &target_alias, &entry)
        })?;
    }
    Ok(())
}

fn call_guest(site: &mut CallSite<'_>, alias: &str, entry: &str) -> std::result::Result<u32, HostCallError> {
    let arguments = site.params_i32()?;
    let host = site.state().host().clone();
    let parent = site.state().invocation().clone();

    let registry = host.registry();
    let input = registry.create();
    let output = registry.create();
    let mut nested = FunctionExecutionContext::nested(&parent, alias, entry)
        .with_arguments(arguments)
        .with_buffers(input, output);

    tracing::debug!(
        alias,
        entry,
        depth = nested.depth(),
        id = %nested.id(),
        "invoking linked guest"
    );
    let outcome = host.invoke(&mut nested);
    registry.release(input);
    registry.release(output);

    outcome.map_err(HostCallError::fatal)?;
    Ok(nested.result().unwrap_or(0) as u32)
}
