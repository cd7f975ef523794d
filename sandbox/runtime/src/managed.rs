//! Runtime support hooks for TinyGo-style guests.
//!
//! These toolchains import a handful of functions from `env`. Output hooks
//! are served; scheduler and JavaScript interop hooks are bound as
//! unimplemented so a guest that relies on them stops visibly.

use crate::error::Result;
use crate::provider::Binder;
use crate::signature::Signature;

/// The module name managed-runtime guests import from.
pub const MODULE: &str = "env";

fn is_stubbed(name: &str) -> bool {
    name == "runtime.ticks" || name == "runtime.sleepTicks" || name.starts_with("syscall/js.")
}

pub(crate) fn bind(binder: &mut Binder<'_>) -> Result<()> {
    binder.bind("io_get_stdout", Signature::i32s(0), |_| Ok(1))?;

    binder.bind("resource_write", Signature::i32s(3), |site| {
        let fd = site.param_u32(0)?;
        let bytes = site.param_byte_buffer(1, 2)?;
        tracing::info!(
            target: "faashost::guest",
            invocation = %site.state().invocation().id,
            fd,
            "{}",
            String::from_utf8_lossy(bytes)
        );
        Ok(bytes.len() as u32)
    })?;

    let stubs: Vec<&str> = binder.imported_names().filter(|n| is_stubbed(n)).collect();
    for name in stubs {
        binder.bind_unimplemented(name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stubbed_hooks() {
        assert!(is_stubbed("runtime.ticks"));
        assert!(is_stubbed("syscall/js.valueGet"));
        assert!(!is_stubbed("resource_write"));
        assert!(!is_stubbed("fd_write"));
    }
}
