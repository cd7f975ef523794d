//! WASI preview 1 compatibility shim.
//!
//! Lets guests built for a Unix-like environment run unmodified: argv is
//! synthesized, the environment is empty, and file descriptors map onto
//! [`VirtualFile`]s. Descriptors 0, 1 and 2 are the invocation's input
//! buffer, output buffer and a trace sink; `path_open` understands HTTP URLs
//! and the `api://input` / `api://output` pseudo-paths. Anything the shim
//! does not implement traps when called.
//!
//! A shim serves exactly one sandbox run and moves through
//! [`ShimState::Unbound`], [`ShimState::Bound`], [`ShimState::Running`] and
//! finally [`ShimState::Exited`] if the guest calls `proc_exit`.

pub mod vfs;

use std::collections::BTreeMap;

use url::Url;

use crate::abi::CallSite;
use crate::context::InvocationInfo;
use crate::error::{GuestExit, HostCallError, Result};
use crate::host::Host;
use crate::provider::Binder;
use crate::signature::{Signature, ValKind};

pub use vfs::{BufferInput, BufferOutput, RemoteFile, StandardError, VirtualFile};

/// Module names WASI guests import from.
pub const WASI_MODULES: [&str; 2] = ["wasi_unstable", "wasi_snapshot_preview1"];

pub fn is_wasi_module(name: &str) -> bool {
    WASI_MODULES.contains(&name)
}

/// WASI preview 1 error numbers.
pub mod errno {
    pub const SUCCESS: u32 = 0;
    pub const BADF: u32 = 8;
    pub const FAULT: u32 = 21;
    pub const IO: u32 = 29;
}

pub const FILETYPE_CHARACTER_DEVICE: u8 = 2;
pub const FILETYPE_DIRECTORY: u8 = 3;
pub const FILETYPE_REGULAR_FILE: u8 = 4;
pub const PREOPENTYPE_DIR: u32 = 0;

const RIGHTS_ALL: u64 = 0xfff_ffff_ffff;
const FDSTAT_SIZE: u32 = 24;
const FILESTAT_SIZE: u32 = 64;
const FILESTAT_STUB_SIZE: u64 = 30;
const IOVEC_SIZE: u32 = 8;

/// Preopened directories: (descriptor, name).
const PREOPENED: [(u32, &str); 2] = [(3, "./"), (4, "../")];

/// First descriptor handed out by `path_open`.
pub const FIRST_OPEN_FD: u32 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimState {
    Unbound,
    Bound,
    Running,
    Exited(i32),
}

/// Per-run POSIX state: argv and the descriptor table.
pub struct PosixShim {
    state: ShimState,
    argv: Vec<String>,
    files: BTreeMap<u32, VirtualFile>,
    next_fd: u32,
}

impl Default for PosixShim {
    fn default() -> Self {
        Self::new()
    }
}

impl PosixShim {
    pub fn new() -> Self {
        Self {
            state: ShimState::Unbound,
            argv: Vec::new(),
            files: BTreeMap::new(),
            next_fd: FIRST_OPEN_FD,
        }
    }

    pub fn state(&self) -> ShimState {
        self.state
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Size of the NUL-terminated argv strings.
    fn argv_size(&self) -> usize {
        self.argv.iter().map(|arg| arg.len() + 1).sum()
    }

    pub(crate) fn start(&mut self) {
        if self.state == ShimState::Bound {
            self.state = ShimState::Running;
        }
    }

    fn exit(&mut self, code: i32) {
        self.state = ShimState::Exited(code);
    }

    fn open(&mut self, file: VirtualFile) -> u32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, file);
        fd
    }

    pub fn is_open(&self, fd: u32) -> bool {
        self.files.contains_key(&fd)
    }

    /// Attach argv and the standard descriptors, moving to `Bound`.
    fn prepare(&mut self, host: &Host, info: &InvocationInfo, program: &str, args: &[String]) {
        self.argv = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect();

        if let Some(input) = host.registry().get(info.input) {
            self.files.insert(0, VirtualFile::Input(BufferInput::new(input)));
        }
        if let Some(output) = host.registry().get(info.output) {
            self.files.insert(1, VirtualFile::Output(BufferOutput::new(output)));
        }
        self.files
            .insert(2, VirtualFile::StandardError(StandardError::new(info.id)));
        self.state = ShimState::Bound;
    }
}

type SyscallResult = std::result::Result<u32, HostCallError>;

/// Map guest-memory faults and recoverable failures to errno values.
fn syscall<F>(handler: F) -> impl Fn(&mut CallSite<'_>) -> SyscallResult + Send + Sync + 'static
where
    F: Fn(&mut CallSite<'_>) -> SyscallResult + Send + Sync + 'static,
{
    move |site: &mut CallSite<'_>| match handler(site) {
        Err(HostCallError::OutOfBounds { offset, len }) => {
            tracing::debug!(offset, len, "syscall touched memory out of bounds");
            Ok(errno::FAULT)
        }
        Err(HostCallError::Recoverable(message)) => {
            tracing::debug!(%message, "syscall failed");
            Ok(errno::BADF)
        }
        other => other,
    }
}

fn file_errno(error: &crate::error::FileError) -> u32 {
    use crate::error::FileError;
    match error {
        FileError::NotReadable | FileError::NotWritable => errno::BADF,
        FileError::Exchange(_) | FileError::Fetch(_) => errno::IO,
    }
}

/// Bind the shim for one WASI module and prepare its state.
pub(crate) fn bind(
    binder: &mut Binder<'_>,
    shim: &mut PosixShim,
    host: &Host,
    info: &InvocationInfo,
    program: &str,
    args: &[String],
) -> Result<()> {
    use ValKind::{I32, I64};

    shim.prepare(host, info, program, args);

    binder.bind("args_sizes_get", Signature::i32s(2), syscall(args_sizes_get))?;
    binder.bind("args_get", Signature::i32s(2), syscall(args_get))?;
    binder.bind("environ_sizes_get", Signature::i32s(2), syscall(environ_sizes_get))?;
    binder.bind("environ_get", Signature::i32s(2), syscall(|_| Ok(errno::SUCCESS)))?;
    binder.bind("fd_prestat_get", Signature::i32s(2), syscall(fd_prestat_get))?;
    binder.bind("fd_prestat_dir_name", Signature::i32s(3), syscall(fd_prestat_dir_name))?;
    binder.bind("fd_fdstat_get", Signature::i32s(2), syscall(fd_fdstat_get))?;
    binder.bind("path_filestat_get", Signature::i32s(5), syscall(path_filestat_get))?;
    binder.bind("fd_write", Signature::i32s(4), syscall(fd_write))?;
    binder.bind("fd_read", Signature::i32s(4), syscall(fd_read))?;
    binder.bind(
        "fd_seek",
        Signature::new(&[I32, I64, I32, I32], Some(I32)),
        syscall(fd_seek),
    )?;
    binder.bind("fd_close", Signature::i32s(1), syscall(fd_close))?;
    binder.bind(
        "fd_readdir",
        Signature::new(&[I32, I32, I32, I64, I32], Some(I32)),
        syscall(fd_readdir),
    )?;
    binder.bind(
        "path_open",
        Signature::new(&[I32, I32, I32, I32, I32, I64, I64, I32, I32], Some(I32)),
        syscall(path_open),
    )?;
    binder.bind("proc_exit", Signature::new(&[I32], None), proc_exit)?;

    for name in binder.unbound() {
        binder.bind_unimplemented(name)?;
    }

    tracing::debug!(module = binder.module(), argv = ?shim.argv(), "bound posix shim");
    Ok(())
}

fn args_sizes_get(site: &mut CallSite<'_>) -> SyscallResult {
    let argc_ptr = site.param_u32(0)?;
    let size_ptr = site.param_u32(1)?;
    let (memory, state) = site.split();
    memory.write_u32(argc_ptr, state.posix.argv.len() as u32)?;
    memory.write_u32(size_ptr, state.posix.argv_size() as u32)?;
    Ok(errno::SUCCESS)
}

fn args_get(site: &mut CallSite<'_>) -> SyscallResult {
    let argv_ptr = site.param_u32(0)?;
    let buf_ptr = site.param_u32(1)?;
    let (memory, state) = site.split();

    let mut offset = buf_ptr;
    for (i, arg) in state.posix.argv.iter().enumerate() {
        memory.write_u32(argv_ptr.saturating_add(4 * i as u32), offset)?;
        memory.write(offset, arg.as_bytes())?;
        let end = offset.saturating_add(arg.len() as u32);
        memory.write_u8(end, 0)?;
        offset = end.saturating_add(1);
    }
    Ok(errno::SUCCESS)
}

fn environ_sizes_get(site: &mut CallSite<'_>) -> SyscallResult {
    let count_ptr = site.param_u32(0)?;
    let size_ptr = site.param_u32(1)?;
    site.memory_mut().write_u32(count_ptr, 0)?;
    site.memory_mut().write_u32(size_ptr, 0)?;
    Ok(errno::SUCCESS)
}

fn preopened(fd: u32) -> Option<&'static str> {
    PREOPENED
        .iter()
        .find(|(preopened, _)| *preopened == fd)
        .map(|(_, name)| *name)
}

fn fd_prestat_get(site: &mut CallSite<'_>) -> SyscallResult {
    let fd = site.param_u32(0)?;
    let buf = site.param_u32(1)?;
    let Some(name) = preopened(fd) else {
        return Ok(errno::BADF);
    };
    let memory = site.memory_mut();
    memory.write_u32(buf, PREOPENTYPE_DIR)?;
    memory.write_u32(buf.saturating_add(4), name.len() as u32)?;
    Ok(errno::SUCCESS)
}

fn fd_prestat_dir_name(site: &mut CallSite<'_>) -> SyscallResult {
    let fd = site.param_u32(0)?;
    let buf = site.param_u32(1)?;
    let len = site.param_u32(2)? as usize;
    let Some(name) = preopened(fd) else {
        return Ok(errno::BADF);
    };
    let name = &name.as_bytes()[..name.len().min(len)];
    site.memory_mut().write(buf, name)?;
    Ok(errno::SUCCESS)
}

fn fd_fdstat_get(site: &mut CallSite<'_>) -> SyscallResult {
    let fd = site.param_u32(0)?;
    let buf = site.param_u32(1)?;
    let filetype = match fd {
        0..=2 => FILETYPE_CHARACTER_DEVICE,
        fd if preopened(fd).is_some() => FILETYPE_DIRECTORY,
        _ => FILETYPE_REGULAR_FILE,
    };
    let memory = site.memory_mut();
    memory.slice_mut(buf, FDSTAT_SIZE)?.fill(0);
    memory.write_u8(buf, filetype)?;
    memory.write_u16(buf.saturating_add(2), 0)?;
    memory.write_u64(buf.saturating_add(8), RIGHTS_ALL)?;
    memory.write_u64(buf.saturating_add(16), RIGHTS_ALL)?;
    Ok(errno::SUCCESS)
}

fn path_filestat_get(site: &mut CallSite<'_>) -> SyscallResult {
    site.param_byte_buffer(2, 3)?;
    let buf = site.param_u32(4)?;
    let memory = site.memory_mut();
    memory.slice_mut(buf, FILESTAT_SIZE)?.fill(0);
    memory.write_u64(buf.saturating_add(32), FILESTAT_STUB_SIZE)?;
    Ok(errno::SUCCESS)
}

/// Read the (pointer, length) pair of iovec `index`.
fn iovec(site: &CallSite<'_>, iovs: u32, index: u32) -> std::result::Result<(u32, u32), HostCallError> {
    let at = iovs.saturating_add(index.saturating_mul(IOVEC_SIZE));
    let memory = site.memory();
    Ok((memory.read_u32(at)?, memory.read_u32(at.saturating_add(4))?))
}

fn fd_write(site: &mut CallSite<'_>) -> SyscallResult {
    let fd = site.param_u32(0)?;
    let iovs = site.param_u32(1)?;
    let count = site.param_u32(2)?;
    let written_ptr = site.param_u32(3)?;

    let trace = site.state().invocation().trace;
    let mut written = 0u32;
    for i in 0..count {
        let (ptr, len) = iovec(site, iovs, i)?;
        let (memory, state) = site.split();
        let bytes = memory.slice(ptr, len)?;
        if fd == 1 && trace {
            tracing::info!(target: "faashost::guest", "{}", String::from_utf8_lossy(bytes));
        }
        let Some(file) = state.posix.files.get_mut(&fd) else {
            memory.write_u32(written_ptr, 0)?;
            return Ok(errno::BADF);
        };
        match file.write(bytes) {
            Ok(n) => written += n as u32,
            Err(error) => {
                tracing::debug!(fd, %error, "fd_write failed");
                memory.write_u32(written_ptr, 0)?;
                return Ok(file_errno(&error));
            }
        }
    }
    site.memory_mut().write_u32(written_ptr, written)?;
    Ok(errno::SUCCESS)
}

fn fd_read(site: &mut CallSite<'_>) -> SyscallResult {
    let fd = site.param_u32(0)?;
    let iovs = site.param_u32(1)?;
    let count = site.param_u32(2)?;
    let read_ptr = site.param_u32(3)?;

    let mut read = 0u32;
    for i in 0..count {
        let (ptr, len) = iovec(site, iovs, i)?;
        if len == 0 {
            continue;
        }
        let (memory, state) = site.split();
        let Some(file) = state.posix.files.get_mut(&fd) else {
            return Ok(errno::BADF);
        };
        let dst = memory.slice_mut(ptr, len)?;
        match file.read(dst) {
            Ok(n) => {
                read += n as u32;
                if n < len as usize {
                    break;
                }
            }
            Err(error) => {
                tracing::debug!(fd, %error, "fd_read failed");
                return Ok(file_errno(&error));
            }
        }
    }
    site.memory_mut().write_u32(read_ptr, read)?;
    Ok(errno::SUCCESS)
}

fn fd_seek(site: &mut CallSite<'_>) -> SyscallResult {
    let offset = site.param_u64(1)?;
    let result_ptr = site.param_u32(3)?;
    site.memory_mut().write_u64(result_ptr, offset)?;
    Ok(errno::SUCCESS)
}

fn fd_close(site: &mut CallSite<'_>) -> SyscallResult {
    let fd = site.param_u32(0)?;
    let Some(mut file) = site.state_mut().posix.files.remove(&fd) else {
        return Ok(errno::BADF);
    };
    match file.close() {
        Ok(()) => Ok(errno::SUCCESS),
        Err(error) => Ok(file_errno(&error)),
    }
}

fn fd_readdir(site: &mut CallSite<'_>) -> SyscallResult {
    let used_ptr = site.param_u32(4)?;
    site.memory_mut().write_u32(used_ptr, 0)?;
    Ok(errno::SUCCESS)
}

fn path_open(site: &mut CallSite<'_>) -> SyscallResult {
    let path = site.param_string(2, 3)?.to_string();
    let fd_ptr = site.param_u32(8)?;

    let state = site.state();
    let file = if path.starts_with("http://") || path.starts_with("https://") {
        let Ok(url) = Url::parse(&path) else {
            site.memory_mut().write_u32(fd_ptr, 0)?;
            return Ok(errno::BADF);
        };
        match state.host().http_client() {
            Ok(client) => Some(VirtualFile::Remote(RemoteFile::new(url, client))),
            Err(error) => {
                tracing::debug!(%path, %error, "no http client");
                site.memory_mut().write_u32(fd_ptr, 0)?;
                return Ok(errno::IO);
            }
        }
    } else if path == "api://input" {
        let input = state.invocation().input;
        state
            .registry()
            .get(input)
            .map(|buffer| VirtualFile::Input(BufferInput::new(buffer)))
    } else if path == "api://output" {
        let output = state.invocation().output;
        state
            .registry()
            .get(output)
            .map(|buffer| VirtualFile::Output(BufferOutput::new(buffer)))
    } else {
        None
    };

    let Some(file) = file else {
        tracing::debug!(%path, "path_open rejected");
        site.memory_mut().write_u32(fd_ptr, 0)?;
        return Ok(errno::BADF);
    };
    let (memory, state) = site.split();
    let fd = state.posix.open(file);
    memory.write_u32(fd_ptr, fd)?;
    tracing::debug!(%path, fd, "path_open");
    Ok(errno::SUCCESS)
}

fn proc_exit(site: &mut CallSite<'_>) -> SyscallResult {
    let code = site.param_i32(0)?;
    site.state_mut().posix.exit(code);
    Err(HostCallError::fatal(GuestExit(code)))
}
