//! Function execution contexts.

use std::fmt;

use faashost_exchange::BufferHandle;
use uuid::Uuid;

/// How arguments reach the guest's entry function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Flat list of i32 arguments.
    #[default]
    Direct,
    /// argv, environ and file descriptors through the WASI shim.
    Posix,
}

impl ExecutionMode {
    /// Parse the mode names guests pass to `call_function`.
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "direct" | "" => Some(Self::Direct),
            "posix" | "wasi" => Some(Self::Posix),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Posix => "posix",
        })
    }
}

/// One guest invocation.
///
/// ```
/// use faashost_sandbox_runtime::{ExecutionMode, FunctionExecutionContext};
///
/// let context = FunctionExecutionContext::new("adder", "add")
///     .with_arguments(vec![3, 4])
///     .with_buffers(1, 2);
/// assert_eq!(context.mode(), ExecutionMode::Direct);
/// assert_eq!(context.result(), None);
/// ```
#[derive(Debug, Clone)]
pub struct FunctionExecutionContext {
    id: Uuid,
    alias: String,
    entry: String,
    mode: ExecutionMode,
    arguments: Vec<i32>,
    program: Option<String>,
    program_args: Vec<String>,
    input: BufferHandle,
    output: BufferHandle,
    trace: bool,
    depth: usize,
    chain: Vec<String>,
    result: Option<i32>,
    exit_code: Option<i32>,
}

impl FunctionExecutionContext {
    /// A top-level context for `entry` of the guest registered as `alias`.
    pub fn new(alias: impl Into<String>, entry: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            id: Uuid::new_v4(),
            chain: vec![alias.clone()],
            alias,
            entry: entry.into(),
            mode: ExecutionMode::Direct,
            arguments: Vec::new(),
            program: None,
            program_args: Vec::new(),
            input: 0,
            output: 0,
            trace: false,
            depth: 0,
            result: None,
            exit_code: None,
        }
    }

    /// A context invoked from within `parent`, one link deeper.
    pub fn nested(
        parent: &InvocationInfo,
        alias: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        let alias = alias.into();
        let mut chain = parent.chain.clone();
        chain.push(alias.clone());
        Self {
            chain,
            depth: parent.depth + 1,
            trace: parent.trace,
            ..Self::new(alias, entry)
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<i32>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set argv for POSIX mode. An empty program name falls back to the
    /// host default.
    pub fn with_posix_program(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        self.program = (!program.is_empty()).then_some(program);
        self.program_args = args;
        self
    }

    pub fn with_buffers(mut self, input: BufferHandle, output: BufferHandle) -> Self {
        self.input = input;
        self.output = output;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn arguments(&self) -> &[i32] {
        &self.arguments
    }

    pub fn input(&self) -> BufferHandle {
        self.input
    }

    pub fn output(&self) -> BufferHandle {
        self.output
    }

    pub fn trace(&self) -> bool {
        self.trace
    }

    /// Number of dynamic links between this context and the top level.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Aliases from the top-level guest down to this one.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// The entry function's return value, or the exit code of a POSIX guest.
    pub fn result(&self) -> Option<i32> {
        self.result
    }

    /// Set when the guest terminated through `proc_exit`.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub(crate) fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    pub(crate) fn program_args(&self) -> &[String] {
        &self.program_args
    }

    pub(crate) fn set_result(&mut self, result: i32) {
        self.result = Some(result);
    }

    pub(crate) fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
        self.result = Some(code);
    }

    pub(crate) fn info(&self) -> InvocationInfo {
        InvocationInfo {
            id: self.id,
            alias: self.alias.clone(),
            entry: self.entry.clone(),
            mode: self.mode,
            input: self.input,
            output: self.output,
            trace: self.trace,
            depth: self.depth,
            chain: self.chain.clone(),
        }
    }
}

/// The parts of a context visible to host functions while the guest runs.
#[derive(Debug, Clone)]
pub struct InvocationInfo {
    pub id: Uuid,
    pub alias: String,
    pub entry: String,
    pub mode: ExecutionMode,
    pub input: BufferHandle,
    pub output: BufferHandle,
    pub trace: bool,
    pub depth: usize,
    pub chain: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_extends_chain_and_depth() {
        let parent = FunctionExecutionContext::new("outer", "main")
            .with_trace(true)
            .info();
        let nested = FunctionExecutionContext::nested(&parent, "inner", "add");

        assert_eq!(nested.depth(), 1);
        assert_eq!(nested.chain(), ["outer", "inner"]);
        assert_eq!(nested.mode(), ExecutionMode::Direct);
        assert!(nested.trace());
        assert_ne!(nested.id(), parent.id);
    }

    #[test]
    fn exit_code_is_the_result() {
        let mut context = FunctionExecutionContext::new("tool", "_start");
        context.set_exit_code(3);
        assert_eq!(context.result(), Some(3));
        assert_eq!(context.exit_code(), Some(3));
    }

    #[test]
    fn empty_program_name_uses_default() {
        let context = FunctionExecutionContext::new("tool", "_start")
            .with_posix_program("", vec!["-v".into()]);
        assert_eq!(context.program(), None);
        assert_eq!(context.program_args(), ["-v"]);
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ExecutionMode::parse("posix"), Some(ExecutionMode::Posix));
        assert_eq!(ExecutionMode::parse("direct"), Some(ExecutionMode::Direct));
        assert_eq!(ExecutionMode::parse("lua"), None);
    }
}
