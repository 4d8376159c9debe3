//! # Error Handling for the Wisp Compiler & VM
//!
//! This module defines the error types that flow out of the two phases of
//! running a Wisp program:
//!
//! - [`CompileError`]: a single diagnostic produced by the scanner/parser
//!   during one `compile()` call. Multiple may accumulate (panic-mode
//!   recovery keeps scanning after the first one).
//! - [`RuntimeError`]: a single fault raised by the VM while executing
//!   already-compiled bytecode. Unlike compile errors, exactly one of these
//!   ends an `interpret()` call.
//! - [`InterpretResult`]: the three-way outcome the driver/REPL act on.

use std::fmt;

/// A single diagnostic raised by the scanner or parser.
///
/// Carries the source line so the driver can report `[line N] Error: ...`
/// without the compiler needing to know how the caller formats messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        CompileError {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Faults that can occur while the VM executes bytecode.
///
/// Division/modulo are deliberately absent as error producers: per the
/// language's numeric model, arithmetic on doubles follows IEEE-754
/// semantics, so `1 / 0` yields `inf`, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// An operator or builtin received a value of the wrong type.
    TypeError(String),
    /// Reading or assigning an identifier that was never declared.
    UndefinedVariable(String),
    /// Property access/assignment on a non-instance, or a missing field
    /// with no method of that name to bind.
    UndefinedProperty(String),
    /// Something other than a function/class/bound-method was called.
    NotCallable(String),
    /// Call-site argument count didn't match the callee's arity.
    ArityMismatch { expected: u8, got: u8 },
    /// Call-frame stack depth exceeded `FRAMES_MAX`.
    StackOverflow,
    /// `super`/inheritance used where the value wasn't a class.
    NotAClass(String),
    /// A class's resolved superclass binding wasn't usable (runtime-side
    /// check; compile-time self-inheritance is caught by the compiler).
    InvalidSuperclass(String),
    /// Internal VM invariant violation: a bug in this implementation, not
    /// in the Wisp program being run.
    VmInvariant(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeError(msg) => write!(f, "{}", msg),
            RuntimeError::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            RuntimeError::UndefinedProperty(name) => {
                write!(f, "Undefined property '{}'.", name)
            }
            RuntimeError::NotCallable(desc) => {
                write!(f, "Can only call functions and classes, got {}.", desc)
            }
            RuntimeError::ArityMismatch { expected, got } => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            RuntimeError::StackOverflow => write!(f, "Stack overflow."),
            RuntimeError::NotAClass(desc) => {
                write!(f, "Superclass must be a class, got {}.", desc)
            }
            RuntimeError::InvalidSuperclass(name) => {
                write!(f, "A class can't inherit from itself: '{}'.", name)
            }
            RuntimeError::VmInvariant(msg) => write!(f, "VmInvariant: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The three-way outcome the CLI driver and REPL act on (exit codes per
/// `SPEC_FULL.md` §6: OK=0, COMPILE_ERROR=65, RUNTIME_ERROR=70).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}
