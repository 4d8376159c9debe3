//! Wisp: a single-pass bytecode compiler and stack-based VM for a small,
//! dynamically typed, class-based scripting language.
//!
//! The binary (`src/main.rs`) and the REPL are thin shells around
//! [`vm::Vm`]; embedders needing the compiler/VM without the CLI use this
//! library directly.

pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod error;
pub mod gc;
pub mod native;
pub mod object;
pub mod repl;
pub mod scanner;
pub mod table;
pub mod value;
pub mod vm;

use error::InterpretResult;
use vm::Vm;

/// Compile and run one complete source string against a fresh VM instance.
/// Convenience wrapper for embedders and integration tests that don't need
/// a persistent [`Vm`] across multiple calls (the REPL keeps its own).
pub fn interpret(source: &str) -> InterpretResult {
    Vm::new().interpret(source)
}
