//! Compiler core for the HLB build language: a lexer and parser for the
//! module grammar, a two-pass checker, and a code generator that walks a
//! checked module and emits build-engine requests through a fixed registry
//! of builtin callables.

pub mod compile;
pub mod diagnostics;
pub mod language;
pub mod runtime;

#[cfg(test)]
mod tests;

pub use compile::{compile, load, CompileError};
pub use runtime::codegen::{CodeGen, Target};
pub use runtime::context::{CancelToken, Context};
pub use runtime::solver::Request;
