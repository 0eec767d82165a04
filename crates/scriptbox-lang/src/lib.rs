#![forbid(unsafe_code)]
//! scriptbox-lang: the restricted script language scripts are written in.
//!
//! Layers:
//! - `lexer` / `parser` build the tree; `policy` rejects private names,
//!   dangerous primitives and unaliased dotted imports before anything runs.
//! - `interp` walks the tree. Attribute, subscript and iteration access go
//!   through the `hooks::Guards` bundle; imports through `imports`; `print`
//!   through a `capture::OutputSink`.
//! - `builtins` is the fixed capability set; `modules` the native modules an
//!   allow-list can open up.
//!
//! No filesystem or network access exists here except reading allow-listed
//! module sources from configured search paths.

pub mod ast;
pub mod builtins;
pub mod capture;
pub mod convert;
pub mod error;
pub mod format;
pub mod hooks;
pub mod imports;
pub mod interp;
pub mod lexer;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod parser;
pub mod policy;
pub mod value;

use std::sync::Arc;

pub use ast::Program;
pub use capture::{CaptureSink, OutputSink};
pub use error::{CompileError, ExcKind, ExecResult, Exception};
pub use hooks::{AttributeAccess, GuardedAccess, Guards, ItemAccess, IterationAccess, DEFAULT_GUARDS};
pub use imports::{ImportResolver, ModuleLoader};
pub use interp::Interpreter;
pub use value::{CallArgs, Module, Namespace, NativeFunction, SharedNamespace, Value};

/// Parse and restriction-check a script. Nothing runs.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    let body = parser::parse(source)?;
    policy::check(&body)?;
    Ok(Program {
        body: Arc::new(body),
        source: Arc::from(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_runs_the_restriction_checker() {
        assert!(compile("x = 1\n").is_ok());
        let err = compile("y = 2\nz = eval('1')\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(compile("import os.path\n").is_err());
        assert!(compile("import os.path as p\n").is_ok());
    }

    #[test]
    fn empty_source_compiles_to_an_empty_program() {
        let program = compile("").unwrap();
        assert!(program.body.is_empty());
    }
}
