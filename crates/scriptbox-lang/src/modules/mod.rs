//! Native modules scripts may import when allow-listed.

use crate::error::ExecResult;
use crate::imports::ModuleFactory;
use crate::interp::Interpreter;
use crate::value::{CallArgs, Namespace, NativeFunction, Value};

pub mod datetime;
pub mod json;
pub mod math;
pub mod statistics;
pub mod table;

pub const NATIVE_MODULES: &[(&str, ModuleFactory)] = &[
    ("math", math::module),
    ("statistics", statistics::module),
    ("datetime", datetime::module),
    ("json", json::module),
    ("table", table::module),
];

pub(crate) type NativeImpl = fn(&mut Interpreter<'_>, CallArgs) -> ExecResult<Value>;

/// Namespace of native functions, keyed by their names.
pub(crate) fn functions(entries: &[(&str, NativeImpl)]) -> Namespace {
    entries
        .iter()
        .map(|(name, f)| (name.to_string(), NativeFunction::value(*name, *f)))
        .collect()
}
