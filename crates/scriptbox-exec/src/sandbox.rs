//! Sandbox execution engine.
//!
//! One `Sandbox` owns the import resolver (allow-list plus module cache) and
//! the capture sink for its lifetime. Every run gets a fresh namespace:
//! host accessors, the pre-bound `math` and `table` modules, and `result`
//! seeded with an empty table (or the caller's input table). The script runs
//! on a dedicated thread with a configurable stack; afterwards `result` must
//! hold a table, which is serialized to the wire format with the captured
//! log attached.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use scriptbox_core::config::SandboxConfig;
use scriptbox_core::hash::hash_str;
use scriptbox_core::id::RunId;
use scriptbox_core::serialize::{from_wire, to_wire};
use scriptbox_core::types::Table;
use scriptbox_core::wire::{WireResult, WireTable};
use scriptbox_lang::imports::ModuleFactory;
use scriptbox_lang::{
    CaptureSink, CompileError, ExecResult, Guards, ImportResolver, Interpreter, Namespace, Value,
    DEFAULT_GUARDS,
};

use crate::accessors;
use crate::diagnostics::Diagnostic;
use crate::host::{HostServices, Identity};
use crate::record::RunRecord;

/// Modules bound in every run namespace without an import statement.
pub const PRELOADED_MODULES: &[&str] = &["math", "table"];

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("SyntaxError: {0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Runtime(Diagnostic),

    #[error("ResultTypeError: result is not a table (got {0})")]
    ResultType(&'static str),

    #[error("{}: {}", .0.kind_name(), .0)]
    Serialize(#[from] scriptbox_core::Error),

    #[error("InternalError: {0}")]
    Internal(String),
}

impl SandboxError {
    /// Kind name as it appears at the start of the error text.
    pub fn kind(&self) -> &str {
        match self {
            SandboxError::Compile(_) => "SyntaxError",
            SandboxError::Runtime(d) => &d.kind,
            SandboxError::ResultType(_) => "ResultTypeError",
            SandboxError::Serialize(e) => e.kind_name(),
            SandboxError::Internal(_) => "InternalError",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Compiling,
    Executing,
    Succeeded,
    Failed,
}

pub struct Sandbox {
    config: SandboxConfig,
    host: Arc<dyn HostServices>,
    guards: Guards,
    imports: ImportResolver,
    sink: CaptureSink,
    state: RunState,
    last_record: Option<RunRecord>,
}

impl Sandbox {
    pub fn new(config: SandboxConfig, host: Arc<dyn HostServices>) -> scriptbox_core::Result<Self> {
        config.validate()?;
        let imports = ImportResolver::from_config(&config);
        debug!(allowed = ?imports.allowed(), "sandbox created");
        Ok(Self {
            config,
            host,
            guards: DEFAULT_GUARDS.clone(),
            imports,
            sink: CaptureSink::new(),
            state: RunState::Idle,
            last_record: None,
        })
    }

    /// Replace the attribute, item and iteration hooks.
    pub fn with_guards(mut self, guards: Guards) -> Self {
        self.guards = guards;
        self
    }

    /// Register a host-provided native module. It is importable only when
    /// its name is also on the allow-list.
    pub fn with_native_module(mut self, name: &str, factory: ModuleFactory) -> Self {
        self.imports = self.imports.with_native(name, factory);
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn imports(&self) -> &ImportResolver {
        &self.imports
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Record of the most recent run.
    pub fn last_record(&self) -> Option<&RunRecord> {
        self.last_record.as_ref()
    }

    /// Run boundary: exactly one side of the pair is set.
    pub fn run(&mut self, script: &str, user: &Identity) -> (Option<WireResult>, Option<String>) {
        match self.execute(script, user) {
            Ok(result) => (Some(result), None),
            Err(e) => (None, Some(e.to_string())),
        }
    }

    /// Like [`Sandbox::run`] with the result already encoded as JSON text.
    pub fn run_json(&mut self, script: &str, user: &Identity) -> (Option<String>, Option<String>) {
        let encoded = self.execute(script, user).and_then(|result| {
            serde_json::to_string(&result)
                .map_err(|e| SandboxError::Serialize(scriptbox_core::Error::from(e)))
        });
        match encoded {
            Ok(json) => (Some(json), None),
            Err(e) => (None, Some(e.to_string())),
        }
    }

    pub fn execute(&mut self, script: &str, user: &Identity) -> Result<WireResult, SandboxError> {
        self.execute_with_input(script, user, None)
    }

    /// Execute with `result` pre-seeded from `input` instead of an empty table.
    pub fn execute_with_input(
        &mut self,
        script: &str,
        user: &Identity,
        input: Option<&WireTable>,
    ) -> Result<WireResult, SandboxError> {
        let run_id = RunId::new();
        let script_hash = hash_str(script);
        let span = tracing::debug_span!("run", run_id = %run_id, script = %script_hash.short());
        let _entered = span.enter();

        let record = RunRecord::new(run_id, script_hash, now_ms());
        self.transition(RunState::Idle);
        self.sink.reset();

        let outcome = self.execute_inner(script, user, input, &span);
        let finished = now_ms();
        match &outcome {
            Ok(result) => {
                self.transition(RunState::Succeeded);
                debug!(
                    rows = result.table.rows.len(),
                    columns = result.table.columns.len(),
                    log_lines = result.log.len(),
                    "run succeeded"
                );
                self.last_record = Some(record.succeed(
                    finished,
                    result.table.rows.len(),
                    result.table.columns.len(),
                    result.log.len(),
                ));
            }
            Err(e) => {
                self.transition(RunState::Failed);
                if matches!(e, SandboxError::Internal(_)) {
                    warn!(error = %e, "run aborted");
                } else {
                    debug!(kind = e.kind(), "run failed");
                }
                // Output of a failed run is not reported.
                self.sink.reset();
                self.last_record = Some(record.fail(finished, e.kind()));
            }
        }
        outcome
    }

    fn execute_inner(
        &mut self,
        script: &str,
        user: &Identity,
        input: Option<&WireTable>,
        span: &tracing::Span,
    ) -> Result<WireResult, SandboxError> {
        self.transition(RunState::Compiling);
        let program = scriptbox_lang::compile(script)?;

        let seed = match input {
            Some(wire) => from_wire(wire)?,
            None => Table::new(),
        };
        let mut ns = Namespace::new();
        accessors::install(&mut ns, self.host.clone(), user.clone());
        ns.insert("result".into(), Value::table(seed));
        let globals = Arc::new(RwLock::new(ns));

        self.transition(RunState::Executing);
        let value = self
            .run_program(&program, globals, span)?
            .map_err(|exc| SandboxError::Runtime(Diagnostic::from_exception(&exc, script)))?;

        let table = match value {
            Value::Table(t) => to_wire(&t.read()),
            other => return Err(SandboxError::ResultType(other.type_name())),
        };
        Ok(WireResult::new(table, self.sink.take_lines()))
    }

    /// Run on a dedicated thread sized by `stack_size_bytes` and hand back
    /// the final `result` binding.
    fn run_program(
        &mut self,
        program: &scriptbox_lang::Program,
        globals: scriptbox_lang::SharedNamespace,
        span: &tracing::Span,
    ) -> Result<ExecResult<Value>, SandboxError> {
        let guards = &self.guards;
        let imports = &self.imports;
        let sink = &mut self.sink;
        let max_depth = self.config.max_call_depth;
        let stack_size = self.config.stack_size_bytes;

        let body = move || -> ExecResult<Value> {
            let _entered = span.enter();
            let mut interp = Interpreter::new(guards, imports, sink).with_max_depth(max_depth);
            for name in PRELOADED_MODULES {
                let module = imports.resolve(name, &mut interp)?;
                globals.write().insert(name.to_string(), Value::Module(module));
            }
            interp.run(program, &globals)?;
            let result = globals.read().get("result").cloned();
            Ok(result.unwrap_or(Value::None))
        };

        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name("scriptbox-run".into())
                .stack_size(stack_size)
                .spawn_scoped(scope, body)
                .map_err(|e| SandboxError::Internal(format!("cannot start run thread: {}", e)))?;
            handle
                .join()
                .map_err(|_| SandboxError::Internal("run thread panicked".into()))
        })
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "run state");
        }
        self.state = next;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHost;
    use crate::record::Outcome;
    use scriptbox_core::schema::ColumnType;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::default(), Arc::new(InMemoryHost::new())).unwrap()
    }

    #[test]
    fn empty_script_returns_the_empty_seed() {
        let mut sb = sandbox();
        let (result, error) = sb.run("", &Identity::anonymous());
        assert!(error.is_none(), "{:?}", error);
        let result = result.unwrap();
        assert!(result.table.columns.is_empty());
        assert!(result.table.rows.is_empty());
        assert!(result.log.is_empty());
        assert_eq!(sb.state(), RunState::Succeeded);
    }

    #[test]
    fn print_and_table_result() {
        let mut sb = sandbox();
        let script = "print(\"hello\")\nresult = table.Table({\"col\": [42]})\n";
        let result = sb.execute(script, &Identity::anonymous()).unwrap();
        assert_eq!(result.log, vec!["hello".to_string()]);
        assert_eq!(result.table.columns[0].column_type, ColumnType::Integer);
        assert_eq!(result.table.rows[0]["col"], serde_json::json!(42));
    }

    #[test]
    fn runtime_error_is_line_attributed() {
        let mut sb = sandbox();
        let script = "a = 1\nb = 2\nresult = 1/0\nc = 3\nd = 4\n";
        let (result, error) = sb.run(script, &Identity::anonymous());
        assert!(result.is_none());
        let error = error.unwrap();
        assert!(error.starts_with("ZeroDivisionError: "), "{error}");
        assert!(error.ends_with("caused by line 3: result = 1/0"), "{error}");
        assert_eq!(sb.state(), RunState::Failed);
        assert_eq!(sb.last_record().unwrap().outcome, Outcome::Failed);
    }

    #[test]
    fn compile_errors_are_syntax_errors() {
        let mut sb = sandbox();
        let err = sb.execute("x = eval('1')\n", &Identity::anonymous()).unwrap_err();
        assert_eq!(err.kind(), "SyntaxError");
        assert!(err.to_string().starts_with("SyntaxError: "));
    }

    #[test]
    fn non_table_result_is_rejected() {
        let mut sb = sandbox();
        let err = sb.execute("result = 5\n", &Identity::anonymous()).unwrap_err();
        assert_eq!(err.to_string(), "ResultTypeError: result is not a table (got int)");
    }

    #[test]
    fn output_does_not_leak_between_runs() {
        let mut sb = sandbox();
        sb.execute("print('first')\n", &Identity::anonymous()).unwrap();
        let second = sb.execute("print('second')\n", &Identity::anonymous()).unwrap();
        assert_eq!(second.log, vec!["second".to_string()]);
    }

    #[test]
    fn names_do_not_leak_between_runs() {
        let mut sb = sandbox();
        sb.execute("leftover = 1\n", &Identity::anonymous()).unwrap();
        let err = sb.execute("x = leftover\n", &Identity::anonymous()).unwrap_err();
        assert_eq!(err.kind(), "NameError");
    }

    #[test]
    fn input_table_seeds_result() {
        let mut sb = sandbox();
        let mut row = scriptbox_core::wire::Record::new();
        row.insert("n".into(), serde_json::json!(1.0));
        let input = WireTable::new(
            vec![scriptbox_core::schema::ColumnDescriptor::new("n", ColumnType::Float)],
            vec![row],
        );
        let out = sb
            .execute_with_input("result = result.head(1)\n", &Identity::anonymous(), Some(&input))
            .unwrap();
        assert_eq!(out.table.columns[0].column_type, ColumnType::Integer);
        assert_eq!(out.table.rows[0]["n"], serde_json::json!(1));
    }

    #[test]
    fn run_json_encodes_the_result() {
        let mut sb = sandbox();
        let (json, error) = sb.run_json("print('hi')\n", &Identity::anonymous());
        assert!(error.is_none());
        let v: serde_json::Value = serde_json::from_str(&json.unwrap()).unwrap();
        assert_eq!(v["log"][0], "hi");
        assert_eq!(v["rows"], serde_json::json!([]));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SandboxConfig {
            max_call_depth: 0,
            ..SandboxConfig::default()
        };
        assert!(Sandbox::new(config, Arc::new(InMemoryHost::new())).is_err());
    }
}
