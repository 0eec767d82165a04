//! Script-callable accessors into the host: `get_source_schema`,
//! `execute_query`, `get_query_result` and `get_current_user`.
//!
//! Each accessor is a native function closing over the host and the run's
//! identity. Host failures surface as script exceptions, so a script may
//! let them escape (and get a line-attributed error) like any other.

use std::sync::Arc;

use tracing::debug;

use scriptbox_core::id::{DataSourceId, DataSourceRef, QueryId};
use scriptbox_lang::convert::{json_to_value, wire_to_value};
use scriptbox_lang::value::raise;
use scriptbox_lang::{ExcKind, Exception, Namespace, NativeFunction, Value};

use crate::host::{HostServices, Identity, StoreError};

pub const ACCESSOR_NAMES: &[&str] = &[
    "get_source_schema",
    "execute_query",
    "get_query_result",
    "get_current_user",
];

/// Bind all accessors into a run namespace.
pub fn install(ns: &mut Namespace, host: Arc<dyn HostServices>, user: Identity) {
    let user = Arc::new(user);

    let h = host.clone();
    ns.insert(
        "get_source_schema".into(),
        NativeFunction::value("get_source_schema", move |_, args| {
            let [source] = args.bind("get_source_schema", ["data_source"], 1)?;
            let source = source_ref(source.unwrap_or(Value::None))?;
            debug!(source = %source, "get_source_schema");
            let runner = match h.lookup(&source) {
                Some(r) => r,
                None => return unknown_source(&source),
            };
            let schema = runner
                .schema()
                .map_err(|e| Exception::new(ExcKind::QueryExecutionError, e))?;
            let json = serde_json::to_value(&schema)
                .map_err(|e| Exception::new(ExcKind::RuntimeError, e.to_string()))?;
            Ok(json_to_value(&json))
        }),
    );

    let h = host.clone();
    let u = user.clone();
    ns.insert(
        "execute_query".into(),
        NativeFunction::value("execute_query", move |_, args| {
            let [source, query] = args.bind("execute_query", ["data_source", "query"], 2)?;
            let source = source_ref(source.unwrap_or(Value::None))?;
            let query = query.unwrap_or(Value::None).as_str("query")?;
            debug!(source = %source, "execute_query");
            let runner = match h.lookup(&source) {
                Some(r) => r,
                None => return unknown_source(&source),
            };
            match runner.run_query(&query, &u) {
                Ok(wire) => wire_to_value(&wire),
                Err(message) => raise(ExcKind::QueryExecutionError, message),
            }
        }),
    );

    let h = host;
    ns.insert(
        "get_query_result".into(),
        NativeFunction::value("get_query_result", move |_, args| {
            let [id] = args.bind("get_query_result", ["query_id"], 1)?;
            let id = QueryId::new(id.unwrap_or(Value::None).as_int("query_id")?);
            debug!(query = %id, "get_query_result");
            match h.latest_result(id) {
                Ok(Some(wire)) => wire_to_value(&wire),
                Ok(None) => raise(ExcKind::NoResultsYet, "Query does not have results yet."),
                Err(e @ StoreError::UnknownQuery(_)) => raise(ExcKind::UnknownQuery, e.to_string()),
                Err(e) => raise(ExcKind::RuntimeError, e.to_string()),
            }
        }),
    );

    ns.insert(
        "get_current_user".into(),
        NativeFunction::value("get_current_user", move |_, args| {
            args.bind::<0>("get_current_user", [], 0)?;
            let json = serde_json::to_value(&*user)
                .map_err(|e| Exception::new(ExcKind::RuntimeError, e.to_string()))?;
            Ok(json_to_value(&json))
        }),
    );
}

/// Integers name a source by id, strings by name.
fn source_ref(v: Value) -> Result<DataSourceRef, Exception> {
    match v {
        Value::Int(id) => Ok(DataSourceRef::Id(DataSourceId::new(id))),
        Value::Str(name) => Ok(DataSourceRef::Name(name.to_string())),
        other => Err(Exception::type_error(format!(
            "data source must be a name or an id, not '{}'",
            other.type_name()
        ))),
    }
}

fn unknown_source<T>(source: &DataSourceRef) -> Result<T, Exception> {
    raise(
        ExcKind::UnknownDataSource,
        format!("Wrong data source name/id: {}.", source),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_core::schema::{ColumnDescriptor, ColumnType, SchemaTable, SourceSchema};
    use scriptbox_core::wire::{Record, WireTable};
    use scriptbox_lang::{CallArgs, CaptureSink, ImportResolver, Interpreter, DEFAULT_GUARDS};

    use crate::host::{InMemoryHost, StaticSource};

    fn wire() -> WireTable {
        let mut row = Record::new();
        row.insert("n".into(), serde_json::json!(5));
        WireTable::new(vec![ColumnDescriptor::new("n", ColumnType::Integer)], vec![row])
    }

    fn namespace() -> Namespace {
        let source = StaticSource::new(SourceSchema::new(vec![SchemaTable {
            name: "events".into(),
            columns: vec!["id".into(), "ts".into()],
        }]))
        .with_query("select n", wire());
        let host = InMemoryHost::new()
            .with_source(DataSourceId::new(1), "warehouse", Arc::new(source))
            .with_query(QueryId::new(10), Some(wire()))
            .with_query(QueryId::new(11), None);
        let mut ns = Namespace::new();
        install(&mut ns, Arc::new(host), Identity::new(4, "ada").with_email("ada@example.com"));
        ns
    }

    fn call(name: &str, args: Vec<Value>) -> Result<Value, Exception> {
        let ns = namespace();
        let resolver = ImportResolver::new(Vec::new(), Vec::new());
        let mut sink = CaptureSink::new();
        let mut interp = Interpreter::new(&DEFAULT_GUARDS, &resolver, &mut sink);
        let f = ns.get(name).cloned().unwrap();
        interp.call(&f, CallArgs::new(args))
    }

    #[test]
    fn installs_every_accessor() {
        let ns = namespace();
        for name in ACCESSOR_NAMES {
            assert!(ns.contains_key(*name), "{name}");
        }
    }

    #[test]
    fn execute_query_decodes_the_wire_result() {
        let v = call("execute_query", vec![Value::str("warehouse"), Value::str("select n")]).unwrap();
        match v {
            Value::Table(t) => assert_eq!(t.read().num_rows(), 1),
            other => panic!("expected table, got {:?}", other),
        }
        let err = call("execute_query", vec![Value::Int(1), Value::str("select x")]).unwrap_err();
        assert_eq!(err.kind, ExcKind::QueryExecutionError);
    }

    #[test]
    fn unknown_source_names_the_reference() {
        let err = call("get_source_schema", vec![Value::Int(99)]).unwrap_err();
        assert_eq!(err.kind, ExcKind::UnknownDataSource);
        assert_eq!(err.message, "Wrong data source name/id: 99.");
        let err = call("get_source_schema", vec![Value::Float(1.5)]).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);
    }

    #[test]
    fn schema_is_a_list_of_tables() {
        let v = call("get_source_schema", vec![Value::str("warehouse")]).unwrap();
        assert_eq!(v.repr(), "[{'name': 'events', 'columns': ['id', 'ts']}]");
    }

    #[test]
    fn query_results_distinguish_unknown_and_pending() {
        assert!(matches!(call("get_query_result", vec![Value::Int(10)]), Ok(Value::Table(_))));
        let err = call("get_query_result", vec![Value::Int(11)]).unwrap_err();
        assert_eq!(err.kind, ExcKind::NoResultsYet);
        let err = call("get_query_result", vec![Value::Int(12)]).unwrap_err();
        assert_eq!(err.kind, ExcKind::UnknownQuery);
        assert_eq!(err.message, "Query id 12 does not exist.");
    }

    #[test]
    fn current_user_is_a_dict() {
        let v = call("get_current_user", vec![]).unwrap();
        let repr = v.repr();
        assert!(repr.contains("'name': 'ada'"), "{repr}");
        assert!(repr.contains("'email': 'ada@example.com'"), "{repr}");
    }
}
