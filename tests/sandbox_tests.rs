//! End-to-end runs through the sandbox boundary.

use std::sync::Arc;

use scriptbox_core::config::SandboxConfig;
use scriptbox_core::id::{DataSourceId, QueryId};
use scriptbox_core::schema::{ColumnDescriptor, ColumnType, SchemaTable, SourceSchema};
use scriptbox_core::wire::{Record, WireTable};
use scriptbox_exec::{Identity, InMemoryHost, Outcome, RunState, Sandbox, StaticSource};
use serde_json::json;

fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::default(), Arc::new(InMemoryHost::new())).expect("default config is valid")
}

fn user() -> Identity {
    Identity::new(1, "analyst").with_email("analyst@example.com")
}

fn orders() -> WireTable {
    let rows = [("north", 10.0), ("south", 4.5), ("north", 2.5), ("east", 1.0)]
        .iter()
        .map(|(region, amount)| {
            let mut r = Record::new();
            r.insert("region".into(), json!(region));
            r.insert("amount".into(), json!(amount));
            r
        })
        .collect();
    WireTable::new(
        vec![
            ColumnDescriptor::new("region", ColumnType::String),
            ColumnDescriptor::new("amount", ColumnType::Float),
        ],
        rows,
    )
}

fn host() -> InMemoryHost {
    let warehouse = StaticSource::new(SourceSchema::new(vec![SchemaTable {
        name: "orders".into(),
        columns: vec!["region".into(), "amount".into()],
    }]))
    .with_query("select * from orders", orders());
    InMemoryHost::new()
        .with_source(DataSourceId::new(1), "warehouse", Arc::new(warehouse))
        .with_query(QueryId::new(42), Some(orders()))
        .with_query(QueryId::new(43), None)
}

#[test]
fn empty_script_yields_empty_table_and_log() {
    let mut sb = sandbox();
    let (result, error) = sb.run("", &user());
    assert_eq!(error, None);
    let result = result.unwrap();
    assert_eq!(result.table.columns.len(), 0);
    assert_eq!(result.table.rows.len(), 0);
    assert!(result.log.is_empty());
}

#[test]
fn print_then_build_a_table() {
    let mut sb = sandbox();
    let script = "print(\"hello\")\nresult = table.Table({\"col\": [42]})\n";
    let (result, error) = sb.run(script, &user());
    assert_eq!(error, None);
    let result = result.unwrap();
    assert_eq!(result.log, vec!["hello"]);
    assert_eq!(result.table.columns[0].name, "col");
    assert_eq!(result.table.columns[0].column_type, ColumnType::Integer);
    assert_eq!(result.table.rows.len(), 1);
    assert_eq!(result.table.rows[0]["col"], json!(42));
}

#[test]
fn division_by_zero_reports_kind_line_and_text() {
    let mut sb = sandbox();
    let script = "x = 1\ny = 2\nresult = 1/0\nz = 3\nw = 4\n";
    let (result, error) = sb.run(script, &user());
    assert!(result.is_none());
    let error = error.unwrap();
    assert!(error.contains("ZeroDivisionError"), "{error}");
    assert!(error.contains("result = 1/0"), "{error}");
    assert!(error.contains('3'), "{error}");
    assert!(error.ends_with("caused by line 3: result = 1/0"), "{error}");
}

#[test]
fn errors_inside_functions_point_at_the_calling_statement() {
    let mut sb = sandbox();
    let script = "def boom(d):\n    return d['missing']\n\nvalue = boom({})\n";
    let error = sb.run(script, &user()).1.unwrap();
    assert!(error.starts_with("KeyError"), "{error}");
    assert!(error.ends_with("caused by line 4: value = boom({})"), "{error}");

    let script = "rows = [1, 0]\nfor r in rows:\n    # invert each row\n    inv = 1 / r\n";
    let error = sb.run(script, &user()).1.unwrap();
    assert!(error.ends_with("caused by line 4:     inv = 1 / r"), "{error}");
}

#[test]
fn statements_after_blank_lines_leave_the_block() {
    let mut sb = sandbox();
    for script in [
        "for x in []:\n    pass\n\nresult = table.Table({'col': [42]})\n",
        "if False:\n    y = 1\n# set the result\nresult = table.Table({'col': [42]})\n",
        "while False:\n    pass\n    \n\t\n  # stray comment\nresult = table.Table({'col': [42]})\n",
    ] {
        let result = sb.execute(script, &user()).unwrap();
        assert_eq!(result.table.rows.len(), 1, "{script:?}");
        assert_eq!(result.table.rows[0]["col"], json!(42), "{script:?}");
    }

    let result = sb
        .execute("def f():\n    return 1\n\nprint('after-blank')\n", &user())
        .unwrap();
    assert_eq!(result.log, vec!["after-blank"]);
}

#[test]
fn blank_and_comment_lines_between_nested_blocks() {
    let mut sb = sandbox();
    let script = r#"
# Build a small report.

def classify(n):
    # small numbers first
    if n < 2:

        return 'small'

    # everything else
    return 'large'


labels = []
for n in range(4):
    label = classify(n)

    if label == 'large':
        # keep large ones twice
        labels.append(label)

    labels.append(label)

print(len(labels))

result = table.Table({'label': labels})
"#;
    let result = sb.execute(script, &user()).unwrap();
    assert_eq!(result.log, vec!["6"]);
    assert_eq!(result.table.rows.len(), 6);
    assert_eq!(result.table.rows[0]["label"], json!("small"));
    assert_eq!(result.table.rows[5]["label"], json!("large"));
}

#[test]
fn result_must_stay_a_table() {
    let mut sb = sandbox();
    let (result, error) = sb.run("result = [1, 2, 3]\n", &user());
    assert!(result.is_none());
    assert_eq!(
        error.as_deref(),
        Some("ResultTypeError: result is not a table (got list)")
    );
}

#[test]
fn scripts_query_the_host_and_aggregate() {
    let mut sb = Sandbox::new(SandboxConfig::default(), Arc::new(host())).unwrap();
    let script = r#"
orders = execute_query("warehouse", "select * from orders")
totals = orders.group_by("region", {"amount": "sum"})
result = totals.sort_values("amount", ascending=False)
print("regions:", len(result))
"#;
    let result = sb.execute(script, &user()).unwrap();
    assert_eq!(result.log, vec!["regions: 3"]);
    let names: Vec<&str> = result.table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["region", "amount"]);
    assert_eq!(result.table.rows[0]["region"], json!("north"));
    assert_eq!(result.table.rows[0]["amount"], json!(12.5));
    assert_eq!(result.table.columns[1].column_type, ColumnType::Float);
}

#[test]
fn stored_results_and_identity_are_reachable() {
    let mut sb = Sandbox::new(SandboxConfig::default(), Arc::new(host())).unwrap();
    let script = r#"
me = get_current_user()
stored = get_query_result(42)
stored.add_column("owner", [me["name"]] * len(stored))
result = stored.select("owner", "amount").head(2)
"#;
    let result = sb.execute(script, &user()).unwrap();
    assert_eq!(result.table.rows.len(), 2);
    assert_eq!(result.table.rows[0]["owner"], json!("analyst"));
    assert_eq!(result.table.columns[0].column_type, ColumnType::String);
}

#[test]
fn host_errors_surface_with_their_kind() {
    let mut sb = Sandbox::new(SandboxConfig::default(), Arc::new(host())).unwrap();
    let cases = [
        ("x = get_source_schema('nowhere')\n", "UnknownDataSource: Wrong data source name/id: nowhere."),
        ("x = get_query_result(99)\n", "UnknownQuery: Query id 99 does not exist."),
        ("x = get_query_result(43)\n", "NoResultsYet: Query does not have results yet."),
        ("x = execute_query(1, 'drop table orders')\n", "QueryExecutionError: "),
    ];
    for (script, prefix) in cases {
        let error = sb.run(script, &user()).1.unwrap();
        assert!(error.starts_with(prefix), "{error}");
        assert!(error.ends_with(&format!("caused by line 1: {}", script.trim_end())), "{error}");
    }
}

#[test]
fn input_table_round_trips_through_a_script() {
    let mut sb = sandbox();
    let script = "result = result.filter(lambda row: row['amount'] > 2)\n";
    let result = sb.execute_with_input(script, &user(), Some(&orders())).unwrap();
    assert_eq!(result.table.rows.len(), 3);
    assert_eq!(result.table.rows[2]["amount"], json!(2.5));
}

#[test]
fn runaway_recursion_is_a_recursion_error() {
    let config = SandboxConfig {
        max_call_depth: 30,
        ..SandboxConfig::default()
    };
    let mut sb = Sandbox::new(config, Arc::new(InMemoryHost::new())).unwrap();
    let script = "def f(n):\n    return f(n + 1)\n\nf(0)\n";
    let error = sb.run(script, &user()).1.unwrap();
    assert!(error.starts_with("RecursionError"), "{error}");
}

#[test]
fn deep_but_bounded_recursion_fits_the_run_stack() {
    let mut sb = sandbox();
    let script = "def depth(n):\n    if n == 0:\n        return 0\n    return 1 + depth(n - 1)\n\nresult = table.Table({'d': [depth(90)]})\n";
    let result = sb.execute(script, &user()).unwrap();
    assert_eq!(result.table.rows[0]["d"], json!(90));
}

#[test]
fn state_machine_and_run_record_track_each_run() {
    let mut sb = sandbox();
    assert_eq!(sb.state(), RunState::Idle);
    assert!(sb.last_record().is_none());

    sb.run("print('ok')\n", &user());
    assert_eq!(sb.state(), RunState::Succeeded);
    let record = sb.last_record().unwrap().clone();
    assert_eq!(record.outcome, Outcome::Succeeded);
    assert_eq!(record.log_lines, 1);
    assert_eq!(record.script_hash, scriptbox_core::hash::hash_str("print('ok')\n"));

    sb.run("x = undefined_name\n", &user());
    assert_eq!(sb.state(), RunState::Failed);
    let failed = sb.last_record().unwrap();
    assert_eq!(failed.error_kind.as_deref(), Some("NameError"));
    assert_ne!(failed.id, record.id);
}

#[test]
fn run_json_returns_text_or_error() {
    let mut sb = sandbox();
    let (json_text, error) = sb.run_json("result = table.from_records([{'a': 1, 'b': None}])\n", &user());
    assert_eq!(error, None);
    let v: serde_json::Value = serde_json::from_str(&json_text.unwrap()).unwrap();
    assert_eq!(v["rows"], json!([{"a": 1, "b": null}]));
    assert_eq!(v["columns"][0], json!({"name": "a", "friendly_name": "a", "type": "integer"}));
    assert_eq!(v["log"], json!([]));

    let (json_text, error) = sb.run_json("result = None\n", &user());
    assert!(json_text.is_none());
    assert!(error.unwrap().starts_with("ResultTypeError"));
}

#[test]
fn separate_sandboxes_run_in_parallel() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let mut sb = sandbox();
                let script = format!("print({i})\nresult = table.Table({{'n': [{i}]}})\n");
                sb.execute(&script, &user()).unwrap()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        assert_eq!(result.log, vec![i.to_string()]);
        assert_eq!(result.table.rows[0]["n"], json!(i));
    }
}
