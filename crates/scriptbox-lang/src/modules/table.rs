//! `table`: constructors for the tabular value scripts return as `result`.

use std::sync::Arc;

use scriptbox_core::types::Table;

use crate::convert::table_from_value;
use crate::error::{ExcKind, ExecResult};
use crate::interp::Interpreter;
use crate::value::{raise, CallArgs, Module, NativeFunction, Value};

use super::{functions, NativeImpl};

const FUNCTIONS: &[(&str, NativeImpl)] = &[("from_records", from_records), ("concat", concat)];

pub fn module() -> Module {
    let mut ns = functions(FUNCTIONS);
    ns.insert(
        "Table".into(),
        Value::Native(Arc::new(NativeFunction::new("Table", new_table))),
    );
    Module::new("table", ns)
}

fn column_names(interp: &mut Interpreter<'_>, v: Option<Value>) -> ExecResult<Option<Vec<String>>> {
    match v {
        None | Some(Value::None) => Ok(None),
        Some(v) => interp
            .iterate(&v)?
            .iter()
            .map(|n| n.as_str("column name").map(|s| s.to_string()))
            .collect::<ExecResult<Vec<_>>>()
            .map(Some),
    }
}

/// `Table(data=None, columns=None)`.
fn new_table(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [data, columns] = args.bind("Table", ["data", "columns"], 0)?;
    let columns = column_names(interp, columns)?;
    Ok(Value::table(table_from_value(
        &data.unwrap_or(Value::None),
        columns,
    )?))
}

fn from_records(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [rows, columns] = args.bind("from_records", ["records", "columns"], 1)?;
    let rows = rows.unwrap_or(Value::None);
    if !matches!(rows, Value::List(_) | Value::Tuple(_) | Value::Iterator(_)) {
        return raise(
            ExcKind::TypeError,
            format!("from_records() expects a list of rows, not '{}'", rows.type_name()),
        );
    }
    let columns = column_names(interp, columns)?;
    Ok(Value::table(table_from_value(&rows, columns)?))
}

fn concat(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [tables] = args.bind("concat", ["tables"], 1)?;
    let mut parts = Vec::new();
    for v in interp.iterate(&tables.unwrap_or(Value::None))? {
        match v {
            Value::Table(t) => parts.push(t.read().clone()),
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!("concat() expects tables, got '{}'", other.type_name()),
                )
            }
        }
    }
    Ok(Value::table(Table::concat_rows(&parts)))
}
