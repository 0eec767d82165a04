//! Conversions between script values, table cells, tables and JSON.

use scriptbox_core::serialize;
use scriptbox_core::types::{Column, Scalar, Table};
use scriptbox_core::wire::WireTable;
use serde_json::Value as Json;

use crate::error::{ExecResult, Exception};
use crate::ops;
use crate::value::{Dict, Value};

/// Script value for a table cell. Null cells become `None`.
pub fn scalar_to_value(s: &Scalar) -> Value {
    match s {
        Scalar::Null => Value::None,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::I32(i) => Value::Int(*i as i64),
        Scalar::I64(i) => Value::Int(*i),
        Scalar::U64(u) => match i64::try_from(*u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(*u as f64),
        },
        Scalar::F32(f) => Value::Float(*f as f64),
        Scalar::F64(f) => Value::Float(*f),
        Scalar::Str(s) => Value::str(s),
        Scalar::Date(d) => Value::Date(*d),
        Scalar::DateTime(dt) => Value::DateTime(*dt),
        Scalar::Duration(d) => Value::TimeDelta(*d),
        Scalar::Period(p) => Value::str(p.to_string()),
        Scalar::Interval(i) => Value::str(i.to_string()),
    }
}

/// Table cell for a script value. Containers cannot be stored in a cell.
pub fn value_to_scalar(v: &Value) -> ExecResult<Scalar> {
    Ok(match v {
        Value::None => Scalar::Null,
        Value::Bool(b) => Scalar::Bool(*b),
        Value::Int(i) => Scalar::I64(*i),
        Value::Float(f) => Scalar::F64(*f),
        Value::Str(s) => Scalar::Str(s.to_string()),
        Value::Date(d) => Scalar::Date(*d),
        Value::DateTime(dt) => Scalar::DateTime(*dt),
        Value::TimeDelta(d) => Scalar::Duration(*d),
        other => {
            return Err(Exception::type_error(format!(
                "cannot store a value of type '{}' in a table cell",
                other.type_name()
            )))
        }
    })
}

pub fn json_to_value(j: &Json) -> Value {
    match j {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s),
        Json::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        Json::Object(map) => {
            Value::dict_from_pairs(map.iter().map(|(k, v)| (k.clone(), json_to_value(v))))
        }
    }
}

fn json_key(v: &Value) -> ExecResult<String> {
    Ok(match v {
        Value::Str(s) => s.to_string(),
        Value::Int(_) | Value::Float(_) => v.repr(),
        Value::Bool(true) => "true".into(),
        Value::Bool(false) => "false".into(),
        Value::None => "null".into(),
        other => {
            return Err(Exception::type_error(format!(
                "keys must be str, int, float, bool or None, not {}",
                other.type_name()
            )))
        }
    })
}

pub fn value_to_json(v: &Value) -> ExecResult<Json> {
    Ok(match v {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| Exception::value_error("Out of range float values are not JSON compliant"))?,
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(_) | Value::Tuple(_) => {
            Json::Array(ops::iterate(v)?.iter().map(value_to_json).collect::<ExecResult<_>>()?)
        }
        Value::Dict(d) => {
            let items = d.read().items();
            let mut map = serde_json::Map::new();
            for (k, v) in items {
                map.insert(json_key(&k)?, value_to_json(&v)?);
            }
            Json::Object(map)
        }
        other => {
            return Err(Exception::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    })
}

/// Table value decoded from a wire table.
pub fn wire_to_value(wire: &WireTable) -> ExecResult<Value> {
    Ok(Value::table(serialize::from_wire(wire)?))
}

/// Row dicts of a table, in column order.
pub fn table_records(table: &Table) -> Value {
    Value::list(
        table
            .to_records()
            .into_iter()
            .map(|record| {
                Value::dict_from_pairs(
                    record
                        .into_iter()
                        .map(|(name, cell)| (name, scalar_to_value(&cell))),
                )
            })
            .collect(),
    )
}

fn record_from_dict(d: &Dict) -> ExecResult<Vec<(String, Scalar)>> {
    d.items()
        .iter()
        .map(|(k, v)| Ok((k.to_str(), value_to_scalar(v)?)))
        .collect()
}

/// Build a table from script data: a dict of columns, a list of row dicts,
/// a list of row sequences, or another table.
pub fn table_from_value(data: &Value, columns: Option<Vec<String>>) -> ExecResult<Table> {
    let table = match data {
        Value::None => Table::new(),
        Value::Table(t) => t.read().clone(),
        Value::Dict(d) => {
            let items = d.read().items();
            let mut cols = Vec::with_capacity(items.len());
            for (name, values) in items {
                let cells = match &values {
                    Value::List(_) | Value::Tuple(_) | Value::Iterator(_) => ops::iterate(&values)?
                        .iter()
                        .map(value_to_scalar)
                        .collect::<ExecResult<Vec<_>>>()?,
                    scalar => vec![value_to_scalar(scalar)?],
                };
                cols.push(Column::from_values(name.to_str(), cells));
            }
            Table::from_columns(cols)
                .map_err(|_| Exception::value_error("All arrays must be of the same length"))?
        }
        Value::List(_) | Value::Tuple(_) | Value::Iterator(_) => {
            let rows = ops::iterate(data)?;
            let mut table = Table::new();
            let mut width = 0usize;
            for (i, row) in rows.iter().enumerate() {
                let record = match row {
                    Value::Dict(d) => record_from_dict(&d.read())?,
                    Value::List(_) | Value::Tuple(_) => {
                        let cells = ops::iterate(row)?;
                        width = width.max(cells.len());
                        cells
                            .iter()
                            .enumerate()
                            .map(|(c, v)| {
                                let name = columns
                                    .as_ref()
                                    .and_then(|names| names.get(c).cloned())
                                    .unwrap_or_else(|| c.to_string());
                                Ok((name, value_to_scalar(v)?))
                            })
                            .collect::<ExecResult<Vec<_>>>()?
                    }
                    other => {
                        return Err(Exception::type_error(format!(
                            "row {} must be a dict, list or tuple, not '{}'",
                            i,
                            other.type_name()
                        )))
                    }
                };
                table.push_row(record);
            }
            if let Some(names) = &columns {
                if width > names.len() {
                    return Err(Exception::value_error(format!(
                        "{} columns passed, passed data had {} columns",
                        names.len(),
                        width
                    )));
                }
            }
            table
        }
        other => {
            return Err(Exception::type_error(format!(
                "cannot build a table from '{}'",
                other.type_name()
            )))
        }
    };

    match columns {
        None => Ok(table),
        Some(names) => {
            let mut out = Table::new();
            let rows = table.num_rows();
            for name in names {
                let column = table
                    .column(&name)
                    .cloned()
                    .unwrap_or_else(|| Column::from_values(name.clone(), vec![Scalar::Null; rows]));
                out.columns.push(column);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_core::schema::DataType;

    #[test]
    fn cells_round_trip_through_values() {
        for s in [
            Scalar::Null,
            Scalar::Bool(true),
            Scalar::I64(7),
            Scalar::F64(1.5),
            Scalar::Str("x".into()),
        ] {
            assert_eq!(value_to_scalar(&scalar_to_value(&s)).unwrap(), s);
        }
        assert!(matches!(scalar_to_value(&Scalar::U64(u64::MAX)), Value::Float(_)));
        assert!(value_to_scalar(&Value::list(vec![])).is_err());
    }

    #[test]
    fn table_from_column_dict() {
        let data = Value::dict_from_pairs(vec![
            ("a".to_string(), Value::list(vec![Value::Int(1), Value::Int(2)])),
            ("b".to_string(), Value::list(vec![Value::str("x"), Value::None])),
        ]);
        let t = table_from_value(&data, None).unwrap();
        assert_eq!(t.column_names(), vec!["a", "b"]);
        assert_eq!(t.column("a").unwrap().dtype, DataType::Int64);
        assert_eq!(t.num_rows(), 2);

        let ragged = Value::dict_from_pairs(vec![
            ("a".to_string(), Value::list(vec![Value::Int(1)])),
            ("b".to_string(), Value::list(vec![])),
        ]);
        assert!(table_from_value(&ragged, None).is_err());
    }

    #[test]
    fn table_from_rows_and_records() {
        let rows = Value::list(vec![
            Value::tuple(vec![Value::Int(1), Value::str("a")]),
            Value::tuple(vec![Value::Int(2), Value::str("b")]),
        ]);
        let t = table_from_value(&rows, Some(vec!["n".into(), "s".into()])).unwrap();
        assert_eq!(t.column_names(), vec!["n", "s"]);

        let records = table_records(&t);
        let back = table_from_value(&records, None).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn json_conversion() {
        let j: Json = serde_json::json!({"a": [1, 2.5, null, true], "b": {"c": "d"}});
        let v = json_to_value(&j);
        assert_eq!(value_to_json(&v).unwrap(), j);
        assert!(value_to_json(&Value::Float(f64::NAN)).is_err());
    }
}
