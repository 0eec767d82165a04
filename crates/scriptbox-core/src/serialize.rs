//! Table <-> Wire conversion.
//!
//! `from_wire` applies the host-declared column types. `to_wire` ignores any
//! declared type and infers one per column from the storage family and the
//! values, then normalizes every cell into a JSON-safe scalar.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::schema::{ColumnDescriptor, ColumnType, DataType};
use crate::types::{duration_seconds, format_float, Column, Scalar, Table};
use crate::wire::{Record, WireTable};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Build an in-memory table from a wire table, coercing each column to its
/// declared type.
pub fn from_wire(wire: &WireTable) -> Result<Table> {
    for (row_idx, row) in wire.rows.iter().enumerate() {
        if let Some(key) = row.keys().find(|k| !wire.columns.iter().any(|c| &c.name == *k)) {
            return Err(Error::Schema(format!(
                "row {} has key '{}' that is not a declared column",
                row_idx, key
            )));
        }
    }

    let mut columns = Vec::with_capacity(wire.columns.len());
    for desc in &wire.columns {
        let raw: Vec<&Json> = wire
            .rows
            .iter()
            .map(|r| r.get(&desc.name).unwrap_or(&Json::Null))
            .collect();
        columns.push(coerce_column(desc, &raw)?);
    }
    Table::from_columns(columns)
}

fn coerce_column(desc: &ColumnDescriptor, raw: &[&Json]) -> Result<Column> {
    let name = desc.name.as_str();
    let column = match desc.column_type {
        ColumnType::Datetime => {
            let values = convert_values(name, raw, "datetime", coerce_datetime)?;
            Column::with_dtype(name, DataType::Timestamp, values)
        }
        ColumnType::Date => {
            let values = convert_values(name, raw, "date", coerce_date)?;
            if values.iter().any(|v| matches!(v, Scalar::DateTime(_))) {
                let promoted = values
                    .into_iter()
                    .map(|v| match v {
                        Scalar::Date(d) => Scalar::DateTime(d.and_time(NaiveTime::MIN)),
                        other => other,
                    })
                    .collect();
                Column::with_dtype(name, DataType::Timestamp, promoted)
            } else {
                Column::with_dtype(name, DataType::Date, values)
            }
        }
        ColumnType::Boolean => {
            let values = convert_values(name, raw, "boolean", coerce_bool)?;
            Column::with_dtype(name, DataType::Boolean, values)
        }
        ColumnType::Integer => {
            let values = convert_values(name, raw, "integer", coerce_int)?;
            if values.iter().all(Scalar::is_null) {
                Column::with_dtype(name, DataType::Int64, values)
            } else {
                Column::from_values(name, values)
            }
        }
        ColumnType::String => {
            let values = convert_values(name, raw, "string", coerce_string)?;
            Column::with_dtype(name, DataType::Utf8, values)
        }
        ColumnType::Float | ColumnType::Unknown => {
            Column::from_values(name, raw.iter().map(|v| json_to_scalar(v)).collect())
        }
    };
    Ok(column)
}

/// Apply `f` to every non-null cell; the first failure names its row.
fn convert_values(
    column: &str,
    raw: &[&Json],
    target: &'static str,
    f: fn(&Json) -> Option<Scalar>,
) -> Result<Vec<Scalar>> {
    raw.iter()
        .enumerate()
        .map(|(row, &v)| {
            if v.is_null() {
                return Ok(Scalar::Null);
            }
            f(v).ok_or_else(|| Error::Coercion {
                column: column.to_string(),
                row,
                value: v.to_string(),
                target,
            })
        })
        .collect()
}

fn coerce_datetime(v: &Json) -> Option<Scalar> {
    v.as_str().and_then(parse_datetime).map(Scalar::DateTime)
}

fn coerce_date(v: &Json) -> Option<Scalar> {
    v.as_str().and_then(parse_date_or_datetime)
}

fn coerce_string(v: &Json) -> Option<Scalar> {
    Some(Scalar::Str(json_text(v)))
}

fn coerce_bool(v: &Json) -> Option<Scalar> {
    match v {
        Json::Bool(b) => Some(Scalar::Bool(*b)),
        Json::Number(n) => match n.as_f64() {
            Some(x) if x == 0.0 => Some(Scalar::Bool(false)),
            Some(x) if x == 1.0 => Some(Scalar::Bool(true)),
            _ => None,
        },
        Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Scalar::Bool(true)),
            "false" | "0" => Some(Scalar::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_int(v: &Json) -> Option<Scalar> {
    match v {
        Json::Bool(b) => Some(Scalar::I64(*b as i64)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Scalar::I64(i))
            } else if let Some(u) = n.as_u64() {
                Some(Scalar::U64(u))
            } else {
                n.as_f64().and_then(integral_f64).map(Scalar::I64)
            }
        }
        Json::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
                .map(Scalar::I64)
        }
        _ => None,
    }
}

fn integral_f64(x: f64) -> Option<i64> {
    if x.is_finite() && x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 {
        Some(x as i64)
    } else {
        None
    }
}

/// Text of a JSON value the way scripts print it.
fn json_text(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Bool(true) => "True".into(),
        Json::Bool(false) => "False".into(),
        Json::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) => format_float(f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Parse date-time text: RFC 3339 (offset converted to UTC), ISO-like
/// `YYYY-MM-DD[T ]HH:MM[:SS[.f]]`, or a bare date at midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).map(|d| d.and_time(NaiveTime::MIN)))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// A bare date stays a date; text with a time part at midnight also becomes
/// a date, anything later keeps its time.
fn parse_date_or_datetime(s: &str) -> Option<Scalar> {
    if let Some(d) = parse_date(s) {
        return Some(Scalar::Date(d));
    }
    let dt = parse_datetime(s)?;
    if dt.time() == NaiveTime::MIN {
        Some(Scalar::Date(dt.date()))
    } else {
        Some(Scalar::DateTime(dt))
    }
}

/// Native interpretation of a JSON value.
pub fn json_to_scalar(v: &Json) -> Scalar {
    match v {
        Json::Null => Scalar::Null,
        Json::Bool(b) => Scalar::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Scalar::I64(i)
            } else if let Some(u) = n.as_u64() {
                Scalar::U64(u)
            } else {
                Scalar::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Scalar::Str(s.clone()),
        other => Scalar::Str(other.to_string()),
    }
}

/// JSON form of a normalized scalar.
pub fn scalar_to_json(v: &Scalar) -> Json {
    match v {
        Scalar::Null => Json::Null,
        Scalar::Bool(b) => Json::Bool(*b),
        Scalar::I32(i) => Json::from(*i),
        Scalar::I64(i) => Json::from(*i),
        Scalar::U64(u) => Json::from(*u),
        Scalar::F32(f) => float_json(*f as f64),
        Scalar::F64(f) => float_json(*f),
        Scalar::Str(s) => Json::String(s.clone()),
        Scalar::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
        Scalar::DateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        other => Json::String(other.to_string()),
    }
}

fn float_json(f: f64) -> Json {
    serde_json::Number::from_f64(f)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

/// Infer the wire type of one column and produce its (not yet normalized)
/// values. First matching rule wins.
pub fn infer_column(col: &Column) -> (ColumnType, Vec<Scalar>) {
    let present = || col.values.iter().filter(|v| !v.is_null());
    let dtype = col.dtype;

    if dtype == DataType::Object && present().all(|v| matches!(v, Scalar::Bool(_))) {
        return (ColumnType::Boolean, col.values.clone());
    }
    if matches!(dtype, DataType::Object | DataType::Date)
        && present().all(|v| matches!(v, Scalar::Date(_)))
    {
        return (ColumnType::Date, col.values.clone());
    }
    if dtype.is_signed_integer() || dtype.is_unsigned_integer() {
        return (ColumnType::Integer, col.values.clone());
    }
    if dtype.is_float() {
        let as_ints: Option<Vec<Scalar>> = col
            .values
            .iter()
            .map(|v| {
                if v.is_null() {
                    Some(Scalar::Null)
                } else {
                    v.as_f64().and_then(integral_f64).map(Scalar::I64)
                }
            })
            .collect();
        return match as_ints {
            Some(values) => (ColumnType::Integer, values),
            None => (ColumnType::Float, col.values.clone()),
        };
    }
    match dtype {
        DataType::Boolean => (ColumnType::Boolean, col.values.clone()),
        DataType::Timestamp => (ColumnType::Datetime, col.values.clone()),
        DataType::Duration => {
            let values = col
                .values
                .iter()
                .map(|v| match v {
                    Scalar::Duration(d) => Scalar::F64(duration_seconds(d)),
                    _ => Scalar::Null,
                })
                .collect();
            (ColumnType::Float, values)
        }
        DataType::Period => {
            let values = col
                .values
                .iter()
                .map(|v| match v {
                    Scalar::Period(p) => Scalar::DateTime(p.to_timestamp()),
                    _ => Scalar::Null,
                })
                .collect();
            (ColumnType::Datetime, values)
        }
        _ => {
            let values = col
                .values
                .iter()
                .map(|v| {
                    if v.is_null() {
                        Scalar::Null
                    } else {
                        Scalar::Str(v.to_string())
                    }
                })
                .collect();
            (ColumnType::String, values)
        }
    }
}

/// Convert an in-memory table into the wire format with inferred types.
pub fn to_wire(table: &Table) -> WireTable {
    let mut columns = Vec::with_capacity(table.num_columns());
    let mut cells: Vec<Vec<Scalar>> = Vec::with_capacity(table.num_columns());
    for col in &table.columns {
        let (column_type, values) = infer_column(col);
        columns.push(ColumnDescriptor::new(col.name.clone(), column_type).with_friendly_name(col.name.clone()));
        cells.push(values);
    }

    let rows = (0..table.num_rows())
        .map(|r| {
            let mut record = Record::new();
            for (desc, values) in columns.iter().zip(&cells) {
                record.insert(desc.name.clone(), scalar_to_json(&values[r].normalize()));
            }
            record
        })
        .collect();

    WireTable { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Period, PeriodFreq};
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use serde_json::json;

    fn wire(columns: Json, rows: Json) -> WireTable {
        serde_json::from_value(json!({ "columns": columns, "rows": rows })).unwrap()
    }

    fn single(values: Vec<Scalar>) -> WireTable {
        to_wire(&Table::from_columns(vec![Column::from_values("c", values)]).unwrap())
    }

    #[test]
    fn whole_floats_become_integer() {
        let w = single(vec![Scalar::F64(1.0), Scalar::F64(2.0), Scalar::Null]);
        assert_eq!(w.columns[0].column_type, ColumnType::Integer);
        let values: Vec<&Json> = w.rows.iter().map(|r| &r["c"]).collect();
        assert_eq!(values, vec![&json!(1), &json!(2), &Json::Null]);
    }

    #[test]
    fn fractional_floats_stay_float() {
        let w = single(vec![Scalar::F64(1.0), Scalar::F64(2.5)]);
        assert_eq!(w.columns[0].column_type, ColumnType::Float);
        assert_eq!(w.rows[1]["c"], json!(2.5));
    }

    #[test]
    fn object_booleans_with_nulls_are_boolean() {
        let col = Column::with_dtype(
            "c",
            DataType::Object,
            vec![Scalar::Bool(true), Scalar::Bool(false), Scalar::Null],
        );
        let w = to_wire(&Table::from_columns(vec![col]).unwrap());
        assert_eq!(w.columns[0].column_type, ColumnType::Boolean);
        assert_eq!(w.rows[2]["c"], Json::Null);
    }

    #[test]
    fn all_null_object_column_is_boolean() {
        let w = single(vec![Scalar::Null, Scalar::Null]);
        assert_eq!(w.columns[0].column_type, ColumnType::Boolean);
    }

    #[test]
    fn dates_durations_and_periods() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let w = single(vec![Scalar::Date(d)]);
        assert_eq!(w.columns[0].column_type, ColumnType::Date);
        assert_eq!(w.rows[0]["c"], json!("2024-03-01"));

        let w = single(vec![Scalar::Duration(TimeDelta::seconds(90))]);
        assert_eq!(w.columns[0].column_type, ColumnType::Float);
        assert_eq!(w.rows[0]["c"], json!(90.0));

        let w = single(vec![Scalar::Period(Period::new(d, PeriodFreq::Month))]);
        assert_eq!(w.columns[0].column_type, ColumnType::Datetime);
        assert_eq!(w.rows[0]["c"], json!("2024-03-01T00:00:00"));
    }

    #[test]
    fn mixed_values_are_stringified() {
        let w = single(vec![Scalar::I64(1), Scalar::Str("a".into()), Scalar::Null]);
        assert_eq!(w.columns[0].column_type, ColumnType::String);
        assert_eq!(w.rows[0]["c"], json!("1"));
        assert_eq!(w.rows[2]["c"], Json::Null);
    }

    #[test]
    fn friendly_name_matches_name() {
        let w = single(vec![Scalar::I64(42)]);
        assert_eq!(w.columns[0].friendly_name.as_deref(), Some("c"));
        assert_eq!(w.columns[0].column_type, ColumnType::Integer);
    }

    #[test]
    fn from_wire_applies_declared_types() {
        let w = wire(
            json!([
                {"name": "ts", "type": "datetime"},
                {"name": "d", "type": "date"},
                {"name": "flag", "type": "boolean"},
                {"name": "n", "type": "integer"},
                {"name": "s", "type": "string"},
            ]),
            json!([
                {"ts": "2024-01-02T03:04:05+01:00", "d": "2024-01-02", "flag": "true", "n": "7", "s": 5},
                {"ts": null, "d": null, "flag": 0, "n": 3.0, "s": true},
            ]),
        );
        let t = from_wire(&w).unwrap();
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(2, 4, 5)
            .unwrap();
        assert_eq!(t.columns[0].values, vec![Scalar::DateTime(ts), Scalar::Null]);
        assert_eq!(t.columns[1].dtype, DataType::Date);
        assert_eq!(t.columns[2].values, vec![Scalar::Bool(true), Scalar::Bool(false)]);
        assert_eq!(t.columns[3].values, vec![Scalar::I64(7), Scalar::I64(3)]);
        assert_eq!(
            t.columns[4].values,
            vec![Scalar::Str("5".into()), Scalar::Str("True".into())]
        );
    }

    #[test]
    fn date_with_time_promotes_column() {
        let w = wire(
            json!([{"name": "d", "type": "date"}]),
            json!([{"d": "2024-01-02"}, {"d": "2024-01-03 10:30:00"}]),
        );
        let t = from_wire(&w).unwrap();
        assert_eq!(t.columns[0].dtype, DataType::Timestamp);
    }

    #[test]
    fn from_wire_rejects_bad_values_and_keys() {
        let w = wire(json!([{"name": "n", "type": "integer"}]), json!([{"n": "x"}]));
        match from_wire(&w) {
            Err(Error::Coercion { column, row, .. }) => {
                assert_eq!(column, "n");
                assert_eq!(row, 0);
            }
            other => panic!("expected coercion error, got {other:?}"),
        }

        let w = wire(json!([{"name": "n"}]), json!([{"n": 1, "extra": 2}]));
        assert!(matches!(from_wire(&w), Err(Error::Schema(_))));
    }

    #[test]
    fn missing_keys_read_as_null() {
        let w = wire(
            json!([{"name": "a", "type": "integer"}, {"name": "b", "type": "float"}]),
            json!([{"a": 1}, {"b": 2.5}]),
        );
        let t = from_wire(&w).unwrap();
        assert_eq!(t.columns[0].values, vec![Scalar::I64(1), Scalar::Null]);
        assert_eq!(t.columns[1].values, vec![Scalar::Null, Scalar::F64(2.5)]);
    }

    #[test]
    fn round_trip_keeps_order_and_nulls() {
        let w = wire(
            json!([
                {"name": "z", "type": "string"},
                {"name": "a", "type": "float"},
            ]),
            json!([{"z": "x", "a": 1.0}, {"z": null, "a": null}]),
        );
        let back = to_wire(&from_wire(&w).unwrap());
        assert_eq!(back.column_names(), vec!["z", "a"]);
        assert_eq!(back.columns[1].column_type, ColumnType::Integer);
        assert_eq!(back.rows[1]["z"], Json::Null);
        assert_eq!(back.rows[1]["a"], Json::Null);
        assert_eq!(back.rows[0]["a"], json!(1));
    }

    fn any_scalar() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            Just(Scalar::Null),
            any::<bool>().prop_map(Scalar::Bool),
            any::<i32>().prop_map(Scalar::I32),
            any::<i64>().prop_map(Scalar::I64),
            any::<u64>().prop_map(Scalar::U64),
            any::<f32>().prop_map(Scalar::F32),
            any::<f64>().prop_map(Scalar::F64),
            ".{0,8}".prop_map(Scalar::Str),
            (-1_000_000i64..1_000_000).prop_map(|s| Scalar::Duration(TimeDelta::seconds(s))),
            (0i64..20_000).prop_map(|d| {
                let base = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
                Scalar::Date(base + TimeDelta::days(d))
            }),
        ]
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(v in any_scalar()) {
            let once = v.normalize();
            prop_assert_eq!(once.normalize(), once);
        }
    }
}
