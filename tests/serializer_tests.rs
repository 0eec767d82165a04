//! Table/Wire serializer properties over full round trips.

use proptest::prelude::*;
use scriptbox_core::schema::ColumnType;
use scriptbox_core::serialize::{from_wire, to_wire};
use scriptbox_core::types::{Column, Scalar, Table};
use scriptbox_core::wire::WireTable;
use serde_json::{json, Value as Json};

fn wire(value: Json) -> WireTable {
    serde_json::from_value(value).unwrap()
}

fn round_trip(w: &WireTable) -> WireTable {
    to_wire(&from_wire(w).unwrap())
}

fn types(w: &WireTable) -> Vec<ColumnType> {
    w.columns.iter().map(|c| c.column_type).collect()
}

#[test]
fn declared_types_survive_a_round_trip() {
    let input = wire(json!({
        "columns": [
            {"name": "ts", "type": "datetime"},
            {"name": "day", "type": "date"},
            {"name": "ok", "type": "boolean"},
            {"name": "n", "type": "integer"},
            {"name": "x", "type": "float"},
            {"name": "label", "type": "string"}
        ],
        "rows": [
            {"ts": "2024-03-01T10:30:00", "day": "2024-03-01", "ok": true, "n": 1, "x": 0.5, "label": "a"},
            {"ts": "2024-03-02 11:00:00", "day": "2024-03-02", "ok": false, "n": 2, "x": 1.25, "label": "b"}
        ]
    }));
    let out = round_trip(&input);
    assert_eq!(
        types(&out),
        vec![
            ColumnType::Datetime,
            ColumnType::Date,
            ColumnType::Boolean,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::String
        ]
    );
    assert_eq!(out.rows[1]["ts"], json!("2024-03-02T11:00:00"));
    assert_eq!(out.rows[0]["day"], json!("2024-03-01"));
    assert_eq!(out.rows[1]["x"], json!(1.25));
    let names: Vec<&str> = out.column_names();
    assert_eq!(names, vec!["ts", "day", "ok", "n", "x", "label"]);
    for c in &out.columns {
        assert_eq!(c.friendly_name.as_deref(), Some(c.name.as_str()));
    }
}

#[test]
fn whole_number_floats_become_integers() {
    let input = wire(json!({
        "columns": [{"name": "v", "type": "float"}],
        "rows": [{"v": 1.0}, {"v": 2.0}, {"v": null}]
    }));
    let out = round_trip(&input);
    assert_eq!(types(&out), vec![ColumnType::Integer]);
    let values: Vec<&Json> = out.rows.iter().map(|r| &r["v"]).collect();
    assert_eq!(values, vec![&json!(1), &json!(2), &Json::Null]);
}

#[test]
fn nulls_and_missing_cells_survive() {
    let input = wire(json!({
        "columns": [
            {"name": "a", "type": "string"},
            {"name": "b", "type": "datetime"},
            {"name": "c", "type": "boolean"}
        ],
        "rows": [{"a": null, "b": null}, {"a": "x", "b": "2024-01-01T00:00:00", "c": null}]
    }));
    let out = round_trip(&input);
    assert_eq!(out.rows[0]["a"], Json::Null);
    assert_eq!(out.rows[0]["b"], Json::Null);
    assert_eq!(out.rows[0]["c"], Json::Null);
    assert_eq!(out.rows[1]["c"], Json::Null);
    assert_eq!(out.rows[1]["a"], json!("x"));
}

#[test]
fn inference_is_deterministic() {
    let bools = Table::from_columns(vec![Column::from_values(
        "b",
        vec![Scalar::Bool(true), Scalar::Bool(false), Scalar::Null],
    )])
    .unwrap();
    for _ in 0..3 {
        assert_eq!(types(&to_wire(&bools)), vec![ColumnType::Boolean]);
    }

    let mixed = Table::from_columns(vec![Column::from_values(
        "f",
        vec![Scalar::F64(1.0), Scalar::F64(2.5)],
    )])
    .unwrap();
    assert_eq!(types(&to_wire(&mixed)), vec![ColumnType::Float]);
}

#[test]
fn undeclared_keys_and_bad_values_are_rejected() {
    let extra = wire(json!({
        "columns": [{"name": "a", "type": "integer"}],
        "rows": [{"a": 1, "b": 2}]
    }));
    assert!(from_wire(&extra).is_err());

    let bad = wire(json!({
        "columns": [{"name": "a", "type": "integer"}],
        "rows": [{"a": 1}, {"a": "seven"}]
    }));
    let err = from_wire(&bad).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("'a'") && text.contains("row 1"), "{text}");
}

#[test]
fn empty_tables_round_trip_empty() {
    let out = round_trip(&WireTable::default());
    assert!(out.columns.is_empty());
    assert!(out.rows.is_empty());
}

fn cell() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        1 => Just(None),
        4 => any::<i32>().prop_map(|v| Some(v as i64)),
    ]
}

proptest! {
    #[test]
    fn integer_columns_round_trip_exactly(values in prop::collection::vec(cell(), 1..40)) {
        let rows: Vec<Json> = values
            .iter()
            .map(|v| json!({ "n": v }))
            .collect();
        let input = wire(json!({
            "columns": [{"name": "n", "type": "integer"}],
            "rows": rows
        }));
        let out = round_trip(&input);
        prop_assert_eq!(types(&out), vec![ColumnType::Integer]);
        let back: Vec<Option<i64>> = out.rows.iter().map(|r| r["n"].as_i64()).collect();
        prop_assert_eq!(back, values);
    }

    #[test]
    fn round_trips_reach_a_fixed_point(values in prop::collection::vec(prop::option::of(-1.0e6f64..1.0e6), 1..30)) {
        let rows: Vec<Json> = values.iter().map(|v| json!({ "x": v })).collect();
        let input = wire(json!({
            "columns": [{"name": "x", "type": "float"}],
            "rows": rows
        }));
        let once = round_trip(&input);
        let twice = round_trip(&once);
        prop_assert_eq!(&once, &twice);
        for (row, v) in once.rows.iter().zip(&values) {
            prop_assert_eq!(row["x"].is_null(), v.is_none());
        }
    }
}
