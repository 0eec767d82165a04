//! Wire format exchanged with the host: typed column descriptors plus row
//! records keyed by column name.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnDescriptor, ColumnType};

/// One row. Key order follows column order (`preserve_order`).
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireTable {
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub rows: Vec<Record>,
}

impl WireTable {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Record>) -> Self {
        Self { columns, rows }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }
}

/// Successful run payload: the result table plus captured output lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireResult {
    #[serde(flatten)]
    pub table: WireTable,
    #[serde(default)]
    pub log: Vec<String>,
}

impl WireResult {
    pub fn new(table: WireTable, log: Vec<String>) -> Self {
        Self { table, log }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_flattens_table_fields() {
        let mut row = Record::new();
        row.insert("col".into(), serde_json::json!(42));
        let result = WireResult::new(
            WireTable::new(
                vec![ColumnDescriptor::new("col", ColumnType::Integer).with_friendly_name("col")],
                vec![row],
            ),
            vec!["hello".into()],
        );
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["rows"][0]["col"], 42);
        assert_eq!(v["columns"][0]["type"], "integer");
        assert_eq!(v["log"][0], "hello");
        let back: WireResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn record_keeps_insertion_order() {
        let mut row = Record::new();
        row.insert("z".into(), serde_json::Value::Null);
        row.insert("a".into(), serde_json::Value::Null);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"z":null,"a":null}"#);
    }
}
