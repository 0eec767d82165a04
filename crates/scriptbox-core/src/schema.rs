//! Logical schema types. Pure data; no interpreter dependency here.
//!
//! Two vocabularies live side by side:
//! - [`ColumnType`] is the host-facing wire type carried by column descriptors.
//! - [`DataType`] is the storage family of an in-memory [`crate::types::Column`].
//!
//! The serializer maps one onto the other in both directions.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Column type as declared or inferred on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColumnType {
    Datetime,
    Date,
    Boolean,
    Integer,
    Float,
    String,
    #[default]
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Datetime => "datetime",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Unknown => "unknown",
        }
    }

    /// Lenient parse: anything unrecognised is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "datetime" => ColumnType::Datetime,
            "date" => ColumnType::Date,
            "boolean" => ColumnType::Boolean,
            "integer" => ColumnType::Integer,
            "float" => ColumnType::Float,
            "string" => ColumnType::String,
            _ => ColumnType::Unknown,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|s| ColumnType::parse(&s)).unwrap_or_default())
    }
}

/// One entry of a wire table's `columns` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,

    /// Display name; the serializer always sets it to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,

    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            friendly_name: None,
            column_type,
        }
    }

    pub fn with_friendly_name(mut self, friendly_name: impl Into<String>) -> Self {
        self.friendly_name = Some(friendly_name.into());
        self
    }
}

/// Storage family of an in-memory column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Utf8,
    Date,
    Timestamp,
    Duration,
    Period,
    /// Generic storage for all-null or mixed columns.
    Object,
}

impl DataType {
    pub fn is_signed_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, DataType::UInt64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer() || self.is_float()
    }

    /// Lower-case name, as shown to scripts through `Table.dtypes`.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "bool",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Utf8 => "string",
            DataType::Date => "date",
            DataType::Timestamp => "datetime",
            DataType::Duration => "timedelta",
            DataType::Period => "period",
            DataType::Object => "object",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A table as reported by a data source's schema browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Schema of a data source: the list of tables it exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceSchema {
    pub tables: Vec<SchemaTable>,
}

impl SourceSchema {
    pub fn new(tables: Vec<SchemaTable>) -> Self {
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&SchemaTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_type_parses_leniently() {
        assert_eq!(ColumnType::parse("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::parse(" datetime "), ColumnType::Datetime);
        assert_eq!(ColumnType::parse("decimal"), ColumnType::Unknown);
    }

    #[test]
    fn descriptor_accepts_missing_and_null_type() {
        let d: ColumnDescriptor = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert_eq!(d.column_type, ColumnType::Unknown);
        let d: ColumnDescriptor = serde_json::from_str(r#"{"name": "a", "type": null}"#).unwrap();
        assert_eq!(d.column_type, ColumnType::Unknown);
        let d: ColumnDescriptor =
            serde_json::from_str(r#"{"name": "a", "type": "geo"}"#).unwrap();
        assert_eq!(d.column_type, ColumnType::Unknown);
    }

    #[test]
    fn descriptor_serializes_type_key() {
        let d = ColumnDescriptor::new("n", ColumnType::Float).with_friendly_name("n");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"name":"n","friendly_name":"n","type":"float"}"#);
    }
}
