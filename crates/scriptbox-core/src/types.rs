//! In-memory scalar/column/table types that scripts manipulate during a run.
//!
//! A `Table` is an ordered list of named columns. Each column carries a storage
//! family (`DataType`) and a homogeneous vector of `Scalar`s where
//! `Scalar::Null` is the per-cell null marker.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::error::{Error, Result};
use crate::schema::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodFreq {
    Day,
    Month,
    Quarter,
    Year,
}

/// A calendar span identified by its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub start: NaiveDate,
    pub freq: PeriodFreq,
}

impl Period {
    pub fn new(start: NaiveDate, freq: PeriodFreq) -> Self {
        Self { start, freq }
    }

    /// Timestamp at the start of the period.
    pub fn to_timestamp(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use chrono::Datelike;
        match self.freq {
            PeriodFreq::Day => write!(f, "{}", self.start.format("%Y-%m-%d")),
            PeriodFreq::Month => write!(f, "{}", self.start.format("%Y-%m")),
            PeriodFreq::Quarter => {
                write!(f, "{}Q{}", self.start.year(), (self.start.month() - 1) / 3 + 1)
            }
            PeriodFreq::Year => write!(f, "{}", self.start.year()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalClosed {
    Left,
    Right,
    Both,
    Neither,
}

/// A numeric interval such as the bins produced by a histogram cut.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub left: f64,
    pub right: f64,
    pub closed: IntervalClosed,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = match self.closed {
            IntervalClosed::Left => ('[', ')'),
            IntervalClosed::Right => ('(', ']'),
            IntervalClosed::Both => ('[', ']'),
            IntervalClosed::Neither => ('(', ')'),
        };
        write!(
            f,
            "{}{}, {}{}",
            open,
            format_float(self.left),
            format_float(self.right),
            close
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Duration(TimeDelta),
    Period(Period),
    Interval(Interval),
}

impl Scalar {
    /// Null marker test. NaN counts as missing, like NaT does for timestamps.
    pub fn is_null(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::F32(f) => f.is_nan(),
            Scalar::F64(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Object,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I32(_) => DataType::Int32,
            Scalar::I64(_) => DataType::Int64,
            Scalar::U64(_) => DataType::UInt64,
            Scalar::F32(_) => DataType::Float32,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Date(_) => DataType::Date,
            Scalar::DateTime(_) => DataType::Timestamp,
            Scalar::Duration(_) => DataType::Duration,
            Scalar::Period(_) => DataType::Period,
            Scalar::Interval(_) => DataType::Object,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I32(i) => Some(*i as f64),
            Scalar::I64(i) => Some(*i as f64),
            Scalar::U64(u) => Some(*u as f64),
            Scalar::F32(f) => Some(*f as f64),
            Scalar::F64(f) => Some(*f),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::I32(i) => Some(*i as i64),
            Scalar::I64(i) => Some(*i),
            Scalar::U64(u) => i64::try_from(*u).ok(),
            Scalar::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Wire-safe form of this value.
    ///
    /// Output is restricted to `Null, Bool, I64, F64 (finite), Str, Date,
    /// DateTime`, each of which normalizes to itself, so the mapping is
    /// idempotent.
    pub fn normalize(&self) -> Scalar {
        match self {
            Scalar::Null => Scalar::Null,
            Scalar::Bool(b) => Scalar::Bool(*b),
            Scalar::I32(i) => Scalar::I64(*i as i64),
            Scalar::I64(i) => Scalar::I64(*i),
            Scalar::U64(u) => match i64::try_from(*u) {
                Ok(i) => Scalar::I64(i),
                Err(_) => Scalar::F64(*u as f64),
            },
            Scalar::F32(f) if f.is_finite() => Scalar::F64(*f as f64),
            Scalar::F64(f) if f.is_finite() => Scalar::F64(*f),
            Scalar::F32(_) | Scalar::F64(_) => Scalar::Null,
            Scalar::Str(s) => Scalar::Str(s.clone()),
            Scalar::Date(d) => Scalar::Date(*d),
            Scalar::DateTime(dt) => Scalar::DateTime(*dt),
            Scalar::Period(p) => Scalar::DateTime(p.to_timestamp()),
            Scalar::Duration(d) => Scalar::Str(format_duration(d)),
            Scalar::Interval(i) => Scalar::Str(i.to_string()),
        }
    }

    /// Convert into the given storage family. Values that cannot be
    /// represented are kept as-is (only `Object` columns hold them).
    fn cast_to(self, dtype: DataType) -> Scalar {
        if self.is_null() {
            return Scalar::Null;
        }
        match (dtype, self) {
            (DataType::Int64, Scalar::I32(i)) => Scalar::I64(i as i64),
            (DataType::Float64, v @ (Scalar::I32(_) | Scalar::I64(_) | Scalar::U64(_) | Scalar::F32(_))) => {
                Scalar::F64(v.as_f64().unwrap_or(f64::NAN))
            }
            (_, v) => v,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("None"),
            Scalar::Bool(true) => f.write_str("True"),
            Scalar::Bool(false) => f.write_str("False"),
            Scalar::I32(i) => write!(f, "{i}"),
            Scalar::I64(i) => write!(f, "{i}"),
            Scalar::U64(u) => write!(f, "{u}"),
            Scalar::F32(x) => f.write_str(&format_float(*x as f64)),
            Scalar::F64(x) => f.write_str(&format_float(*x)),
            Scalar::Str(s) => f.write_str(s),
            Scalar::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Scalar::DateTime(dt) => f.write_str(&format_datetime(dt, ' ')),
            Scalar::Duration(d) => f.write_str(&format_duration(d)),
            Scalar::Period(p) => write!(f, "{p}"),
            Scalar::Interval(i) => write!(f, "{i}"),
        }
    }
}

/// Float text the way scripts expect it: `1.0`, `2.5`, `1e+20`, `nan`, `inf`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if x.fract() == 0.0 && x.abs() < 1e16 {
        return format!("{x:.1}");
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{x:e}");
        // Rust prints `1e20` and `1e-5`; scripts expect `1e+20` and `1e-05`.
        return match s.split_once('e').map(|(m, e)| (m, e.parse::<i32>())) {
            Some((mantissa, Ok(exp))) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{mantissa}e{sign}{:02}", exp.abs())
            }
            _ => s,
        };
    }
    format!("{x}")
}

/// ISO-8601 date-time text; fractional seconds only when present.
pub fn format_datetime(dt: &NaiveDateTime, sep: char) -> String {
    use chrono::Timelike;
    if dt.nanosecond() == 0 {
        dt.format(&format!("%Y-%m-%d{sep}%H:%M:%S")).to_string()
    } else {
        dt.format(&format!("%Y-%m-%d{sep}%H:%M:%S%.6f")).to_string()
    }
}

/// `[-]D day[s], H:MM:SS[.ffffff]`, matching how intervals of time print in scripts.
pub fn format_duration(d: &TimeDelta) -> String {
    let total_us = d.num_microseconds().unwrap_or_else(|| d.num_seconds().saturating_mul(1_000_000));
    let days = total_us.div_euclid(86_400 * 1_000_000);
    let rem = total_us.rem_euclid(86_400 * 1_000_000);
    let secs = rem / 1_000_000;
    let micros = rem % 1_000_000;
    let clock = if micros == 0 {
        format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    } else {
        format!(
            "{}:{:02}:{:02}.{:06}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            micros
        )
    };
    match days {
        0 => clock,
        1 | -1 => format!("{days} day, {clock}"),
        _ => format!("{days} days, {clock}"),
    }
}

/// Total elapsed seconds of a duration.
pub fn duration_seconds(d: &TimeDelta) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Infer the storage family for a heterogeneous list of values.
///
/// Nulls do not participate. No non-null values, or values of incompatible
/// families, give `Object`.
pub fn infer_dtype(values: &[Scalar]) -> DataType {
    let mut dtype: Option<DataType> = None;
    for v in values.iter().filter(|v| !v.is_null()) {
        let t = v.data_type();
        dtype = Some(match dtype {
            None => t,
            Some(cur) => unify(cur, t),
        });
        if dtype == Some(DataType::Object) {
            break;
        }
    }
    dtype.unwrap_or(DataType::Object)
}

fn unify(a: DataType, b: DataType) -> DataType {
    use DataType::*;
    if a == b {
        return a;
    }
    match (a, b) {
        (Int32, Int64) | (Int64, Int32) => Int64,
        (x, y) if x.is_numeric() && y.is_numeric() => Float64,
        _ => Object,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: DataType,
    pub values: Vec<Scalar>,
}

impl Column {
    /// Build a column from arbitrary values, inferring the storage family and
    /// casting cells into it.
    pub fn from_values(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        let dtype = infer_dtype(&values);
        Self::with_dtype(name, dtype, values)
    }

    /// Build a column with a known storage family; cells are cast into it.
    pub fn with_dtype(name: impl Into<String>, dtype: DataType, values: Vec<Scalar>) -> Self {
        let values = values.into_iter().map(|v| v.cast_to(dtype)).collect();
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    /// Append one cell, widening the storage family when needed.
    pub fn push(&mut self, value: Scalar) {
        if !value.is_null() {
            let widened = if self.values.iter().all(Scalar::is_null) {
                value.data_type()
            } else {
                unify(self.dtype, value.data_type())
            };
            if widened != self.dtype {
                let old = std::mem::take(&mut self.values);
                self.values = old.into_iter().map(|v| v.cast_to(widened)).collect();
                self.dtype = widened;
            }
        }
        let cell = value.cast_to(self.dtype);
        self.values.push(cell);
    }

    fn take(&self, indices: &[usize]) -> Column {
        Column {
            name: self.name.clone(),
            dtype: self.dtype,
            values: indices.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }
}

/// Aggregations available to `Table::group_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl Aggregation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Some(Aggregation::Count),
            "sum" => Some(Aggregation::Sum),
            "mean" | "avg" => Some(Aggregation::Mean),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            _ => None,
        }
    }

    fn apply(&self, values: &[&Scalar]) -> Scalar {
        let present: Vec<&Scalar> = values.iter().copied().filter(|v| !v.is_null()).collect();
        match self {
            Aggregation::Count => Scalar::I64(present.len() as i64),
            Aggregation::Sum => {
                if present.iter().all(|v| v.as_i64().is_some() && !matches!(v, Scalar::U64(_))) {
                    let mut acc: i64 = 0;
                    for v in &present {
                        match acc.checked_add(v.as_i64().unwrap_or(0)) {
                            Some(next) => acc = next,
                            None => return Scalar::F64(present.iter().filter_map(|v| v.as_f64()).sum()),
                        }
                    }
                    Scalar::I64(acc)
                } else {
                    Scalar::F64(present.iter().filter_map(|v| v.as_f64()).sum())
                }
            }
            Aggregation::Mean => {
                let nums: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
                if nums.is_empty() {
                    Scalar::Null
                } else {
                    Scalar::F64(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            Aggregation::Min => present
                .iter()
                .min_by(|a, b| scalar_cmp(a, b))
                .map(|v| (*v).clone())
                .unwrap_or(Scalar::Null),
            Aggregation::Max => present
                .iter()
                .max_by(|a, b| scalar_cmp(a, b))
                .map(|v| (*v).clone())
                .unwrap_or(Scalar::Null),
        }
    }
}

/// Ordered, named, equal-length columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns; all columns must have the same length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            if let Some(bad) = columns.iter().find(|c| c.len() != first.len()) {
                return Err(Error::Schema(format!(
                    "column '{}' has {} values, expected {}",
                    bad.name,
                    bad.len(),
                    first.len()
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column-wise storage query, in column order.
    pub fn column_types(&self) -> Vec<(&str, DataType)> {
        self.columns.iter().map(|c| (c.name.as_str(), c.dtype)).collect()
    }

    /// Replace the first column called `name`, or append a new one.
    ///
    /// A table without columns accepts any length; otherwise the length must
    /// match the current row count.
    pub fn set_column(&mut self, name: &str, values: Vec<Scalar>) -> Result<()> {
        if !self.columns.is_empty() && values.len() != self.num_rows() {
            return Err(Error::Schema(format!(
                "length of values ({}) does not match number of rows ({})",
                values.len(),
                self.num_rows()
            )));
        }
        let column = Column::from_values(name, values);
        match self.column_index(name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn drop_columns(&mut self, names: &[String]) -> Result<()> {
        if let Some(missing) = names.iter().find(|n| self.column_index(n).is_none()) {
            return Err(Error::Schema(format!("column '{}' not found", missing)));
        }
        self.columns.retain(|c| !names.contains(&c.name));
        Ok(())
    }

    /// Rename columns; names not present in `renames` are kept.
    pub fn rename_columns(&mut self, renames: &[(String, String)]) {
        for col in &mut self.columns {
            if let Some((_, new_name)) = renames.iter().find(|(old, _)| *old == col.name) {
                col.name = new_name.clone();
            }
        }
    }

    /// Replace every column name at once, in order.
    pub fn set_column_names(&mut self, names: Vec<String>) -> Result<()> {
        if names.len() != self.columns.len() {
            return Err(Error::Schema(format!(
                "length mismatch: table has {} columns, {} names given",
                self.columns.len(),
                names.len()
            )));
        }
        for (col, name) in self.columns.iter_mut().zip(names) {
            col.name = name;
        }
        Ok(())
    }

    /// New table with the named columns, in the requested order.
    pub fn select(&self, names: &[String]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|n| {
                self.column(n)
                    .cloned()
                    .ok_or_else(|| Error::Schema(format!("column '{}' not found", n)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Table { columns })
    }

    pub fn take_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
        }
    }

    pub fn head(&self, n: usize) -> Table {
        let end = n.min(self.num_rows());
        self.take_rows(&(0..end).collect::<Vec<_>>())
    }

    pub fn tail(&self, n: usize) -> Table {
        let rows = self.num_rows();
        let start = rows.saturating_sub(n);
        self.take_rows(&(start..rows).collect::<Vec<_>>())
    }

    pub fn filter_rows(&self, keep: &[bool]) -> Table {
        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.then_some(i))
            .collect();
        self.take_rows(&indices)
    }

    /// One row as `(column name, value)` pairs in column order.
    pub fn row(&self, idx: usize) -> Vec<(&str, &Scalar)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), &c.values[idx]))
            .collect()
    }

    /// Row-wise export preserving column order.
    pub fn to_records(&self) -> Vec<Vec<(String, Scalar)>> {
        (0..self.num_rows())
            .map(|r| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[r].clone()))
                    .collect()
            })
            .collect()
    }

    /// Append one record. Unknown keys become new columns back-filled with
    /// nulls; columns missing from the record receive a null.
    pub fn push_row(&mut self, record: Vec<(String, Scalar)>) {
        let rows = self.num_rows();
        for (key, _) in &record {
            if self.column_index(key).is_none() {
                self.columns
                    .push(Column::with_dtype(key.clone(), DataType::Object, vec![Scalar::Null; rows]));
            }
        }
        let mut record = record;
        for col in &mut self.columns {
            let value = record
                .iter()
                .position(|(k, _)| *k == col.name)
                .map(|i| record.swap_remove(i).1)
                .unwrap_or(Scalar::Null);
            col.push(value);
        }
    }

    /// Sort rows by the specified columns (in order). Nulls sort first; the
    /// sort is stable.
    pub fn sort_by_columns(&mut self, sort_keys: &[String], ascending: bool) -> Result<()> {
        let num_rows = self.num_rows();
        if num_rows == 0 {
            return Ok(());
        }

        let key_indices: Vec<usize> = sort_keys
            .iter()
            .map(|key| {
                self.column_index(key)
                    .ok_or_else(|| Error::Schema(format!("sort key column '{}' not found", key)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut indices: Vec<usize> = (0..num_rows).collect();
        indices.sort_by(|&a, &b| {
            let ord = key_indices
                .iter()
                .map(|&c| scalar_cmp(&self.columns[c].values[a], &self.columns[c].values[b]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });

        *self = self.take_rows(&indices);
        Ok(())
    }

    /// Stack tables vertically. Columns are matched by name in first-seen
    /// order; a table lacking a column contributes nulls.
    pub fn concat_rows(tables: &[Table]) -> Table {
        let mut out = Table::new();
        for t in tables {
            for c in &t.columns {
                if out.column_index(&c.name).is_none() {
                    out.columns.push(Column::with_dtype(c.name.clone(), c.dtype, Vec::new()));
                }
            }
        }
        for t in tables {
            for r in 0..t.num_rows() {
                for col in &mut out.columns {
                    let value = t
                        .column(&col.name)
                        .map(|c| c.values[r].clone())
                        .unwrap_or(Scalar::Null);
                    col.push(value);
                }
            }
        }
        out
    }

    /// Group rows by `keys` and aggregate the named columns.
    ///
    /// Output columns are the keys followed by one column per aggregation,
    /// named after the aggregated column. Groups appear in first-seen order.
    pub fn group_by(&self, keys: &[String], aggs: &[(String, Aggregation)]) -> Result<Table> {
        let key_idx = keys
            .iter()
            .map(|k| {
                self.column_index(k)
                    .ok_or_else(|| Error::Schema(format!("group key column '{}' not found", k)))
            })
            .collect::<Result<Vec<_>>>()?;
        let agg_idx = aggs
            .iter()
            .map(|(c, _)| {
                self.column_index(c)
                    .ok_or_else(|| Error::Schema(format!("aggregate column '{}' not found", c)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut lookup: HashMap<Vec<GroupKey>, usize> = HashMap::new();
        for r in 0..self.num_rows() {
            let key: Vec<GroupKey> = key_idx
                .iter()
                .map(|&c| GroupKey::from(&self.columns[c].values[r]))
                .collect();
            let slot = *lookup.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(r);
        }

        let mut columns = Vec::with_capacity(keys.len() + aggs.len());
        for (&c, name) in key_idx.iter().zip(keys) {
            let values = groups
                .iter()
                .map(|rows| self.columns[c].values[rows[0]].clone())
                .collect();
            columns.push(Column::from_values(name.clone(), values));
        }
        for (&c, (name, agg)) in agg_idx.iter().zip(aggs) {
            let values = groups
                .iter()
                .map(|rows| {
                    let cells: Vec<&Scalar> =
                        rows.iter().map(|&r| &self.columns[c].values[r]).collect();
                    agg.apply(&cells)
                })
                .collect();
            columns.push(Column::from_values(name.clone(), values));
        }
        Table::from_columns(columns)
    }
}

/// Hashable identity of a scalar for grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Null,
    Bool(bool),
    Int(i128),
    Float(u64),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Duration(TimeDelta),
    Period(Period),
    Interval(u64, u64, IntervalClosed),
}

impl From<&Scalar> for GroupKey {
    fn from(s: &Scalar) -> Self {
        match s {
            v if v.is_null() => GroupKey::Null,
            Scalar::Bool(b) => GroupKey::Bool(*b),
            Scalar::I32(i) => GroupKey::Int(*i as i128),
            Scalar::I64(i) => GroupKey::Int(*i as i128),
            Scalar::U64(u) => GroupKey::Int(*u as i128),
            Scalar::F32(f) => float_key(*f as f64),
            Scalar::F64(f) => float_key(*f),
            Scalar::Str(s) => GroupKey::Str(s.clone()),
            Scalar::Date(d) => GroupKey::Date(*d),
            Scalar::DateTime(dt) => GroupKey::DateTime(*dt),
            Scalar::Duration(d) => GroupKey::Duration(*d),
            Scalar::Period(p) => GroupKey::Period(*p),
            Scalar::Interval(i) => GroupKey::Interval(i.left.to_bits(), i.right.to_bits(), i.closed),
            Scalar::Null => GroupKey::Null,
        }
    }
}

fn float_key(f: f64) -> GroupKey {
    if f.fract() == 0.0 && f.abs() < 1e18 {
        GroupKey::Int(f as i128)
    } else {
        GroupKey::Float(f.to_bits())
    }
}

/// Compare two scalars for sorting.
///
/// Nulls are sorted first, numbers compare across widths, then values are
/// compared by type.
pub fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;

    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    match (a, b) {
        (Bool(x), Bool(y)) => x.cmp(y),
        (I64(x), I64(y)) => x.cmp(y),
        (Str(x), Str(y)) => x.cmp(y),
        (Date(x), Date(y)) => x.cmp(y),
        (DateTime(x), DateTime(y)) => x.cmp(y),
        (Date(x), DateTime(y)) => x.and_time(NaiveTime::MIN).cmp(y),
        (DateTime(x), Date(y)) => x.cmp(&y.and_time(NaiveTime::MIN)),
        (Duration(x), Duration(y)) => x.cmp(y),
        (Period(x), Period(y)) => x.start.cmp(&y.start),
        (Interval(x), Interval(y)) => x
            .left
            .partial_cmp(&y.left)
            .unwrap_or(Ordering::Equal)
            .then(x.right.partial_cmp(&y.right).unwrap_or(Ordering::Equal)),
        (x, y) if x.data_type().is_numeric() && y.data_type().is_numeric() => {
            match (x.as_i64(), y.as_i64()) {
                (Some(i), Some(j)) => i.cmp(&j),
                _ => {
                    let (fx, fy) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                    fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
                }
            }
        }
        // Mixed types: order by variant order
        _ => scalar_type_order(a).cmp(&scalar_type_order(b)),
    }
}

/// Assign a numeric order to scalar types for mixed-type comparisons.
fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I32(_) | I64(_) | U64(_) | F32(_) | F64(_) => 2,
        Str(_) => 3,
        Date(_) | DateTime(_) => 4,
        Duration(_) => 5,
        Period(_) => 6,
        Interval(_) => 7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(name: &str, v: &[i64]) -> Column {
        Column::from_values(name, v.iter().map(|i| Scalar::I64(*i)).collect())
    }

    #[test]
    fn inference_picks_storage_family() {
        assert_eq!(infer_dtype(&[Scalar::I64(1), Scalar::Null]), DataType::Int64);
        assert_eq!(infer_dtype(&[Scalar::I64(1), Scalar::F64(2.5)]), DataType::Float64);
        assert_eq!(infer_dtype(&[Scalar::Bool(true), Scalar::Null]), DataType::Boolean);
        assert_eq!(infer_dtype(&[Scalar::Bool(true), Scalar::I64(1)]), DataType::Object);
        assert_eq!(infer_dtype(&[Scalar::Null, Scalar::Null]), DataType::Object);
        assert_eq!(infer_dtype(&[Scalar::F64(f64::NAN)]), DataType::Object);
        assert_eq!(infer_dtype(&[Scalar::Str("a".into())]), DataType::Utf8);
    }

    #[test]
    fn from_values_casts_into_float_storage() {
        let col = Column::from_values("x", vec![Scalar::I64(1), Scalar::F64(2.5), Scalar::Null]);
        assert_eq!(col.dtype, DataType::Float64);
        assert_eq!(col.values, vec![Scalar::F64(1.0), Scalar::F64(2.5), Scalar::Null]);
    }

    #[test]
    fn push_widens_storage() {
        let mut col = ints("x", &[1, 2]);
        col.push(Scalar::F64(0.5));
        assert_eq!(col.dtype, DataType::Float64);
        assert_eq!(col.values[0], Scalar::F64(1.0));
        col.push(Scalar::Str("z".into()));
        assert_eq!(col.dtype, DataType::Object);
    }

    #[test]
    fn set_column_checks_length() {
        let mut t = Table::new();
        t.set_column("a", vec![Scalar::I64(1), Scalar::I64(2)]).unwrap();
        assert!(t.set_column("b", vec![Scalar::I64(1)]).is_err());
        t.set_column("a", vec![Scalar::I64(5), Scalar::I64(6)]).unwrap();
        assert_eq!(t.num_columns(), 1);
        assert_eq!(t.columns[0].values[0], Scalar::I64(5));
    }

    #[test]
    fn sort_descending_with_nulls() {
        let mut t = Table::from_columns(vec![Column::from_values(
            "v",
            vec![Scalar::I64(2), Scalar::Null, Scalar::I64(9)],
        )])
        .unwrap();
        t.sort_by_columns(&["v".into()], false).unwrap();
        assert_eq!(
            t.columns[0].values,
            vec![Scalar::I64(9), Scalar::I64(2), Scalar::Null]
        );
    }

    #[test]
    fn push_row_backfills_new_columns() {
        let mut t = Table::new();
        t.push_row(vec![("a".into(), Scalar::I64(1))]);
        t.push_row(vec![("b".into(), Scalar::Str("x".into()))]);
        assert_eq!(t.column_names(), vec!["a", "b"]);
        assert_eq!(t.columns[0].values, vec![Scalar::I64(1), Scalar::Null]);
        assert_eq!(t.columns[1].values, vec![Scalar::Null, Scalar::Str("x".into())]);
        assert_eq!(t.columns[1].dtype, DataType::Utf8);
    }

    #[test]
    fn group_by_sums_in_first_seen_order() {
        let t = Table::from_columns(vec![
            Column::from_values(
                "k",
                vec![Scalar::Str("b".into()), Scalar::Str("a".into()), Scalar::Str("b".into())],
            ),
            ints("v", &[1, 2, 3]),
        ])
        .unwrap();
        let g = t
            .group_by(&["k".into()], &[("v".into(), Aggregation::Sum)])
            .unwrap();
        assert_eq!(g.columns[0].values, vec![Scalar::Str("b".into()), Scalar::Str("a".into())]);
        assert_eq!(g.columns[1].values, vec![Scalar::I64(4), Scalar::I64(2)]);
    }

    #[test]
    fn concat_rows_fills_missing_columns() {
        let a = Table::from_columns(vec![ints("x", &[1])]).unwrap();
        let b = Table::from_columns(vec![ints("y", &[2])]).unwrap();
        let c = Table::concat_rows(&[a, b]);
        assert_eq!(c.num_rows(), 2);
        assert_eq!(c.columns[0].values, vec![Scalar::I64(1), Scalar::Null]);
        assert_eq!(c.columns[1].values, vec![Scalar::Null, Scalar::I64(2)]);
    }

    #[test]
    fn formats_like_script_values() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_duration(&TimeDelta::seconds(90_061)), "1 day, 1:01:01");
        assert_eq!(format_duration(&TimeDelta::milliseconds(1500)), "0:00:01.500000");
    }
}
