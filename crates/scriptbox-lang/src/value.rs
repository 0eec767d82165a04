//! Runtime values of the script language.
//!
//! Mutable containers are shared through `Arc<RwLock<..>>` so aliasing
//! behaves like the scripts expect (`b = a; b.append(1)` changes `a`) and so
//! values can live in the per-sandbox module cache. Locks are never held
//! across a call back into the interpreter.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use parking_lot::{Mutex, RwLock};
use scriptbox_core::types::{format_datetime, format_duration, format_float, Table};

use crate::ast::FunctionDef;
use crate::error::{ExcKind, ExecResult, Exception};
use crate::interp::Interpreter;

pub type Namespace = HashMap<String, Value>;
pub type SharedNamespace = Arc<RwLock<Namespace>>;

/// Signature of every natively implemented callable.
pub type NativeFn =
    dyn Fn(&mut Interpreter<'_>, CallArgs) -> ExecResult<Value> + Send + Sync + 'static;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<RwLock<Vec<Value>>>),
    Tuple(Arc<[Value]>),
    Dict(Arc<RwLock<Dict>>),
    Set(Arc<RwLock<Set>>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
    Table(Arc<RwLock<Table>>),
    Function(Arc<Function>),
    Native(Arc<NativeFunction>),
    Method(Arc<BoundMethod>),
    Module(Arc<Module>),
    Iterator(Arc<IterState>),
    Slice(Arc<[Option<i64>; 3]>),
    Type(&'static str),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Hashable identity of a value, used for dict keys and set members.
///
/// Booleans and integral floats fold into `Int` so `1`, `1.0` and `True`
/// address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(Arc<str>),
    Tuple(Vec<Key>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
    Ptr(usize),
}

/// Insertion-ordered hash map used for dicts and sets.
#[derive(Debug, Clone)]
pub struct OrderedMap<V> {
    entries: Vec<(Key, V)>,
    index: HashMap<Key, usize>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace; a replaced entry keeps its position.
    pub fn insert(&mut self, key: Key, value: V) -> Option<V> {
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &Key) -> Option<V> {
        let idx = self.index.remove(key)?;
        let (_, value) = self.entries.remove(idx);
        for (k, _) in &self.entries[idx..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn pop_last(&mut self) -> Option<(Key, V)> {
        let (key, value) = self.entries.pop()?;
        self.index.remove(&key);
        Some((key, value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Key, V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }
}

/// Dict entries keep the original key value next to the stored value.
pub type Dict = OrderedMap<(Value, Value)>;
pub type Set = OrderedMap<Value>;

impl Dict {
    pub fn set_item(&mut self, key: Value, value: Value) -> ExecResult<()> {
        let k = key.key()?;
        self.insert(k, (key, value));
        Ok(())
    }

    pub fn get_item(&self, key: &Value) -> ExecResult<Option<Value>> {
        Ok(self.get(&key.key()?).map(|(_, v)| v.clone()))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.values().cloned().collect()
    }
}

impl Set {
    pub fn add(&mut self, value: Value) -> ExecResult<()> {
        let k = value.key()?;
        if !self.contains_key(&k) {
            self.insert(k, value);
        }
        Ok(())
    }

    pub fn items(&self) -> Vec<Value> {
        self.values().cloned().collect()
    }
}

/// Where a function was defined; decides which lines get error attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Main,
    Module(String),
}

pub struct Function {
    pub def: Arc<FunctionDef>,
    /// Evaluated default for each parameter, aligned with `def.params`.
    pub defaults: Vec<Option<Value>>,
    pub globals: Weak<RwLock<Namespace>>,
    /// Enclosing function locals visible to this function.
    pub closure: Arc<Namespace>,
    pub origin: Origin,
}

pub struct NativeFunction {
    pub name: String,
    pub func: Box<NativeFn>,
    /// Class-style attributes, e.g. `datetime.now` on the `datetime` constructor.
    pub attrs: Namespace,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Interpreter<'_>, CallArgs) -> ExecResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
            attrs: Namespace::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Namespace) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn value<F>(name: impl Into<String>, func: F) -> Value
    where
        F: Fn(&mut Interpreter<'_>, CallArgs) -> ExecResult<Value> + Send + Sync + 'static,
    {
        Value::Native(Arc::new(Self::new(name, func)))
    }
}

/// `obj.method` looked up but not yet called.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub namespace: SharedNamespace,
}

impl Module {
    pub fn new(name: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            name: name.into(),
            namespace: Arc::new(RwLock::new(namespace)),
        }
    }

    pub fn get(&self, attr: &str) -> Option<Value> {
        self.namespace.read().get(attr).cloned()
    }
}

/// A one-shot iterator produced by `map`, `filter`, `zip`, `enumerate` and
/// `reversed`. Items are computed up front and consumed in order.
pub struct IterState {
    pub kind: &'static str,
    pub items: Mutex<VecDeque<Value>>,
}

impl IterState {
    pub fn value(kind: &'static str, items: Vec<Value>) -> Value {
        Value::Iterator(Arc::new(IterState {
            kind,
            items: Mutex::new(items.into()),
        }))
    }
}

/// Positional and keyword arguments of one call.
#[derive(Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return a keyword argument.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let idx = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(idx).1)
    }

    /// Bind arguments to named parameters. The first `required` parameters
    /// must be supplied.
    pub fn bind<const N: usize>(
        self,
        fname: &str,
        names: [&str; N],
        required: usize,
    ) -> ExecResult<[Option<Value>; N]> {
        if self.positional.len() > N {
            return Err(Exception::type_error(format!(
                "{}() takes at most {} argument{} ({} given)",
                fname,
                N,
                if N == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        let mut out: [Option<Value>; N] = std::array::from_fn(|_| None);
        for (slot, v) in out.iter_mut().zip(self.positional) {
            *slot = Some(v);
        }
        for (k, v) in self.keywords {
            let idx = names.iter().position(|n| *n == k).ok_or_else(|| {
                Exception::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    fname, k
                ))
            })?;
            if out[idx].is_some() {
                return Err(Exception::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    fname, k
                )));
            }
            out[idx] = Some(v);
        }
        if let Some(missing) = (0..required).find(|&i| out[i].is_none()) {
            return Err(Exception::type_error(format!(
                "{}() missing required argument '{}'",
                fname, names[missing]
            )));
        }
        Ok(out)
    }

    /// Reject keywords for functions that accept positional arguments only.
    pub fn positional_only(self, fname: &str) -> ExecResult<Vec<Value>> {
        if let Some((k, _)) = self.keywords.first() {
            return Err(Exception::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                fname, k
            )));
        }
        Ok(self.positional)
    }
}

const MAX_REPR_DEPTH: usize = 32;

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::from(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Arc::new(RwLock::new(dict)))
    }

    pub fn set(set: Set) -> Value {
        Value::Set(Arc::new(RwLock::new(set)))
    }

    pub fn table(table: Table) -> Value {
        Value::Table(Arc::new(RwLock::new(table)))
    }

    /// Build a dict from string keys, in order.
    pub fn dict_from_pairs<I>(pairs: I) -> Value
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut dict = Dict::new();
        for (k, v) in pairs {
            let key = Value::str(&k);
            dict.insert(Key::Str(Arc::from(k.as_str())), (key, v));
        }
        Value::dict(dict)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::TimeDelta(_) => "timedelta",
            Value::Table(_) => "Table",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Module(_) => "module",
            Value::Iterator(it) => it.kind,
            Value::Slice(_) => "slice",
            Value::Type(_) => "type",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::Method(_) | Value::Type(_)
        )
    }

    pub fn truthy(&self) -> ExecResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.read().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.read().is_empty(),
            Value::Set(s) => !s.read().is_empty(),
            Value::TimeDelta(d) => !d.is_zero(),
            Value::Iterator(it) => !it.items.lock().is_empty(),
            Value::Table(_) => {
                return Err(Exception::value_error(
                    "The truth value of a Table is ambiguous. Use t.empty or len(t)",
                ))
            }
            _ => true,
        })
    }

    pub fn key(&self) -> ExecResult<Key> {
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Int(*b as i64),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.2e18 {
                    Key::Int(*f as i64)
                } else {
                    Key::Float(f.to_bits())
                }
            }
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => Key::Tuple(items.iter().map(Value::key).collect::<ExecResult<_>>()?),
            Value::Date(d) => Key::Date(*d),
            Value::DateTime(dt) => Key::DateTime(*dt),
            Value::TimeDelta(d) => Key::TimeDelta(*d),
            Value::Function(f) => Key::Ptr(Arc::as_ptr(f) as *const () as usize),
            Value::Native(f) => Key::Ptr(Arc::as_ptr(f) as *const () as usize),
            Value::Module(m) => Key::Ptr(Arc::as_ptr(m) as *const () as usize),
            Value::Type(name) => Key::Str(Arc::from(format!("<type {}>", name).as_str())),
            other => {
                return Err(Exception::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    pub fn as_int(&self, what: &str) -> ExecResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(Exception::type_error(format!(
                "{} must be an integer, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    pub fn as_float(&self, what: &str) -> ExecResult<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(*b as i64 as f64),
            other => Err(Exception::type_error(format!(
                "{} must be a real number, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self, what: &str) -> ExecResult<Arc<str>> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            other => Err(Exception::type_error(format!(
                "{} must be str, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    /// `str(value)`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => format_datetime(dt, ' '),
            Value::TimeDelta(d) => format_duration(d),
            Value::Table(t) => render_table(&t.read()),
            _ => self.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > MAX_REPR_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(items) => {
                let items = items.read().clone();
                write_seq(out, "[", "]", &items, depth);
            }
            Value::Tuple(items) => {
                if items.len() == 1 {
                    out.push('(');
                    items[0].write_repr(out, depth + 1);
                    out.push_str(",)");
                } else {
                    write_seq(out, "(", ")", items, depth);
                }
            }
            Value::Dict(d) => {
                let items = d.read().items();
                out.push('{');
                for (i, (k, v)) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            Value::Set(s) => {
                let items = s.read().items();
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    write_seq(out, "{", "}", &items, depth);
                }
            }
            Value::Date(d) => {
                let _ = write!(out, "datetime.date({}, {}, {})", d.year(), d.month(), d.day());
            }
            Value::DateTime(dt) => {
                let _ = write!(
                    out,
                    "datetime.datetime({}, {}, {}, {}, {}",
                    dt.year(),
                    dt.month(),
                    dt.day(),
                    dt.hour(),
                    dt.minute()
                );
                let micros = dt.nanosecond() / 1000;
                if dt.second() != 0 || micros != 0 {
                    let _ = write!(out, ", {}", dt.second());
                }
                if micros != 0 {
                    let _ = write!(out, ", {}", micros);
                }
                out.push(')');
            }
            Value::TimeDelta(d) => out.push_str(&timedelta_repr(d)),
            Value::Table(t) => out.push_str(&render_table(&t.read())),
            Value::Function(f) => {
                let _ = write!(out, "<function {}>", f.def.name);
            }
            Value::Native(f) => {
                let _ = write!(out, "<built-in function {}>", f.name);
            }
            Value::Method(m) => {
                let _ = write!(out, "<bound method {}.{}>", m.receiver.type_name(), m.name);
            }
            Value::Module(m) => {
                let _ = write!(out, "<module '{}'>", m.name);
            }
            Value::Iterator(it) => {
                let _ = write!(out, "<{} object>", it.kind);
            }
            Value::Slice(s) => {
                let part = |p: &Option<i64>| p.map_or("None".to_string(), |v| v.to_string());
                let _ = write!(out, "slice({}, {}, {})", part(&s[0]), part(&s[1]), part(&s[2]));
            }
            Value::Type(name) => {
                let _ = write!(out, "<class '{}'>", name);
            }
        }
    }
}

fn write_seq(out: &mut String, open: &str, close: &str, items: &[Value], depth: usize) {
    out.push_str(open);
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        v.write_repr(out, depth + 1);
    }
    out.push_str(close);
}

/// Quote a string the way `repr` does: single quotes unless the text
/// contains a single quote and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn timedelta_repr(d: &TimeDelta) -> String {
    let total_us = d.num_microseconds().unwrap_or(0);
    let days = total_us.div_euclid(86_400_000_000);
    let rem = total_us.rem_euclid(86_400_000_000);
    let seconds = rem / 1_000_000;
    let micros = rem % 1_000_000;
    let mut parts = Vec::new();
    if days != 0 {
        parts.push(format!("days={}", days));
    }
    if seconds != 0 {
        parts.push(format!("seconds={}", seconds));
    }
    if micros != 0 {
        parts.push(format!("microseconds={}", micros));
    }
    if parts.is_empty() {
        "datetime.timedelta(0)".to_string()
    } else {
        format!("datetime.timedelta({})", parts.join(", "))
    }
}

const MAX_RENDERED_ROWS: usize = 60;

/// Plain-text rendering of a table for `print`.
pub fn render_table(table: &Table) -> String {
    let rows = table.num_rows();
    if table.num_columns() == 0 {
        return format!("Empty Table\nColumns: []\nIndex: [{} rows]", rows);
    }
    let shown: Vec<usize> = if rows > MAX_RENDERED_ROWS {
        let half = MAX_RENDERED_ROWS / 2;
        (0..half).chain(rows - half..rows).collect()
    } else {
        (0..rows).collect()
    };

    let mut grid: Vec<Vec<String>> = Vec::with_capacity(shown.len() + 1);
    let mut header = vec![String::new()];
    header.extend(table.columns.iter().map(|c| c.name.clone()));
    grid.push(header);
    for &r in &shown {
        let mut line = vec![r.to_string()];
        for col in &table.columns {
            let cell = &col.values[r];
            line.push(if cell.is_null() {
                "None".to_string()
            } else {
                cell.to_string()
            });
        }
        grid.push(line);
    }

    let widths: Vec<usize> = (0..grid[0].len())
        .map(|c| grid.iter().map(|row| row[c].chars().count()).max().unwrap_or(0))
        .collect();
    let mut out = String::new();
    for (i, row) in grid.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if rows > MAX_RENDERED_ROWS && i == MAX_RENDERED_ROWS / 2 + 1 {
            out.push_str("...\n");
        }
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:>width$}", cell, width = *w))
            .collect();
        out.push_str(&cells.join("  "));
    }
    if rows > MAX_RENDERED_ROWS {
        let _ = write!(out, "\n\n[{} rows x {} columns]", rows, table.num_columns());
    }
    out
}

/// Raise `ExcKind` with a formatted message; shorthand for natives.
pub fn raise<T>(kind: ExcKind, message: impl Into<String>) -> ExecResult<T> {
    Err(Exception::new(kind, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_fold_bool_and_integral_float() {
        assert_eq!(Value::Bool(true).key().unwrap(), Value::Int(1).key().unwrap());
        assert_eq!(Value::Float(2.0).key().unwrap(), Value::Int(2).key().unwrap());
        assert_ne!(Value::Float(2.5).key().unwrap(), Value::Int(2).key().unwrap());
        assert!(Value::list(vec![]).key().is_err());
    }

    #[test]
    fn ordered_map_keeps_order_after_removal() {
        let mut m: OrderedMap<i32> = OrderedMap::new();
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            m.insert(Key::Str(Arc::from(*k)), i as i32);
        }
        m.remove(&Key::Str(Arc::from("a")));
        m.insert(Key::Str(Arc::from("b")), 9);
        let vals: Vec<i32> = m.values().copied().collect();
        assert_eq!(vals, vec![9, 2]);
        assert_eq!(m.get(&Key::Str(Arc::from("c"))), Some(&2));
    }

    #[test]
    fn repr_matches_script_conventions() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::str("it's"),
            Value::tuple(vec![Value::None]),
            Value::Float(2.0),
        ]);
        assert_eq!(v.repr(), "[1, \"it's\", (None,), 2.0]");
        assert_eq!(Value::str("a").to_str(), "a");
        assert_eq!(Value::set(Set::new()).repr(), "set()");
    }

    #[test]
    fn bind_maps_keywords_and_reports_missing() {
        let args = CallArgs::with_keywords(vec![Value::Int(1)], vec![("b".into(), Value::Int(2))]);
        let [a, b, c] = args.bind("f", ["a", "b", "c"], 2).unwrap();
        assert!(matches!(a, Some(Value::Int(1))));
        assert!(matches!(b, Some(Value::Int(2))));
        assert!(c.is_none());

        let err = CallArgs::new(vec![]).bind("f", ["a"], 1).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);
    }

    #[test]
    fn table_truthiness_is_an_error() {
        let err = Value::table(Table::new()).truthy().unwrap_err();
        assert_eq!(err.kind, ExcKind::ValueError);
    }
}
