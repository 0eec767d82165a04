//! Attributes and methods of built-in value types.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use parking_lot::RwLock;
use scriptbox_core::types::{duration_seconds, format_datetime, Aggregation, Table};

use crate::convert;
use crate::error::{ExcKind, ExecResult, Exception};
use crate::format;
use crate::interp::Interpreter;
use crate::ops;
use crate::value::{BoundMethod, CallArgs, Dict, Set, Value};

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "rsplit", "join", "replace",
    "startswith", "endswith", "find", "rfind", "index", "count", "format", "title",
    "capitalize", "isdigit", "isnumeric", "isalpha", "isalnum", "isspace", "isupper",
    "islower", "zfill", "center", "ljust", "rjust", "splitlines", "partition", "swapcase",
    "casefold",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "clear",
    "copy",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DICT_METHODS: &[&str] = &[
    "keys", "values", "items", "get", "pop", "setdefault", "update", "clear", "copy", "popitem",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "union", "intersection", "difference",
    "symmetric_difference", "issubset", "issuperset", "isdisjoint", "update", "clear", "copy",
];
const DATE_METHODS: &[&str] = &["isoformat", "strftime", "weekday", "isoweekday", "replace"];
const DATETIME_METHODS: &[&str] = &["isoformat", "strftime", "weekday", "isoweekday", "replace", "date"];
const TIMEDELTA_METHODS: &[&str] = &["total_seconds"];
const FLOAT_METHODS: &[&str] = &["is_integer"];
const INT_METHODS: &[&str] = &["bit_length"];
const TABLE_METHODS: &[&str] = &[
    "head", "tail", "add_column", "drop", "rename", "select", "sort_values", "filter",
    "to_records", "column", "append", "copy", "group_by",
];

fn method_names(obj: &Value) -> &'static [&'static str] {
    match obj {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Date(_) => DATE_METHODS,
        Value::DateTime(_) => DATETIME_METHODS,
        Value::TimeDelta(_) => TIMEDELTA_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        Value::Int(_) => INT_METHODS,
        Value::Table(_) => TABLE_METHODS,
        _ => &[],
    }
}

fn no_attribute(obj: &Value, name: &str) -> Exception {
    match obj {
        Value::Native(f) if !f.attrs.is_empty() => Exception::attribute_error(format!(
            "type object '{}' has no attribute '{}'",
            f.name, name
        )),
        Value::Module(m) => Exception::attribute_error(format!(
            "module '{}' has no attribute '{}'",
            m.name, name
        )),
        other => Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        )),
    }
}

fn property(obj: &Value, name: &str) -> Option<Value> {
    match (obj, name) {
        (Value::Module(m), _) => m.get(name),
        (Value::Native(f), _) => f.attrs.get(name).cloned(),
        (Value::Table(t), "columns") => Some(Value::list(
            t.read().column_names().into_iter().map(Value::str).collect(),
        )),
        (Value::Table(t), "shape") => {
            let t = t.read();
            Some(Value::tuple(vec![
                Value::Int(t.num_rows() as i64),
                Value::Int(t.num_columns() as i64),
            ]))
        }
        (Value::Table(t), "dtypes") => Some(Value::dict_from_pairs(
            t.read()
                .column_types()
                .into_iter()
                .map(|(n, d)| (n.to_string(), Value::str(d.name()))),
        )),
        (Value::Table(t), "empty") => {
            let t = t.read();
            Some(Value::Bool(t.num_rows() == 0 || t.num_columns() == 0))
        }
        (Value::Date(d), _) => date_field(d, name),
        (Value::DateTime(dt), _) => date_field(&dt.date(), name).or_else(|| match name {
            "hour" => Some(Value::Int(dt.hour() as i64)),
            "minute" => Some(Value::Int(dt.minute() as i64)),
            "second" => Some(Value::Int(dt.second() as i64)),
            "microsecond" => Some(Value::Int((dt.nanosecond() / 1000) as i64)),
            _ => None,
        }),
        (Value::TimeDelta(d), _) => {
            let us = d.num_microseconds().unwrap_or(0);
            let days = us.div_euclid(86_400_000_000);
            let rem = us.rem_euclid(86_400_000_000);
            match name {
                "days" => Some(Value::Int(days)),
                "seconds" => Some(Value::Int(rem / 1_000_000)),
                "microseconds" => Some(Value::Int(rem % 1_000_000)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn date_field(d: &NaiveDate, name: &str) -> Option<Value> {
    match name {
        "year" => Some(Value::Int(d.year() as i64)),
        "month" => Some(Value::Int(d.month() as i64)),
        "day" => Some(Value::Int(d.day() as i64)),
        _ => None,
    }
}

pub fn native_getattr(obj: &Value, name: &str) -> ExecResult<Value> {
    if let Some(v) = property(obj, name) {
        return Ok(v);
    }
    if method_names(obj).contains(&name) {
        return Ok(Value::Method(Arc::new(BoundMethod {
            receiver: obj.clone(),
            name: name.to_string(),
        })));
    }
    Err(no_attribute(obj, name))
}

pub fn has_attr(obj: &Value, name: &str) -> bool {
    property(obj, name).is_some() || method_names(obj).contains(&name)
}

pub fn native_setattr(obj: &Value, name: &str, value: Value) -> ExecResult<()> {
    match (obj, name) {
        (Value::Table(t), "columns") => {
            let names = ops::iterate(&value)?
                .iter()
                .map(|v| v.to_str())
                .collect::<Vec<_>>();
            t.write()
                .set_column_names(names)
                .map_err(|e| Exception::value_error(e.to_string()))
        }
        (Value::Module(m), _) => Err(Exception::attribute_error(format!(
            "cannot set attribute '{}' on module '{}'",
            name, m.name
        ))),
        (other, _) if has_attr(other, name) => Err(Exception::attribute_error(format!(
            "attribute '{}' of '{}' objects is not writable",
            name,
            other.type_name()
        ))),
        (other, _) => Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

/// Stable merge sort with a fallible comparator; returns the sorted order.
pub fn try_sort_indices<F>(len: usize, mut cmp: F) -> ExecResult<Vec<usize>>
where
    F: FnMut(usize, usize) -> ExecResult<Ordering>,
{
    let mut src: Vec<usize> = (0..len).collect();
    let mut buf = vec![0usize; len];
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if cmp(src[j], src[i])? == Ordering::Less {
                    buf[k] = src[j];
                    j += 1;
                } else {
                    buf[k] = src[i];
                    i += 1;
                }
                k += 1;
            }
            buf[k..k + (mid - i)].copy_from_slice(&src[i..mid]);
            k += mid - i;
            buf[k..k + (end - j)].copy_from_slice(&src[j..end]);
            start = end;
        }
        std::mem::swap(&mut src, &mut buf);
        width *= 2;
    }
    Ok(src)
}

/// `sorted(items, key=..., reverse=...)`. Equal items keep their order
/// in both directions.
pub fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> ExecResult<Vec<Value>> {
    let keys = match key {
        Some(f) if !f.is_none() => items
            .iter()
            .map(|v| interp.call(f, CallArgs::new(vec![v.clone()])))
            .collect::<ExecResult<Vec<_>>>()?,
        _ => items.clone(),
    };
    let order = try_sort_indices(items.len(), |a, b| {
        if reverse {
            ops::compare(&keys[b], &keys[a])
        } else {
            ops::compare(&keys[a], &keys[b])
        }
    })?;
    let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> ExecResult<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(items) => list_method(interp, items, name, args),
        Value::Tuple(items) => {
            let [x] = args.bind(name, ["value"], 1)?;
            seq_search(items, name, &x.unwrap_or(Value::None), "tuple")
        }
        Value::Dict(d) => dict_method(interp, d, name, args),
        Value::Set(s) => set_method(interp, s, name, args),
        Value::Date(d) => date_method(&d.and_hms_opt(0, 0, 0).unwrap_or_default(), true, name, args),
        Value::DateTime(dt) => date_method(dt, false, name, args),
        Value::TimeDelta(d) => {
            args.bind::<0>(name, [], 0)?;
            Ok(Value::Float(duration_seconds(d)))
        }
        Value::Float(f) => {
            args.bind::<0>(name, [], 0)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Value::Int(i) => {
            args.bind::<0>(name, [], 0)?;
            Ok(Value::Int((64 - i.unsigned_abs().leading_zeros()) as i64))
        }
        Value::Table(t) => table_method(interp, receiver, t, name, args),
        other => Err(no_attribute(other, name)),
    }
}

fn seq_search(items: &[Value], name: &str, x: &Value, kind: &str) -> ExecResult<Value> {
    match name {
        "count" => Ok(Value::Int(items.iter().filter(|v| ops::equals(v, x)).count() as i64)),
        _ => items
            .iter()
            .position(|v| ops::equals(v, x))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| Exception::value_error(format!("{}.index(x): x not in {}", kind, kind))),
    }
}

fn opt_str(v: Option<Value>, what: &str) -> ExecResult<Option<Arc<str>>> {
    match v {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(v.as_str(what)?)),
    }
}

fn char_index(s: &str, byte_idx: usize) -> i64 {
    s[..byte_idx].chars().count() as i64
}

fn str_method(interp: &mut Interpreter<'_>, s: &Arc<str>, name: &str, args: CallArgs) -> ExecResult<Value> {
    let s: &str = s;
    let text = |t: String| -> ExecResult<Value> { Ok(Value::str(t)) };
    match name {
        "upper" => text(s.to_uppercase()),
        "lower" | "casefold" => text(s.to_lowercase()),
        "swapcase" => text(
            s.chars()
                .map(|c| {
                    if c.is_uppercase() {
                        c.to_lowercase().collect::<String>()
                    } else {
                        c.to_uppercase().collect::<String>()
                    }
                })
                .collect(),
        ),
        "strip" | "lstrip" | "rstrip" => {
            let [chars] = args.bind(name, ["chars"], 0)?;
            let chars = opt_str(chars, "chars")?;
            let pred = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            text(match name {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            }
            .to_string())
        }
        "split" | "rsplit" => {
            let [sep, maxsplit] = args.bind(name, ["sep", "maxsplit"], 0)?;
            let sep = opt_str(sep, "sep")?;
            let max = maxsplit.map(|m| m.as_int("maxsplit")).transpose()?.unwrap_or(-1);
            let parts = split(s, sep.as_deref(), max, name == "rsplit")?;
            Ok(Value::list(parts.into_iter().map(Value::str).collect()))
        }
        "splitlines" => Ok(Value::list(s.lines().map(Value::str).collect())),
        "join" => {
            let [items] = args.bind(name, ["iterable"], 1)?;
            let items = interp.iterate(&items.unwrap_or(Value::None))?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return Err(Exception::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            text(parts.join(s))
        }
        "replace" => {
            let [old, new, count] = args.bind(name, ["old", "new", "count"], 2)?;
            let old = old.unwrap_or(Value::None).as_str("old")?;
            let new = new.unwrap_or(Value::None).as_str("new")?;
            let count = count.map(|c| c.as_int("count")).transpose()?.unwrap_or(-1);
            text(if count < 0 {
                s.replace(old.as_ref(), &new)
            } else {
                s.replacen(old.as_ref(), &new, count as usize)
            })
        }
        "startswith" | "endswith" => {
            let [prefix] = args.bind(name, ["prefix"], 1)?;
            let candidates = match prefix.unwrap_or(Value::None) {
                Value::Tuple(items) => items.iter().map(|v| v.as_str(name)).collect::<ExecResult<Vec<_>>>()?,
                other => vec![other.as_str(name)?],
            };
            Ok(Value::Bool(candidates.iter().any(|p| {
                if name == "startswith" {
                    s.starts_with(p.as_ref())
                } else {
                    s.ends_with(p.as_ref())
                }
            })))
        }
        "find" | "rfind" | "index" => {
            let [sub] = args.bind(name, ["sub"], 1)?;
            let sub = sub.unwrap_or(Value::None).as_str("sub")?;
            let found = if name == "rfind" {
                s.rfind(sub.as_ref())
            } else {
                s.find(sub.as_ref())
            };
            match (found, name) {
                (Some(idx), _) => Ok(Value::Int(char_index(s, idx))),
                (None, "index") => Err(Exception::value_error("substring not found")),
                (None, _) => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            let [sub] = args.bind(name, ["sub"], 1)?;
            let sub = sub.unwrap_or(Value::None).as_str("sub")?;
            let n = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub.as_ref()).count()
            };
            Ok(Value::Int(n as i64))
        }
        "format" => text(format::str_format(s, &args.positional, &args.keywords)?),
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut prev_letter = false;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if prev_letter {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                    prev_letter = true;
                } else {
                    out.push(c);
                    prev_letter = false;
                }
            }
            text(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            text(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "isdigit" | "isnumeric" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_numeric()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "isalnum" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))),
        "isupper" => Ok(Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase),
        )),
        "islower" => Ok(Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase),
        )),
        "zfill" => {
            let [width] = args.bind(name, ["width"], 1)?;
            let width = width.unwrap_or(Value::None).as_int("width")?.max(0) as usize;
            let len = s.chars().count();
            if len >= width {
                return text(s.to_string());
            }
            let zeros = "0".repeat(width - len);
            text(match s.strip_prefix(['+', '-']) {
                Some(rest) => format!("{}{}{}", &s[..1], zeros, rest),
                None => format!("{}{}", zeros, s),
            })
        }
        "center" | "ljust" | "rjust" => {
            let [width, fill] = args.bind(name, ["width", "fillchar"], 1)?;
            let width = width.unwrap_or(Value::None).as_int("width")?.max(0) as usize;
            let fill = match opt_str(fill, "fillchar")? {
                Some(f) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
                Some(_) => {
                    return Err(Exception::type_error(
                        "The fill character must be exactly one character long",
                    ))
                }
                None => ' ',
            };
            let len = s.chars().count();
            if len >= width {
                return text(s.to_string());
            }
            let n = width - len;
            let pad = |k: usize| std::iter::repeat(fill).take(k).collect::<String>();
            text(match name {
                "ljust" => format!("{}{}", s, pad(n)),
                "rjust" => format!("{}{}", pad(n), s),
                _ => {
                    let left = n / 2 + (n & width & 1);
                    format!("{}{}{}", pad(left), s, pad(n - left))
                }
            })
        }
        "partition" => {
            let [sep] = args.bind(name, ["sep"], 1)?;
            let sep = sep.unwrap_or(Value::None).as_str("sep")?;
            if sep.is_empty() {
                return Err(Exception::value_error("empty separator"));
            }
            Ok(match s.split_once(sep.as_ref()) {
                Some((a, b)) => Value::tuple(vec![Value::str(a), Value::Str(sep.clone()), Value::str(b)]),
                None => Value::tuple(vec![Value::str(s), Value::str(""), Value::str("")]),
            })
        }
        _ => Err(no_attribute(&Value::str(s), name)),
    }
}

fn split(s: &str, sep: Option<&str>, max: i64, from_right: bool) -> ExecResult<Vec<String>> {
    match sep {
        Some("") => Err(Exception::value_error("empty separator")),
        Some(sep) => Ok(match (max < 0, from_right) {
            (true, _) => s.split(sep).map(String::from).collect(),
            (false, false) => s.splitn(max as usize + 1, sep).map(String::from).collect(),
            (false, true) => {
                let mut parts: Vec<String> = s.rsplitn(max as usize + 1, sep).map(String::from).collect();
                parts.reverse();
                parts
            }
        }),
        None => {
            let words: Vec<&str> = s.split_whitespace().collect();
            if max < 0 || words.len() <= max as usize + 1 {
                return Ok(words.into_iter().map(String::from).collect());
            }
            let max = max as usize;
            if from_right {
                // Keep the leading remainder intact.
                let mut rest = s.trim_end();
                let mut tail = Vec::with_capacity(max + 1);
                for _ in 0..max {
                    match rest.rfind(char::is_whitespace) {
                        Some(idx) => {
                            tail.push(rest[idx..].trim_start().to_string());
                            rest = rest[..idx].trim_end();
                        }
                        None => break,
                    }
                }
                tail.push(rest.trim_start().to_string());
                tail.reverse();
                Ok(tail)
            } else {
                let mut rest = s.trim_start();
                let mut head = Vec::with_capacity(max + 1);
                for _ in 0..max {
                    match rest.find(char::is_whitespace) {
                        Some(idx) => {
                            head.push(rest[..idx].to_string());
                            rest = rest[idx..].trim_start();
                        }
                        None => break,
                    }
                }
                head.push(rest.to_string());
                Ok(head)
            }
        }
    }
}

fn list_method(
    interp: &mut Interpreter<'_>,
    items: &Arc<RwLock<Vec<Value>>>,
    name: &str,
    args: CallArgs,
) -> ExecResult<Value> {
    match name {
        "append" => {
            let [x] = args.bind(name, ["object"], 1)?;
            items.write().push(x.unwrap_or(Value::None));
            Ok(Value::None)
        }
        "extend" => {
            let [other] = args.bind(name, ["iterable"], 1)?;
            let extra = interp.iterate(&other.unwrap_or(Value::None))?;
            items.write().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let [index, x] = args.bind(name, ["index", "object"], 2)?;
            let index = index.unwrap_or(Value::None).as_int("index")?;
            let mut items = items.write();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, x.unwrap_or(Value::None));
            Ok(Value::None)
        }
        "pop" => {
            let [index] = args.bind(name, ["index"], 0)?;
            let mut items = items.write();
            if items.is_empty() {
                return Err(Exception::index_error("pop from empty list"));
            }
            let index = index.map(|i| i.as_int("index")).transpose()?.unwrap_or(-1);
            let at = ops::normalize_index(index, items.len(), "pop")?;
            Ok(items.remove(at))
        }
        "remove" => {
            let [x] = args.bind(name, ["value"], 1)?;
            let x = x.unwrap_or(Value::None);
            let snapshot = items.read().clone();
            let at = snapshot
                .iter()
                .position(|v| ops::equals(v, &x))
                .ok_or_else(|| Exception::value_error("list.remove(x): x not in list"))?;
            items.write().remove(at);
            Ok(Value::None)
        }
        "index" | "count" => {
            let [x] = args.bind(name, ["value"], 1)?;
            let snapshot = items.read().clone();
            seq_search(&snapshot, name, &x.unwrap_or(Value::None), "list")
        }
        "sort" => {
            let [key, reverse] = args.bind(name, ["key", "reverse"], 0)?;
            let reverse = match reverse {
                Some(r) => r.truthy()?,
                None => false,
            };
            let snapshot = items.read().clone();
            let sorted = sort_values(interp, snapshot, key.as_ref(), reverse)?;
            *items.write() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            args.bind::<0>(name, [], 0)?;
            items.write().reverse();
            Ok(Value::None)
        }
        "clear" => {
            args.bind::<0>(name, [], 0)?;
            items.write().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.bind::<0>(name, [], 0)?;
            Ok(Value::list(items.read().clone()))
        }
        _ => Err(Exception::attribute_error(format!(
            "'list' object has no attribute '{}'",
            name
        ))),
    }
}

fn dict_method(
    interp: &mut Interpreter<'_>,
    d: &Arc<RwLock<Dict>>,
    name: &str,
    mut args: CallArgs,
) -> ExecResult<Value> {
    match name {
        "keys" => Ok(Value::list(d.read().keys())),
        "values" => Ok(Value::list(d.read().values().map(|(_, v)| v.clone()).collect())),
        "items" => Ok(Value::list(
            d.read()
                .items()
                .into_iter()
                .map(|(k, v)| Value::tuple(vec![k, v]))
                .collect(),
        )),
        "get" => {
            let [key, default] = args.bind(name, ["key", "default"], 1)?;
            let found = d.read().get_item(&key.unwrap_or(Value::None))?;
            Ok(found.or(default).unwrap_or(Value::None))
        }
        "pop" => {
            let [key, default] = args.bind(name, ["key", "default"], 1)?;
            let key = key.unwrap_or(Value::None);
            let removed = d.write().remove(&key.key()?);
            match (removed, default) {
                (Some((_, v)), _) => Ok(v),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(Exception::key_error(key.repr())),
            }
        }
        "setdefault" => {
            let [key, default] = args.bind(name, ["key", "default"], 1)?;
            let key = key.unwrap_or(Value::None);
            let mut d = d.write();
            if let Some(v) = d.get_item(&key)? {
                return Ok(v);
            }
            let default = default.unwrap_or(Value::None);
            d.set_item(key, default.clone())?;
            Ok(default)
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            let [other] = args.bind(name, ["other"], 0)?;
            let mut pairs = Vec::new();
            match other {
                None => {}
                Some(Value::Dict(src)) => pairs.extend(src.read().items()),
                Some(other) => {
                    for item in interp.iterate(&other)? {
                        let kv = interp.iterate(&item)?;
                        if kv.len() != 2 {
                            return Err(Exception::value_error(format!(
                                "dictionary update sequence element has length {}; 2 is required",
                                kv.len()
                            )));
                        }
                        let mut kv = kv.into_iter();
                        if let (Some(k), Some(v)) = (kv.next(), kv.next()) {
                            pairs.push((k, v));
                        }
                    }
                }
            }
            pairs.extend(keywords.into_iter().map(|(k, v)| (Value::str(k), v)));
            let mut d = d.write();
            for (k, v) in pairs {
                d.set_item(k, v)?;
            }
            Ok(Value::None)
        }
        "clear" => {
            d.write().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(d.read().clone())),
        "popitem" => d
            .write()
            .pop_last()
            .map(|(_, (k, v))| Value::tuple(vec![k, v]))
            .ok_or_else(|| Exception::key_error("'popitem(): dictionary is empty'")),
        _ => Err(Exception::attribute_error(format!(
            "'dict' object has no attribute '{}'",
            name
        ))),
    }
}

fn set_method(
    interp: &mut Interpreter<'_>,
    s: &Arc<RwLock<Set>>,
    name: &str,
    args: CallArgs,
) -> ExecResult<Value> {
    let others = args.positional_only(name)?;
    let one = |others: &[Value]| -> ExecResult<Value> {
        others
            .first()
            .cloned()
            .ok_or_else(|| Exception::type_error(format!("{}() takes exactly one argument (0 given)", name)))
    };
    match name {
        "add" => {
            let x = one(&others)?;
            s.write().add(x)?;
            Ok(Value::None)
        }
        "remove" | "discard" => {
            let x = one(&others)?;
            let removed = s.write().remove(&x.key()?);
            if removed.is_none() && name == "remove" {
                return Err(Exception::key_error(x.repr()));
            }
            Ok(Value::None)
        }
        "pop" => s
            .write()
            .pop_last()
            .map(|(_, v)| v)
            .ok_or_else(|| Exception::key_error("'pop from an empty set'")),
        "clear" => {
            s.write().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::set(s.read().clone())),
        "update" => {
            let mut extra = Vec::new();
            for other in &others {
                extra.extend(interp.iterate(other)?);
            }
            let mut s = s.write();
            for v in extra {
                s.add(v)?;
            }
            Ok(Value::None)
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let mut acc = Value::set(s.read().clone());
            let op = match name {
                "union" => crate::ast::BinOp::BitOr,
                "intersection" => crate::ast::BinOp::BitAnd,
                "difference" => crate::ast::BinOp::Sub,
                _ => crate::ast::BinOp::BitXor,
            };
            for other in &others {
                let mut rhs = Set::new();
                for v in interp.iterate(other)? {
                    rhs.add(v)?;
                }
                acc = ops::binary(op, &acc, &Value::set(rhs))?;
            }
            Ok(acc)
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            let mut rhs = Set::new();
            for v in interp.iterate(&one(&others)?)? {
                rhs.add(v)?;
            }
            let lhs = s.read();
            Ok(Value::Bool(match name {
                "issubset" => lhs.iter().all(|(k, _)| rhs.contains_key(k)),
                "issuperset" => rhs.iter().all(|(k, _)| lhs.contains_key(k)),
                _ => !lhs.iter().any(|(k, _)| rhs.contains_key(k)),
            }))
        }
        _ => Err(Exception::attribute_error(format!(
            "'set' object has no attribute '{}'",
            name
        ))),
    }
}

fn date_method(dt: &NaiveDateTime, is_date: bool, name: &str, args: CallArgs) -> ExecResult<Value> {
    match name {
        "isoformat" => {
            args.bind::<0>(name, [], 0)?;
            Ok(Value::str(if is_date {
                dt.date().format("%Y-%m-%d").to_string()
            } else {
                format_datetime(dt, 'T')
            }))
        }
        "strftime" => {
            let [fmt] = args.bind(name, ["format"], 1)?;
            let fmt = fmt.unwrap_or(Value::None).as_str("format")?;
            Ok(Value::str(if is_date {
                format::strftime_date(&dt.date(), &fmt)?
            } else {
                format::strftime(dt, &fmt)?
            }))
        }
        "weekday" => Ok(Value::Int(dt.weekday().num_days_from_monday() as i64)),
        "isoweekday" => Ok(Value::Int(dt.weekday().number_from_monday() as i64)),
        "date" => Ok(Value::Date(dt.date())),
        "replace" => {
            let [year, month, day, hour, minute, second, microsecond] = args.bind(
                name,
                ["year", "month", "day", "hour", "minute", "second", "microsecond"],
                0,
            )?;
            let pick = |v: Option<Value>, current: i64, what: &str| -> ExecResult<i64> {
                v.map(|v| v.as_int(what)).transpose().map(|v| v.unwrap_or(current))
            };
            let out = build_datetime(
                pick(year, dt.year() as i64, "year")?,
                pick(month, dt.month() as i64, "month")?,
                pick(day, dt.day() as i64, "day")?,
                pick(hour, dt.hour() as i64, "hour")?,
                pick(minute, dt.minute() as i64, "minute")?,
                pick(second, dt.second() as i64, "second")?,
                pick(microsecond, (dt.nanosecond() / 1000) as i64, "microsecond")?,
            )?;
            Ok(if is_date {
                Value::Date(out.date())
            } else {
                Value::DateTime(out)
            })
        }
        _ => Err(Exception::attribute_error(format!(
            "'{}' object has no attribute '{}'",
            if is_date { "date" } else { "datetime" },
            name
        ))),
    }
}

/// Validated construction shared by `replace` and the `datetime` module.
pub fn build_datetime(
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    second: i64,
    micro: i64,
) -> ExecResult<NaiveDateTime> {
    let date = build_date(year, month, day)?;
    let in_range = |v: i64, hi: i64| (0..hi).contains(&v);
    if !in_range(hour, 24) {
        return Err(Exception::value_error("hour must be in 0..23"));
    }
    if !in_range(minute, 60) {
        return Err(Exception::value_error("minute must be in 0..59"));
    }
    if !in_range(second, 60) {
        return Err(Exception::value_error("second must be in 0..59"));
    }
    if !in_range(micro, 1_000_000) {
        return Err(Exception::value_error("microsecond must be in 0..999999"));
    }
    date.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micro as u32)
        .ok_or_else(|| Exception::value_error("invalid time"))
}

pub fn build_date(year: i64, month: i64, day: i64) -> ExecResult<NaiveDate> {
    if !(1..=9999).contains(&year) {
        return Err(Exception::value_error(format!("year {} is out of range", year)));
    }
    if !(1..=12).contains(&month) {
        return Err(Exception::value_error("month must be in 1..12"));
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| Exception::value_error("day is out of range for month"))
}

fn names_arg(v: Value, what: &str) -> ExecResult<Vec<String>> {
    match v {
        Value::Str(s) => Ok(vec![s.to_string()]),
        other => ops::iterate(&other)?
            .iter()
            .map(|n| n.as_str(what).map(|s| s.to_string()))
            .collect(),
    }
}

fn core_err(e: scriptbox_core::Error) -> Exception {
    Exception::from(e)
}

fn table_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    t: &Arc<RwLock<Table>>,
    name: &str,
    args: CallArgs,
) -> ExecResult<Value> {
    match name {
        "head" | "tail" => {
            let [n] = args.bind(name, ["n"], 0)?;
            let n = n.map(|v| v.as_int("n")).transpose()?.unwrap_or(5);
            let t = t.read();
            let n = if n < 0 {
                t.num_rows().saturating_sub(n.unsigned_abs() as usize)
            } else {
                n as usize
            };
            Ok(Value::table(if name == "head" { t.head(n) } else { t.tail(n) }))
        }
        "add_column" => {
            let [col, values] = args.bind(name, ["name", "values"], 2)?;
            let col = col.unwrap_or(Value::None).as_str("name")?;
            if t.read().column_index(&col).is_some() {
                return Err(Exception::value_error(format!(
                    "cannot insert {}, already exists",
                    col
                )));
            }
            ops::set_item(receiver, Value::Str(col), values.unwrap_or(Value::None))?;
            Ok(Value::None)
        }
        "drop" => {
            let [columns] = args.bind(name, ["columns"], 1)?;
            let names = names_arg(columns.unwrap_or(Value::None), "column name")?;
            let mut out = t.read().clone();
            out.drop_columns(&names)
                .map_err(|e| Exception::key_error(e.to_string()))?;
            Ok(Value::table(out))
        }
        "rename" => {
            let [columns] = args.bind(name, ["columns"], 1)?;
            let mapping = match columns.unwrap_or(Value::None) {
                Value::Dict(d) => d.read().items(),
                other => {
                    return Err(Exception::type_error(format!(
                        "rename() expects a dict of column names, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let renames = mapping
                .into_iter()
                .map(|(k, v)| Ok((k.as_str("column name")?.to_string(), v.as_str("column name")?.to_string())))
                .collect::<ExecResult<Vec<_>>>()?;
            let mut out = t.read().clone();
            out.rename_columns(&renames);
            Ok(Value::table(out))
        }
        "select" => {
            let positional = args.positional_only(name)?;
            let names = match positional.as_slice() {
                [single] => names_arg(single.clone(), "column name")?,
                many => many
                    .iter()
                    .map(|v| v.as_str("column name").map(|s| s.to_string()))
                    .collect::<ExecResult<Vec<_>>>()?,
            };
            Ok(Value::table(t.read().select(&names).map_err(core_err)?))
        }
        "sort_values" => {
            let [by, ascending] = args.bind(name, ["by", "ascending"], 1)?;
            let keys = names_arg(by.unwrap_or(Value::None), "sort key")?;
            let ascending = match ascending {
                Some(a) => a.truthy()?,
                None => true,
            };
            let mut out = t.read().clone();
            out.sort_by_columns(&keys, ascending).map_err(core_err)?;
            Ok(Value::table(out))
        }
        "filter" => {
            let [predicate] = args.bind(name, ["predicate"], 1)?;
            let predicate = predicate.unwrap_or(Value::None);
            let snapshot = t.read().clone();
            let keep = if predicate.is_callable() {
                let rows = convert::table_records(&snapshot);
                let mut keep = Vec::with_capacity(snapshot.num_rows());
                for row in interp.iterate(&rows)? {
                    keep.push(interp.call(&predicate, CallArgs::new(vec![row]))?.truthy()?);
                }
                keep
            } else {
                let mask = interp.iterate(&predicate)?;
                if mask.len() != snapshot.num_rows() {
                    return Err(Exception::value_error(format!(
                        "boolean mask has {} items, table has {} rows",
                        mask.len(),
                        snapshot.num_rows()
                    )));
                }
                mask.iter().map(Value::truthy).collect::<ExecResult<Vec<_>>>()?
            };
            Ok(Value::table(snapshot.filter_rows(&keep)))
        }
        "to_records" => {
            args.bind::<0>(name, [], 0)?;
            Ok(convert::table_records(&t.read()))
        }
        "column" => {
            let [col] = args.bind(name, ["name"], 1)?;
            ops::get_item(receiver, &col.unwrap_or(Value::None))
        }
        "append" => {
            let [row] = args.bind(name, ["row"], 1)?;
            match row.unwrap_or(Value::None) {
                Value::Table(other) => {
                    let other = other.read().clone();
                    let mut t = t.write();
                    let merged = Table::concat_rows(&[t.clone(), other]);
                    *t = merged;
                }
                Value::Dict(d) => {
                    let record = d
                        .read()
                        .items()
                        .iter()
                        .map(|(k, v)| Ok((k.to_str(), convert::value_to_scalar(v)?)))
                        .collect::<ExecResult<Vec<_>>>()?;
                    t.write().push_row(record);
                }
                other => {
                    let rows = convert::table_from_value(&other, Some(t.read().column_names()))?;
                    let mut t = t.write();
                    let merged = Table::concat_rows(&[t.clone(), rows]);
                    *t = merged;
                }
            }
            Ok(Value::None)
        }
        "copy" => {
            args.bind::<0>(name, [], 0)?;
            Ok(Value::table(t.read().clone()))
        }
        "group_by" => {
            let [by, aggs] = args.bind(name, ["by", "aggregations"], 2)?;
            let keys = names_arg(by.unwrap_or(Value::None), "group key")?;
            let aggs = match aggs.unwrap_or(Value::None) {
                Value::Dict(d) => d.read().items(),
                other => {
                    return Err(Exception::type_error(format!(
                        "group_by() expects a dict of column: aggregation, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let aggs = aggs
                .into_iter()
                .map(|(col, agg)| {
                    let agg_name = agg.as_str("aggregation")?;
                    let agg = Aggregation::parse(&agg_name).ok_or_else(|| {
                        Exception::value_error(format!("unknown aggregation '{}'", agg_name))
                    })?;
                    Ok((col.as_str("column name")?.to_string(), agg))
                })
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::table(t.read().group_by(&keys, &aggs).map_err(core_err)?))
        }
        _ => Err(Exception::new(
            ExcKind::AttributeError,
            format!("'Table' object has no attribute '{}'", name),
        )),
    }
}

/// Whole-day and sub-day parts used by `timedelta(...)`.
pub fn make_timedelta(days: f64, seconds: f64, micros: f64) -> ExecResult<TimeDelta> {
    let total = days * 86_400_000_000.0 + seconds * 1_000_000.0 + micros;
    if !total.is_finite() || total.abs() > 9.0e18 {
        return Err(Exception::new(ExcKind::OverflowError, "timedelta out of range"));
    }
    Ok(TimeDelta::microseconds(total.round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_splitting() {
        assert_eq!(split("a,b,,c", Some(","), -1, false).unwrap(), vec!["a", "b", "", "c"]);
        assert_eq!(split("  a  b c ", None, -1, false).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split("a b c", None, 1, false).unwrap(), vec!["a", "b c"]);
        assert_eq!(split("a b c", None, 1, true).unwrap(), vec!["a b", "c"]);
        assert_eq!(split("a.b.c", Some("."), 1, true).unwrap(), vec!["a.b", "c"]);
        assert!(split("x", Some(""), -1, false).is_err());
    }

    #[test]
    fn merge_sort_is_stable_and_reports_errors() {
        let keys = [3, 1, 3, 2, 1];
        let order = try_sort_indices(keys.len(), |a, b| Ok(keys[a].cmp(&keys[b]))).unwrap();
        assert_eq!(order, vec![1, 4, 3, 0, 2]);

        let err = try_sort_indices(3, |_, _| Err(Exception::type_error("nope"))).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);
    }

    #[test]
    fn properties_and_bound_methods() {
        let t = Value::table(Table::new());
        assert!(matches!(native_getattr(&t, "empty").unwrap(), Value::Bool(true)));
        assert!(matches!(native_getattr(&t, "head").unwrap(), Value::Method(_)));
        assert!(native_getattr(&t, "nope").is_err());

        let d = Value::Date(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
        assert!(matches!(native_getattr(&d, "month").unwrap(), Value::Int(5)));
    }

    #[test]
    fn module_attributes_are_read_only() {
        let module = Value::Module(Arc::new(crate::value::Module::new("m", Default::default())));
        let err = native_setattr(&module, "x", Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ExcKind::AttributeError);
    }

    #[test]
    fn date_validation() {
        assert!(build_date(2023, 2, 29).is_err());
        assert!(build_date(2024, 2, 29).is_ok());
        assert!(build_datetime(2024, 1, 1, 24, 0, 0, 0).is_err());
    }
}
