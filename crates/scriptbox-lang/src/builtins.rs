//! Capability builtins: the only free functions a script can reach without
//! an import.

use std::cmp::Ordering;

use once_cell::sync::Lazy;

use crate::ast::BinOp;
use crate::error::{ExcKind, ExecResult, Exception};
use crate::interp::Interpreter;
use crate::methods;
use crate::ops;
use crate::value::{raise, CallArgs, Dict, IterState, Namespace, NativeFunction, Set, Value};

type Builtin = fn(&mut Interpreter<'_>, CallArgs) -> ExecResult<Value>;

const MAX_RANGE_LEN: i64 = 10_000_000;

const TABLE: &[(&str, Builtin)] = &[
    ("sorted", sorted),
    ("reversed", reversed),
    ("map", map),
    ("any", any),
    ("all", all),
    ("filter", filter),
    ("len", len),
    ("next", next),
    ("enumerate", enumerate),
    ("sum", sum),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("round", round),
    ("divmod", divmod),
    ("str", str_),
    ("int", int),
    ("float", float),
    ("tuple", tuple),
    ("set", set),
    ("list", list),
    ("dict", dict),
    ("bool", bool_),
    ("zip", zip),
    ("type", type_),
    ("range", range),
    ("isinstance", isinstance),
    ("print", print),
    ("getattr", getattr),
    ("setattr", setattr),
    ("hasattr", hasattr),
];

/// Shared, immutable builtins namespace.
pub static BUILTINS: Lazy<Namespace> = Lazy::new(|| {
    TABLE
        .iter()
        .map(|(name, f)| (name.to_string(), NativeFunction::value(*name, *f)))
        .collect()
});

pub fn lookup(name: &str) -> Option<Value> {
    BUILTINS.get(name).cloned()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    TABLE.iter().map(|(name, _)| *name)
}

fn arg(v: Option<Value>) -> Value {
    v.unwrap_or(Value::None)
}

fn sorted(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable, key, reverse] = args.bind("sorted", ["iterable", "key", "reverse"], 1)?;
    let items = interp.iterate(&arg(iterable))?;
    let reverse = match reverse {
        Some(r) => r.truthy()?,
        None => false,
    };
    Ok(Value::list(methods::sort_values(interp, items, key.as_ref(), reverse)?))
}

fn reversed(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [seq] = args.bind("reversed", ["sequence"], 1)?;
    let seq = arg(seq);
    match seq {
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Dict(_) => {
            let mut items = interp.iterate(&seq)?;
            items.reverse();
            Ok(IterState::value("reversed", items))
        }
        other => raise(
            ExcKind::TypeError,
            format!("'{}' object is not reversible", other.type_name()),
        ),
    }
}

fn map(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let mut args = args.positional_only("map")?.into_iter();
    let func = args
        .next()
        .ok_or_else(|| Exception::type_error("map() must have at least two arguments."))?;
    let columns = args
        .map(|it| interp.iterate(&it))
        .collect::<ExecResult<Vec<_>>>()?;
    if columns.is_empty() {
        return raise(ExcKind::TypeError, "map() must have at least two arguments.");
    }
    let n = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let call_args = columns.iter().map(|c| c[i].clone()).collect();
        out.push(interp.call(&func, CallArgs::new(call_args))?);
    }
    Ok(IterState::value("map", out))
}

fn filter(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [func, iterable] = args.bind("filter", ["function", "iterable"], 2)?;
    let func = arg(func);
    let mut out = Vec::new();
    for item in interp.iterate(&arg(iterable))? {
        let keep = if func.is_none() {
            item.truthy()?
        } else {
            interp.call(&func, CallArgs::new(vec![item.clone()]))?.truthy()?
        };
        if keep {
            out.push(item);
        }
    }
    Ok(IterState::value("filter", out))
}

fn any(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable] = args.bind("any", ["iterable"], 1)?;
    for item in interp.iterate(&arg(iterable))? {
        if item.truthy()? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn all(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable] = args.bind("all", ["iterable"], 1)?;
    for item in interp.iterate(&arg(iterable))? {
        if !item.truthy()? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn len(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj] = args.bind("len", ["obj"], 1)?;
    let n = match arg(obj) {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.read().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(d) => d.read().len(),
        Value::Set(s) => s.read().len(),
        Value::Table(t) => t.read().num_rows(),
        other => {
            return raise(
                ExcKind::TypeError,
                format!("object of type '{}' has no len()", other.type_name()),
            )
        }
    };
    Ok(Value::Int(n as i64))
}

fn next(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [it, default] = args.bind("next", ["iterator", "default"], 1)?;
    match arg(it) {
        Value::Iterator(state) => {
            let item = state.items.lock().pop_front();
            match (item, default) {
                (Some(v), _) => Ok(v),
                (None, Some(d)) => Ok(d),
                (None, None) => raise(ExcKind::StopIteration, ""),
            }
        }
        other => raise(
            ExcKind::TypeError,
            format!("'{}' object is not an iterator", other.type_name()),
        ),
    }
}

fn enumerate(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable, start] = args.bind("enumerate", ["iterable", "start"], 1)?;
    let start = start.map(|s| s.as_int("start")).transpose()?.unwrap_or(0);
    let items = interp
        .iterate(&arg(iterable))?
        .into_iter()
        .zip(start..)
        .map(|(v, i)| Value::tuple(vec![Value::Int(i), v]))
        .collect();
    Ok(IterState::value("enumerate", items))
}

fn sum(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable, start] = args.bind("sum", ["iterable", "start"], 1)?;
    let mut acc = start.unwrap_or(Value::Int(0));
    if matches!(acc, Value::Str(_)) {
        return raise(
            ExcKind::TypeError,
            "sum() can't sum strings [use ''.join(seq) instead]",
        );
    }
    for item in interp.iterate(&arg(iterable))? {
        acc = ops::binary(BinOp::Add, &acc, &item)?;
    }
    Ok(acc)
}

fn abs(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [x] = args.bind("abs", ["x"], 1)?;
    match arg(x) {
        Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(Exception::overflow),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::TimeDelta(d) => Ok(Value::TimeDelta(d.abs())),
        other => raise(
            ExcKind::TypeError,
            format!("bad operand type for abs(): '{}'", other.type_name()),
        ),
    }
}

fn extreme(
    interp: &mut Interpreter<'_>,
    mut args: CallArgs,
    fname: &str,
    wanted: Ordering,
) -> ExecResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let default = args.take_keyword("default");
    let positional = args.positional_only(fname)?;
    let items = match positional.len() {
        0 => {
            return raise(
                ExcKind::TypeError,
                format!("{} expected at least 1 argument, got 0", fname),
            )
        }
        1 => interp.iterate(&positional[0])?,
        _ => positional,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, CallArgs::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => ops::compare(&k, best_key)? == wanted,
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, default) {
        (Some((_, v)), _) => Ok(v),
        (None, Some(d)) => Ok(d),
        (None, None) => raise(
            ExcKind::ValueError,
            format!("{}() arg is an empty sequence", fname),
        ),
    }
}

fn min(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    extreme(interp, args, "min", Ordering::Less)
}

fn max(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    extreme(interp, args, "max", Ordering::Greater)
}

pub(crate) fn float_to_int(f: f64) -> ExecResult<i64> {
    if f.is_nan() {
        return raise(ExcKind::ValueError, "cannot convert float NaN to integer");
    }
    if !f.is_finite() || f >= 9.223_372_036_854_776e18 || f < -9.223_372_036_854_776e18 {
        return raise(
            ExcKind::OverflowError,
            "cannot convert float infinity or out-of-range value to integer",
        );
    }
    Ok(f as i64)
}

fn round(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [number, ndigits] = args.bind("round", ["number", "ndigits"], 1)?;
    let ndigits = match ndigits {
        None | Some(Value::None) => None,
        Some(n) => Some(n.as_int("ndigits")?),
    };
    match (arg(number), ndigits) {
        (Value::Int(i), None) => Ok(Value::Int(i)),
        (Value::Bool(b), None) => Ok(Value::Int(b as i64)),
        (Value::Int(i), Some(n)) if n >= 0 => Ok(Value::Int(i)),
        (Value::Int(i), Some(n)) => {
            let scale = 10f64.powi(n.saturating_neg().min(19) as i32);
            float_to_int((i as f64 / scale).round_ties_even() * scale).map(Value::Int)
        }
        (Value::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Value::Float(f), Some(n)) => {
            if !f.is_finite() || n > 15 {
                return Ok(Value::Float(f));
            }
            let scale = 10f64.powi(n.max(-308) as i32);
            let rounded = (f * scale).round_ties_even() / scale;
            Ok(Value::Float(if rounded.is_finite() { rounded } else { f }))
        }
        (other, _) => raise(
            ExcKind::TypeError,
            format!("type {} doesn't define __round__ method", other.type_name()),
        ),
    }
}

fn divmod(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [a, b] = args.bind("divmod", ["a", "b"], 2)?;
    let (a, b) = (arg(a), arg(b));
    Ok(Value::tuple(vec![
        ops::binary(BinOp::FloorDiv, &a, &b)?,
        ops::binary(BinOp::Mod, &a, &b)?,
    ]))
}

fn str_(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj] = args.bind("str", ["object"], 0)?;
    Ok(Value::str(obj.map(|v| v.to_str()).unwrap_or_default()))
}

/// Parse an integer literal the way `int(text, base)` does.
pub fn parse_int(text: &str, base: u32) -> ExecResult<i64> {
    let invalid = || {
        Exception::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            crate::value::quote_str(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let digits = match (base, lower.get(..2)) {
        (16, Some("0x")) | (8, Some("0o")) | (2, Some("0b")) => &lower[2..],
        _ => lower.as_str(),
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = u64::from_str_radix(&cleaned, base).map_err(|_| invalid())?;
    if negative {
        0i64.checked_sub_unsigned(magnitude).ok_or_else(Exception::overflow)
    } else {
        i64::try_from(magnitude).map_err(|_| Exception::overflow())
    }
}

fn int(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [x, base] = args.bind("int", ["x", "base"], 0)?;
    let base = match base {
        None => None,
        Some(b) => {
            let b = b.as_int("base")?;
            if !(2..=36).contains(&b) {
                return raise(ExcKind::ValueError, "int() base must be >= 2 and <= 36");
            }
            Some(b as u32)
        }
    };
    match (x, base) {
        (None, _) => Ok(Value::Int(0)),
        (Some(Value::Str(s)), base) => parse_int(&s, base.unwrap_or(10)).map(Value::Int),
        (Some(_), Some(_)) => raise(
            ExcKind::TypeError,
            "int() can't convert non-string with explicit base",
        ),
        (Some(Value::Int(i)), None) => Ok(Value::Int(i)),
        (Some(Value::Bool(b)), None) => Ok(Value::Int(b as i64)),
        (Some(Value::Float(f)), None) => float_to_int(f.trunc()).map(Value::Int),
        (Some(other), None) => raise(
            ExcKind::TypeError,
            format!(
                "int() argument must be a string or a real number, not '{}'",
                other.type_name()
            ),
        ),
    }
}

fn float(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [x] = args.bind("float", ["x"], 0)?;
    match x {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => {
            let cleaned = s.trim().replace('_', "");
            cleaned.parse::<f64>().map(Value::Float).map_err(|_| {
                Exception::value_error(format!(
                    "could not convert string to float: {}",
                    crate::value::quote_str(&s)
                ))
            })
        }
        Some(other) => other.as_float("float() argument").map(Value::Float),
    }
}

fn tuple(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable] = args.bind("tuple", ["iterable"], 0)?;
    match iterable {
        None => Ok(Value::tuple(vec![])),
        Some(it) => Ok(Value::tuple(interp.iterate(&it)?)),
    }
}

fn list(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable] = args.bind("list", ["iterable"], 0)?;
    match iterable {
        None => Ok(Value::list(vec![])),
        Some(it) => Ok(Value::list(interp.iterate(&it)?)),
    }
}

fn set(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [iterable] = args.bind("set", ["iterable"], 0)?;
    let mut out = Set::new();
    if let Some(it) = iterable {
        for v in interp.iterate(&it)? {
            out.add(v)?;
        }
    }
    Ok(Value::set(out))
}

fn dict(interp: &mut Interpreter<'_>, mut args: CallArgs) -> ExecResult<Value> {
    let keywords = std::mem::take(&mut args.keywords);
    let [source] = args.bind("dict", ["mapping"], 0)?;
    let mut out = Dict::new();
    match source {
        None => {}
        Some(Value::Dict(d)) => {
            for (k, v) in d.read().items() {
                out.set_item(k, v)?;
            }
        }
        Some(other) => {
            for (i, item) in interp.iterate(&other)?.into_iter().enumerate() {
                let pair = interp.iterate(&item)?;
                if pair.len() != 2 {
                    return raise(
                        ExcKind::ValueError,
                        format!(
                            "dictionary update sequence element #{} has length {}; 2 is required",
                            i,
                            pair.len()
                        ),
                    );
                }
                let mut pair = pair.into_iter();
                if let (Some(k), Some(v)) = (pair.next(), pair.next()) {
                    out.set_item(k, v)?;
                }
            }
        }
    }
    for (k, v) in keywords {
        out.set_item(Value::str(k), v)?;
    }
    Ok(Value::dict(out))
}

fn bool_(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [x] = args.bind("bool", ["x"], 0)?;
    match x {
        None => Ok(Value::Bool(false)),
        Some(v) => Ok(Value::Bool(v.truthy()?)),
    }
}

fn zip(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let columns = args
        .positional_only("zip")?
        .iter()
        .map(|it| interp.iterate(it))
        .collect::<ExecResult<Vec<_>>>()?;
    let n = columns.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..n)
        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
        .collect();
    Ok(IterState::value("zip", rows))
}

fn type_(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj] = args.bind("type", ["object"], 1)?;
    Ok(Value::Type(arg(obj).type_name()))
}

fn range(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let bounds = args
        .positional_only("range")?
        .iter()
        .map(|v| v.as_int("range() argument"))
        .collect::<ExecResult<Vec<_>>>()?;
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return raise(
                ExcKind::TypeError,
                format!("range expected 1 to 3 arguments, got {}", bounds.len()),
            )
        }
    };
    if step == 0 {
        return raise(ExcKind::ValueError, "range() arg 3 must not be zero");
    }
    let span = if step > 0 {
        (stop as i128 - start as i128 + step as i128 - 1) / step as i128
    } else {
        (start as i128 - stop as i128 - step as i128 - 1) / -(step as i128)
    };
    let len = span.max(0);
    if len > MAX_RANGE_LEN as i128 {
        return raise(
            ExcKind::ValueError,
            format!("range() is limited to {} items", MAX_RANGE_LEN),
        );
    }
    let items = (0..len as i64).map(|i| Value::Int(start + i * step)).collect();
    Ok(Value::list(items))
}

fn type_matches(obj: &Value, cls: &Value) -> ExecResult<bool> {
    let name = match cls {
        Value::Native(f) => f.name.as_str(),
        Value::Type(name) => *name,
        Value::Tuple(options) => {
            for option in options.iter() {
                if type_matches(obj, option)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        other => {
            return raise(
                ExcKind::TypeError,
                format!(
                    "isinstance() arg 2 must be a type or tuple of types, not '{}'",
                    other.type_name()
                ),
            )
        }
    };
    let actual = obj.type_name();
    Ok(actual == name || (name == "int" && actual == "bool") || (name == "date" && actual == "datetime"))
}

fn isinstance(_interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj, cls] = args.bind("isinstance", ["obj", "class_or_tuple"], 2)?;
    type_matches(&arg(obj), &arg(cls)).map(Value::Bool)
}

fn print(interp: &mut Interpreter<'_>, mut args: CallArgs) -> ExecResult<Value> {
    if args.take_keyword("file").is_some() {
        return raise(ExcKind::TypeError, "print() does not accept a file argument");
    }
    let text_arg = |v: Option<Value>, default: &str| -> ExecResult<String> {
        match v {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(v) => Ok(v.as_str("print() separator")?.to_string()),
        }
    };
    let sep = text_arg(args.take_keyword("sep"), " ")?;
    let end = text_arg(args.take_keyword("end"), "\n")?;
    let _ = args.take_keyword("flush");
    let parts = args
        .positional_only("print")?
        .iter()
        .map(Value::to_str)
        .collect::<Vec<_>>();
    let mut text = parts.join(&sep);
    if end != "\n" {
        text.push_str(&end);
    }
    interp.write_output(&text);
    Ok(Value::None)
}

fn getattr(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj, name, default] = args.bind("getattr", ["object", "name", "default"], 2)?;
    let name = arg(name).as_str("attribute name")?;
    match (interp.get_attr(&arg(obj), &name), default) {
        (Err(e), Some(d)) if e.kind == ExcKind::AttributeError => Ok(d),
        (result, _) => result,
    }
}

fn setattr(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj, name, value] = args.bind("setattr", ["object", "name", "value"], 3)?;
    let name = arg(name).as_str("attribute name")?;
    interp.set_attr(&arg(obj), &name, arg(value))?;
    Ok(Value::None)
}

fn hasattr(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj, name] = args.bind("hasattr", ["object", "name"], 2)?;
    let name = arg(name).as_str("attribute name")?;
    match interp.get_attr(&arg(obj), &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(e) if e.kind == ExcKind::AttributeError => Ok(Value::Bool(false)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FORBIDDEN_NAMES;

    #[test]
    fn fixed_capability_list() {
        let names: Vec<_> = names().collect();
        assert_eq!(names.len(), 31);
        for denied in FORBIDDEN_NAMES.iter().chain(["__import__"].iter()) {
            assert!(lookup(denied).is_none(), "{} must not be a builtin", denied);
        }
        assert!(matches!(lookup("sorted"), Some(Value::Native(_))));
    }

    #[test]
    fn int_literals() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("0xff", 16).unwrap(), 255);
        assert_eq!(parse_int("-9223372036854775808", 10).unwrap(), i64::MIN);
        assert!(parse_int("4.2", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert_eq!(
            parse_int("99999999999999999999", 10).unwrap_err().kind,
            ExcKind::OverflowError
        );
    }

    #[test]
    fn isinstance_accepts_bool_as_int() {
        let int_ty = lookup("int").unwrap();
        assert!(type_matches(&Value::Bool(true), &int_ty).unwrap());
        assert!(!type_matches(&Value::str("1"), &int_ty).unwrap());
        let options = Value::tuple(vec![lookup("str").unwrap(), int_ty]);
        assert!(type_matches(&Value::str("1"), &options).unwrap());
    }
}
