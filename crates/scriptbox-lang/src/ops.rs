//! Native operators: arithmetic, comparison, membership, subscripts and
//! iteration. The interpreter reaches subscripts and iteration through the
//! guard hooks, which forward here.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::TimeDelta;
use scriptbox_core::types::Table;

use crate::ast::{BinOp, UnaryOp};
use crate::convert;
use crate::error::{ExcKind, ExecResult, Exception};
use crate::format;
use crate::value::{Dict, Set, Value};

#[derive(Debug, Clone, Copy)]
enum Num {
    I(i64),
    F(f64),
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::I(*b as i64)),
        Value::Int(i) => Some(Num::I(*i)),
        Value::Float(f) => Some(Num::F(*f)),
        _ => None,
    }
}

impl Num {
    fn f(self) -> f64 {
        match self {
            Num::I(i) => i as f64,
            Num::F(f) => f,
        }
    }
}

fn unsupported(op: &str, a: &Value, b: &Value) -> Exception {
    Exception::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> Exception {
    Exception::overflow()
}

pub fn binary(op: BinOp, a: &Value, b: &Value) -> ExecResult<Value> {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return numeric(op, x, y, a, b);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::str(s))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.read().clone();
            items.extend(y.read().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(_) | Value::List(_) | Value::Tuple(_), Value::Int(_) | Value::Bool(_)) => {
            repeat(a, b.as_int("repeat count")?)
        }
        (BinOp::Mul, Value::Int(_) | Value::Bool(_), Value::Str(_) | Value::List(_) | Value::Tuple(_)) => {
            repeat(b, a.as_int("repeat count")?)
        }
        (BinOp::Mod, Value::Str(template), args) => Ok(Value::str(format::percent_format(template, args)?)),
        (BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Set(x), Value::Set(y)) => {
            set_op(op, &x.read(), &y.read())
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut merged = x.read().clone();
            for (k, v) in y.read().items() {
                merged.set_item(k, v)?;
            }
            Ok(Value::dict(merged))
        }
        _ => temporal(op, a, b),
    }
}

fn numeric(op: BinOp, x: Num, y: Num, a: &Value, b: &Value) -> ExecResult<Value> {
    use Num::*;
    Ok(match (op, x, y) {
        (BinOp::Add, I(x), I(y)) => Value::Int(x.checked_add(y).ok_or_else(overflow)?),
        (BinOp::Sub, I(x), I(y)) => Value::Int(x.checked_sub(y).ok_or_else(overflow)?),
        (BinOp::Mul, I(x), I(y)) => Value::Int(x.checked_mul(y).ok_or_else(overflow)?),
        (BinOp::Add, x, y) => Value::Float(x.f() + y.f()),
        (BinOp::Sub, x, y) => Value::Float(x.f() - y.f()),
        (BinOp::Mul, x, y) => Value::Float(x.f() * y.f()),
        (BinOp::Div, x, y) => {
            if y.f() == 0.0 {
                return Err(Exception::zero_division("division by zero"));
            }
            Value::Float(x.f() / y.f())
        }
        (BinOp::FloorDiv, I(x), I(y)) => {
            if y == 0 {
                return Err(Exception::zero_division("integer division or modulo by zero"));
            }
            Value::Int(floor_div(x, y)?)
        }
        (BinOp::FloorDiv, x, y) => {
            if y.f() == 0.0 {
                return Err(Exception::zero_division("float floor division by zero"));
            }
            Value::Float((x.f() / y.f()).floor())
        }
        (BinOp::Mod, I(x), I(y)) => {
            if y == 0 {
                return Err(Exception::zero_division("integer modulo by zero"));
            }
            Value::Int(floor_mod(x, y))
        }
        (BinOp::Mod, x, y) => {
            let (x, y) = (x.f(), y.f());
            if y == 0.0 {
                return Err(Exception::zero_division("float modulo"));
            }
            let r = x % y;
            Value::Float(if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r })
        }
        (BinOp::Pow, I(x), I(y)) => {
            if y >= 0 {
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                Value::Int(x.checked_pow(exp).ok_or_else(overflow)?)
            } else if x == 0 {
                return Err(Exception::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            } else {
                Value::Float((x as f64).powf(y as f64))
            }
        }
        (BinOp::Pow, x, y) => {
            let (x, y) = (x.f(), y.f());
            if x == 0.0 && y < 0.0 {
                return Err(Exception::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(Exception::value_error("math domain error"));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(Exception::new(
                    ExcKind::OverflowError,
                    "(34, 'Numerical result out of range')",
                ));
            }
            Value::Float(r)
        }
        (BinOp::BitAnd, I(x), I(y)) => int_or_bool(a, b, x & y),
        (BinOp::BitOr, I(x), I(y)) => int_or_bool(a, b, x | y),
        (BinOp::BitXor, I(x), I(y)) => int_or_bool(a, b, x ^ y),
        (BinOp::LShift, I(x), I(y)) => {
            if y < 0 {
                return Err(Exception::value_error("negative shift count"));
            }
            if x == 0 {
                Value::Int(0)
            } else {
                let shift = u32::try_from(y).map_err(|_| overflow())?;
                let r = x.checked_shl(shift).ok_or_else(overflow)?;
                if shift >= 64 || (r >> shift) != x {
                    return Err(overflow());
                }
                Value::Int(r)
            }
        }
        (BinOp::RShift, I(x), I(y)) => {
            if y < 0 {
                return Err(Exception::value_error("negative shift count"));
            }
            Value::Int(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y })
        }
        _ => return Err(unsupported(op.symbol(), a, b)),
    })
}

/// Bitwise ops on two bools stay bool.
fn int_or_bool(a: &Value, b: &Value, r: i64) -> Value {
    match (a, b) {
        (Value::Bool(_), Value::Bool(_)) => Value::Bool(r != 0),
        _ => Value::Int(r),
    }
}

fn floor_div(x: i64, y: i64) -> ExecResult<i64> {
    let q = x.checked_div(y).ok_or_else(overflow)?;
    if (x % y != 0) && ((x < 0) != (y < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(x: i64, y: i64) -> i64 {
    if y == -1 {
        return 0;
    }
    let r = x % y;
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

const MAX_REPEAT_LEN: usize = 10_000_000;

fn repeat(seq: &Value, n: i64) -> ExecResult<Value> {
    let n = n.max(0) as usize;
    let check = |len: usize| {
        if len.saturating_mul(n) > MAX_REPEAT_LEN {
            Err(Exception::new(ExcKind::OverflowError, "repeated sequence is too long"))
        } else {
            Ok(())
        }
    };
    match seq {
        Value::Str(s) => {
            check(s.len())?;
            Ok(Value::str(s.repeat(n)))
        }
        Value::List(items) => {
            let items = items.read();
            check(items.len())?;
            Ok(Value::list(
                std::iter::repeat(items.iter().cloned()).take(n).flatten().collect(),
            ))
        }
        Value::Tuple(items) => {
            check(items.len())?;
            Ok(Value::tuple(
                std::iter::repeat(items.iter().cloned()).take(n).flatten().collect(),
            ))
        }
        other => Err(Exception::type_error(format!(
            "can't multiply sequence of type '{}'",
            other.type_name()
        ))),
    }
}

fn set_op(op: BinOp, x: &Set, y: &Set) -> ExecResult<Value> {
    let mut out = Set::new();
    match op {
        BinOp::BitOr => {
            for v in x.values().chain(y.values()) {
                out.add(v.clone())?;
            }
        }
        BinOp::BitAnd => {
            for (k, v) in x.iter() {
                if y.contains_key(k) {
                    out.add(v.clone())?;
                }
            }
        }
        BinOp::Sub => {
            for (k, v) in x.iter() {
                if !y.contains_key(k) {
                    out.add(v.clone())?;
                }
            }
        }
        _ => {
            for (k, v) in x.iter() {
                if !y.contains_key(k) {
                    out.add(v.clone())?;
                }
            }
            for (k, v) in y.iter() {
                if !x.contains_key(k) {
                    out.add(v.clone())?;
                }
            }
        }
    }
    Ok(Value::set(out))
}

fn whole_days(d: &TimeDelta) -> TimeDelta {
    TimeDelta::days(d.num_seconds().div_euclid(86_400))
}

fn temporal(op: BinOp, a: &Value, b: &Value) -> ExecResult<Value> {
    let out_of_range = || Exception::new(ExcKind::OverflowError, "date value out of range");
    Ok(match (op, a, b) {
        (BinOp::Add, Value::Date(d), Value::TimeDelta(t)) | (BinOp::Add, Value::TimeDelta(t), Value::Date(d)) => {
            Value::Date(d.checked_add_signed(whole_days(t)).ok_or_else(out_of_range)?)
        }
        (BinOp::Sub, Value::Date(d), Value::TimeDelta(t)) => {
            Value::Date(d.checked_sub_signed(whole_days(t)).ok_or_else(out_of_range)?)
        }
        (BinOp::Add, Value::DateTime(d), Value::TimeDelta(t))
        | (BinOp::Add, Value::TimeDelta(t), Value::DateTime(d)) => {
            Value::DateTime(d.checked_add_signed(*t).ok_or_else(out_of_range)?)
        }
        (BinOp::Sub, Value::DateTime(d), Value::TimeDelta(t)) => {
            Value::DateTime(d.checked_sub_signed(*t).ok_or_else(out_of_range)?)
        }
        (BinOp::Sub, Value::Date(x), Value::Date(y)) => Value::TimeDelta(x.signed_duration_since(*y)),
        (BinOp::Sub, Value::DateTime(x), Value::DateTime(y)) => {
            Value::TimeDelta(x.signed_duration_since(*y))
        }
        (BinOp::Add, Value::TimeDelta(x), Value::TimeDelta(y)) => {
            Value::TimeDelta(x.checked_add(y).ok_or_else(out_of_range)?)
        }
        (BinOp::Sub, Value::TimeDelta(x), Value::TimeDelta(y)) => {
            Value::TimeDelta(x.checked_sub(y).ok_or_else(out_of_range)?)
        }
        (BinOp::Mul, Value::TimeDelta(t), n) | (BinOp::Mul, n, Value::TimeDelta(t)) if num(n).is_some() => {
            scale_delta(t, n.as_float("factor")?)?
        }
        (BinOp::Div, Value::TimeDelta(t), n) if num(n).is_some() => {
            let f = n.as_float("divisor")?;
            if f == 0.0 {
                return Err(Exception::zero_division("division by zero"));
            }
            scale_delta(t, 1.0 / f)?
        }
        (BinOp::Div, Value::TimeDelta(x), Value::TimeDelta(y)) => {
            let denom = micros(y);
            if denom == 0 {
                return Err(Exception::zero_division("division by zero"));
            }
            Value::Float(micros(x) as f64 / denom as f64)
        }
        (BinOp::FloorDiv, Value::TimeDelta(x), Value::TimeDelta(y)) => {
            let denom = micros(y);
            if denom == 0 {
                return Err(Exception::zero_division("integer division or modulo by zero"));
            }
            Value::Int(floor_div(micros(x), denom)?)
        }
        _ => return Err(unsupported(op.symbol(), a, b)),
    })
}

fn micros(d: &TimeDelta) -> i64 {
    d.num_microseconds().unwrap_or(i64::MAX)
}

fn scale_delta(t: &TimeDelta, factor: f64) -> ExecResult<Value> {
    let us = (micros(t) as f64 * factor).round();
    if !us.is_finite() || us.abs() > 9.0e18 {
        return Err(overflow());
    }
    Ok(Value::TimeDelta(TimeDelta::microseconds(us as i64)))
}

pub fn unary(op: UnaryOp, v: &Value) -> ExecResult<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(i.checked_neg().ok_or_else(overflow)?)),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::TimeDelta(t)) => Ok(Value::TimeDelta(-*t)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_) | Value::TimeDelta(_)) => Ok(v.clone()),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!(*b as i64))),
        (op, v) => Err(Exception::type_error(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Invert => "~",
                UnaryOp::Not => "not",
            },
            v.type_name()
        ))),
    }
}

/// `a == b`.
pub fn equals(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return match (x, y) {
            (Num::I(x), Num::I(y)) => x == y,
            (x, y) => x.f() == y.f(),
        };
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.read().clone(), y.read().clone());
            seq_equals(&x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_equals(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.read().clone(), y.read().clone());
            x.len() == y.len()
                && x.iter().all(|(k, (_, v))| {
                    y.get(k).is_some_and(|(_, other)| equals(v, other))
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.read(), y.read());
            x.len() == y.len() && x.iter().all(|(k, _)| y.contains_key(k))
        }
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::TimeDelta(x), Value::TimeDelta(y)) => x == y,
        (Value::Table(x), Value::Table(y)) => Arc::ptr_eq(x, y) || *x.read() == *y.read(),
        (Value::Function(x), Value::Function(y)) => Arc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Arc::ptr_eq(x, y) || x.name == y.name,
        (Value::Native(f), Value::Type(t)) | (Value::Type(t), Value::Native(f)) => f.name == *t,
        (Value::Module(x), Value::Module(y)) => Arc::ptr_eq(x, y),
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::Slice(x), Value::Slice(y)) => x == y,
        _ => false,
    }
}

fn seq_equals(x: &[Value], y: &[Value]) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| equals(a, b))
}

/// `a is b`.
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Arc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Arc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Arc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Arc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Arc::ptr_eq(x, y),
        (Value::Table(x), Value::Table(y)) => Arc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Arc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Arc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Arc::ptr_eq(x, y),
        (Value::Iterator(x), Value::Iterator(y)) => Arc::ptr_eq(x, y),
        (Value::Type(x), Value::Type(y)) => x == y,
        _ => false,
    }
}

/// Ordering for `<`, `sorted`, `min` and `max`.
pub fn compare(a: &Value, b: &Value) -> ExecResult<Ordering> {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return Ok(match (x, y) {
            (Num::I(x), Num::I(y)) => x.cmp(&y),
            (x, y) => x.f().partial_cmp(&y.f()).unwrap_or(Ordering::Equal),
        });
    }
    let ord = match (a, b) {
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::TimeDelta(x), Value::TimeDelta(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.read().clone(), y.read().clone());
            seq_compare(&x, &y)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_compare(x, y)?,
        _ => {
            return Err(Exception::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            )))
        }
    };
    Ok(ord)
}

fn seq_compare(x: &[Value], y: &[Value]) -> ExecResult<Ordering> {
    for (a, b) in x.iter().zip(y) {
        if !equals(a, b) {
            return compare(a, b);
        }
    }
    Ok(x.len().cmp(&y.len()))
}

/// Subset tests for `<=`/`<` on sets.
pub fn set_compare(a: &Value, b: &Value, strict: bool) -> Option<bool> {
    match (a, b) {
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.read(), y.read());
            let subset = x.iter().all(|(k, _)| y.contains_key(k));
            Some(subset && (!strict || x.len() < y.len()))
        }
        _ => None,
    }
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> ExecResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(Exception::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => {
            let items = items.read().clone();
            Ok(items.iter().any(|v| equals(v, item)))
        }
        Value::Tuple(items) => Ok(items.iter().any(|v| equals(v, item))),
        Value::Dict(d) => Ok(d.read().contains_key(&item.key()?)),
        Value::Set(s) => Ok(s.read().contains_key(&item.key()?)),
        Value::Table(t) => match item {
            Value::Str(name) => Ok(t.read().column_index(name).is_some()),
            _ => Ok(false),
        },
        Value::Iterator(_) => Ok(iterate(container)?.iter().any(|v| equals(v, item))),
        other => Err(Exception::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Items of an iterable, in iteration order. Iterators are drained.
pub fn iterate(v: &Value) -> ExecResult<Vec<Value>> {
    Ok(match v {
        Value::List(items) => items.read().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Str(s) => s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect(),
        Value::Dict(d) => d.read().keys(),
        Value::Set(s) => s.read().items(),
        Value::Table(t) => t.read().column_names().into_iter().map(Value::str).collect(),
        Value::Iterator(it) => it.items.lock().drain(..).collect(),
        other => {
            return Err(Exception::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    })
}

fn index_error(kind: &str) -> Exception {
    Exception::index_error(format!("{} index out of range", kind))
}

/// Resolve a possibly negative index against `len`.
pub fn normalize_index(index: i64, len: usize, kind: &str) -> ExecResult<usize> {
    let len_i = len as i64;
    let idx = if index < 0 { index + len_i } else { index };
    if idx < 0 || idx >= len_i {
        return Err(index_error(kind));
    }
    Ok(idx as usize)
}

/// Positions selected by a slice over a sequence of length `len`.
pub fn slice_indices(len: usize, spec: &[Option<i64>; 3]) -> ExecResult<Vec<usize>> {
    let len = len as i64;
    let step = spec[2].unwrap_or(1);
    if step == 0 {
        return Err(Exception::value_error("slice step cannot be zero"));
    }
    let bound = |v: Option<i64>, default: i64, lo: i64, hi: i64| match v {
        None => default,
        Some(i) => {
            let i = if i < 0 { i + len } else { i };
            i.clamp(lo, hi)
        }
    };
    let (start, stop) = if step > 0 {
        (bound(spec[0], 0, 0, len), bound(spec[1], len, 0, len))
    } else {
        (bound(spec[0], len - 1, -1, len - 1), bound(spec[1], -1, -1, len - 1))
    };
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

pub fn get_item(obj: &Value, index: &Value) -> ExecResult<Value> {
    match (obj, index) {
        (Value::List(items), Value::Slice(spec)) => {
            let items = items.read();
            let picked = slice_indices(items.len(), spec)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::Tuple(items), Value::Slice(spec)) => {
            let picked = slice_indices(items.len(), spec)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::Str(s), Value::Slice(spec)) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), spec)?;
            Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        (Value::List(items), idx) if is_index(idx) => {
            let items = items.read();
            let i = normalize_index(idx.as_int("list index")?, items.len(), "list")?;
            Ok(items[i].clone())
        }
        (Value::Tuple(items), idx) if is_index(idx) => {
            let i = normalize_index(idx.as_int("tuple index")?, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        (Value::Str(s), idx) if is_index(idx) => {
            let count = s.chars().count();
            let i = normalize_index(idx.as_int("string index")?, count, "string")?;
            Ok(Value::str(s.chars().nth(i).map(String::from).unwrap_or_default()))
        }
        (Value::List(_) | Value::Tuple(_) | Value::Str(_), idx) => Err(Exception::type_error(format!(
            "{} indices must be integers or slices, not {}",
            obj.type_name(),
            idx.type_name()
        ))),
        (Value::Dict(d), key) => d
            .read()
            .get_item(key)?
            .ok_or_else(|| Exception::key_error(key.repr())),
        (Value::Table(t), idx) => table_get(&t.read(), idx),
        (other, _) => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn is_index(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_))
}

fn table_get(table: &Table, idx: &Value) -> ExecResult<Value> {
    match idx {
        Value::Str(name) => {
            let column = table
                .column(name)
                .ok_or_else(|| Exception::key_error(format!("'{}'", name)))?;
            Ok(Value::list(column.values.iter().map(convert::scalar_to_value).collect()))
        }
        Value::List(items) => {
            let items = items.read().clone();
            if !items.is_empty() && items.iter().all(|v| matches!(v, Value::Bool(_))) {
                let mask: Vec<bool> = items.iter().map(|v| matches!(v, Value::Bool(true))).collect();
                if mask.len() != table.num_rows() {
                    return Err(Exception::value_error(format!(
                        "boolean mask has {} items, table has {} rows",
                        mask.len(),
                        table.num_rows()
                    )));
                }
                return Ok(Value::table(table.filter_rows(&mask)));
            }
            let names = items
                .iter()
                .map(|v| v.as_str("column name").map(|s| s.to_string()))
                .collect::<ExecResult<Vec<_>>>()?;
            Ok(Value::table(table.select(&names)?))
        }
        Value::Slice(spec) => {
            let rows = slice_indices(table.num_rows(), spec)?;
            Ok(Value::table(table.take_rows(&rows)))
        }
        other => Err(Exception::key_error(other.repr())),
    }
}

pub fn set_item(obj: &Value, index: Value, value: Value) -> ExecResult<()> {
    match (obj, &index) {
        (Value::List(items), Value::Slice(spec)) => {
            let replacement = iterate(&value)?;
            let mut items = items.write();
            let step = spec[2].unwrap_or(1);
            let picked = slice_indices(items.len(), spec)?;
            if step == 1 {
                let start = picked.first().copied().unwrap_or_else(|| {
                    let len = items.len() as i64;
                    spec[0].map_or(0, |s| if s < 0 { (s + len).max(0) } else { s.min(len) }) as usize
                });
                let end = start + picked.len();
                items.splice(start..end, replacement);
            } else {
                if picked.len() != replacement.len() {
                    return Err(Exception::value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        picked.len()
                    )));
                }
                for (i, v) in picked.into_iter().zip(replacement) {
                    items[i] = v;
                }
            }
            Ok(())
        }
        (Value::List(items), idx) if is_index(idx) => {
            let mut items = items.write();
            let i = normalize_index(idx.as_int("list index")?, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        (Value::List(_), idx) => Err(Exception::type_error(format!(
            "list indices must be integers or slices, not {}",
            idx.type_name()
        ))),
        (Value::Dict(d), _) => d.write().set_item(index, value),
        (Value::Table(t), Value::Str(name)) => {
            let rows = t.read().num_rows();
            let values = match &value {
                Value::List(_) | Value::Tuple(_) => iterate(&value)?,
                Value::Iterator(_) => iterate(&value)?,
                scalar => vec![scalar.clone(); rows],
            };
            let cells = values
                .iter()
                .map(convert::value_to_scalar)
                .collect::<ExecResult<Vec<_>>>()?;
            t.write().set_column(name, cells).map_err(|e| Exception::value_error(e.to_string()))
        }
        (Value::Table(_), other) => Err(Exception::type_error(format!(
            "column name must be str, not {}",
            other.type_name()
        ))),
        (other, _) => Err(Exception::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Build a dict from a key/value pair list.
pub fn dict_from_items(pairs: Vec<(Value, Value)>) -> ExecResult<Value> {
    let mut dict = Dict::new();
    for (k, v) in pairs {
        dict.set_item(k, v)?;
    }
    Ok(Value::dict(dict))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn integer_arithmetic_follows_floor_semantics() {
        assert!(matches!(binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap(), Value::Int(-4)));
        assert!(matches!(binary(BinOp::Mod, &int(-7), &int(2)).unwrap(), Value::Int(1)));
        assert!(matches!(binary(BinOp::Mod, &int(7), &int(-2)).unwrap(), Value::Int(-1)));
        assert!(matches!(binary(BinOp::Div, &int(1), &int(2)).unwrap(), Value::Float(f) if f == 0.5));
        assert!(matches!(binary(BinOp::Pow, &int(2), &int(-1)).unwrap(), Value::Float(f) if f == 0.5));
    }

    #[test]
    fn zero_division_and_overflow_are_exceptions() {
        let err = binary(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.kind, ExcKind::ZeroDivisionError);
        let err = binary(BinOp::Mul, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
        let err = binary(BinOp::LShift, &int(1), &int(64)).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
    }

    #[test]
    fn mixed_types() {
        let s = binary(BinOp::Mul, &Value::str("ab"), &int(3)).unwrap();
        assert_eq!(s.to_str(), "ababab");
        let err = binary(BinOp::Add, &Value::str("a"), &int(1)).unwrap_err();
        assert!(err.message.contains("'str' and 'int'"));
        assert!(equals(&int(1), &Value::Float(1.0)));
        assert!(equals(&Value::Bool(true), &int(1)));
        assert!(!equals(&Value::list(vec![]), &Value::tuple(vec![])));
    }

    #[test]
    fn slices_match_sequence_semantics() {
        assert_eq!(slice_indices(5, &[None, None, Some(-1)]).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, &[Some(1), Some(-1), None]).unwrap(), vec![1, 2, 3]);
        assert_eq!(slice_indices(5, &[Some(-2), None, None]).unwrap(), vec![3, 4]);
        assert!(slice_indices(5, &[None, None, Some(0)]).is_err());

        let list = Value::list((0..5).map(Value::Int).collect());
        set_item(&list, Value::Slice(Arc::new([Some(1), Some(3), None])), Value::list(vec![])).unwrap();
        assert_eq!(list.repr(), "[0, 3, 4]");
    }

    #[test]
    fn dates_and_deltas() {
        let d = Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());
        let one_day = Value::TimeDelta(TimeDelta::days(1));
        assert_eq!(binary(BinOp::Add, &d, &one_day).unwrap().to_str(), "2024-02-29");
        let diff = binary(BinOp::Sub, &binary(BinOp::Add, &d, &one_day).unwrap(), &d).unwrap();
        assert!(equals(&diff, &one_day));
    }

    #[test]
    fn membership_and_iteration() {
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::str("x"), &int(1)).is_err());
        let mut dict = Dict::new();
        dict.set_item(Value::str("a"), int(1)).unwrap();
        let dict = Value::dict(dict);
        assert!(contains(&dict, &Value::str("a")).unwrap());
        assert_eq!(iterate(&dict).unwrap().len(), 1);
        assert!(iterate(&int(3)).is_err());
    }
}
