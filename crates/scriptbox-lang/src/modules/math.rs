use crate::builtins::float_to_int;
use crate::error::{ExcKind, ExecResult, Exception};
use crate::interp::Interpreter;
use crate::value::{raise, CallArgs, Module, Value};

use super::{functions, NativeImpl};

const FUNCTIONS: &[(&str, NativeImpl)] = &[
    ("sqrt", sqrt),
    ("exp", exp),
    ("log", log),
    ("log10", log10),
    ("log2", log2),
    ("pow", pow),
    ("floor", floor),
    ("ceil", ceil),
    ("trunc", trunc),
    ("fabs", fabs),
    ("sin", sin),
    ("cos", cos),
    ("tan", tan),
    ("asin", asin),
    ("acos", acos),
    ("atan", atan),
    ("atan2", atan2),
    ("hypot", hypot),
    ("degrees", degrees),
    ("radians", radians),
    ("copysign", copysign),
    ("isnan", isnan),
    ("isinf", isinf),
    ("isfinite", isfinite),
    ("isclose", isclose),
    ("fsum", fsum),
    ("prod", prod),
    ("gcd", gcd),
    ("factorial", factorial),
];

pub fn module() -> Module {
    let mut ns = functions(FUNCTIONS);
    ns.insert("pi".into(), Value::Float(std::f64::consts::PI));
    ns.insert("e".into(), Value::Float(std::f64::consts::E));
    ns.insert("tau".into(), Value::Float(std::f64::consts::TAU));
    ns.insert("inf".into(), Value::Float(f64::INFINITY));
    ns.insert("nan".into(), Value::Float(f64::NAN));
    Module::new("math", ns)
}

fn domain_error<T>() -> ExecResult<T> {
    raise(ExcKind::ValueError, "math domain error")
}

fn one(fname: &str, args: CallArgs) -> ExecResult<f64> {
    let [x] = args.bind(fname, ["x"], 1)?;
    x.unwrap_or(Value::None).as_float("x")
}

fn two(fname: &str, args: CallArgs) -> ExecResult<(f64, f64)> {
    let [x, y] = args.bind(fname, ["x", "y"], 2)?;
    Ok((
        x.unwrap_or(Value::None).as_float("x")?,
        y.unwrap_or(Value::None).as_float("y")?,
    ))
}

fn checked(v: f64) -> ExecResult<Value> {
    if v.is_infinite() {
        return raise(ExcKind::OverflowError, "math range error");
    }
    Ok(Value::Float(v))
}

fn sqrt(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let x = one("sqrt", args)?;
    if x < 0.0 {
        return domain_error();
    }
    Ok(Value::Float(x.sqrt()))
}

fn exp(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let x = one("exp", args)?;
    if x.is_infinite() {
        return Ok(Value::Float(x.exp()));
    }
    checked(x.exp())
}

fn ln_checked(x: f64) -> ExecResult<f64> {
    if x <= 0.0 || x.is_nan() {
        return domain_error();
    }
    Ok(x.ln())
}

fn log(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [x, base] = args.bind("log", ["x", "base"], 1)?;
    let x = ln_checked(x.unwrap_or(Value::None).as_float("x")?)?;
    match base {
        None => Ok(Value::Float(x)),
        Some(b) => {
            let b = ln_checked(b.as_float("base")?)?;
            if b == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float division by zero");
            }
            Ok(Value::Float(x / b))
        }
    }
}

fn log10(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let x = one("log10", args)?;
    ln_checked(x)?;
    Ok(Value::Float(x.log10()))
}

fn log2(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let x = one("log2", args)?;
    ln_checked(x)?;
    Ok(Value::Float(x.log2()))
}

fn pow(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let (x, y) = two("pow", args)?;
    if x == 0.0 && y < 0.0 {
        return domain_error();
    }
    if x < 0.0 && y.fract() != 0.0 {
        return domain_error();
    }
    checked(x.powf(y))
}

fn integral(fname: &str, args: CallArgs, op: fn(f64) -> f64) -> ExecResult<Value> {
    let [x] = args.bind(fname, ["x"], 1)?;
    match x.unwrap_or(Value::None) {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        other => float_to_int(op(other.as_float("x")?)).map(Value::Int),
    }
}

fn floor(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    integral("floor", args, f64::floor)
}

fn ceil(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    integral("ceil", args, f64::ceil)
}

fn trunc(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    integral("trunc", args, f64::trunc)
}

fn fabs(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Float(one("fabs", args)?.abs()))
}

fn sin(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Float(one("sin", args)?.sin()))
}

fn cos(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Float(one("cos", args)?.cos()))
}

fn tan(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Float(one("tan", args)?.tan()))
}

fn asin(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let x = one("asin", args)?;
    if !(-1.0..=1.0).contains(&x) {
        return domain_error();
    }
    Ok(Value::Float(x.asin()))
}

fn acos(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let x = one("acos", args)?;
    if !(-1.0..=1.0).contains(&x) {
        return domain_error();
    }
    Ok(Value::Float(x.acos()))
}

fn atan(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Float(one("atan", args)?.atan()))
}

fn atan2(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let (y, x) = two("atan2", args)?;
    Ok(Value::Float(y.atan2(x)))
}

fn hypot(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let coords = args
        .positional_only("hypot")?
        .iter()
        .map(|v| v.as_float("coordinate"))
        .collect::<ExecResult<Vec<_>>>()?;
    Ok(Value::Float(coords.iter().map(|c| c * c).sum::<f64>().sqrt()))
}

fn degrees(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Float(one("degrees", args)?.to_degrees()))
}

fn radians(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Float(one("radians", args)?.to_radians()))
}

fn copysign(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let (x, y) = two("copysign", args)?;
    Ok(Value::Float(x.copysign(y)))
}

fn isnan(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Bool(one("isnan", args)?.is_nan()))
}

fn isinf(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Bool(one("isinf", args)?.is_infinite()))
}

fn isfinite(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    Ok(Value::Bool(one("isfinite", args)?.is_finite()))
}

fn isclose(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [a, b, rel_tol, abs_tol] = args.bind("isclose", ["a", "b", "rel_tol", "abs_tol"], 2)?;
    let a = a.unwrap_or(Value::None).as_float("a")?;
    let b = b.unwrap_or(Value::None).as_float("b")?;
    let rel = rel_tol.map(|v| v.as_float("rel_tol")).transpose()?.unwrap_or(1e-9);
    let abs = abs_tol.map(|v| v.as_float("abs_tol")).transpose()?.unwrap_or(0.0);
    if rel < 0.0 || abs < 0.0 {
        return raise(ExcKind::ValueError, "tolerances must be non-negative");
    }
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    Ok(Value::Bool(
        diff <= (rel * b.abs()).max(rel * a.abs()) || diff <= abs,
    ))
}

fn numbers(interp: &mut Interpreter<'_>, fname: &str, args: CallArgs) -> ExecResult<Vec<Value>> {
    let [iterable] = args.bind(fname, ["iterable"], 1)?;
    interp.iterate(&iterable.unwrap_or(Value::None))
}

fn fsum(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    // Neumaier compensated summation.
    let mut sum = 0.0f64;
    let mut comp = 0.0f64;
    for v in numbers(interp, "fsum", args)? {
        let x = v.as_float("fsum() item")?;
        let t = sum + x;
        if sum.abs() >= x.abs() {
            comp += (sum - t) + x;
        } else {
            comp += (x - t) + sum;
        }
        sum = t;
    }
    Ok(Value::Float(sum + comp))
}

fn prod(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let mut acc = Value::Int(1);
    for v in numbers(interp, "prod", args)? {
        acc = crate::ops::binary(crate::ast::BinOp::Mul, &acc, &v)?;
    }
    Ok(acc)
}

fn gcd(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let mut acc: u64 = 0;
    for v in args.positional_only("gcd")? {
        let mut b = v.as_int("gcd() argument")?.unsigned_abs();
        let mut a = acc;
        while b != 0 {
            (a, b) = (b, a % b);
        }
        acc = a;
    }
    i64::try_from(acc).map(Value::Int).map_err(|_| Exception::overflow())
}

fn factorial(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [n] = args.bind("factorial", ["n"], 1)?;
    let n = n.unwrap_or(Value::None).as_int("n")?;
    if n < 0 {
        return raise(
            ExcKind::ValueError,
            "factorial() not defined for negative values",
        );
    }
    let mut acc: i64 = 1;
    for k in 2..=n {
        acc = acc.checked_mul(k).ok_or_else(Exception::overflow)?;
    }
    Ok(Value::Int(acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_exposes_constants_and_functions() {
        let m = module();
        assert!(matches!(m.get("pi"), Some(Value::Float(p)) if (p - 3.14159).abs() < 1e-4));
        for name in ["sqrt", "floor", "log", "isclose"] {
            assert!(matches!(m.get(name), Some(Value::Native(_))), "{}", name);
        }
    }

    #[test]
    fn domain_checks() {
        assert!(ln_checked(0.0).is_err());
        assert!(ln_checked(-1.0).is_err());
        assert!((ln_checked(std::f64::consts::E).unwrap() - 1.0).abs() < 1e-12);
    }
}
