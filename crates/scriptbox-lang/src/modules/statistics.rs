use crate::error::{ExcKind, ExecResult};
use crate::interp::Interpreter;
use crate::methods;
use crate::ops;
use crate::value::{raise, CallArgs, Module, Set, Value};

use super::{functions, NativeImpl};

const FUNCTIONS: &[(&str, NativeImpl)] = &[
    ("mean", mean),
    ("fmean", fmean),
    ("median", median),
    ("mode", mode),
    ("variance", variance),
    ("pvariance", pvariance),
    ("stdev", stdev),
    ("pstdev", pstdev),
];

pub fn module() -> Module {
    Module::new("statistics", functions(FUNCTIONS))
}

fn data(interp: &mut Interpreter<'_>, fname: &str, args: CallArgs) -> ExecResult<Vec<Value>> {
    let [items] = args.bind(fname, ["data"], 1)?;
    interp.iterate(&items.unwrap_or(Value::None))
}

fn floats(values: &[Value]) -> ExecResult<Vec<f64>> {
    values.iter().map(|v| v.as_float("data point")).collect()
}

fn require(values: &[f64], min: usize, what: &str) -> ExecResult<()> {
    if values.len() < min {
        let noun = if min == 1 {
            "at least one data point"
        } else {
            "at least two data points"
        };
        return raise(ExcKind::ValueError, format!("{} requires {}", what, noun));
    }
    Ok(())
}

fn arithmetic_mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Mean of all-integer data stays an integer when it divides exactly.
fn mean(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let values = data(interp, "mean", args)?;
    let xs = floats(&values)?;
    require(&xs, 1, "mean")?;
    let all_ints = values.iter().all(|v| matches!(v, Value::Int(_) | Value::Bool(_)));
    if all_ints {
        let total: i128 = values
            .iter()
            .map(|v| v.as_int("data point").map(i128::from))
            .sum::<ExecResult<i128>>()?;
        let n = values.len() as i128;
        if total % n == 0 {
            if let Ok(exact) = i64::try_from(total / n) {
                return Ok(Value::Int(exact));
            }
        }
    }
    Ok(Value::Float(arithmetic_mean(&xs)))
}

fn fmean(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let xs = floats(&data(interp, "fmean", args)?)?;
    require(&xs, 1, "fmean")?;
    Ok(Value::Float(arithmetic_mean(&xs)))
}

fn median(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let values = data(interp, "median", args)?;
    if values.is_empty() {
        return raise(ExcKind::ValueError, "no median for empty data");
    }
    let sorted = methods::sort_values(interp, values, None, false)?;
    let n = sorted.len();
    if n % 2 == 1 {
        return Ok(sorted[n / 2].clone());
    }
    let lo = sorted[n / 2 - 1].as_float("data point")?;
    let hi = sorted[n / 2].as_float("data point")?;
    Ok(Value::Float((lo + hi) / 2.0))
}

fn mode(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let values = data(interp, "mode", args)?;
    let mut seen = Set::new();
    let mut counts: Vec<(Value, usize)> = Vec::new();
    for v in values {
        let key = v.key()?;
        if seen.contains_key(&key) {
            if let Some(entry) = counts.iter_mut().find(|(c, _)| ops::equals(c, &v)) {
                entry.1 += 1;
            }
        } else {
            seen.insert(key, v.clone());
            counts.push((v, 1));
        }
    }
    let mut best: Option<(Value, usize)> = None;
    for (v, n) in counts {
        if best.as_ref().map_or(true, |(_, m)| n > *m) {
            best = Some((v, n));
        }
    }
    match best {
        Some((v, _)) => Ok(v),
        None => raise(ExcKind::ValueError, "no mode for empty data"),
    }
}

fn sum_sq_dev(xs: &[f64]) -> f64 {
    let m = arithmetic_mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum()
}

fn variance(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let xs = floats(&data(interp, "variance", args)?)?;
    require(&xs, 2, "variance")?;
    Ok(Value::Float(sum_sq_dev(&xs) / (xs.len() - 1) as f64))
}

fn pvariance(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let xs = floats(&data(interp, "pvariance", args)?)?;
    require(&xs, 1, "pvariance")?;
    Ok(Value::Float(sum_sq_dev(&xs) / xs.len() as f64))
}

fn stdev(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let xs = floats(&data(interp, "stdev", args)?)?;
    require(&xs, 2, "stdev")?;
    Ok(Value::Float((sum_sq_dev(&xs) / (xs.len() - 1) as f64).sqrt()))
}

fn pstdev(interp: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let xs = floats(&data(interp, "pstdev", args)?)?;
    require(&xs, 1, "pstdev")?;
    Ok(Value::Float((sum_sq_dev(&xs) / xs.len() as f64).sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispersion_helpers() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(arithmetic_mean(&xs), 5.0);
        assert_eq!(sum_sq_dev(&xs) / xs.len() as f64, 4.0);
        assert!(require(&[1.0], 2, "variance").is_err());
        assert!(require(&[], 1, "mean").is_err());
    }
}
