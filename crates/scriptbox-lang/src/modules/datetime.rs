//! `datetime`: `date`, `datetime` and `timedelta` constructors.
//!
//! The constructors carry class-style attributes (`datetime.now()`,
//! `date.fromisoformat(...)`) through `NativeFunction::attrs`.

use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use scriptbox_core::serialize::{parse_date, parse_datetime};

use crate::error::{ExcKind, ExecResult};
use crate::interp::Interpreter;
use crate::methods::{build_date, build_datetime, make_timedelta};
use crate::value::{raise, CallArgs, Module, Namespace, NativeFunction, Value};

use super::{functions, NativeImpl};

pub fn module() -> Module {
    let mut ns = Namespace::new();
    ns.insert(
        "date".into(),
        class("date", date, &[("today", today), ("fromisoformat", date_fromisoformat)]),
    );
    ns.insert(
        "datetime".into(),
        class(
            "datetime",
            datetime,
            &[
                ("now", now),
                ("utcnow", utcnow),
                ("fromisoformat", datetime_fromisoformat),
                ("strptime", strptime),
                ("combine", combine),
            ],
        ),
    );
    ns.insert("timedelta".into(), NativeFunction::value("timedelta", timedelta));
    Module::new("datetime", ns)
}

fn class(name: &str, ctor: NativeImpl, attrs: &[(&str, NativeImpl)]) -> Value {
    Value::Native(Arc::new(
        NativeFunction::new(name, ctor).with_attrs(functions(attrs)),
    ))
}

fn int_arg(v: Option<Value>, what: &str, default: i64) -> ExecResult<i64> {
    match v {
        None => Ok(default),
        Some(v) => v.as_int(what),
    }
}

fn date(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [y, m, d] = args.bind("date", ["year", "month", "day"], 3)?;
    let date = build_date(
        int_arg(y, "year", 1)?,
        int_arg(m, "month", 1)?,
        int_arg(d, "day", 1)?,
    )?;
    Ok(Value::Date(date))
}

fn datetime(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [y, mo, d, h, mi, s, us] = args.bind(
        "datetime",
        ["year", "month", "day", "hour", "minute", "second", "microsecond"],
        3,
    )?;
    let dt = build_datetime(
        int_arg(y, "year", 1)?,
        int_arg(mo, "month", 1)?,
        int_arg(d, "day", 1)?,
        int_arg(h, "hour", 0)?,
        int_arg(mi, "minute", 0)?,
        int_arg(s, "second", 0)?,
        int_arg(us, "microsecond", 0)?,
    )?;
    Ok(Value::DateTime(dt))
}

fn timedelta(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [days, seconds, micros, millis, minutes, hours, weeks] = args.bind(
        "timedelta",
        ["days", "seconds", "microseconds", "milliseconds", "minutes", "hours", "weeks"],
        0,
    )?;
    let f = |v: Option<Value>, what: &str| -> ExecResult<f64> {
        v.map(|v| v.as_float(what)).transpose().map(|v| v.unwrap_or(0.0))
    };
    let days = f(days, "days")? + 7.0 * f(weeks, "weeks")?;
    let seconds = f(seconds, "seconds")? + 60.0 * f(minutes, "minutes")? + 3600.0 * f(hours, "hours")?;
    let micros = f(micros, "microseconds")? + 1000.0 * f(millis, "milliseconds")?;
    Ok(Value::TimeDelta(make_timedelta(days, seconds, micros)?))
}

fn today(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    args.bind::<0>("today", [], 0)?;
    Ok(Value::Date(Local::now().date_naive()))
}

fn now(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    args.bind::<0>("now", [], 0)?;
    Ok(Value::DateTime(Local::now().naive_local()))
}

fn utcnow(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    args.bind::<0>("utcnow", [], 0)?;
    Ok(Value::DateTime(Utc::now().naive_utc()))
}

fn text_arg(fname: &str, args: CallArgs) -> ExecResult<Arc<str>> {
    let [s] = args.bind(fname, ["date_string"], 1)?;
    s.unwrap_or(Value::None).as_str("date_string")
}

fn invalid_iso<T>(s: &str) -> ExecResult<T> {
    raise(ExcKind::ValueError, format!("Invalid isoformat string: '{}'", s))
}

fn date_fromisoformat(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let s = text_arg("fromisoformat", args)?;
    match parse_date(&s) {
        Some(d) => Ok(Value::Date(d)),
        None => invalid_iso(&s),
    }
}

fn datetime_fromisoformat(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let s = text_arg("fromisoformat", args)?;
    match parse_datetime(&s) {
        Some(dt) => Ok(Value::DateTime(dt)),
        None => invalid_iso(&s),
    }
}

/// Parse with a strftime-style format; formats without a time part yield
/// midnight.
pub fn parse_with_format(text: &str, fmt: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, fmt).ok().or_else(|| {
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN))
    })
}

fn strptime(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [text, fmt] = args.bind("strptime", ["date_string", "format"], 2)?;
    let text = text.unwrap_or(Value::None).as_str("date_string")?;
    let fmt = fmt.unwrap_or(Value::None).as_str("format")?;
    match parse_with_format(&text, &fmt) {
        Some(dt) => Ok(Value::DateTime(dt)),
        None => raise(
            ExcKind::ValueError,
            format!("time data '{}' does not match format '{}'", text, fmt),
        ),
    }
}

fn combine(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [d, t] = args.bind("combine", ["date", "time"], 1)?;
    let date = match d.unwrap_or(Value::None) {
        Value::Date(d) => d,
        Value::DateTime(dt) => dt.date(),
        other => {
            return raise(
                ExcKind::TypeError,
                format!("combine() argument 1 must be date, not {}", other.type_name()),
            )
        }
    };
    let time = match t {
        None | Some(Value::None) => NaiveTime::MIN,
        Some(Value::DateTime(dt)) => dt.time(),
        Some(other) => {
            return raise(
                ExcKind::TypeError,
                format!("combine() argument 2 must be datetime, not {}", other.type_name()),
            )
        }
    };
    Ok(Value::DateTime(date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strptime_accepts_date_only_formats() {
        let dt = parse_with_format("2024-03-05", "%Y-%m-%d").unwrap();
        assert_eq!(dt.to_string(), "2024-03-05 00:00:00");
        let dt = parse_with_format("05/03/2024 13:30", "%d/%m/%Y %H:%M").unwrap();
        assert_eq!(dt.to_string(), "2024-03-05 13:30:00");
        assert!(parse_with_format("nope", "%Y").is_none());
    }

    #[test]
    fn constructors_expose_class_attributes() {
        let m = module();
        match m.get("datetime") {
            Some(Value::Native(f)) => {
                assert!(f.attrs.contains_key("now"));
                assert!(f.attrs.contains_key("strptime"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
