//! String formatting: format specs (`f"{x:>8.2f}"`, `format(x, spec)`),
//! `str.format` templates and `%` interpolation.

use std::fmt::Write as _;

use chrono::{NaiveDate, NaiveDateTime};
use scriptbox_core::types::format_float;

use crate::error::{ExecResult, Exception};
use crate::ops;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

fn invalid_spec(spec: &str) -> Exception {
    Exception::value_error(format!("Invalid format specifier '{}'", spec))
}

fn is_align(c: char) -> bool {
    matches!(c, '<' | '>' | '^' | '=')
}

impl Spec {
    /// `[[fill]align][sign][#][0][width][,|_][.precision][type]`
    fn parse(text: &str) -> ExecResult<Spec> {
        let chars: Vec<char> = text.chars().collect();
        let mut spec = Spec::default();
        let mut i = 0;

        if chars.len() >= 2 && is_align(chars[1]) {
            spec.fill = chars[0];
            spec.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && is_align(chars[0]) {
            spec.align = Some(chars[0]);
            i = 1;
        }
        if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
            spec.sign = chars[i];
            i += 1;
        }
        if i < chars.len() && chars[i] == '#' {
            spec.alternate = true;
            i += 1;
        }
        if i < chars.len() && chars[i] == '0' {
            spec.zero = true;
            i += 1;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            spec.width = digits(&chars[start..i]).ok_or_else(|| invalid_spec(text))?;
        }
        if i < chars.len() && matches!(chars[i], ',' | '_') {
            spec.grouping = Some(chars[i]);
            i += 1;
        }
        if i < chars.len() && chars[i] == '.' {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i == start {
                return Err(Exception::value_error("Format specifier missing precision"));
            }
            spec.precision = Some(digits(&chars[start..i]).ok_or_else(|| invalid_spec(text))?);
        }
        if i < chars.len() {
            spec.kind = Some(chars[i]);
            i += 1;
        }
        if i != chars.len() {
            return Err(invalid_spec(text));
        }
        Ok(spec)
    }
}

fn digits(chars: &[char]) -> Option<usize> {
    chars.iter().collect::<String>().parse().ok()
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> ExecResult<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    match value {
        Value::Date(d) => return strftime_date(d, spec),
        Value::DateTime(dt) => return strftime(dt, spec),
        _ => {}
    }
    let parsed = Spec::parse(spec)?;
    match value {
        Value::Int(i) => format_int(*i, &parsed),
        Value::Bool(b) => format_int(*b as i64, &parsed),
        Value::Float(f) => format_float_spec(*f, &parsed),
        Value::Str(s) => format_str(s, &parsed),
        other => Err(Exception::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

pub fn strftime(dt: &NaiveDateTime, fmt: &str) -> ExecResult<String> {
    let mut out = String::new();
    write!(out, "{}", dt.format(fmt))
        .map_err(|_| Exception::value_error(format!("invalid format string '{}'", fmt)))?;
    Ok(out)
}

pub fn strftime_date(d: &NaiveDate, fmt: &str) -> ExecResult<String> {
    let mut out = String::new();
    write!(out, "{}", d.format(fmt))
        .map_err(|_| Exception::value_error(format!("invalid format string '{}'", fmt)))?;
    Ok(out)
}

fn pad(sign: &str, body: &str, spec: &Spec, default_align: char) -> String {
    let (fill, align) = match (spec.align, spec.zero) {
        (Some(a), _) => (spec.fill, a),
        (None, true) if default_align == '>' => ('0', '='),
        (None, true) => ('0', default_align),
        (None, false) => (spec.fill, default_align),
    };
    let len = sign.chars().count() + body.chars().count();
    if spec.width <= len {
        return format!("{}{}", sign, body);
    }
    let n = spec.width - len;
    let fills = |k: usize| std::iter::repeat(fill).take(k).collect::<String>();
    match align {
        '<' => format!("{}{}{}", sign, body, fills(n)),
        '^' => format!("{}{}{}{}", fills(n / 2), sign, body, fills(n - n / 2)),
        '=' => format!("{}{}{}", sign, fills(n), body),
        _ => format!("{}{}{}", fills(n), sign, body),
    }
}

fn sign_prefix(negative: bool, spec: &Spec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

/// Apply grouping to the integer part of a fixed-point rendering.
fn group_fixed(text: &str, sep: Option<char>) -> String {
    match sep {
        None => text.to_string(),
        Some(sep) => {
            let (int_part, rest) = match text.find(|c: char| !c.is_ascii_digit()) {
                Some(idx) => text.split_at(idx),
                None => (text, ""),
            };
            format!("{}{}", group_digits(int_part, sep, 3), rest)
        }
    }
}

fn format_int(i: i64, spec: &Spec) -> ExecResult<String> {
    let kind = spec.kind.unwrap_or('d');
    if matches!(kind, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float_spec(i as f64, spec);
    }
    if spec.precision.is_some() {
        return Err(Exception::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    let magnitude = i.unsigned_abs();
    let (prefix, body) = match kind {
        'd' | 'n' => ("", group_digits(&magnitude.to_string(), spec.grouping.unwrap_or(','), 3)),
        'x' => ("0x", format!("{:x}", magnitude)),
        'X' => ("0X", format!("{:X}", magnitude)),
        'o' => ("0o", format!("{:o}", magnitude)),
        'b' => ("0b", format!("{:b}", magnitude)),
        'c' => {
            let c = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| Exception::new(crate::error::ExcKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(pad("", &c.to_string(), spec, '<'));
        }
        other => {
            return Err(Exception::value_error(format!(
                "Unknown format code '{}' for object of type 'int'",
                other
            )))
        }
    };
    let body = match (kind, spec.grouping) {
        ('d' | 'n', None) => magnitude.to_string(),
        ('d' | 'n', Some(_)) => body,
        (_, Some(sep)) => group_digits(&body, sep, 4),
        (_, None) => body,
    };
    let sign = sign_prefix(i < 0, spec);
    let sign = if spec.alternate {
        format!("{}{}", sign, prefix)
    } else {
        sign.to_string()
    };
    Ok(pad(&sign, &body, spec, '>'))
}

fn format_float_spec(x: f64, spec: &Spec) -> ExecResult<String> {
    let negative = x.is_sign_negative() && !x.is_nan();
    let sign = sign_prefix(negative, spec);
    let a = x.abs();
    let kind = spec.kind;
    let upper = matches!(kind, Some('E' | 'F' | 'G'));

    let body = if !a.is_finite() {
        let text = if a.is_nan() { "nan" } else { "inf" };
        let text = if upper { text.to_uppercase() } else { text.to_string() };
        if kind == Some('%') {
            format!("{}%", text)
        } else {
            text
        }
    } else {
        match kind {
            Some('f' | 'F') => group_fixed(&format!("{:.*}", spec.precision.unwrap_or(6), a), spec.grouping),
            Some('e' | 'E') => exponent(a, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G') => general(a, spec.precision.unwrap_or(6), upper, spec.alternate),
            Some('%') => format!(
                "{}%",
                group_fixed(&format!("{:.*}", spec.precision.unwrap_or(6), a * 100.0), spec.grouping)
            ),
            Some('n') => general(a, spec.precision.unwrap_or(6), false, spec.alternate),
            None => match spec.precision {
                Some(p) => {
                    let text = general(a, p, false, spec.alternate);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        format!("{}.0", text)
                    }
                }
                None => {
                    let text = format_float(a);
                    if text.contains('e') {
                        text
                    } else {
                        group_fixed(&text, spec.grouping)
                    }
                }
            },
            Some(other) => {
                return Err(Exception::value_error(format!(
                    "Unknown format code '{}' for object of type 'float'",
                    other
                )))
            }
        }
    };
    Ok(pad(sign, &body, spec, '>'))
}

fn split_exponent(text: &str) -> (String, i32) {
    match text.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (text.to_string(), 0),
    }
}

fn exponent_suffix(exp: i32, upper: bool) -> String {
    format!(
        "{}{}{:02}",
        if upper { 'E' } else { 'e' },
        if exp < 0 { '-' } else { '+' },
        exp.abs()
    )
}

fn exponent(a: f64, precision: usize, upper: bool) -> String {
    let (mantissa, exp) = split_exponent(&format!("{:.*e}", precision, a));
    format!("{}{}", mantissa, exponent_suffix(exp, upper))
}

fn strip_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn general(a: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let p = precision.max(1);
    let exp = if a == 0.0 {
        0
    } else {
        split_exponent(&format!("{:.*e}", p - 1, a)).1
    };
    if exp >= -4 && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let text = format!("{:.*}", decimals, a);
        if alternate {
            text
        } else {
            strip_zeros(&text)
        }
    } else {
        let (mantissa, exp) = split_exponent(&format!("{:.*e}", p - 1, a));
        let mantissa = if alternate { mantissa } else { strip_zeros(&mantissa) };
        format!("{}{}", mantissa, exponent_suffix(exp, upper))
    }
}

fn format_str(s: &str, spec: &Spec) -> ExecResult<String> {
    match spec.kind {
        None | Some('s') => {}
        Some(other) => {
            return Err(Exception::value_error(format!(
                "Unknown format code '{}' for object of type 'str'",
                other
            )))
        }
    }
    if spec.sign != '-' {
        return Err(Exception::value_error("Sign not allowed in string format specifier"));
    }
    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad("", &body, spec, '<'))
}

fn convert(value: &Value, conversion: Option<char>) -> ExecResult<Value> {
    Ok(match conversion {
        None => value.clone(),
        Some('s') => Value::str(value.to_str()),
        Some('r') | Some('a') => Value::str(value.repr()),
        Some(other) => {
            return Err(Exception::value_error(format!(
                "Unknown conversion specifier {}",
                other
            )))
        }
    })
}

/// Render one replacement field of an f-string.
pub fn format_field(value: &Value, conversion: Option<char>, spec: &str) -> ExecResult<String> {
    format_value(&convert(value, conversion)?, spec)
}

/// `template.format(*args, **kwargs)`.
pub fn str_format(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> ExecResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    let mut manual = false;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(Exception::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => {
                            return Err(Exception::value_error(
                                "nested replacement fields are not supported",
                            ))
                        }
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(Exception::value_error(
                                "Single '{' encountered in format string",
                            ))
                        }
                    }
                }
                let (head, spec) = match field.find(':') {
                    Some(idx) => (&field[..idx], &field[idx + 1..]),
                    None => (field.as_str(), ""),
                };
                let (name, conversion) = match head.find('!') {
                    Some(idx) => (&head[..idx], head[idx + 1..].chars().next()),
                    None => (head, None),
                };
                let value = lookup_field(name, args, kwargs, &mut auto_index, &mut manual)?;
                out.push_str(&format_field(&value, conversion, spec)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn lookup_field(
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    auto_index: &mut usize,
    manual: &mut bool,
) -> ExecResult<Value> {
    let (base, mut rest) = match name.find(['[', '.']) {
        Some(idx) => (&name[..idx], &name[idx..]),
        None => (name, ""),
    };
    let mut value = if base.is_empty() {
        if *manual {
            return Err(Exception::value_error(
                "cannot switch from manual field specification to automatic field numbering",
            ));
        }
        let v = args.get(*auto_index).cloned().ok_or_else(|| {
            Exception::index_error(format!(
                "Replacement index {} out of range for positional args tuple",
                auto_index
            ))
        })?;
        *auto_index += 1;
        v
    } else if let Ok(idx) = base.parse::<usize>() {
        *manual = true;
        args.get(idx).cloned().ok_or_else(|| {
            Exception::index_error(format!(
                "Replacement index {} out of range for positional args tuple",
                idx
            ))
        })?
    } else {
        kwargs
            .iter()
            .find(|(k, _)| k == base)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Exception::key_error(format!("'{}'", base)))?
    };

    while !rest.is_empty() {
        if rest.starts_with('.') {
            return Err(Exception::value_error(
                "attribute lookup in format fields is not supported",
            ));
        }
        let close = rest
            .find(']')
            .ok_or_else(|| Exception::value_error("Missing ']' in format string"))?;
        let key = &rest[1..close];
        let index = match key.parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::str(key),
        };
        value = ops::get_item(&value, &index)?;
        rest = &rest[close + 1..];
    }
    Ok(value)
}

/// `template % args`.
pub fn percent_format(template: &str, args: &Value) -> ExecResult<String> {
    let (positional, mapping): (Vec<Value>, Option<&Value>) = match args {
        Value::Tuple(items) => (items.to_vec(), None),
        Value::Dict(_) => (Vec::new(), Some(args)),
        other => (vec![other.clone()], None),
    };
    let mut next = 0usize;
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut key: Option<String> = None;
        if chars.get(i) == Some(&'(') {
            let end = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .ok_or_else(|| Exception::value_error("incomplete format key"))?;
            key = Some(chars[i + 1..i + end].iter().collect());
            i += end + 1;
        }
        let mut spec = Spec::default();
        while let Some(&c) = chars.get(i) {
            match c {
                '-' => spec.align = Some('<'),
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                ' ' => {}
                '0' => spec.zero = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            spec.width = digits(&chars[start..i]).unwrap_or(0);
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            spec.precision = Some(digits(&chars[start..i]).unwrap_or(0));
        }
        while chars.get(i).is_some_and(|c| matches!(c, 'h' | 'l' | 'L')) {
            i += 1;
        }
        let conv = *chars
            .get(i)
            .ok_or_else(|| Exception::value_error("incomplete format"))?;
        i += 1;
        if conv == '%' {
            out.push('%');
            continue;
        }
        if spec.align == Some('<') {
            spec.zero = false;
        }

        let value = match (&key, mapping) {
            (Some(k), Some(Value::Dict(d))) => d
                .read()
                .get_item(&Value::str(k))?
                .ok_or_else(|| Exception::key_error(format!("'{}'", k)))?,
            (Some(_), _) => return Err(Exception::type_error("format requires a mapping")),
            (None, Some(m)) if next == 0 => {
                next += 1;
                m.clone()
            }
            (None, _) => {
                let v = positional.get(next).cloned().ok_or_else(|| {
                    Exception::type_error("not enough arguments for format string")
                })?;
                next += 1;
                v
            }
        };

        let rendered = match conv {
            's' => format_str(&value.to_str(), &Spec { kind: None, sign: '-', ..spec })?,
            'r' | 'a' => format_str(&value.repr(), &Spec { kind: None, sign: '-', ..spec })?,
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) if f.is_finite() => f.trunc() as i64,
                    other => other.as_int("%d format: a real number is required")?,
                };
                let digits = spec.precision;
                let mut s = format_int(n, &Spec { kind: Some('d'), precision: None, ..spec })?;
                if let Some(p) = digits {
                    let body = n.unsigned_abs().to_string();
                    if body.len() < p {
                        s = s.replacen(&body, &format!("{:0>width$}", body, width = p), 1);
                    }
                }
                s
            }
            'x' | 'X' | 'o' => {
                let n = value.as_int("%x format: an integer is required")?;
                format_int(n, &Spec { kind: Some(conv), precision: None, ..spec })?
            }
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                let x = value.as_float("must be real number")?;
                format_float_spec(
                    x,
                    &Spec {
                        kind: Some(conv),
                        precision: Some(spec.precision.unwrap_or(6)),
                        ..spec
                    },
                )?
            }
            'c' => match &value {
                Value::Str(s) if s.chars().count() == 1 => format_str(s, &spec)?,
                other => format_int(other.as_int("%c requires int or char")?, &Spec { kind: Some('c'), ..spec })?,
            },
            other => {
                return Err(Exception::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&rendered);
    }

    if mapping.is_none() && next < positional.len() {
        return Err(Exception::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(v: Value, spec: &str) -> String {
        format_value(&v, spec).unwrap()
    }

    #[test]
    fn numeric_specs() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(1234.5), ",.1f"), "1,234.5");
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(-42), "+06d"), "-00042");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Float(0.25), ".1%"), "25.0%");
        assert_eq!(fmt(Value::Float(12345.678), ".2e"), "1.23e+04");
        assert_eq!(fmt(Value::Float(0.0001234), "g"), "0.0001234");
        assert_eq!(fmt(Value::Float(1234567.0), "g"), "1.23457e+06");
        assert_eq!(fmt(Value::Float(2.0), ".3"), "2.0");
    }

    #[test]
    fn alignment_and_strings() {
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::str("abcdef"), ".3"), "abc");
        assert_eq!(fmt(Value::Int(7), "<3"), "7  ");
        assert!(format_value(&Value::None, ">4").is_err());
    }

    #[test]
    fn dates_use_strftime() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(fmt(Value::Date(d), "%d/%m/%Y"), "09/03/2024");
    }

    #[test]
    fn format_templates() {
        let out = str_format(
            "{} + {} = {total:.1f} {{ok}}",
            &[Value::Int(1), Value::Int(2)],
            &[("total".into(), Value::Float(3.0))],
        )
        .unwrap();
        assert_eq!(out, "1 + 2 = 3.0 {ok}");
        let out = str_format("{0[1]}", &[Value::list(vec![Value::Int(5), Value::Int(6)])], &[]).unwrap();
        assert_eq!(out, "6");
    }

    #[test]
    fn percent_interpolation() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(2.5)]);
        assert_eq!(percent_format("%s=%03d (%.2f)", &args).unwrap(), "x=003 (2.50)");
        assert_eq!(percent_format("100%%", &Value::tuple(vec![])).unwrap(), "100%");
        assert!(percent_format("%s %s", &Value::Int(1)).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }
}
