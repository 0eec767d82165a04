use std::fmt::Write as _;

use serde_json::Value as Json;

use crate::convert::{json_to_value, value_to_json};
use crate::error::{ExcKind, ExecResult};
use crate::interp::Interpreter;
use crate::value::{raise, CallArgs, Module, Value};

use super::{functions, NativeImpl};

const FUNCTIONS: &[(&str, NativeImpl)] = &[("dumps", dumps), ("loads", loads)];

pub fn module() -> Module {
    Module::new("json", functions(FUNCTIONS))
}

fn dumps(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [obj, indent, sort_keys] = args.bind("dumps", ["obj", "indent", "sort_keys"], 1)?;
    let json = value_to_json(&obj.unwrap_or(Value::None))?;
    let indent = match indent {
        None | Some(Value::None) => None,
        Some(v) => Some(v.as_int("indent")?.max(0) as usize),
    };
    let sort_keys = match sort_keys {
        Some(v) => v.truthy()?,
        None => false,
    };
    let mut out = String::new();
    write_json(&mut out, &json, indent, sort_keys, 0);
    Ok(Value::str(out))
}

fn loads(_: &mut Interpreter<'_>, args: CallArgs) -> ExecResult<Value> {
    let [s] = args.bind("loads", ["s"], 1)?;
    let text = s.unwrap_or(Value::None).as_str("s")?;
    match serde_json::from_str::<Json>(&text) {
        Ok(json) => Ok(json_to_value(&json)),
        Err(e) => raise(ExcKind::ValueError, format!("invalid JSON: {}", e)),
    }
}

/// Serialize with the separators and ASCII escaping scripts expect from
/// `json.dumps`.
pub fn write_json(out: &mut String, v: &Json, indent: Option<usize>, sort_keys: bool, level: usize) {
    let newline = |out: &mut String, level: usize| {
        if let Some(width) = indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * level));
        }
    };
    let item_sep = if indent.is_some() { "," } else { ", " };
    match v {
        Json::Null => out.push_str("null"),
        Json::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Json::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Json::String(s) => write_str(out, s),
        Json::Array(items) => {
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                write_json(out, item, indent, sort_keys, level + 1);
            }
            newline(out, level);
            out.push(']');
        }
        Json::Object(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            let mut entries: Vec<(&String, &Json)> = map.iter().collect();
            if sort_keys {
                entries.sort_by(|a, b| a.0.cmp(b.0));
            }
            out.push('{');
            for (i, (k, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                write_str(out, k);
                out.push_str(": ");
                write_json(out, item, indent, sort_keys, level + 1);
            }
            newline(out, level);
            out.push('}');
        }
    }
}

fn write_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7f => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(v: &Json, indent: Option<usize>, sort: bool) -> String {
        let mut out = String::new();
        write_json(&mut out, v, indent, sort, 0);
        out
    }

    #[test]
    fn compact_output_uses_spaced_separators() {
        let v = serde_json::json!({"b": [1, 2.5, null], "a": "é"});
        assert_eq!(dump(&v, None, false), r#"{"b": [1, 2.5, null], "a": "\u00e9"}"#);
        assert_eq!(dump(&v, None, true), r#"{"a": "\u00e9", "b": [1, 2.5, null]}"#);
    }

    #[test]
    fn indented_output() {
        let v = serde_json::json!({"a": [1], "b": {}});
        assert_eq!(dump(&v, Some(2), false), "{\n  \"a\": [\n    1\n  ],\n  \"b\": {}\n}");
    }
}
