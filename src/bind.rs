//! Client-side parameter binding.
//!
//! Arguments are substituted into the query text as SQL literals before it is sent. Two
//! placeholder styles exist and a query uses exactly one of them:
//!
//! - numeric: `$1`, `$2`, ... bound from positional arguments, 1-based
//! - named: `@name` bound from arguments created with [`named`]
//!
//! Mixing styles, either in the query text or in the argument list, is rejected before anything
//! touches the connection.
use std::{collections::HashMap, fmt::Write as _, sync::LazyLock};

use chrono::Timelike;
use regex::{Captures, Regex};

use crate::{
    error::{Error, Result},
    value::Value,
};

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([0-9]+)").expect("numeric placeholder pattern"));
static NAMED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([a-zA-Z0-9_]+)").expect("named placeholder pattern"));

/// A bind argument; positional unless it carries a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Value,
}

impl<T: Into<Value>> From<T> for Arg {
    fn from(value: T) -> Self {
        Arg {
            name: None,
            value: value.into(),
        }
    }
}

pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Arg {
    Arg {
        name: Some(name.into()),
        value: value.into(),
    }
}

pub fn bind(query: &str, args: &[Arg]) -> Result<String> {
    if args.is_empty() {
        return Ok(query.to_string());
    }

    let has_named = args.iter().any(|a| a.name.is_some());
    let has_positional = args.iter().any(|a| a.name.is_none());
    if has_named && has_positional {
        return Err(Error::MixedBindStyles);
    }
    let numeric_params = NUMERIC.is_match(query);
    let named_params = NAMED.is_match(query);
    if (numeric_params && named_params)
        || (has_named && numeric_params)
        || (has_positional && named_params)
    {
        return Err(Error::MixedBindStyles);
    }

    if has_named {
        bind_named(query, args)
    } else {
        bind_numeric(query, args)
    }
}

fn bind_numeric(query: &str, args: &[Arg]) -> Result<String> {
    let mut missing = None;
    let mut highest = 0;
    let bound = NUMERIC.replace_all(query, |caps: &Captures| {
        let index = caps[1].parse::<usize>().unwrap_or(0);
        highest = highest.max(index);
        match index.checked_sub(1).and_then(|i| args.get(i)) {
            Some(arg) => literal(&arg.value),
            None => {
                missing.get_or_insert_with(|| caps[0].to_string());
                String::new()
            }
        }
    });
    if let Some(param) = missing {
        return Err(Error::MissingBindArg(param));
    }
    if highest != args.len() {
        return Err(Error::BindArgCount {
            expected: highest,
            got: args.len(),
        });
    }
    Ok(bound.into_owned())
}

fn bind_named(query: &str, args: &[Arg]) -> Result<String> {
    let params: HashMap<&str, &Value> = args
        .iter()
        .filter_map(|a| a.name.as_deref().map(|n| (n, &a.value)))
        .collect();

    let mut missing = None;
    let bound = NAMED.replace_all(query, |caps: &Captures| match params.get(&caps[1]) {
        Some(value) => literal(value),
        None => {
            missing.get_or_insert_with(|| caps[0].to_string());
            String::new()
        }
    });
    if let Some(param) = missing {
        return Err(Error::MissingBindArg(param));
    }
    Ok(bound.into_owned())
}

/// SQL literal for a value.
pub fn literal(value: &Value) -> String {
    let mut out = String::new();
    write_literal(value, &mut out);
    out
}

/// Single-quoted string literal. Bytes that are not UTF-8 are written as `\xNN` escapes.
fn quote(bytes: &[u8], out: &mut String) {
    out.push('\'');
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '\\' => out.push_str(r"\\"),
                '\'' => out.push_str(r"\'"),
                c => out.push(c),
            }
        }
        for b in chunk.invalid() {
            push(out, format_args!("\\x{b:02X}"));
        }
    }
    out.push('\'');
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(v) => out.push(if *v { '1' } else { '0' }),
        Value::Int8(v) => push(out, v),
        Value::Int16(v) => push(out, v),
        Value::Int32(v) => push(out, v),
        Value::Int64(v) => push(out, v),
        Value::UInt8(v) => push(out, v),
        Value::UInt16(v) => push(out, v),
        Value::UInt32(v) => push(out, v),
        Value::UInt64(v) => push(out, v),
        Value::Float32(v) => float(out, f64::from(*v)),
        Value::Float64(v) => float(out, *v),
        Value::String(s) => quote(s.as_bytes(), out),
        Value::Bytes(bytes) => quote(bytes, out),
        Value::Date(d) => push(out, format_args!("toDate('{}')", d.format("%Y-%m-%d"))),
        Value::DateTime(t) if t.nanosecond() == 0 => push(
            out,
            format_args!("toDateTime('{}', 'UTC')", t.format("%Y-%m-%d %H:%M:%S")),
        ),
        Value::DateTime(t) => push(
            out,
            format_args!(
                "toDateTime64('{}', 9, 'UTC')",
                t.format("%Y-%m-%d %H:%M:%S%.9f")
            ),
        ),
        Value::Array(items) => {
            out.push('[');
            list(items, out);
            out.push(']');
        }
        Value::Tuple(items) => {
            out.push_str("tuple(");
            list(items, out);
            out.push(')');
        }
    }
}

fn push(out: &mut String, v: impl std::fmt::Display) {
    let _ = write!(out, "{v}");
}

fn float(out: &mut String, v: f64) {
    if v.is_nan() {
        out.push_str("nan");
    } else if v.is_infinite() {
        out.push_str(if v > 0.0 { "inf" } else { "-inf" });
    } else {
        push(out, v);
    }
}

fn list(items: &[Value], out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_literal(item, out);
    }
}
