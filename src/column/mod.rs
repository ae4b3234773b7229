//! Column codecs.
//!
//! A column is a homogeneous sequence of values stored in its wire layout. Which codec handles
//! a column is decided by its type string (`UInt64`, `Nullable(String)`, `DateTime64(3, 'UTC')`,
//! ...) through a [`Registry`] keyed by the base type name. Composite types look their element
//! types up in the same registry, so a codec registered by the caller is usable inside
//! `Array(...)` or `Nullable(...)` as well.
//!
//! # Layout
//!
//! Every codec writes its rows back to back without per-row framing. Some types carry a state
//! prefix in front of their data (see [`Column::write_state_prefix`]); the block layer emits
//! prefix and data only for blocks that have rows.
use std::{
    collections::HashMap,
    fmt,
    io::{Read, Write},
};

use crate::{
    error::{Error, Result},
    value::Value,
};

mod date;
mod low_cardinality;
mod nested;
mod numeric;
mod string;

pub use date::{Date, Date32, DateTime, DateTime64};
pub use low_cardinality::LowCardinality;
pub use nested::{Array, Nullable, Tuple};
pub use numeric::{Numeric, Primitive};
pub use string::{FixedString, StringColumn};

/// Decoders never reserve more than this many rows up front. The rest grows with the data that
/// actually arrives.
const PREALLOC_ROWS: usize = 1 << 16;

pub(crate) fn capacity(rows: usize) -> usize {
    rows.min(PREALLOC_ROWS)
}

pub trait Column: fmt::Debug + Send {
    /// Full type string as sent on the wire.
    fn type_name(&self) -> &str;

    fn rows(&self) -> usize;

    /// Appends `rows` values read from `r`.
    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()>;

    fn encode(&self, w: &mut dyn Write) -> Result<()>;

    fn append(&mut self, value: &Value) -> Result<()>;

    /// Appends the zero value of the type. Used for the hidden slot behind a null.
    fn append_default(&mut self);

    /// Drops every row past `rows`.
    fn truncate(&mut self, rows: usize);

    /// Value at row `i`. Panics if `i` is out of bounds.
    fn row(&self, i: usize) -> Value;

    fn read_state_prefix(&mut self, _r: &mut dyn Read) -> Result<()> {
        Ok(())
    }

    fn write_state_prefix(&self, _w: &mut dyn Write) -> Result<()> {
        Ok(())
    }
}

/// A parsed type string: base name plus top level arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec<'a> {
    pub name: &'a str,
    pub base: &'a str,
    pub args: Vec<&'a str>,
}

impl<'a> TypeSpec<'a> {
    pub fn parse(name: &'a str) -> Result<Self> {
        let name = name.trim();
        let Some(open) = name.find('(') else {
            return Ok(Self {
                name,
                base: name,
                args: Vec::new(),
            });
        };
        if !name.ends_with(')') {
            return Err(Error::UnknownColumnType(name.to_string()));
        }
        Ok(Self {
            name,
            base: name[..open].trim(),
            args: split_args(&name[open + 1..name.len() - 1]),
        })
    }

    /// The single argument of a wrapper type such as `Nullable(T)`.
    pub fn inner(&self) -> Result<&'a str> {
        match self.args.as_slice() {
            [inner] => Ok(inner),
            _ => Err(Error::UnknownColumnType(self.name.to_string())),
        }
    }
}

/// Splits on commas that are neither nested in parentheses nor quoted.
fn split_args(s: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0_usize;
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if quoted {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => quoted = false,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' => quoted = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last);
    }
    args
}

/// Builds an empty column for a parsed type.
pub type Constructor = fn(&TypeSpec<'_>, &Registry) -> Result<Box<dyn Column>>;

/// Column codecs by base type name.
///
/// [`Registry::default`] knows every built-in type; [`Registry::empty`] knows none.
pub struct Registry {
    codecs: HashMap<String, Constructor>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registers (or replaces) the codec for a base type name.
    pub fn register(&mut self, base: impl Into<String>, constructor: Constructor) -> &mut Self {
        self.codecs.insert(base.into(), constructor);
        self
    }

    /// An empty column for `type_name`.
    pub fn column(&self, type_name: &str) -> Result<Box<dyn Column>> {
        let spec = TypeSpec::parse(type_name)?;
        let constructor = self
            .codecs
            .get(spec.base)
            .ok_or_else(|| Error::UnknownColumnType(spec.name.to_string()))?;
        constructor(&spec, self)
    }
}

macro_rules! numeric {
    ($registry:ident, $($name:literal => $t:ty),* $(,)?) => {
        $(
            $registry.register($name, |spec, _| Ok(Box::new(Numeric::<$t>::new(spec.name))));
        )*
    };
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        numeric! {
            registry,
            "Int8" => i8,
            "Int16" => i16,
            "Int32" => i32,
            "Int64" => i64,
            "UInt8" => u8,
            "UInt16" => u16,
            "UInt32" => u32,
            "UInt64" => u64,
            "Float32" => f32,
            "Float64" => f64,
            "Bool" => bool,
        }
        registry
            .register("String", |_, _| Ok(Box::new(StringColumn::new())))
            .register("FixedString", FixedString::build)
            .register("Date", |_, _| Ok(Box::new(Date::new())))
            .register("Date32", |_, _| Ok(Box::new(Date32::new())))
            .register("DateTime", |spec, _| Ok(Box::new(DateTime::new(spec.name))))
            .register("DateTime64", DateTime64::build)
            .register("Nullable", Nullable::build)
            .register("Array", Array::build)
            .register("Tuple", Tuple::build)
            .register("LowCardinality", LowCardinality::build);
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.codecs.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("codecs", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn parses_type_strings() {
        let spec = TypeSpec::parse("UInt64").unwrap();
        assert_eq!(spec.base, "UInt64");
        assert!(spec.args.is_empty());

        let spec = TypeSpec::parse("DateTime64(3, 'Europe/Berlin')").unwrap();
        assert_eq!(spec.base, "DateTime64");
        assert_eq!(spec.args, ["3", "'Europe/Berlin'"]);

        let spec =
            TypeSpec::parse("Tuple(a Nullable(String), b Array(Tuple(Int8, Int16)))").unwrap();
        assert_eq!(spec.args, ["a Nullable(String)", "b Array(Tuple(Int8, Int16))"]);

        let spec = TypeSpec::parse("Enum8('a,b' = 1, 'c' = 2)").unwrap();
        assert_eq!(spec.args, ["'a,b' = 1", "'c' = 2"]);

        assert!(TypeSpec::parse("Array(Int8").is_err());
    }

    #[test]
    fn unknown_types_name_the_offender() {
        let err = Registry::default().column("Map(String, UInt8)").unwrap_err();
        assert!(matches!(err, Error::UnknownColumnType(ref t) if t == "Map(String, UInt8)"));

        let err = Registry::default().column("Array(Decimal(9, 2))").unwrap_err();
        assert!(matches!(err, Error::UnknownColumnType(ref t) if t == "Decimal(9, 2)"));
    }

    #[test]
    fn custom_codecs_work_inside_wrappers() {
        let mut registry = Registry::default();
        registry.register("IPv4", |spec, _| Ok(Box::new(Numeric::<u32>::new(spec.name))));

        let mut column = registry.column("Array(IPv4)").unwrap();
        column
            .append(&Value::Array(vec![Value::UInt32(0x7f00_0001)]))
            .unwrap();
        assert_eq!(column.type_name(), "Array(IPv4)");

        let mut out = Vec::new();
        column.encode(&mut out).unwrap();
        let mut decoded = registry.column("Array(IPv4)").unwrap();
        decoded.decode(&mut Cursor::new(out), 1).unwrap();
        assert_eq!(decoded.row(0), Value::Array(vec![Value::UInt32(0x7f00_0001)]));
    }

    #[test]
    fn every_builtin_type_builds() {
        let registry = Registry::default();
        for ty in [
            "Int8",
            "UInt64",
            "Float32",
            "Bool",
            "String",
            "FixedString(4)",
            "Date",
            "Date32",
            "DateTime",
            "DateTime('UTC')",
            "DateTime64(6)",
            "DateTime64(3, 'Asia/Tokyo')",
            "Nullable(Int32)",
            "Array(Array(String))",
            "Tuple(String, UInt8)",
            "Tuple(a String, b Nullable(UInt8))",
            "LowCardinality(String)",
            "LowCardinality(Nullable(String))",
        ] {
            let column = registry.column(ty).unwrap();
            assert_eq!(column.type_name(), ty);
            assert_eq!(column.rows(), 0);
        }
    }
}
