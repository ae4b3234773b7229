use std::{
    fmt,
    io::{self, Read, Write},
};

use super::{Column, capacity};
use crate::{
    binary::{Decoder, Encoder},
    error::{Error, Result},
    value::Value,
};

/// A fixed-width scalar stored little-endian.
pub trait Primitive: Copy + Default + fmt::Debug + Send + 'static {
    fn read(r: &mut dyn Read) -> io::Result<Self>;
    fn write(self, w: &mut dyn Write) -> io::Result<()>;
    /// Lossless conversion from a value, `None` when it does not fit.
    fn from_value(value: &Value) -> Option<Self>;
    fn into_value(self) -> Value;
}

macro_rules! integer {
    ($($t:ty => $variant:ident, $read:ident, $write:ident;)*) => {
        $(
            impl Primitive for $t {
                fn read(r: &mut dyn Read) -> io::Result<Self> {
                    r.$read()
                }

                fn write(self, w: &mut dyn Write) -> io::Result<()> {
                    w.$write(self)
                }

                fn from_value(value: &Value) -> Option<Self> {
                    value.as_i128().and_then(|v| Self::try_from(v).ok())
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

integer! {
    i8 => Int8, read_i8, write_i8;
    i16 => Int16, read_i16, write_i16;
    i32 => Int32, read_i32, write_i32;
    i64 => Int64, read_i64, write_i64;
    u8 => UInt8, read_u8, write_u8;
    u16 => UInt16, read_u16, write_u16;
    u32 => UInt32, read_u32, write_u32;
    u64 => UInt64, read_u64, write_u64;
}

impl Primitive for f32 {
    fn read(r: &mut dyn Read) -> io::Result<Self> {
        r.read_f32()
    }

    fn write(self, w: &mut dyn Write) -> io::Result<()> {
        w.write_f32(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::Float32(v) => Some(v),
            _ => value.as_f64().map(|v| v as f32),
        }
    }

    fn into_value(self) -> Value {
        Value::Float32(self)
    }
}

impl Primitive for f64 {
    fn read(r: &mut dyn Read) -> io::Result<Self> {
        r.read_f64()
    }

    fn write(self, w: &mut dyn Write) -> io::Result<()> {
        w.write_f64(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn into_value(self) -> Value {
        Value::Float64(self)
    }
}

impl Primitive for bool {
    fn read(r: &mut dyn Read) -> io::Result<Self> {
        r.read_bool()
    }

    fn write(self, w: &mut dyn Write) -> io::Result<()> {
        w.write_bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value.as_i128()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

/// Integers, floats and `Bool`.
#[derive(Debug)]
pub struct Numeric<T> {
    type_name: String,
    data: Vec<T>,
}

impl<T: Primitive> Numeric<T> {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            data: Vec::new(),
        }
    }

    pub fn values(&self) -> &[T] {
        &self.data
    }
}

impl<T: Primitive> Column for Numeric<T> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn rows(&self) -> usize {
        self.data.len()
    }

    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
        self.data.reserve(capacity(rows));
        for _ in 0..rows {
            self.data.push(T::read(r)?);
        }
        Ok(())
    }

    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        for v in &self.data {
            v.write(w)?;
        }
        Ok(())
    }

    fn append(&mut self, value: &Value) -> Result<()> {
        let v = T::from_value(value).ok_or_else(|| Error::conversion(value, &self.type_name))?;
        self.data.push(v);
        Ok(())
    }

    fn append_default(&mut self) {
        self.data.push(T::default());
    }

    fn truncate(&mut self, rows: usize) {
        self.data.truncate(rows);
    }

    fn row(&self, i: usize) -> Value {
        self.data[i].into_value()
    }
}
