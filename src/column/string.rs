use std::io::{Read, Write};

use super::{Column, Registry, TypeSpec, capacity};
use crate::{
    binary::{Decoder, Encoder},
    error::{Error, Result},
    value::Value,
};

/// `String`: length-prefixed bytes, not necessarily UTF-8.
#[derive(Debug, Default)]
pub struct StringColumn {
    data: Vec<Vec<u8>>,
}

impl StringColumn {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Column for StringColumn {
    fn type_name(&self) -> &str {
        "String"
    }

    fn rows(&self) -> usize {
        self.data.len()
    }

    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
        self.data.reserve(capacity(rows));
        for _ in 0..rows {
            self.data.push(r.read_bytes()?);
        }
        Ok(())
    }

    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        for v in &self.data {
            w.write_bytes(v)?;
        }
        Ok(())
    }

    fn append(&mut self, value: &Value) -> Result<()> {
        let bytes = value
            .as_bytes()
            .ok_or_else(|| Error::conversion(value, "String"))?;
        self.data.push(bytes.to_vec());
        Ok(())
    }

    fn append_default(&mut self) {
        self.data.push(Vec::new());
    }

    fn truncate(&mut self, rows: usize) {
        self.data.truncate(rows);
    }

    fn row(&self, i: usize) -> Value {
        Value::from_raw(self.data[i].clone())
    }
}

/// `FixedString(N)`: exactly N bytes per row, shorter values are zero padded.
#[derive(Debug)]
pub struct FixedString {
    type_name: String,
    size: usize,
    data: Vec<u8>,
}

impl FixedString {
    pub fn new(size: usize) -> Self {
        Self {
            type_name: format!("FixedString({size})"),
            size,
            data: Vec::new(),
        }
    }

    pub(super) fn build(spec: &TypeSpec<'_>, _: &Registry) -> Result<Box<dyn Column>> {
        let size = spec
            .inner()?
            .parse()
            .map_err(|_| Error::UnknownColumnType(spec.name.to_string()))?;
        Ok(Box::new(Self::new(size)))
    }
}

impl Column for FixedString {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn rows(&self) -> usize {
        self.data.len().checked_div(self.size).unwrap_or(0)
    }

    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
        let len = rows
            .checked_mul(self.size)
            .ok_or_else(|| Error::conversion(rows, &self.type_name))?;
        self.data.extend(r.read_fixed_bytes(len)?);
        Ok(())
    }

    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(&self.data)?;
        Ok(())
    }

    fn append(&mut self, value: &Value) -> Result<()> {
        let bytes = value
            .as_bytes()
            .filter(|b| b.len() <= self.size)
            .ok_or_else(|| Error::conversion(value, &self.type_name))?;
        self.data.extend_from_slice(bytes);
        self.data.resize(self.data.len() + self.size - bytes.len(), 0);
        Ok(())
    }

    fn append_default(&mut self) {
        self.data.resize(self.data.len() + self.size, 0);
    }

    fn truncate(&mut self, rows: usize) {
        self.data.truncate(rows.saturating_mul(self.size));
    }

    /// Trailing zero padding is stripped.
    fn row(&self, i: usize) -> Value {
        let raw = &self.data[i * self.size..(i + 1) * self.size];
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        Value::from_raw(raw[..end].to_vec())
    }
}
