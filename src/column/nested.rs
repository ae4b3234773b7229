//! Wrapper types built from other columns.
use std::io::{self, Read, Write};

use super::{Column, Registry, TypeSpec, capacity};
use crate::{
    binary::{Decoder, Encoder},
    error::{Error, Result},
    value::Value,
};

/// `Nullable(T)`: a byte map (1 = null) followed by the inner column. Null rows still occupy a
/// slot in the inner column, holding its default value.
#[derive(Debug)]
pub struct Nullable {
    type_name: String,
    nulls: Vec<u8>,
    inner: Box<dyn Column>,
}

impl Nullable {
    pub(super) fn build(spec: &TypeSpec<'_>, registry: &Registry) -> Result<Box<dyn Column>> {
        Ok(Box::new(Self {
            type_name: spec.name.to_string(),
            nulls: Vec::new(),
            inner: registry.column(spec.inner()?)?,
        }))
    }
}

impl Column for Nullable {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn rows(&self) -> usize {
        self.nulls.len()
    }

    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
        self.nulls.extend(r.read_fixed_bytes(rows)?);
        self.inner.decode(r, rows)
    }

    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(&self.nulls)?;
        self.inner.encode(w)
    }

    fn append(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            self.inner.append_default();
            self.nulls.push(1);
            return Ok(());
        }
        self.inner.append(value)?;
        self.nulls.push(0);
        Ok(())
    }

    fn append_default(&mut self) {
        self.inner.append_default();
        self.nulls.push(0);
    }

    fn truncate(&mut self, rows: usize) {
        self.nulls.truncate(rows);
        self.inner.truncate(rows);
    }

    fn row(&self, i: usize) -> Value {
        if self.nulls[i] != 0 {
            Value::Null
        } else {
            self.inner.row(i)
        }
    }

    fn read_state_prefix(&mut self, r: &mut dyn Read) -> Result<()> {
        self.inner.read_state_prefix(r)
    }

    fn write_state_prefix(&self, w: &mut dyn Write) -> Result<()> {
        self.inner.write_state_prefix(w)
    }
}

/// `Array(T)`: cumulative `u64` end offsets, one per row, then every element of every row in
/// the inner column.
#[derive(Debug)]
pub struct Array {
    type_name: String,
    offsets: Vec<u64>,
    inner: Box<dyn Column>,
}

impl Array {
    pub(super) fn build(spec: &TypeSpec<'_>, registry: &Registry) -> Result<Box<dyn Column>> {
        Ok(Box::new(Self {
            type_name: spec.name.to_string(),
            offsets: Vec::new(),
            inner: registry.column(spec.inner()?)?,
        }))
    }

    fn end(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }
}

impl Column for Array {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn rows(&self) -> usize {
        self.offsets.len()
    }

    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
        let base = self.end();
        let mut prev = 0;
        self.offsets.reserve(capacity(rows));
        for _ in 0..rows {
            let offset = r.read_u64()?;
            if offset < prev {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: offsets decrease ({prev} then {offset})", self.type_name),
                )
                .into());
            }
            prev = offset;
            self.offsets.push(base + offset);
        }
        let elements = usize::try_from(prev).map_err(|_| Error::conversion(prev, &self.type_name))?;
        self.inner.decode(r, elements)
    }

    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        for offset in &self.offsets {
            w.write_u64(*offset)?;
        }
        self.inner.encode(w)
    }

    fn append(&mut self, value: &Value) -> Result<()> {
        let Value::Array(items) = value else {
            return Err(Error::conversion(value, &self.type_name));
        };
        let before = self.inner.rows();
        for item in items {
            if let Err(e) = self.inner.append(item) {
                self.inner.truncate(before);
                return Err(e);
            }
        }
        self.offsets.push(self.end() + items.len() as u64);
        Ok(())
    }

    fn append_default(&mut self) {
        self.offsets.push(self.end());
    }

    fn truncate(&mut self, rows: usize) {
        self.offsets.truncate(rows);
        self.inner.truncate(self.end() as usize);
    }

    fn row(&self, i: usize) -> Value {
        let start = if i == 0 { 0 } else { self.offsets[i - 1] };
        let end = self.offsets[i];
        Value::Array((start..end).map(|j| self.inner.row(j as usize)).collect())
    }

    fn read_state_prefix(&mut self, r: &mut dyn Read) -> Result<()> {
        self.inner.read_state_prefix(r)
    }

    fn write_state_prefix(&self, w: &mut dyn Write) -> Result<()> {
        self.inner.write_state_prefix(w)
    }
}

/// `Tuple(T1, T2, ...)`: each element column in turn. Elements may be named
/// (`Tuple(id UInt64, tag String)`); the names are part of the type string only.
#[derive(Debug)]
pub struct Tuple {
    type_name: String,
    elements: Vec<Box<dyn Column>>,
}

impl Tuple {
    pub(super) fn build(spec: &TypeSpec<'_>, registry: &Registry) -> Result<Box<dyn Column>> {
        if spec.args.is_empty() {
            return Err(Error::UnknownColumnType(spec.name.to_string()));
        }
        let elements = spec
            .args
            .iter()
            .map(|arg| element(arg, registry))
            .collect::<Result<_>>()?;
        Ok(Box::new(Self {
            type_name: spec.name.to_string(),
            elements,
        }))
    }
}

/// Resolves `T` or `name T`.
fn element(arg: &str, registry: &Registry) -> Result<Box<dyn Column>> {
    match registry.column(arg) {
        Err(Error::UnknownColumnType(_)) => match arg.split_once(' ') {
            Some((_, ty)) => registry.column(ty.trim()),
            None => Err(Error::UnknownColumnType(arg.to_string())),
        },
        other => other,
    }
}

impl Column for Tuple {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn rows(&self) -> usize {
        self.elements.first().map_or(0, |e| e.rows())
    }

    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
        for element in &mut self.elements {
            element.decode(r, rows)?;
        }
        Ok(())
    }

    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        for element in &self.elements {
            element.encode(w)?;
        }
        Ok(())
    }

    fn append(&mut self, value: &Value) -> Result<()> {
        let items = match value {
            Value::Tuple(items) | Value::Array(items) if items.len() == self.elements.len() => {
                items
            }
            _ => return Err(Error::conversion(value, &self.type_name)),
        };
        let rows = self.rows();
        for (element, item) in self.elements.iter_mut().zip(items) {
            if let Err(e) = element.append(item) {
                self.truncate(rows);
                return Err(e);
            }
        }
        Ok(())
    }

    fn append_default(&mut self) {
        for element in &mut self.elements {
            element.append_default();
        }
    }

    fn truncate(&mut self, rows: usize) {
        for element in &mut self.elements {
            element.truncate(rows);
        }
    }

    fn row(&self, i: usize) -> Value {
        Value::Tuple(self.elements.iter().map(|e| e.row(i)).collect())
    }

    fn read_state_prefix(&mut self, r: &mut dyn Read) -> Result<()> {
        for element in &mut self.elements {
            element.read_state_prefix(r)?;
        }
        Ok(())
    }

    fn write_state_prefix(&self, w: &mut dyn Write) -> Result<()> {
        for element in &self.elements {
            element.write_state_prefix(w)?;
        }
        Ok(())
    }
}
