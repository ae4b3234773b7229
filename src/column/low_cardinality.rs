//! Dictionary encoded columns.
//!
//! `LowCardinality(T)` stores each distinct value once in a dictionary and every row as an index
//! into it. The column owns a state prefix: a `u64` serialization version written once per block
//! ahead of the data. Each block then carries
//!
//! ```text
//! u64 flags           index width (0..=3 => u8..u64)
//!                     | HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY
//! u64 dictionary size
//! ..  dictionary      inner column data
//! u64 row count
//! ..  indices         one per row, in the index width
//! ```
//!
//! For `LowCardinality(Nullable(T))` the dictionary is a plain `T` column whose first entry
//! stands for null.
use std::{
    collections::HashMap,
    io::{self, Read, Write},
};

use super::{Column, Registry, TypeSpec, capacity};
use crate::{
    binary::{Decoder, Encoder},
    error::{Error, Result},
    value::Value,
};

const SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS: u64 = 1;

const INDEX_WIDTH_MASK: u64 = 0xff;
const HAS_ADDITIONAL_KEYS: u64 = 1 << 9;
const NEED_UPDATE_DICTIONARY: u64 = 1 << 10;

#[derive(Debug)]
pub struct LowCardinality {
    type_name: String,
    nullable: bool,
    dictionary: Box<dyn Column>,
    keys: Vec<u64>,
    /// Dictionary position by the `Debug` form of the value; `Value` has no `Hash`.
    positions: HashMap<String, u64>,
}

impl LowCardinality {
    pub(super) fn build(spec: &TypeSpec<'_>, registry: &Registry) -> Result<Box<dyn Column>> {
        let inner = TypeSpec::parse(spec.inner()?)?;
        let (nullable, dictionary) = if inner.base == "Nullable" {
            (true, registry.column(inner.inner()?)?)
        } else {
            (false, registry.column(inner.name)?)
        };
        Ok(Box::new(Self {
            type_name: spec.name.to_string(),
            nullable,
            dictionary,
            keys: Vec::new(),
            positions: HashMap::new(),
        }))
    }

    fn null_slot(&mut self) -> u64 {
        if self.dictionary.rows() == 0 {
            self.dictionary.append_default();
        }
        0
    }

    fn index_width(&self) -> u64 {
        match self.dictionary.rows() as u64 {
            n if n <= 1 << 8 => 0,
            n if n <= 1 << 16 => 1,
            n if n <= 1 << 32 => 2,
            _ => 3,
        }
    }

    fn invalid(&self, message: String) -> Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {message}", self.type_name),
        )
        .into()
    }
}

impl Column for LowCardinality {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn rows(&self) -> usize {
        self.keys.len()
    }

    fn read_state_prefix(&mut self, r: &mut dyn Read) -> Result<()> {
        let version = r.read_u64()?;
        if version != SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS {
            return Err(self.invalid(format!("unsupported serialization version {version}")));
        }
        Ok(())
    }

    fn write_state_prefix(&self, w: &mut dyn Write) -> Result<()> {
        w.write_u64(SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS)?;
        Ok(())
    }

    fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
        if rows == 0 {
            return Ok(());
        }
        let flags = r.read_u64()?;
        let width = flags & INDEX_WIDTH_MASK;
        if width > 3 {
            return Err(self.invalid(format!("index width {width}")));
        }

        let size = r.read_u64()?;
        let size = usize::try_from(size)
            .map_err(|_| self.invalid(format!("dictionary size {size}")))?;
        let base = self.dictionary.rows() as u64;
        self.dictionary.decode(r, size)?;

        let count = r.read_u64()?;
        if count != rows as u64 {
            return Err(self.invalid(format!("{count} indices for {rows} rows")));
        }
        self.keys.reserve(capacity(rows));
        for _ in 0..rows {
            let key = match width {
                0 => r.read_u8()?.into(),
                1 => r.read_u16()?.into(),
                2 => r.read_u32()?.into(),
                _ => r.read_u64()?,
            };
            if key >= size as u64 {
                return Err(self.invalid(format!("index {key} outside dictionary of {size}")));
            }
            self.keys.push(base + key);
        }
        Ok(())
    }

    fn encode(&self, w: &mut dyn Write) -> Result<()> {
        if self.keys.is_empty() {
            return Ok(());
        }
        let width = self.index_width();
        w.write_u64(width | HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY)?;
        w.write_u64(self.dictionary.rows() as u64)?;
        self.dictionary.encode(w)?;
        w.write_u64(self.keys.len() as u64)?;
        for &key in &self.keys {
            match width {
                0 => w.write_u8(key as u8)?,
                1 => w.write_u16(key as u16)?,
                2 => w.write_u32(key as u32)?,
                _ => w.write_u64(key)?,
            }
        }
        Ok(())
    }

    fn append(&mut self, value: &Value) -> Result<()> {
        if value.is_null() && self.nullable {
            let key = self.null_slot();
            self.keys.push(key);
            return Ok(());
        }
        if self.nullable {
            self.null_slot();
        }
        let lookup = format!("{value:?}");
        let key = match self.positions.get(&lookup) {
            Some(&key) => key,
            None => {
                let key = self.dictionary.rows() as u64;
                self.dictionary.append(value)?;
                self.positions.insert(lookup, key);
                key
            }
        };
        self.keys.push(key);
        Ok(())
    }

    fn append_default(&mut self) {
        let key = if self.nullable {
            self.null_slot()
        } else {
            let key = self.dictionary.rows() as u64;
            self.dictionary.append_default();
            key
        };
        self.keys.push(key);
    }

    fn truncate(&mut self, rows: usize) {
        self.keys.truncate(rows);
    }

    fn row(&self, i: usize) -> Value {
        let key = self.keys[i];
        if self.nullable && key == 0 {
            Value::Null
        } else {
            self.dictionary.row(key as usize)
        }
    }
}
