//! Columnar blocks.
//!
//! A block is the unit of data exchange: an ordered list of named columns that all hold the
//! same number of rows. Column order is part of the wire identity and is preserved in both
//! directions.
//!
//! # Layout
//!
//! ```text
//! block info          only when revision > 0
//! varint columns
//! varint rows
//! per column:
//!     string name
//!     string type
//!     bool   custom serialization      revision >= 54454, always false from us
//!     ..     state prefix + data       only when rows > 0
//! ```
use std::io::{self, Read, Write};

use log::trace;

use crate::{
    binary::{Decoder, Encoder},
    column::{Column, Registry},
    error::{Error, Result},
    protocol::DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION,
    value::Value,
};

/// Hard ceiling on the row count of a decoded block.
pub const MAX_BLOCK_ROWS: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub is_overflows: bool,
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            is_overflows: false,
            bucket_num: -1,
        }
    }
}

impl BlockInfo {
    fn encode(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_uvarint(1)?;
        w.write_bool(self.is_overflows)?;
        w.write_uvarint(2)?;
        w.write_i32(self.bucket_num)?;
        w.write_uvarint(0)
    }

    fn decode(r: &mut dyn Read) -> io::Result<Self> {
        let mut info = Self::default();
        loop {
            match r.read_uvarint()? {
                0 => return Ok(info),
                1 => info.is_overflows = r.read_bool()?,
                2 => info.bucket_num = r.read_i32()?,
                field => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown block info field {field}"),
                    ));
                }
            }
        }
    }
}

#[derive(Debug)]
struct Named {
    name: String,
    column: Box<dyn Column>,
}

#[derive(Debug, Default)]
pub struct Block {
    pub info: BlockInfo,
    columns: Vec<Named>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(&mut self, name: impl Into<String>, column: Box<dyn Column>) {
        self.columns.push(Named {
            name: name.into(),
            column,
        });
    }

    pub fn with_column(mut self, name: impl Into<String>, column: Box<dyn Column>) -> Self {
        self.add_column(name, column);
        self
    }

    /// Row count, taken from the first column.
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.column.rows())
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &dyn Column)> {
        self.columns.iter().map(|c| (c.name.as_str(), c.column.as_ref()))
    }

    pub fn column(&self, i: usize) -> Option<&dyn Column> {
        self.columns.get(i).map(|c| c.column.as_ref())
    }

    pub fn column_mut(&mut self, i: usize) -> Option<&mut dyn Column> {
        Some(self.columns.get_mut(i)?.column.as_mut())
    }

    pub fn row(&self, i: usize) -> Option<Vec<Value>> {
        if i >= self.rows() {
            return None;
        }
        Some(self.columns.iter().map(|c| c.column.row(i)).collect())
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.rows()).filter_map(|i| self.row(i))
    }

    /// Appends one value per column. On error no column is changed.
    pub fn append_row(&mut self, values: &[Value]) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::RowLength {
                expected: self.columns.len(),
                got: values.len(),
            });
        }
        let rows = self.rows();
        for (i, value) in values.iter().enumerate() {
            if let Err(e) = self.columns[i].column.append(value) {
                for c in &mut self.columns[..i] {
                    c.column.truncate(rows);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Every column at the row count of the first one.
    pub fn check_rows(&self) -> Result<usize> {
        let expected = self.rows();
        for c in &self.columns {
            if c.column.rows() != expected {
                return Err(Error::ColumnRowMismatch {
                    column: c.name.clone(),
                    rows: c.column.rows(),
                    expected,
                });
            }
        }
        Ok(expected)
    }

    pub fn encode(&self, w: &mut dyn Write, revision: u64) -> Result<()> {
        let rows = self.check_rows()?;
        if revision > 0 {
            self.info.encode(w)?;
        }
        w.write_uvarint(self.columns.len() as u64)?;
        w.write_uvarint(rows as u64)?;
        for c in &self.columns {
            w.write_string(&c.name)?;
            w.write_string(c.column.type_name())?;
            if revision >= DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION {
                w.write_bool(false)?;
            }
            if rows > 0 {
                c.column.write_state_prefix(w)?;
                c.column.encode(w)?;
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut dyn Read, revision: u64, registry: &Registry) -> Result<Block> {
        let mut block = Block::new();
        if revision > 0 {
            block.info = BlockInfo::decode(r)?;
        }
        let columns = r.read_uvarint()?;
        let rows = r.read_uvarint()?;
        if rows > MAX_BLOCK_ROWS {
            return Err(Error::BlockTooLarge {
                rows,
                limit: MAX_BLOCK_ROWS,
            });
        }
        let rows = rows as usize;
        for _ in 0..columns {
            let name = r.read_string()?;
            let type_name = r.read_string()?;
            if revision >= DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION && r.read_bool()? {
                return Err(Error::CustomSerialization(name));
            }
            let mut column = registry.column(&type_name)?;
            if rows > 0 {
                column.read_state_prefix(r)?;
                column.decode(r, rows)?;
            }
            block.add_column(name, column);
        }
        trace!("decoded block: {columns} columns, {rows} rows");
        Ok(block)
    }
}

/// Equal when names, types and every value match.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info
            && self.columns.len() == other.columns.len()
            && self.rows() == other.rows()
            && self.columns.iter().zip(&other.columns).all(|(a, b)| {
                a.name == b.name
                    && a.column.type_name() == b.column.type_name()
                    && a.column.rows() == b.column.rows()
                    && (0..a.column.rows()).all(|i| a.column.row(i) == b.column.row(i))
            })
    }
}
