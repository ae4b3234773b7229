//! Calendar types.
//!
//! Values are exchanged as [`Value::Date`] and UTC [`Value::DateTime`]. The timezone in a
//! `DateTime('tz')` type string only affects how the server renders the value; the stored
//! number is always relative to the Unix epoch.
use std::io::{Read, Write};

use chrono::{Datelike, NaiveDate, Utc};

use super::{Column, Registry, TypeSpec, capacity};
use crate::{
    binary::{Decoder, Encoder},
    error::{Error, Result},
    value::Value,
};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

fn days_since_epoch(value: &Value) -> Option<i64> {
    let date = match value {
        Value::Date(d) => *d,
        Value::DateTime(t) => t.date_naive(),
        _ => return None,
    };
    Some(i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE)
}

fn date_value(days: i64) -> Value {
    i32::try_from(days + UNIX_EPOCH_DAYS_FROM_CE)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map_or(Value::Null, Value::Date)
}

fn datetime_value(secs: i64, nanos: u32) -> Value {
    chrono::DateTime::<Utc>::from_timestamp(secs, nanos).map_or(Value::Null, Value::DateTime)
}

macro_rules! calendar_column {
    ($(#[$doc:meta])* $name:ident, $t:ty, $read:ident, $write:ident $(, $field:ident: $ft:ty)*) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            type_name: String,
            data: Vec<$t>,
            $($field: $ft,)*
        }

        impl $name {
            fn with_type(type_name: &str) -> Self {
                Self {
                    type_name: type_name.to_string(),
                    data: Vec::new(),
                    $($field: Default::default(),)*
                }
            }
        }

        impl Column for $name {
            fn type_name(&self) -> &str {
                &self.type_name
            }

            fn rows(&self) -> usize {
                self.data.len()
            }

            fn decode(&mut self, r: &mut dyn Read, rows: usize) -> Result<()> {
                self.data.reserve(capacity(rows));
                for _ in 0..rows {
                    self.data.push(r.$read()?);
                }
                Ok(())
            }

            fn encode(&self, w: &mut dyn Write) -> Result<()> {
                for v in &self.data {
                    w.$write(*v)?;
                }
                Ok(())
            }

            fn append(&mut self, value: &Value) -> Result<()> {
                let v = self
                    .convert(value)
                    .ok_or_else(|| Error::conversion(value, &self.type_name))?;
                self.data.push(v);
                Ok(())
            }

            fn append_default(&mut self) {
                self.data.push(0);
            }

            fn truncate(&mut self, rows: usize) {
                self.data.truncate(rows);
            }

            fn row(&self, i: usize) -> Value {
                self.value(self.data[i])
            }
        }
    };
}

calendar_column! {
    /// `Date`: days since the epoch as `u16`.
    Date, u16, read_u16, write_u16
}

calendar_column! {
    /// `Date32`: days since the epoch as `i32`, negative before 1970.
    Date32, i32, read_i32, write_i32
}

calendar_column! {
    /// `DateTime[('tz')]`: seconds since the epoch as `u32`.
    DateTime, u32, read_u32, write_u32
}

calendar_column! {
    /// `DateTime64(p[, 'tz'])`: ticks of 10^-p seconds since the epoch as `i64`.
    DateTime64, i64, read_i64, write_i64, precision: u32
}

impl Date {
    pub fn new() -> Self {
        Self::with_type("Date")
    }

    fn convert(&self, value: &Value) -> Option<u16> {
        days_since_epoch(value).and_then(|d| u16::try_from(d).ok())
    }

    fn value(&self, days: u16) -> Value {
        date_value(days.into())
    }
}

impl Default for Date {
    fn default() -> Self {
        Self::new()
    }
}

impl Date32 {
    pub fn new() -> Self {
        Self::with_type("Date32")
    }

    fn convert(&self, value: &Value) -> Option<i32> {
        days_since_epoch(value).and_then(|d| i32::try_from(d).ok())
    }

    fn value(&self, days: i32) -> Value {
        date_value(days.into())
    }
}

impl Default for Date32 {
    fn default() -> Self {
        Self::new()
    }
}

impl DateTime {
    pub fn new(type_name: &str) -> Self {
        Self::with_type(type_name)
    }

    fn convert(&self, value: &Value) -> Option<u32> {
        match value {
            Value::DateTime(t) => u32::try_from(t.timestamp()).ok(),
            _ => value.as_i128().and_then(|v| u32::try_from(v).ok()),
        }
    }

    fn value(&self, secs: u32) -> Value {
        datetime_value(secs.into(), 0)
    }
}

impl DateTime64 {
    pub(super) fn build(spec: &TypeSpec<'_>, _: &Registry) -> Result<Box<dyn Column>> {
        let precision = spec
            .args
            .first()
            .and_then(|p| p.parse::<u32>().ok())
            .filter(|p| *p <= 9)
            .ok_or_else(|| Error::UnknownColumnType(spec.name.to_string()))?;
        let mut column = Self::with_type(spec.name);
        column.precision = precision;
        Ok(Box::new(column))
    }

    fn scale(&self) -> i64 {
        10_i64.pow(self.precision)
    }

    fn convert(&self, value: &Value) -> Option<i64> {
        match value {
            Value::DateTime(t) => {
                let nanos_per_tick = 10_i64.pow(9 - self.precision);
                t.timestamp()
                    .checked_mul(self.scale())?
                    .checked_add(i64::from(t.timestamp_subsec_nanos()) / nanos_per_tick)
            }
            _ => value.as_i128().and_then(|v| i64::try_from(v).ok()),
        }
    }

    fn value(&self, ticks: i64) -> Value {
        let scale = self.scale();
        let nanos = ticks.rem_euclid(scale) * 10_i64.pow(9 - self.precision);
        datetime_value(ticks.div_euclid(scale), nanos as u32)
    }
}
