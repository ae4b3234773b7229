//! Query settings.
//!
//! Settings are attached to every query. The effective set is the connection level settings
//! overlaid with the per-query ones; on a key collision the query wins.
use std::{collections::BTreeMap, fmt, io::Write};

use crate::{
    binary::Encoder,
    error::{Error, Result},
    protocol::DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Int(i64),
    UInt(u64),
    Bool(bool),
    Float(f64),
    String(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::UInt(v) => write!(f, "{v}"),
            SettingValue::Bool(v) => write!(f, "{}", *v as u8),
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Int(v.into())
    }
}

impl From<u64> for SettingValue {
    fn from(v: u64) -> Self {
        SettingValue::UInt(v)
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::String(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::String(v)
    }
}

/// Ordered set of settings, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings(BTreeMap<String, SettingValue>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `self` overlaid with `overrides`.
    pub fn merged(&self, overrides: &Settings) -> Settings {
        let mut out = self.clone();
        for (k, v) in &overrides.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// Writes every setting. The caller terminates the list with an empty key.
    pub fn encode(&self, w: &mut dyn Write, revision: u64) -> Result<()> {
        for (key, value) in &self.0 {
            w.write_string(key)?;
            if revision < DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS {
                let raw = match value {
                    SettingValue::Int(v) => *v as u64,
                    SettingValue::UInt(v) => *v,
                    SettingValue::Bool(v) => *v as u64,
                    _ => {
                        return Err(Error::UnsupportedSetting {
                            key: key.clone(),
                            revision,
                        });
                    }
                };
                w.write_uvarint(raw)?;
            } else {
                // is_important
                w.write_bool(false)?;
                w.write_string(&value.to_string())?;
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<SettingValue>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Settings(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
