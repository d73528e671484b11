//! # Engine Configuration
//!
//! Typed key/value configuration consumed by [`crate::engine::open_engine`].
//! A `Config` is a small typed map: values are strings, unsigned or signed
//! integers, and every getter enforces the stored type. Reading a key with
//! the wrong type is a `CONFIG_TYPE_ERROR`; feeding `parse()` a malformed
//! option string is a `CONFIG_PARSING_ERROR`.
//!
//! ## Recognized Options (tree engine)
//!
//! | Option         | Type   | Default | Effect                                |
//! |----------------|--------|---------|---------------------------------------|
//! | `path`         | string | —       | Pool file path (required)             |
//! | `size`         | u64    | 8 MiB   | Pool size in bytes, creation only     |
//! | `force_create` | u64    | 0       | Nonzero: always (re)create the pool   |
//!
//! ## Option Strings
//!
//! `Config::parse` accepts `key=value` pairs separated by commas, for the
//! demo binary and other textual frontends:
//!
//! ```text
//! path=/tmp/kv.pool,size=16777216,force_create=1
//! ```
//!
//! Integer-looking values parse as integers, everything else as strings.

use std::path::PathBuf;

use hashbrown::HashMap;

use crate::status::{KvError, KvResult};

/// Default pool size used when `size` is absent (creation only).
pub const DEFAULT_POOL_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Uint(u64),
    Int(i64),
}

impl ConfigValue {
    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::Uint(_) => "uint64",
            ConfigValue::Int(_) => "int64",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: HashMap<String, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma-separated `key=value` option string.
    pub fn parse(text: &str) -> KvResult<Self> {
        let mut config = Self::new();
        for item in text.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (key, value) = item.split_once('=').ok_or_else(|| {
                KvError::ConfigParsing(format!("option \"{item}\" is not of the form key=value"))
            })?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(KvError::ConfigParsing(format!(
                    "option \"{item}\" has an empty key"
                )));
            }
            if let Ok(n) = value.parse::<u64>() {
                config.put_uint64(key, n);
            } else if let Ok(n) = value.parse::<i64>() {
                config.put_int64(key, n);
            } else {
                config.put_string(key, value);
            }
        }
        Ok(config)
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries
            .insert(key.into(), ConfigValue::String(value.into()));
        self
    }

    pub fn put_uint64(&mut self, key: impl Into<String>, value: u64) -> &mut Self {
        self.entries.insert(key.into(), ConfigValue::Uint(value));
        self
    }

    pub fn put_int64(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.entries.insert(key.into(), ConfigValue::Int(value));
        self
    }

    pub fn get_string(&self, key: &str) -> KvResult<Option<&str>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(wrong_type(key, "string", other)),
        }
    }

    /// Reads an unsigned value; a non-negative int64 is accepted as well.
    pub fn get_uint64(&self, key: &str) -> KvResult<Option<u64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Uint(n)) => Ok(Some(*n)),
            Some(ConfigValue::Int(n)) if *n >= 0 => Ok(Some(*n as u64)),
            Some(other) => Err(wrong_type(key, "uint64", other)),
        }
    }

    pub fn get_int64(&self, key: &str) -> KvResult<Option<i64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(n)) => Ok(Some(*n)),
            Some(ConfigValue::Uint(n)) if *n <= i64::MAX as u64 => Ok(Some(*n as i64)),
            Some(other) => Err(wrong_type(key, "int64", other)),
        }
    }

    /// Pool file path; required for every persistent engine.
    pub fn path(&self) -> KvResult<PathBuf> {
        match self.get_string("path")? {
            Some(p) => Ok(PathBuf::from(p)),
            None => Err(KvError::InvalidArgument(
                "config does not contain \"path\"".into(),
            )),
        }
    }

    /// Pool size in bytes; only consulted when the pool is created.
    pub fn size(&self) -> KvResult<u64> {
        Ok(self.get_uint64("size")?.unwrap_or(DEFAULT_POOL_SIZE))
    }

    /// Nonzero `force_create` means: always (re)create the pool file.
    pub fn force_create(&self) -> KvResult<bool> {
        Ok(self.get_uint64("force_create")?.unwrap_or(0) != 0)
    }
}

fn wrong_type(key: &str, wanted: &str, got: &ConfigValue) -> KvError {
    KvError::ConfigType(format!(
        "option \"{key}\" holds a {} value, {wanted} requested",
        got.type_name()
    ))
}
