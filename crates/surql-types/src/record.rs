//! Table references and record identifiers.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::{Object, Value};

/// Reference to a whole table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table(String);

impl Table {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ident(f, &self.0)
    }
}

impl From<&str> for Table {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Table {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Key part of a record identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKey {
    Integer(i64),
    String(String),
    Uuid(Uuid),
    Array(Vec<Value>),
    Object(Object),
}

impl RecordKey {
    /// Convert a decoded value into a key, rejecting kinds a record id cannot hold.
    ///
    /// # Errors
    ///
    /// Returns the value back if it cannot be used as a key.
    pub fn try_from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Integer(n) => Ok(Self::Integer(n)),
            Value::String(s) => Ok(Self::String(s)),
            Value::Uuid(u) => Ok(Self::Uuid(u)),
            Value::Array(items) => Ok(Self::Array(items)),
            Value::Object(object) => Ok(Self::Object(object)),
            other => Err(other),
        }
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Integer(n) => Value::Integer(n),
            Self::String(s) => Value::String(s),
            Self::Uuid(u) => Value::Uuid(u),
            Self::Array(items) => Value::Array(items),
            Self::Object(object) => Value::Object(object),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for RecordKey {
    fn from(n: i32) -> Self {
        Self::Integer(n.into())
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Uuid> for RecordKey {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::String(s) => write_ident(f, s),
            Self::Uuid(u) => write!(f, "u'{u}'"),
            Self::Array(items) => Value::Array(items.clone()).fmt(f),
            Self::Object(object) => Value::Object(object.clone()).fmt(f),
        }
    }
}

/// Identifier of a single record: `table:key`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordId {
    pub table: String,
    pub key: RecordKey,
}

impl RecordId {
    #[must_use]
    pub fn new(table: impl Into<String>, key: impl Into<RecordKey>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ident(f, &self.table)?;
        write!(f, ":{}", self.key)
    }
}

/// Error parsing a `table:key` string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseRecordIdError {
    #[error("record id is missing the ':' separator: {0}")]
    MissingSeparator(String),

    #[error("record id has an empty table name: {0}")]
    EmptyTable(String),

    #[error("record id has an empty key: {0}")]
    EmptyKey(String),
}

impl FromStr for RecordId {
    type Err = ParseRecordIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((table, key)) = s.split_once(':') else {
            return Err(ParseRecordIdError::MissingSeparator(s.to_string()));
        };
        let table = strip_brackets(table);
        if table.is_empty() {
            return Err(ParseRecordIdError::EmptyTable(s.to_string()));
        }
        if key.is_empty() {
            return Err(ParseRecordIdError::EmptyKey(s.to_string()));
        }

        let key = if let Some(bracketed) = key.strip_prefix('⟨').and_then(|k| k.strip_suffix('⟩'))
        {
            RecordKey::String(bracketed.to_string())
        } else if let Ok(n) = key.parse::<i64>() {
            RecordKey::Integer(n)
        } else if let Some(uuid) = key
            .strip_prefix("u'")
            .and_then(|k| k.strip_suffix('\''))
            .and_then(|k| Uuid::parse_str(k).ok())
        {
            RecordKey::Uuid(uuid)
        } else {
            RecordKey::String(key.to_string())
        };

        Ok(Self {
            table: table.to_string(),
            key,
        })
    }
}

fn strip_brackets(s: &str) -> &str {
    s.strip_prefix('⟨')
        .and_then(|inner| inner.strip_suffix('⟩'))
        .unwrap_or(s)
}

fn is_plain_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.chars().all(|c| c.is_ascii_digit())
}

fn write_ident(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if is_plain_ident(s) {
        f.write_str(s)
    } else {
        write!(f, "⟨{}⟩", s.replace('⟩', "\\⟩"))
    }
}
