//! Extended value model for the surql driver.
//!
//! This crate defines the values exchanged with the database: the usual
//! primitives plus the domain types the server understands natively (record
//! identifiers, table references, datetimes, durations, UUIDs, ranges and
//! geometries). Every value has a lossless wire representation; the codec that
//! produces it lives in `surql-rpc`.

use std::fmt;
use std::ops::Bound;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

mod geometry;
mod json;
mod object;
mod record;

pub use geometry::{Geometry, LineString, Point, Polygon};
pub use object::Object;
pub use record::{ParseRecordIdError, RecordId, RecordKey, Table};

/// A value as stored by, or sent to, the database.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The database's `NONE`: the absence of a value
    #[default]
    None,
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Arbitrary-precision decimal kept in its canonical text form
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(Object),
    Datetime(DateTime<Utc>),
    Duration(Duration),
    Uuid(Uuid),
    Table(Table),
    RecordId(RecordId),
    Range(Box<Range>),
    Geometry(Geometry),
}

/// Range between two values, each end optionally bounded.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub begin: Bound<Value>,
    pub end: Bound<Value>,
}

impl Range {
    #[must_use]
    pub fn new(begin: Bound<Value>, end: Bound<Value>) -> Self {
        Self { begin, end }
    }
}

impl Value {
    /// Stable lowercase name of this value's kind, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Datetime(_) => "datetime",
            Value::Duration(_) => "duration",
            Value::Uuid(_) => "uuid",
            Value::Table(_) => "table",
            Value::RecordId(_) => "record id",
            Value::Range(_) => "range",
            Value::Geometry(_) => "geometry",
        }
    }

    /// True for `NONE` and `NULL`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::None | Value::Null)
    }

    /// Whether every float inside this value is finite.
    ///
    /// Non-finite floats have no canonical wire form, so the request builder
    /// refuses them before anything is encoded.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::Array(items) => items.iter().all(Value::is_finite),
            Value::Object(object) => object.iter().all(|(_, v)| v.is_finite()),
            Value::RecordId(id) => match &id.key {
                RecordKey::Array(items) => items.iter().all(Value::is_finite),
                RecordKey::Object(object) => object.iter().all(|(_, v)| v.is_finite()),
                _ => true,
            },
            Value::Range(range) => bound_is_finite(&range.begin) && bound_is_finite(&range.end),
            Value::Geometry(geometry) => geometry.points().all(|p| p.x.is_finite() && p.y.is_finite()),
            _ => true,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// UUID held directly or as UUID text.
    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            Value::String(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }

    /// Look up a field when this value is an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|object| object.get(key))
    }
}

fn bound_is_finite(bound: &Bound<Value>) -> bool {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => v.is_finite(),
        Bound::Unbounded => true,
    }
}

/// Render a duration the way the database prints it, e.g. `1h30m` or `1s500ms`.
#[must_use]
pub fn format_duration(duration: &Duration) -> String {
    const UNITS: [(u64, &str); 5] = [
        (7 * 24 * 3600, "w"),
        (24 * 3600, "d"),
        (3600, "h"),
        (60, "m"),
        (1, "s"),
    ];

    let mut secs = duration.as_secs();
    let mut nanos = u64::from(duration.subsec_nanos());
    let mut out = String::new();

    for (size, unit) in UNITS {
        if secs >= size {
            out.push_str(&format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    for (size, unit) in [(1_000_000, "ms"), (1_000, "µs"), (1, "ns")] {
        if nanos >= size {
            out.push_str(&format!("{}{unit}", nanos / size));
            nanos %= size;
        }
    }

    if out.is_empty() {
        out.push_str("0ns");
    }
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("NONE"),
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}f"),
            Value::Decimal(d) => write!(f, "{d}dec"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(bytes) => {
                f.write_str("b\"")?;
                for byte in bytes {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str("\"")
            }
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(object) => {
                f.write_str("{ ")?;
                for (i, (key, value)) in object.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str(" }")
            }
            Value::Datetime(dt) => write!(f, "d'{}'", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Duration(d) => f.write_str(&format_duration(d)),
            Value::Uuid(u) => write!(f, "u'{u}'"),
            Value::Table(t) => write!(f, "{t}"),
            Value::RecordId(id) => write!(f, "{id}"),
            Value::Range(range) => {
                match &range.begin {
                    Bound::Included(v) => write!(f, "{v}")?,
                    Bound::Excluded(v) => write!(f, "{v}>")?,
                    Bound::Unbounded => {}
                }
                f.write_str("..")?;
                match &range.end {
                    Bound::Included(v) => write!(f, "={v}"),
                    Bound::Excluded(v) => write!(f, "{v}"),
                    Bound::Unbounded => Ok(()),
                }
            }
            Value::Geometry(geometry) => write!(f, "{}({} points)", geometry.kind(), geometry.points().count()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Float,
    String => String,
    &str => String,
    Vec<Value> => Array,
    Vec<u8> => Bytes,
    Object => Object,
    DateTime<Utc> => Datetime,
    Duration => Duration,
    Uuid => Uuid,
    Table => Table,
    RecordId => RecordId,
    Geometry => Geometry,
}

impl From<Range> for Value {
    fn from(range: Range) -> Self {
        Value::Range(Box::new(range))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::None, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::None.kind(), "none");
        assert_eq!(Value::from(42).kind(), "integer");
        assert_eq!(Value::from("x").kind(), "string");
        assert_eq!(Value::from(RecordId::new("a", 1)).kind(), "record id");
        assert_eq!(Value::from(Table::new("a")).kind(), "table");
    }

    #[test]
    fn test_is_finite_recurses() {
        let mut object = Object::new();
        object.insert("nested", Value::Array(vec![Value::Float(f64::NAN)]));
        assert!(!Value::Object(object).is_finite());

        let range = Range::new(Bound::Included(Value::Float(1.0)), Bound::Unbounded);
        assert!(Value::from(range).is_finite());

        let point = Geometry::Point(Point::new(f64::INFINITY, 0.0));
        assert!(!Value::from(point).is_finite());
    }

    #[test]
    fn test_as_uuid_accepts_text() {
        let id = Uuid::new_v4();
        assert_eq!(Value::from(id.to_string()).as_uuid(), Some(id));
        assert_eq!(Value::from(id).as_uuid(), Some(id));
        assert_eq!(Value::from("nope").as_uuid(), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(&Duration::from_millis(1500)), "1s500ms");
        assert_eq!(format_duration(&Duration::ZERO), "0ns");
        assert_eq!(format_duration(&Duration::from_secs(8 * 86400)), "1w1d");
    }

    #[test]
    fn test_display_range() {
        let range = Range::new(Bound::Excluded(1.into()), Bound::Included(5.into()));
        assert_eq!(Value::from(range).to_string(), "1>..=5");

        let open = Range::new(Bound::Unbounded, Bound::Excluded(3.into()));
        assert_eq!(Value::from(open).to_string(), "..3");
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::None);
        assert_eq!(Value::from(Some("a")), Value::String("a".to_string()));
    }
}
