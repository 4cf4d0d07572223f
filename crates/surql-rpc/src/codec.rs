//! CBOR wire codec with the database's extended-type tags.
//!
//! Primitives map onto native CBOR major types. Domain values are written as
//! CBOR tagged items using the registry below, e.g. a record id is
//! `tag(8) [table, key]`.
//!
//! Decoding is bounded: nesting deeper than [`MAX_DEPTH`] is rejected, as are
//! truncated input, trailing bytes and malformed payloads for known tags. A tag
//! outside the registry is not an error: its inner item is decoded as a plain
//! value and a [`DecodeWarning`] is reported, so newer servers do not break
//! older clients.

use std::ops::Bound;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ciborium::Value as Cbor;
use surql_types::{
    Geometry, LineString, Object, Point, Polygon, Range, RecordId, RecordKey, Table, Value,
};
use uuid::Uuid;

/// Maximum nesting depth accepted when decoding
pub const MAX_DEPTH: usize = 128;

/// Extended type tag registry shared with the server.
pub mod tags {
    pub const DATETIME_TEXT: u64 = 0;
    pub const NONE: u64 = 6;
    pub const TABLE: u64 = 7;
    pub const RECORD_ID: u64 = 8;
    pub const UUID_TEXT: u64 = 9;
    pub const DECIMAL: u64 = 10;
    pub const DATETIME: u64 = 12;
    pub const DURATION: u64 = 14;
    pub const UUID: u64 = 37;
    pub const RANGE: u64 = 49;
    pub const BOUND_INCLUDED: u64 = 50;
    pub const BOUND_EXCLUDED: u64 = 51;
    pub const GEOMETRY_POINT: u64 = 88;
    pub const GEOMETRY_LINE: u64 = 89;
    pub const GEOMETRY_POLYGON: u64 = 90;
    pub const GEOMETRY_MULTIPOINT: u64 = 91;
    pub const GEOMETRY_MULTILINE: u64 = 92;
    pub const GEOMETRY_MULTIPOLYGON: u64 = 93;
    pub const GEOMETRY_COLLECTION: u64 = 94;
}

/// Errors that can occur while decoding a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message is truncated")]
    Truncated,

    #[error("malformed CBOR at byte {offset}")]
    Malformed { offset: usize },

    #[error("invalid CBOR: {0}")]
    Invalid(String),

    #[error("nesting exceeds the maximum depth of {MAX_DEPTH}")]
    DepthExceeded,

    #[error("{0} trailing bytes after the message")]
    TrailingBytes(usize),

    #[error("integer out of range: {0}")]
    IntegerOutOfRange(i128),

    #[error("map keys must be text, found {0}")]
    NonTextKey(&'static str),

    #[error("malformed payload for tag {tag}: {reason}")]
    InvalidTagPayload { tag: u64, reason: String },

    #[error("message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("I/O error while decoding: {0}")]
    Io(String),
}

/// Errors that can occur while encoding a value
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("non-finite float cannot be encoded: {0}")]
    NonFiniteFloat(f64),

    #[error("CBOR serialization failed: {0}")]
    Serialize(String),
}

/// Non-fatal findings reported while decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// A tag outside the registry; its inner item was decoded untagged
    UnknownTag { tag: u64 },
}

impl std::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeWarning::UnknownTag { tag } => write!(f, "unknown CBOR tag {tag}"),
        }
    }
}

/// A decoded value together with any warnings raised on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub warnings: Vec<DecodeWarning>,
}

/// Encode a value into its canonical CBOR bytes.
///
/// # Errors
///
/// Returns `EncodeError::NonFiniteFloat` if the value holds a NaN or infinity.
pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let cbor = to_cbor(value)?;
    let mut out = Vec::new();
    ciborium::ser::into_writer(&cbor, &mut out)
        .map_err(|e| EncodeError::Serialize(e.to_string()))?;
    Ok(out)
}

/// Decode one complete message, logging any warnings.
///
/// # Errors
///
/// Returns a `DecodeError` if the bytes are not exactly one well-formed value.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let decoded = decode_with_warnings(bytes)?;
    for warning in &decoded.warnings {
        tracing::warn!("Decoded message with {warning}; using the untagged value");
    }
    Ok(decoded.value)
}

/// Decode one complete message and return warnings to the caller.
///
/// # Errors
///
/// Returns a `DecodeError` if the bytes are not exactly one well-formed value.
pub fn decode_with_warnings(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    let mut reader = bytes;
    let cbor: Cbor = ciborium::de::from_reader_with_recursion_limit(&mut reader, MAX_DEPTH)
        .map_err(map_de_error)?;
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.len()));
    }

    let mut warnings = Vec::new();
    let value = from_cbor(cbor, 0, &mut warnings)?;
    Ok(Decoded { value, warnings })
}

/// Reject payloads above the configured maximum before decoding them.
///
/// # Errors
///
/// Returns `DecodeError::TooLarge` if `size` exceeds `max`.
pub fn check_size(size: usize, max: usize) -> Result<(), DecodeError> {
    if size > max {
        return Err(DecodeError::TooLarge { size, max });
    }
    Ok(())
}

fn map_de_error(err: ciborium::de::Error<std::io::Error>) -> DecodeError {
    match err {
        ciborium::de::Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            DecodeError::Truncated
        }
        ciborium::de::Error::Io(e) => DecodeError::Io(e.to_string()),
        ciborium::de::Error::Syntax(offset) => DecodeError::Malformed { offset },
        ciborium::de::Error::Semantic(_, msg) => DecodeError::Invalid(msg),
        ciborium::de::Error::RecursionLimitExceeded => DecodeError::DepthExceeded,
    }
}

// =============================================================================
// Encoding
// =============================================================================

fn tagged(tag: u64, inner: Cbor) -> Cbor {
    Cbor::Tag(tag, Box::new(inner))
}

fn int(n: impl Into<ciborium::value::Integer>) -> Cbor {
    Cbor::Integer(n.into())
}

fn to_cbor(value: &Value) -> Result<Cbor, EncodeError> {
    Ok(match value {
        Value::None => tagged(tags::NONE, Cbor::Null),
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(n) => int(*n),
        Value::Float(f) => float(*f)?,
        Value::Decimal(d) => tagged(tags::DECIMAL, Cbor::Text(d.clone())),
        Value::String(s) => Cbor::Text(s.clone()),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Array(items) => Cbor::Array(items.iter().map(to_cbor).collect::<Result<_, _>>()?),
        Value::Object(object) => object_to_cbor(object)?,
        Value::Datetime(dt) => tagged(
            tags::DATETIME,
            Cbor::Array(vec![int(dt.timestamp()), int(dt.timestamp_subsec_nanos())]),
        ),
        Value::Duration(d) => tagged(
            tags::DURATION,
            Cbor::Array(vec![int(d.as_secs()), int(d.subsec_nanos())]),
        ),
        Value::Uuid(u) => tagged(tags::UUID, Cbor::Bytes(u.as_bytes().to_vec())),
        Value::Table(t) => tagged(tags::TABLE, Cbor::Text(t.name().to_string())),
        Value::RecordId(id) => tagged(
            tags::RECORD_ID,
            Cbor::Array(vec![Cbor::Text(id.table.clone()), key_to_cbor(&id.key)?]),
        ),
        Value::Range(range) => tagged(
            tags::RANGE,
            Cbor::Array(vec![bound_to_cbor(&range.begin)?, bound_to_cbor(&range.end)?]),
        ),
        Value::Geometry(geometry) => geometry_to_cbor(geometry)?,
    })
}

fn float(f: f64) -> Result<Cbor, EncodeError> {
    if !f.is_finite() {
        return Err(EncodeError::NonFiniteFloat(f));
    }
    Ok(Cbor::Float(f))
}

fn object_to_cbor(object: &Object) -> Result<Cbor, EncodeError> {
    let entries = object
        .iter()
        .map(|(k, v)| Ok((Cbor::Text(k.to_string()), to_cbor(v)?)))
        .collect::<Result<Vec<_>, EncodeError>>()?;
    Ok(Cbor::Map(entries))
}

fn key_to_cbor(key: &RecordKey) -> Result<Cbor, EncodeError> {
    match key {
        RecordKey::Integer(n) => Ok(int(*n)),
        RecordKey::String(s) => Ok(Cbor::Text(s.clone())),
        RecordKey::Uuid(u) => Ok(tagged(tags::UUID, Cbor::Bytes(u.as_bytes().to_vec()))),
        RecordKey::Array(items) => Ok(Cbor::Array(
            items.iter().map(to_cbor).collect::<Result<_, _>>()?,
        )),
        RecordKey::Object(object) => object_to_cbor(object),
    }
}

fn bound_to_cbor(bound: &Bound<Value>) -> Result<Cbor, EncodeError> {
    Ok(match bound {
        Bound::Included(v) => tagged(tags::BOUND_INCLUDED, to_cbor(v)?),
        Bound::Excluded(v) => tagged(tags::BOUND_EXCLUDED, to_cbor(v)?),
        Bound::Unbounded => Cbor::Null,
    })
}

fn point_to_cbor(point: Point) -> Result<Cbor, EncodeError> {
    Ok(tagged(
        tags::GEOMETRY_POINT,
        Cbor::Array(vec![float(point.x)?, float(point.y)?]),
    ))
}

fn line_to_cbor(line: &LineString) -> Result<Cbor, EncodeError> {
    Ok(tagged(
        tags::GEOMETRY_LINE,
        Cbor::Array(line.0.iter().map(|p| point_to_cbor(*p)).collect::<Result<_, _>>()?),
    ))
}

fn polygon_to_cbor(polygon: &Polygon) -> Result<Cbor, EncodeError> {
    Ok(tagged(
        tags::GEOMETRY_POLYGON,
        Cbor::Array(polygon.0.iter().map(line_to_cbor).collect::<Result<_, _>>()?),
    ))
}

fn geometry_to_cbor(geometry: &Geometry) -> Result<Cbor, EncodeError> {
    match geometry {
        Geometry::Point(p) => point_to_cbor(*p),
        Geometry::Line(line) => line_to_cbor(line),
        Geometry::Polygon(polygon) => polygon_to_cbor(polygon),
        Geometry::MultiPoint(points) => Ok(tagged(
            tags::GEOMETRY_MULTIPOINT,
            Cbor::Array(points.iter().map(|p| point_to_cbor(*p)).collect::<Result<_, _>>()?),
        )),
        Geometry::MultiLine(lines) => Ok(tagged(
            tags::GEOMETRY_MULTILINE,
            Cbor::Array(lines.iter().map(line_to_cbor).collect::<Result<_, _>>()?),
        )),
        Geometry::MultiPolygon(polygons) => Ok(tagged(
            tags::GEOMETRY_MULTIPOLYGON,
            Cbor::Array(polygons.iter().map(polygon_to_cbor).collect::<Result<_, _>>()?),
        )),
        Geometry::Collection(items) => Ok(tagged(
            tags::GEOMETRY_COLLECTION,
            Cbor::Array(items.iter().map(geometry_to_cbor).collect::<Result<_, _>>()?),
        )),
    }
}

// =============================================================================
// Decoding
// =============================================================================

fn cbor_kind(cbor: &Cbor) -> &'static str {
    match cbor {
        Cbor::Integer(_) => "integer",
        Cbor::Bytes(_) => "bytes",
        Cbor::Float(_) => "float",
        Cbor::Text(_) => "text",
        Cbor::Bool(_) => "bool",
        Cbor::Null => "null",
        Cbor::Tag(..) => "tag",
        Cbor::Array(_) => "array",
        Cbor::Map(_) => "map",
        _ => "unknown item",
    }
}

fn from_cbor(
    cbor: Cbor,
    depth: usize,
    warnings: &mut Vec<DecodeWarning>,
) -> Result<Value, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded);
    }

    match cbor {
        Cbor::Null => Ok(Value::Null),
        Cbor::Bool(b) => Ok(Value::Bool(b)),
        Cbor::Integer(i) => {
            let wide = i128::from(i);
            i64::try_from(wide)
                .map(Value::Integer)
                .map_err(|_| DecodeError::IntegerOutOfRange(wide))
        }
        Cbor::Float(f) => Ok(Value::Float(f)),
        Cbor::Text(s) => Ok(Value::String(s)),
        Cbor::Bytes(b) => Ok(Value::Bytes(b)),
        Cbor::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| from_cbor(item, depth + 1, warnings))
                .collect::<Result<_, _>>()?,
        )),
        Cbor::Map(entries) => {
            let mut object = Object::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match key {
                    Cbor::Text(key) => key,
                    other => return Err(DecodeError::NonTextKey(cbor_kind(&other))),
                };
                object.insert(key, from_cbor(value, depth + 1, warnings)?);
            }
            Ok(Value::Object(object))
        }
        Cbor::Tag(tag, inner) => from_tagged(tag, *inner, depth + 1, warnings),
        other => Err(DecodeError::Invalid(format!(
            "unsupported CBOR item: {}",
            cbor_kind(&other)
        ))),
    }
}

fn bad_payload(tag: u64, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidTagPayload {
        tag,
        reason: reason.into(),
    }
}

fn expect_text(tag: u64, cbor: Cbor) -> Result<String, DecodeError> {
    match cbor {
        Cbor::Text(s) => Ok(s),
        other => Err(bad_payload(
            tag,
            format!("expected text, found {}", cbor_kind(&other)),
        )),
    }
}

fn expect_array(tag: u64, cbor: Cbor) -> Result<Vec<Cbor>, DecodeError> {
    match cbor {
        Cbor::Array(items) => Ok(items),
        other => Err(bad_payload(
            tag,
            format!("expected array, found {}", cbor_kind(&other)),
        )),
    }
}

fn expect_int<T: TryFrom<i128>>(tag: u64, cbor: &Cbor) -> Result<T, DecodeError> {
    match cbor {
        Cbor::Integer(i) => {
            T::try_from(i128::from(*i)).map_err(|_| bad_payload(tag, "integer out of range"))
        }
        other => Err(bad_payload(
            tag,
            format!("expected integer, found {}", cbor_kind(other)),
        )),
    }
}

/// `[seconds, nanos]` with trailing elements optional.
fn seconds_nanos<S: TryFrom<i128> + Default>(tag: u64, inner: Cbor) -> Result<(S, u32), DecodeError> {
    let parts = expect_array(tag, inner)?;
    if parts.len() > 2 {
        return Err(bad_payload(tag, "expected at most two elements"));
    }
    let secs: S = parts.first().map_or(Ok(S::default()), |c| expect_int(tag, c))?;
    let nanos: u32 = parts.get(1).map_or(Ok(0), |c| expect_int(tag, c))?;
    if nanos >= 1_000_000_000 {
        return Err(bad_payload(tag, "nanoseconds out of range"));
    }
    Ok((secs, nanos))
}

fn from_tagged(
    tag: u64,
    inner: Cbor,
    depth: usize,
    warnings: &mut Vec<DecodeWarning>,
) -> Result<Value, DecodeError> {
    match tag {
        tags::NONE => Ok(Value::None),
        tags::TABLE => Ok(Value::Table(Table::new(expect_text(tag, inner)?))),
        tags::RECORD_ID => decode_record_id(inner, depth, warnings).map(Value::RecordId),
        tags::DECIMAL => Ok(Value::Decimal(expect_text(tag, inner)?)),
        tags::DATETIME_TEXT => {
            let text = expect_text(tag, inner)?;
            DateTime::parse_from_rfc3339(&text)
                .map(|dt| Value::Datetime(dt.with_timezone(&Utc)))
                .map_err(|e| bad_payload(tag, e.to_string()))
        }
        tags::DATETIME => {
            let (secs, nanos) = seconds_nanos::<i64>(tag, inner)?;
            DateTime::from_timestamp(secs, nanos)
                .map(Value::Datetime)
                .ok_or_else(|| bad_payload(tag, "timestamp out of range"))
        }
        tags::DURATION => {
            let (secs, nanos) = seconds_nanos::<u64>(tag, inner)?;
            Ok(Value::Duration(Duration::new(secs, nanos)))
        }
        tags::UUID => decode_uuid(inner).map(Value::Uuid),
        tags::UUID_TEXT => {
            let text = expect_text(tag, inner)?;
            Uuid::parse_str(&text)
                .map(Value::Uuid)
                .map_err(|e| bad_payload(tag, e.to_string()))
        }
        tags::RANGE => {
            let mut parts = expect_array(tag, inner)?;
            if parts.len() != 2 {
                return Err(bad_payload(tag, "expected [begin, end]"));
            }
            let end = decode_bound(parts.pop().unwrap_or(Cbor::Null), depth, warnings)?;
            let begin = decode_bound(parts.pop().unwrap_or(Cbor::Null), depth, warnings)?;
            Ok(Value::from(Range::new(begin, end)))
        }
        tags::GEOMETRY_POINT..=tags::GEOMETRY_COLLECTION => {
            decode_geometry(tag, inner, depth).map(Value::Geometry)
        }
        _ => {
            warnings.push(DecodeWarning::UnknownTag { tag });
            from_cbor(inner, depth, warnings)
        }
    }
}

fn decode_uuid(inner: Cbor) -> Result<Uuid, DecodeError> {
    match inner {
        Cbor::Bytes(bytes) => {
            Uuid::from_slice(&bytes).map_err(|e| bad_payload(tags::UUID, e.to_string()))
        }
        other => Err(bad_payload(
            tags::UUID,
            format!("expected 16 bytes, found {}", cbor_kind(&other)),
        )),
    }
}

fn decode_record_id(
    inner: Cbor,
    depth: usize,
    warnings: &mut Vec<DecodeWarning>,
) -> Result<RecordId, DecodeError> {
    let tag = tags::RECORD_ID;
    match inner {
        Cbor::Text(text) => text.parse().map_err(|e| bad_payload(tag, format!("{e}"))),
        Cbor::Array(parts) => {
            let [table, key]: [Cbor; 2] = parts
                .try_into()
                .map_err(|_| bad_payload(tag, "expected [table, key]"))?;
            let table = expect_text(tag, table)?;
            let key = RecordKey::try_from_value(from_cbor(key, depth, warnings)?)
                .map_err(|v| bad_payload(tag, format!("{} cannot be a record key", v.kind())))?;
            Ok(RecordId { table, key })
        }
        other => Err(bad_payload(
            tag,
            format!("expected array or text, found {}", cbor_kind(&other)),
        )),
    }
}

fn decode_bound(
    cbor: Cbor,
    depth: usize,
    warnings: &mut Vec<DecodeWarning>,
) -> Result<Bound<Value>, DecodeError> {
    match cbor {
        Cbor::Null => Ok(Bound::Unbounded),
        Cbor::Tag(tags::BOUND_INCLUDED, v) => Ok(Bound::Included(from_cbor(*v, depth, warnings)?)),
        Cbor::Tag(tags::BOUND_EXCLUDED, v) => Ok(Bound::Excluded(from_cbor(*v, depth, warnings)?)),
        other => Err(bad_payload(
            tags::RANGE,
            format!("invalid bound: {}", cbor_kind(&other)),
        )),
    }
}

fn coordinate(cbor: &Cbor) -> Result<f64, DecodeError> {
    match cbor {
        Cbor::Float(f) => Ok(*f),
        #[allow(clippy::cast_precision_loss)] // coordinates sent as integers are small
        Cbor::Integer(i) => Ok(i128::from(*i) as f64),
        other => Err(bad_payload(
            tags::GEOMETRY_POINT,
            format!("expected number, found {}", cbor_kind(other)),
        )),
    }
}

/// Unwrap a geometry member that must carry `tag`.
fn untag(expected: u64, cbor: Cbor) -> Result<Cbor, DecodeError> {
    match cbor {
        Cbor::Tag(tag, inner) if tag == expected => Ok(*inner),
        other => Err(bad_payload(
            expected,
            format!("expected tag {expected}, found {}", cbor_kind(&other)),
        )),
    }
}

fn decode_point(inner: Cbor) -> Result<Point, DecodeError> {
    let coords = expect_array(tags::GEOMETRY_POINT, inner)?;
    let [x, y] = coords.as_slice() else {
        return Err(bad_payload(tags::GEOMETRY_POINT, "expected [x, y]"));
    };
    Ok(Point::new(coordinate(x)?, coordinate(y)?))
}

fn decode_line(inner: Cbor) -> Result<LineString, DecodeError> {
    expect_array(tags::GEOMETRY_LINE, inner)?
        .into_iter()
        .map(|p| decode_point(untag(tags::GEOMETRY_POINT, p)?))
        .collect::<Result<_, _>>()
        .map(LineString)
}

fn decode_polygon(inner: Cbor) -> Result<Polygon, DecodeError> {
    expect_array(tags::GEOMETRY_POLYGON, inner)?
        .into_iter()
        .map(|l| decode_line(untag(tags::GEOMETRY_LINE, l)?))
        .collect::<Result<_, _>>()
        .map(Polygon)
}

fn decode_geometry(tag: u64, inner: Cbor, depth: usize) -> Result<Geometry, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded);
    }

    Ok(match tag {
        tags::GEOMETRY_POINT => Geometry::Point(decode_point(inner)?),
        tags::GEOMETRY_LINE => Geometry::Line(decode_line(inner)?),
        tags::GEOMETRY_POLYGON => Geometry::Polygon(decode_polygon(inner)?),
        tags::GEOMETRY_MULTIPOINT => Geometry::MultiPoint(
            expect_array(tag, inner)?
                .into_iter()
                .map(|p| decode_point(untag(tags::GEOMETRY_POINT, p)?))
                .collect::<Result<_, _>>()?,
        ),
        tags::GEOMETRY_MULTILINE => Geometry::MultiLine(
            expect_array(tag, inner)?
                .into_iter()
                .map(|l| decode_line(untag(tags::GEOMETRY_LINE, l)?))
                .collect::<Result<_, _>>()?,
        ),
        tags::GEOMETRY_MULTIPOLYGON => Geometry::MultiPolygon(
            expect_array(tag, inner)?
                .into_iter()
                .map(|p| decode_polygon(untag(tags::GEOMETRY_POLYGON, p)?))
                .collect::<Result<_, _>>()?,
        ),
        _ => Geometry::Collection(
            expect_array(tag, inner)?
                .into_iter()
                .map(|item| match item {
                    Cbor::Tag(t, inner) if (tags::GEOMETRY_POINT..=tags::GEOMETRY_COLLECTION).contains(&t) => {
                        decode_geometry(t, *inner, depth + 1)
                    }
                    other => Err(bad_payload(
                        tags::GEOMETRY_COLLECTION,
                        format!("expected geometry, found {}", cbor_kind(&other)),
                    )),
                })
                .collect::<Result<_, _>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        decode(&encode(value).unwrap()).unwrap()
    }

    #[test]
    fn test_record_id_wire_layout() {
        let bytes = encode(&Value::from(RecordId::new("person", 1))).unwrap();
        // tag(8), array(2), text(6) "person", unsigned(1)
        let mut expected = vec![0xC8, 0x82, 0x66];
        expected.extend_from_slice(b"person");
        expected.push(0x01);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_table_wire_layout() {
        let bytes = encode(&Value::from(Table::new("user"))).unwrap();
        assert_eq!(bytes, [0xC7, 0x64, b'u', b's', b'e', b'r']);
    }

    #[test]
    fn test_none_and_null_are_distinct() {
        assert_eq!(encode(&Value::Null).unwrap(), [0xF6]);
        assert_eq!(encode(&Value::None).unwrap(), [0xC6, 0xF6]);
        assert_eq!(roundtrip(&Value::None), Value::None);
        assert_eq!(roundtrip(&Value::Null), Value::Null);
    }

    #[test]
    fn test_uuid_encodes_as_bytes() {
        let id = Uuid::new_v4();
        let bytes = encode(&Value::Uuid(id)).unwrap();
        // tag(37) is two bytes (0xD8 0x25), then bytes(16)
        assert_eq!(&bytes[..3], &[0xD8, 0x25, 0x50]);
        assert_eq!(roundtrip(&Value::Uuid(id)), Value::Uuid(id));
    }

    #[test]
    fn test_uuid_text_tag_decodes() {
        let id = Uuid::new_v4();
        let cbor = tagged(tags::UUID_TEXT, Cbor::Text(id.to_string()));
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();
        assert_eq!(decode(&bytes).unwrap(), Value::Uuid(id));
    }

    #[test]
    fn test_datetime_text_tag_decodes() {
        let cbor = tagged(tags::DATETIME_TEXT, Cbor::Text("2024-03-01T12:30:00Z".into()));
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();

        let expected = DateTime::parse_from_rfc3339("2024-03-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(decode(&bytes).unwrap(), Value::Datetime(expected));
    }

    #[test]
    fn test_datetime_roundtrip_keeps_nanos() {
        let dt = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(roundtrip(&Value::Datetime(dt)), Value::Datetime(dt));
    }

    #[test]
    fn test_short_duration_arrays_decode() {
        let empty = tagged(tags::DURATION, Cbor::Array(vec![]));
        let secs_only = tagged(tags::DURATION, Cbor::Array(vec![int(90)]));
        for (cbor, expected) in [
            (empty, Duration::ZERO),
            (secs_only, Duration::from_secs(90)),
        ] {
            let mut bytes = Vec::new();
            ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();
            assert_eq!(decode(&bytes).unwrap(), Value::Duration(expected));
        }
    }

    #[test]
    fn test_time_arrays_reject_extra_elements() {
        for tag in [tags::DATETIME, tags::DURATION] {
            let cbor = tagged(tag, Cbor::Array(vec![int(1), int(2), int(3)]));
            let mut bytes = Vec::new();
            ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();
            assert!(
                matches!(decode(&bytes), Err(DecodeError::InvalidTagPayload { tag: t, .. }) if t == tag),
                "tag {tag} accepted three elements"
            );
        }
    }

    #[test]
    fn test_duration_nanos_out_of_range_rejected() {
        let cbor = tagged(tags::DURATION, Cbor::Array(vec![int(u64::MAX), int(2_000_000_000)]));
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::InvalidTagPayload { tag: 14, .. })
        ));
    }

    #[test]
    fn test_wide_map_decodes_in_linear_time() {
        let object: Object = (0..100_000).map(|i| (format!("k{i}"), 1)).collect();
        let bytes = encode(&Value::Object(object)).unwrap();

        let started = std::time::Instant::now();
        let decoded = decode(&bytes).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(decoded.as_object().map(Object::len), Some(100_000));
        assert_eq!(decoded.get("k99999"), Some(&Value::Integer(1)));
        assert!(elapsed < Duration::from_secs(5), "decoding took {elapsed:?}");
    }

    #[test]
    fn test_record_id_text_form_decodes() {
        let cbor = tagged(tags::RECORD_ID, Cbor::Text("person:tobie".into()));
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();
        assert_eq!(
            decode(&bytes).unwrap(),
            Value::from(RecordId::new("person", "tobie"))
        );
    }

    #[test]
    fn test_record_id_with_invalid_key_fails() {
        let cbor = tagged(
            tags::RECORD_ID,
            Cbor::Array(vec![Cbor::Text("person".into()), Cbor::Bool(true)]),
        );
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::InvalidTagPayload { tag: 8, .. })
        ));
    }

    #[test]
    fn test_unknown_tag_yields_inner_value_with_warning() {
        let cbor = tagged(4000, Cbor::Text("future".into()));
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();

        let decoded = decode_with_warnings(&bytes).unwrap();
        assert_eq!(decoded.value, Value::from("future"));
        assert_eq!(decoded.warnings, vec![DecodeWarning::UnknownTag { tag: 4000 }]);
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode(&Value::from("hello world")).unwrap();
        assert_eq!(
            decode(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Truncated)
        );
        assert_eq!(decode(&[]), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Value::Integer(1)).unwrap();
        bytes.push(0x00);
        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_nesting_beyond_limit_rejected() {
        // 200 nested single-element arrays around an integer
        let mut bytes = vec![0x81; 200];
        bytes.push(0x00);
        assert_eq!(decode(&bytes), Err(DecodeError::DepthExceeded));
    }

    #[test]
    fn test_nesting_within_limit_accepted() {
        let mut bytes = vec![0x81; 32];
        bytes.push(0x00);
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn test_non_text_map_key_rejected() {
        // map(1) { 1: 2 }
        assert_eq!(
            decode(&[0xA1, 0x01, 0x02]),
            Err(DecodeError::NonTextKey("integer"))
        );
    }

    #[test]
    fn test_integer_out_of_range() {
        // unsigned 2^64 - 1
        let bytes = [0x1B, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::IntegerOutOfRange(_))
        ));
    }

    #[test]
    fn test_non_finite_float_rejected() {
        assert!(matches!(
            encode(&Value::Float(f64::NAN)),
            Err(EncodeError::NonFiniteFloat(_))
        ));
        let nested = Value::Array(vec![Value::Float(f64::INFINITY)]);
        assert!(encode(&nested).is_err());
    }

    #[test]
    fn test_range_bounds() {
        let range = Range::new(Bound::Included(1.into()), Bound::Excluded(10.into()));
        assert_eq!(roundtrip(&Value::from(range.clone())), Value::from(range));

        let open = Range::new(Bound::Unbounded, Bound::Included("z".into()));
        assert_eq!(roundtrip(&Value::from(open.clone())), Value::from(open));
    }

    #[test]
    fn test_geometry_polygon_roundtrip() {
        let ring = LineString(vec![
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 0.0),
        ]);
        let geometry = Geometry::Collection(vec![
            Geometry::Polygon(Polygon(vec![ring.clone()])),
            Geometry::MultiPoint(vec![Point::new(1.5, -3.25)]),
            Geometry::MultiLine(vec![ring]),
        ]);
        assert_eq!(
            roundtrip(&Value::Geometry(geometry.clone())),
            Value::Geometry(geometry)
        );
    }

    #[test]
    fn test_geometry_member_must_be_tagged() {
        // line whose member is a bare [x, y] instead of tag(88)
        let cbor = tagged(
            tags::GEOMETRY_LINE,
            Cbor::Array(vec![Cbor::Array(vec![Cbor::Float(1.0), Cbor::Float(2.0)])]),
        );
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&cbor, &mut bytes).unwrap();
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::InvalidTagPayload { .. })
        ));
    }

    #[test]
    fn test_object_key_order_preserved_on_encode() {
        let object: Object = [("b", 1), ("a", 2)].into_iter().collect();
        let bytes = encode(&Value::Object(object)).unwrap();
        // map(2), "b", 1, "a", 2
        assert_eq!(bytes, [0xA2, 0x61, b'b', 0x01, 0x61, b'a', 0x02]);
    }

    #[test]
    fn test_check_size() {
        assert!(check_size(10, 10).is_ok());
        assert_eq!(
            check_size(11, 10),
            Err(DecodeError::TooLarge { size: 11, max: 10 })
        );
    }
}
