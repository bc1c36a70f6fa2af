//! Runtime values flowing between the wire and the translator/executor
//! (spec.md §4.2). A `Value` always carries its PostgreSQL type alongside
//! the data, since the same Rust type (e.g. `String`) can serialize
//! differently depending on whether it's `text` or `varchar`.

use byteorder::{BigEndian, ByteOrder};
use common::error::{GatewayError, Result};

use crate::format::Format;
use crate::numeric;
use crate::types::Type;

/// A single column or parameter value, already resolved to a PostgreSQL
/// type. `Value::Null` stands in for SQL NULL independent of type, matching
/// how the wire protocol signals NULL with a length of -1 regardless of the
/// column's declared OID.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Varchar(String),
    Numeric(String),
    Date(i32),
    Timestamp(i64),
    TimestampTz(i64),
    Vector(Vec<f32>),
}

impl Value {
    pub fn pg_type(&self) -> Option<Type> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => Type::Bool,
            Value::Int2(_) => Type::Int2,
            Value::Int4(_) => Type::Int4,
            Value::Int8(_) => Type::Int8,
            Value::Float4(_) => Type::Float4,
            Value::Float8(_) => Type::Float8,
            Value::Text(_) => Type::Text,
            Value::Varchar(_) => Type::Varchar,
            Value::Numeric(_) => Type::Numeric,
            Value::Date(_) => Type::Date,
            Value::Timestamp(_) => Type::Timestamp,
            Value::TimestampTz(_) => Type::TimestampTz,
            Value::Vector(_) => Type::Vector,
        })
    }

    /// Encodes this value for the wire. Returns `None` for NULL, which the
    /// caller writes as a length of `-1` with no trailing bytes.
    pub fn encode(&self, format: Format) -> Result<Option<Vec<u8>>> {
        let bytes = match (self, format) {
            (Value::Null, _) => return Ok(None),
            (Value::Bool(b), Format::Text) => if *b { b"t".to_vec() } else { b"f".to_vec() },
            (Value::Bool(b), Format::Binary) => vec![*b as u8],
            (Value::Int2(n), Format::Text) => n.to_string().into_bytes(),
            (Value::Int2(n), Format::Binary) => n.to_be_bytes().to_vec(),
            (Value::Int4(n), Format::Text) => n.to_string().into_bytes(),
            (Value::Int4(n), Format::Binary) => n.to_be_bytes().to_vec(),
            (Value::Int8(n), Format::Text) => n.to_string().into_bytes(),
            (Value::Int8(n), Format::Binary) => n.to_be_bytes().to_vec(),
            (Value::Float4(f), Format::Text) => format_float32(*f).into_bytes(),
            (Value::Float4(f), Format::Binary) => f.to_be_bytes().to_vec(),
            (Value::Float8(f), Format::Text) => format_float64(*f).into_bytes(),
            (Value::Float8(f), Format::Binary) => f.to_be_bytes().to_vec(),
            (Value::Text(s), _) | (Value::Varchar(s), _) => s.clone().into_bytes(),
            (Value::Numeric(s), Format::Text) => s.clone().into_bytes(),
            (Value::Numeric(s), Format::Binary) => numeric::encode_binary(s)?,
            (Value::Date(days), Format::Text) => crate::iris::pg_days_to_iso_date(*days).into_bytes(),
            (Value::Date(days), Format::Binary) => days.to_be_bytes().to_vec(),
            (Value::Timestamp(micros), Format::Text) => format_timestamp_text(*micros, false).into_bytes(),
            (Value::Timestamp(micros), Format::Binary) => micros.to_be_bytes().to_vec(),
            (Value::TimestampTz(micros), Format::Text) => format_timestamp_text(*micros, true).into_bytes(),
            (Value::TimestampTz(micros), Format::Binary) => micros.to_be_bytes().to_vec(),
            (Value::Vector(v), Format::Text) => format_vector_text(v).into_bytes(),
            (Value::Vector(v), Format::Binary) => encode_vector_binary(v),
        };
        Ok(Some(bytes))
    }

    /// Decodes a parameter value received from a Bind message into a typed
    /// `Value`. `raw` is `None` for SQL NULL.
    pub fn decode(ty: Type, format: Format, raw: Option<&[u8]>) -> Result<Value> {
        let Some(bytes) = raw else {
            return Ok(Value::Null);
        };
        Ok(match (ty, format) {
            (Type::Bool, Format::Text) => Value::Bool(parse_text_bool(bytes)?),
            (Type::Bool, Format::Binary) => {
                Value::Bool(*single_byte(bytes)? != 0)
            }
            (Type::Int2, Format::Text) => Value::Int2(parse_text(bytes)?),
            (Type::Int2, Format::Binary) => Value::Int2(read_be::<2, i16>(bytes, BigEndian::read_i16)?),
            (Type::Int4, Format::Text) => Value::Int4(parse_text(bytes)?),
            (Type::Int4, Format::Binary) => Value::Int4(read_be::<4, i32>(bytes, BigEndian::read_i32)?),
            (Type::Int8, Format::Text) => Value::Int8(parse_text(bytes)?),
            (Type::Int8, Format::Binary) => Value::Int8(read_be::<8, i64>(bytes, BigEndian::read_i64)?),
            (Type::Float4, Format::Text) => Value::Float4(parse_text(bytes)?),
            (Type::Float4, Format::Binary) => Value::Float4(read_be::<4, f32>(bytes, BigEndian::read_f32)?),
            (Type::Float8, Format::Text) => Value::Float8(parse_text(bytes)?),
            (Type::Float8, Format::Binary) => Value::Float8(read_be::<8, f64>(bytes, BigEndian::read_f64)?),
            (Type::Text, _) => Value::Text(utf8(bytes)?),
            (Type::Varchar, _) => Value::Varchar(utf8(bytes)?),
            (Type::Numeric, Format::Text) => Value::Numeric(utf8(bytes)?),
            (Type::Numeric, Format::Binary) => Value::Numeric(numeric::decode_binary(bytes)?),
            (Type::Date, Format::Text) => {
                let s = utf8(bytes)?;
                let days = crate::iris::iso_date_to_pg_days(&s)
                    .ok_or_else(|| GatewayError::invalid_datetime(format!("invalid date value: {s}")))?;
                Value::Date(days)
            }
            (Type::Date, Format::Binary) => Value::Date(read_be::<4, i32>(bytes, BigEndian::read_i32)?),
            (Type::Timestamp, Format::Text) => Value::Timestamp(parse_timestamp_text(bytes)?),
            (Type::Timestamp, Format::Binary) => Value::Timestamp(read_be::<8, i64>(bytes, BigEndian::read_i64)?),
            (Type::TimestampTz, Format::Text) => Value::TimestampTz(parse_timestamp_text(bytes)?),
            (Type::TimestampTz, Format::Binary) => Value::TimestampTz(read_be::<8, i64>(bytes, BigEndian::read_i64)?),
            (Type::Vector, Format::Text) => Value::Vector(parse_vector_text(bytes)?),
            (Type::Vector, Format::Binary) => Value::Vector(decode_vector_binary(bytes)?),
        })
    }
}

fn format_float32(f: f32) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        let mut s = format!("{f}");
        if !s.contains('.') && !s.contains('e') {
            s.push_str(".0");
        }
        s
    }
}

fn format_float64(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        let mut s = format!("{f}");
        if !s.contains('.') && !s.contains('e') {
            s.push_str(".0");
        }
        s
    }
}

fn format_timestamp_text(micros: i64, with_tz: bool) -> String {
    let days = micros.div_euclid(86_400_000_000);
    let day_micros = micros.rem_euclid(86_400_000_000);
    let date = crate::iris::pg_days_to_iso_date(days as i32);
    let hour = day_micros / 3_600_000_000;
    let min = (day_micros / 60_000_000) % 60;
    let sec = (day_micros / 1_000_000) % 60;
    let frac = day_micros % 1_000_000;
    let suffix = if with_tz { "+00" } else { "" };
    if frac == 0 {
        format!("{date} {hour:02}:{min:02}:{sec:02}{suffix}")
    } else {
        format!("{date} {hour:02}:{min:02}:{sec:02}.{frac:06}{suffix}")
    }
}

fn parse_timestamp_text(bytes: &[u8]) -> Result<i64> {
    let s = utf8(bytes)?;
    let mut parts = s.splitn(2, ' ');
    let date = parts.next().unwrap_or("");
    let time = parts.next().unwrap_or("00:00:00");
    let time = time.trim_end_matches("+00");
    let days = crate::iris::iso_date_to_pg_days(date)
        .ok_or_else(|| GatewayError::parameter_bind(format!("invalid timestamp literal: {s}")))?;

    let mut hms = time.splitn(2, '.');
    let hms_main = hms.next().unwrap_or("00:00:00");
    let frac: i64 = match hms.next() {
        Some(f) => {
            let mut padded = f.to_string();
            while padded.len() < 6 {
                padded.push('0');
            }
            padded.truncate(6);
            padded.parse().unwrap_or(0)
        }
        None => 0,
    };
    let mut hms_parts = hms_main.splitn(3, ':');
    let hour: i64 = hms_parts.next().unwrap_or("0").parse().unwrap_or(0);
    let min: i64 = hms_parts.next().unwrap_or("0").parse().unwrap_or(0);
    let sec: i64 = hms_parts.next().unwrap_or("0").parse().unwrap_or(0);
    let day_micros = hour * 3_600_000_000 + min * 60_000_000 + sec * 1_000_000 + frac;
    Ok(days as i64 * 86_400_000_000 + day_micros)
}

fn format_vector_text(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| format_float32(*f)).collect();
    format!("[{}]", parts.join(","))
}

fn parse_vector_text(bytes: &[u8]) -> Result<Vec<f32>> {
    let s = utf8(bytes)?;
    let inner = s
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| GatewayError::parameter_bind(format!("invalid vector literal: {s}")))?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| GatewayError::parameter_bind(format!("invalid vector element: {part}")))
        })
        .collect()
}

/// pgvector's binary send/recv format: a `uint16` dimension count, a
/// reserved `uint16`, then that many big-endian `float4`s.
fn encode_vector_binary(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + v.len() * 4);
    out.extend_from_slice(&(v.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    for f in v {
        out.extend_from_slice(&f.to_be_bytes());
    }
    out
}

fn decode_vector_binary(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() < 4 {
        return Err(GatewayError::parameter_bind("truncated vector value"));
    }
    let dim = BigEndian::read_u16(&bytes[0..2]) as usize;
    if bytes.len() != 4 + dim * 4 {
        return Err(GatewayError::parameter_bind("vector length mismatch"));
    }
    let mut out = Vec::with_capacity(dim);
    for i in 0..dim {
        let off = 4 + i * 4;
        out.push(BigEndian::read_f32(&bytes[off..off + 4]));
    }
    Ok(out)
}

fn parse_text_bool(bytes: &[u8]) -> Result<bool> {
    match bytes {
        b"t" | b"true" | b"TRUE" | b"1" => Ok(true),
        b"f" | b"false" | b"FALSE" | b"0" => Ok(false),
        _ => Err(GatewayError::parameter_bind(format!(
            "invalid boolean literal: {}",
            String::from_utf8_lossy(bytes)
        ))),
    }
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8]) -> Result<T> {
    utf8(bytes)?
        .parse()
        .map_err(|_| GatewayError::parameter_bind(format!("invalid literal: {}", String::from_utf8_lossy(bytes))))
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| GatewayError::parameter_bind("value is not valid UTF-8"))
}

fn single_byte(bytes: &[u8]) -> Result<&u8> {
    bytes.first().ok_or_else(|| GatewayError::parameter_bind("truncated boolean value"))
}

fn read_be<const N: usize, T>(bytes: &[u8], read: impl Fn(&[u8]) -> T) -> Result<T> {
    if bytes.len() != N {
        return Err(GatewayError::parameter_bind(format!("expected {N} bytes, got {}", bytes.len())));
    }
    Ok(read(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_text_round_trips() {
        let v = Value::Bool(true);
        let encoded = v.encode(Format::Text).unwrap().unwrap();
        assert_eq!(Value::decode(Type::Bool, Format::Text, Some(&encoded)).unwrap(), v);
    }

    #[test]
    fn int4_binary_round_trips() {
        let v = Value::Int4(-42);
        let encoded = v.encode(Format::Binary).unwrap().unwrap();
        assert_eq!(Value::decode(Type::Int4, Format::Binary, Some(&encoded)).unwrap(), v);
    }

    #[test]
    fn date_text_round_trips() {
        let v = Value::Date(0);
        let encoded = v.encode(Format::Text).unwrap().unwrap();
        assert_eq!(encoded, b"2000-01-01");
        assert_eq!(Value::decode(Type::Date, Format::Text, Some(&encoded)).unwrap(), v);
    }

    #[test]
    fn vector_text_round_trips() {
        let v = Value::Vector(vec![1.0, 2.5, -3.0]);
        let encoded = v.encode(Format::Text).unwrap().unwrap();
        assert_eq!(encoded, b"[1.0,2.5,-3.0]");
        assert_eq!(Value::decode(Type::Vector, Format::Text, Some(&encoded)).unwrap(), v);
    }

    #[test]
    fn vector_binary_round_trips() {
        let v = Value::Vector(vec![1.0, 2.5, -3.0]);
        let encoded = v.encode(Format::Binary).unwrap().unwrap();
        assert_eq!(Value::decode(Type::Vector, Format::Binary, Some(&encoded)).unwrap(), v);
    }

    #[test]
    fn null_encodes_to_none() {
        assert_eq!(Value::Null.encode(Format::Text).unwrap(), None);
        assert_eq!(Value::decode(Type::Int4, Format::Text, None).unwrap(), Value::Null);
    }
}
