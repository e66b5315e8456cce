//! Field-level value decoding and encoding for InnoDB records.
//!
//! Converts the raw bytes of a compact-format field into a typed
//! [`FieldValue`] according to its [`ColumnDef`], and back. InnoDB stores
//! most types so that `memcmp` order equals value order; the exceptions
//! are FLOAT/DOUBLE and collated strings, which [`compare_fields`] handles.
//!
//! # Supported types
//!
//! | SQL Type | InnoDB encoding |
//! |----------|----------------|
//! | TINYINT–BIGINT | Big-endian; signed types have the high bit flipped |
//! | FLOAT / DOUBLE | Little-endian IEEE 754, unmodified |
//! | DECIMAL | MySQL binary decimal, 9 digits per 4 bytes, sign in first bit |
//! | DATE | 3 bytes: `year << 9 \| month << 5 \| day`, high bit flipped |
//! | DATETIME | 5 bytes `(year*13+month, day, h, m, s)` + 0x8000000000, then fsp bytes |
//! | TIMESTAMP | 4-byte big-endian UTC seconds, then fsp bytes |
//! | TIME | 3 bytes `h << 12 \| m << 6 \| s` + 0x800000, then fsp bytes |
//! | YEAR | 1 byte, offset from 1900 |
//! | CHAR/VARCHAR/TEXT | Character data; CHAR is space padded |
//! | BINARY/VARBINARY/BLOB | Raw bytes (hex) |
//! | JSON / GEOMETRY | Server binary formats (hex) |
//! | ENUM / SET / BIT | Big-endian index, bitmask or bit string |

use std::cmp::Ordering;

use serde::Serialize;

use crate::innodb::lob::ExternRef;
use crate::innodb::schema::{decimal_storage_len, fsp_storage_len, Collation, ColumnDef, ColumnType, Storage};
use crate::util::hex::format_bytes;
use crate::IdbError;

const DIG_PER_GROUP: usize = 9;
const DATETIME_INT_OFS: u64 = 0x80_0000_0000;
const TIME_INT_OFS: i64 = 0x80_0000;

/// Decoded field value from an InnoDB record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// SQL NULL.
    Null,
    /// Signed integer (TINYINT, SMALLINT, MEDIUMINT, INT, BIGINT).
    Int(i64),
    /// Unsigned integer (unsigned integer types, YEAR, BIT, system columns).
    Uint(u64),
    Float(f32),
    Double(f64),
    /// Character data and the textual forms of DECIMAL, temporal, ENUM and SET values.
    Str(String),
    /// `0x`-prefixed hex for binary data.
    Hex(String),
    /// An off-page value that was not resolved.
    External(ExternRef),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) | FieldValue::Hex(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::Int(v) => Some(v),
            FieldValue::Uint(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::Uint(v) => Some(v),
            FieldValue::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => f.write_str("NULL"),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Uint(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Str(s) => write!(f, "{:?}", s),
            FieldValue::Hex(s) => f.write_str(s),
            FieldValue::External(r) => write!(
                f,
                "<external {} bytes at page {}>",
                r.length, r.page_no
            ),
        }
    }
}

/// Decode a field's bytes. Data of an unexpected length falls back to hex.
pub fn decode_field(data: &[u8], col: &ColumnDef) -> FieldValue {
    if let Storage::Fixed(n) = col.storage() {
        if data.len() != n {
            return decode_hex(data);
        }
    }
    match &col.column_type {
        ColumnType::TinyInt { unsigned }
        | ColumnType::SmallInt { unsigned }
        | ColumnType::MediumInt { unsigned }
        | ColumnType::Int { unsigned }
        | ColumnType::BigInt { unsigned } => decode_int(data, *unsigned),
        ColumnType::Float => match <[u8; 4]>::try_from(data) {
            Ok(b) => FieldValue::Float(f32::from_le_bytes(b)),
            Err(_) => decode_hex(data),
        },
        ColumnType::Double => match <[u8; 8]>::try_from(data) {
            Ok(b) => FieldValue::Double(f64::from_le_bytes(b)),
            Err(_) => decode_hex(data),
        },
        ColumnType::Decimal { precision, scale } => decode_decimal(data, *precision, *scale),
        ColumnType::Date => FieldValue::Str(format_date(data)),
        ColumnType::DateTime { fsp } => decode_datetime(data, *fsp),
        ColumnType::Timestamp { fsp } => decode_timestamp(data, *fsp),
        ColumnType::Time { fsp } => decode_time(data, *fsp),
        ColumnType::Year => match data[0] {
            0 => FieldValue::Str("0000".to_string()),
            v => FieldValue::Uint(1900 + v as u64),
        },
        ColumnType::Char { .. } => {
            FieldValue::Str(String::from_utf8_lossy(trim_trailing_spaces(data)).into_owned())
        }
        ColumnType::VarChar { .. } | ColumnType::Text => {
            FieldValue::Str(String::from_utf8_lossy(data).into_owned())
        }
        ColumnType::Binary { .. }
        | ColumnType::VarBinary { .. }
        | ColumnType::Blob
        | ColumnType::Json
        | ColumnType::Geometry => decode_hex(data),
        ColumnType::Enum { elements } => decode_enum(data, elements),
        ColumnType::Set { elements } => decode_set(data, elements),
        ColumnType::Bit { .. } => FieldValue::Uint(read_be(data)),
    }
}

/// Decode a hidden system column (DB_ROW_ID, DB_TRX_ID, DB_ROLL_PTR).
pub fn decode_system(data: &[u8]) -> FieldValue {
    if data.len() > 8 {
        return decode_hex(data);
    }
    FieldValue::Uint(read_be(data))
}

fn read_be(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn write_be(value: u64, len: usize) -> Vec<u8> {
    (0..len).rev().map(|i| (value >> (i * 8)) as u8).collect()
}

fn decode_int(data: &[u8], unsigned: bool) -> FieldValue {
    let raw = read_be(data);
    if unsigned {
        return FieldValue::Uint(raw);
    }
    let bits = data.len() as u32 * 8;
    let flipped = raw ^ (1u64 << (bits - 1));
    let shift = 64 - bits;
    FieldValue::Int(((flipped << shift) as i64) >> shift)
}

fn decode_decimal(data: &[u8], precision: u8, scale: u8) -> FieldValue {
    let scale = scale.min(precision) as usize;
    let intg = precision as usize - scale;
    if data.is_empty() || data.len() != decimal_storage_len(precision, scale as u8) {
        return decode_hex(data);
    }

    let negative = data[0] & 0x80 == 0;
    let mask = if negative { 0xFF } else { 0x00 };
    let mut buf: Vec<u8> = data.iter().map(|b| b ^ mask).collect();
    buf[0] ^= 0x80;

    let mut pos = 0;
    let mut take = |digits: usize, out: &mut String| {
        let len = group_bytes(digits);
        let value = read_be(&buf[pos..pos + len]);
        pos += len;
        out.push_str(&format!("{:0width$}", value, width = digits));
    };

    let mut int_digits = String::new();
    if intg % DIG_PER_GROUP > 0 {
        take(intg % DIG_PER_GROUP, &mut int_digits);
    }
    for _ in 0..intg / DIG_PER_GROUP {
        take(DIG_PER_GROUP, &mut int_digits);
    }
    let mut frac_digits = String::new();
    for _ in 0..scale / DIG_PER_GROUP {
        take(DIG_PER_GROUP, &mut frac_digits);
    }
    if scale % DIG_PER_GROUP > 0 {
        take(scale % DIG_PER_GROUP, &mut frac_digits);
    }

    let int_part = int_digits.trim_start_matches('0');
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(if int_part.is_empty() { "0" } else { int_part });
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_digits);
    }
    FieldValue::Str(out)
}

fn group_bytes(digits: usize) -> usize {
    if digits == DIG_PER_GROUP {
        4
    } else {
        decimal_storage_len(digits as u8, 0)
    }
}

fn format_date(data: &[u8]) -> String {
    let v = read_be(data) ^ 0x80_0000;
    format!("{:04}-{:02}-{:02}", v >> 9, (v >> 5) & 0x0F, v & 0x1F)
}

/// Fractional part in microseconds for the given precision.
fn frac_to_micros(frac: u64, fsp: u8) -> u64 {
    match fsp {
        1 | 2 => frac * 10_000,
        3 | 4 => frac * 100,
        _ => frac,
    }
}

fn micros_to_frac(micros: u64, fsp: u8) -> u64 {
    match fsp {
        0 => 0,
        1 | 2 => micros / 10_000,
        3 | 4 => micros / 100,
        _ => micros,
    }
}

fn frac_suffix(micros: u64, fsp: u8) -> String {
    if fsp == 0 {
        return String::new();
    }
    let digits = format!("{:06}", micros);
    format!(".{}", &digits[..fsp.min(6) as usize])
}

fn decode_datetime(data: &[u8], fsp: u8) -> FieldValue {
    let int_part = read_be(&data[..5]).wrapping_sub(DATETIME_INT_OFS);
    let micros = frac_to_micros(read_be(&data[5..]), fsp);
    let ymd = int_part >> 17;
    let hms = int_part & 0x1FFFF;
    let ym = ymd >> 5;
    FieldValue::Str(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}{}",
        ym / 13,
        ym % 13,
        ymd & 0x1F,
        hms >> 12,
        (hms >> 6) & 0x3F,
        hms & 0x3F,
        frac_suffix(micros, fsp)
    ))
}

fn decode_timestamp(data: &[u8], fsp: u8) -> FieldValue {
    let secs = read_be(&data[..4]);
    let micros = frac_to_micros(read_be(&data[4..]), fsp);
    if secs == 0 {
        return FieldValue::Str(format!("0000-00-00 00:00:00{}", frac_suffix(micros, fsp)));
    }
    let (y, m, d) = civil_from_days((secs / 86_400) as i64);
    let tod = secs % 86_400;
    FieldValue::Str(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}{}",
        y,
        m,
        d,
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60,
        frac_suffix(micros, fsp)
    ))
}

// TIME2 stores `packed + (0x800000 << frac_bits)` over all 3 + fsp bytes,
// so a negative value borrows from the integer part when it has a fraction.
fn decode_time(data: &[u8], fsp: u8) -> FieldValue {
    let frac_bits = (data.len() - 3) as u32 * 8;
    let total = read_be(data) as i64 - (TIME_INT_OFS << frac_bits);
    let mag = total.unsigned_abs();
    let hms = mag >> frac_bits;
    let micros = frac_to_micros(mag & ((1u64 << frac_bits) - 1), fsp);
    FieldValue::Str(format!(
        "{}{:02}:{:02}:{:02}{}",
        if total < 0 { "-" } else { "" },
        (hms >> 12) & 0x3FF,
        (hms >> 6) & 0x3F,
        hms & 0x3F,
        frac_suffix(micros, fsp)
    ))
}

fn decode_enum(data: &[u8], elements: &[String]) -> FieldValue {
    match read_be(data) as usize {
        0 => FieldValue::Str(String::new()),
        idx if idx <= elements.len() => FieldValue::Str(elements[idx - 1].clone()),
        idx => FieldValue::Uint(idx as u64),
    }
}

fn decode_set(data: &[u8], elements: &[String]) -> FieldValue {
    let mask = read_be(data);
    let selected: Vec<&str> = elements
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < 64 && mask & (1u64 << i) != 0)
        .map(|(_, e)| e.as_str())
        .collect();
    FieldValue::Str(selected.join(","))
}

fn decode_hex(data: &[u8]) -> FieldValue {
    FieldValue::Hex(format!("0x{}", format_bytes(data)))
}

fn trim_trailing_spaces(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    &data[..end]
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn mismatch(col: &ColumnDef, value: &FieldValue) -> IdbError {
    IdbError::Argument(format!(
        "value {:?} does not fit column '{}' ({})",
        value, col.name, col.column_type
    ))
}

/// Encode a value into the on-page byte form of `col`.
///
/// `FieldValue::Null` is rejected: nulls live in the record's null bitmap.
pub fn encode_field(value: &FieldValue, col: &ColumnDef) -> Result<Vec<u8>, IdbError> {
    let bad = || mismatch(col, value);
    let bytes = match &col.column_type {
        ColumnType::TinyInt { unsigned }
        | ColumnType::SmallInt { unsigned }
        | ColumnType::MediumInt { unsigned }
        | ColumnType::Int { unsigned }
        | ColumnType::BigInt { unsigned } => {
            let Storage::Fixed(len) = col.storage() else {
                return Err(bad());
            };
            encode_int(value, len, *unsigned).ok_or_else(bad)?
        }
        ColumnType::Float => match value {
            FieldValue::Float(f) => f.to_le_bytes().to_vec(),
            FieldValue::Double(f) => (*f as f32).to_le_bytes().to_vec(),
            FieldValue::Int(i) => (*i as f32).to_le_bytes().to_vec(),
            _ => return Err(bad()),
        },
        ColumnType::Double => match value {
            FieldValue::Double(f) => f.to_le_bytes().to_vec(),
            FieldValue::Float(f) => (*f as f64).to_le_bytes().to_vec(),
            FieldValue::Int(i) => (*i as f64).to_le_bytes().to_vec(),
            _ => return Err(bad()),
        },
        ColumnType::Decimal { precision, scale } => {
            let text = match value {
                FieldValue::Str(s) => s.clone(),
                FieldValue::Int(i) => i.to_string(),
                FieldValue::Uint(u) => u.to_string(),
                _ => return Err(bad()),
            };
            encode_decimal(&text, *precision, *scale).ok_or_else(bad)?
        }
        ColumnType::Date => {
            let (y, m, d) = parse_date(text_of(value).ok_or_else(bad)?).ok_or_else(bad)?;
            write_be(((y << 9) | (m << 5) | d) ^ 0x80_0000, 3)
        }
        ColumnType::DateTime { fsp } => {
            let (y, mo, d, h, mi, s, micros) =
                parse_datetime(text_of(value).ok_or_else(bad)?).ok_or_else(bad)?;
            let ymd = ((y * 13 + mo) << 5) | d;
            let hms = (h << 12) | (mi << 6) | s;
            let mut out = write_be(((ymd << 17) | hms) + DATETIME_INT_OFS, 5);
            out.extend(write_be(micros_to_frac(micros, *fsp), fsp_storage_len(*fsp)));
            out
        }
        ColumnType::Timestamp { fsp } => {
            let text = text_of(value).ok_or_else(bad)?;
            let (y, mo, d, h, mi, s, micros) = parse_datetime(text).ok_or_else(bad)?;
            let secs = if y == 0 && mo == 0 && d == 0 {
                0
            } else {
                let days = days_from_civil(y as i64, mo as u32, d as u32);
                let secs = days * 86_400 + (h * 3600 + mi * 60 + s) as i64;
                u32::try_from(secs).map_err(|_| bad())? as u64
            };
            let mut out = write_be(secs, 4);
            out.extend(write_be(micros_to_frac(micros, *fsp), fsp_storage_len(*fsp)));
            out
        }
        ColumnType::Time { fsp } => {
            let (negative, h, m, s, micros) = parse_time(text_of(value).ok_or_else(bad)?).ok_or_else(bad)?;
            let frac_len = fsp_storage_len(*fsp);
            let frac_bits = frac_len as u32 * 8;
            let mag = ((((h << 12) | (m << 6) | s) as i64) << frac_bits)
                + micros_to_frac(micros, *fsp) as i64;
            let packed = if negative { -mag } else { mag };
            write_be((packed + (TIME_INT_OFS << frac_bits)) as u64, 3 + frac_len)
        }
        ColumnType::Year => {
            let year = match value {
                FieldValue::Str(s) => s.trim().parse::<u64>().map_err(|_| bad())?,
                other => other.as_u64().ok_or_else(bad)?,
            };
            match year {
                0 => vec![0],
                1901..=2155 => vec![(year - 1900) as u8],
                _ => return Err(bad()),
            }
        }
        ColumnType::Char {
            length,
            max_bytes_per_char,
        } => {
            let text = text_of(value).ok_or_else(bad)?;
            let mut out = text.as_bytes().to_vec();
            let limit = *length as usize * (*max_bytes_per_char).max(1) as usize;
            if out.len() > limit {
                return Err(bad());
            }
            if out.len() < *length as usize {
                out.resize(*length as usize, b' ');
            }
            out
        }
        ColumnType::VarChar { .. } | ColumnType::Text => text_of(value).ok_or_else(bad)?.as_bytes().to_vec(),
        ColumnType::Binary { length } => {
            let mut out = bytes_of(value).ok_or_else(bad)?;
            if out.len() > *length as usize {
                return Err(bad());
            }
            out.resize(*length as usize, 0);
            out
        }
        ColumnType::VarBinary { .. } | ColumnType::Blob | ColumnType::Json | ColumnType::Geometry => {
            bytes_of(value).ok_or_else(bad)?
        }
        ColumnType::Enum { elements } => {
            let idx = match value {
                FieldValue::Str(s) if s.is_empty() => 0,
                FieldValue::Str(s) => elements.iter().position(|e| e == s).ok_or_else(bad)? as u64 + 1,
                other => other.as_u64().ok_or_else(bad)?,
            };
            let Storage::Fixed(len) = col.storage() else {
                return Err(bad());
            };
            write_be(idx, len)
        }
        ColumnType::Set { elements } => {
            let mask = match value {
                FieldValue::Str(s) => {
                    let mut mask = 0u64;
                    for item in s.split(',').filter(|i| !i.is_empty()) {
                        let bit = elements.iter().position(|e| e == item).ok_or_else(bad)?;
                        mask |= 1u64 << bit;
                    }
                    mask
                }
                other => other.as_u64().ok_or_else(bad)?,
            };
            let Storage::Fixed(len) = col.storage() else {
                return Err(bad());
            };
            write_be(mask, len)
        }
        ColumnType::Bit { .. } => {
            let Storage::Fixed(len) = col.storage() else {
                return Err(bad());
            };
            write_be(value.as_u64().ok_or_else(bad)?, len)
        }
    };

    if let Storage::Variable { max_len, .. } = col.storage() {
        if bytes.len() > max_len {
            return Err(IdbError::Argument(format!(
                "{} bytes exceed the {}-byte limit of column '{}'",
                bytes.len(),
                max_len,
                col.name
            )));
        }
    }
    Ok(bytes)
}

/// Encode a hidden system column value of `len` bytes.
/// Read a value typed on the command line for column `col`.
///
/// `NULL` (any case) is SQL NULL; binary columns accept `0x`-prefixed hex;
/// everything else that is not numeric stays text for [`encode_field`].
pub fn parse_value(text: &str, col: &ColumnDef) -> Result<FieldValue, IdbError> {
    if text.eq_ignore_ascii_case("null") {
        return Ok(FieldValue::Null);
    }
    let bad = || IdbError::Argument(format!("'{}' is not a valid {} for column '{}'", text, col.column_type, col.name));
    Ok(match &col.column_type {
        ColumnType::TinyInt { unsigned }
        | ColumnType::SmallInt { unsigned }
        | ColumnType::MediumInt { unsigned }
        | ColumnType::Int { unsigned }
        | ColumnType::BigInt { unsigned } => {
            if *unsigned {
                FieldValue::Uint(text.trim().parse().map_err(|_| bad())?)
            } else {
                FieldValue::Int(text.trim().parse().map_err(|_| bad())?)
            }
        }
        ColumnType::Float | ColumnType::Double => {
            FieldValue::Double(text.trim().parse().map_err(|_| bad())?)
        }
        ColumnType::Bit { .. } => FieldValue::Uint(text.trim().parse().map_err(|_| bad())?),
        ColumnType::Binary { .. } | ColumnType::VarBinary { .. } | ColumnType::Blob
            if text.starts_with("0x") =>
        {
            FieldValue::Hex(text.to_string())
        }
        _ => FieldValue::Str(text.to_string()),
    })
}

pub fn encode_system(value: u64, len: usize) -> Vec<u8> {
    write_be(value, len)
}

fn text_of(value: &FieldValue) -> Option<&str> {
    match value {
        FieldValue::Str(s) => Some(s),
        _ => None,
    }
}

fn bytes_of(value: &FieldValue) -> Option<Vec<u8>> {
    match value {
        FieldValue::Hex(h) => {
            let h = h.strip_prefix("0x").unwrap_or(h);
            if h.len() % 2 != 0 {
                return None;
            }
            (0..h.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(h.get(i..i + 2)?, 16).ok())
                .collect()
        }
        FieldValue::Str(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

fn encode_int(value: &FieldValue, len: usize, unsigned: bool) -> Option<Vec<u8>> {
    let bits = len as u32 * 8;
    if unsigned {
        let v = value.as_u64()?;
        if bits < 64 && v >> bits != 0 {
            return None;
        }
        return Some(write_be(v, len));
    }
    let v = value.as_i64()?;
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    if (v as i128) < min || (v as i128) > max {
        return None;
    }
    let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    Some(write_be(((v as u64) & mask) ^ (1u64 << (bits - 1)), len))
}

fn encode_decimal(text: &str, precision: u8, scale: u8) -> Option<Vec<u8>> {
    let scale = scale.min(precision) as usize;
    let intg = precision as usize - scale;
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_str, frac_str) = body.split_once('.').unwrap_or((body, ""));
    if !int_str.bytes().chain(frac_str.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let int_str = int_str.trim_start_matches('0');
    if int_str.len() > intg || frac_str.len() > scale {
        return None;
    }
    let int_digits = format!("{:0>width$}", int_str, width = intg);
    let frac_digits = format!("{:0<width$}", frac_str, width = scale);

    let mut out = Vec::with_capacity(decimal_storage_len(precision, scale as u8));
    let mut push = |digits: &str| -> Option<()> {
        let value: u64 = if digits.is_empty() { 0 } else { digits.parse().ok()? };
        out.extend(write_be(value, group_bytes(digits.len())));
        Some(())
    };
    let lead = intg % DIG_PER_GROUP;
    if lead > 0 {
        push(&int_digits[..lead])?;
    }
    for chunk in int_digits.as_bytes()[lead..].chunks(DIG_PER_GROUP) {
        push(std::str::from_utf8(chunk).ok()?)?;
    }
    for chunk in frac_digits.as_bytes().chunks(DIG_PER_GROUP) {
        push(std::str::from_utf8(chunk).ok()?)?;
    }

    if out.is_empty() {
        return None;
    }
    if negative {
        out.iter_mut().for_each(|b| *b ^= 0xFF);
    }
    out[0] ^= 0x80;
    Some(out)
}

fn parse_num(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_micros(s: &str) -> Option<u64> {
    if s.len() > 6 {
        return None;
    }
    parse_num(&format!("{:0<6}", s))
}

fn parse_date(s: &str) -> Option<(u64, u64, u64)> {
    let mut parts = s.trim().splitn(3, '-');
    let y = parse_num(parts.next()?)?;
    let m = parse_num(parts.next()?)?;
    let d = parse_num(parts.next()?)?;
    (y <= 9999 && m <= 12 && d <= 31).then_some((y, m, d))
}

type DateTimeParts = (u64, u64, u64, u64, u64, u64, u64);

fn parse_datetime(s: &str) -> Option<DateTimeParts> {
    let s = s.trim();
    let (date, time) = s.split_once([' ', 'T']).unwrap_or((s, "00:00:00"));
    let (y, mo, d) = parse_date(date)?;
    let (negative, h, mi, sec, micros) = parse_time(time)?;
    (!negative && h < 24).then_some((y, mo, d, h, mi, sec, micros))
}

fn parse_time(s: &str) -> Option<(bool, u64, u64, u64, u64)> {
    let s = s.trim();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (hms, frac) = s.split_once('.').unwrap_or((s, ""));
    let mut parts = hms.splitn(3, ':');
    let h = parse_num(parts.next()?)?;
    let m = parse_num(parts.next()?)?;
    let sec = parse_num(parts.next()?)?;
    let micros = if frac.is_empty() { 0 } else { parse_micros(frac)? };
    (h <= 838 && m < 60 && sec < 60).then_some((negative, h, m, sec, micros))
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compare two stored field values of `col` in index order.
///
/// Most types compare as raw bytes. FLOAT and DOUBLE compare numerically;
/// text columns follow their [`Collation`]: PAD SPACE collations ignore
/// trailing spaces and case-insensitive ones fold ASCII case.
pub fn compare_fields(a: &[u8], b: &[u8], col: &ColumnDef) -> Ordering {
    match &col.column_type {
        ColumnType::Float => match (<[u8; 4]>::try_from(a), <[u8; 4]>::try_from(b)) {
            (Ok(x), Ok(y)) => f32::from_le_bytes(x).total_cmp(&f32::from_le_bytes(y)),
            _ => a.cmp(b),
        },
        ColumnType::Double => match (<[u8; 8]>::try_from(a), <[u8; 8]>::try_from(b)) {
            (Ok(x), Ok(y)) => f64::from_le_bytes(x).total_cmp(&f64::from_le_bytes(y)),
            _ => a.cmp(b),
        },
        t if t.is_text() => {
            let (a, b) = if col.collation.pads_spaces() {
                (trim_trailing_spaces(a), trim_trailing_spaces(b))
            } else {
                (a, b)
            };
            if col.collation.folds_case() {
                a.iter()
                    .map(u8::to_ascii_lowercase)
                    .cmp(b.iter().map(u8::to_ascii_lowercase))
            } else {
                a.cmp(b)
            }
        }
        _ => a.cmp(b),
    }
}
