//! Typed values and their textual forms
//!
//! Conditions, scan keys, and delete predicates arrive as strings; this
//! module parses them into the storage representation of each field type so
//! the rest of the read path compares typed values only. Packed encodings
//! (date, datetime, decimal) match the segment storage format, which is what
//! makes zone-map and bloom pruning sound.

pub mod block;
pub mod row;

pub use block::RowBlock;
pub use row::RowCursor;

use crate::schema::{FieldInfo, FieldType};
use crate::{BasaltError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Two-component fixed-point decimal: integral part plus a fraction scaled
/// to nine digits. Both components carry the sign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
    pub integer: i64,
    pub fraction: i32,
}

const FRACTION_SCALE: i64 = 1_000_000_000;

impl Decimal {
    pub fn new(integer: i64, fraction: i32) -> Self {
        Self { integer, fraction }
    }

    /// Parse `[-]digits[.digits]`, scaling the fraction to nine digits.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if body.is_empty() {
            return None;
        }
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if frac_part.len() > 9 || !int_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let integer: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        let fraction: i64 = if frac_part.is_empty() {
            0
        } else {
            if !frac_part.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let parsed: i64 = frac_part.parse().ok()?;
            parsed * 10_i64.pow(9 - frac_part.len() as u32)
        };
        let sign = if negative { -1 } else { 1 };
        Some(Self {
            integer: sign * integer,
            fraction: (sign * fraction) as i32,
        })
    }

    /// Add with carry between the components.
    pub fn add(self, other: Decimal) -> Decimal {
        let mut integer = self.integer.wrapping_add(other.integer);
        let mut fraction = self.fraction as i64 + other.fraction as i64;
        if fraction >= FRACTION_SCALE {
            fraction -= FRACTION_SCALE;
            integer = integer.wrapping_add(1);
        } else if fraction <= -FRACTION_SCALE {
            fraction += FRACTION_SCALE;
            integer = integer.wrapping_sub(1);
        }
        // normalize mixed signs so both components agree with the total
        if integer > 0 && fraction < 0 {
            integer -= 1;
            fraction += FRACTION_SCALE;
        } else if integer < 0 && fraction > 0 {
            integer += 1;
            fraction -= FRACTION_SCALE;
        }
        Decimal {
            integer,
            fraction: fraction as i32,
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.integer
            .cmp(&other.integer)
            .then(self.fraction.cmp(&other.fraction))
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.integer == 0 && self.fraction < 0 {
            write!(f, "-0.{:09}", -self.fraction)
        } else {
            write!(f, "{}.{:09}", self.integer, self.fraction.abs())
        }
    }
}

/// One cell value in its storage representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    Double(f64),
    Decimal(Decimal),
    Char(String),
    Varchar(String),
    Date(u32),
    DateTime(u64),
    /// Simplified sketch: the distinct hashed elements, kept sorted once
    /// a merge is finalized.
    Hll(Vec<u64>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Byte encoding used for bloom-filter membership. Must agree between
    /// segment build and predicate probe, nothing else.
    pub fn bloom_key(&self) -> Vec<u8> {
        match self {
            Value::Null => Vec::new(),
            Value::Int8(v) => v.to_le_bytes().to_vec(),
            Value::Int16(v) => v.to_le_bytes().to_vec(),
            Value::Int32(v) => v.to_le_bytes().to_vec(),
            Value::Int64(v) => v.to_le_bytes().to_vec(),
            Value::Int128(v) => v.to_le_bytes().to_vec(),
            Value::Double(v) => v.to_bits().to_le_bytes().to_vec(),
            Value::Decimal(v) => {
                let mut out = v.integer.to_le_bytes().to_vec();
                out.extend_from_slice(&v.fraction.to_le_bytes());
                out
            }
            Value::Char(s) | Value::Varchar(s) => s.as_bytes().to_vec(),
            Value::Date(v) => v.to_le_bytes().to_vec(),
            Value::DateTime(v) => v.to_le_bytes().to_vec(),
            Value::Hll(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int8(_) => 1,
            Value::Int16(_) => 2,
            Value::Int32(_) => 3,
            Value::Int64(_) => 4,
            Value::Int128(_) => 5,
            Value::Double(_) => 6,
            Value::Decimal(_) => 7,
            Value::Char(_) => 8,
            Value::Varchar(_) => 9,
            Value::Date(_) => 10,
            Value::DateTime(_) => 11,
            Value::Hll(_) => 12,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Int8(a), Int8(b)) => a.cmp(b),
            (Int16(a), Int16(b)) => a.cmp(b),
            (Int32(a), Int32(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Int128(a), Int128(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Char(a), Char(b)) => a.cmp(b),
            (Varchar(a), Varchar(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Hll(a), Hll(b)) => a.cmp(b),
            // mixed variants only meet through schema bugs; order by rank
            // so collections stay total
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// Parse a condition / scan-key string into the column's storage value.
pub fn parse_value(field: &FieldInfo, s: &str) -> Result<Value> {
    let invalid = || BasaltError::InvalidValue {
        column: field.name.clone(),
        value: s.to_string(),
    };
    let trimmed = s.trim();
    let value = match field.field_type {
        FieldType::Int8 => Value::Int8(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Int16 => Value::Int16(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Int32 => Value::Int32(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Int64 => Value::Int64(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Int128 => Value::Int128(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Double => Value::Double(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Decimal => Value::Decimal(Decimal::parse(trimmed).ok_or_else(invalid)?),
        FieldType::Char => Value::Char(pad_char(s, field.length)),
        FieldType::Varchar => Value::Varchar(s.to_string()),
        FieldType::Date => Value::Date(parse_date(trimmed).ok_or_else(invalid)?),
        FieldType::DateTime => Value::DateTime(parse_datetime(trimmed).ok_or_else(invalid)?),
        FieldType::Hll => return Err(invalid()),
    };
    Ok(value)
}

/// Fixed-width chars compare against stored values only when padded the
/// same way, so the padding happens at parse time.
pub fn pad_char(s: &str, length: usize) -> String {
    let mut out = s.to_string();
    while out.len() < length {
        out.push('\0');
    }
    out
}

/// `YYYY-MM-DD` → `year * 512 + month * 32 + day`
pub fn parse_date(s: &str) -> Option<u32> {
    let mut parts = s.splitn(3, '-');
    let year: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if year > 9999 || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(year * 512 + month * 32 + day)
}

/// `YYYY-MM-DD HH:MM:SS` → `YYYYMMDDHHMMSS`
pub fn parse_datetime(s: &str) -> Option<u64> {
    let (date, time) = s.split_once(' ')?;
    let packed_date = parse_date(date)?;
    let year = (packed_date / 512) as u64;
    let month = (packed_date / 32 % 16) as u64;
    let day = (packed_date % 32) as u64;

    let mut parts = time.splitn(3, ':');
    let hour: u64 = parts.next()?.parse().ok()?;
    let minute: u64 = parts.next()?.parse().ok()?;
    let second: u64 = parts.next()?.parse().ok()?;
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    Some(
        year * 10_000_000_000
            + month * 100_000_000
            + day * 1_000_000
            + hour * 10_000
            + minute * 100
            + second,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldInfo;

    #[test]
    fn test_decimal_parse() {
        assert_eq!(Decimal::parse("12.5"), Some(Decimal::new(12, 500_000_000)));
        assert_eq!(Decimal::parse("-3.25"), Some(Decimal::new(-3, -250_000_000)));
        assert_eq!(Decimal::parse("7"), Some(Decimal::new(7, 0)));
        assert_eq!(Decimal::parse(".5"), Some(Decimal::new(0, 500_000_000)));
        assert_eq!(Decimal::parse("1.2.3"), None);
        assert_eq!(Decimal::parse("abc"), None);
        assert_eq!(Decimal::parse("1.1234567890"), None);
    }

    #[test]
    fn test_decimal_add_carry() {
        let a = Decimal::parse("1.7").unwrap();
        let b = Decimal::parse("2.6").unwrap();
        assert_eq!(a.add(b), Decimal::parse("4.3").unwrap());

        let c = Decimal::parse("-1.7").unwrap();
        let d = Decimal::parse("0.5").unwrap();
        assert_eq!(c.add(d), Decimal::parse("-1.2").unwrap());
    }

    #[test]
    fn test_decimal_order() {
        assert!(Decimal::parse("1.5").unwrap() < Decimal::parse("2.0").unwrap());
        assert!(Decimal::parse("-2.5").unwrap() < Decimal::parse("-2.25").unwrap());
    }

    #[test]
    fn test_date_packing() {
        assert_eq!(parse_date("2024-01-31"), Some(2024 * 512 + 1 * 32 + 31));
        assert_eq!(parse_date("2024-13-01"), None);
        assert_eq!(parse_date("2024-01"), None);
    }

    #[test]
    fn test_datetime_packing() {
        assert_eq!(
            parse_datetime("2024-01-31 12:30:45"),
            Some(20240131123045)
        );
        assert_eq!(parse_datetime("2024-01-31 25:00:00"), None);
        assert_eq!(parse_datetime("2024-01-31"), None);
    }

    #[test]
    fn test_char_padding() {
        let field = FieldInfo::new("c", FieldType::Char).length(4);
        let value = parse_value(&field, "ab").unwrap();
        assert_eq!(value, Value::Char("ab\0\0".to_string()));
        // longer than declared width stays as-is
        let value = parse_value(&field, "abcdef").unwrap();
        assert_eq!(value, Value::Char("abcdef".to_string()));
    }

    #[test]
    fn test_value_order() {
        assert!(Value::Int64(3) < Value::Int64(5));
        assert!(Value::Null < Value::Int64(i64::MIN));
        assert!(Value::Varchar("a".into()) < Value::Varchar("b".into()));
        assert_eq!(
            Value::Double(1.5).cmp(&Value::Double(1.5)),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let field = FieldInfo::new("v", FieldType::Int32);
        assert!(parse_value(&field, "12x").is_err());
        let field = FieldInfo::new("h", FieldType::Hll);
        assert!(parse_value(&field, "anything").is_err());
    }
}
