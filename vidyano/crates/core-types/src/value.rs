//! Conversion between service strings and typed values.
//!
//! The service transports every cell as a string: invariant-culture numbers,
//! `True`/`False` booleans and `dd-MM-yyyy HH:mm:ss[.fffffff]` timestamps.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::DataType;

const DATE_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S%.f";
const DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueParseError {
    #[error("invalid {data_type} value: {raw:?}")]
    Invalid { data_type: DataType, raw: String },
    #[error("{data_type} does not accept null")]
    NullNotAllowed { data_type: DataType },
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Parse a service string into a typed value.
    ///
    /// `None` and, for nullable types, the empty string map to [`Value::Null`].
    pub fn from_service_string(
        raw: Option<&str>,
        data_type: DataType,
    ) -> Result<Self, ValueParseError> {
        let Some(raw) = raw else {
            return Ok(Self::Null);
        };
        let invalid = || ValueParseError::Invalid {
            data_type,
            raw: raw.to_string(),
        };

        if raw.is_empty()
            && !matches!(
                data_type,
                DataType::String | DataType::Unknown | DataType::Enum | DataType::Guid
            )
        {
            return if data_type.is_nullable() {
                Ok(Self::Null)
            } else {
                Err(ValueParseError::NullNotAllowed { data_type })
            };
        }

        match data_type {
            DataType::String | DataType::Enum | DataType::Guid | DataType::Unknown => {
                Ok(Self::Text(raw.to_string()))
            }
            DataType::Int32
            | DataType::NullableInt32
            | DataType::Int64
            | DataType::NullableInt64 => {
                raw.trim().parse::<i64>().map(Self::Integer).map_err(|_| invalid())
            }
            DataType::Decimal
            | DataType::NullableDecimal
            | DataType::Double
            | DataType::NullableDouble => {
                raw.trim().parse::<f64>().map(Self::Decimal).map_err(|_| invalid())
            }
            DataType::Boolean | DataType::NullableBoolean | DataType::YesNo => {
                if raw.eq_ignore_ascii_case("true") {
                    Ok(Self::Boolean(true))
                } else if raw.eq_ignore_ascii_case("false") {
                    Ok(Self::Boolean(false))
                } else {
                    Err(invalid())
                }
            }
            DataType::Date | DataType::NullableDate => parse_date_time(raw)
                .map(|dt| Self::Date(dt.date()))
                .ok_or_else(invalid),
            DataType::DateTime | DataType::NullableDateTime => {
                parse_date_time(raw).map(Self::DateTime).ok_or_else(invalid)
            }
        }
    }

    /// Render the value the way the service expects it back.
    pub fn to_service_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Boolean(true) => Some("True".to_string()),
            Self::Boolean(false) => Some("False".to_string()),
            Self::Date(d) => Some(format!("{} 00:00:00", d.format(DATE_FORMAT))),
            Self::DateTime(dt) => Some(dt.format(DATE_TIME_FORMAT).to_string()),
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Total order used for client-side sorting: nulls first, numbers
    /// numerically, everything else by kind then natural order.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a
                .to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Integer(a), Self::Decimal(b)) => (*a as f64).total_cmp(b),
            (Self::Decimal(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Self::Decimal(a), Self::Decimal(b)) => a.total_cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Date(a), Self::DateTime(b)) => a.and_time(NaiveTime::MIN).cmp(b),
            (Self::DateTime(a), Self::Date(b)) => a.cmp(&b.and_time(NaiveTime::MIN)),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Decimal(_) => 2,
            Self::Date(_) | Self::DateTime(_) => 3,
            Self::Text(_) => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Boolean(b) => write!(f, "{}", if *b { "Yes" } else { "No" }),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

fn parse_date_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    // Offsets (`dd-MM-yyyy HH:mm:ss +01:00`) are dropped; the core works in local wall time.
    let without_offset = match raw.rsplit_once(' ') {
        Some((head, tail)) if tail.starts_with('+') || tail.starts_with('-') => head,
        _ => raw,
    };
    NaiveDateTime::parse_from_str(without_offset, DATE_TIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(without_offset, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}
