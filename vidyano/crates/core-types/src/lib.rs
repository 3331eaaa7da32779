//! Core identifiers and shared lightweight types for the Vidyano query core.
//!
//! These types intentionally avoid heavy dependencies and stay
//! serialization-friendly so they can travel inside protocol payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
mod value;

pub use value::{Value, ValueParseError};

/// Server-assigned identity of a result row; stable within one result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

bitflags::bitflags! {
    /// Server-declared capabilities of a query column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ColumnCaps: u8 {
        const CAN_FILTER         = 0b0001;
        const CAN_SORT           = 0b0010;
        const CAN_GROUP_BY       = 0b0100;
        const CAN_LIST_DISTINCTS = 0b1000;
    }
}

impl Default for ColumnCaps {
    fn default() -> Self {
        Self::empty()
    }
}

impl ColumnCaps {
    pub const fn can_filter(self) -> bool {
        self.contains(Self::CAN_FILTER)
    }

    pub const fn can_sort(self) -> bool {
        self.contains(Self::CAN_SORT)
    }

    pub const fn can_group_by(self) -> bool {
        self.contains(Self::CAN_GROUP_BY)
    }

    pub const fn can_list_distincts(self) -> bool {
        self.contains(Self::CAN_LIST_DISTINCTS)
    }
}

/// Data type tag of a column, named after the service type strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    String,
    Int32,
    NullableInt32,
    Int64,
    NullableInt64,
    Decimal,
    NullableDecimal,
    Double,
    NullableDouble,
    Boolean,
    NullableBoolean,
    YesNo,
    Date,
    NullableDate,
    DateTime,
    NullableDateTime,
    Enum,
    Guid,
    /// Anything the core does not know how to type; treated as text.
    Unknown,
}

impl DataType {
    /// Map a service type name (e.g. `"NullableInt32"`) to a tag.
    pub fn from_service_type(name: &str) -> Self {
        match name {
            "String" | "MultiLineString" => Self::String,
            "Int32" | "Int16" | "Byte" | "SByte" | "UInt16" => Self::Int32,
            "NullableInt32" | "NullableInt16" | "NullableByte" => Self::NullableInt32,
            "Int64" | "UInt32" | "UInt64" => Self::Int64,
            "NullableInt64" | "NullableUInt32" | "NullableUInt64" => Self::NullableInt64,
            "Decimal" => Self::Decimal,
            "NullableDecimal" => Self::NullableDecimal,
            "Double" | "Single" => Self::Double,
            "NullableDouble" | "NullableSingle" => Self::NullableDouble,
            "Boolean" => Self::Boolean,
            "NullableBoolean" => Self::NullableBoolean,
            "YesNo" => Self::YesNo,
            "Date" => Self::Date,
            "NullableDate" => Self::NullableDate,
            "DateTime" | "DateTimeOffset" => Self::DateTime,
            "NullableDateTime" | "NullableDateTimeOffset" => Self::NullableDateTime,
            "Enum" | "KeyValueList" => Self::Enum,
            "Guid" | "NullableGuid" => Self::Guid,
            _ => Self::Unknown,
        }
    }

    pub const fn service_type(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Int32 => "Int32",
            Self::NullableInt32 => "NullableInt32",
            Self::Int64 => "Int64",
            Self::NullableInt64 => "NullableInt64",
            Self::Decimal => "Decimal",
            Self::NullableDecimal => "NullableDecimal",
            Self::Double => "Double",
            Self::NullableDouble => "NullableDouble",
            Self::Boolean => "Boolean",
            Self::NullableBoolean => "NullableBoolean",
            Self::YesNo => "YesNo",
            Self::Date => "Date",
            Self::NullableDate => "NullableDate",
            Self::DateTime => "DateTime",
            Self::NullableDateTime => "NullableDateTime",
            Self::Enum => "Enum",
            Self::Guid => "Guid",
            Self::Unknown => "Unknown",
        }
    }

    pub const fn is_nullable(self) -> bool {
        matches!(
            self,
            Self::NullableInt32
                | Self::NullableInt64
                | Self::NullableDecimal
                | Self::NullableDouble
                | Self::NullableBoolean
                | Self::NullableDate
                | Self::NullableDateTime
        )
    }

    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int32
                | Self::NullableInt32
                | Self::Int64
                | Self::NullableInt64
                | Self::Decimal
                | Self::NullableDecimal
                | Self::Double
                | Self::NullableDouble
        )
    }

    pub const fn is_boolean(self) -> bool {
        matches!(self, Self::Boolean | Self::NullableBoolean | Self::YesNo)
    }

    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            Self::Date | Self::NullableDate | Self::DateTime | Self::NullableDateTime
        )
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        Self::from_service_type(&value)
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.service_type().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_type())
    }
}
