//! Sort options and their `"Name ASC; Age DESC"` string form.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    None,
    Ascending,
    Descending,
}

impl SortDirection {
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    pub const fn reversed(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortOption {
    pub column: String,
    pub direction: SortDirection,
}

impl SortOption {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Parse `"Name; Age DESC"`. Entries without a direction sort ascending;
    /// blank entries are skipped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(';')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                let (column, direction) = match part.rsplit_once(char::is_whitespace) {
                    Some((col, dir)) if dir.eq_ignore_ascii_case("DESC") => {
                        (col.trim(), SortDirection::Descending)
                    }
                    Some((col, dir)) if dir.eq_ignore_ascii_case("ASC") => {
                        (col.trim(), SortDirection::Ascending)
                    }
                    _ => (part, SortDirection::Ascending),
                };
                Some(Self {
                    column: column.to_string(),
                    direction,
                })
            })
            .collect()
    }

    /// Render a list back to the service form, skipping unsorted entries.
    pub fn format_list(options: &[Self]) -> String {
        options
            .iter()
            .filter(|o| !o.direction.is_none())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for SortOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Descending => write!(f, "{} DESC", self.column),
            SortDirection::Ascending => write!(f, "{} ASC", self.column),
            SortDirection::None => f.write_str(&self.column),
        }
    }
}
