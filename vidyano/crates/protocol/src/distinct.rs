//! Wire encoding of distinct values and filter fragments.
//!
//! ```text
//! ""                  empty exact value
//! "<payload>"         value == display == payload
//! "<len>|<payload>"   value = payload[..len], display = payload[len..] (or value)
//! "|<payload>"        value == display == payload
//! "1|@<text>"         free-text fragment; value "@", display = text
//! ```

/// Prefix marking a free-text filter fragment rather than an exact value.
pub const TEXT_SEARCH_PREFIX: &str = "1|@";

/// A decoded distinct value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinctValue {
    pub value: String,
    pub display: String,
}

/// Decode a wire-encoded distinct value. Never fails: anything that does
/// not carry a numeric length prefix is taken literally.
pub fn parse_distinct_value(raw: &str) -> DistinctValue {
    let literal = || DistinctValue {
        value: raw.to_string(),
        display: raw.to_string(),
    };

    let Some((prefix, payload)) = raw.split_once('|') else {
        return literal();
    };

    if prefix.is_empty() {
        return DistinctValue {
            value: payload.to_string(),
            display: payload.to_string(),
        };
    }

    let Ok(len) = prefix.parse::<usize>() else {
        return literal();
    };

    // Lengths count characters, not bytes.
    let split_at = payload
        .char_indices()
        .nth(len)
        .map_or(payload.len(), |(i, _)| i);
    let (value, rest) = payload.split_at(split_at);
    DistinctValue {
        value: value.to_string(),
        display: if rest.is_empty() {
            value.to_string()
        } else {
            rest.to_string()
        },
    }
}

/// Encode a filter value: exact values become `"|" + value`, text fragments
/// `"1|@" + value`.
pub fn build_filter_value(value: &str, is_text_search: bool) -> String {
    if is_text_search {
        format!("{TEXT_SEARCH_PREFIX}{value}")
    } else {
        format!("|{value}")
    }
}

pub fn is_text_search_value(raw: &str) -> bool {
    raw.starts_with(TEXT_SEARCH_PREFIX)
}

/// The searched text of a `1|@` fragment.
pub fn text_search_fragment(raw: &str) -> Option<&str> {
    raw.strip_prefix(TEXT_SEARCH_PREFIX)
}
