//! Schema-drift tolerant field lookup over raw records.

use std::collections::BTreeMap;

use leadloop_core::RawRecord;
use serde_json::Value as JsonValue;

/// Deepest observed follow-up index for the numbered field families.
pub const DEFAULT_MAX_NUMBERED_INDEX: u32 = 10;

/// Lowercases and drops whitespace, `.`, `_` and `-`, so `"W.P_1"`,
/// `"W_P_1"` and `"wp 1"` all normalize to `"wp1"`.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '.' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Looks up the first candidate key present in `record`.
///
/// Exact key matches are tried first, in candidate order. Only when none of
/// them is present does the lookup fall back to comparing normalized keys,
/// returning the first record entry (in record order) whose normalized key
/// equals any normalized candidate. `null` values count as absent.
pub fn resolve<'a>(record: &'a RawRecord, candidates: &[&str]) -> Option<&'a JsonValue> {
    for key in candidates {
        if let Some(value) = record.get(key).filter(|v| !v.is_null()) {
            return Some(value);
        }
    }

    let wanted = candidates
        .iter()
        .map(|c| normalize_key(c))
        .collect::<Vec<_>>();
    record
        .iter()
        .filter(|(_, value)| !value.is_null())
        .find(|(key, _)| wanted.contains(&normalize_key(key)))
        .map(|(_, value)| value)
}

/// String form of a raw value. Strings are returned verbatim, other scalars
/// by their textual form, and arrays/objects as compact JSON.
pub fn value_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn resolve_string(record: &RawRecord, candidates: &[&str]) -> Option<String> {
    resolve(record, candidates).and_then(value_to_string)
}

/// Like [`resolve_string`] but treats an empty string as absent.
pub fn resolve_truthy(record: &RawRecord, candidates: &[&str]) -> Option<String> {
    resolve_string(record, candidates).filter(|s| !s.is_empty())
}

/// Expands every `{i}` in `pattern` with `index`.
pub fn numbered_key(pattern: &str, index: u32) -> String {
    pattern.replace("{i}", &index.to_string())
}

/// Collects `pattern` for every index in `lo..=hi`. Indices without a defined
/// value are left out rather than filled with a default.
pub fn extract_range(record: &RawRecord, pattern: &str, lo: u32, hi: u32) -> BTreeMap<u32, String> {
    (lo..=hi)
        .filter_map(|index| {
            let key = numbered_key(pattern, index);
            resolve_string(record, &[key.as_str()]).map(|value| (index, value))
        })
        .collect()
}
