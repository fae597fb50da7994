use std::collections::BTreeSet;

/// Flags are IMAP atoms (no whitespace), so a sorted space-joined list is
/// both lossless and stable for equality checks in SQL.
pub fn encode_flags(flags: &BTreeSet<String>) -> String {
    flags
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn decode_flags(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
