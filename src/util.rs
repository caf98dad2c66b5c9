//! Small text helpers shared across stages

/// Truncate a string at a character boundary, appending an ellipsis when
/// shortened. Counting chars (not bytes) keeps multi-byte Korean patent
/// text from panicking a naive slice.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars).collect();
        format!("{}...", kept)
    }
}

/// Short stable fingerprint of a query string for log correlation.
///
/// Not cryptographic; only needs to be stable within a run's logs.
pub fn fingerprint(s: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Slice out the outermost JSON object from an LLM response, tolerating
/// surrounding prose and code fences.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}
