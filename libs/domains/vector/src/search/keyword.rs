use std::collections::HashSet;

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Fraction of distinct query terms present in `text`, in `0.0..=1.0`.
///
/// Terms are runs of alphanumeric characters compared case-insensitively.
pub fn keyword_score(text: &str, query: &str) -> f32 {
    let wanted: HashSet<String> = terms(query).collect();
    if wanted.is_empty() {
        return 0.0;
    }
    let present: HashSet<String> = terms(text).collect();
    let found = wanted.iter().filter(|t| present.contains(*t)).count();
    found as f32 / wanted.len() as f32
}

/// String value of `field` in a payload object.
pub(crate) fn payload_text<'a>(payload: Option<&'a serde_json::Value>, field: &str) -> Option<&'a str> {
    payload?.get(field)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyword_score() {
        assert_eq!(keyword_score("Rust async runtime", "rust runtime"), 1.0);
        assert_eq!(keyword_score("Rust async runtime", "rust GC"), 0.5);
        assert_eq!(keyword_score("Rust", "python"), 0.0);
        assert_eq!(keyword_score("anything", "  "), 0.0);
    }

    #[test]
    fn test_duplicate_query_terms_count_once() {
        assert_eq!(keyword_score("vector store", "vector vector index"), 0.5);
    }

    #[test]
    fn test_payload_text() {
        let payload = json!({"text": "hello", "n": 1});
        assert_eq!(payload_text(Some(&payload), "text"), Some("hello"));
        assert_eq!(payload_text(Some(&payload), "n"), None);
        assert_eq!(payload_text(None, "text"), None);
    }
}
