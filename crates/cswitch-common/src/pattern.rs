//! Model whitelist patterns: a literal model id, or a prefix with a
//! single trailing `*`. Rewrite values follow the same grammar and must
//! agree in kind with their key.

/// A pattern is non-empty and contains at most one `*`, only as suffix.
pub fn is_valid(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match pattern.find('*') {
        None => true,
        Some(pos) => pos == pattern.len() - 1,
    }
}

pub fn is_wildcard(pattern: &str) -> bool {
    pattern.ends_with('*')
}

/// Literal key ↔ literal value, wildcard key ↔ wildcard value.
pub fn mapping_compatible(key: &str, value: &str) -> bool {
    is_valid(key) && is_valid(value) && is_wildcard(key) == is_wildcard(value)
}

pub fn matches(pattern: &str, model: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => model.starts_with(prefix),
        None => pattern == model,
    }
}

/// Pick the most specific matching pattern: an exact literal beats any
/// wildcard; among wildcards the longest prefix wins.
pub fn best_match<'a, I>(patterns: I, model: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<&str> = None;
    for pattern in patterns {
        if !matches(pattern, model) {
            continue;
        }
        if !is_wildcard(pattern) {
            return Some(pattern);
        }
        if best.is_none_or(|current| pattern.len() > current.len()) {
            best = Some(pattern);
        }
    }
    best
}

/// Apply a rewrite rule. A literal maps to the literal replacement; a
/// wildcard pair `P*` → `Q*` carries the captured tail across. Returns
/// `None` when the pattern does not match the model.
pub fn rewrite(pattern: &str, replacement: &str, model: &str) -> Option<String> {
    if !matches(pattern, model) {
        return None;
    }
    match (pattern.strip_suffix('*'), replacement.strip_suffix('*')) {
        (Some(prefix), Some(target)) => {
            let tail = &model[prefix.len()..];
            Some(format!("{target}{tail}"))
        }
        (None, None) => Some(replacement.to_string()),
        // Mixed kinds are rejected at validation time; treat a literal
        // replacement as-is if one slips through.
        (Some(_), None) => Some(replacement.to_string()),
        (None, Some(target)) => Some(target.trim_end_matches('*').to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity() {
        assert!(is_valid("claude-sonnet-4"));
        assert!(is_valid("claude-*"));
        assert!(is_valid("*"));
        assert!(!is_valid(""));
        assert!(!is_valid("cla*de"));
        assert!(!is_valid("a*b*"));
    }

    #[test]
    fn matching_semantics() {
        assert!(matches("claude-*", "claude-sonnet-4"));
        assert!(matches("claude-sonnet-4", "claude-sonnet-4"));
        assert!(!matches("claude-sonnet-4", "claude-sonnet-4-5"));
        assert!(matches("*", "anything"));
    }

    #[test]
    fn literal_beats_wildcard_and_longest_prefix_wins() {
        let patterns = ["claude-*", "claude-sonnet-*", "claude-sonnet-4"];
        assert_eq!(
            best_match(patterns, "claude-sonnet-4"),
            Some("claude-sonnet-4")
        );
        assert_eq!(
            best_match(patterns, "claude-sonnet-4-5"),
            Some("claude-sonnet-*")
        );
        assert_eq!(best_match(patterns, "claude-opus-4"), Some("claude-*"));
        assert_eq!(best_match(patterns, "gpt-4o"), None);
    }

    #[test]
    fn wildcard_rewrite_carries_tail() {
        assert_eq!(
            rewrite("claude-*", "anthropic/claude-*", "claude-sonnet-4").as_deref(),
            Some("anthropic/claude-sonnet-4")
        );
        assert_eq!(
            rewrite("acest", "deepseek-chat", "acest").as_deref(),
            Some("deepseek-chat")
        );
        assert_eq!(rewrite("acest", "deepseek-chat", "other"), None);
    }

    #[test]
    fn mapping_kind_compatibility() {
        assert!(mapping_compatible("acest", "deepseek-chat"));
        assert!(mapping_compatible("claude-*", "glm-*"));
        assert!(!mapping_compatible("claude-*", "glm-4"));
        assert!(!mapping_compatible("claude", "glm-*"));
    }
}
