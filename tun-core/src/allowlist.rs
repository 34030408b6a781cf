//! Email allowlist matching for magic authentication.
//!
//! Patterns are either a full address (`alice@example.com`) or a domain
//! suffix starting with `@` (`@example.com`). An empty pattern list allows
//! every identity.

/// Check whether `identity` satisfies any of `patterns`.
///
/// Comparison is case-insensitive and ignores surrounding whitespace on both
/// sides.
pub fn is_allowed<S: AsRef<str>>(identity: &str, patterns: &[S]) -> bool {
    if patterns.is_empty() {
        return true;
    }

    let identity = identity.trim().to_lowercase();

    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref().trim().to_lowercase();
        if pattern.starts_with('@') {
            identity.ends_with(&pattern)
        } else {
            identity == pattern
        }
    })
}

/// Split a comma separated allow policy into trimmed, non-empty patterns.
pub fn parse_patterns(policy: &str) -> Vec<String> {
    policy
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allows_everyone() {
        let none: [&str; 0] = [];
        assert!(is_allowed("anyone@anywhere.io", &none));
    }

    #[test]
    fn test_domain_suffix() {
        let patterns = ["@example.com"];
        assert!(is_allowed("user@example.com", &patterns));
        assert!(is_allowed("other@example.com", &patterns));
        assert!(!is_allowed("user@example.org", &patterns));
        assert!(!is_allowed("user@notexample.com.evil", &patterns));
    }

    #[test]
    fn test_exact_match_does_not_leak_to_domain() {
        let patterns = ["alice@example.com"];
        assert!(is_allowed("alice@example.com", &patterns));
        assert!(!is_allowed("bob@example.com", &patterns));
        assert!(!is_allowed("malice@example.com", &patterns));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let patterns = ["  Alice@Example.COM ", " @Corp.IO"];
        assert!(is_allowed("alice@example.com", &patterns));
        assert!(is_allowed("  ALICE@example.com\t", &patterns));
        assert!(is_allowed("dev@corp.io", &patterns));
        assert!(is_allowed("Dev@CORP.io ", &patterns));
    }

    #[test]
    fn test_parse_patterns() {
        assert_eq!(
            parse_patterns(" @example.com, bob@corp.io ,,"),
            vec!["@example.com".to_string(), "bob@corp.io".to_string()]
        );
        assert!(parse_patterns("").is_empty());
        assert!(parse_patterns(" , ").is_empty());
    }
}
