//! Deduplication of namespace names discovered across store items.
//!
//! A namespace appears once per stored key, so enumeration sees repeats.
//! The two backends have different orderings and the difference is kept as
//! observed: keychain enumeration sorts lexicographically before dropping
//! adjacent repeats, while the Secret Service backend keeps store
//! enumeration order and keeps the first occurrence. Callers that display
//! namespaces rely on whichever behavior their platform has always had.

use std::collections::HashSet;

/// Sort lexicographically, then drop adjacent repeats.
pub fn dedup_sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names.dedup();
    names
}

/// Keep the first occurrence of each name, preserving input order.
pub fn dedup_first_seen<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for name in names {
        if seen.insert(name.clone()) {
            unique.push(name);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_dedup_sorted_orders_and_uniques() {
        let result = dedup_sorted(names(&["github", "aws", "github", "aws", "db"]));
        assert_eq!(result, names(&["aws", "db", "github"]));
    }

    #[test]
    fn test_dedup_sorted_empty() {
        assert!(dedup_sorted(Vec::new()).is_empty());
    }

    #[test]
    fn test_dedup_first_seen_preserves_store_order() {
        let result = dedup_first_seen(names(&["github", "aws", "github", "db", "aws"]));
        assert_eq!(result, names(&["github", "aws", "db"]));
    }

    #[test]
    fn test_dedup_first_seen_single() {
        let result = dedup_first_seen(names(&["aws"]));
        assert_eq!(result, names(&["aws"]));
    }
}
