//! Phone normalization and caller-prefix matching (spec §4.6).

use crate::queue_entry::PrefixMode;

/// Normalize a phone number: strip every non-digit character except a
/// leading `+`, then prepend `+` if it's missing.
///
/// `"+1 (495) 123-4567"` -> `"+14951234567"`; `"7-495-123-45-67"` ->
/// `"+74951234567"`.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        }
    }
    format!("+{digits}")
}

/// Does a single configured prefix (already normalized the same way) match
/// a normalized phone number?
fn prefix_is_prefix_of(prefix: &str, phone: &str) -> bool {
    phone.starts_with(prefix)
}

/// Evaluate a caller's `(mode, prefixes)` against a normalized phone number.
///
/// - `Include` — matches if any configured prefix is a prefix of the phone.
/// - `Exclude` — matches if *none* of the configured prefixes match.
/// - `All` — always matches.
///
/// Prefixes are normalized the same way phone numbers are before comparison.
#[must_use]
pub fn prefix_matches(mode: PrefixMode, prefixes: &[String], normalized_phone: &str) -> bool {
    match mode {
        PrefixMode::All => true,
        PrefixMode::Include => prefixes
            .iter()
            .any(|p| prefix_is_prefix_of(&normalize_phone(p), normalized_phone)),
        PrefixMode::Exclude => !prefixes
            .iter()
            .any(|p| prefix_is_prefix_of(&normalize_phone(p), normalized_phone)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_punctuation_and_spaces() {
        assert_eq!(normalize_phone("+1 (495) 123-4567"), "+14951234567");
        assert_eq!(normalize_phone("7-495-123-45-67"), "+74951234567");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_phone("+74951234567");
        assert_eq!(normalize_phone(&once), once);
    }

    #[test]
    fn include_mode_matches_any_prefix() {
        let prefixes = vec!["+7".to_string()];
        assert!(prefix_matches(PrefixMode::Include, &prefixes, "+74951234567"));
        assert!(!prefix_matches(PrefixMode::Include, &prefixes, "+492111234567"));
    }

    #[test]
    fn exclude_mode_matches_when_no_prefix_hits() {
        let prefixes = vec!["+7".to_string(), "+86".to_string(), "+1".to_string()];
        assert!(prefix_matches(PrefixMode::Exclude, &prefixes, "+492111234567"));
        assert!(!prefix_matches(PrefixMode::Exclude, &prefixes, "+74951234567"));
    }

    #[test]
    fn all_mode_always_matches() {
        assert!(prefix_matches(PrefixMode::All, &[], "+492111234567"));
    }

    /// §8 "Prefix routing" scenario, reproduced directly.
    #[test]
    fn spec_prefix_routing_scenario() {
        let eu_prefixes = vec!["+7".to_string(), "+86".to_string(), "+1".to_string()];
        let ru_prefixes = vec!["+7".to_string()];

        // Node phone +74951234567 -> ru (include +7 matches, eu excludes +7)
        let phone = normalize_phone("+74951234567");
        assert!(!prefix_matches(PrefixMode::Exclude, &eu_prefixes, &phone));
        assert!(prefix_matches(PrefixMode::Include, &ru_prefixes, &phone));

        // Node phone +492111234567 -> eu (exclude set doesn't contain +49)
        let phone = normalize_phone("+492111234567");
        assert!(prefix_matches(PrefixMode::Exclude, &eu_prefixes, &phone));
        assert!(!prefix_matches(PrefixMode::Include, &ru_prefixes, &phone));

        // Node phone +861012345678 -> eu excluded (+86 in exclude list), ru
        // doesn't match (+7 prefix) -> falls through to fallback (all).
        let phone = normalize_phone("+861012345678");
        assert!(!prefix_matches(PrefixMode::Exclude, &eu_prefixes, &phone));
        assert!(!prefix_matches(PrefixMode::Include, &ru_prefixes, &phone));
        assert!(prefix_matches(PrefixMode::All, &[], &phone));
    }
}
