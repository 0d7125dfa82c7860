//! "Did you mean" hints for misspelled names, and the rule id format check.

/// Closest candidate to `input`, compared case-insensitively. Nothing is
/// suggested when more than half the characters would have to change.
pub(crate) fn closest_known<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let needle = input.to_lowercase();
    let (best, distance) = candidates
        .iter()
        .map(|&c| (c, edit_distance(&needle, &c.to_lowercase())))
        .min_by_key(|&(_, d)| d)?;
    let longest = input.chars().count().max(best.chars().count());
    (distance * 2 <= longest).then_some(best)
}

/// Single-row Wagner-Fischer edit distance over chars.
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let target: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=target.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in target.iter().enumerate() {
            let substitute = diagonal + usize::from(ca != cb);
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[target.len()]
}

/// Lowercase alphanumeric words joined by single hyphens.
pub(crate) fn is_kebab_case(s: &str) -> bool {
    s.split('-').all(|word| {
        !word.is_empty() && word.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::KNOWN_CHANNELS;

    #[test]
    fn edit_distance_counts_single_char_edits() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "sms"), 3);
        assert_eq!(edit_distance("email", ""), 5);
        assert_eq!(edit_distance("system", "system"), 0);
    }

    #[test]
    fn suggests_nearby_channel() {
        assert_eq!(closest_known("emial", KNOWN_CHANNELS), Some("email"));
        assert_eq!(closest_known("SYSTM", KNOWN_CHANNELS), Some("system"));
    }

    #[test]
    fn no_suggestion_for_distant_names() {
        assert_eq!(closest_known("pager-duty", KNOWN_CHANNELS), None);
        assert_eq!(closest_known("x", &[]), None);
    }

    #[test]
    fn kebab_case() {
        assert!(is_kebab_case("dairy-low-stock"));
        assert!(is_kebab_case("r1"));
        assert!(!is_kebab_case("Dairy"));
        assert!(!is_kebab_case("-dairy"));
        assert!(!is_kebab_case("dairy--low"));
        assert!(!is_kebab_case("dairy-"));
        assert!(!is_kebab_case(""));
    }
}
