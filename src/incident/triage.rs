use crate::incident::Priority;

/// Keyword stems per priority tier. **Order matters** – the first tier with a
/// matching stem wins, so a message mentioning both an overflow and a leak is
/// still `P0`. Anything that matches no tier is `P2`.
pub const PRIORITY_KEYWORDS: &[(Priority, &[&str])] = &[
    (Priority::P0, &["overflow", "sewer", "emergency"]),
    (Priority::P1, &["leak", "backup"]),
];

/// Case-insensitive substring triage of a report description.
pub fn classify(description: &str) -> Priority {
    let lower = description.to_lowercase();
    PRIORITY_KEYWORDS
        .iter()
        .find(|(_, stems)| stems.iter().any(|s| lower.contains(s)))
        .map_or(Priority::P2, |&(priority, _)| priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p0_keywords() {
        assert_eq!(classify("Manhole OVERFLOW on Main Rd"), Priority::P0);
        assert_eq!(classify("sewer smell"), Priority::P0);
        assert_eq!(classify("Emergency at the school"), Priority::P0);
    }

    #[test]
    fn p1_keywords() {
        assert_eq!(classify("small leak under the bridge"), Priority::P1);
        assert_eq!(classify("Toilet BACKUP in block C"), Priority::P1);
    }

    #[test]
    fn p0_wins_over_p1() {
        assert_eq!(classify("overflow and a leak"), Priority::P0);
        assert_eq!(classify("backup caused a sewer spill"), Priority::P0);
    }

    #[test]
    fn everything_else_is_p2() {
        assert_eq!(classify("bad smell near the park"), Priority::P2);
        assert_eq!(classify(""), Priority::P2);
    }

    #[test]
    fn stems_match_inside_words() {
        assert_eq!(classify("sewerage pipe"), Priority::P0);
        assert_eq!(classify("leaking tap"), Priority::P1);
    }
}
