use std::collections::BTreeSet;

use waitwatch_common::text::tokens;

/// Edit-distance similarity on a 0-100 scale.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Order-insensitive similarity tolerant of extra words on either side.
///
/// Both inputs are tokenized and deduplicated. The shared tokens are compared
/// against each side's full token set, and the best of the three pairings
/// wins, so "Mercy General" vs "General Hospital Mercy" scores high.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let left: BTreeSet<String> = tokens(a).into_iter().collect();
    let right: BTreeSet<String> = tokens(b).into_iter().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let join = |set: Vec<&String>| {
        set.into_iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    };
    let shared = join(left.intersection(&right).collect());
    let only_left = join(left.difference(&right).collect());
    let only_right = join(right.difference(&left).collect());

    let combined = |rest: &str| {
        match (shared.is_empty(), rest.is_empty()) {
            (true, _) => rest.to_string(),
            (false, true) => shared.clone(),
            (false, false) => format!("{shared} {rest}"),
        }
    };
    let full_left = combined(&only_left);
    let full_right = combined(&only_right);

    let mut best = ratio(&full_left, &full_right);
    if !shared.is_empty() {
        best = best
            .max(ratio(&shared, &full_left))
            .max(ratio(&shared, &full_right));
    }
    best
}
