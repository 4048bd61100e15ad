//! Text similarity for grading descriptive-field conflicts.

/// Levenshtein edit distance between two strings, counted in chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two rolling rows instead of the full matrix.
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Similarity ratio in `[0.0, 1.0]`; `1.0` means identical.
///
/// Defined as `1 - distance / max(len_a, len_b)`. Two empty strings are
/// identical.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distance_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        assert_eq!(levenshtein("café", "cafe"), 1);
    }

    #[test]
    fn similarity_thresholds() {
        assert_eq!(text_similarity("Blue Shirt", "Blue Shirt"), 1.0);
        assert!(text_similarity("Blue Shirt", "Blue Shirts") > 0.5);
        assert!(text_similarity("Blue Shirt", "Garden hose reel") < 0.5);
        assert_eq!(text_similarity("", ""), 1.0);
        assert_eq!(text_similarity("abc", ""), 0.0);
    }

    proptest! {
        #[test]
        fn similarity_is_bounded_and_symmetric(a in ".{0,24}", b in ".{0,24}") {
            let s = text_similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&s));
            prop_assert_eq!(s, text_similarity(&b, &a));
        }

        #[test]
        fn identical_strings_are_fully_similar(a in ".{0,24}") {
            prop_assert_eq!(text_similarity(&a, &a), 1.0);
        }
    }
}
