use sha2::{Digest, Sha256};

/// Collapse all runs of whitespace to single spaces and trim.
/// Hashing and trigram comparisons both go through this so that
/// formatting-only edits don't change identity.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of the whitespace-normalized text, hex-encoded.
pub fn description_hash(description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(description).as_bytes());
    hex_encode(&hasher.finalize())
}

/// Lowercased trigram set of a title, for similarity scoring.
pub fn trigrams(text: &str) -> std::collections::HashSet<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut grams = std::collections::HashSet::new();
    for word in cleaned.split_whitespace() {
        // Pad the way pg_trgm does: two leading spaces, one trailing.
        let padded: Vec<char> = format!("  {word} ").chars().collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// Jaccard similarity over trigram sets, in [0,1].
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    inter as f64 / union as f64
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_normalization_is_idempotent() {
        let once = normalize_whitespace("  BMW\n X5\t\t3.0d ");
        assert_eq!(once, "BMW X5 3.0d");
        assert_eq!(normalize_whitespace(&once), once);
    }

    #[test]
    fn hash_ignores_formatting_only_edits() {
        let a = description_hash("Перфектно  състояние,\nпърви собственик");
        let b = description_hash("Перфектно състояние, първи собственик");
        assert_eq!(a, b);
    }

    #[test]
    fn identical_titles_have_similarity_one() {
        assert!((trigram_similarity("BMW X5 3.0d", "BMW X5 3.0d") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_titles_score_low() {
        assert!(trigram_similarity("BMW X5 3.0d", "Opel Corsa 1.2") < 0.2);
    }
}
