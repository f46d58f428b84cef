//! Brand/model canonicalization against the `brand_models` alias table.
//!
//! The matcher tries exact (case-folded), then the alias set, then fuzzy
//! (edit distance ≤ 2 with a length guard so "a4" never fuzzes into "a6").
//! A listing with no confident mapping stays a draft.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgPool;
use strsim::levenshtein;

use carscout_store::brand_models::BrandModel;

/// Max edit distance for a fuzzy model hit.
const FUZZY_MAX_DISTANCE: usize = 2;
/// Fuzzy matching needs enough characters to be meaningful.
const FUZZY_MIN_LEN: usize = 5;

#[derive(Debug, Clone)]
struct Entry {
    brand_id: String,
    model_id: String,
    /// model_id plus alias spellings, cleaned.
    model_variants: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AliasMatcher {
    entries: Vec<Entry>,
    /// brand variant (cleaned) → brand_id
    brands: HashMap<String, String>,
}

impl AliasMatcher {
    pub async fn load(pool: &PgPool) -> Result<Self> {
        let rows = BrandModel::load_active(pool).await?;
        Ok(Self::from_table(&rows))
    }

    pub fn from_table(rows: &[BrandModel]) -> Self {
        let mut entries = Vec::with_capacity(rows.len());
        let mut brands = HashMap::new();

        for row in rows {
            let brand_id = row.brand_id.clone();
            brands.insert(clean(&brand_id), brand_id.clone());
            for variant in brand_synonyms(&brand_id) {
                brands.insert(variant.to_string(), brand_id.clone());
            }

            let mut model_variants = vec![clean(&row.model_id)];
            for alias in row.alias_list() {
                model_variants.push(clean(&alias));
            }
            entries.push(Entry {
                brand_id,
                model_id: row.model_id.clone(),
                model_variants,
            });
        }

        Self { entries, brands }
    }

    /// Canonicalize a raw `(brand, model)` pair.
    pub fn match_pair(&self, brand_raw: &str, model_raw: &str) -> Option<(String, String)> {
        let brand_id = self.match_brand(brand_raw)?;
        let model = clean(model_raw);
        if model.is_empty() {
            return None;
        }

        // Exact and alias hits first.
        for entry in self.entries.iter().filter(|e| e.brand_id == brand_id) {
            if entry.model_variants.iter().any(|v| v == &model) {
                return Some((entry.brand_id.clone(), entry.model_id.clone()));
            }
        }

        // Model strings often carry trim suffixes ("x5 3.0d xdrive") —
        // retry on the leading token(s).
        let lead = model.split_whitespace().next().unwrap_or("");
        if lead != model {
            for entry in self.entries.iter().filter(|e| e.brand_id == brand_id) {
                if entry.model_variants.iter().any(|v| v == lead) {
                    return Some((entry.brand_id.clone(), entry.model_id.clone()));
                }
            }
        }

        // Fuzzy fallback, guarded by length.
        if model.len() >= FUZZY_MIN_LEN {
            let mut best: Option<(usize, &Entry)> = None;
            for entry in self.entries.iter().filter(|e| e.brand_id == brand_id) {
                for variant in &entry.model_variants {
                    if variant.len() < FUZZY_MIN_LEN {
                        continue;
                    }
                    let dist = levenshtein(&model, variant);
                    if dist <= FUZZY_MAX_DISTANCE && best.map_or(true, |(d, _)| dist < d) {
                        best = Some((dist, entry));
                    }
                }
            }
            if let Some((_, entry)) = best {
                return Some((entry.brand_id.clone(), entry.model_id.clone()));
            }
        }

        None
    }

    /// Canonicalize a brand string alone.
    pub fn match_brand(&self, brand_raw: &str) -> Option<String> {
        self.brands.get(&clean(brand_raw)).cloned()
    }

    /// Greedy scan over query tokens: the first token that is a brand wins,
    /// then the following 1–2 tokens are tried as its model. Returns the
    /// hits plus the indexes of consumed tokens.
    pub fn match_tokens(&self, tokens: &[&str]) -> (Option<String>, Option<String>, Vec<usize>) {
        let mut consumed = Vec::new();
        let mut brand_id = None;
        let mut model_id = None;

        for (i, token) in tokens.iter().enumerate() {
            if brand_id.is_none() {
                if let Some(b) = self.match_brand(token) {
                    brand_id = Some(b);
                    consumed.push(i);
                    continue;
                }
            } else if model_id.is_none() {
                // Two-token models ("c class") before single tokens.
                if i + 1 < tokens.len() {
                    let pair = format!("{} {}", token, tokens[i + 1]);
                    if let Some((_, m)) =
                        self.match_pair(brand_id.as_deref().unwrap_or(""), &pair)
                    {
                        model_id = Some(m);
                        consumed.push(i);
                        consumed.push(i + 1);
                        break;
                    }
                }
                if let Some((_, m)) = self.match_pair(brand_id.as_deref().unwrap_or(""), token) {
                    model_id = Some(m);
                    consumed.push(i);
                    break;
                }
            }
        }

        (brand_id, model_id, consumed)
    }
}

/// Lowercase, strip punctuation except dashes, collapse whitespace.
fn clean(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Spellings sellers actually type, per brand. Model aliases live in the
/// table; brand synonyms are stable enough to hardcode.
fn brand_synonyms(brand_id: &str) -> &'static [&'static str] {
    match brand_id {
        "bmw" => &["бмв"],
        "mercedes-benz" => &["mercedes", "мерцедес", "benz"],
        "volkswagen" => &["vw", "фолксваген"],
        "audi" => &["ауди"],
        "toyota" => &["тойота"],
        "ford" => &["форд"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<BrandModel> {
        let row = |brand: &str, model: &str, aliases: &[&str]| BrandModel {
            brand_id: brand.to_string(),
            model_id: model.to_string(),
            aliases: serde_json::json!(aliases),
            locale: "bg".to_string(),
        };
        vec![
            row("bmw", "x5", &["x 5", "х5"]),
            row("bmw", "320", &["3 series"]),
            row("mercedes-benz", "c-class", &["c class", "ц класа"]),
            row("volkswagen", "passat", &["пасат"]),
        ]
    }

    #[test]
    fn exact_match_is_case_folded() {
        let m = AliasMatcher::from_table(&table());
        assert_eq!(
            m.match_pair("BMW", "X5"),
            Some(("bmw".to_string(), "x5".to_string()))
        );
    }

    #[test]
    fn cyrillic_alias_resolves() {
        let m = AliasMatcher::from_table(&table());
        assert_eq!(
            m.match_pair("бмв", "х5"),
            Some(("bmw".to_string(), "x5".to_string()))
        );
        assert_eq!(
            m.match_pair("VW", "Пасат"),
            Some(("volkswagen".to_string(), "passat".to_string()))
        );
    }

    #[test]
    fn trim_suffix_falls_back_to_lead_token() {
        let m = AliasMatcher::from_table(&table());
        assert_eq!(
            m.match_pair("bmw", "x5 3.0d xdrive"),
            Some(("bmw".to_string(), "x5".to_string()))
        );
    }

    #[test]
    fn fuzzy_needs_length() {
        let m = AliasMatcher::from_table(&table());
        // "pasat" would hit "passat" at distance 1 only via the alias; a
        // two-letter typo on a short model must not match.
        assert_eq!(m.match_pair("bmw", "x9"), None);
        assert_eq!(
            m.match_pair("volkswagen", "passatt"),
            Some(("volkswagen".to_string(), "passat".to_string()))
        );
    }

    #[test]
    fn unknown_brand_is_none() {
        let m = AliasMatcher::from_table(&table());
        assert_eq!(m.match_pair("lada", "niva"), None);
    }

    #[test]
    fn token_scan_finds_two_word_model() {
        let m = AliasMatcher::from_table(&table());
        let tokens = vec!["mercedes", "c", "class", "diesel"];
        let (brand, model, consumed) = m.match_tokens(&tokens);
        assert_eq!(brand.as_deref(), Some("mercedes-benz"));
        assert_eq!(model.as_deref(), Some("c-class"));
        assert_eq!(consumed, vec![0, 1, 2]);
    }
}
