//! Rule-stage risk classifier for Bulgarian car listings.
//!
//! Keyword lists are versioned; bump `KEYWORDS_VERSION` on any edit so
//! stored evaluations can be told apart from fresh ones.

use std::collections::BTreeMap;

use carscout_common::RiskLevel;

pub const KEYWORDS_VERSION: &str = "bg-2";

/// Hard categories: any hit is an immediate red.
const ACCIDENT: &[&str] = &[
    "катастрофирал",
    "катастрофа",
    "удар",
    "ударен",
    "удряна",
    "счупен",
    "повредена",
    "повреди от катастрофа",
    "accident",
    "crashed",
    "collision",
];

const SALVAGE: &[&str] = &[
    "тотал",
    "тотална щета",
    "дерегистриран",
    "бракуван",
    "на части",
    "за части",
    "без документи",
    "salvage",
    "totaled",
    "write-off",
    "for parts",
];

/// Soft categories: individually suspicious, decisive only in numbers.
const IMPORT: &[&str] = &[
    "нов внос",
    "пресен внос",
    "американски внос",
    "от америка",
    "на път",
    "очаква се",
    "fresh import",
    "imported from",
];

const URGENCY: &[&str] = &[
    "спешно",
    "бърза продажба",
    "зле ми са парите",
    "заминавам",
    "напускам държавата",
    "последна цена",
    "urgent",
    "quick sale",
    "need money",
];

const ODOMETER_TAMPER: &[&str] = &[
    "реални километри",
    "неманипулиран километраж",
    "верен километраж",
    "превъртян",
    "сменен километраж",
    "real mileage",
    "original mileage",
];

const COSMETIC: &[&str] = &[
    "драскотини",
    "вдлъбнатини",
    "нуждае се от бояджийски",
    "забележки по боята",
    "scratches",
    "dents",
    "needs bodywork",
];

/// Positive indicators nudge an otherwise clean listing toward green.
const POSITIVE: &[&str] = &[
    "сервизна история",
    "редовно обслужвана",
    "на гаранция",
    "първи собственик",
    "един собственик",
    "личен автомобил",
    "перфектно състояние",
    "отлично състояние",
    "много запазена",
    "service history",
    "well maintained",
    "under warranty",
    "first owner",
    "one owner",
];

const SOFT_CATEGORIES: &[(&str, &[&str])] = &[
    ("import", IMPORT),
    ("urgency", URGENCY),
    ("odometer_tamper", ODOMETER_TAMPER),
    ("cosmetic", COSMETIC),
];

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    /// category → matched keywords
    pub flags: BTreeMap<String, Vec<String>>,
    pub positive: Vec<String>,
    pub risk_level: RiskLevel,
    pub rule_confidence: f64,
    /// True when the rules alone can't settle it.
    pub needs_llm: bool,
}

impl RuleOutcome {
    pub fn hard_accident_flag(&self) -> bool {
        self.flags.contains_key("accident")
    }

    pub fn flags_json(&self) -> serde_json::Value {
        serde_json::json!({
            "categories": self.flags,
            "positive": self.positive,
        })
    }
}

/// Classify `title + description` by keyword scan.
///
/// Decision table:
/// - any accident/salvage hit → red, skip escalation
/// - zero flags → green (positives push confidence up)
/// - three or more distinct soft categories → yellow
/// - one or two soft categories → uncertain, escalate
pub fn classify(title: &str, description: &str) -> RuleOutcome {
    let text = format!("{}\n{}", title, description).to_lowercase();

    let mut flags: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (category, list) in [("accident", ACCIDENT), ("salvage", SALVAGE)] {
        let hits = matches_in(&text, list);
        if !hits.is_empty() {
            flags.insert(category.to_string(), hits);
        }
    }
    let hard_hits: usize = flags.values().map(Vec::len).sum();

    let mut soft_categories = 0usize;
    for (category, list) in SOFT_CATEGORIES {
        let hits = matches_in(&text, list);
        if !hits.is_empty() {
            soft_categories += 1;
            flags.insert(category.to_string(), hits);
        }
    }

    let positive = matches_in(&text, POSITIVE);

    if hard_hits > 0 {
        return RuleOutcome {
            flags,
            positive,
            risk_level: RiskLevel::Red,
            rule_confidence: (0.8 + 0.05 * (hard_hits.saturating_sub(1)) as f64).min(0.95),
            needs_llm: false,
        };
    }

    if soft_categories == 0 {
        let rule_confidence = if positive.len() >= 2 { 0.75 } else { 0.7 };
        return RuleOutcome {
            flags,
            positive,
            risk_level: RiskLevel::Green,
            rule_confidence,
            needs_llm: false,
        };
    }

    if soft_categories >= 3 {
        return RuleOutcome {
            flags,
            positive,
            risk_level: RiskLevel::Yellow,
            rule_confidence: (0.6 + 0.05 * (soft_categories - 3) as f64).min(0.75),
            needs_llm: false,
        };
    }

    // One or two soft categories: below the confidence bar, let the LLM look.
    RuleOutcome {
        flags,
        positive,
        risk_level: RiskLevel::Yellow,
        rule_confidence: 0.45 + 0.1 * soft_categories as f64,
        needs_llm: true,
    }
}

fn matches_in(text: &str, keywords: &[&str]) -> Vec<String> {
    keywords
        .iter()
        .filter(|kw| text.contains(*kw))
        .map(|kw| kw.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salvage_keyword_is_immediate_red() {
        let outcome = classify("BMW X5 на части", "");
        assert_eq!(outcome.risk_level, RiskLevel::Red);
        assert!(outcome.rule_confidence >= 0.8);
        assert!(!outcome.needs_llm);
        assert!(outcome.flags.contains_key("salvage"));
    }

    #[test]
    fn clean_listing_is_green_without_escalation() {
        let outcome = classify("Audi A4 2.0 TDI", "Редовно обслужвана, гаражна");
        assert_eq!(outcome.risk_level, RiskLevel::Green);
        assert!((outcome.rule_confidence - 0.7).abs() < 1e-9);
        assert!(!outcome.needs_llm);
    }

    #[test]
    fn two_positives_raise_green_confidence() {
        let outcome = classify("Audi A4", "Първи собственик, сервизна история");
        assert_eq!(outcome.risk_level, RiskLevel::Green);
        assert!((outcome.rule_confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn three_soft_categories_are_yellow_without_llm() {
        let outcome = classify(
            "VW Golf нов внос",
            "Спешно, реални километри, идеална за града",
        );
        assert_eq!(outcome.risk_level, RiskLevel::Yellow);
        assert!(outcome.rule_confidence >= 0.6);
        assert!(!outcome.needs_llm);
    }

    #[test]
    fn single_soft_flag_escalates() {
        let outcome = classify("VW Golf", "Бърза продажба, запазен");
        assert!(outcome.needs_llm);
        assert!(outcome.rule_confidence < 0.7);
    }

    #[test]
    fn accident_flag_is_detectable_for_scoring() {
        let outcome = classify("Мерцедес след удар", "");
        assert!(outcome.hard_accident_flag());
    }
}
