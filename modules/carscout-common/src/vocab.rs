//! Canonical vocabulary for Bulgarian marketplace listings.
//!
//! Free-form field values (Bulgarian and English variants) map onto the
//! closed enums in `types`. Unknown values map to None — never guessed.

use crate::types::{Body, Fuel, Gearbox};

/// Map a raw fuel string (BG or EN) to the canonical enum.
pub fn canonical_fuel(raw: &str) -> Option<Fuel> {
    match raw.trim().to_lowercase().as_str() {
        "дизел" | "diesel" => Some(Fuel::Diesel),
        "бензин" | "petrol" | "benzin" | "gasoline" => Some(Fuel::Petrol),
        "хибрид" | "хибриден" | "hybrid" | "plug-in hybrid" => Some(Fuel::Hybrid),
        "електро" | "електрически" | "electric" | "ev" => Some(Fuel::Electric),
        "газ" | "газ/бензин" | "lpg" | "пропан-бутан" => Some(Fuel::Lpg),
        "метан" | "cng" | "метан/бензин" => Some(Fuel::Cng),
        _ => None,
    }
}

/// Map a raw gearbox string to the canonical enum.
pub fn canonical_gearbox(raw: &str) -> Option<Gearbox> {
    match raw.trim().to_lowercase().as_str() {
        "ръчна" | "ръчни скорости" | "manual" => Some(Gearbox::Manual),
        "автоматична" | "автоматик" | "автомат" | "automatic" | "auto" => {
            Some(Gearbox::Automatic)
        }
        "полуавтоматична" | "semi-automatic" | "semi_auto" | "dsg" => Some(Gearbox::SemiAuto),
        _ => None,
    }
}

/// Map a raw body string to the canonical enum.
pub fn canonical_body(raw: &str) -> Option<Body> {
    match raw.trim().to_lowercase().as_str() {
        "седан" | "sedan" | "лимузина" => Some(Body::Sedan),
        "хечбек" | "хетчбек" | "hatchback" => Some(Body::Hatchback),
        "комби" | "estate" | "wagon" | "универсал" => Some(Body::Estate),
        "джип" | "suv" | "кросоувър" | "crossover" => Some(Body::Suv),
        "купе" | "коупе" | "coupe" => Some(Body::Coupe),
        "кабрио" | "кабриолет" | "convertible" | "cabrio" => Some(Body::Convertible),
        "ван" | "van" | "миниван" | "minivan" | "бус" => Some(Body::Van),
        "пикап" | "pickup" | "pick-up" => Some(Body::Pickup),
        _ => None,
    }
}

// --- Regions ---

/// Bulgaria's provinces, as canonical region slugs. Settlement synonyms map
/// into their province, which is the single containment level the alert
/// matcher tolerates.
pub const REGIONS: &[&str] = &[
    "blagoevgrad",
    "burgas",
    "dobrich",
    "gabrovo",
    "haskovo",
    "kardzhali",
    "kyustendil",
    "lovech",
    "montana",
    "pazardzhik",
    "pernik",
    "pleven",
    "plovdiv",
    "razgrad",
    "ruse",
    "shumen",
    "silistra",
    "sliven",
    "smolyan",
    "sofia",
    "sofia-oblast",
    "stara-zagora",
    "targovishte",
    "varna",
    "veliko-tarnovo",
    "vidin",
    "vratsa",
    "yambol",
];

/// Canonicalize a raw region or settlement string to a province slug.
pub fn canonical_region(raw: &str) -> Option<&'static str> {
    let folded = raw.trim().to_lowercase();
    let slug = match folded.as_str() {
        "софия" | "sofia" | "гр. софия" | "софия град" => "sofia",
        "софия област" | "софия-област" | "sofia-oblast" => "sofia-oblast",
        "пловдив" | "plovdiv" => "plovdiv",
        "варна" | "varna" => "varna",
        "бургас" | "burgas" => "burgas",
        "русе" | "ruse" => "ruse",
        "стара загора" | "stara zagora" | "stara-zagora" => "stara-zagora",
        "плевен" | "pleven" => "pleven",
        "благоевград" | "blagoevgrad" => "blagoevgrad",
        "велико търново" | "veliko tarnovo" | "veliko-tarnovo" => "veliko-tarnovo",
        "видин" | "vidin" => "vidin",
        "враца" | "vratsa" => "vratsa",
        "габрово" | "gabrovo" => "gabrovo",
        "добрич" | "dobrich" => "dobrich",
        "кърджали" | "kardzhali" => "kardzhali",
        "кюстендил" | "kyustendil" => "kyustendil",
        "ловеч" | "lovech" => "lovech",
        "монтана" | "montana" => "montana",
        "пазарджик" | "pazardzhik" => "pazardzhik",
        "перник" | "pernik" => "pernik",
        "разград" | "razgrad" => "razgrad",
        "силистра" | "silistra" => "silistra",
        "сливен" | "sliven" => "sliven",
        "смолян" | "smolyan" => "smolyan",
        "търговище" | "targovishte" => "targovishte",
        "хасково" | "haskovo" => "haskovo",
        "шумен" | "shumen" => "shumen",
        "ямбол" | "yambol" => "yambol",
        // Settlements that sellers commonly list instead of a province.
        "несебър" | "поморие" | "созопол" | "nesebar" => "burgas",
        "банско" | "сандански" | "петрич" | "bansko" => "blagoevgrad",
        "казанлък" | "kazanlak" => "stara-zagora",
        "асеновград" | "asenovgrad" => "plovdiv",
        "дупница" | "dupnitsa" => "kyustendil",
        "горна оряховица" => "veliko-tarnovo",
        _ => return None,
    };
    Some(slug)
}

// --- Plausibility bounds ---

pub const YEAR_MIN: i32 = 1980;
pub const MILEAGE_MAX_KM: i64 = 1_000_000;

/// Reject years outside [1980, current+1] (next-model-year listings exist).
pub fn plausible_year(year: i32, current_year: i32) -> bool {
    (YEAR_MIN..=current_year + 1).contains(&year)
}

/// Reject negative or absurd odometer readings.
pub fn plausible_mileage(km: i64) -> bool {
    (0..=MILEAGE_MAX_KM).contains(&km)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulgarian_and_english_fuel_variants_agree() {
        assert_eq!(canonical_fuel("Дизел"), Some(Fuel::Diesel));
        assert_eq!(canonical_fuel("diesel"), Some(Fuel::Diesel));
        assert_eq!(canonical_fuel("метан"), Some(Fuel::Cng));
        assert_eq!(canonical_fuel("ракета"), None);
    }

    #[test]
    fn gearbox_variants() {
        assert_eq!(canonical_gearbox("автоматик"), Some(Gearbox::Automatic));
        assert_eq!(canonical_gearbox("Ръчна"), Some(Gearbox::Manual));
    }

    #[test]
    fn settlement_maps_to_province() {
        assert_eq!(canonical_region("Несебър"), Some("burgas"));
        assert_eq!(canonical_region("София"), Some("sofia"));
        assert_eq!(canonical_region("Atlantis"), None);
    }

    #[test]
    fn year_bounds_are_inclusive() {
        assert!(plausible_year(1980, 2026));
        assert!(plausible_year(2027, 2026));
        assert!(!plausible_year(1979, 2026));
        assert!(!plausible_year(2028, 2026));
    }
}
