use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// --- Canonical listing enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Fuel {
    Petrol,
    Diesel,
    Hybrid,
    Electric,
    Lpg,
    Cng,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Gearbox {
    Manual,
    Automatic,
    SemiAuto,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Sedan,
    Hatchback,
    Estate,
    Suv,
    Coupe,
    Convertible,
    Van,
    Pickup,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreState {
    Draft,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Notified,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMethod {
    Phone,
    Text,
    Image,
    Embedding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanName {
    Free,
    Premium,
    Pro,
}

// --- Pipeline stages ---

/// The typed queue a task belongs to. Stages are strictly ordered per
/// listing; cross-listing ordering is not guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Normalize,
    Dedupe,
    Price,
    Risk,
    Score,
    Channel,
    AlertMatch,
    UserNotify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Normalize => "normalize",
            Stage::Dedupe => "dedupe",
            Stage::Price => "price",
            Stage::Risk => "risk",
            Stage::Score => "score",
            Stage::Channel => "channel",
            Stage::AlertMatch => "alert_match",
            Stage::UserNotify => "user_notify",
        }
    }

    pub fn parse_str(s: &str) -> Option<Stage> {
        match s {
            "parse" => Some(Stage::Parse),
            "normalize" => Some(Stage::Normalize),
            "dedupe" => Some(Stage::Dedupe),
            "price" => Some(Stage::Price),
            "risk" => Some(Stage::Risk),
            "score" => Some(Stage::Score),
            "channel" => Some(Stage::Channel),
            "alert_match" => Some(Stage::AlertMatch),
            "user_notify" => Some(Stage::UserNotify),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! str_enum_display {
    ($ty:ty { $($variant:path => $s:expr),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $s),+
                }
            }

            pub fn parse_str(s: &str) -> Option<Self> {
                match s {
                    $($s => Some($variant)),+,
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum_display!(Fuel {
    Fuel::Petrol => "petrol",
    Fuel::Diesel => "diesel",
    Fuel::Hybrid => "hybrid",
    Fuel::Electric => "electric",
    Fuel::Lpg => "lpg",
    Fuel::Cng => "cng",
    Fuel::Other => "other",
});

str_enum_display!(Gearbox {
    Gearbox::Manual => "manual",
    Gearbox::Automatic => "automatic",
    Gearbox::SemiAuto => "semi_auto",
    Gearbox::Other => "other",
});

str_enum_display!(Body {
    Body::Sedan => "sedan",
    Body::Hatchback => "hatchback",
    Body::Estate => "estate",
    Body::Suv => "suv",
    Body::Coupe => "coupe",
    Body::Convertible => "convertible",
    Body::Van => "van",
    Body::Pickup => "pickup",
    Body::Other => "other",
});

str_enum_display!(RiskLevel {
    RiskLevel::Green => "green",
    RiskLevel::Yellow => "yellow",
    RiskLevel::Red => "red",
});

str_enum_display!(ScoreState {
    ScoreState::Draft => "draft",
    ScoreState::Approved => "approved",
    ScoreState::Rejected => "rejected",
});

str_enum_display!(MatchStatus {
    MatchStatus::Pending => "pending",
    MatchStatus::Notified => "notified",
    MatchStatus::Skipped => "skipped",
    MatchStatus::Failed => "failed",
});

str_enum_display!(DuplicateMethod {
    DuplicateMethod::Phone => "phone",
    DuplicateMethod::Text => "text",
    DuplicateMethod::Image => "image",
    DuplicateMethod::Embedding => "embedding",
});

str_enum_display!(PlanName {
    PlanName::Free => "free",
    PlanName::Premium => "premium",
    PlanName::Pro => "pro",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_round_trips_through_str() {
        for stage in [
            Stage::Parse,
            Stage::Normalize,
            Stage::Dedupe,
            Stage::Price,
            Stage::Risk,
            Stage::Score,
            Stage::Channel,
            Stage::AlertMatch,
            Stage::UserNotify,
        ] {
            assert_eq!(Stage::parse_str(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn fuel_parse_rejects_unknown() {
        assert_eq!(Fuel::parse_str("дизел"), None);
        assert_eq!(Fuel::parse_str("diesel"), Some(Fuel::Diesel));
    }
}
