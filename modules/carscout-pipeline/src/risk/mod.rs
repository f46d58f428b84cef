pub mod keywords;
pub mod llm;

pub use keywords::{classify, RuleOutcome, KEYWORDS_VERSION};
pub use llm::{ChatRiskLlm, RiskPrompt, RiskVerdict, PROMPT_VERSION};
