//! Ordered-pattern intent classification.

use std::sync::LazyLock;

use regex::Regex;

use stepwise_types::QueryIntent;

/// Pattern table, checked in order; the first matching intent wins.
static PATTERNS: LazyLock<Vec<(QueryIntent, Vec<Regex>)>> = LazyLock::new(|| {
    let table: &[(QueryIntent, &[&str])] = &[
        (
            QueryIntent::CurrentStep,
            &[
                r"where am i",
                r"current\W*step",
                r"which step",
                r"my step",
                r"\b(current|now|position)\b",
            ],
        ),
        (
            QueryIntent::NextStep,
            &[
                r"next\W*step",
                r"what.*next",
                r"\bfollowing\b",
                r"after this",
                r"then what",
            ],
        ),
        (
            QueryIntent::RequiredTools,
            &[
                r"\btools?\b",
                r"\bequipment\b",
                r"what.*need",
                r"required\W*tools",
                r"what.*materials",
            ],
        ),
        (
            QueryIntent::CompletionStatus,
            &[
                r"\bprogress\b",
                r"\bstatus\b",
                r"\bdone\b",
                r"\bfinished\b",
                r"\bcomplete\b",
                r"how much",
                r"\bpercent\b",
            ],
        ),
        (
            QueryIntent::ProgressOverview,
            &[
                r"\boverall\b",
                r"\bsummary\b",
                r"\boverview\b",
                r"big picture",
                r"total progress",
            ],
        ),
        (
            QueryIntent::Help,
            &[
                r"\bhelp\b",
                r"how to",
                r"how do",
                r"\bexplain\b",
                r"\bdescribe\b",
                r"\bguide\b",
                r"\bassist\b",
            ],
        ),
    ];
    table
        .iter()
        .map(|(intent, patterns)| (*intent, patterns.iter().map(|p| compile(p)).collect()))
        .collect()
});

#[allow(clippy::unwrap_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Classify a query into an intent. Matching is case-insensitive via
/// lowercasing; no pattern match yields `Unknown`.
#[must_use]
pub fn classify(query: &str) -> QueryIntent {
    let lowered = query.trim().to_lowercase();
    for (intent, patterns) in PATTERNS.iter() {
        if patterns.iter().any(|p| p.is_match(&lowered)) {
            return *intent;
        }
    }
    QueryIntent::Unknown
}
