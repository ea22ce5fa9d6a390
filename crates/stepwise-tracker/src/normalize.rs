//! Observation text cleanup.
//!
//! Vision-model output arrives with artifacts: runs of whitespace, stray
//! control characters, stuttered punctuation, or outright garbage. The
//! normalizer either produces clean text or rejects the observation.

use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+"));
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| compile(r#"[^A-Za-z0-9 .,!?;:()'"-]"#));
static ELLIPSIS_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\.{3,}"));
static BANG_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"!{2,}"));
static QUESTION_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\?{2,}"));

#[allow(clippy::unwrap_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Minimum usable length, before and after cleaning.
const MIN_LEN: usize = 3;
/// Minimum share of alphabetic characters in the cleaned text.
const MIN_ALPHA_RATIO: f64 = 0.3;

/// Clean and validate raw observation text.
///
/// Returns `None` when the input is unusable: shorter than three
/// characters, mostly non-alphabetic after cleaning, or empty once
/// artifacts are stripped.
#[must_use]
pub fn normalize(raw: &str) -> Option<String> {
    if raw.trim().chars().count() < MIN_LEN {
        return None;
    }

    let collapsed = WHITESPACE.replace_all(raw.trim(), " ");
    let cleaned = DISALLOWED.replace_all(&collapsed, "");
    let cleaned = ELLIPSIS_RUN.replace_all(&cleaned, "...");
    let cleaned = BANG_RUN.replace_all(&cleaned, "!");
    let cleaned = QUESTION_RUN.replace_all(&cleaned, "?");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return None;
    }
    let total = cleaned.chars().count();
    let alpha = cleaned.chars().filter(char::is_ascii_alphabetic).count();
    if (alpha as f64) / (total as f64) < MIN_ALPHA_RATIO {
        return None;
    }
    if cleaned.chars().count() < MIN_LEN {
        return None;
    }
    Some(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_short_input() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("  "), None);
        assert_eq!(normalize("ab"), None);
        assert_eq!(normalize(" a  "), None);
        // Exactly three characters after trimming is enough.
        assert_eq!(normalize(" a b ").as_deref(), Some("a b"));
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(
            normalize("pouring   water\n\tinto the  cup").as_deref(),
            Some("pouring water into the cup")
        );
    }

    #[test]
    fn strips_disallowed_characters() {
        // Removal runs after whitespace collapsing, so a stripped token
        // leaves the spaces that surrounded it.
        assert_eq!(
            normalize("grinding beans \u{1F600}\u{1F600} now").as_deref(),
            Some("grinding beans  now")
        );
        assert_eq!(
            normalize("kettle @ 90% [boiling]").as_deref(),
            Some("kettle  90 boiling")
        );
    }

    #[test]
    fn collapses_stuttered_punctuation() {
        assert_eq!(
            normalize("done..... almost!!! right???").as_deref(),
            Some("done... almost! right?")
        );
    }

    #[test]
    fn rejects_mostly_non_alphabetic_text() {
        assert_eq!(normalize("12345 678 90 ..."), None);
        assert_eq!(normalize("?!?!?!"), None);
    }

    #[test]
    fn keeps_ordinary_sentences_intact() {
        let text = "The user is placing a filter into the dripper.";
        assert_eq!(normalize(text).as_deref(), Some(text));
    }
}
