//! Deterministic answer templates.

use std::fmt::Write as _;

use stepwise_types::{MatchedStep, QueryIntent, StateSnapshot};

/// Answer when no state exists yet, regardless of intent.
pub const NO_STATE_ANSWER: &str = "No active state. Please start a task first.";

/// Render the answer for a classified intent from the state snapshot.
///
/// Pure: the same `(intent, snapshot)` always yields the same text.
#[must_use]
pub fn render(intent: QueryIntent, snapshot: Option<&StateSnapshot>) -> String {
    let Some(state) = snapshot else {
        return NO_STATE_ANSWER.to_string();
    };
    let task_id = state.task_id.as_str();
    let step = state.step_index.unwrap_or(0);
    let confidence = state.similarity;
    let detail = state.matched_step.as_ref();

    match intent {
        QueryIntent::CurrentStep => {
            let mut out = format!(
                "You are currently on step {step} of task '{task_id}' (confidence: {confidence:.2})"
            );
            if let Some(detail) = detail {
                let _ = write!(
                    out,
                    "\n\nStep: {}\nDescription: {}",
                    detail.step_title, detail.step_description
                );
            }
            out
        }
        QueryIntent::NextStep => {
            format!(
                "Next step is step {}. Please complete the current step {step} first.",
                step + 1
            )
        }
        QueryIntent::RequiredTools => match detail.filter(|d| !d.tools_needed.is_empty()) {
            Some(detail) => format!(
                "Step {step} requires the following tools:\n{}\n\nStep: {}\nDescription: {}",
                detail.tools_needed.join(", "),
                detail.step_title,
                detail.step_description
            ),
            None => format!(
                "Step {step} may require specific tools. Please refer to the task description \
                 for detailed tool requirements."
            ),
        },
        QueryIntent::CompletionStatus => {
            let percent = (step * 10).min(100);
            let mut out = format!(
                "Current progress: Step {step} (approximately {percent}% complete, \
                 confidence: {confidence:.2})"
            );
            if let Some(detail) = detail {
                let _ = write!(
                    out,
                    "\n\nStep: {}\nEstimated duration: {}",
                    detail.step_title, detail.estimated_duration
                );
            }
            out
        }
        QueryIntent::ProgressOverview => {
            let mut out = format!(
                "Task '{task_id}' in progress, currently on step {step}, \
                 system confidence {confidence:.2}"
            );
            if let Some(detail) = detail {
                let _ = write!(
                    out,
                    "\n\nCurrent step: {}\nDescription: {}",
                    detail.step_title, detail.step_description
                );
            }
            out
        }
        QueryIntent::Help => match detail {
            Some(detail) => render_help(task_id, step, detail),
            None => format!(
                "You are currently on step {step} of task '{task_id}'. For detailed \
                 instructions, please refer to the task guide."
            ),
        },
        QueryIntent::Unknown => format!(
            "Sorry, I don't understand your question. You are currently on step {step} of \
             task '{task_id}'. You can ask: Where am I? What's next? What tools do I need?"
        ),
    }
}

fn render_help(task_id: &str, step: u32, detail: &MatchedStep) -> String {
    let tools = if detail.tools_needed.is_empty() {
        "No specific tools listed".to_string()
    } else {
        detail.tools_needed.join(", ")
    };
    let safety = if detail.safety_notes.is_empty() {
        "No specific safety notes".to_string()
    } else {
        detail
            .safety_notes
            .iter()
            .map(|note| format!("- {note}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You are currently on step {step} of task '{task_id}'.\n\nStep: {}\nDescription: {}\n\
         Required tools: {tools}\nEstimated duration: {}\nSafety notes:\n{safety}",
        detail.step_title, detail.step_description, detail.estimated_duration
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(detail: Option<MatchedStep>) -> StateSnapshot {
        StateSnapshot {
            timestamp: Utc::now(),
            task_id: "coffee".to_string(),
            step_index: Some(3),
            similarity: 0.85,
            matched_step: detail,
            observed_text: None,
        }
    }

    fn detail() -> MatchedStep {
        MatchedStep {
            step_title: "Bloom the grounds".to_string(),
            step_description: "Wet the grounds and wait".to_string(),
            tools_needed: vec!["kettle".to_string(), "scale".to_string()],
            estimated_duration: "1 minute".to_string(),
            safety_notes: vec!["Water is hot".to_string()],
            ..MatchedStep::default()
        }
    }

    #[test]
    fn missing_state_gets_the_fixed_answer() {
        for intent in [
            QueryIntent::CurrentStep,
            QueryIntent::Help,
            QueryIntent::Unknown,
        ] {
            assert_eq!(render(intent, None), NO_STATE_ANSWER);
        }
    }

    #[test]
    fn current_step_includes_detail_block_when_available() {
        let with = render(QueryIntent::CurrentStep, Some(&snapshot(Some(detail()))));
        assert!(with.starts_with("You are currently on step 3 of task 'coffee' (confidence: 0.85)"));
        assert!(with.contains("Step: Bloom the grounds"));

        let without = render(QueryIntent::CurrentStep, Some(&snapshot(None)));
        assert!(!without.contains("Step:"));
    }

    #[test]
    fn next_step_references_both_steps() {
        let out = render(QueryIntent::NextStep, Some(&snapshot(None)));
        assert_eq!(
            out,
            "Next step is step 4. Please complete the current step 3 first."
        );
    }

    #[test]
    fn tools_answer_lists_tools_or_falls_back() {
        let with = render(QueryIntent::RequiredTools, Some(&snapshot(Some(detail()))));
        assert!(with.contains("kettle, scale"));

        let without = render(QueryIntent::RequiredTools, Some(&snapshot(None)));
        assert!(without.contains("may require specific tools"));
    }

    #[test]
    fn completion_status_caps_the_estimate_at_100() {
        let mut snap = snapshot(None);
        snap.step_index = Some(14);
        let out = render(QueryIntent::CompletionStatus, Some(&snap));
        assert!(out.contains("approximately 100% complete"));

        let out = render(QueryIntent::CompletionStatus, Some(&snapshot(None)));
        assert!(out.contains("approximately 30% complete"));
    }

    #[test]
    fn help_answer_carries_tools_duration_and_safety() {
        let out = render(QueryIntent::Help, Some(&snapshot(Some(detail()))));
        assert!(out.contains("Required tools: kettle, scale"));
        assert!(out.contains("Estimated duration: 1 minute"));
        assert!(out.contains("- Water is hot"));
    }

    #[test]
    fn unknown_answer_suggests_examples() {
        let out = render(QueryIntent::Unknown, Some(&snapshot(None)));
        assert!(out.contains("You can ask: Where am I?"));
    }
}
