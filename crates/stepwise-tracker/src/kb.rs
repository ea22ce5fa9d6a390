//! Knowledge-base seam.
//!
//! The tracker consumes a single matching contract; the knowledge base's
//! internals (embeddings, similarity search) stay behind it. A small
//! in-memory keyword index ships as the default implementation so the
//! system runs without an external service.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use stepwise_types::MatchedStep;

/// One match returned by the knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct StepMatch {
    /// Task the text matched.
    pub task_id: String,
    /// Step within the task.
    pub step_index: u32,
    /// Similarity score in [0, 1]; the tracker's sole confidence signal.
    pub similarity: f64,
    /// Full step detail.
    pub detail: MatchedStep,
}

/// Matching contract the tracker consumes.
#[async_trait]
pub trait StepKnowledge: Send + Sync {
    /// Best-matching task step for the cleaned observation text, or `None`
    /// when nothing matches at all.
    async fn find_matching_step(&self, text: &str) -> Option<StepMatch>;
}

/// One step of a task definition, as loaded from a task file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepDefinition {
    /// Short step title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Tools the step requires.
    #[serde(default)]
    pub tools_needed: Vec<String>,
    /// Signals that the step is finished.
    #[serde(default)]
    pub completion_indicators: Vec<String>,
    /// Visual cues a vision model would report.
    #[serde(default)]
    pub visual_cues: Vec<String>,
    /// Rough duration estimate.
    #[serde(default)]
    pub estimated_duration: String,
    /// Safety notes.
    #[serde(default)]
    pub safety_notes: Vec<String>,
}

impl StepDefinition {
    fn to_matched(&self) -> MatchedStep {
        MatchedStep {
            step_title: self.title.clone(),
            step_description: self.description.clone(),
            tools_needed: self.tools_needed.clone(),
            completion_indicators: self.completion_indicators.clone(),
            visual_cues: self.visual_cues.clone(),
            estimated_duration: self.estimated_duration.clone(),
            safety_notes: self.safety_notes.clone(),
        }
    }
}

/// A task with its ordered steps. Step indices are 1-based.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    /// Task identifier.
    pub task_id: String,
    /// Ordered steps.
    pub steps: Vec<StepDefinition>,
}

struct IndexedStep {
    task_id: String,
    step_index: u32,
    tokens: HashSet<String>,
    detail: MatchedStep,
}

/// In-memory keyword-overlap index over task definitions.
///
/// Similarity is the Jaccard overlap between the observation's tokens and
/// the step's bag of words (title, description, cues, indicators, tools).
pub struct StaticStepIndex {
    steps: Vec<IndexedStep>,
}

impl StaticStepIndex {
    /// Build the index from task definitions.
    #[must_use]
    pub fn new(tasks: Vec<TaskDefinition>) -> Self {
        let mut steps = Vec::new();
        for task in tasks {
            for (i, step) in task.steps.iter().enumerate() {
                let mut tokens = HashSet::new();
                collect_tokens(&step.title, &mut tokens);
                collect_tokens(&step.description, &mut tokens);
                for field in [
                    &step.visual_cues,
                    &step.completion_indicators,
                    &step.tools_needed,
                ] {
                    for phrase in field.iter() {
                        collect_tokens(phrase, &mut tokens);
                    }
                }
                steps.push(IndexedStep {
                    task_id: task.task_id.clone(),
                    step_index: (i + 1) as u32,
                    tokens,
                    detail: step.to_matched(),
                });
            }
        }
        Self { steps }
    }

    /// Build the index from a JSON array of task definitions.
    ///
    /// # Errors
    /// Returns the serde error when the document does not parse.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let tasks: Vec<TaskDefinition> = serde_json::from_str(raw)?;
        Ok(Self::new(tasks))
    }

    /// Number of indexed steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl StepKnowledge for StaticStepIndex {
    async fn find_matching_step(&self, text: &str) -> Option<StepMatch> {
        let mut query = HashSet::new();
        collect_tokens(text, &mut query);
        if query.is_empty() {
            return None;
        }
        let mut best: Option<(f64, &IndexedStep)> = None;
        for step in &self.steps {
            let overlap = step.tokens.intersection(&query).count();
            if overlap == 0 {
                continue;
            }
            let union = step.tokens.union(&query).count();
            let score = overlap as f64 / union as f64;
            match best {
                Some((current, _)) if current >= score => {}
                _ => best = Some((score, step)),
            }
        }
        best.map(|(similarity, step)| StepMatch {
            task_id: step.task_id.clone(),
            step_index: step.step_index,
            similarity,
            detail: step.detail.clone(),
        })
    }
}

fn collect_tokens(text: &str, out: &mut HashSet<String>) {
    for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if word.len() > 2 {
            out.insert(word.to_ascii_lowercase());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brewing_tasks() -> Vec<TaskDefinition> {
        vec![TaskDefinition {
            task_id: "coffee".to_string(),
            steps: vec![
                StepDefinition {
                    title: "Grind the beans".to_string(),
                    description: "Grind coffee beans to a medium consistency".to_string(),
                    visual_cues: vec!["grinder running".to_string()],
                    ..StepDefinition::default()
                },
                StepDefinition {
                    title: "Pour hot water".to_string(),
                    description: "Pour water over the grounds in circles".to_string(),
                    visual_cues: vec!["kettle tilted over dripper".to_string()],
                    ..StepDefinition::default()
                },
            ],
        }]
    }

    #[tokio::test]
    async fn matches_the_closest_step() {
        let index = StaticStepIndex::new(brewing_tasks());
        let hit = index
            .find_matching_step("the user is pouring water from the kettle")
            .await
            .unwrap();
        assert_eq!(hit.task_id, "coffee");
        assert_eq!(hit.step_index, 2);
        assert!(hit.similarity > 0.0 && hit.similarity <= 1.0);
        assert_eq!(hit.detail.step_title, "Pour hot water");
    }

    #[tokio::test]
    async fn unrelated_text_yields_no_match() {
        let index = StaticStepIndex::new(brewing_tasks());
        assert!(
            index
                .find_matching_step("quarterly revenue charts")
                .await
                .is_none()
        );
    }

    #[test]
    fn parses_task_definitions_from_json() {
        let raw = r#"[{"task_id":"tea","steps":[{"title":"Boil water"}]}]"#;
        let index = StaticStepIndex::from_json_str(raw).unwrap();
        assert_eq!(index.len(), 1);
    }
}
