//! Planning coordinator.
//!
//! Turns a free-form request into typed analysis steps with a single
//! structured-output completion. The model's JSON shape is not trusted:
//! it is decoded through [`PlanShape`] and any mismatch is a [`PlanError`]
//! that the caller answers with the default plan.

use super::extract_fenced_block;
use crate::error::PlanError;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::models::AnalysisStep;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Object fields that may wrap the step list, checked in order.
const WRAPPER_KEYS: [&str; 3] = ["steps", "instructions", "plan"];

/// Top-level shapes the model may answer with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanShape {
    List(Vec<Value>),
    Object(Map<String, Value>),
}

/// Builds execution plans from user requests.
pub struct Planner {
    client: Arc<dyn CompletionClient>,
    required_coverage: Vec<String>,
}

impl Planner {
    pub fn new(client: Arc<dyn CompletionClient>, required_coverage: Vec<String>) -> Self {
        Self {
            client,
            required_coverage,
        }
    }

    /// Ask the model for a plan. Not retried.
    pub async fn generate_plan(
        &self,
        user_request: &str,
        columns: &str,
        sample_rows: &str,
    ) -> Result<Vec<AnalysisStep>, PlanError> {
        let prompt = self.build_prompt(user_request, columns, sample_rows);
        debug!("Planner prompt is {} chars", prompt.len());

        let content = self
            .client
            .complete(CompletionRequest::new(prompt).json())
            .await
            .map_err(|e| PlanError::Model(e.to_string()))?;

        let steps = parse_plan(&content)?;
        info!("Planner produced {} steps", steps.len());
        Ok(steps)
    }

    fn build_prompt(&self, user_request: &str, columns: &str, sample_rows: &str) -> String {
        let mut prompt = format!(
            r#"You are a Technical Project Manager.

USER REQUEST: "{user_request}"

DATASET SCHEMA:
Columns: {columns}

SAMPLE DATA:
{sample_rows}

TASK:
Break the user request into specific execution steps.

RULES:
1. If the step requires calculating numbers/stats from the data, set "type" to "quantitative".
   - The "query" must be a NATURAL LANGUAGE description using EXACT column names.
   - DO NOT WRITE CODE.
2. If the step requires qualitative context, specs, or reasons, set "type" to "qualitative".
   - The "query" must be a research question.
3. Give related steps the same "section" title so they are reported together.
"#
        );

        if !self.required_coverage.is_empty() {
            prompt.push_str("4. The plan must always include:\n");
            for item in &self.required_coverage {
                prompt.push_str(&format!("   - {}\n", item));
            }
        }

        prompt.push_str(
            r#"
OUTPUT FORMAT (JSON object):
{"steps": [
    {"section": "Section Title", "type": "quantitative", "query": "Filter by Year 2023 and sum Sales_Volume..."},
    {"section": "Section Title", "type": "qualitative", "query": "What key features drove sales in..."}
]}
"#,
        );

        prompt
    }
}

/// Decode a model response into steps.
///
/// A list is taken as-is; an object is unwrapped through the first
/// [`WRAPPER_KEYS`] field holding a list, or else treated as one step.
pub fn parse_plan(content: &str) -> Result<Vec<AnalysisStep>, PlanError> {
    let body = extract_fenced_block(content, "json");
    let shape: PlanShape =
        serde_json::from_str(&body).map_err(|e| PlanError::Parse(e.to_string()))?;

    let items = match shape {
        PlanShape::List(items) => items,
        PlanShape::Object(mut map) => {
            let wrapped = WRAPPER_KEYS.iter().find_map(|key| {
                if matches!(map.get(*key), Some(Value::Array(_))) {
                    map.remove(*key)
                } else {
                    None
                }
            });
            match wrapped {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(map)],
            }
        }
    };

    if items.is_empty() {
        return Err(PlanError::Empty);
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let step: AnalysisStep = serde_json::from_value(item)
                .map_err(|e| PlanError::Parse(format!("step {}: {}", i + 1, e)))?;
            if step.query.trim().is_empty() {
                return Err(PlanError::Parse(format!("step {}: empty query", i + 1)));
            }
            Ok(step)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StepKind, DEFAULT_SECTION};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedPlanner {
        reply: Result<String, String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedPlanner {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_parse_plain_list() {
        let steps = parse_plan(
            r#"[{"section": "Trend", "type": "quantitative", "query": "sum sales by year"},
                {"section": "Trend", "type": "qualitative", "query": "why did sales change"}]"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, StepKind::Quantitative);
        assert_eq!(steps[1].kind, StepKind::Qualitative);
    }

    #[test]
    fn test_parse_wrapped_lists() {
        for key in WRAPPER_KEYS {
            let content = format!(
                r#"{{"{}": [{{"section": "A", "type": "high_level", "query": "q"}}]}}"#,
                key
            );
            let steps = parse_plan(&content).unwrap();
            assert_eq!(steps.len(), 1, "wrapper key {}", key);
            assert_eq!(steps[0].section, "A");
        }
    }

    #[test]
    fn test_wrapper_key_order() {
        let steps = parse_plan(
            r#"{"plan": [{"type": "detailed", "query": "late"}],
                "steps": [{"type": "high_level", "query": "first"}]}"#,
        )
        .unwrap();
        assert_eq!(steps[0].query, "first");
    }

    #[test]
    fn test_parse_single_object_becomes_one_step() {
        let steps =
            parse_plan(r#"{"section": "Solo", "type": "detailed", "query": "why?"}"#).unwrap();
        assert_eq!(steps, vec![AnalysisStep::new("Solo", StepKind::Qualitative, "why?")]);
    }

    #[test]
    fn test_null_section_keeps_the_plan() {
        let steps = parse_plan(
            r#"{"steps": [{"section": null, "type": "quantitative", "query": "count rows"},
                          {"section": "Context", "type": "qualitative", "query": "why?"}]}"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].section_title(), DEFAULT_SECTION);
        assert_eq!(steps[1].section_title(), "Context");
    }

    #[test]
    fn test_parse_fenced_json() {
        let steps =
            parse_plan("```json\n[{\"type\": \"quantitative\", \"query\": \"count rows\"}]\n```")
                .unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_plan("not json"), Err(PlanError::Parse(_))));
        assert!(matches!(parse_plan("[]"), Err(PlanError::Empty)));
        assert!(matches!(parse_plan(r#"{"steps": []}"#), Err(PlanError::Empty)));
        assert!(matches!(
            parse_plan(r#"[{"type": "astrology", "query": "q"}]"#),
            Err(PlanError::Parse(_))
        ));
        assert!(matches!(
            parse_plan(r#"[{"type": "quantitative", "query": "  "}]"#),
            Err(PlanError::Parse(_))
        ));
        assert!(matches!(parse_plan("42"), Err(PlanError::Parse(_))));
    }

    #[tokio::test]
    async fn test_generate_plan_uses_json_mode_and_coverage() {
        let client = Arc::new(ScriptedPlanner {
            reply: Ok(r#"{"steps": [{"section": "Trend", "type": "quantitative", "query": "sum"}]}"#
                .to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let planner = Planner::new(client.clone(), vec!["a top/bottom performer step".to_string()]);

        let steps = planner
            .generate_plan("How are we doing?", "Year, Sales", "| Year | Sales |")
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].json_mode);
        assert!(seen[0].prompt.contains("How are we doing?"));
        assert!(seen[0].prompt.contains("Columns: Year, Sales"));
        assert!(seen[0].prompt.contains("a top/bottom performer step"));
    }

    #[tokio::test]
    async fn test_model_failure_is_not_retried() {
        let client = Arc::new(ScriptedPlanner {
            reply: Err("connection refused".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let planner = Planner::new(client.clone(), Vec::new());

        let err = planner.generate_plan("q", "a", "").await.unwrap_err();
        assert!(matches!(err, PlanError::Model(_)));
        assert_eq!(client.seen.lock().unwrap().len(), 1);
    }
}
