//! Section grouping and run statistics.
//!
//! Step outcomes are grouped by section title. Sections keep the order in
//! which their titles first appear; each section holds at most one result
//! per agent kind, and a later result of the same kind replaces an earlier one.

use crate::models::{AgentStatus, StepKind, StepOutcome};
use indexmap::IndexMap;
use tracing::debug;

/// Results that share a section title.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionGroup {
    pub title: String,
    pub quantitative: Option<StepOutcome>,
    pub qualitative: Option<StepOutcome>,
}

impl SectionGroup {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            quantitative: None,
            qualitative: None,
        }
    }

    /// Store an outcome in the slot for its kind, replacing any previous one.
    pub fn insert(&mut self, outcome: StepOutcome) {
        let slot = match outcome.result.kind() {
            StepKind::Quantitative => &mut self.quantitative,
            StepKind::Qualitative => &mut self.qualitative,
        };
        if let Some(previous) = slot.replace(outcome) {
            debug!(
                "Section '{}' already had a {} result for '{}', replaced",
                self.title,
                previous.result.kind(),
                previous.step.query
            );
        }
    }

    /// Outcomes in rendering order: quantitative first.
    pub fn outcomes(&self) -> impl Iterator<Item = &StepOutcome> {
        self.quantitative.iter().chain(self.qualitative.iter())
    }
}

/// Sections keyed by title, in first-appearance order.
pub type SectionMap = IndexMap<String, SectionGroup>;

/// Group outcomes by section title.
pub fn group_by_section(outcomes: Vec<StepOutcome>) -> SectionMap {
    let mut sections = SectionMap::new();

    for outcome in outcomes {
        let title = outcome.step.section_title().to_string();
        sections
            .entry(title.clone())
            .or_insert_with(|| SectionGroup::new(title))
            .insert(outcome);
    }

    sections
}

/// Number of failed outcomes.
pub fn count_failed(outcomes: &[StepOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| o.result.status() == AgentStatus::Error)
        .count()
}

/// Outcome counts per agent kind: (quantitative, qualitative).
pub fn kind_distribution(outcomes: &[StepOutcome]) -> (usize, usize) {
    outcomes.iter().fold((0, 0), |(quant, qual), o| match o.result.kind() {
        StepKind::Quantitative => (quant + 1, qual),
        StepKind::Qualitative => (quant, qual + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AgentResult, AnalysisStep, QualitativeResult, QuantitativeResult, DEFAULT_SECTION,
    };

    fn quant(section: &str, query: &str, insight: &str) -> StepOutcome {
        StepOutcome {
            step: AnalysisStep::new(section, StepKind::Quantitative, query),
            result: AgentResult::Quantitative(QuantitativeResult::ok(insight, None, String::new())),
        }
    }

    fn qual(section: &str, query: &str, insight: &str) -> StepOutcome {
        StepOutcome {
            step: AnalysisStep::new(section, StepKind::Qualitative, query),
            result: AgentResult::Qualitative(QualitativeResult::ok(insight, "ctx".to_string())),
        }
    }

    #[test]
    fn test_groups_keep_first_appearance_order() {
        let sections = group_by_section(vec![
            quant("Trend", "q1", "up"),
            quant("Regions", "q2", "Europe"),
            qual("Trend", "q3", "because"),
        ]);

        let titles: Vec<&String> = sections.keys().collect();
        assert_eq!(titles, vec!["Trend", "Regions"]);

        let trend = &sections["Trend"];
        assert_eq!(trend.quantitative.as_ref().unwrap().result.insight(), "up");
        assert_eq!(trend.qualitative.as_ref().unwrap().result.insight(), "because");
        assert!(sections["Regions"].qualitative.is_none());
    }

    #[test]
    fn test_later_result_of_same_kind_wins() {
        let sections = group_by_section(vec![
            quant("Trend", "first", "old"),
            quant("Trend", "second", "new"),
        ]);
        let trend = &sections["Trend"];
        assert_eq!(trend.quantitative.as_ref().unwrap().step.query, "second");
        assert_eq!(trend.outcomes().count(), 1);
    }

    #[test]
    fn test_blank_section_goes_to_default() {
        let sections = group_by_section(vec![quant("", "q", "x"), qual("  ", "r", "y")]);
        assert_eq!(sections.len(), 1);
        assert!(sections.contains_key(DEFAULT_SECTION));
    }

    #[test]
    fn test_counts() {
        let mut failed = quant("A", "q", "x");
        failed.result = AgentResult::failure(StepKind::Quantitative, "boom");
        let outcomes = vec![failed, qual("A", "r", "y"), qual("B", "s", "z")];

        assert_eq!(count_failed(&outcomes), 1);
        assert_eq!(kind_distribution(&outcomes), (1, 2));
    }

    #[test]
    fn test_empty_input() {
        assert!(group_by_section(Vec::new()).is_empty());
        assert_eq!(SectionGroup::new("x").outcomes().count(), 0);
    }
}
