//! Keyword rule table adapter
//!
//! Matches configured substrings against normalized text. The score is the
//! highest matching rule score, flags are the matched tags in rule order
//! (deduplicated), and the action is the most severe matched action.

use super::{normalize_text, AdapterError, AdapterOpinion, ModuleAdapter, SessionContext};
use cg_common::config::RuleTableConfig;
use cg_common::model::unit_interval;
use cg_common::{EvidenceItem, RecommendedAction};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    tag: String,
    score: f64,
    action: Option<RecommendedAction>,
}

/// Rule table module
#[derive(Debug, Clone)]
pub struct RuleTableAdapter {
    id: String,
    confidence: f64,
    rules: Vec<Rule>,
}

impl RuleTableAdapter {
    pub fn from_config(config: &RuleTableConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|r| Rule {
                // Patterns are matched against normalized text, so normalize them too
                pattern: normalize_text(&r.pattern),
                tag: r.tag.clone(),
                score: unit_interval(r.score),
                action: r.action,
            })
            .filter(|r| !r.pattern.is_empty())
            .collect();

        Self {
            id: config.id.clone(),
            confidence: unit_interval(config.confidence),
            rules,
        }
    }

    /// Evaluate the table; pure and synchronous
    pub fn evaluate(&self, normalized_text: &str) -> AdapterOpinion {
        let mut score = 0.0_f64;
        let mut flags: Vec<String> = Vec::new();
        let mut action = RecommendedAction::None;
        let mut evidence = Vec::new();

        for rule in self.rules.iter().filter(|r| normalized_text.contains(&r.pattern)) {
            score = score.max(rule.score);
            if !flags.contains(&rule.tag) {
                flags.push(rule.tag.clone());
            }
            if let Some(a) = rule.action {
                action = action.max(a);
            }
            evidence.push(EvidenceItem::new("matched", rule.pattern.clone()));
        }

        AdapterOpinion {
            score: Some(score),
            flags,
            confidence: Some(self.confidence),
            recommended_action: Some(action),
            evidence,
        }
    }
}

#[async_trait::async_trait]
impl ModuleAdapter for RuleTableAdapter {
    fn module_id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        normalized_text: &str,
        ctx: &SessionContext,
        _deadline: Instant,
    ) -> Result<AdapterOpinion, AdapterError> {
        let opinion = self.evaluate(normalized_text);
        debug!(
            module_id = %self.id,
            session_id = %ctx.session_id,
            matches = opinion.evidence.len(),
            "Rule table evaluated"
        );
        Ok(opinion)
    }
}
