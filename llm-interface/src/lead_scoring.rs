use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subscout_core::{CoreError, LeadScore, TenantProfile};

use crate::batch::{classify_in_batches, BatchConfig, Identified};
use crate::provider::{complete_structured, CompletionRequest, LlmProvider};
use crate::text::truncate_for_prompt;

const SYSTEM_PROMPT: &str = "You qualify sales leads from Reddit conversations. For every lead, \
score from 0 to 100 how likely the person is to need the product described below, list concrete \
buying signals and pain points they mentioned (short phrases, may be empty) and summarize the \
conversation in one or two sentences. Return exactly one entry per lead and copy each lead's id \
unchanged.";

/// A lead and the conversation so far, ready for scoring.
#[derive(Debug, Clone)]
pub struct LeadForScoring {
    pub lead_id: i64,
    key: String,
    pub author: String,
    /// Oldest first, each prefixed with who said it.
    pub messages: Vec<String>,
}

impl LeadForScoring {
    pub fn new(lead_id: i64, author: impl Into<String>, messages: Vec<String>) -> Self {
        Self {
            lead_id,
            key: lead_id.to_string(),
            author: author.into(),
            messages,
        }
    }
}

impl Identified for LeadForScoring {
    fn id(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LeadAssessment {
    /// The id of the lead
    pub id: String,
    /// Purchase intent from 0 to 100
    pub score: i64,
    pub buying_signals: Vec<String>,
    pub pain_points: Vec<String>,
    pub summary: String,
}

impl Identified for LeadAssessment {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LeadScoringResponse {
    pub leads: Vec<LeadAssessment>,
}

#[derive(Debug, Serialize)]
struct LeadPrompt<'a> {
    id: &'a str,
    author: &'a str,
    conversation: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LeadScoringOutcome {
    pub scores: Vec<LeadScore>,
    /// Leads left untouched because their batch failed or the model skipped them.
    pub unscored: usize,
    pub failed_batches: usize,
}

pub struct LeadScorer {
    provider: Arc<dyn LlmProvider>,
    config: BatchConfig,
    max_input_chars: usize,
}

impl LeadScorer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: BatchConfig,
        max_input_chars: usize,
    ) -> Self {
        Self {
            provider,
            config,
            max_input_chars,
        }
    }

    /// Leads whose batch fails keep their previous score.
    pub async fn score(
        &self,
        profile: &TenantProfile,
        leads: &[LeadForScoring],
    ) -> LeadScoringOutcome {
        let outcome = classify_in_batches(
            "lead_scoring",
            leads,
            &self.config,
            |batch| self.score_batch(profile, batch),
            |lead| LeadAssessment {
                id: lead.key.clone(),
                score: 0,
                buying_signals: Vec::new(),
                pain_points: Vec::new(),
                summary: String::new(),
            },
        )
        .await;

        let unscored = outcome.fallback_items();
        let failed_batches = outcome.failed_batches;
        let scores = leads
            .iter()
            .zip(outcome.results)
            .filter(|(lead, _)| !outcome.fallback_ids.contains(lead.id()))
            .map(|(lead, assessment)| LeadScore {
                lead_id: lead.lead_id,
                score: assessment.score.clamp(0, 100) as u8,
                buying_signals: assessment.buying_signals,
                pain_points: assessment.pain_points,
                summary: assessment.summary.trim().to_string(),
            })
            .collect();

        LeadScoringOutcome {
            scores,
            unscored,
            failed_batches,
        }
    }

    async fn score_batch(
        &self,
        profile: &TenantProfile,
        batch: &[LeadForScoring],
    ) -> Result<Vec<LeadAssessment>, CoreError> {
        let leads: Vec<LeadPrompt> = batch
            .iter()
            .map(|lead| LeadPrompt {
                id: &lead.key,
                author: &lead.author,
                conversation: lead
                    .messages
                    .iter()
                    .map(|m| truncate_for_prompt(m, self.max_input_chars))
                    .collect(),
            })
            .collect();

        let system_prompt = format!(
            "{SYSTEM_PROMPT}\n\nProduct: {} - {}\nTarget audience: {}\nKeywords: {}",
            profile.product_name,
            profile.product_description,
            profile.target_audience,
            profile.keywords.join(", ")
        );
        let request = CompletionRequest::structured::<LeadScoringResponse>(
            "lead_scoring",
            system_prompt,
            format!("Leads:\n{}", serde_json::to_string_pretty(&leads)?),
        );
        let response: LeadScoringResponse =
            complete_structured(self.provider.as_ref(), &request).await?;
        Ok(response.leads)
    }
}
