use chrono::Utc;
use llm_interface::{LeadForScoring, LeadScorer};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use subscout_core::{CoreError, ErrorExt, Interaction, Lead, TenantProfile};
use tracing::{info, warn};

use database::Store;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadScoringReport {
    pub success: bool,
    pub leads_considered: usize,
    pub leads_scored: usize,
    /// Left with their previous score, because a batch failed or the tenant is inactive.
    pub leads_unscored: usize,
    pub failed_batches: usize,
    pub failed_users: usize,
}

impl fmt::Display for LeadScoringReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lead scoring: {} considered, {} scored, {} unscored, {} failed batches, {} failed users",
            self.leads_considered,
            self.leads_scored,
            self.leads_unscored,
            self.failed_batches,
            self.failed_users,
        )
    }
}

/// Rescores leads whose conversations moved on since they were last scored.
pub struct LeadScoringJob {
    store: Arc<dyn Store>,
    scorer: LeadScorer,
    rescore_limit: u32,
}

impl LeadScoringJob {
    pub fn new(store: Arc<dyn Store>, scorer: LeadScorer, rescore_limit: u32) -> Self {
        Self {
            store,
            scorer,
            rescore_limit,
        }
    }

    pub async fn run(&self) -> Result<LeadScoringReport, CoreError> {
        let leads = self.store.leads_needing_score(self.rescore_limit).await?;
        let mut report = LeadScoringReport {
            leads_considered: leads.len(),
            ..LeadScoringReport::default()
        };

        if leads.is_empty() {
            info!("No leads need scoring");
            report.success = true;
            return Ok(report);
        }

        let profiles: HashMap<String, TenantProfile> = self
            .store
            .active_tenants()
            .await?
            .into_iter()
            .map(|tenant| (tenant.profile.user_id.clone(), tenant.profile))
            .collect();

        let mut by_user: BTreeMap<String, Vec<Lead>> = BTreeMap::new();
        for lead in leads {
            by_user.entry(lead.user_id.clone()).or_default().push(lead);
        }

        for (user_id, leads) in by_user {
            let Some(profile) = profiles.get(&user_id) else {
                warn!(
                    user_id = %user_id,
                    leads = leads.len(),
                    "No active profile, leads left unscored"
                );
                report.leads_unscored += leads.len();
                continue;
            };

            if let Err(e) = self.score_user(profile, &leads, &mut report).await {
                e.log_warn();
                warn!(user_id = %user_id, "Lead scoring failed for user, continuing");
                report.failed_users += 1;
            }
        }

        report.success = true;
        info!("{}", report);
        Ok(report)
    }

    async fn score_user(
        &self,
        profile: &TenantProfile,
        leads: &[Lead],
        report: &mut LeadScoringReport,
    ) -> Result<(), CoreError> {
        let mut prepared = Vec::with_capacity(leads.len());
        for lead in leads {
            let conversation = self.store.lead_conversation(lead).await?;
            prepared.push(LeadForScoring::new(
                lead.id,
                lead.author.clone(),
                transcript(&conversation),
            ));
        }

        let outcome = self.scorer.score(profile, &prepared).await;
        report.leads_unscored += outcome.unscored;
        report.failed_batches += outcome.failed_batches;

        let scored_at = Utc::now();
        for score in &outcome.scores {
            self.store.update_lead_score(score, scored_at).await?;
            report.leads_scored += 1;
        }
        Ok(())
    }
}

/// Their comment then our draft, oldest first.
fn transcript(conversation: &[Interaction]) -> Vec<String> {
    conversation
        .iter()
        .flat_map(|interaction| {
            [
                format!("{}: {}", interaction.author, interaction.their_content),
                format!("us: {}", interaction.our_content),
            ]
        })
        .collect()
}
