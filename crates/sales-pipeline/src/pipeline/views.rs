use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{HistoryEntry, Opportunity, OpportunityCode, OpportunityId, Phase};
use super::reviews::ReviewRequest;
use super::risk::{RiskClassifier, RiskLevel};

/// Immutable list row returned by `query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityView {
    pub id: OpportunityId,
    pub code: OpportunityCode,
    pub name: String,
    pub client: String,
    pub phase: Phase,
    pub phase_label: &'static str,
    pub close_probability: u8,
    pub estimated_value: Decimal,
    pub assigned_to: String,
    pub next_contact_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub days_stale: i64,
    pub risk: RiskLevel,
    pub risk_label: &'static str,
}

impl OpportunityView {
    pub fn project(
        opportunity: &Opportunity,
        classifier: &RiskClassifier,
        now: DateTime<Utc>,
    ) -> Self {
        let phase = opportunity.phase();
        let risk = classifier.classify_opportunity(opportunity, now);
        Self {
            id: opportunity.id(),
            code: opportunity.code().clone(),
            name: opportunity.name().to_string(),
            client: opportunity.client().to_string(),
            phase,
            phase_label: phase.label(),
            close_probability: opportunity.close_probability(),
            estimated_value: opportunity.estimated_value(),
            assigned_to: opportunity.assigned_to().to_string(),
            next_contact_at: opportunity.next_contact_at(),
            last_updated_at: opportunity.last_updated_at(),
            days_stale: RiskClassifier::days_stale(now, opportunity.last_updated_at()),
            risk,
            risk_label: risk.label(),
        }
    }
}

/// Full record with history and reviews, returned by the detail reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityDetail {
    #[serde(flatten)]
    pub summary: OpportunityView,
    pub description: String,
    pub contracted_value: Decimal,
    pub campaign_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    pub reviews: Vec<ReviewRequest>,
}

impl OpportunityDetail {
    pub fn project(
        opportunity: &Opportunity,
        reviews: Vec<ReviewRequest>,
        classifier: &RiskClassifier,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            summary: OpportunityView::project(opportunity, classifier, now),
            description: opportunity.description().to_string(),
            contracted_value: opportunity.contracted_value(),
            campaign_code: opportunity.campaign_code().map(str::to_string),
            created_at: opportunity.created_at(),
            history: opportunity.history().to_vec(),
            reviews,
        }
    }
}
