use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{OpportunityId, Phase};

/// Identifier wrapper for review requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub u64);

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{:04}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub const fn is_decided(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Manager approval token gating entry into a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: ReviewId,
    pub opportunity_id: OpportunityId,
    pub target_phase: Phase,
    pub requester: String,
    pub requested_at: DateTime<Utc>,
    pub status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decider: Option<String>,
    /// Set once an approval has been spent on a phase change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl ReviewRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }

    pub fn is_available_approval(&self) -> bool {
        self.status == ReviewStatus::Approved && self.consumed_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReviewError {
    #[error("review {existing} is already pending for opportunity {opportunity_id}")]
    AlreadyPending {
        existing: ReviewId,
        opportunity_id: OpportunityId,
    },
    #[error("review {id} is no longer pending (already {status})")]
    NotPending { id: ReviewId, status: ReviewStatus },
    #[error("review {0} not found")]
    NotFound(ReviewId),
}

/// Append-mostly collection of review requests.
///
/// The queue validates and records review state only; the pipeline state
/// appends the matching opportunity history entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewQueue {
    requests: BTreeMap<ReviewId, ReviewRequest>,
    last_id: u64,
}

impl ReviewQueue {
    pub fn peek_next_id(&self) -> ReviewId {
        ReviewId(self.last_id + 1)
    }

    /// Check that a new request may be opened and return its id.
    pub fn plan_submit(&self, opportunity_id: OpportunityId) -> Result<ReviewId, ReviewError> {
        if let Some(open) = self
            .for_opportunity(opportunity_id)
            .into_iter()
            .find(|request| request.is_pending())
        {
            return Err(ReviewError::AlreadyPending {
                existing: open.id,
                opportunity_id,
            });
        }
        Ok(self.peek_next_id())
    }

    pub(crate) fn apply_submit(
        &mut self,
        id: ReviewId,
        opportunity_id: OpportunityId,
        target_phase: Phase,
        requester: &str,
        at: DateTime<Utc>,
    ) {
        assert_eq!(id, self.peek_next_id(), "review ids must be allocated in order");
        self.requests.insert(
            id,
            ReviewRequest {
                id,
                opportunity_id,
                target_phase,
                requester: requester.to_string(),
                requested_at: at,
                status: ReviewStatus::Pending,
                decided_at: None,
                decider: None,
                consumed_at: None,
            },
        );
        self.last_id = id.0;
    }

    /// Fetch a request that may still be decided.
    pub fn plan_decision(&self, id: ReviewId) -> Result<&ReviewRequest, ReviewError> {
        let request = self.requests.get(&id).ok_or(ReviewError::NotFound(id))?;
        if request.status.is_decided() {
            return Err(ReviewError::NotPending {
                id,
                status: request.status,
            });
        }
        Ok(request)
    }

    pub(crate) fn apply_decision(
        &mut self,
        id: ReviewId,
        approve: bool,
        decider: &str,
        at: DateTime<Utc>,
    ) -> &ReviewRequest {
        let request = self
            .requests
            .get_mut(&id)
            .unwrap_or_else(|| panic!("decision applied to unknown review {id}"));
        assert!(request.is_pending(), "review {id} decided twice");
        request.status = if approve {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Rejected
        };
        request.decided_at = Some(at);
        request.decider = Some(decider.to_string());
        request
    }

    /// Approved review not yet spent on a transition into `target_phase`.
    pub fn available_approval(
        &self,
        opportunity_id: OpportunityId,
        target_phase: Phase,
    ) -> Option<ReviewId> {
        self.requests
            .values()
            .filter(|request| {
                request.opportunity_id == opportunity_id && request.target_phase == target_phase
            })
            .find(|request| request.is_available_approval())
            .map(|request| request.id)
    }

    pub(crate) fn consume(&mut self, id: ReviewId, at: DateTime<Utc>) {
        let request = self
            .requests
            .get_mut(&id)
            .unwrap_or_else(|| panic!("consumed unknown review {id}"));
        assert!(
            request.is_available_approval(),
            "review {id} cannot be consumed twice"
        );
        request.consumed_at = Some(at);
    }

    /// Reject every pending request of a closed opportunity.
    pub(crate) fn withdraw_pending(
        &mut self,
        opportunity_id: OpportunityId,
        decider: &str,
        at: DateTime<Utc>,
    ) -> Vec<ReviewId> {
        let mut withdrawn = Vec::new();
        for request in self.requests.values_mut().filter(|request| {
            request.opportunity_id == opportunity_id && request.is_pending()
        }) {
            request.status = ReviewStatus::Rejected;
            request.decided_at = Some(at);
            request.decider = Some(decider.to_string());
            withdrawn.push(request.id);
        }
        withdrawn
    }

    pub fn get(&self, id: ReviewId) -> Option<&ReviewRequest> {
        self.requests.get(&id)
    }

    pub fn pending(&self) -> Vec<&ReviewRequest> {
        self.requests
            .values()
            .filter(|request| request.is_pending())
            .collect()
    }

    pub fn for_opportunity(&self, opportunity_id: OpportunityId) -> Vec<&ReviewRequest> {
        self.requests
            .values()
            .filter(|request| request.opportunity_id == opportunity_id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReviewRequest> {
        self.requests.values()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
