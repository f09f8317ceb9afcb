//! Persisted mutation log.
//!
//! Every accepted facade mutation is written as one [`PipelineEvent`] before it
//! is applied in memory. Replaying the log in sequence order rebuilds the
//! same state.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{OpportunityCode, OpportunityId, Phase, ValidatedDraft};
use super::lifecycle::TransitionPlan;
use super::reviews::ReviewId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    OpportunityCreated,
    ContactRegistered,
    ReviewRequested,
    ReviewDecided,
    PhaseChanged,
    ProbabilityOverridden,
    ContractValueRecorded,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpportunityCreated => "OpportunityCreated",
            Self::ContactRegistered => "ContactRegistered",
            Self::ReviewRequested => "ReviewRequested",
            Self::ReviewDecided => "ReviewDecided",
            Self::PhaseChanged => "PhaseChanged",
            Self::ProbabilityOverridden => "ProbabilityOverridden",
            Self::ContractValueRecorded => "ContractValueRecorded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific data of an event, tagged as `{"kind": .., "payload": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum EventChange {
    OpportunityCreated {
        code: OpportunityCode,
        draft: ValidatedDraft,
        next_contact_at: DateTime<Utc>,
    },
    ContactRegistered {
        next_contact_at: DateTime<Utc>,
    },
    ReviewRequested {
        review_id: ReviewId,
        target_phase: Phase,
    },
    ReviewDecided {
        review_id: ReviewId,
        approved: bool,
    },
    PhaseChanged {
        from: Phase,
        to: Phase,
        close_probability: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consumed_review: Option<ReviewId>,
    },
    ProbabilityOverridden {
        from: u8,
        to: u8,
    },
    ContractValueRecorded {
        value: Decimal,
    },
}

impl EventChange {
    pub fn phase_changed(plan: &TransitionPlan) -> Self {
        Self::PhaseChanged {
            from: plan.from,
            to: plan.to,
            close_probability: plan.close_probability,
            consumed_review: plan.consumed_review,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::OpportunityCreated { .. } => EventKind::OpportunityCreated,
            Self::ContactRegistered { .. } => EventKind::ContactRegistered,
            Self::ReviewRequested { .. } => EventKind::ReviewRequested,
            Self::ReviewDecided { .. } => EventKind::ReviewDecided,
            Self::PhaseChanged { .. } => EventKind::PhaseChanged,
            Self::ProbabilityOverridden { .. } => EventKind::ProbabilityOverridden,
            Self::ContractValueRecorded { .. } => EventKind::ContractValueRecorded,
        }
    }
}

/// One accepted mutation, in log order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub sequence: u64,
    pub opportunity_id: OpportunityId,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub change: EventChange,
}

impl PipelineEvent {
    pub fn kind(&self) -> EventKind {
        self.change.kind()
    }
}

/// Persistence adapter consulted on startup and after every accepted mutation.
pub trait EventStore: Send + Sync {
    /// Every persisted event, in sequence order.
    fn load_all(&self) -> Result<Vec<PipelineEvent>, EventStoreError>;

    /// Durably record an event. A failure aborts the mutation.
    fn on_event(&self, event: &PipelineEvent) -> Result<(), EventStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventStoreError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    #[error("event log corrupt at entry {position}: {reason}")]
    Corrupt { position: usize, reason: String },
}
