//! Phase state machine and the mutations it gates.
//!
//! Each operation is split into a `plan_*` step that validates against the
//! current opportunity without touching it, and an `apply_*` step that cannot
//! fail. The service persists the plan as an event between the two, and replay
//! reuses the same `apply_*` functions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{checked_amount, clamp_probability, InvalidInput, Opportunity, OpportunityCode, Phase};
use super::reviews::ReviewId;

/// Directed edge of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseEdge {
    pub from: Phase,
    pub to: Phase,
    pub requires_approval: bool,
}

const fn edge(from: Phase, to: Phase, requires_approval: bool) -> PhaseEdge {
    PhaseEdge {
        from,
        to,
        requires_approval,
    }
}

const FORWARD_EDGES: [PhaseEdge; 5] = [
    edge(Phase::Opportunity, Phase::Presales, true),
    edge(Phase::Presales, Phase::Delivery, false),
    edge(Phase::Delivery, Phase::Collection, false),
    edge(Phase::Collection, Phase::Postsale, false),
    edge(Phase::Postsale, Phase::ClosedWon, false),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("opportunity {code} is closed ({phase}) and admits no further changes")]
    Terminal { code: OpportunityCode, phase: Phase },
    #[error("transition {from} → {to} is not part of the lifecycle")]
    InvalidTransition { from: Phase, to: Phase },
    #[error("opportunity {code} needs an approved review before entering {target}")]
    ApprovalRequired {
        code: OpportunityCode,
        target: Phase,
    },
    #[error("contract value can only be recorded between PRESALES and POSTSALE (opportunity {code} is in {phase})")]
    ContractOutsideDelivery { code: OpportunityCode, phase: Phase },
}

/// Validated phase change, ready to be persisted and applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub from: Phase,
    pub to: Phase,
    pub close_probability: u8,
    pub consumed_review: Option<ReviewId>,
}

/// Validated contact registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactPlan {
    pub next_contact_at: DateTime<Utc>,
}

/// Validated manual probability change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbabilityPlan {
    pub from: u8,
    pub to: u8,
}

/// Stateless rules engine for the opportunity lifecycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct LifecycleEngine;

impl LifecycleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Every legal edge, including the implicit `* → CLOSED_LOST` edges.
    pub fn edges() -> Vec<PhaseEdge> {
        let mut edges = FORWARD_EDGES.to_vec();
        edges.extend(
            Phase::ordered()
                .into_iter()
                .filter(|phase| !phase.is_terminal())
                .map(|phase| edge(phase, Phase::ClosedLost, false)),
        );
        edges
    }

    pub fn find_edge(from: Phase, to: Phase) -> Option<PhaseEdge> {
        if from.is_terminal() {
            return None;
        }
        if to == Phase::ClosedLost {
            return Some(edge(from, to, false));
        }
        FORWARD_EDGES
            .iter()
            .copied()
            .find(|candidate| candidate.from == from && candidate.to == to)
    }

    pub fn is_legal(from: Phase, to: Phase) -> bool {
        Self::find_edge(from, to).is_some()
    }

    pub fn successors(from: Phase) -> Vec<Phase> {
        Phase::ordered()
            .into_iter()
            .filter(|to| Self::is_legal(from, *to))
            .collect()
    }

    pub fn ensure_open(&self, opportunity: &Opportunity) -> Result<(), TransitionError> {
        if opportunity.is_terminal() {
            return Err(TransitionError::Terminal {
                code: opportunity.code().clone(),
                phase: opportunity.phase(),
            });
        }
        Ok(())
    }

    /// Check that `target` is gated by a review from the opportunity's phase.
    pub fn plan_review_request(
        &self,
        opportunity: &Opportunity,
        target: Phase,
    ) -> Result<(), TransitionError> {
        self.ensure_open(opportunity)?;
        let from = opportunity.phase();
        match Self::find_edge(from, target) {
            Some(edge) if edge.requires_approval => Ok(()),
            _ => Err(TransitionError::InvalidTransition { from, to: target }),
        }
    }

    /// Validate a phase change.
    ///
    /// `approval` is the approved, unconsumed review available for the
    /// opportunity, if any; it is only consumed by edges that require one.
    pub fn plan_transition(
        &self,
        opportunity: &Opportunity,
        target: Phase,
        probability_override: Option<i64>,
        approval: Option<ReviewId>,
    ) -> Result<TransitionPlan, TransitionError> {
        self.ensure_open(opportunity)?;
        let from = opportunity.phase();
        let edge = Self::find_edge(from, target)
            .ok_or(TransitionError::InvalidTransition { from, to: target })?;

        let consumed_review = if edge.requires_approval {
            Some(approval.ok_or_else(|| TransitionError::ApprovalRequired {
                code: opportunity.code().clone(),
                target,
            })?)
        } else {
            None
        };

        let close_probability = probability_override
            .map(clamp_probability)
            .unwrap_or_else(|| target.default_probability());

        Ok(TransitionPlan {
            from,
            to: target,
            close_probability,
            consumed_review,
        })
    }

    pub(crate) fn apply_transition(
        &self,
        opportunity: &mut Opportunity,
        plan: &TransitionPlan,
        actor: &str,
        at: DateTime<Utc>,
    ) {
        assert_eq!(
            opportunity.phase, plan.from,
            "transition plan applied to {} from the wrong phase",
            opportunity.code
        );
        assert!(
            Self::is_legal(plan.from, plan.to),
            "illegal transition {} → {} reached apply",
            plan.from,
            plan.to
        );
        opportunity.phase = plan.to;
        opportunity.close_probability = plan.close_probability;
        opportunity.record(at, actor, format!("{} → {} by {actor}", plan.from, plan.to));
    }

    pub fn plan_contact(
        &self,
        opportunity: &Opportunity,
        now: DateTime<Utc>,
        next_contact_at: DateTime<Utc>,
    ) -> Result<ContactPlan, PlanError> {
        self.ensure_open(opportunity)?;
        if next_contact_at < now {
            return Err(InvalidInput::field(
                "next_contact_at",
                format!("next contact {next_contact_at} is in the past"),
            )
            .into());
        }
        Ok(ContactPlan { next_contact_at })
    }

    pub(crate) fn apply_contact(
        &self,
        opportunity: &mut Opportunity,
        plan: &ContactPlan,
        actor: &str,
        at: DateTime<Utc>,
    ) {
        opportunity.next_contact_at = plan.next_contact_at;
        opportunity.record(
            at,
            actor,
            format!(
                "contact registered by {actor}; next contact {}",
                plan.next_contact_at.format("%Y-%m-%d")
            ),
        );
    }

    pub fn plan_probability(
        &self,
        opportunity: &Opportunity,
        requested: i64,
    ) -> Result<ProbabilityPlan, TransitionError> {
        self.ensure_open(opportunity)?;
        Ok(ProbabilityPlan {
            from: opportunity.close_probability(),
            to: clamp_probability(requested),
        })
    }

    pub(crate) fn apply_probability(
        &self,
        opportunity: &mut Opportunity,
        plan: &ProbabilityPlan,
        actor: &str,
        at: DateTime<Utc>,
    ) {
        opportunity.close_probability = plan.to;
        opportunity.record(
            at,
            actor,
            format!("close probability {}% → {}% by {actor}", plan.from, plan.to),
        );
    }

    /// Validate a contracted amount; returns it at money scale.
    pub fn plan_contract_value(
        &self,
        opportunity: &Opportunity,
        value: Decimal,
    ) -> Result<Decimal, PlanError> {
        self.ensure_open(opportunity)?;
        if opportunity.phase() == Phase::Opportunity {
            return Err(TransitionError::ContractOutsideDelivery {
                code: opportunity.code().clone(),
                phase: opportunity.phase(),
            }
            .into());
        }
        let value = checked_amount("contracted_value", value)?;
        if value > opportunity.estimated_value() {
            return Err(InvalidInput::field(
                "contracted_value",
                format!(
                    "contracted value {value} exceeds the estimated value {}",
                    opportunity.estimated_value()
                ),
            )
            .into());
        }
        Ok(value)
    }

    pub(crate) fn apply_contract_value(
        &self,
        opportunity: &mut Opportunity,
        value: Decimal,
        actor: &str,
        at: DateTime<Utc>,
    ) {
        opportunity.contracted_value = value;
        opportunity.record(at, actor, format!("contracted value set to {value} by {actor}"));
    }
}

/// Failure of a plan step that also validates caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Input(#[from] InvalidInput),
}
