use serde::Serialize;

use super::domain::{checked_amount, Opportunity, OpportunityId};
use super::events::{EventChange, PipelineEvent};
use super::lifecycle::{ContactPlan, LifecycleEngine, ProbabilityPlan, TransitionPlan};
use super::repository::OpportunityRepository;
use super::reviews::{ReviewQueue, ReviewRequest};

/// Point-in-time copy of every record, ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub last_sequence: u64,
    pub opportunities: Vec<Opportunity>,
    pub reviews: Vec<ReviewRequest>,
}

/// Repository and review queue guarded together by the service lock.
///
/// State only changes through [`PipelineState::apply`], which is shared by the
/// live mutation path and startup replay.
#[derive(Debug, Clone, Default)]
pub(crate) struct PipelineState {
    pub(crate) repository: OpportunityRepository,
    pub(crate) reviews: ReviewQueue,
    last_sequence: u64,
}

impl PipelineState {
    pub(crate) fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    pub(crate) fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            last_sequence: self.last_sequence,
            opportunities: self.repository.iter().cloned().collect(),
            reviews: self.reviews.iter().cloned().collect(),
        }
    }

    /// Apply one event, refusing anything the live path could not have produced.
    ///
    /// Nothing is mutated when an error is returned.
    pub(crate) fn apply(
        &mut self,
        engine: &LifecycleEngine,
        event: &PipelineEvent,
    ) -> Result<(), String> {
        if event.sequence != self.next_sequence() {
            return Err(format!(
                "expected sequence {}, found {}",
                self.next_sequence(),
                event.sequence
            ));
        }
        self.check(engine, event)?;

        let id = event.opportunity_id;
        let actor = event.actor.as_str();
        let at = event.at;

        match &event.change {
            EventChange::OpportunityCreated {
                code,
                draft,
                next_contact_at,
            } => {
                let opportunity =
                    Opportunity::open(id, code.clone(), draft.clone(), actor, at, *next_contact_at);
                let assigned = self
                    .repository
                    .insert(opportunity)
                    .map_err(|error| error.to_string())?;
                assert_eq!(assigned, id, "opportunity ids must be allocated in order");
            }
            EventChange::ContactRegistered { next_contact_at } => {
                let plan = ContactPlan {
                    next_contact_at: *next_contact_at,
                };
                engine.apply_contact(self.opportunity_mut(id), &plan, actor, at);
            }
            EventChange::ReviewRequested {
                review_id,
                target_phase,
            } => {
                self.reviews
                    .apply_submit(*review_id, id, *target_phase, actor, at);
                self.opportunity_mut(id)
                    .record(at, actor, format!("review requested by {actor}"));
            }
            EventChange::ReviewDecided {
                review_id,
                approved,
            } => {
                let request = self.reviews.apply_decision(*review_id, *approved, actor, at);
                let message = format!(
                    "review {} for {} {} by {actor}",
                    request.id, request.target_phase, request.status
                );
                self.opportunity_mut(id).record(at, actor, message);
            }
            EventChange::PhaseChanged {
                from,
                to,
                close_probability,
                consumed_review,
            } => {
                let plan = TransitionPlan {
                    from: *from,
                    to: *to,
                    close_probability: *close_probability,
                    consumed_review: *consumed_review,
                };
                if let Some(review_id) = plan.consumed_review {
                    self.reviews.consume(review_id, at);
                }
                if plan.to.is_terminal() {
                    self.reviews.withdraw_pending(id, actor, at);
                }
                engine.apply_transition(self.opportunity_mut(id), &plan, actor, at);
            }
            EventChange::ProbabilityOverridden { from, to } => {
                let plan = ProbabilityPlan {
                    from: *from,
                    to: *to,
                };
                engine.apply_probability(self.opportunity_mut(id), &plan, actor, at);
            }
            EventChange::ContractValueRecorded { value } => {
                engine.apply_contract_value(self.opportunity_mut(id), *value, actor, at);
            }
        }

        self.last_sequence = event.sequence;
        Ok(())
    }

    fn check(&self, engine: &LifecycleEngine, event: &PipelineEvent) -> Result<(), String> {
        let id = event.opportunity_id;
        if let EventChange::OpportunityCreated { code, draft, .. } = &event.change {
            checked_amount("estimated_value", draft.estimated_value)
                .map_err(|error| error.to_string())?;
            if id != self.repository.peek_next_id() {
                return Err(format!(
                    "opportunity id {id} out of order (next is {})",
                    self.repository.peek_next_id()
                ));
            }
            if self.repository.get_by_code(code.as_str()).is_some() {
                return Err(format!("duplicate opportunity code {code}"));
            }
            return Ok(());
        }

        let opportunity = self
            .repository
            .get(id)
            .ok_or_else(|| format!("unknown opportunity {id}"))?;
        let closed = opportunity.is_terminal();

        match &event.change {
            EventChange::OpportunityCreated { .. } => Ok(()),
            EventChange::ContactRegistered { .. }
            | EventChange::ProbabilityOverridden { .. }
            | EventChange::ContractValueRecorded { .. }
            | EventChange::ReviewRequested { .. }
            | EventChange::ReviewDecided { .. }
                if closed =>
            {
                Err(format!("opportunity {} is closed", opportunity.code()))
            }
            EventChange::ContractValueRecorded { value } => {
                let planned = engine
                    .plan_contract_value(opportunity, *value)
                    .map_err(|error| error.to_string())?;
                if planned != *value {
                    return Err(format!("contracted value {value} is not at money scale"));
                }
                Ok(())
            }
            EventChange::ContactRegistered { next_contact_at } => engine
                .plan_contact(opportunity, event.at, *next_contact_at)
                .map(|_| ())
                .map_err(|error| error.to_string()),
            EventChange::ProbabilityOverridden { from, to } => {
                let plan = engine
                    .plan_probability(opportunity, i64::from(*to))
                    .map_err(|error| error.to_string())?;
                if plan.from != *from || plan.to != *to {
                    return Err(format!(
                        "probability override {from}% → {to}% does not match {}%",
                        opportunity.close_probability()
                    ));
                }
                Ok(())
            }
            EventChange::ReviewRequested {
                review_id,
                target_phase,
            } => {
                if *review_id != self.reviews.peek_next_id() {
                    return Err(format!("review id {review_id} out of order"));
                }
                engine
                    .plan_review_request(opportunity, *target_phase)
                    .map_err(|error| error.to_string())?;
                self.reviews
                    .plan_submit(id)
                    .map(|_| ())
                    .map_err(|error| error.to_string())
            }
            EventChange::ReviewDecided { review_id, .. } => {
                let request = self
                    .reviews
                    .plan_decision(*review_id)
                    .map_err(|error| error.to_string())?;
                if request.opportunity_id != id {
                    return Err(format!("review {review_id} belongs to another opportunity"));
                }
                Ok(())
            }
            EventChange::PhaseChanged {
                from,
                to,
                consumed_review,
                ..
            } => {
                if opportunity.phase() != *from || !LifecycleEngine::is_legal(*from, *to) {
                    return Err(format!(
                        "illegal transition {from} → {to} for {} in {}",
                        opportunity.code(),
                        opportunity.phase()
                    ));
                }
                let needs_approval =
                    LifecycleEngine::find_edge(*from, *to).is_some_and(|edge| edge.requires_approval);
                match (needs_approval, consumed_review) {
                    (true, Some(review_id)) => {
                        let available = self.reviews.get(*review_id).is_some_and(|request| {
                            request.opportunity_id == id
                                && request.target_phase == *to
                                && request.is_available_approval()
                        });
                        if available {
                            Ok(())
                        } else {
                            Err(format!("review {review_id} is not an available approval"))
                        }
                    }
                    (true, None) => Err(format!("{from} → {to} requires an approval")),
                    (false, Some(review_id)) => {
                        Err(format!("review {review_id} consumed by an ungated edge"))
                    }
                    (false, None) => Ok(()),
                }
            }
        }
    }

    fn opportunity_mut(&mut self, id: OpportunityId) -> &mut Opportunity {
        self.repository
            .get_mut(id)
            .unwrap_or_else(|| panic!("event references unknown opportunity {id}"))
    }
}
