use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::codes::{CodeAllocationError, CodeAllocator};
use super::domain::{require_actor, InvalidInput, OpportunityDraft, OpportunityId, Phase};
use super::events::{EventChange, EventStore, EventStoreError, PipelineEvent};
use super::identity::{IdentityError, IdentityProvider};
use super::lifecycle::{LifecycleEngine, PlanError, TransitionError};
use super::metrics::{MetricsProjector, MetricsView};
use super::repository::{OpportunityFilter, RepositoryError};
use super::reviews::{ReviewError, ReviewId, ReviewRequest};
use super::risk::RiskClassifier;
use super::settings::PipelineSettings;
use super::state::{PipelineSnapshot, PipelineState};
use super::views::{OpportunityDetail, OpportunityView};

/// Facade coordinating the repository, review queue, lifecycle engine and
/// persistence adapter.
///
/// One lock serialises every mutation and read. Mutations are validated
/// against the current state, written to the event store, and only then
/// applied, so a rejected or unpersisted call leaves the pipeline untouched.
pub struct PipelineService<S> {
    state: Mutex<PipelineState>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    identity: Option<Arc<dyn IdentityProvider>>,
    engine: LifecycleEngine,
    codes: CodeAllocator,
    classifier: RiskClassifier,
    settings: PipelineSettings,
}

impl<S> PipelineService<S>
where
    S: EventStore + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: PipelineSettings) -> Self {
        Self {
            state: Mutex::new(PipelineState::default()),
            store,
            clock,
            identity: None,
            engine: LifecycleEngine::new(),
            codes: CodeAllocator::new(),
            classifier: RiskClassifier::new(settings.risk),
            settings,
        }
    }

    /// Rebuild the pipeline by replaying every event the store holds.
    pub fn restore(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Result<Self, EventStoreError> {
        let events = store.load_all()?;
        let service = Self::new(store, clock, settings);
        {
            let mut state = service.lock();
            for (index, event) in events.iter().enumerate() {
                state
                    .apply(&service.engine, event)
                    .map_err(|reason| EventStoreError::Corrupt {
                        position: index + 1,
                        reason,
                    })?;
            }
        }
        info!(events = events.len(), "pipeline restored from event log");
        Ok(service)
    }

    pub fn with_identity(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register a new opportunity in the OPPORTUNITY phase.
    pub fn create_opportunity(
        &self,
        draft: OpportunityDraft,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        self.create_inner(draft, actor)
            .map_err(rejected("create_opportunity"))
    }

    fn create_inner(
        &self,
        draft: OpportunityDraft,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        let actor = self.authenticate(actor)?;
        let draft = draft.validate()?;
        if let Some(identity) = &self.identity {
            identity.validate_executive(&draft.assigned_to)?;
        }

        let mut state = self.lock();
        let now = self.clock.now();
        let code = self.codes.next_code(now, &state.repository)?;
        if state.repository.get_by_code(code.as_str()).is_some() {
            return Err(RepositoryError::Duplicate(code).into());
        }
        let id = state.repository.peek_next_id();
        let next_contact_at = self.follow_up_from(now);

        self.commit(
            &mut state,
            id,
            actor,
            now,
            EventChange::OpportunityCreated {
                code: code.clone(),
                draft,
                next_contact_at,
            },
        )?;
        info!(%code, %id, actor, "opportunity created");
        self.view(&state, id, now)
    }

    /// Record a touchpoint; `next_contact_at` defaults to the follow-up offset.
    pub fn register_contact(
        &self,
        id: OpportunityId,
        actor: &str,
        next_contact_at: Option<DateTime<Utc>>,
    ) -> Result<OpportunityView, PipelineServiceError> {
        self.contact_inner(id, actor, next_contact_at)
            .map_err(rejected("register_contact"))
    }

    fn contact_inner(
        &self,
        id: OpportunityId,
        actor: &str,
        next_contact_at: Option<DateTime<Utc>>,
    ) -> Result<OpportunityView, PipelineServiceError> {
        let actor = self.authenticate(actor)?;
        let mut state = self.lock();
        let now = self.clock.now();
        let next_contact_at = next_contact_at.unwrap_or_else(|| self.follow_up_from(now));
        let plan = self
            .engine
            .plan_contact(state.repository.fetch(id)?, now, next_contact_at)?;

        self.commit(
            &mut state,
            id,
            actor,
            now,
            EventChange::ContactRegistered {
                next_contact_at: plan.next_contact_at,
            },
        )?;
        info!(%id, actor, next_contact_at = %plan.next_contact_at, "contact registered");
        self.view(&state, id, now)
    }

    /// Open a manager review gating OPPORTUNITY → PRESALES.
    pub fn request_presales_review(
        &self,
        id: OpportunityId,
        actor: &str,
    ) -> Result<ReviewRequest, PipelineServiceError> {
        self.review_request_inner(id, actor)
            .map_err(rejected("request_presales_review"))
    }

    fn review_request_inner(
        &self,
        id: OpportunityId,
        actor: &str,
    ) -> Result<ReviewRequest, PipelineServiceError> {
        let actor = self.authenticate(actor)?;
        let mut state = self.lock();
        let now = self.clock.now();
        let target = Phase::Presales;
        self.engine
            .plan_review_request(state.repository.fetch(id)?, target)?;
        let review_id = state.reviews.plan_submit(id)?;

        self.commit(
            &mut state,
            id,
            actor,
            now,
            EventChange::ReviewRequested {
                review_id,
                target_phase: target,
            },
        )?;
        info!(%id, review = %review_id, actor, "presales review requested");
        self.review(&state, review_id)
    }

    /// Approve or reject a pending review. The phase itself is untouched.
    pub fn decide_review(
        &self,
        review_id: ReviewId,
        decider: &str,
        approve: bool,
    ) -> Result<ReviewRequest, PipelineServiceError> {
        self.decide_inner(review_id, decider, approve)
            .map_err(rejected("decide_review"))
    }

    fn decide_inner(
        &self,
        review_id: ReviewId,
        decider: &str,
        approve: bool,
    ) -> Result<ReviewRequest, PipelineServiceError> {
        let decider = self.authenticate(decider)?;
        let mut state = self.lock();
        let now = self.clock.now();

        let opportunity_id = state
            .reviews
            .get(review_id)
            .map(|request| request.opportunity_id)
            .ok_or(ReviewError::NotFound(review_id))?;
        self.engine
            .ensure_open(state.repository.fetch(opportunity_id)?)?;
        let request = state.reviews.plan_decision(review_id)?;
        if let Some(identity) = &self.identity {
            identity.authorize_decision(request, decider)?;
        }

        self.commit(
            &mut state,
            opportunity_id,
            decider,
            now,
            EventChange::ReviewDecided {
                review_id,
                approved: approve,
            },
        )?;
        info!(review = %review_id, opportunity = %opportunity_id, decider, approve, "review decided");
        self.review(&state, review_id)
    }

    /// Move an opportunity along the lifecycle with the target's default probability.
    pub fn advance(
        &self,
        id: OpportunityId,
        target: Phase,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        self.transition_inner(id, target, None, actor)
            .map_err(rejected("advance"))
    }

    /// Move an opportunity and set its probability in the same step.
    pub fn advance_with_probability(
        &self,
        id: OpportunityId,
        target: Phase,
        probability: i64,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        self.transition_inner(id, target, Some(probability), actor)
            .map_err(rejected("advance_with_probability"))
    }

    pub fn close_lost(
        &self,
        id: OpportunityId,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        self.transition_inner(id, Phase::ClosedLost, None, actor)
            .map_err(rejected("close_lost"))
    }

    fn transition_inner(
        &self,
        id: OpportunityId,
        target: Phase,
        probability: Option<i64>,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        let actor = self.authenticate(actor)?;
        let mut state = self.lock();
        let now = self.clock.now();
        let approval = state.reviews.available_approval(id, target);
        let plan =
            self.engine
                .plan_transition(state.repository.fetch(id)?, target, probability, approval)?;

        self.commit(&mut state, id, actor, now, EventChange::phase_changed(&plan))?;
        info!(
            %id,
            from = %plan.from,
            to = %plan.to,
            probability = plan.close_probability,
            actor,
            "phase changed"
        );
        self.view(&state, id, now)
    }

    /// Set the close probability by hand, clamped to `[0, 100]`.
    pub fn override_probability(
        &self,
        id: OpportunityId,
        probability: i64,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        self.probability_inner(id, probability, actor)
            .map_err(rejected("override_probability"))
    }

    fn probability_inner(
        &self,
        id: OpportunityId,
        probability: i64,
        actor: &str,
    ) -> Result<OpportunityView, PipelineServiceError> {
        let actor = self.authenticate(actor)?;
        let mut state = self.lock();
        let now = self.clock.now();
        let plan = self
            .engine
            .plan_probability(state.repository.fetch(id)?, probability)?;

        self.commit(
            &mut state,
            id,
            actor,
            now,
            EventChange::ProbabilityOverridden {
                from: plan.from,
                to: plan.to,
            },
        )?;
        info!(%id, from = plan.from, to = plan.to, actor, "close probability overridden");
        self.view(&state, id, now)
    }

    pub fn record_contract_value(
        &self,
        id: OpportunityId,
        value: Decimal,
        actor: &str,
    ) -> Result<OpportunityDetail, PipelineServiceError> {
        self.contract_inner(id, value, actor)
            .map_err(rejected("record_contract_value"))
    }

    fn contract_inner(
        &self,
        id: OpportunityId,
        value: Decimal,
        actor: &str,
    ) -> Result<OpportunityDetail, PipelineServiceError> {
        let actor = self.authenticate(actor)?;
        let mut state = self.lock();
        let now = self.clock.now();
        let value = self
            .engine
            .plan_contract_value(state.repository.fetch(id)?, value)?;

        self.commit(
            &mut state,
            id,
            actor,
            now,
            EventChange::ContractValueRecorded { value },
        )?;
        info!(%id, %value, actor, "contract value recorded");
        self.detail(&state, id, now)
    }

    /// Opportunities matching `filter`, ordered by id.
    pub fn query(&self, filter: &OpportunityFilter) -> Vec<OpportunityView> {
        let state = self.lock();
        let now = self.clock.now();
        state
            .repository
            .list(filter, &self.classifier, now)
            .map(|opportunity| OpportunityView::project(opportunity, &self.classifier, now))
            .collect()
    }

    pub fn opportunity(&self, id: OpportunityId) -> Result<OpportunityDetail, PipelineServiceError> {
        let state = self.lock();
        self.detail(&state, id, self.clock.now())
    }

    pub fn opportunity_by_code(
        &self,
        code: &str,
    ) -> Result<OpportunityDetail, PipelineServiceError> {
        let state = self.lock();
        let id = state
            .repository
            .get_by_code(code.trim())
            .map(|opportunity| opportunity.id())
            .ok_or_else(|| RepositoryError::NotFound(code.to_string()))?;
        self.detail(&state, id, self.clock.now())
    }

    pub fn pending_reviews(&self) -> Vec<ReviewRequest> {
        let state = self.lock();
        state.reviews.pending().into_iter().cloned().collect()
    }

    pub fn reviews_for(&self, id: OpportunityId) -> Result<Vec<ReviewRequest>, PipelineServiceError> {
        let state = self.lock();
        state.repository.fetch(id)?;
        Ok(state.reviews.for_opportunity(id).into_iter().cloned().collect())
    }

    pub fn metrics(&self) -> MetricsView {
        let state = self.lock();
        let now = self.clock.now();
        MetricsProjector::new(&self.classifier).project(
            state.repository.iter(),
            state.reviews.pending().len(),
            now,
        )
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().expect("pipeline state mutex poisoned")
    }

    fn authenticate<'a>(&self, actor: &'a str) -> Result<&'a str, PipelineServiceError> {
        let actor = require_actor(actor)?;
        if let Some(identity) = &self.identity {
            identity.validate_actor(actor)?;
        }
        Ok(actor)
    }

    fn follow_up_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_days(self.settings.follow_up_days)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Persist then apply one validated change.
    ///
    /// Panics if an event that passed planning cannot be applied: the store
    /// already holds it and the in-memory state can no longer follow the log.
    fn commit(
        &self,
        state: &mut PipelineState,
        opportunity_id: OpportunityId,
        actor: &str,
        at: DateTime<Utc>,
        change: EventChange,
    ) -> Result<(), PipelineServiceError> {
        let event = PipelineEvent {
            sequence: state.next_sequence(),
            opportunity_id,
            at,
            actor: actor.to_string(),
            change,
        };
        if let Err(error) = self.store.on_event(&event) {
            warn!(
                kind = %event.kind(),
                sequence = event.sequence,
                %error,
                "event store refused event; mutation aborted"
            );
            return Err(error.into());
        }
        if let Err(reason) = state.apply(&self.engine, &event) {
            panic!(
                "persisted {} event #{} failed to apply: {reason}",
                event.kind(),
                event.sequence
            );
        }
        Ok(())
    }

    fn view(
        &self,
        state: &PipelineState,
        id: OpportunityId,
        now: DateTime<Utc>,
    ) -> Result<OpportunityView, PipelineServiceError> {
        let opportunity = state.repository.fetch(id)?;
        Ok(OpportunityView::project(opportunity, &self.classifier, now))
    }

    fn detail(
        &self,
        state: &PipelineState,
        id: OpportunityId,
        now: DateTime<Utc>,
    ) -> Result<OpportunityDetail, PipelineServiceError> {
        let opportunity = state.repository.fetch(id)?;
        let reviews = state
            .reviews
            .for_opportunity(id)
            .into_iter()
            .cloned()
            .collect();
        Ok(OpportunityDetail::project(
            opportunity,
            reviews,
            &self.classifier,
            now,
        ))
    }

    fn review(
        &self,
        state: &PipelineState,
        review_id: ReviewId,
    ) -> Result<ReviewRequest, PipelineServiceError> {
        state
            .reviews
            .get(review_id)
            .cloned()
            .ok_or_else(|| ReviewError::NotFound(review_id).into())
    }
}

fn rejected(operation: &'static str) -> impl Fn(PipelineServiceError) -> PipelineServiceError {
    move |error| {
        debug!(operation, kind = %error.kind(), %error, "mutation rejected");
        error
    }
}

/// Error kinds reported to callers of the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    InvalidTransition,
    Terminal,
    ApprovalRequired,
    AlreadyPending,
    NotPending,
    Conflict,
    Forbidden,
    Persistence,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::InvalidTransition => "invalid_transition",
            Self::Terminal => "terminal",
            Self::ApprovalRequired => "approval_required",
            Self::AlreadyPending => "already_pending",
            Self::NotPending => "not_pending",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by the pipeline facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineServiceError {
    #[error(transparent)]
    Input(#[from] InvalidInput),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    CodeAllocation(#[from] CodeAllocationError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Persistence(#[from] EventStoreError),
}

impl From<PlanError> for PipelineServiceError {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::Transition(error) => Self::Transition(error),
            PlanError::Input(error) => Self::Input(error),
        }
    }
}

impl PipelineServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::InvalidInput,
            Self::Transition(TransitionError::Terminal { .. }) => ErrorKind::Terminal,
            Self::Transition(TransitionError::ApprovalRequired { .. }) => {
                ErrorKind::ApprovalRequired
            }
            Self::Transition(
                TransitionError::InvalidTransition { .. }
                | TransitionError::ContractOutsideDelivery { .. },
            ) => ErrorKind::InvalidTransition,
            Self::Review(ReviewError::AlreadyPending { .. }) => ErrorKind::AlreadyPending,
            Self::Review(ReviewError::NotPending { .. }) => ErrorKind::NotPending,
            Self::Review(ReviewError::NotFound(_)) => ErrorKind::NotFound,
            Self::Repository(RepositoryError::NotFound(_)) => ErrorKind::NotFound,
            Self::Repository(
                RepositoryError::Duplicate(_) | RepositoryError::IdConflict(_),
            ) => ErrorKind::Conflict,
            Self::CodeAllocation(_) => ErrorKind::Conflict,
            Self::Identity(
                IdentityError::UnknownActor(_) | IdentityError::UnknownExecutive(_),
            ) => ErrorKind::InvalidInput,
            Self::Identity(IdentityError::DecisionForbidden { .. }) => ErrorKind::Forbidden,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Offending fields for input errors.
    pub fn fields(&self) -> Option<&[String]> {
        match self {
            Self::Input(error) => Some(&error.fields),
            _ => None,
        }
    }
}
