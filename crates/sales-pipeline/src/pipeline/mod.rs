//! Opportunity lifecycle engine.
//!
//! Opportunities move through a fixed phase graph guarded by manager reviews.
//! Risk is derived from staleness at read time and aggregate metrics are
//! projected from a copy of the repository. Every accepted mutation is
//! persisted as a [`PipelineEvent`] before it is applied; replaying the log
//! rebuilds the same state.

pub mod clock;
pub mod codes;
pub mod domain;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod metrics;
pub mod repository;
pub mod reviews;
pub mod risk;
pub mod router;
pub mod service;
pub mod settings;
mod state;
pub mod views;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use codes::{CodeAllocationError, CodeAllocator};
pub use domain::{
    HistoryEntry, InvalidInput, Opportunity, OpportunityCode, OpportunityDraft, OpportunityId,
    Phase, UnknownPhase, ValidatedDraft, MAX_AMOUNT_UNITS,
};
pub use events::{EventChange, EventKind, EventStore, EventStoreError, PipelineEvent};
pub use identity::{IdentityError, IdentityProvider, StaticDirectory};
pub use lifecycle::{LifecycleEngine, PhaseEdge, TransitionError};
pub use metrics::{MetricsProjector, MetricsView};
pub use repository::{OpportunityFilter, OpportunityRepository, RepositoryError};
pub use reviews::{ReviewError, ReviewId, ReviewQueue, ReviewRequest, ReviewStatus};
pub use risk::{RiskClassifier, RiskLevel, RiskThresholds};
pub use router::pipeline_router;
pub use service::{ErrorKind, PipelineService, PipelineServiceError};
pub use settings::PipelineSettings;
pub use state::PipelineSnapshot;
pub use views::{OpportunityDetail, OpportunityView};
