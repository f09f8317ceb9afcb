use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::pipeline::domain::{Opportunity, OpportunityCode, OpportunityDraft, OpportunityId, Phase};
use crate::pipeline::events::{EventStore, EventStoreError, PipelineEvent};
use crate::pipeline::{FixedClock, PipelineService, PipelineSettings};

pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub(super) fn days(n: i64) -> Duration {
    Duration::days(n)
}

pub(super) fn draft(name: &str, value: i64, assigned_to: &str) -> OpportunityDraft {
    OpportunityDraft {
        name: name.to_string(),
        client: "C1".to_string(),
        description: "d".to_string(),
        estimated_value: Some(Decimal::from(value)),
        assigned_to: assigned_to.to_string(),
        campaign_code: None,
    }
}

pub(super) fn alpha() -> OpportunityDraft {
    draft("Alpha", 10_000, "ana")
}

/// Bare opportunity in `phase`, bypassing the facade.
pub(super) fn opportunity_in(phase: Phase) -> Opportunity {
    let validated = alpha().validate().expect("valid draft");
    let mut opportunity = Opportunity::open(
        OpportunityId(1),
        OpportunityCode::format(2025, 1),
        validated,
        "ana",
        t0(),
        t0() + days(3),
    );
    opportunity.phase = phase;
    opportunity.close_probability = phase.default_probability();
    opportunity
}

#[derive(Default)]
pub(super) struct MemoryEventStore {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemoryEventStore {
    pub(super) fn with_events(events: Vec<PipelineEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    pub(super) fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventStore for MemoryEventStore {
    fn load_all(&self) -> Result<Vec<PipelineEvent>, EventStoreError> {
        Ok(self.events())
    }

    fn on_event(&self, event: &PipelineEvent) -> Result<(), EventStoreError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Store that can be switched into refusing every write.
#[derive(Default)]
pub(super) struct FlakyEventStore {
    inner: MemoryEventStore,
    failing: AtomicBool,
}

impl FlakyEventStore {
    pub(super) fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(super) fn events(&self) -> Vec<PipelineEvent> {
        self.inner.events()
    }
}

impl EventStore for FlakyEventStore {
    fn load_all(&self) -> Result<Vec<PipelineEvent>, EventStoreError> {
        self.inner.load_all()
    }

    fn on_event(&self, event: &PipelineEvent) -> Result<(), EventStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable("disk full".to_string()));
        }
        self.inner.on_event(event)
    }
}

pub(super) struct Harness<S> {
    pub(super) service: Arc<PipelineService<S>>,
    pub(super) clock: Arc<FixedClock>,
    pub(super) store: Arc<S>,
}

pub(super) fn harness_with<S>(store: S) -> Harness<S>
where
    S: EventStore + 'static,
{
    let clock = Arc::new(FixedClock::new(t0()));
    let store = Arc::new(store);
    let service = Arc::new(PipelineService::new(
        store.clone(),
        clock.clone(),
        PipelineSettings::default(),
    ));
    Harness {
        service,
        clock,
        store,
    }
}

pub(super) fn harness() -> Harness<MemoryEventStore> {
    harness_with(MemoryEventStore::default())
}

/// Create Alpha and walk it through an approved review into PRESALES.
pub(super) fn seed_presales<S>(harness: &Harness<S>) -> OpportunityId
where
    S: EventStore + 'static,
{
    let service = &harness.service;
    let view = service.create_opportunity(alpha(), "ana").expect("created");
    let review = service
        .request_presales_review(view.id, "ana")
        .expect("review requested");
    service
        .decide_review(review.id, "maria", true)
        .expect("review approved");
    service
        .advance(view.id, Phase::Presales, "ana")
        .expect("advanced");
    view.id
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
