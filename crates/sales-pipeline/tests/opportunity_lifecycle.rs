use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use sales_pipeline::pipeline::{
    ErrorKind, EventKind, EventStore, EventStoreError, FixedClock, OpportunityDraft,
    OpportunityFilter, Phase, PipelineEvent, PipelineService, PipelineSettings, RiskLevel,
};

#[derive(Default)]
struct RecordingStore {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingStore {
    fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().expect("store mutex poisoned").clone()
    }
}

impl EventStore for RecordingStore {
    fn load_all(&self) -> Result<Vec<PipelineEvent>, EventStoreError> {
        Ok(self.events())
    }

    fn on_event(&self, event: &PipelineEvent) -> Result<(), EventStoreError> {
        self.events
            .lock()
            .expect("store mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .expect("valid instant")
}

fn draft(name: &str, value: i64) -> OpportunityDraft {
    OpportunityDraft {
        name: name.to_string(),
        client: "C1".to_string(),
        description: "d".to_string(),
        estimated_value: Some(Decimal::from(value)),
        assigned_to: "ana".to_string(),
        campaign_code: None,
    }
}

fn pipeline() -> (
    PipelineService<RecordingStore>,
    Arc<FixedClock>,
    Arc<RecordingStore>,
) {
    let clock = Arc::new(FixedClock::new(t0()));
    let store = Arc::new(RecordingStore::default());
    let service = PipelineService::new(store.clone(), clock.clone(), PipelineSettings::default());
    (service, clock, store)
}

#[test]
fn opportunity_walks_from_creation_to_presales_with_approval() {
    let (service, _clock, _store) = pipeline();

    let created = service
        .create_opportunity(draft("Alpha", 10_000), "ana")
        .expect("created");
    assert_eq!(created.code.as_str(), "P-2025-001");
    assert_eq!(created.phase, Phase::Opportunity);
    assert_eq!(created.close_probability, 20);
    assert_eq!(created.next_contact_at, t0() + Duration::days(3));

    let before = service.opportunity(created.id).expect("detail");
    assert_eq!(before.history.len(), 1);

    let blocked = service
        .advance(created.id, Phase::Presales, "ana")
        .unwrap_err();
    assert_eq!(blocked.kind(), ErrorKind::ApprovalRequired);
    assert_eq!(service.opportunity(created.id).expect("detail"), before);

    let review = service
        .request_presales_review(created.id, "ana")
        .expect("review requested");
    service
        .decide_review(review.id, "maria", true)
        .expect("approved");
    let advanced = service
        .advance(created.id, Phase::Presales, "ana")
        .expect("advanced");

    assert_eq!(advanced.phase, Phase::Presales);
    assert_eq!(advanced.close_probability, 70);
    let detail = service.opportunity(created.id).expect("detail");
    assert_eq!(detail.history.len(), 4);
}

#[test]
fn staleness_drives_risk_until_contact_is_registered() {
    let (service, clock, _store) = pipeline();
    let created = service
        .create_opportunity(draft("Alpha", 10_000), "ana")
        .expect("created");

    clock.set(t0() + Duration::days(8));
    let at_risk = service.query(&OpportunityFilter::default().with_risk(RiskLevel::AtRisk));
    assert_eq!(at_risk.len(), 1);

    clock.set(t0() + Duration::days(16));
    let critical = service.opportunity(created.id).expect("detail");
    assert_eq!(critical.summary.risk, RiskLevel::Critical);

    let contacted = service
        .register_contact(created.id, "ana", None)
        .expect("contact registered");
    assert_eq!(contacted.risk, RiskLevel::Normal);
    assert_eq!(contacted.last_updated_at, t0() + Duration::days(16));
}

#[test]
fn closed_opportunities_refuse_further_moves() {
    let (service, _clock, _store) = pipeline();
    let created = service
        .create_opportunity(draft("Alpha", 10_000), "ana")
        .expect("created");
    let review = service
        .request_presales_review(created.id, "ana")
        .expect("review requested");
    service
        .decide_review(review.id, "maria", true)
        .expect("approved");
    service
        .advance(created.id, Phase::Presales, "ana")
        .expect("advanced");

    let lost = service.close_lost(created.id, "ana").expect("closed");
    assert_eq!(lost.phase, Phase::ClosedLost);
    assert_eq!(lost.close_probability, 0);

    let error = service
        .advance(created.id, Phase::Delivery, "ana")
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Terminal);
}

#[test]
fn metrics_weight_open_value_by_probability() {
    let (service, _clock, _store) = pipeline();
    service
        .create_opportunity(draft("Alpha", 10_000), "ana")
        .expect("created");
    let beta = service
        .create_opportunity(draft("Beta", 40_000), "ana")
        .expect("created");
    let review = service
        .request_presales_review(beta.id, "ana")
        .expect("review requested");
    service
        .decide_review(review.id, "maria", true)
        .expect("approved");
    service
        .advance(beta.id, Phase::Presales, "ana")
        .expect("advanced");

    let metrics = service.metrics();

    assert_eq!(metrics.pipeline_total, Decimal::from(50_000));
    assert_eq!(metrics.pipeline_weighted, Decimal::from(30_000));
    assert_eq!(metrics.average_value, Decimal::from(25_000));
    assert!(metrics.pipeline_weighted <= metrics.pipeline_total);
}

#[test]
fn replaying_the_event_log_rebuilds_the_live_pipeline() {
    let (service, clock, store) = pipeline();
    let alpha = service
        .create_opportunity(draft("Alpha", 10_000), "ana")
        .expect("created");
    let beta = service
        .create_opportunity(draft("Beta", 40_000), "luis")
        .expect("created");
    let review = service
        .request_presales_review(alpha.id, "ana")
        .expect("review requested");
    service
        .decide_review(review.id, "maria", true)
        .expect("approved");
    clock.advance(Duration::days(2));
    service
        .advance(alpha.id, Phase::Presales, "ana")
        .expect("advanced");
    service
        .override_probability(alpha.id, 85, "ana")
        .expect("probability overridden");
    service
        .register_contact(beta.id, "luis", None)
        .expect("contact registered");
    service.close_lost(beta.id, "luis").expect("closed");

    let kinds: Vec<EventKind> = store.events().iter().map(PipelineEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::OpportunityCreated,
            EventKind::OpportunityCreated,
            EventKind::ReviewRequested,
            EventKind::ReviewDecided,
            EventKind::PhaseChanged,
            EventKind::ProbabilityOverridden,
            EventKind::ContactRegistered,
            EventKind::PhaseChanged,
        ]
    );

    let replayed = PipelineService::restore(
        Arc::new(RecordingStore {
            events: Mutex::new(store.events()),
        }),
        clock.clone(),
        PipelineSettings::default(),
    )
    .expect("log replays");

    assert_eq!(replayed.snapshot(), service.snapshot());
    assert_eq!(replayed.metrics(), service.metrics());

    let next = replayed
        .create_opportunity(draft("Gamma", 5_000), "ana")
        .expect("created after replay");
    assert_eq!(next.code.as_str(), "P-2025-003");
}
