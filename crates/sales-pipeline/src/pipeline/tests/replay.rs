use super::common::*;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::pipeline::domain::Phase;
use crate::pipeline::events::{EventChange, EventStoreError, PipelineEvent};
use crate::pipeline::reviews::ReviewId;
use crate::pipeline::{FixedClock, PipelineService, PipelineSettings};

fn restore(events: Vec<PipelineEvent>) -> Result<PipelineService<MemoryEventStore>, EventStoreError> {
    PipelineService::restore(
        Arc::new(MemoryEventStore::with_events(events)),
        Arc::new(FixedClock::new(t0())),
        PipelineSettings::default(),
    )
}

fn busy_pipeline() -> Harness<MemoryEventStore> {
    let harness = harness();
    let service = &harness.service;
    let won = seed_presales(&harness);
    harness.clock.advance(days(2));
    service
        .register_contact(won, "ana", None)
        .expect("contact");
    for phase in [Phase::Delivery, Phase::Collection, Phase::Postsale] {
        service.advance(won, phase, "ana").expect("forward");
    }
    service
        .record_contract_value(won, Decimal::from(8_000), "ana")
        .expect("contract");
    service.advance(won, Phase::ClosedWon, "ana").expect("won");

    let lost = service
        .create_opportunity(draft("Beta", 4_000, "luis"), "luis")
        .expect("created");
    service
        .request_presales_review(lost.id, "luis")
        .expect("review requested");
    service
        .override_probability(lost.id, 35, "luis")
        .expect("override");
    service.close_lost(lost.id, "luis").expect("closed");

    service
        .create_opportunity(draft("Gamma", 1_500, "ana"), "ana")
        .expect("created");
    harness
}

#[test]
fn replaying_the_log_rebuilds_identical_state() {
    let harness = busy_pipeline();
    let events = harness.store.events();

    let restored = restore(events).expect("replay succeeds");
    harness.clock.set(t0());

    assert_eq!(restored.snapshot(), harness.service.snapshot());
    assert_eq!(restored.metrics(), harness.service.metrics());
}

#[test]
fn restored_pipeline_keeps_allocating_in_sequence() {
    let harness = busy_pipeline();
    let restored = restore(harness.store.events()).expect("replay succeeds");

    let next = restored
        .create_opportunity(draft("Delta", 100, "ana"), "ana")
        .expect("created");

    assert_eq!(next.code.as_str(), "P-2025-004");
    assert_eq!(restored.snapshot().last_sequence, harness.store.events().len() as u64 + 1);
}

#[test]
fn sequence_gaps_are_reported_as_corruption() {
    let harness = busy_pipeline();
    let mut events = harness.store.events();
    events.remove(2);

    match restore(events) {
        Err(EventStoreError::Corrupt { position, .. }) => assert_eq!(position, 3),
        Err(other) => panic!("expected corruption, got {other}"),
        Ok(_) => panic!("expected corruption"),
    }
}

#[test]
fn events_the_live_path_would_refuse_are_corrupt() {
    let harness = harness();
    let view = harness
        .service
        .create_opportunity(alpha(), "ana")
        .expect("created");
    let mut events = harness.store.events();
    events.push(PipelineEvent {
        sequence: 2,
        opportunity_id: view.id,
        at: t0(),
        actor: "ana".to_string(),
        change: EventChange::PhaseChanged {
            from: Phase::Opportunity,
            to: Phase::Presales,
            close_probability: 70,
            consumed_review: None,
        },
    });

    match restore(events) {
        Err(EventStoreError::Corrupt { position, reason }) => {
            assert_eq!(position, 2);
            assert!(reason.contains("requires an approval"), "{reason}");
        }
        Err(other) => panic!("expected corruption, got {other}"),
        Ok(_) => panic!("expected corruption"),
    }
}

fn assert_corrupt(events: Vec<PipelineEvent>, expected_position: usize, fragment: &str) {
    match restore(events) {
        Err(EventStoreError::Corrupt { position, reason }) => {
            assert_eq!(position, expected_position);
            assert!(reason.contains(fragment), "{reason}");
        }
        Err(other) => panic!("expected corruption, got {other}"),
        Ok(_) => panic!("expected corruption"),
    }
}

fn appended(events: &[PipelineEvent], change: EventChange) -> Vec<PipelineEvent> {
    let last = events.last().expect("seeded log");
    let mut events = events.to_vec();
    events.push(PipelineEvent {
        sequence: last.sequence + 1,
        opportunity_id: last.opportunity_id,
        at: last.at,
        actor: "ana".to_string(),
        change,
    });
    events
}

#[test]
fn contract_values_outside_the_delivery_window_are_corrupt() {
    let harness = harness();
    harness
        .service
        .create_opportunity(alpha(), "ana")
        .expect("created");

    let events = appended(
        &harness.store.events(),
        EventChange::ContractValueRecorded {
            value: Decimal::from(5_000),
        },
    );
    assert_corrupt(events, 2, "between PRESALES and POSTSALE");
}

#[test]
fn negative_contract_values_are_corrupt() {
    let harness = harness();
    seed_presales(&harness);
    let seeded = harness.store.events();

    let events = appended(
        &seeded,
        EventChange::ContractValueRecorded {
            value: Decimal::from(-5),
        },
    );
    assert_corrupt(events, seeded.len() + 1, "must not be negative");
}

#[test]
fn review_requests_without_a_gated_edge_are_corrupt() {
    let harness = harness();
    seed_presales(&harness);
    let seeded = harness.store.events();

    let events = appended(
        &seeded,
        EventChange::ReviewRequested {
            review_id: ReviewId(2),
            target_phase: Phase::Presales,
        },
    );
    assert_corrupt(events, seeded.len() + 1, "not part of the lifecycle");
}

#[test]
fn oversized_estimates_in_the_log_are_corrupt() {
    let harness = harness();
    harness
        .service
        .create_opportunity(alpha(), "ana")
        .expect("created");
    let mut events = harness.store.events();
    if let EventChange::OpportunityCreated { draft, .. } = &mut events[0].change {
        draft.estimated_value = Decimal::MAX;
    }

    assert_corrupt(events, 1, "must not exceed");
}

#[test]
fn events_serialise_with_kind_and_payload() {
    let harness = harness();
    harness
        .service
        .create_opportunity(alpha(), "ana")
        .expect("created");
    let event = &harness.store.events()[0];

    let json = serde_json::to_value(event).expect("serialise");

    assert_eq!(json["change"]["kind"], "OpportunityCreated");
    assert_eq!(json["change"]["payload"]["code"], "P-2025-001");
    assert_eq!(json["opportunity_id"], 1);
    let decoded: PipelineEvent = serde_json::from_value(json).expect("deserialise");
    assert_eq!(&decoded, event);
}
