use super::common::*;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::pipeline::router::{self, ActorRequest, AdvanceRequest};
use crate::pipeline::{pipeline_router, Phase};

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, read_json_body(response).await)
}

fn alpha_payload() -> Value {
    json!({
        "actor": "ana",
        "name": "Alpha",
        "client": "C1",
        "description": "d",
        "estimated_value": "10000",
        "assigned_to": "ana",
    })
}

#[tokio::test]
async fn create_route_returns_the_view() {
    let harness = harness();
    let router = pipeline_router(harness.service.clone());

    let (status, body) = send(&router, post_json("/api/v1/opportunities", alpha_payload())).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], "P-2025-001");
    assert_eq!(body["phase"], "OPPORTUNITY");
    assert_eq!(body["close_probability"], 20);
    assert_eq!(body["risk"], "NORMAL");
}

#[tokio::test]
async fn create_route_lists_missing_fields() {
    let harness = harness();
    let router = pipeline_router(harness.service.clone());

    let (status, body) = send(
        &router,
        post_json("/api/v1/opportunities", json!({"actor": "ana", "name": "Alpha"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "invalid_input");
    assert_eq!(
        body["fields"],
        json!(["client", "description", "assigned_to", "estimated_value"])
    );
}

#[tokio::test]
async fn presales_flow_over_http() {
    let harness = harness();
    let router = pipeline_router(harness.service.clone());
    send(&router, post_json("/api/v1/opportunities", alpha_payload())).await;

    let (status, body) = send(
        &router,
        post_json(
            "/api/v1/opportunities/1/advance",
            json!({"actor": "ana", "target_phase": "presales"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "approval_required");

    let (status, review) = send(
        &router,
        post_json("/api/v1/opportunities/1/reviews", json!({"actor": "ana"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(review["status"], "PENDING");

    let (_, pending) = send(&router, get("/api/v1/reviews/pending")).await;
    assert_eq!(pending.as_array().map(Vec::len), Some(1));

    let (status, decided) = send(
        &router,
        post_json(
            "/api/v1/reviews/1/decision",
            json!({"decider": "maria", "approve": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decided["status"], "APPROVED");

    let (status, body) = send(
        &router,
        post_json(
            "/api/v1/opportunities/1/advance",
            json!({"actor": "ana", "target_phase": "PRESALES"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "PRESALES");
    assert_eq!(body["close_probability"], 70);

    let (status, detail) = send(&router, get("/api/v1/opportunities/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["history"].as_array().map(Vec::len), Some(4));
    assert_eq!(detail["reviews"][0]["status"], "APPROVED");
}

#[tokio::test]
async fn closed_opportunities_answer_conflict() {
    let harness = harness();
    let router = pipeline_router(harness.service.clone());
    send(&router, post_json("/api/v1/opportunities", alpha_payload())).await;

    let (status, body) = send(
        &router,
        post_json("/api/v1/opportunities/1/close-lost", json!({"actor": "ana"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "CLOSED_LOST");

    let (status, body) = send(
        &router,
        post_json("/api/v1/opportunities/1/probability", json!({"actor": "ana", "close_probability": 50})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "terminal");
}

#[tokio::test]
async fn unknown_phase_is_invalid_input() {
    let harness = harness();
    send(
        &pipeline_router(harness.service.clone()),
        post_json("/api/v1/opportunities", alpha_payload()),
    )
    .await;

    let response = router::advance_handler(
        State(harness.service.clone()),
        axum::extract::Path(1),
        axum::Json(AdvanceRequest {
            actor: "ana".to_string(),
            target_phase: "negotiation".to_string(),
            close_probability: None,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert_eq!(body["fields"], json!(["target_phase"]));
}

#[tokio::test]
async fn missing_opportunity_is_not_found() {
    let harness = harness();

    let response = router::review_request_handler(
        State(harness.service.clone()),
        axum::extract::Path(9),
        axum::Json(ActorRequest {
            actor: "ana".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_route_applies_query_filters() {
    let harness = harness();
    let router = pipeline_router(harness.service.clone());
    send(&router, post_json("/api/v1/opportunities", alpha_payload())).await;
    harness.clock.advance(days(9));

    let (status, at_risk) = send(&router, get("/api/v1/opportunities?risk=at_risk&assigned_to=ana")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(at_risk.as_array().map(Vec::len), Some(1));
    assert_eq!(at_risk[0]["days_stale"], 9);

    let (_, none) = send(&router, get("/api/v1/opportunities?phase=delivery")).await;
    assert_eq!(none, json!([]));

    let (status, body) = send(&router, get("/api/v1/opportunities?risk=stale")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["fields"], json!(["risk"]));
}

#[tokio::test]
async fn metrics_route_reports_pipeline_figures() {
    let harness = harness();
    let router = pipeline_router(harness.service.clone());
    send(&router, post_json("/api/v1/opportunities", alpha_payload())).await;

    let (status, body) = send(&router, get("/api/v1/pipeline/metrics")).await;

    assert_eq!(status, StatusCode::OK);
    let amount = |field: &str| -> Decimal {
        body[field].as_str().expect("decimal string").parse().expect("decimal")
    };
    assert_eq!(amount("pipeline_total"), Decimal::from(10_000));
    assert_eq!(amount("pipeline_weighted"), Decimal::from(2_000));
    assert_eq!(body["count_by_risk"]["NORMAL"], 1);
    assert_eq!(body["count_by_phase"][Phase::Opportunity.as_str()], 1);
}

#[tokio::test]
async fn store_outage_maps_to_service_unavailable() {
    let harness = harness_with(FlakyEventStore::default());
    harness.store.fail_writes(true);
    let router = pipeline_router(harness.service.clone());

    let (status, body) = send(&router, post_json("/api/v1/opportunities", alpha_payload())).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "persistence");
}
