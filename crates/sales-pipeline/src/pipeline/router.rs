use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{InvalidInput, OpportunityDraft, OpportunityId, Phase};
use super::events::EventStore;
use super::repository::OpportunityFilter;
use super::reviews::ReviewId;
use super::risk::RiskLevel;
use super::service::{ErrorKind, PipelineService, PipelineServiceError};

/// Router builder exposing the pipeline facade over HTTP.
pub fn pipeline_router<S>(service: Arc<PipelineService<S>>) -> Router
where
    S: EventStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/opportunities",
            post(create_handler::<S>).get(query_handler::<S>),
        )
        .route("/api/v1/opportunities/:id", get(detail_handler::<S>))
        .route(
            "/api/v1/opportunities/:id/contacts",
            post(contact_handler::<S>),
        )
        .route(
            "/api/v1/opportunities/:id/reviews",
            post(review_request_handler::<S>),
        )
        .route(
            "/api/v1/opportunities/:id/advance",
            post(advance_handler::<S>),
        )
        .route(
            "/api/v1/opportunities/:id/close-lost",
            post(close_lost_handler::<S>),
        )
        .route(
            "/api/v1/opportunities/:id/probability",
            post(probability_handler::<S>),
        )
        .route(
            "/api/v1/opportunities/:id/contract",
            post(contract_handler::<S>),
        )
        .route("/api/v1/reviews/pending", get(pending_reviews_handler::<S>))
        .route(
            "/api/v1/reviews/:id/decision",
            post(decision_handler::<S>),
        )
        .route("/api/v1/pipeline/metrics", get(metrics_handler::<S>))
        .with_state(service)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOpportunityRequest {
    #[serde(default)]
    pub actor: String,
    #[serde(flatten)]
    pub draft: OpportunityDraft,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorRequest {
    #[serde(default)]
    pub actor: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub next_contact_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvanceRequest {
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub target_phase: String,
    #[serde(default)]
    pub close_probability: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbabilityRequest {
    #[serde(default)]
    pub actor: String,
    pub close_probability: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractRequest {
    #[serde(default)]
    pub actor: String,
    pub contracted_value: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub decider: String,
    pub approve: bool,
}

/// Query string of the list endpoint; values are parsed case-insensitively.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpportunityQuery {
    pub assigned_to: Option<String>,
    pub risk: Option<String>,
    pub phase: Option<String>,
}

impl OpportunityQuery {
    fn into_filter(self) -> Result<OpportunityFilter, InvalidInput> {
        let risk = self
            .risk
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| raw.parse::<RiskLevel>())
            .transpose()
            .map_err(|error| InvalidInput::field("risk", error.to_string()))?;
        let phase = self
            .phase
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| raw.parse::<Phase>())
            .transpose()
            .map_err(|error| InvalidInput::field("phase", error.to_string()))?;
        Ok(OpportunityFilter {
            assigned_to: self.assigned_to.filter(|raw| !raw.trim().is_empty()),
            risk,
            phase,
        })
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ApprovalRequired | ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::InvalidTransition
        | ErrorKind::Terminal
        | ErrorKind::AlreadyPending
        | ErrorKind::NotPending
        | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Persistence => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub(crate) fn error_response(error: &PipelineServiceError) -> Response {
    let kind = error.kind();
    let mut payload = json!({
        "error": error.to_string(),
        "kind": kind,
    });
    if let Some(fields) = error.fields() {
        payload["fields"] = json!(fields);
    }
    (status_for(kind), Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, PipelineServiceError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn create_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Json(request): Json<CreateOpportunityRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(
        StatusCode::CREATED,
        service.create_opportunity(request.draft, &request.actor),
    )
}

pub(crate) async fn query_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Query(query): Query<OpportunityQuery>,
) -> Response
where
    S: EventStore + 'static,
{
    let result = query
        .into_filter()
        .map(|filter| service.query(&filter))
        .map_err(PipelineServiceError::from);
    respond(StatusCode::OK, result)
}

pub(crate) async fn detail_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(StatusCode::OK, service.opportunity(OpportunityId(id)))
}

pub(crate) async fn contact_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
    Json(request): Json<ContactRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(
        StatusCode::OK,
        service.register_contact(OpportunityId(id), &request.actor, request.next_contact_at),
    )
}

pub(crate) async fn review_request_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
    Json(request): Json<ActorRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(
        StatusCode::CREATED,
        service.request_presales_review(OpportunityId(id), &request.actor),
    )
}

pub(crate) async fn advance_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
    Json(request): Json<AdvanceRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    let target = match request.target_phase.parse::<Phase>() {
        Ok(phase) => phase,
        Err(error) => {
            let error = InvalidInput::field("target_phase", error.to_string());
            return error_response(&PipelineServiceError::from(error));
        }
    };
    let id = OpportunityId(id);
    let result = match request.close_probability {
        Some(probability) => {
            service.advance_with_probability(id, target, probability, &request.actor)
        }
        None => service.advance(id, target, &request.actor),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn close_lost_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
    Json(request): Json<ActorRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(
        StatusCode::OK,
        service.close_lost(OpportunityId(id), &request.actor),
    )
}

pub(crate) async fn probability_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
    Json(request): Json<ProbabilityRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(
        StatusCode::OK,
        service.override_probability(OpportunityId(id), request.close_probability, &request.actor),
    )
}

pub(crate) async fn contract_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
    Json(request): Json<ContractRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(
        StatusCode::OK,
        service.record_contract_value(OpportunityId(id), request.contracted_value, &request.actor),
    )
}

pub(crate) async fn pending_reviews_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
) -> Response
where
    S: EventStore + 'static,
{
    (StatusCode::OK, Json(service.pending_reviews())).into_response()
}

pub(crate) async fn decision_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
    Path(id): Path<u64>,
    Json(request): Json<DecisionRequest>,
) -> Response
where
    S: EventStore + 'static,
{
    respond(
        StatusCode::OK,
        service.decide_review(ReviewId(id), &request.decider, request.approve),
    )
}

pub(crate) async fn metrics_handler<S>(
    State(service): State<Arc<PipelineService<S>>>,
) -> Response
where
    S: EventStore + 'static,
{
    (StatusCode::OK, Json(service.metrics())).into_response()
}
