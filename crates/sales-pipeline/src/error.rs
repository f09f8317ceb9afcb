use crate::config::ConfigError;
use crate::pipeline::router::{error_response, status_for};
use crate::pipeline::{EventStoreError, PipelineServiceError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;

/// Failure surfaced by the binaries: start-up, serving, or a facade call.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Pipeline(PipelineServiceError),
    /// The event log could not be read or did not replay cleanly.
    EventLog {
        source: EventStoreError,
        log: Option<PathBuf>,
    },
}

impl AppError {
    pub fn event_log(source: EventStoreError, log: Option<PathBuf>) -> Self {
        Self::EventLog { source, log }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Pipeline(err) => status_for(err.kind()),
            AppError::EventLog { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Telemetry(_) | AppError::Io(_) | AppError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {err}"),
            AppError::Telemetry(err) => write!(f, "telemetry error: {err}"),
            AppError::Io(err) => write!(f, "io error: {err}"),
            AppError::Server(err) => write!(f, "server error: {err}"),
            AppError::Pipeline(err) => write!(f, "pipeline rejected the request ({}): {err}", err.kind()),
            AppError::EventLog { source, log: Some(log) } => {
                write!(f, "event log {} unusable: {source}", log.display())
            }
            AppError::EventLog { source, log: None } => write!(f, "event log unusable: {source}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Pipeline(err) => Some(err),
            AppError::EventLog { source, .. } => Some(source),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Pipeline(err) = &self {
            return error_response(err);
        }
        let body = Json(json!({ "error": self.to_string(), "kind": "internal" }));
        (self.status(), body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<PipelineServiceError> for AppError {
    fn from(value: PipelineServiceError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<EventStoreError> for AppError {
    fn from(value: EventStoreError) -> Self {
        Self::event_log(value, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ReviewError, ReviewId};

    #[test]
    fn pipeline_errors_keep_their_kind_status() {
        let error = AppError::from(PipelineServiceError::from(ReviewError::NotFound(ReviewId(4))));
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert!(error.to_string().contains("not_found"));
    }

    #[test]
    fn event_log_errors_name_the_log() {
        let error = AppError::event_log(
            EventStoreError::Corrupt {
                position: 3,
                reason: "expected sequence 3, found 5".to_string(),
            },
            Some(PathBuf::from("/var/lib/pipeline/events.jsonl")),
        );

        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
        let message = error.to_string();
        assert!(message.contains("/var/lib/pipeline/events.jsonl"));
        assert!(message.contains("expected sequence 3"));
    }
}
