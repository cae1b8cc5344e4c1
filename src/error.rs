//! Error taxonomy shared by the engine, resolvers, and the report workflow.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::models::ScheduleStatus;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// Malformed client input
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{0}")]
    NotFound(String),

    /// A collaborator (camera service, location feed) failed or timed out
    #[error("{service} unavailable: {message}")]
    Upstream { service: &'static str, message: String },

    #[error("schedule {id} is {status}, cannot {action}")]
    InvalidTransition {
        id: String,
        status: ScheduleStatus,
        action: &'static str,
    },

    #[error("email delivery failed: {0}")]
    Delivery(String),

    #[error("storage error: {0}")]
    Database(#[from] surrealdb::Error),
}

impl StatsError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        StatsError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn upstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        StatsError::Upstream {
            service,
            message: err.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            StatsError::Validation { .. } => StatusCode::BAD_REQUEST,
            StatsError::NotFound(_) => StatusCode::NOT_FOUND,
            StatsError::InvalidTransition { .. } => StatusCode::CONFLICT,
            StatsError::Upstream { .. } | StatsError::Delivery(_) => StatusCode::BAD_GATEWAY,
            StatsError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Unreadable JSON bodies are client errors like any other bad input
impl From<JsonRejection> for StatsError {
    fn from(rejection: JsonRejection) -> Self {
        StatsError::validation("body", rejection.body_text())
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for StatsError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

pub type StatsResult<T> = Result<T, StatsError>;
