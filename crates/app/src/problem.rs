use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use fis_core::validation::ValidationErrors;
use fis_storage::RecordError;

use crate::operations::OperationError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<ValidationErrors>,
}

pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
                errors: None,
            },
        }
    }

    /// 422 carrying the field-level messages.
    pub fn validation(errors: ValidationErrors) -> Self {
        let mut problem = Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_failed",
            "one or more fields are invalid",
        );
        problem.body.errors = Some(errors);
        problem
    }

    /// Maps a repository failure on `resource` to its HTTP form.
    pub fn record(resource: &str, err: RecordError) -> Self {
        match err {
            RecordError::NotFound => Self::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{resource} not found"),
            ),
            RecordError::Duplicate => Self::new(
                StatusCode::CONFLICT,
                "duplicate",
                format!("{resource} with the same code already exists"),
            ),
            RecordError::MissingReference => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing_reference",
                format!("{resource} refers to a record that does not exist"),
            ),
            RecordError::InUse => Self::new(
                StatusCode::CONFLICT,
                "in_use",
                format!("{resource} is still referenced by other records"),
            ),
            RecordError::Conflict => Self::new(
                StatusCode::CONFLICT,
                "conflict",
                format!("{resource} was modified concurrently"),
            ),
            RecordError::Busy(err) => {
                error!(stage = "api", %resource, error = %err, "database busy");
                busy()
            }
            RecordError::Database(err) => {
                error!(stage = "api", %resource, error = %err, "database error");
                internal_error()
            }
        }
    }
}

impl From<OperationError> for ProblemResponse {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "not_found", "flight not found")
            }
            OperationError::VersionConflict { expected, actual } => Self::new(
                StatusCode::CONFLICT,
                "version_conflict",
                format!("flight is at version {actual}, expected {expected}"),
            ),
            OperationError::ConcurrentModification => Self::new(
                StatusCode::CONFLICT,
                "version_conflict",
                "flight was modified concurrently",
            ),
            OperationError::Busy(_) => busy(),
            OperationError::Invalid(errors) => Self::validation(errors),
            OperationError::Record(err) => Self::record("flight", err),
            other => {
                error!(stage = "operations", error = %other, "flight operation failed");
                internal_error()
            }
        }
    }
}

pub fn internal_error() -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "unexpected server error",
    )
}

fn busy() -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "busy",
        "database is busy, retry the request",
    )
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
