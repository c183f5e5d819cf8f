use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{catalog::CatalogError, repos::RepoError, request::ValidationError},
    cache::CacheError,
    config::LoadError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// A failed request outcome. Cloneable so one failure can be handed to every
/// caller waiting on the same cache key.
#[derive(Debug, Clone, Error)]
#[error("{public_message} ({})", .report.status)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn report(&self) -> &ErrorReport {
        &self.report
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<ValidationError> for HttpError {
    fn from(error: ValidationError) -> Self {
        HttpError::from_error(
            "application::request::RequestValidator",
            StatusCode::BAD_REQUEST,
            "Invalid request parameters",
            &error,
        )
    }
}

impl From<CatalogError> for HttpError {
    fn from(error: CatalogError) -> Self {
        const SOURCE: &str = "application::catalog::CatalogService";
        match &error {
            CatalogError::NotFound { .. } => {
                HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Resource not found", &error)
            }
            CatalogError::Storage {
                source: RepoError::Timeout,
                ..
            } => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage timeout",
                &error,
            ),
            CatalogError::Storage { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &error,
            ),
        }
    }
}

impl From<CacheError<HttpError>> for HttpError {
    fn from(error: CacheError<HttpError>) -> Self {
        match error {
            CacheError::Compute(inner) => inner,
            abandoned @ CacheError::Abandoned { .. } => HttpError::from_error(
                "cache::store::ResponseCache",
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &abandoned,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::request::ValidationReason;
    use crate::cache::CacheKey;

    #[test]
    fn validation_failures_are_client_errors() {
        let err = HttpError::from(ValidationError {
            field: "pg",
            reason: ValidationReason::NotAnInteger,
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.report().messages, ["field `pg` is not an integer"]);
    }

    #[test]
    fn not_found_maps_to_404_and_storage_to_500() {
        let not_found = HttpError::from(CatalogError::NotFound { entity: "movie" });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let storage = HttpError::from(CatalogError::Storage {
            operation: "find_movie",
            source: RepoError::from_persistence("connection reset"),
        });
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            storage.report().messages,
            [
                "storage failure during `find_movie`: persistence error: connection reset",
                "persistence error: connection reset",
            ]
        );
    }

    #[test]
    fn abandoned_computation_is_a_server_error() {
        let key = CacheKey::from_digest([7; 32]);
        let err = HttpError::from(CacheError::<HttpError>::Abandoned { key });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn report_travels_with_the_response() {
        let mut response = HttpError::new(
            "tests",
            StatusCode::BAD_REQUEST,
            "Invalid request parameters",
            "detail",
        )
        .into_response();
        let report = response
            .extensions_mut()
            .remove::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.source, "tests");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
