use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

/// Application-specific error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Signing function {function} is not available in the page")]
    SigningFunctionMissing { function: String },

    #[error("Signing function {function} failed: {message}")]
    SigningFunctionThrew { function: String, message: String },

    #[error("Browser environment lost: {0}")]
    EnvironmentLost(String),

    #[error("No qualifying {target} stream captured within {timeout_secs:.1}s")]
    InterceptionTimeout { target: String, timeout_secs: f64 },

    #[error("Search API request failed: {0}")]
    UpstreamRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::SigningFunctionMissing { .. } => "signing_function_missing",
            AppError::SigningFunctionThrew { .. } => "signing_function_threw",
            AppError::EnvironmentLost(_) => "environment_lost",
            AppError::InterceptionTimeout { .. } => "interception_timeout",
            AppError::UpstreamRequest(_) => "upstream_request_failed",
            AppError::Serialization(_) => "serialization_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Diagnostic trace for errors nobody anticipated
    fn trace(&self) -> Option<String> {
        match self {
            AppError::Internal(e) => Some(format!("{:?}", e)),
            AppError::Serialization(e) => Some(format!("{:?}", e)),
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::InterceptionTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            AppError::SigningFunctionMissing { .. }
            | AppError::SigningFunctionThrew { .. }
            | AppError::EnvironmentLost(_)
            | AppError::UpstreamRequest(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            status: "error",
            error: self.error_code().to_string(),
            message: self.to_string(),
            trace: self.trace(),
        })
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn timeout_maps_to_408_without_trace() {
        let err = AppError::InterceptionTimeout {
            target: "FlightListSearchSSE".to_string(),
            timeout_secs: 1.0,
        };
        assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "interception_timeout");
        assert!(json.get("trace").is_none());
    }

    #[actix_web::test]
    async fn internal_errors_carry_a_trace() {
        let err = AppError::Internal(anyhow::anyhow!("root cause").context("while launching"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let trace = json["trace"].as_str().unwrap();
        assert!(trace.contains("root cause"));
        assert!(trace.contains("while launching"));
    }

    #[test]
    fn sentinel_message_is_preserved() {
        let err = AppError::SigningFunctionThrew {
            function: "window.signature".to_string(),
            message: "TypeError: x is undefined".to_string(),
        };
        assert!(err.to_string().contains("TypeError: x is undefined"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AppError::InvalidInput("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
