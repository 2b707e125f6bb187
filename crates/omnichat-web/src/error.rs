use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use omnichat_core::ChatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Credential(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::Credential(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        if e.is_credential() {
            ApiError::Credential(e.to_string())
        } else if e.is_invalid_input() {
            ApiError::BadRequest(e.to_string())
        } else {
            match e {
                ChatError::Http(_)
                | ChatError::Api { .. }
                | ChatError::Stream(_)
                | ChatError::StreamIncomplete => {
                    ApiError::Upstream(e.to_string())
                }
                other => ApiError::Internal(other.to_string()),
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ChatError::MissingCredential, StatusCode::UNAUTHORIZED),
            (ChatError::MalformedCredential, StatusCode::UNAUTHORIZED),
            (ChatError::InvalidTemperature(3.0), StatusCode::BAD_REQUEST),
            (ChatError::unsupported_image("nope"), StatusCode::BAD_REQUEST),
            (
                ChatError::Api {
                    status: 429,
                    body: "quota".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (ChatError::Stream("server_error".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
