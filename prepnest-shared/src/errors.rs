use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Application error codes following the pattern E{service}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth errors
/// - E2xxx: Chat errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimited,
    ServiceUnavailable,
    BadRequest,
    PayloadTooLarge,

    // Auth (E1xxx)
    InvalidCredentials,
    TokenExpired,
    TokenInvalid,

    // Chat (E2xxx)
    ConversationNotFound,
    NotConversationMember,
    MessageNotFound,
    GroupNameRequired,
    AlreadyGroupMember,
    NotGroupMember,
    GroupAlreadyExists,
    NotGroupAdmin,
    NotMessageSender,
    DmWithSelf,
    EmptyMessage,
    UserNotFound,
    NotGroupConversation,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::RateLimited => "E0006",
            Self::ServiceUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::PayloadTooLarge => "E0009",

            // Auth
            Self::InvalidCredentials => "E1001",
            Self::TokenExpired => "E1002",
            Self::TokenInvalid => "E1003",

            // Chat
            Self::ConversationNotFound => "E2001",
            Self::NotConversationMember => "E2002",
            Self::MessageNotFound => "E2003",
            Self::GroupNameRequired => "E2004",
            Self::AlreadyGroupMember => "E2005",
            Self::NotGroupMember => "E2006",
            Self::GroupAlreadyExists => "E2007",
            Self::NotGroupAdmin => "E2008",
            Self::NotMessageSender => "E2009",
            Self::DmWithSelf => "E2010",
            Self::EmptyMessage => "E2011",
            Self::UserNotFound => "E2012",
            Self::NotGroupConversation => "E2013",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::BadRequest | Self::GroupNameRequired
            | Self::DmWithSelf | Self::EmptyMessage | Self::NotGroupConversation => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound | Self::ConversationNotFound | Self::MessageNotFound
            | Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::InvalidCredentials | Self::TokenExpired
            | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::NotConversationMember | Self::NotGroupMember
            | Self::NotGroupAdmin | Self::NotMessageSender => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::AlreadyGroupMember | Self::GroupAlreadyExists => StatusCode::CONFLICT,
        }
    }
}

/// Wire shape of every error response: `{"success": false, "error": {...}}`.
/// The counterpart of `ApiResponse`, kept next to the error type that emits it.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                details,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => (
                code.status_code(),
                ErrorResponse::new(code.code(), message, details.clone()),
            ),
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("E0001", "internal server error", None),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::new("E0003", "resource not found", None),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::new("E0001", "database error", None),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("E0002", msg, None),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_codes_are_stable() {
        assert_eq!(ErrorCode::ConversationNotFound.code(), "E2001");
        assert_eq!(ErrorCode::NotConversationMember.code(), "E2002");
        assert_eq!(ErrorCode::GroupAlreadyExists.code(), "E2007");
        assert_eq!(ErrorCode::DmWithSelf.code(), "E2010");
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        // InvalidArgument -> 400
        assert_eq!(ErrorCode::EmptyMessage.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::DmWithSelf.status_code(), StatusCode::BAD_REQUEST);
        // Forbidden -> 403
        assert_eq!(ErrorCode::NotConversationMember.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotGroupAdmin.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotMessageSender.status_code(), StatusCode::FORBIDDEN);
        // NotFound -> 404
        assert_eq!(ErrorCode::MessageNotFound.status_code(), StatusCode::NOT_FOUND);
        // Conflict -> 409
        assert_eq!(ErrorCode::GroupAlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::AlreadyGroupMember.status_code(), StatusCode::CONFLICT);
        // Transient -> 503
        assert_eq!(
            ErrorCode::ServiceUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn error_body_wire_shape() {
        let resp = ErrorResponse::new("E2001", "conversation not found", None);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "error": { "code": "E2001", "message": "conversation not found" }
            })
        );

        let with_details = ErrorResponse::new(
            "E0002",
            "invalid payload",
            Some(serde_json::json!({ "field": "content" })),
        );
        let json = serde_json::to_value(&with_details).unwrap();
        assert_eq!(json["error"]["details"]["field"], "content");
    }
}
