// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

/// Coarse classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Conflict,
    Infrastructure,
}

/// Domain-level error raised by stores, gates, mutators and services.
///
/// Every variant carries the message shown in logs. Whether that message is
/// safe to surface to the client depends on the kind: Infrastructure details
/// are replaced with a per-operation fallback at the handler boundary.
#[derive(Debug, Error)]
pub enum OpError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    /// Actor lacks the required role, or the target entity belongs to a
    /// different organisation.
    #[error("{0}")]
    Authorization(String),

    /// Actor does not outrank the target user.
    #[error("{0}")]
    InsufficientRank(String),

    /// The requested move would leave a device spanning two disjoint
    /// branches of the pool tree.
    #[error("{0}")]
    BranchConflict(String),

    /// The organisation is at its pool quota.
    #[error("{0}")]
    QuotaExceeded(String),

    /// The actor is the only remaining admin and may not be removed.
    #[error("{0}")]
    LastAdminStanding(String),

    /// Database or downstream collaborator failure.
    #[error("{0}")]
    Infrastructure(String),
}

impl OpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpError::Validation(_) => ErrorKind::Validation,
            OpError::Authorization(_) | OpError::InsufficientRank(_) => ErrorKind::Authorization,
            OpError::BranchConflict(_)
            | OpError::QuotaExceeded(_)
            | OpError::LastAdminStanding(_) => ErrorKind::Conflict,
            OpError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        OpError::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        OpError::Authorization(message.into())
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        OpError::Infrastructure(message.into())
    }
}

impl From<sqlx::Error> for OpError {
    fn from(err: sqlx::Error) -> Self {
        OpError::Infrastructure(format!("database error: {}", err))
    }
}

/// HTTP API error with the status codes of the wire contract and
/// client-friendly messages.
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request (also the generic surface for infrastructure failures)
    BadRequest(String),

    // 401 Unauthorized (identity failures and cross-branch rejections)
    Unauthorized(String),

    // 402 Payment Required (insufficient relative permission)
    InsufficientPermission(String),

    // 403 Forbidden (role failures, quota, last-admin guard)
    Forbidden(String),

    // 422 Unprocessable Entity (input validation)
    UnprocessableEntity(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::InsufficientPermission(_) => 402,
            ApiError::Forbidden(_) => 403,
            ApiError::UnprocessableEntity(_) => 422,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::InsufficientPermission(msg)
            | ApiError::Forbidden(msg)
            | ApiError::UnprocessableEntity(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::InsufficientPermission(_) => "INSUFFICIENT_PERMISSION",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::UnprocessableEntity(_) => "UNPROCESSABLE_ENTITY",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "success": false,
            "message": self.message(),
            "code": self.error_code()
        })
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn insufficient_permission(message: impl Into<String>) -> Self {
        ApiError::InsufficientPermission(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn unprocessable_entity(message: impl Into<String>) -> Self {
        ApiError::UnprocessableEntity(message.into())
    }

    /// Map a domain error to its wire representation.
    ///
    /// `fallback` is the non-specific message returned for infrastructure
    /// failures; the real cause is logged here and never leaves the server.
    /// Cross-branch rejections surface as 401 and quota / last-admin guards
    /// as 403, matching the statuses clients already depend on.
    pub fn from_op(err: OpError, fallback: &str) -> Self {
        match err {
            OpError::Validation(msg) => ApiError::UnprocessableEntity(msg),
            OpError::Authorization(msg) => ApiError::Forbidden(msg),
            OpError::InsufficientRank(msg) => ApiError::InsufficientPermission(msg),
            OpError::BranchConflict(msg) => ApiError::Unauthorized(msg),
            OpError::QuotaExceeded(msg) => ApiError::Forbidden(msg),
            OpError::LastAdminStanding(msg) => ApiError::Forbidden(msg),
            OpError::Infrastructure(msg) => {
                tracing::error!("infrastructure error: {}", msg);
                ApiError::BadRequest(fallback.to_string())
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_wire_taxonomy() {
        assert_eq!(OpError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(OpError::authorization("x").kind(), ErrorKind::Authorization);
        assert_eq!(
            OpError::InsufficientRank("x".into()).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(OpError::BranchConflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(OpError::QuotaExceeded("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(OpError::infrastructure("x").kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn status_mapping_matches_contract() {
        assert_eq!(ApiError::from_op(OpError::validation("bad field"), "f").status_code(), 422);
        assert_eq!(
            ApiError::from_op(OpError::BranchConflict("branch".into()), "f").status_code(),
            401
        );
        assert_eq!(
            ApiError::from_op(OpError::InsufficientRank("rank".into()), "f").status_code(),
            402
        );
        assert_eq!(
            ApiError::from_op(OpError::QuotaExceeded("quota".into()), "f").status_code(),
            403
        );
        assert_eq!(
            ApiError::from_op(OpError::authorization("role"), "f").status_code(),
            403
        );
    }

    #[test]
    fn infrastructure_details_are_not_leaked() {
        let err = OpError::infrastructure("connection refused to db-internal:5432");
        let api = ApiError::from_op(err, "Unable to add device to pool");
        assert_eq!(api.status_code(), 400);
        assert_eq!(api.message(), "Unable to add device to pool");
    }

    #[test]
    fn validation_message_passes_through() {
        let api = ApiError::from_op(OpError::validation("pool_id must be a uuid"), "f");
        assert_eq!(api.message(), "pool_id must be a uuid");
        assert_eq!(api.to_json()["success"], json!(false));
    }
}
