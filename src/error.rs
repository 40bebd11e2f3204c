//! Engine error taxonomy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: u32,
        available: i64,
    },

    #[error("illegal {entity} transition: {from} -> {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

impl CommerceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn illegal_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::IllegalTransition { entity, from: from.to_string(), to: to.to_string() }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientStock { .. } => StatusCode::CONFLICT,
            Self::IllegalTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
