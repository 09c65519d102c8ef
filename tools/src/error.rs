use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use court_ledger_core::error::LedgerError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    code: u16,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(e) => match e {
                LedgerError::Unauthorized => StatusCode::UNAUTHORIZED,
                LedgerError::MalformedRequest(_) | LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
                LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
                LedgerError::Conflict { .. } => StatusCode::CONFLICT,
                LedgerError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {self}");
        }
        let message = match &self {
            ApiError::Ledger(LedgerError::Unauthorized) => "Invalid API key".to_string(),
            _ => self.to_string(),
        };
        let body = Json(ErrorBody {
            success: false,
            code: status.as_u16(),
            message,
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
