use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::models::PaymentStatus;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Escrow contract error: {0}")]
    Escrow(#[from] EscrowError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,
}

/// Escrow contract errors - the on-ledger state machine rejects a call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("Contract already initialized")]
    AlreadyInitialized,

    #[error("Contract not initialized")]
    NotInitialized,

    #[error("Actor not permitted to perform this operation")]
    Unauthorized,

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Contract not active: {current}")]
    NotActive { current: String },

    #[error("Escrow balance of {0} must be withdrawn before settling")]
    BalanceOutstanding(i64),
}

/// Ledger client boundary errors
///
/// The split into retryable vs fatal drives the reconciliation retry policy:
/// retryable errors are absorbed with backoff up to the attempt cap, fatal
/// rejections terminate the record immediately.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Retryable ledger error: {0}")]
    Retryable(String),

    #[error("Ledger rejected transaction: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Retryable(_))
    }
}

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid transition: {from:?} -> {to:?} for record {record_id}")]
    InvalidTransition {
        record_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("An active payment already exists for this agreement/payer/direction/amount")]
    DuplicateSubmission,

    #[error("Record {0} is leased by another worker")]
    LeaseContention(Uuid),

    #[error("Retry attempts exhausted for record {record_id} after {attempts} attempts")]
    RetriesExhausted { record_id: Uuid, attempts: i32 },

    #[error("Balance divergence on agreement {agreement_id}: local {local} vs ledger {ledger}")]
    BalanceDivergence {
        agreement_id: Uuid,
        local: i64,
        ledger: i64,
    },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                format!("Invalid input: {}", msg),
                None,
            ),
            AppError::Unauthorized | AppError::Escrow(EscrowError::Unauthorized) => (
                StatusCode::FORBIDDEN,
                "UNAUTHORIZED",
                "Actor not permitted".to_string(),
                None,
            ),
            AppError::Escrow(EscrowError::InvalidAmount(amount)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_AMOUNT",
                format!("Invalid amount: {}", amount),
                Some(serde_json::json!({ "amount": amount })),
            ),
            AppError::Escrow(EscrowError::AlreadyInitialized) => (
                StatusCode::CONFLICT,
                "ALREADY_INITIALIZED",
                "Escrow contract already initialized".to_string(),
                None,
            ),
            AppError::Escrow(EscrowError::NotActive { current }) => (
                StatusCode::CONFLICT,
                "CONTRACT_NOT_ACTIVE",
                format!("Escrow contract not active: {}", current),
                Some(serde_json::json!({ "status": current })),
            ),
            AppError::Escrow(EscrowError::BalanceOutstanding(balance)) => (
                StatusCode::CONFLICT,
                "BALANCE_OUTSTANDING",
                format!("Escrow balance of {} must be withdrawn first", balance),
                Some(serde_json::json!({ "balance": balance })),
            ),
            AppError::Reconcile(ReconcileError::DuplicateSubmission) => (
                StatusCode::CONFLICT,
                "DUPLICATE_SUBMISSION",
                "An equivalent payment is already in flight".to_string(),
                None,
            ),
            AppError::Reconcile(ReconcileError::InvalidTransition {
                record_id,
                from,
                to,
            }) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("Invalid transition {:?} -> {:?}", from, to),
                Some(serde_json::json!({ "record_id": record_id })),
            ),
            AppError::Ledger(LedgerError::Rejected(reason)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "LEDGER_REJECTED",
                format!("Ledger rejected transaction: {}", reason),
                None,
            ),
            AppError::Ledger(LedgerError::Retryable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "LEDGER_UNAVAILABLE",
                "Ledger temporarily unreachable".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Ledger(classify_reqwest_error(&error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Map transport failures onto the retryable/fatal split.
///
/// Timeouts and connection failures are unknown-outcome and must be resolved
/// by polling or retried with backoff; an error status from the gateway means
/// the ledger actually answered.
pub fn classify_reqwest_error(error: &reqwest::Error) -> LedgerError {
    if error.is_timeout() || error.is_connect() {
        return LedgerError::Retryable(format!("{}", error));
    }
    match error.status() {
        Some(status) if status.is_client_error() => {
            LedgerError::Rejected(format!("gateway returned {}", status))
        }
        Some(status) => LedgerError::Retryable(format!("gateway returned {}", status)),
        None => LedgerError::Retryable(format!("{}", error)),
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
