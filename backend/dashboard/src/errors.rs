//! Application-wide error types.

use serde::Serialize;
use thiserror::Error;

/// A single rejected form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DashboardError {
    /// Shorthand for a validation failure on one field.
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Stable machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::Rpc { .. } => "network",
            Self::Json(_) | Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::Wallet(_) => "wallet",
            Self::Contract(_) => "contract",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "config",
        }
    }
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, DashboardError>;
