//! Error type for the orchestration layer.

use campaign_core::error::CoreError;
use campaign_core::types::DbId;
use campaign_hubsoft::HubsoftError;

/// Errors surfaced by the service operations and the orchestrator loops.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// The external source query failed; carries the normalized statement
    /// text for the run log.
    #[error("Source query failed: {0}")]
    QueryExecution(String),

    /// Enrichment API authentication failed. Fatal to the whole run, not
    /// to a single item.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The requested operation is not allowed in the run's current state.
    #[error("Operation not allowed: {0}")]
    Ineligible(String),
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::Conflict(msg) => Self::Ineligible(msg),
            CoreError::Internal(msg) => Self::Validation(msg),
        }
    }
}

impl From<HubsoftError> for PipelineError {
    fn from(err: HubsoftError) -> Self {
        Self::Authentication(err.to_string())
    }
}
