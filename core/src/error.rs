use thiserror::Error;

use crate::types::{Cadence, RecordId, Year};

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Record {id} not found")]
    NotFound { id: RecordId },

    #[error("Capacity exceeded: {cadence} {year} already holds {count} of {capacity} rows")]
    CapacityExceeded {
        cadence: Cadence,
        year: Year,
        count: i64,
        capacity: i64,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VolumeError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        VolumeError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable name for the error kind. The UI layer maps these to messages.
    pub fn kind(&self) -> &'static str {
        match self {
            VolumeError::Persistence(_)          => "persistence",
            VolumeError::Serialization(_)        => "serialization",
            VolumeError::Validation { .. }       => "validation",
            VolumeError::NotFound { .. }         => "not_found",
            VolumeError::CapacityExceeded { .. } => "capacity_exceeded",
            VolumeError::Config(_)               => "config",
            VolumeError::Other(_)                => "other",
        }
    }
}

pub type VolumeResult<T> = Result<T, VolumeError>;
