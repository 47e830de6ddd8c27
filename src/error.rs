use thiserror::Error;

use crate::oci::{ReferenceError, RegistryError, RegistryErrorKind};
use crate::reconcile::ReconcileError;
use crate::workload::StoreError;

/// Process exit codes. Clap uses 2 for usage errors, so ours start at 3.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const MALFORMED_REFERENCE: i32 = 3;
    pub const REGISTRY_PERMANENT: i32 = 4;
    pub const REGISTRY_TRANSIENT: i32 = 5;
    pub const NOT_FOUND_IN_RESOURCE: i32 = 6;
    pub const CONFLICT_EXHAUSTED: i32 = 7;
    pub const STORE_ERROR: i32 = 8;
    pub const CONFIGURATION: i32 = 9;
    /// Only with `--detailed-exit-code`: the workload was changed
    pub const UPDATED: i32 = 10;
    pub const CANCELLED: i32 = 130;
}

/// Failure of a pin operation, classified by the phase that failed
#[derive(Debug, Error)]
pub enum PinError {
    #[error(transparent)]
    MalformedReference(#[from] ReferenceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no container in {resource} uses image {image}")]
    NotFoundInResource { resource: String, image: String },

    #[error("{resource} kept changing concurrently; gave up after {attempts} attempts, re-run to try again")]
    ConflictExhausted { resource: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ReconcileError> for PinError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotFoundInResource { resource, image } => {
                PinError::NotFoundInResource { resource, image }
            }
            ReconcileError::ConflictExhausted { resource, attempts } => {
                PinError::ConflictExhausted { resource, attempts }
            }
            ReconcileError::Store(e) => PinError::Store(e),
            ReconcileError::Cancelled => PinError::Cancelled,
        }
    }
}

impl PinError {
    /// Short name of the phase that failed, used as the diagnostic prefix
    pub fn phase(&self) -> &'static str {
        match self {
            PinError::MalformedReference(_) => "parse reference",
            PinError::Registry(_) => "resolve digest",
            PinError::NotFoundInResource { .. } => "locate container",
            PinError::ConflictExhausted { .. } => "update workload",
            PinError::Store(_) => "access workload",
            PinError::Config(_) => "configure",
            PinError::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PinError::MalformedReference(_) => exit_code::MALFORMED_REFERENCE,
            PinError::Registry(e) => match e.kind() {
                RegistryErrorKind::Transient => exit_code::REGISTRY_TRANSIENT,
                RegistryErrorKind::Permanent => exit_code::REGISTRY_PERMANENT,
            },
            PinError::NotFoundInResource { .. } => exit_code::NOT_FOUND_IN_RESOURCE,
            PinError::ConflictExhausted { .. } => exit_code::CONFLICT_EXHAUSTED,
            PinError::Store(_) => exit_code::STORE_ERROR,
            PinError::Config(_) => exit_code::CONFIGURATION,
            PinError::Cancelled => exit_code::CANCELLED,
        }
    }
}
