use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use thiserror::Error;

/// Whether retrying a failed registry call can possibly help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("registry denied access to {image}: {message}")]
    Unauthorized { image: String, message: String },

    #[error("registry rejected request for {image}: {message}")]
    Rejected { image: String, message: String },

    #[error("failed to look up credentials for {registry}: {message}")]
    Credentials { registry: String, message: String },

    #[error("registry unavailable for {image}: {message}")]
    Unavailable { image: String, message: String },
}

impl RegistryError {
    pub fn kind(&self) -> RegistryErrorKind {
        match self {
            RegistryError::Unavailable { .. } => RegistryErrorKind::Transient,
            _ => RegistryErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == RegistryErrorKind::Transient
    }
}

/// Classify a registry client error by its variant and, for registry error
/// envelopes, by the OCI error codes. 5xx, 429 and connection failures are
/// transient, everything else is permanent.
pub(crate) fn classify_error(err: OciDistributionError, image: &str) -> RegistryError {
    let image = image.to_string();
    let message = err.to_string();

    match err {
        OciDistributionError::UnauthorizedError { .. }
        | OciDistributionError::AuthenticationFailure(_) => {
            RegistryError::Unauthorized { image, message }
        }
        OciDistributionError::ImageManifestNotFoundError(_) => RegistryError::ImageNotFound(image),
        OciDistributionError::RegistryError { envelope, .. } => {
            let codes: Vec<&OciErrorCode> = envelope.errors.iter().map(|e| &e.code).collect();
            if codes.iter().any(|c| matches!(c, OciErrorCode::Toomanyrequests)) {
                RegistryError::Unavailable { image, message }
            } else if codes
                .iter()
                .any(|c| matches!(c, OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown))
            {
                RegistryError::ImageNotFound(image)
            } else if codes
                .iter()
                .any(|c| matches!(c, OciErrorCode::Unauthorized | OciErrorCode::Denied))
            {
                RegistryError::Unauthorized { image, message }
            } else {
                RegistryError::Rejected { image, message }
            }
        }
        OciDistributionError::ServerError { code, .. } if code >= 500 || code == 429 => {
            RegistryError::Unavailable { image, message }
        }
        OciDistributionError::RequestError(_) | OciDistributionError::IoError(_) => {
            RegistryError::Unavailable { image, message }
        }
        // A 4xx without a parseable error body ends up as a JSON error
        OciDistributionError::JsonError(_) => RegistryError::Rejected {
            image,
            message: format!("registry returned a client error without an error body: {message}"),
        },
        _ => RegistryError::Rejected { image, message },
    }
}
