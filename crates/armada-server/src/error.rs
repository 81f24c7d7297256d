//! Error taxonomy returned by control plane operations.

use crate::authz::AuthzError;
use crate::storage::DatabaseError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced to callers of [`crate::service::Service`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or contradictory input the caller can fix.
    #[error("{0}")]
    InvalidArgument(String),

    /// The caller may not perform this action. Carries no cause detail.
    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate or in-flight work.
    #[error("{0}")]
    Conflict(String),

    /// Target state does not allow the operation; the message names the fix.
    #[error("{0}")]
    PreconditionFailed(String),

    /// The management channel for a platform is not set up.
    #[error("{0} MDM is not configured")]
    NotConfigured(String),

    /// The downstream delivery channel rejected every target.
    #[error("{0}")]
    BadGateway(String),

    #[error("requires a premium license")]
    MissingLicense,

    #[error("{context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: BoxError,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn internal(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Internal {
            context: context.into(),
            source: source.into(),
        }
    }

    /// HTTP-style status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotConfigured(_) => 400,
            Self::MissingLicense => 402,
            Self::Forbidden => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::PreconditionFailed(_) => 412,
            Self::InvalidArgument(_) => 422,
            Self::Internal { .. } => 500,
            Self::BadGateway(_) => 502,
        }
    }

    /// Message safe to show a caller. Internal causes are not exposed.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::Forbidden => Self::Forbidden,
        }
    }
}

/// Attach operation context to storage failures.
pub trait ResultExt<T> {
    fn context(self, context: &str) -> ServiceResult<T>;
}

impl<T> ResultExt<T> for Result<T, DatabaseError> {
    fn context(self, context: &str) -> ServiceResult<T> {
        self.map_err(|e| ServiceError::internal(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_hides_cause_from_callers() {
        let err = ServiceError::internal("load host", DatabaseError::Query("disk I/O".into()));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), "internal error");
        assert!(err.to_string().contains("disk I/O"));
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = ServiceError::Conflict("script already queued".into());
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.public_message(), "script already queued");
        assert_eq!(ServiceError::Forbidden.public_message(), "forbidden");
        assert_eq!(ServiceError::MissingLicense.status_code(), 402);
    }

    #[test]
    fn authz_forbidden_maps_without_detail() {
        let err: ServiceError = AuthzError::Forbidden.into();
        assert!(matches!(err, ServiceError::Forbidden));
    }
}
