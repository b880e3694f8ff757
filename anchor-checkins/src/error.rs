use lexicons::StrongRef;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckinError>;

/// Which remote write a failure happened in. Carried on errors so callers can
/// decide whether resubmitting the whole operation is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    CreateAddress,
    UploadBlob,
    CreateCheckin,
    DeleteBlob,
    DeleteCheckin,
    DeleteAddress,
}

impl std::fmt::Display for WriteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WriteStep::CreateAddress => "address create",
            WriteStep::UploadBlob => "blob upload",
            WriteStep::CreateCheckin => "check-in create",
            WriteStep::DeleteBlob => "blob delete",
            WriteStep::DeleteCheckin => "check-in delete",
            WriteStep::DeleteAddress => "address delete",
        };
        f.write_str(name)
    }
}

/// Failure of a single repo call, before the coordinator attaches step
/// context. Produced by [`crate::repo::RepoClient`] implementations.
#[derive(Debug, Clone, Error)]
pub enum RepoError {
    #[error("not authenticated")]
    Auth,
    #[error("record not found")]
    NotFound,
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("rejected by the PDS: {0}")]
    Rejected(String),
    #[error("{0}")]
    Internal(String),
}

/// Caller-visible failure of a check-in operation.
#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("invalid check-in: {0}")]
    Validation(String),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("record not found")]
    NotFound,

    /// The remote store was unreachable or rate-limited. Resubmitting the
    /// whole operation later is safe.
    #[error("{step} failed upstream, retry later: {message}")]
    UpstreamTransient { step: WriteStep, message: String },

    /// The remote store permanently refused the write.
    #[error("{step} rejected by the PDS: {message}")]
    UpstreamRejected { step: WriteStep, message: String },

    /// A later write failed and the compensating delete of an earlier record
    /// failed too. The orphan's reference is carried for a later sweep.
    #[error("{step} failed and the orphaned record {} could not be cleaned up: {message}", orphan.uri)]
    PartialWriteOrphan {
        step: WriteStep,
        orphan: StrongRef,
        message: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CheckinError {
    /// Attach step context to a repo failure.
    pub fn at(step: WriteStep, error: RepoError) -> Self {
        match error {
            RepoError::Auth => CheckinError::Unauthenticated,
            RepoError::NotFound => CheckinError::NotFound,
            RepoError::Transient(message) => CheckinError::UpstreamTransient { step, message },
            RepoError::Rejected(message) => CheckinError::UpstreamRejected { step, message },
            RepoError::Internal(message) => CheckinError::Internal(message),
        }
    }
}

impl From<serde_json::Error> for CheckinError {
    fn from(e: serde_json::Error) -> Self {
        CheckinError::Internal(e.to_string())
    }
}

impl From<lexicons::RecordError> for CheckinError {
    fn from(e: lexicons::RecordError) -> Self {
        CheckinError::Validation(e.to_string())
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for CheckinError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use axum::http::StatusCode;

        let status = match self {
            CheckinError::Validation(_) => StatusCode::BAD_REQUEST,
            CheckinError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CheckinError::NotFound => StatusCode::NOT_FOUND,
            CheckinError::UpstreamTransient { .. } => StatusCode::BAD_GATEWAY,
            CheckinError::UpstreamRejected { .. } | CheckinError::PartialWriteOrphan { .. } => {
                StatusCode::BAD_GATEWAY
            }
            CheckinError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
