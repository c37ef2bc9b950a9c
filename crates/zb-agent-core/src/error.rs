use thiserror::Error;

/// Request problems detected before any engine command runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no operation selected")]
    NoOperation,

    #[error("rollback base (-b) is only valid with restore (-r)")]
    RollbackWithoutRestore,

    #[error("filesystem (-z) is required")]
    MissingFilesystem,

    #[error("{what} must be numeric, got {value:?}")]
    NotNumeric { what: &'static str, value: String },

    #[error("{what} is not a valid snapshot name component: {value:?}")]
    InvalidComponent { what: &'static str, value: String },

    #[error("filesystem name is not valid: {0:?}")]
    InvalidFilesystem(String),

    #[error("refusing to touch unsanctioned snapshot {0:?}")]
    UnsanctionedSnapshot(String),
}
