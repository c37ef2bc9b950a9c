//! The single operation an invocation performs, validated up front.

use crate::error::ValidationError;
use crate::snapshot::{ensure_numeric, SnapshotName, SnapshotSuffix, SNAPSHOT_DELIMITER};

/// Raw option values as they arrive from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub filesystem: Option<String>,
    pub list: bool,
    pub restore: bool,
    pub delete: Option<String>,
    pub full: Option<String>,
    pub incremental: Option<String>,
    pub dataset: Option<String>,
    pub rollback_base: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    List,
    Backup(BackupPlan),
    Delete { snapshot: SnapshotName },
    Restore {
        filesystem: String,
        rollback_to: Option<SnapshotName>,
    },
}

/// Snapshot to create, then the stream to send from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub kind: BackupKind,
    pub snapshot: SnapshotName,
    pub send: SendSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
    Dataset,
}

impl BackupKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incr",
            Self::Dataset => "dset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendSpec {
    /// Self-contained stream of one snapshot.
    Full { target: SnapshotName },
    /// Changes between exactly two snapshots.
    Incremental {
        base: SnapshotName,
        target: SnapshotName,
    },
    /// Changes from `base` to `target` including every snapshot in between.
    Intermediary {
        base: SnapshotName,
        target: SnapshotName,
    },
}

impl Operation {
    /// Picks and validates the requested operation. Nothing here touches
    /// the storage engine.
    pub fn from_request(req: &Request) -> Result<Self, ValidationError> {
        if req.rollback_base.is_some() && !req.restore {
            return Err(ValidationError::RollbackWithoutRestore);
        }
        if req.list {
            return Ok(Self::List);
        }
        if req.restore {
            let filesystem = required_filesystem(req)?;
            let rollback_to = match req.rollback_base.as_deref() {
                Some(base) => Some(SnapshotName::new(&filesystem, SnapshotSuffix::full(base)?)),
                None => None,
            };
            return Ok(Self::Restore {
                filesystem,
                rollback_to,
            });
        }
        if let Some(suffix) = req.delete.as_deref() {
            let filesystem = required_filesystem(req)?;
            let suffix = SnapshotSuffix::parse_sanctioned(suffix)?;
            return Ok(Self::Delete {
                snapshot: SnapshotName::new(&filesystem, suffix),
            });
        }
        if let Some(stamp) = req.dataset.as_deref() {
            let filesystem = required_filesystem(req)?;
            let target = SnapshotName::new(&filesystem, SnapshotSuffix::dataset(stamp)?);
            let send = match req.incremental.as_deref() {
                Some(base) => SendSpec::Intermediary {
                    base: SnapshotName::new(&filesystem, SnapshotSuffix::dataset(base)?),
                    target: target.clone(),
                },
                None => SendSpec::Full {
                    target: target.clone(),
                },
            };
            return Ok(Self::Backup(BackupPlan {
                kind: BackupKind::Dataset,
                snapshot: target,
                send,
            }));
        }
        if let Some(ts) = req.full.as_deref() {
            let filesystem = required_filesystem(req)?;
            let target = SnapshotName::new(&filesystem, SnapshotSuffix::full(ts)?);
            return Ok(Self::Backup(BackupPlan {
                kind: BackupKind::Full,
                snapshot: target.clone(),
                send: SendSpec::Full { target },
            }));
        }
        if let Some(base) = req.incremental.as_deref() {
            let filesystem = required_filesystem(req)?;
            ensure_numeric("incremental base timestamp", base)?;
            let target = SnapshotName::new(&filesystem, SnapshotSuffix::Incremental);
            return Ok(Self::Backup(BackupPlan {
                kind: BackupKind::Incremental,
                snapshot: target.clone(),
                send: SendSpec::Incremental {
                    base: SnapshotName::new(&filesystem, SnapshotSuffix::Full(base.to_string())),
                    target,
                },
            }));
        }
        Err(ValidationError::NoOperation)
    }
}

fn required_filesystem(req: &Request) -> Result<String, ValidationError> {
    let fs = req
        .filesystem
        .as_deref()
        .filter(|fs| !fs.is_empty())
        .ok_or(ValidationError::MissingFilesystem)?;
    // A leading dash would be read as an option by the engine binary.
    if fs.starts_with('-') || fs.contains(SNAPSHOT_DELIMITER) || fs.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFilesystem(fs.to_string()));
    }
    Ok(fs.to_string())
}
