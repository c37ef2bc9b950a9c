//! Snapshot naming convention shared by the agent and its coordinator.
//!
//! Every snapshot the agent creates or destroys carries one of three
//! suffixes:
//!
//! | kind        | suffix               |
//! |-------------|----------------------|
//! | full        | `__zb_full_<digits>` |
//! | incremental | `__zb_incr`          |
//! | dataset     | `__zb_dset_<stamp>`  |
//!
//! Destructive operations only accept the digit-only forms, so a request
//! can never be turned into an arbitrary `zfs destroy`.

use crate::error::ValidationError;
use std::fmt;

pub const SNAPSHOT_DELIMITER: char = '@';
pub const FULL_PREFIX: &str = "__zb_full_";
pub const INCREMENTAL_SUFFIX: &str = "__zb_incr";
pub const DATASET_PREFIX: &str = "__zb_dset_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSuffix {
    Full(String),
    Incremental,
    Dataset(String),
}

impl SnapshotSuffix {
    pub fn full(timestamp: &str) -> Result<Self, ValidationError> {
        ensure_numeric("timestamp", timestamp)?;
        Ok(Self::Full(timestamp.to_string()))
    }

    /// Dataset stamps are not required to be numeric, only to be a single
    /// snapshot name component.
    pub fn dataset(stamp: &str) -> Result<Self, ValidationError> {
        ensure_component("dataset timestamp", stamp)?;
        Ok(Self::Dataset(stamp.to_string()))
    }

    /// Parses a suffix for deletion. Only the sanctioned grammar passes.
    pub fn parse_sanctioned(suffix: &str) -> Result<Self, ValidationError> {
        if suffix == INCREMENTAL_SUFFIX {
            return Ok(Self::Incremental);
        }
        if let Some(digits) = suffix.strip_prefix(FULL_PREFIX) {
            if is_numeric(digits) {
                return Ok(Self::Full(digits.to_string()));
            }
        }
        if let Some(digits) = suffix.strip_prefix(DATASET_PREFIX) {
            if is_numeric(digits) {
                return Ok(Self::Dataset(digits.to_string()));
            }
        }
        Err(ValidationError::UnsanctionedSnapshot(suffix.to_string()))
    }
}

impl fmt::Display for SnapshotSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(ts) => write!(f, "{FULL_PREFIX}{ts}"),
            Self::Incremental => f.write_str(INCREMENTAL_SUFFIX),
            Self::Dataset(ts) => write!(f, "{DATASET_PREFIX}{ts}"),
        }
    }
}

/// A fully qualified `<filesystem>@<suffix>` name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotName {
    pub filesystem: String,
    pub suffix: SnapshotSuffix,
}

impl SnapshotName {
    pub fn new(filesystem: &str, suffix: SnapshotSuffix) -> Self {
        Self {
            filesystem: filesystem.to_string(),
            suffix,
        }
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.filesystem, SNAPSHOT_DELIMITER, self.suffix)
    }
}

pub fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

pub fn ensure_numeric(what: &'static str, value: &str) -> Result<(), ValidationError> {
    if is_numeric(value) {
        Ok(())
    } else {
        Err(ValidationError::NotNumeric {
            what,
            value: value.to_string(),
        })
    }
}

fn ensure_component(what: &'static str, value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidComponent {
            what,
            value: value.to_string(),
        })
    }
}
