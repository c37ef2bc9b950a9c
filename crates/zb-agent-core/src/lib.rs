pub mod config;
pub mod error;
pub mod listing;
pub mod operation;
pub mod snapshot;

pub use config::{Config, ConfigError};
pub use error::ValidationError;
pub use operation::{Operation, Request};
pub use snapshot::{SnapshotName, SnapshotSuffix};
