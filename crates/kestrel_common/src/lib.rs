//! Shared foundation for the kestrel admission engine: identifier types,
//! the error taxonomy, and configuration sections.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DriverConfig, GroupLimits};
pub use error::{ErrorKind, KestrelError, KestrelResult};
pub use types::{QueryId, ResourceGroupId};
