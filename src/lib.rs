pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{SiteConfig, TargetConfig};
pub use crate::core::{deploy, DeployOptions, SyncPlan, SyncReport};
pub use error::{SyncError, SyncResult};
pub use storage::{create_storage, Storage};
