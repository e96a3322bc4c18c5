pub mod comparator;
pub mod engine;
pub mod headers;
pub mod inventory;
pub mod key;
pub mod scanner;

pub use comparator::{compare_inventories, PlanSummary, SyncPlan, UploadReason};
pub use engine::{
    deploy, DeployOptions, ExecutorOptions, KeyFailure, Operation, SyncExecutor, SyncReport,
};
pub use headers::{CachePolicy, HeaderPolicy, HeaderSet};
pub use inventory::{
    ComparisonToken, ContentHash, LocalFile, LocalInventory, RemoteInventory, RemoteObject,
};
pub use key::{gzip_variant_key, key_from_path, normalize_key, split_extension};
pub use scanner::{fetch_remote_inventory, FileScanner, ScanConfig};
