//! 同步引擎的致命错误
//!
//! 这些错误都会在任何远程写入之前终止本次部署；单个对象的上传/删除失败
//! 不属于这里，它们被收集进 [`crate::core::SyncReport`]。

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 目标存储桶不存在或无法访问
    #[error("cannot find bucket {bucket}: {reason}")]
    BucketNotFound { bucket: String, reason: String },

    /// 本地构建目录无法遍历
    #[error("cannot walk local root {}: {source}", path.display())]
    LocalRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 本地文件读取失败（不接受不完整的本地清单）
    #[error("cannot read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 两个不同的本地文件规范化成了同一个 key
    #[error("{} and {} both map to key {key}", first.display(), second.display())]
    DuplicateKey {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// 远程列表不完整或失败
    #[error("listing {bucket} failed: {source}")]
    RemoteListing {
        bucket: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
