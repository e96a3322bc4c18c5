pub mod memory;
pub mod s3;

use crate::config::TargetConfig;
use crate::core::headers::HeaderSet;
use crate::core::inventory::RemoteObject;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 部署目标存储接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 确认存储桶存在且可访问
    async fn check(&self) -> Result<()>;

    /// 列出全部对象及其比较令牌
    ///
    /// 必须返回完整列表；分页中途失败时返回错误，而不是截断的结果。
    async fn list_objects(&self) -> Result<Vec<RemoteObject>>;

    /// 一次调用写入内容和元数据
    async fn put(&self, key: &str, data: Bytes, headers: &HeaderSet) -> Result<()>;

    /// 删除对象；对象不存在不算错误
    async fn delete(&self, key: &str) -> Result<()>;

    /// 存储名称（用于日志和报告）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub fn create_storage(config: &TargetConfig) -> Result<Arc<dyn Storage>> {
    tracing::info!(
        "初始化S3存储: bucket={}, region={}",
        config.bucket,
        config.region
    );
    Ok(Arc::new(S3Storage::new(config)?) as Arc<dyn Storage>)
}
