//! 内存存储 - 进程内的对象存储实现
//!
//! ETag 与 S3 单次上传一致（带引号的 MD5），可以指定某些 key 的操作失败。

use super::Storage;
use crate::core::headers::HeaderSet;
use crate::core::inventory::{ContentHash, RemoteObject};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

/// 内存中的一个对象
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub headers: HeaderSet,
}

pub struct MemoryStorage {
    name: String,
    exists: bool,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failing_keys: RwLock<HashSet<String>>,
    put_count: RwLock<usize>,
}

impl MemoryStorage {
    pub fn new(bucket: &str) -> Self {
        Self {
            name: format!("memory://{}", bucket),
            exists: true,
            objects: RwLock::new(BTreeMap::new()),
            failing_keys: RwLock::new(HashSet::new()),
            put_count: RwLock::new(0),
        }
    }

    /// 一个不存在的存储桶，`check` 总是失败
    pub fn missing(bucket: &str) -> Self {
        Self {
            exists: false,
            ..Self::new(bucket)
        }
    }

    /// 预置对象，ETag 按内容计算
    pub async fn insert(&self, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let etag = format!("\"{}\"", ContentHash::of(&data).to_hex());
        self.insert_with_etag(key, data, &etag).await;
    }

    /// 预置对象并指定原始 ETag（例如分段上传格式）
    pub async fn insert_with_etag(&self, key: &str, data: impl Into<Bytes>, etag: &str) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                etag: etag.to_string(),
                headers: HeaderSet::default(),
            },
        );
    }

    /// 让某个 key 的 put/delete 失败
    pub async fn fail_key(&self, key: &str) {
        self.failing_keys.write().await.insert(key.to_string());
    }

    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// 累计成功的 put 次数
    pub async fn put_count(&self) -> usize {
        *self.put_count.read().await
    }

    async fn ensure_ok(&self, key: &str) -> Result<()> {
        if self.failing_keys.read().await.contains(key) {
            anyhow::bail!("injected failure for {}", key);
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn check(&self) -> Result<()> {
        if !self.exists {
            anyhow::bail!("NoSuchBucket");
        }
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<RemoteObject>> {
        self.check().await?;
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .map(|(key, obj)| RemoteObject {
                key: key.clone(),
                token: Some(obj.etag.clone()),
            })
            .collect())
    }

    async fn put(&self, key: &str, data: Bytes, headers: &HeaderSet) -> Result<()> {
        self.ensure_ok(key).await?;
        let etag = format!("\"{}\"", ContentHash::of(&data).to_hex());
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                etag,
                headers: headers.clone(),
            },
        );
        *self.put_count.write().await += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_ok(key).await?;
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
