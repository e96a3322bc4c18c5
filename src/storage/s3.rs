use super::{Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::TargetConfig;
use crate::core::headers::HeaderSet;
use crate::core::inventory::RemoteObject;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, EntryMode, Metakey, Operator};
use std::time::Duration;

pub struct S3Storage {
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(&config.bucket).region(&config.region);

        // 未显式配置时由 opendal 从标准 AWS 环境变量加载凭证
        if let (Some(ak), Some(sk)) = (&config.access_key, &config.secret_key) {
            builder = builder.access_key_id(ak).secret_access_key(sk);
        }

        if let Some(ref ep) = config.endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = config.prefix {
            builder = builder.root(p);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            config.bucket,
            config
                .prefix
                .as_deref()
                .map(|p| format!("/{}", p.trim_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn check(&self) -> Result<()> {
        self.operator.check().await?;
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();

        // lister 内部完成分页，任一页失败都会作为错误返回
        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::Mode | Metakey::Etag)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let meta = entry.metadata();
            if meta.mode() == EntryMode::DIR {
                continue;
            }

            let key = entry.path().trim_start_matches('/').to_string();
            if key.is_empty() || key.ends_with('/') {
                continue;
            }

            objects.push(RemoteObject {
                key,
                token: meta.etag().map(str::to_string),
            });
        }

        Ok(objects)
    }

    async fn put(&self, key: &str, data: Bytes, headers: &HeaderSet) -> Result<()> {
        let mut writer = self
            .operator
            .write_with(key, data)
            .cache_control(&headers.cache_control);

        if let Some(ref ct) = headers.content_type {
            writer = writer.content_type(ct);
        }

        // S3 不支持任意响应头，其余头只能作为 x-amz-meta-* 元数据保存
        if !headers.extra_headers.is_empty() {
            writer = writer.user_metadata(
                headers
                    .extra_headers
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.clone())),
            );
        }

        writer.await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 删除不存在的对象不会报错
        self.operator.delete(key).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
