//! 站点部署配置模块

use crate::core::headers::CachePolicy;
use crate::logging::LogConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件名（位于工作目录）
pub const DEFAULT_CONFIG_FILE: &str = ".site-config.json";

/// 部署目标（一个存储桶）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl TargetConfig {
    pub fn for_bucket(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: default_region(),
            endpoint: None,
            prefix: None,
            access_key: None,
            secret_key: None,
        }
    }
}

/// 同步执行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    /// 最大并发上传/删除数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 删除孤儿对象时顺带删除旧的 `.gz` 副本
    #[serde(default = "default_true")]
    pub cleanup_gzip_variants: bool,
    /// 扫描本地目录时排除的文件（glob）
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_exclude_patterns() -> Vec<String> {
    vec!["*~".to_string()]
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            cleanup_gzip_variants: default_true(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

/// 配置文件整体结构
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// 已构建站点的目录
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// 环境名 -> 部署目标，例如 staging / prod
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
    #[serde(default)]
    pub cache: CachePolicy,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".app_frozen")
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            targets: BTreeMap::new(),
            cache: CachePolicy::default(),
            deploy: DeployConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl SiteConfig {
    /// 从配置文件加载；文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("配置文件不存在，使用默认配置: {:?}", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 按环境名查找部署目标
    pub fn target(&self, env: &str) -> Result<&TargetConfig> {
        self.targets.get(env).ok_or_else(|| {
            let known: Vec<_> = self.targets.keys().map(String::as_str).collect();
            anyhow::anyhow!("unknown target {:?} (configured: {:?})", env, known)
        })
    }
}
