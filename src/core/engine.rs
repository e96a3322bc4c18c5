use crate::core::comparator::{compare_inventories, PlanSummary, SyncPlan};
use crate::core::headers::HeaderPolicy;
use crate::core::inventory::LocalInventory;
use crate::core::key::gzip_variant_key;
use crate::core::scanner::{fetch_remote_inventory, FileScanner, ScanConfig};
use crate::error::{SyncError, SyncResult};
use crate::storage::Storage;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 执行配置
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// 不删除孤儿对象
    pub no_delete: bool,
    /// 删除时顺带清理旧的 `.gz` 副本
    pub gzip_variant_cleanup: bool,
    /// 最大并发上传/删除数
    pub max_concurrent: usize,
    /// 只生成计划，不修改远程
    pub dry_run: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            no_delete: false,
            gzip_variant_cleanup: true,
            max_concurrent: 8,
            dry_run: false,
        }
    }
}

/// 一次部署的全部选项
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub overwrite_all: bool,
    pub executor: ExecutorOptions,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Upload,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Upload => write!(f, "upload"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// 单个 key 的操作失败
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFailure {
    pub key: String,
    pub operation: Operation,
    pub message: String,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub bucket: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub files_on_disk: usize,
    pub objects_in_store: usize,
    pub plan: PlanSummary,
    pub planned_uploads: usize,
    pub planned_deletes: usize,
    pub completed_uploads: usize,
    pub completed_deletes: usize,
    /// 因 no-delete 而保留的孤儿对象
    pub suppressed_deletes: usize,
    pub gzip_variants_removed: usize,
    pub bytes_uploaded: u64,
    pub failures: Vec<KeyFailure>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl SyncReport {
    pub fn new(bucket: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            bucket: bucket.to_string(),
            start_time,
            end_time: start_time,
            files_on_disk: 0,
            objects_in_store: 0,
            plan: PlanSummary::default(),
            planned_uploads: 0,
            planned_deletes: 0,
            completed_uploads: 0,
            completed_deletes: 0,
            suppressed_deletes: 0,
            gzip_variants_removed: 0,
            bytes_uploaded: 0,
            failures: Vec::new(),
            cancelled: false,
            dry_run: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// 已计划但因取消未执行的操作数
    pub fn skipped(&self) -> usize {
        let planned = self.planned_uploads
            + self.planned_deletes.saturating_sub(self.suppressed_deletes);
        let finished = self.completed_uploads + self.completed_deletes + self.failures.len();
        if self.dry_run {
            0
        } else {
            planned.saturating_sub(finished)
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Files on disk: {}", self.files_on_disk)?;
        writeln!(f, "Files in cloud: {}", self.objects_in_store)?;
        writeln!(
            f,
            "Uploading: {} ({} new, {} changed, {} forced, {} unverifiable)",
            self.planned_uploads,
            self.plan.new,
            self.plan.changed,
            self.plan.forced,
            self.plan.unverifiable
        )?;
        writeln!(f, "Deleting: {}", self.planned_deletes)?;
        if self.dry_run {
            writeln!(f, "Test run: nothing was changed")?;
        } else {
            writeln!(
                f,
                "Uploaded: {}/{}, deleted: {}/{}",
                self.completed_uploads,
                self.planned_uploads,
                self.completed_deletes,
                self.planned_deletes
            )?;
        }
        if self.suppressed_deletes > 0 {
            writeln!(f, "Kept {} orphans (no-delete)", self.suppressed_deletes)?;
        }
        if self.gzip_variants_removed > 0 {
            writeln!(f, "Removed {} legacy .gz copies", self.gzip_variants_removed)?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "\tFAILED {} {}: {}",
                failure.operation, failure.key, failure.message
            )?;
        }
        if self.cancelled {
            writeln!(f, "Cancelled, {} operations not started", self.skipped())?;
        }
        if self.is_success() {
            write!(f, "** Successfully deployed: {}!", self.bucket)
        } else {
            write!(f, "** Deploy FAILED: {}", self.bucket)
        }
    }
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    uploads_completed: AtomicU64,
    deletes_completed: AtomicU64,
    gzip_variants_removed: AtomicU64,
    bytes_uploaded: AtomicU64,
}

/// 同步执行器
pub struct SyncExecutor {
    storage: Arc<dyn Storage>,
    headers: Arc<HeaderPolicy>,
    options: ExecutorOptions,
    cancelled: Arc<AtomicBool>,
}

impl SyncExecutor {
    pub fn new(storage: Arc<dyn Storage>, headers: HeaderPolicy, options: ExecutorOptions) -> Self {
        Self {
            storage,
            headers: Arc::new(headers),
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 共享取消标志
    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 执行同步计划
    ///
    /// 取消后不再调度新操作，已开始的上传/删除会等待完成。
    pub async fn execute(
        &self,
        plan: &SyncPlan,
        local: &LocalInventory,
        report: &mut SyncReport,
    ) {
        report.plan = plan.summary();
        report.planned_uploads = plan.uploads.len();
        report.planned_deletes = plan.deletes.len();
        report.dry_run = self.options.dry_run;

        if self.options.no_delete {
            report.suppressed_deletes = plan.deletes.len();
        }

        if self.options.dry_run {
            for (key, reason) in &plan.uploads {
                info!("\t[test] upload {} ({:?})", key, reason);
            }
            for key in &plan.deletes {
                info!("\t[test] delete {}", key);
            }
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let stats = Arc::new(TransferStats::default());
        let failures = Arc::new(RwLock::new(Vec::<KeyFailure>::new()));
        let mut handles: Vec<(String, Operation, JoinHandle<()>)> = Vec::new();
        // 调度循环因取消而提前结束
        let mut interrupted = false;

        if !plan.uploads.is_empty() {
            info!("Uploading: {}", plan.uploads.len());
        }

        for key in plan.uploads.keys() {
            if self.is_cancelled() {
                interrupted = true;
                break;
            }

            let Some(file) = local.get(key) else {
                failures.write().await.push(KeyFailure {
                    key: key.clone(),
                    operation: Operation::Upload,
                    message: "not in local inventory".to_string(),
                });
                continue;
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            // 等待许可期间可能已收到取消
            if self.is_cancelled() {
                interrupted = true;
                break;
            }

            let storage = self.storage.clone();
            let headers = self.headers.clone();
            let stats = stats.clone();
            let failures = failures.clone();
            let task_key = key.clone();
            let path = file.path.clone();

            let handle = tokio::spawn(async move {
                match upload_one(storage.as_ref(), &headers, &task_key, &path).await {
                    Ok(bytes) => {
                        stats.uploads_completed.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
                    }
                    Err(e) => {
                        error!("上传失败: {} - {:#}", task_key, e);
                        failures.write().await.push(KeyFailure {
                            key: task_key,
                            operation: Operation::Upload,
                            message: format!("{:#}", e),
                        });
                    }
                }
                drop(permit);
            });
            handles.push((key.clone(), Operation::Upload, handle));
        }

        if !plan.deletes.is_empty() && !self.options.no_delete && !interrupted {
            info!("Deleting: {}", plan.deletes.len());

            // 远程列表中同时存在 `name.ext` 和 `name.gz.ext` 时，后者是旧的 gzip 副本
            let listed_variants: HashSet<String> = plan
                .deletes
                .iter()
                .map(|key| gzip_variant_key(key))
                .filter(|v| plan.deletes.contains(v))
                .collect();

            for key in &plan.deletes {
                if self.is_cancelled() {
                    interrupted = true;
                    break;
                }

                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                if self.is_cancelled() {
                    interrupted = true;
                    break;
                }

                let storage = self.storage.clone();
                let stats = stats.clone();
                let failures = failures.clone();
                let task_key = key.clone();
                let is_variant = listed_variants.contains(key);
                // 未出现在列表中的副本只做一次尽力删除，不计数
                let unlisted_variant = self
                    .options
                    .gzip_variant_cleanup
                    .then(|| gzip_variant_key(key))
                    .filter(|v| local.get(v).is_none() && !plan.deletes.contains(v));

                let handle = tokio::spawn(async move {
                    debug!("\t删除: {}", task_key);
                    match storage.delete(&task_key).await {
                        Ok(()) => {
                            stats.deletes_completed.fetch_add(1, Ordering::Relaxed);
                            if is_variant {
                                stats.gzip_variants_removed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            error!("删除失败: {} - {:#}", task_key, e);
                            failures.write().await.push(KeyFailure {
                                key: task_key.clone(),
                                operation: Operation::Delete,
                                message: format!("{:#}", e),
                            });
                        }
                    }

                    if let Some(variant) = unlisted_variant {
                        if let Err(e) = storage.delete(&variant).await {
                            debug!("忽略 gzip 副本删除失败: {} - {:#}", variant, e);
                        }
                    }
                    drop(permit);
                });
                handles.push((key.clone(), Operation::Delete, handle));
            }
        } else if self.options.no_delete && !plan.deletes.is_empty() {
            info!("保留 {} 个孤儿对象 (no-delete)", plan.deletes.len());
        }

        if interrupted {
            warn!("已取消，停止调度新的操作");
        }

        // 已开始的任务全部等待完成，不中途取消
        for (key, operation, handle) in handles {
            if let Err(e) = handle.await {
                error!("任务异常结束: {} {} - {}", operation, key, e);
                failures.write().await.push(KeyFailure {
                    key,
                    operation,
                    message: format!("task failed: {}", e),
                });
            }
        }

        report.completed_uploads = stats.uploads_completed.load(Ordering::Relaxed) as usize;
        report.completed_deletes = stats.deletes_completed.load(Ordering::Relaxed) as usize;
        report.gzip_variants_removed = stats.gzip_variants_removed.load(Ordering::Relaxed) as usize;
        report.bytes_uploaded = stats.bytes_uploaded.load(Ordering::Relaxed);
        report.cancelled = interrupted;

        let mut collected = failures.read().await.clone();
        collected.sort_by(|a, b| a.key.cmp(&b.key));
        report.failures = collected;
    }
}

/// 读取本地文件并一次写入内容与元数据
async fn upload_one(
    storage: &dyn Storage,
    headers: &HeaderPolicy,
    key: &str,
    path: &Path,
) -> anyhow::Result<u64> {
    let data = tokio::fs::read(path).await?;
    let size = data.len() as u64;
    let header_set = headers.resolve(key);
    debug!("\t上传: {} ({} 字节, {})", key, size, header_set.cache_control);

    storage.put(key, Bytes::from(data), &header_set).await?;
    Ok(size)
}

/// 部署构建目录到存储
///
/// 本地扫描与远程列表并发进行，两者都完整结束后才比较差异。
pub async fn deploy(
    storage: Arc<dyn Storage>,
    source_dir: &Path,
    headers: HeaderPolicy,
    options: DeployOptions,
    cancelled: Arc<AtomicBool>,
) -> SyncResult<SyncReport> {
    let bucket = storage.name().to_string();
    let mut report = SyncReport::new(&bucket, Utc::now());

    info!("*** Preparing to deploy in: {} (run {})", bucket, report.run_id);

    storage
        .check()
        .await
        .map_err(|e| SyncError::BucketNotFound {
            bucket: bucket.clone(),
            reason: format!("{:#}", e),
        })?;

    let scanner = FileScanner::new(options.scan.clone()).with_cancel(cancelled.clone());
    let (local, remote) = tokio::try_join!(
        scanner.scan_local(source_dir),
        fetch_remote_inventory(storage.as_ref()),
    )?;

    if cancelled.load(Ordering::SeqCst) {
        return Err(SyncError::Cancelled);
    }

    report.files_on_disk = local.len();
    report.objects_in_store = remote.len();
    info!("Files on disk: {}", local.len());
    info!("Files in cloud: {}", remote.len());

    let plan = compare_inventories(&local, &remote, options.overwrite_all);
    let summary = plan.summary();
    info!(
        "比较完成: 上传 {} (新 {}, 变更 {}, 强制 {}, 无法校验 {}), 删除 {}, 未变 {}",
        summary.uploads(),
        summary.new,
        summary.changed,
        summary.forced,
        summary.unverifiable,
        summary.deletes,
        summary.unchanged
    );

    SyncExecutor::new(storage, headers, options.executor)
        .with_cancel(cancelled)
        .execute(&plan, &local, &mut report)
        .await;

    report.end_time = Utc::now();

    if report.is_success() {
        info!("** Successfully deployed: {}!", bucket);
    } else {
        warn!(
            "** Deploy FAILED: {} ({} failures, cancelled={})",
            bucket,
            report.failures.len(),
            report.cancelled
        );
    }

    Ok(report)
}
