use crate::core::inventory::{ContentHash, LocalFile, LocalInventory, RemoteInventory};
use crate::core::key::key_from_path;
use crate::error::{SyncError, SyncResult};
use crate::storage::Storage;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use walkdir::WalkDir;

const HASH_BUFFER_SIZE: usize = 256 * 1024;

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob patterns），同时匹配 key 和文件名
    pub exclude_patterns: Vec<String>,
    /// 并发计算 hash 的文件数
    pub max_concurrent: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            // 编辑器备份文件
            exclude_patterns: vec!["*~".to_string()],
            max_concurrent: 8,
        }
    }
}

/// 本地清单构建器
#[derive(Clone)]
pub struct FileScanner {
    config: ScanConfig,
    excludes: Vec<Regex>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        let excludes = config
            .exclude_patterns
            .iter()
            .filter_map(|p| match glob_to_regex(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("忽略无效的排除规则 {:?}: {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            config,
            excludes,
            cancel_flag: None,
        }
    }

    /// 创建带取消标志的扫描器
    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 检查 key 是否应该被排除
    fn should_exclude(&self, key: &str) -> bool {
        let name = key.rsplit('/').next().unwrap_or(key);
        self.excludes
            .iter()
            .any(|re| re.is_match(key) || re.is_match(name))
    }

    /// 遍历根目录，返回 key -> 源路径
    ///
    /// 任何遍历错误都会终止扫描，两个路径映射到同一个 key 也是错误。
    fn walk(&self, root: &Path) -> SyncResult<BTreeMap<String, PathBuf>> {
        let mut paths: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut excluded = 0usize;

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                SyncError::LocalRoot {
                    path,
                    source: e.into(),
                }
            })?;

            if entry.file_type().is_symlink() {
                // 符号链接指向的文件也算普通文件；失效的链接与不可读文件一样终止扫描
                let target = std::fs::metadata(entry.path()).map_err(|source| {
                    SyncError::ReadFile {
                        path: entry.path().to_path_buf(),
                        source,
                    }
                })?;
                if !target.is_file() {
                    continue;
                }
            } else if !entry.file_type().is_file() {
                continue;
            }

            let key = key_from_path(root, entry.path())?;
            if self.should_exclude(&key) {
                debug!("排除文件: {}", key);
                excluded += 1;
                continue;
            }

            if let Some(first) = paths.get(&key) {
                return Err(SyncError::DuplicateKey {
                    key,
                    first: first.clone(),
                    second: entry.path().to_path_buf(),
                });
            }
            paths.insert(key, entry.into_path());
        }

        debug!("遍历完成: {} 个文件, {} 个被排除", paths.len(), excluded);
        Ok(paths)
    }

    /// 扫描构建目录，计算每个文件的 hash
    pub async fn scan_local(&self, root: &Path) -> SyncResult<LocalInventory> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!("开始扫描本地目录: {}", root.display());

        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|source| SyncError::LocalRoot {
                path: root.to_path_buf(),
                source,
            })?;
        if !metadata.is_dir() {
            return Err(SyncError::LocalRoot {
                path: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }

        // walkdir 是同步的，放到阻塞线程池
        let root_buf = root.to_path_buf();
        let walker = self.clone();
        let paths = tokio::task::spawn_blocking(move || walker.walk(&root_buf))
            .await
            .map_err(|e| SyncError::LocalRoot {
                path: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })??;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(paths.len());

        for (key, path) in paths {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Cancelled)?;

            let handle = tokio::task::spawn_blocking(move || {
                let result = hash_file(&path).map(|(hash, size)| LocalFile {
                    key,
                    path: path.clone(),
                    hash,
                    size,
                });
                drop(permit);
                result.map_err(|source| SyncError::ReadFile { path, source })
            });
            handles.push(handle);
        }

        let mut inventory = LocalInventory::new(root);
        for handle in handles {
            let file = handle.await.map_err(|e| SyncError::LocalRoot {
                path: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })??;
            inventory.files.insert(file.key.clone(), file);
        }

        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!(
            "本地扫描完成: {} 个文件, {} 字节",
            inventory.len(),
            inventory.total_bytes()
        );
        Ok(inventory)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

/// 流式计算文件 MD5
fn hash_file(path: &Path) -> std::io::Result<(ContentHash, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
        size += n as u64;
    }

    Ok((ContentHash::new(context.compute().0), size))
}

/// 简单 glob 转正则：`**/` 匹配任意层目录，`*` 不跨越 `/`，`?` 匹配单个字符
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    let mut rest = pattern;

    while let Some(c) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix("**/") {
            re.push_str("(?:.*/)?");
            rest = tail;
            continue;
        }
        if let Some(tail) = rest.strip_prefix("**") {
            re.push_str(".*");
            rest = tail;
            continue;
        }
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        rest = &rest[c.len_utf8()..];
    }

    re.push('$');
    Regex::new(&re)
}

/// 拉取远程清单
///
/// 列表必须完整，任何错误都是致命的：缺失的尾部会被误判为需要删除。
pub async fn fetch_remote_inventory(storage: &dyn Storage) -> SyncResult<RemoteInventory> {
    info!("开始获取远程对象列表: {}", storage.name());

    let objects = storage
        .list_objects()
        .await
        .map_err(|source| SyncError::RemoteListing {
            bucket: storage.name().to_string(),
            source,
        })?;

    let inventory: RemoteInventory = objects
        .into_iter()
        .filter(|o| !o.key.is_empty() && !o.key.ends_with('/'))
        .collect();

    info!("远程对象: {} 个", inventory.len());
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &[u8]) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_nested_and_dotfiles() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.html", b"<html></html>");
        write(&dir, "css/site.css", b"body{}");
        write(&dir, "a/b/c/deep.txt", b"deep");
        write(&dir, ".well-known/host-meta", b"<XRD/>");
        write(&dir, ".htaccess", b"deny");

        let inventory = FileScanner::default().scan_local(dir.path()).await.unwrap();
        let keys: Vec<_> = inventory.files.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                ".htaccess",
                ".well-known/host-meta",
                "a/b/c/deep.txt",
                "css/site.css",
                "index.html"
            ]
        );

        let css = inventory.get("css/site.css").unwrap();
        assert_eq!(css.hash, ContentHash::of(b"body{}"));
        assert_eq!(css.size, 6);
    }

    #[tokio::test]
    async fn test_scan_skips_backup_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.html", b"x");
        write(&dir, "index.html~", b"old");
        write(&dir, "blog/post.md~", b"old");

        let inventory = FileScanner::default().scan_local(dir.path()).await.unwrap();
        assert_eq!(inventory.len(), 1);
        assert!(inventory.get("index.html").is_some());
    }

    #[tokio::test]
    async fn test_scan_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = FileScanner::default().scan_local(&missing).await.unwrap_err();
        assert!(matches!(err, SyncError::LocalRoot { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_duplicate_keys_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir, "img/a.png", b"1");
        // Unix 上反斜杠是合法文件名字符，规范化后与 img/a.png 冲突
        write(&dir, "img\\a.png", b"2");

        let err = FileScanner::default().scan_local(dir.path()).await.unwrap_err();
        match err {
            SyncError::DuplicateKey { key, .. } => assert_eq!(key, "img/a.png"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_symlinks() {
        let dir = TempDir::new().unwrap();
        write(&dir, "real.txt", b"real");
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let inventory = FileScanner::default().scan_local(dir.path()).await.unwrap();
        assert_eq!(inventory.len(), 2);
        assert_eq!(
            inventory.get("link.txt").unwrap().hash,
            ContentHash::of(b"real")
        );

        std::os::unix::fs::symlink(dir.path().join("missing.txt"), dir.path().join("broken.txt"))
            .unwrap();
        let err = FileScanner::default().scan_local(dir.path()).await.unwrap_err();
        match err {
            SyncError::ReadFile { path, .. } => assert!(path.ends_with("broken.txt")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_scan_cancelled() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", b"a");
        let flag = Arc::new(AtomicBool::new(true));
        let err = FileScanner::default()
            .with_cancel(flag)
            .scan_local(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[test]
    fn test_glob_patterns() {
        let re = glob_to_regex("*~").unwrap();
        assert!(re.is_match("index.html~"));
        assert!(!re.is_match("index.html"));

        let re = glob_to_regex("drafts/**").unwrap();
        assert!(re.is_match("drafts/a/b.html"));
        assert!(!re.is_match("posts/a.html"));

        let re = glob_to_regex("**/*.map").unwrap();
        assert!(re.is_match("app.js.map"));
        assert!(re.is_match("js/app.js.map"));
        assert!(!re.is_match("js/app.js"));
    }

    #[tokio::test]
    async fn test_custom_excludes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "js/app.js", b"1");
        write(&dir, "js/app.js.map", b"2");
        let scanner = FileScanner::new(ScanConfig {
            exclude_patterns: vec!["*~".to_string(), "**/*.map".to_string()],
            max_concurrent: 2,
        });
        let inventory = scanner.scan_local(dir.path()).await.unwrap();
        assert_eq!(inventory.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_remote_inventory() {
        let store = MemoryStorage::new("site");
        store.insert("a.txt", "a").await;
        store.insert("dir/", "").await;

        let remote = fetch_remote_inventory(&store).await.unwrap();
        assert_eq!(remote.len(), 1);
        assert!(remote.get("a.txt").is_some());

        let missing = MemoryStorage::missing("gone");
        let err = fetch_remote_inventory(&missing).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteListing { .. }));
    }
}
