//! 本地与远程清单

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// 文件内容的 MD5 摘要
///
/// 单次上传的 S3 对象 ETag 就是内容 MD5，所以这里沿用 MD5，仅用于比较。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn of(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 构建目录中的一个文件
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub key: String,
    /// 磁盘上的源文件
    pub path: PathBuf,
    pub hash: ContentHash,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct LocalInventory {
    pub root: PathBuf,
    pub files: BTreeMap<String, LocalFile>,
}

impl LocalInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&LocalFile> {
        self.files.get(key)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }
}

/// 存储返回的比较令牌（解码后）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonToken {
    /// 32 位十六进制 MD5（小写）
    Digest(String),
    /// 无法与本地摘要比较的令牌，例如分段上传的 `hex-N`
    Opaque(String),
}

impl ComparisonToken {
    /// 解析 ETag 风格的令牌：去掉空白、`W/` 前缀和引号
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let unweak = trimmed.strip_prefix("W/").unwrap_or(trimmed);
        let unquoted = unweak.trim_matches('"');

        if unquoted.len() == 32 && unquoted.bytes().all(|b| b.is_ascii_hexdigit()) {
            ComparisonToken::Digest(unquoted.to_ascii_lowercase())
        } else {
            ComparisonToken::Opaque(raw.to_string())
        }
    }

    /// 令牌是否证明远程内容与本地摘要一致
    pub fn matches(&self, hash: &ContentHash) -> bool {
        match self {
            ComparisonToken::Digest(hex) => *hex == hash.to_hex(),
            ComparisonToken::Opaque(_) => false,
        }
    }
}

/// 远程存储中的一个对象
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    /// 原始比较令牌（例如带引号的 ETag），存储不提供时为 None
    pub token: Option<String>,
}

impl RemoteObject {
    pub fn comparison_token(&self) -> ComparisonToken {
        match &self.token {
            Some(raw) => ComparisonToken::parse(raw),
            None => ComparisonToken::Opaque(String::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoteInventory {
    pub objects: BTreeMap<String, RemoteObject>,
}

impl RemoteInventory {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&RemoteObject> {
        self.objects.get(key)
    }

    pub fn insert(&mut self, object: RemoteObject) {
        self.objects.insert(object.key.clone(), object);
    }
}

impl FromIterator<RemoteObject> for RemoteInventory {
    fn from_iter<I: IntoIterator<Item = RemoteObject>>(iter: I) -> Self {
        let mut inventory = RemoteInventory::default();
        for object in iter {
            inventory.insert(object);
        }
        inventory
    }
}
