//! 响应头策略 - 根据扩展名决定缓存时间、内容类型和安全头

use crate::core::key::split_extension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ONE_DAY: u64 = 86_400;

/// 缓存时间配置（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    /// 未识别扩展名使用的缓存时间
    #[serde(default = "default_max_age")]
    pub default_max_age: u64,
    /// 扩展名（带点）到缓存时间的映射
    #[serde(default = "default_by_extension")]
    pub by_extension: BTreeMap<String, u64>,
}

fn default_max_age() -> u64 {
    3600
}

fn default_by_extension() -> BTreeMap<String, u64> {
    [
        (".png", ONE_DAY * 7),
        (".jpg", ONE_DAY * 7),
        (".ico", ONE_DAY * 7),
        (".js", ONE_DAY),
        (".css", ONE_DAY),
        (".html", 300),
        (".txt", 3600),
    ]
    .into_iter()
    .map(|(ext, secs)| (ext.to_string(), secs))
    .collect()
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            default_max_age: default_max_age(),
            by_extension: default_by_extension(),
        }
    }
}

impl CachePolicy {
    /// 查找扩展名的缓存时间，大小写不敏感
    pub fn max_age(&self, ext: &str) -> u64 {
        let ext = ext.to_ascii_lowercase();
        self.by_extension
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == ext)
            .map(|(_, v)| *v)
            .unwrap_or(self.default_max_age)
    }
}

/// 上传对象时附带的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    pub cache_control: String,
    pub content_type: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
}

impl HeaderSet {
    /// 按 HTTP 头名遍历全部头
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        std::iter::once(("Cache-Control", self.cache_control.as_str()))
            .chain(self.content_type.as_deref().map(|ct| ("Content-Type", ct)))
            .chain(
                self.extra_headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// HTML 页面固定附带的安全头
pub const HARDENING_HEADERS: [(&str, &str); 3] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "SAMEORIGIN"),
    ("X-XSS-Protection", "1; mode=block"),
];

const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";
const XRDS_CONTENT_TYPE: &str = "application/xrds+xml; charset=UTF-8";
const HOST_META_CONTENT_TYPE: &str = "application/host-meta; charset=UTF-8";

#[derive(Debug, Clone, Default)]
pub struct HeaderPolicy {
    cache: CachePolicy,
}

impl HeaderPolicy {
    pub fn new(cache: CachePolicy) -> Self {
        Self { cache }
    }

    /// 计算某个 key 的响应头
    pub fn resolve(&self, key: &str) -> HeaderSet {
        let (_, ext) = split_extension(key);
        let ext_lower = ext.to_ascii_lowercase();

        let mut headers = HeaderSet {
            cache_control: format!("public, max-age={}", self.cache.max_age(ext)),
            content_type: guess_content_type(&ext_lower).map(str::to_string),
            extra_headers: BTreeMap::new(),
        };

        if ext_lower == ".html" {
            headers.content_type = Some(HTML_CONTENT_TYPE.to_string());
            for (name, value) in HARDENING_HEADERS {
                headers
                    .extra_headers
                    .insert(name.to_string(), value.to_string());
            }
        }

        // OpenID / WebFinger 发现文件没有扩展名，需要显式内容类型
        if key.ends_with("openid") {
            headers.content_type = Some(XRDS_CONTENT_TYPE.to_string());
        }
        if key.ends_with("host-meta") {
            headers.content_type = Some(HOST_META_CONTENT_TYPE.to_string());
        }

        headers
    }
}

/// 常见静态资源的内容类型，避免 S3 回退到 binary/octet-stream
fn guess_content_type(ext: &str) -> Option<&'static str> {
    let ct = match ext {
        ".css" => "text/css; charset=UTF-8",
        ".js" => "application/javascript; charset=UTF-8",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".ico" => "image/x-icon",
        ".txt" => "text/plain; charset=UTF-8",
        ".svg" => "image/svg+xml",
        ".json" => "application/json",
        ".xml" => "application/xml",
        _ => return None,
    };
    Some(ct)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> HeaderPolicy {
        HeaderPolicy::new(CachePolicy::default())
    }

    #[test]
    fn test_html_headers() {
        let headers = policy().resolve("index.html");
        assert_eq!(headers.cache_control, "public, max-age=300");
        assert_eq!(headers.get("content-type"), Some(HTML_CONTENT_TYPE));
        for (name, value) in HARDENING_HEADERS {
            assert_eq!(headers.get(name), Some(value));
        }
    }

    #[test]
    fn test_png_has_no_hardening() {
        let headers = policy().resolve("img/logo.png");
        assert_eq!(headers.cache_control, format!("public, max-age={}", ONE_DAY * 7));
        assert!(headers.extra_headers.is_empty());
        assert_eq!(headers.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_unknown_extension_uses_default() {
        let mut cache = CachePolicy::default();
        cache.default_max_age = 42;
        let headers = HeaderPolicy::new(cache).resolve("fonts/a.woff2");
        assert_eq!(headers.cache_control, "public, max-age=42");
        assert_eq!(headers.content_type, None);
    }

    #[test]
    fn test_extension_lookup_ignores_case() {
        let headers = policy().resolve("PAGE.HTML");
        assert_eq!(headers.cache_control, "public, max-age=300");
        assert_eq!(headers.extra_headers.len(), 3);
    }

    #[test]
    fn test_discovery_files() {
        let openid = policy().resolve("openid");
        assert_eq!(openid.content_type.as_deref(), Some(XRDS_CONTENT_TYPE));
        assert_eq!(openid.cache_control, "public, max-age=3600");

        let host_meta = policy().resolve(".well-known/host-meta");
        assert_eq!(host_meta.content_type.as_deref(), Some(HOST_META_CONTENT_TYPE));
        assert!(host_meta.extra_headers.is_empty());
    }

    #[test]
    fn test_iter_order() {
        let headers = policy().resolve("index.html");
        let names: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names[0], "Cache-Control");
        assert_eq!(names[1], "Content-Type");
        assert_eq!(names.len(), 5);
    }
}
