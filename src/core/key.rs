//! 对象 key 规范化
//!
//! 本地路径统一转换为 POSIX 风格的相对路径，与宿主平台的路径分隔符无关。

use crate::error::{SyncError, SyncResult};
use std::path::{Component, Path};

/// 规范化一个相对路径字符串为远程 key
///
/// `\` 视为分隔符，空段与 `.` 段被丢弃，`..` 段被拒绝。
pub fn normalize_key(rel: &str) -> SyncResult<String> {
    let replaced = rel.replace('\\', "/");
    let mut segments = Vec::new();

    for segment in replaced.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(SyncError::InvalidKey {
                    key: rel.to_string(),
                    reason: "parent directory segment",
                })
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(SyncError::InvalidKey {
            key: rel.to_string(),
            reason: "empty key",
        });
    }

    Ok(segments.join("/"))
}

/// 去掉根目录前缀，把磁盘路径转换为 key
pub fn key_from_path(root: &Path, path: &Path) -> SyncResult<String> {
    let relative = path.strip_prefix(root).map_err(|_| SyncError::InvalidKey {
        key: path.to_string_lossy().into_owned(),
        reason: "path is outside the local root",
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(SyncError::InvalidKey {
                    key: relative.to_string_lossy().into_owned(),
                    reason: "unexpected path component",
                })
            }
        }
    }

    normalize_key(&parts.join("/"))
}

/// 拆分出最后一段的扩展名（包含点）
///
/// 文件名开头的点不算扩展名：`.htaccess` 没有扩展名。
pub fn split_extension(key: &str) -> (&str, &str) {
    let name_start = key.rfind('/').map_or(0, |i| i + 1);
    let name = &key[name_start..];
    let leading_dots = name.len() - name.trim_start_matches('.').len();

    match name[leading_dots..].rfind('.') {
        Some(i) => key.split_at(name_start + leading_dots + i),
        None => (key, ""),
    }
}

/// 旧版双编码布局中的 gzip 副本 key：`site.css` -> `site.gz.css`
pub fn gzip_variant_key(key: &str) -> String {
    let (stem, ext) = split_extension(key);
    format!("{}.gz{}", stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_normalize_nested() {
        assert_eq!(normalize_key("css/site.css").unwrap(), "css/site.css");
        assert_eq!(normalize_key("a/b/c/d.txt").unwrap(), "a/b/c/d.txt");
    }

    #[test]
    fn test_normalize_slashes() {
        assert_eq!(normalize_key("/index.html").unwrap(), "index.html");
        assert_eq!(normalize_key("blog/").unwrap(), "blog");
        assert_eq!(normalize_key("blog//post.html").unwrap(), "blog/post.html");
        assert_eq!(normalize_key("./img/./logo.png").unwrap(), "img/logo.png");
    }

    #[test]
    fn test_normalize_backslash() {
        assert_eq!(normalize_key("img\\icons\\a.png").unwrap(), "img/icons/a.png");
        assert_eq!(normalize_key("\\robots.txt").unwrap(), "robots.txt");
    }

    #[test]
    fn test_normalize_rejects() {
        assert!(matches!(
            normalize_key("a/../b"),
            Err(SyncError::InvalidKey { .. })
        ));
        assert!(normalize_key("").is_err());
        assert!(normalize_key("//").is_err());
    }

    #[test]
    fn test_key_from_path() {
        let root = PathBuf::from("/srv/build");
        let path = root.join("blog").join("index.html");
        assert_eq!(key_from_path(&root, &path).unwrap(), "blog/index.html");
        assert_eq!(
            key_from_path(&root, &root.join(".well-known").join("host-meta")).unwrap(),
            ".well-known/host-meta"
        );
        assert!(key_from_path(&root, Path::new("/etc/passwd")).is_err());
        assert!(key_from_path(&root, &root).is_err());
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("index.html"), ("index", ".html"));
        assert_eq!(split_extension("js/app.min.js"), ("js/app.min", ".js"));
        assert_eq!(split_extension("openid"), ("openid", ""));
        assert_eq!(split_extension(".htaccess"), (".htaccess", ""));
        assert_eq!(split_extension("v1.2/readme"), ("v1.2/readme", ""));
        assert_eq!(split_extension("dir/.hidden.txt"), ("dir/.hidden", ".txt"));
    }

    #[test]
    fn test_gzip_variant_key() {
        assert_eq!(gzip_variant_key("css/site.css"), "css/site.gz.css");
        assert_eq!(gzip_variant_key("index.html"), "index.gz.html");
        assert_eq!(gzip_variant_key("openid"), "openid.gz");
    }
}
