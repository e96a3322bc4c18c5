use crate::core::inventory::{ComparisonToken, LocalInventory, RemoteInventory};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// 需要上传的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadReason {
    /// 远程不存在
    New,
    /// 内容 hash 与远程令牌不一致
    Changed,
    /// 内容一致，但要求覆盖全部
    Forced,
    /// 远程令牌无法与本地 hash 比较（例如分段上传的 ETag）
    Unverifiable,
}

/// 一次运行的同步计划
///
/// uploads 与 deletes 不相交：deletes 只包含本地不存在的 key。
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub uploads: BTreeMap<String, UploadReason>,
    pub deletes: BTreeSet<String>,
    /// 两边一致、不做任何操作的 key 数量
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn upload_keys(&self) -> impl Iterator<Item = &str> {
        self.uploads.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.deletes.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            deletes: self.deletes.len(),
            unchanged: self.unchanged,
            ..Default::default()
        };
        for reason in self.uploads.values() {
            match reason {
                UploadReason::New => summary.new += 1,
                UploadReason::Changed => summary.changed += 1,
                UploadReason::Forced => summary.forced += 1,
                UploadReason::Unverifiable => summary.unverifiable += 1,
            }
        }
        summary
    }
}

/// 计划统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub new: usize,
    pub changed: usize,
    pub forced: usize,
    pub unverifiable: usize,
    pub deletes: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn uploads(&self) -> usize {
        self.new + self.changed + self.forced + self.unverifiable
    }
}

/// 比较本地与远程清单，生成同步计划
pub fn compare_inventories(
    local: &LocalInventory,
    remote: &RemoteInventory,
    overwrite_all: bool,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (key, file) in &local.files {
        let reason = match remote.get(key) {
            None => Some(UploadReason::New),
            Some(object) => {
                let token = object.comparison_token();
                if token.matches(&file.hash) {
                    overwrite_all.then_some(UploadReason::Forced)
                } else if matches!(token, ComparisonToken::Opaque(_)) {
                    debug!("远程令牌无法比较，重新上传: {} ({:?})", key, object.token);
                    Some(UploadReason::Unverifiable)
                } else {
                    Some(UploadReason::Changed)
                }
            }
        };

        match reason {
            Some(reason) => {
                plan.uploads.insert(key.clone(), reason);
            }
            None => plan.unchanged += 1,
        }
    }

    plan.deletes = remote
        .objects
        .keys()
        .filter(|key| local.get(key).is_none())
        .cloned()
        .collect();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inventory::{ContentHash, LocalFile, RemoteObject};
    use std::path::PathBuf;

    fn local(files: &[(&str, &str)]) -> LocalInventory {
        let mut inventory = LocalInventory::new("/build");
        for (key, content) in files {
            inventory.files.insert(
                key.to_string(),
                LocalFile {
                    key: key.to_string(),
                    path: PathBuf::from("/build").join(key),
                    hash: ContentHash::of(content.as_bytes()),
                    size: content.len() as u64,
                },
            );
        }
        inventory
    }

    fn remote(objects: &[(&str, &str)]) -> RemoteInventory {
        objects
            .iter()
            .map(|(key, content)| RemoteObject {
                key: key.to_string(),
                token: Some(format!("\"{}\"", ContentHash::of(content.as_bytes()).to_hex())),
            })
            .collect()
    }

    fn keys<'a>(iter: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
        iter.collect()
    }

    #[test]
    fn test_new_changed_orphaned() {
        let l = local(&[("a.txt", "H1"), ("b.txt", "H2")]);
        let r = remote(&[("b.txt", "H2-old"), ("c.txt", "H3")]);

        let plan = compare_inventories(&l, &r, false);
        assert_eq!(keys(plan.upload_keys()), vec!["a.txt", "b.txt"]);
        assert_eq!(plan.uploads["a.txt"], UploadReason::New);
        assert_eq!(plan.uploads["b.txt"], UploadReason::Changed);
        assert_eq!(
            plan.deletes.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["c.txt"]
        );
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn test_matching_hash_untouched() {
        let l = local(&[("index.html", "same")]);
        let r = remote(&[("index.html", "same")]);

        let plan = compare_inventories(&l, &r, false);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_overwrite_all() {
        let l = local(&[("a.txt", "1"), ("b.txt", "2")]);
        let r = remote(&[("a.txt", "1"), ("old.js", "x")]);

        let plan = compare_inventories(&l, &r, true);
        assert_eq!(keys(plan.upload_keys()), vec!["a.txt", "b.txt"]);
        assert_eq!(plan.uploads["a.txt"], UploadReason::Forced);
        assert_eq!(plan.uploads["b.txt"], UploadReason::New);
        // 覆盖全部不会把仅远程存在的 key 加入上传
        assert!(!plan.uploads.contains_key("old.js"));
        assert!(plan.deletes.contains("old.js"));
    }

    #[test]
    fn test_multipart_etag_is_unverifiable() {
        let l = local(&[("video.mp4", "big")]);
        let r: RemoteInventory = [RemoteObject {
            key: "video.mp4".to_string(),
            token: Some("\"0123456789abcdef0123456789abcdef-4\"".to_string()),
        }]
        .into_iter()
        .collect();

        let plan = compare_inventories(&l, &r, false);
        assert_eq!(plan.uploads["video.mp4"], UploadReason::Unverifiable);
        assert_eq!(plan.summary().unverifiable, 1);
    }

    #[test]
    fn test_unquoted_hex_token_matches() {
        let l = local(&[("a.css", "body{}")]);
        let r: RemoteInventory = [RemoteObject {
            key: "a.css".to_string(),
            token: Some(ContentHash::of(b"body{}").to_hex()),
        }]
        .into_iter()
        .collect();

        assert!(compare_inventories(&l, &r, false).is_empty());
    }

    #[test]
    fn test_set_properties() {
        // uploads ⊇ L − R，deletes == R − L，两者不相交
        let l = local(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        let r = remote(&[("c", "3"), ("d", "changed"), ("e", "5"), ("f", "6")]);

        for overwrite_all in [false, true] {
            let plan = compare_inventories(&l, &r, overwrite_all);
            for key in ["a", "b"] {
                assert!(plan.uploads.contains_key(key));
            }
            let expected: BTreeSet<String> = ["e", "f"].iter().map(|s| s.to_string()).collect();
            assert_eq!(plan.deletes, expected);
            assert!(plan.deletes.iter().all(|k| !plan.uploads.contains_key(k)));
            if overwrite_all {
                assert_eq!(plan.uploads.len(), l.len());
            }
        }
    }

    #[test]
    fn test_summary() {
        let l = local(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let r = remote(&[("b", "x"), ("c", "3"), ("z", "9")]);
        let summary = compare_inventories(&l, &r, false).summary();
        assert_eq!(
            summary,
            PlanSummary {
                new: 1,
                changed: 1,
                forced: 0,
                unverifiable: 0,
                deletes: 1,
                unchanged: 1,
            }
        );
        assert_eq!(summary.uploads(), 2);
    }
}
