//! Backup retrieval: locating the latest backups in object storage and
//! bringing them to local `.bak` files the engine can read.

pub(crate) mod extract;
pub(crate) mod s3_download;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::engine::LsnMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Diff,
}

impl BackupKind {
    /// Classifies an object key by the `FULL`/`DIFF` marker in its name.
    /// Key names only pick candidates; applicability is decided by LSNs.
    pub fn from_key(key: &str) -> Option<Self> {
        let upper = key.to_ascii_uppercase();
        if upper.contains("FULL") {
            Some(BackupKind::Full)
        } else if upper.contains("DIFF") {
            Some(BackupKind::Diff)
        } else {
            None
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => f.write_str("FULL"),
            BackupKind::Diff => f.write_str("DIFF"),
        }
    }
}

/// One retrieved backup artifact. Immutable; LSN metadata is attached by
/// producing a new descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDescriptor {
    key: String,
    kind: BackupKind,
    archive_path: PathBuf,
    local_path: PathBuf,
    lsn: Option<LsnMetadata>,
}

impl BackupDescriptor {
    pub fn new(
        key: impl Into<String>,
        kind: BackupKind,
        archive_path: impl Into<PathBuf>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            archive_path: archive_path.into(),
            local_path: local_path.into(),
            lsn: None,
        }
    }

    pub fn with_lsn(self, lsn: LsnMetadata) -> Self {
        Self {
            lsn: Some(lsn),
            ..self
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> BackupKind {
        self.kind
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// The extracted `.bak` file handed to the engine.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn lsn(&self) -> Option<&LsnMetadata> {
        self.lsn.as_ref()
    }
}

/// Candidates returned by a [`BackupSource`]. `diffs` are newest first.
#[derive(Debug, Clone, Default)]
pub struct FetchedBackups {
    pub full: Option<BackupDescriptor>,
    pub diffs: Vec<BackupDescriptor>,
}

/// Selected object keys before download.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LatestKeys {
    pub full: Option<String>,
    pub diffs: Vec<String>,
}

/// Picks the newest FULL key and up to `diff_limit` newest DIFF keys by
/// reverse lexical order of the (timestamped) key names.
pub fn select_latest_keys<'a>(keys: impl IntoIterator<Item = &'a str>, diff_limit: usize) -> LatestKeys {
    let mut fulls = Vec::new();
    let mut diffs = Vec::new();
    for key in keys {
        if key.ends_with('/') {
            continue;
        }
        match BackupKind::from_key(key) {
            Some(BackupKind::Full) => fulls.push(key.to_string()),
            Some(BackupKind::Diff) => diffs.push(key.to_string()),
            None => {}
        }
    }
    fulls.sort_unstable_by(|a, b| b.cmp(a));
    diffs.sort_unstable_by(|a, b| b.cmp(a));
    diffs.truncate(diff_limit);

    LatestKeys {
        full: fulls.into_iter().next(),
        diffs,
    }
}

/// External collaborator that produces locally available backups.
#[async_trait]
pub trait BackupSource: Send + Sync {
    async fn fetch_latest_backups(&self, bucket: &str) -> anyhow::Result<FetchedBackups>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_key_is_case_insensitive() {
        assert_eq!(BackupKind::from_key("SQLBackups/etoBPHC_FULL_20250207210004.7z"), Some(BackupKind::Full));
        assert_eq!(BackupKind::from_key("SQLBackups/etobphc_diff_20250208.7z"), Some(BackupKind::Diff));
        assert_eq!(BackupKind::from_key("SQLBackups/readme.txt"), None);
    }

    #[test]
    fn test_select_latest_keys_orders_newest_first() {
        let keys = [
            "SQLBackups/",
            "SQLBackups/etoBPHC_FULL_20250131210004.7z",
            "SQLBackups/etoBPHC_DIFF_20250208120000.7z",
            "SQLBackups/etoBPHC_FULL_20250207210004.7z",
            "SQLBackups/etoBPHC_DIFF_20250209120000.7z",
            "SQLBackups/etoBPHC_DIFF_20250201120000.7z",
            "SQLBackups/etoBPHC_DIFF_20250210120000.7z",
            "SQLBackups/notes.txt",
        ];

        let latest = select_latest_keys(keys, 3);

        assert_eq!(latest.full.as_deref(), Some("SQLBackups/etoBPHC_FULL_20250207210004.7z"));
        assert_eq!(
            latest.diffs,
            vec![
                "SQLBackups/etoBPHC_DIFF_20250210120000.7z",
                "SQLBackups/etoBPHC_DIFF_20250209120000.7z",
                "SQLBackups/etoBPHC_DIFF_20250208120000.7z",
            ]
        );
    }

    #[test]
    fn test_select_latest_keys_without_full() {
        let latest = select_latest_keys(["SQLBackups/etoBPHC_DIFF_20250210120000.7z"], 3);
        assert_eq!(latest.full, None);
        assert_eq!(latest.diffs.len(), 1);
    }

    #[test]
    fn test_with_lsn_keeps_identity() {
        let d = BackupDescriptor::new("k", BackupKind::Diff, "/b/k.7z", "/b/k/k.bak");
        let meta = LsnMetadata {
            first_lsn: crate::engine::Lsn(100),
            differential_base_lsn: Some(crate::engine::Lsn(90)),
        };
        let with = d.clone().with_lsn(meta);
        assert_eq!(with.key(), d.key());
        assert_eq!(with.lsn(), Some(&meta));
        assert_eq!(d.lsn(), None);
    }
}
