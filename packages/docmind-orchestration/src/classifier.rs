//! Error classification for indexing failures.
//!
//! Maps free-text error messages to a closed taxonomy of error kinds via
//! case-insensitive substring matching against a priority-ordered keyword
//! table. First matching kind wins; unmatched input falls through to
//! `System`. Pure and total: classification never fails.

use serde::{Deserialize, Serialize};

/// Closed error taxonomy driving differentiated recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Watchdog deadline exceeded; handled via the timeout channel only.
    Timeout,
    /// Missing files; partial results are retained.
    FileAccess,
    Permission,
    DiskSpace,
    Resource,
    Corruption,
    /// Default when no keyword matches.
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::FileAccess => "file_access",
            ErrorKind::Permission => "permission",
            ErrorKind::DiskSpace => "disk_space",
            ErrorKind::Resource => "resource",
            ErrorKind::Corruption => "corruption",
            ErrorKind::System => "system",
        }
    }

    /// Whether a partially-built index must be cleared for this kind.
    ///
    /// `FileAccess` keeps whatever was indexed successfully; everything else
    /// clears so a silently-incomplete index is never mistaken for a
    /// complete one.
    pub fn clears_partial_index(&self) -> bool {
        !matches!(self, ErrorKind::FileAccess | ErrorKind::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority-ordered keyword table. Keywords are lowercase; the message is
/// lowercased before matching. Includes the localized terms the indexing
/// backends emit alongside the English ones.
const KEYWORD_TABLE: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Timeout,
        &["timeout", "タイムアウト", "no response", "応答なし"],
    ),
    (
        ErrorKind::FileAccess,
        &["file not found", "no such file", "ファイルが見つかりません"],
    ),
    (
        ErrorKind::Permission,
        &["permission denied", "access denied", "アクセスが拒否", "権限"],
    ),
    (
        ErrorKind::DiskSpace,
        &["no space", "disk full", "容量不足", "ディスク"],
    ),
    (
        ErrorKind::Resource,
        &["out of memory", "memory", "メモリ", "resource", "リソース"],
    ),
    (
        ErrorKind::Corruption,
        &["corrupt", "invalid", "破損", "不正"],
    ),
];

/// Classify a raw error message into an [`ErrorKind`].
pub fn classify(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();

    for (kind, keywords) in KEYWORD_TABLE {
        if keywords.iter().any(|keyword| lowered.contains(keyword)) {
            return *kind;
        }
    }

    ErrorKind::System
}
