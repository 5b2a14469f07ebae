//! Line diffs between two materialized versions of an object.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// How one line changed between two versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineChange {
    Kept,
    Added,
    Removed,
}

/// One line of a [`VersionDiff`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub change: LineChange,
    /// 1-based line in the older version, if the line exists there.
    pub old_line: Option<usize>,
    /// 1-based line in the newer version, if the line exists there.
    pub new_line: Option<usize>,
    pub text: String,
}

/// The difference between two versions' payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDiff {
    pub from_version: u64,
    pub to_version: u64,
    /// Changed lines with up to three lines of context around each group.
    pub lines: Vec<DiffLine>,
    /// Set when either payload is not UTF-8; `lines` is then empty.
    pub binary: bool,
    pub old_size: u64,
    pub new_size: u64,
}

impl VersionDiff {
    pub fn additions(&self) -> usize {
        self.count(LineChange::Added)
    }

    pub fn deletions(&self) -> usize {
        self.count(LineChange::Removed)
    }

    /// True when the payloads are byte-identical.
    pub fn is_unchanged(&self) -> bool {
        !self.binary && self.additions() == 0 && self.deletions() == 0
            && self.old_size == self.new_size
    }

    fn count(&self, change: LineChange) -> usize {
        self.lines.iter().filter(|l| l.change == change).count()
    }
}

/// Diff two payloads line by line.
pub fn diff_payloads(from_version: u64, old: &[u8], to_version: u64, new: &[u8]) -> VersionDiff {
    let mut diff = VersionDiff {
        from_version,
        to_version,
        lines: Vec::new(),
        binary: false,
        old_size: old.len() as u64,
        new_size: new.len() as u64,
    };
    let (Ok(old_text), Ok(new_text)) = (std::str::from_utf8(old), std::str::from_utf8(new)) else {
        diff.binary = old != new;
        return diff;
    };

    let text_diff = TextDiff::from_lines(old_text, new_text);
    for group in text_diff.grouped_ops(3) {
        for op in &group {
            for change in text_diff.iter_changes(op) {
                diff.lines.push(DiffLine {
                    change: match change.tag() {
                        ChangeTag::Equal => LineChange::Kept,
                        ChangeTag::Insert => LineChange::Added,
                        ChangeTag::Delete => LineChange::Removed,
                    },
                    old_line: change.old_index().map(|i| i + 1),
                    new_line: change.new_index().map(|i| i + 1),
                    text: change.value().trim_end_matches('\n').to_string(),
                });
            }
        }
    }
    diff
}
