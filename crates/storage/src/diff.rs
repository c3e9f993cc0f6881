use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// A run of consecutive lines sharing one tag. `value` keeps line endings,
/// so joining segments reproduces either side byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSegment {
    pub value: String,
    pub added: bool,
    pub removed: bool,
}

impl DiffSegment {
    fn from_tag(tag: ChangeTag) -> Self {
        Self {
            value: String::new(),
            added: tag == ChangeTag::Insert,
            removed: tag == ChangeTag::Delete,
        }
    }

    fn same_tag(&self, tag: ChangeTag) -> bool {
        self.added == (tag == ChangeTag::Insert) && self.removed == (tag == ChangeTag::Delete)
    }
}

/// Line-level diff from `old` to `new`.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffSegment> {
    let diff = TextDiff::from_lines(old, new);
    let mut segments: Vec<DiffSegment> = Vec::new();

    for change in diff.iter_all_changes() {
        let tag = change.tag();
        match segments.last_mut() {
            Some(last) if last.same_tag(tag) => last.value.push_str(change.value()),
            _ => {
                let mut seg = DiffSegment::from_tag(tag);
                seg.value.push_str(change.value());
                segments.push(seg);
            }
        }
    }

    // 两侧都为空时仍返回一个未变更段
    if segments.is_empty() {
        segments.push(DiffSegment::from_tag(ChangeTag::Equal));
    }
    segments
}

/// The `old` side: every segment that was not added.
pub fn reconstruct_old(segments: &[DiffSegment]) -> String {
    segments.iter().filter(|s| !s.added).map(|s| s.value.as_str()).collect()
}

/// The `new` side: every segment that was not removed.
pub fn reconstruct_new(segments: &[DiffSegment]) -> String {
    segments.iter().filter(|s| !s.removed).map(|s| s.value.as_str()).collect()
}

/// Unified diff text (`+`/`-` markers, 3 lines of context).
pub fn unified(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        out.push_str(&format!("{}", hunk));
    }
    out
}
