//! Word-level diff between two text blobs.
//!
//! # Responsibility
//! - Segment the change from one content string to another into ordered
//!   added/removed/unchanged runs for display.
//!
//! # Invariants
//! - Joining `removed` + `unchanged` texts with single spaces yields the old
//!   text with whitespace collapsed; `added` + `unchanged` yields the new one.
//! - Adjacent segments never share a kind.
//! - Output is deterministic; it is not a minimal edit script.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSegment {
    #[serde(rename = "type")]
    pub kind: DiffKind,
    /// Space-joined tokens.
    pub text: String,
}

impl DiffSegment {
    pub fn new(kind: DiffKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Word counts per segment kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added_words: usize,
    pub removed_words: usize,
    pub unchanged_words: usize,
}

/// Computes the segmentation turning `old` into `new`.
///
/// Both inputs are split on whitespace. On a mismatch, each side's remainder
/// is searched for the other side's current token; the nearer hit decides
/// whether the skipped run is an addition or a removal, with removal winning
/// ties. When neither side has a hit, the pair is a one-token substitution.
pub fn diff(old: &str, new: &str) -> Vec<DiffSegment> {
    let a: Vec<&str> = old.split_whitespace().collect();
    let b: Vec<&str> = new.split_whitespace().collect();
    let mut builder = SegmentBuilder::default();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            builder.push(DiffKind::Unchanged, &a[i..=i]);
            i += 1;
            j += 1;
            continue;
        }

        let in_new = find_from(&b, j + 1, a[i]);
        let in_old = find_from(&a, i + 1, b[j]);
        match (in_old, in_new) {
            (Some(ka), Some(kb)) if ka - i <= kb - j => {
                builder.push(DiffKind::Removed, &a[i..ka]);
                i = ka;
            }
            (_, Some(kb)) => {
                builder.push(DiffKind::Added, &b[j..kb]);
                j = kb;
            }
            (Some(ka), None) => {
                builder.push(DiffKind::Removed, &a[i..ka]);
                i = ka;
            }
            (None, None) => {
                builder.push(DiffKind::Removed, &a[i..=i]);
                builder.push(DiffKind::Added, &b[j..=j]);
                i += 1;
                j += 1;
            }
        }
    }

    builder.push(DiffKind::Removed, &a[i..]);
    builder.push(DiffKind::Added, &b[j..]);
    builder.finish()
}

/// Rebuilds the old text (whitespace-normalized).
pub fn reconstruct_old(segments: &[DiffSegment]) -> String {
    join_kinds(segments, DiffKind::Removed)
}

/// Rebuilds the new text (whitespace-normalized).
pub fn reconstruct_new(segments: &[DiffSegment]) -> String {
    join_kinds(segments, DiffKind::Added)
}

pub fn has_changes(segments: &[DiffSegment]) -> bool {
    segments
        .iter()
        .any(|segment| segment.kind != DiffKind::Unchanged)
}

pub fn diff_stats(segments: &[DiffSegment]) -> DiffStats {
    let mut stats = DiffStats::default();
    for segment in segments {
        let words = segment.text.split_whitespace().count();
        match segment.kind {
            DiffKind::Added => stats.added_words += words,
            DiffKind::Removed => stats.removed_words += words,
            DiffKind::Unchanged => stats.unchanged_words += words,
        }
    }
    stats
}

fn find_from(tokens: &[&str], start: usize, needle: &str) -> Option<usize> {
    tokens
        .get(start..)?
        .iter()
        .position(|token| *token == needle)
        .map(|offset| start + offset)
}

fn join_kinds(segments: &[DiffSegment], side: DiffKind) -> String {
    segments
        .iter()
        .filter(|segment| segment.kind == side || segment.kind == DiffKind::Unchanged)
        .map(|segment| segment.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Accumulates token runs, merging consecutive runs of the same kind.
#[derive(Default)]
struct SegmentBuilder {
    runs: Vec<(DiffKind, Vec<String>)>,
}

impl SegmentBuilder {
    fn push(&mut self, kind: DiffKind, tokens: &[&str]) {
        if tokens.is_empty() {
            return;
        }
        let owned = tokens.iter().map(|token| (*token).to_string());
        if let Some((last_kind, last_tokens)) = self.runs.last_mut() {
            if *last_kind == kind {
                last_tokens.extend(owned);
                return;
            }
        }
        self.runs.push((kind, owned.collect()));
    }

    fn finish(self) -> Vec<DiffSegment> {
        self.runs
            .into_iter()
            .map(|(kind, tokens)| DiffSegment::new(kind, tokens.join(" ")))
            .collect()
    }
}
