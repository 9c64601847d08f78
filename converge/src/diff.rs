//! Hunk-aware line diffing between artifact snapshots.
//!
//! The change count drives convergence decisions, so it has to be stable
//! under the noise refiners produce: a changed line counts as 1 (not 1
//! deletion + 1 insertion), and optional normalizations discount
//! whitespace-only churn, comment churn, and code restructuring.

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffOp};

use crate::artifact::DiffMetrics;

/// Line prefixes treated as comments by [`DiffOptions::ignore_comments`].
const COMMENT_PREFIXES: &[&str] = &["//", "#", "--", "/*", "*/", "*"];

/// A hunk with this much overlap between deletions and insertions is
/// treated as a restructuring rather than a rewrite.
const RESTRUCTURE_OVERLAP: f64 = 0.7;
const RESTRUCTURE_WEIGHT: f64 = 0.5;

/// Normalizations applied before and during diffing. All off by default.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Collapse internal whitespace runs to single spaces and trim line
    /// edges before comparing.
    pub ignore_whitespace: bool,
    /// Subtract comment-only lines from each hunk's counts.
    pub ignore_comments: bool,
    /// Weight hunks that look like refactors (high deletion/insertion
    /// overlap) at 50%.
    pub semantic_restructuring: bool,
}

/// Outcome of diffing two snapshots line-by-line.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffStats {
    /// Weighted changed-line count across all hunks.
    pub lines_changed: f64,
    /// Line count of the current snapshot after normalization.
    pub current_lines: usize,
}

impl DiffStats {
    /// Changed lines relative to the current snapshot's size.
    ///
    /// An empty current snapshot with changes counts as fully changed.
    pub fn change_ratio(&self) -> f64 {
        if self.current_lines == 0 {
            if self.lines_changed > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            self.lines_changed / self.current_lines as f64
        }
    }

    pub fn metrics(&self) -> DiffMetrics {
        DiffMetrics {
            lines_changed: self.lines_changed,
            change_ratio: self.change_ratio(),
        }
    }
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Split into lines, which also normalizes a trailing newline:
/// `"x"` and `"x\n"` produce the same line sequence.
fn split_lines(content: &str, options: &DiffOptions) -> Vec<String> {
    content
        .lines()
        .map(|line| {
            if options.ignore_whitespace {
                collapse_whitespace(line)
            } else {
                line.to_string()
            }
        })
        .collect()
}

fn comment_count(lines: &[String]) -> usize {
    lines.iter().filter(|l| is_comment_line(l)).count()
}

/// Diff `previous` against `current` and return the weighted change count.
///
/// Per hunk the cost is `max(deletions, insertions)`: a changed line is 1,
/// N added lines are N, N removed lines are N. Reordered blocks therefore
/// do not double-count.
pub fn diff_lines(previous: &str, current: &str, options: &DiffOptions) -> DiffStats {
    let old = split_lines(previous, options);
    let new = split_lines(current, options);

    let mut changed = 0.0f64;
    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (del, ins) = match op {
            DiffOp::Equal { .. } => continue,
            DiffOp::Delete {
                old_index, old_len, ..
            } => (&old[old_index..old_index + old_len], &new[0..0]),
            DiffOp::Insert {
                new_index, new_len, ..
            } => (&old[0..0], &new[new_index..new_index + new_len]),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => (
                &old[old_index..old_index + old_len],
                &new[new_index..new_index + new_len],
            ),
        };

        let mut del_count = del.len();
        let mut ins_count = ins.len();
        if options.ignore_comments {
            del_count -= comment_count(del);
            ins_count -= comment_count(ins);
        }

        let mut cost = del_count.max(ins_count) as f64;
        if options.semantic_restructuring {
            let max = del_count.max(ins_count);
            let min = del_count.min(ins_count);
            if max > 0 && min as f64 / max as f64 >= RESTRUCTURE_OVERLAP {
                cost *= RESTRUCTURE_WEIGHT;
            }
        }
        changed += cost;
    }

    DiffStats {
        lines_changed: changed,
        current_lines: new.len(),
    }
}
