//! Turning per-point candidate masks into one mask per object.
//!
//! The decoder proposes several candidates per point. For each point the
//! highest-scoring candidate is kept; within a shared or tagged object,
//! foreground points are unioned and background points carve their union out
//! of it. A solo object is its point's best candidate whatever its label.

use super::types::{Mask, PointLabel, PointPrompt, ScoredMask};

/// Which object a prompt refines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKey {
    /// Untagged prompts in single-object mode
    Shared,
    /// Prompts carrying an explicit object id
    Tagged(u32),
    /// An untagged prompt in multi-object mode, keyed by its history index
    Solo(usize),
}

impl ObjectKey {
    pub fn of(prompt: &PointPrompt, index: usize, multi_object: bool) -> Self {
        match (prompt.object_id, multi_object) {
            (Some(id), _) => ObjectKey::Tagged(id),
            (None, false) => ObjectKey::Shared,
            (None, true) => ObjectKey::Solo(index),
        }
    }
}

/// Highest-confidence candidate; the first one wins ties
pub fn best_candidate(candidates: &[ScoredMask]) -> Option<&ScoredMask> {
    candidates.iter().fold(None, |best: Option<&ScoredMask>, c| match best {
        Some(b) if b.score >= c.score => Some(b),
        _ => Some(c),
    })
}

/// `clip(union(foreground) - union(background), 0, 1)`
///
/// Points without candidates contribute nothing. The result does not depend
/// on the order of the points.
pub fn carve(
    width: u32,
    height: u32,
    labels: &[PointLabel],
    candidates: &[Vec<ScoredMask>],
) -> Mask {
    let mut foreground = Mask::empty(width, height);
    let mut background = Mask::empty(width, height);

    for (label, point_candidates) in labels.iter().zip(candidates) {
        let Some(best) = best_candidate(point_candidates) else {
            continue;
        };
        match label {
            PointLabel::Foreground => foreground = foreground.union(&best.mask),
            PointLabel::Background => background = background.union(&best.mask),
        }
    }

    foreground.subtract(&background)
}

/// Mask of one object group, chosen by how the group was keyed
pub fn object_mask(
    key: ObjectKey,
    width: u32,
    height: u32,
    labels: &[PointLabel],
    candidates: &[Vec<ScoredMask>],
) -> Mask {
    match key {
        ObjectKey::Solo(_) => candidates
            .iter()
            .filter_map(|c| best_candidate(c))
            .fold(Mask::empty(width, height), |acc, best| acc.union(&best.mask)),
        ObjectKey::Shared | ObjectKey::Tagged(_) => carve(width, height, labels, candidates),
    }
}
