//! Line-region three-way merge on top of `diffy`.

/// Outcome of a three-way merge. `content` is the merged text; when
/// `conflict` is true it contains standard conflict markers around the
/// regions both sides changed differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub content: String,
    pub conflict: bool,
}

/// Merge `ours` and `theirs` against the shared ancestor `base`.
///
/// Regions changed on only one side are taken from that side; regions
/// changed differently on both sides are wrapped in conflict markers.
pub fn three_way_merge(base: &str, ours: &str, theirs: &str) -> Merged {
    match diffy::merge(base, ours, theirs) {
        Ok(content) => Merged {
            content,
            conflict: false,
        },
        Err(content) => Merged {
            content,
            conflict: true,
        },
    }
}
