//! Correlation between master tickets and the replica positions that
//! mirror them.
//!
//! The link is carried in the replica position's comment field as
//! `MC-<master ticket>`. The comment is the only venue-side storage the
//! copier gets, so the format is kept stable for interop with positions
//! opened by earlier runs.

use tracing::warn;

use crate::models::Position;

const TAG_PREFIX: &str = "MC-";

/// Comment tag for a replica position mirroring `origin`.
pub fn tag_for(origin: u64) -> String {
    format!("{TAG_PREFIX}{origin}")
}

/// Master ticket encoded in a replica comment, if any.
///
/// Anything that does not parse back to a ticket exactly (truncated or
/// venue-mangled comments included) is treated as no tag at all.
pub fn origin_from_tag(comment: &str) -> Option<u64> {
    comment.strip_prefix(TAG_PREFIX)?.parse().ok()
}

/// The replica position mirroring `origin`, if one exists.
///
/// At most one position per replica should carry a given tag. If several
/// do, the first by snapshot order wins and the duplicates are reported.
pub fn find_mirrored(positions: &[Position], origin: u64) -> Option<&Position> {
    let mut matches = positions
        .iter()
        .filter(|p| origin_from_tag(&p.comment) == Some(origin));

    let first = matches.next()?;
    let duplicates: Vec<u64> = matches.map(|p| p.ticket).collect();
    if !duplicates.is_empty() {
        warn!(
            origin,
            kept = first.ticket,
            duplicates = ?duplicates,
            "multiple replica positions carry the same correlation tag"
        );
    }
    Some(first)
}
