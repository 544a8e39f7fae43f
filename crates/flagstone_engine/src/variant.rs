//! Weighted variant selection.

use crate::bucket::bucket_in;
use flagstone_model::Variant;

/// Picks a variant for a subject.
///
/// The subject's position in `[0, total_weight)` is located by walking the
/// cumulative weights in definition order. Zero total weight always picks
/// the first variant. Returns `None` only for an empty list.
pub fn select<'a>(subject_id: &str, flag_key: &str, variants: &'a [Variant]) -> Option<&'a Variant> {
    let first = variants.first()?;
    let total: u64 = variants.iter().map(|v| u64::from(v.weight)).sum();
    if total == 0 {
        return Some(first);
    }

    let point = bucket_in(subject_id, flag_key, total);
    let mut cumulative = 0u64;
    for variant in variants {
        cumulative += u64::from(variant.weight);
        if point < cumulative {
            return Some(variant);
        }
    }
    Some(first)
}
