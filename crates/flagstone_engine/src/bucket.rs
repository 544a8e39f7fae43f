//! Sticky bucketing.
//!
//! Subjects are placed into buckets with XXH64 over `"{salt}:{subject_id}"`.
//! XXH64 is fully specified, so assignments survive restarts and match any
//! other implementation of the same scheme. Salting with the flag key keeps
//! placements on unrelated flags independent.

use xxhash_rust::xxh64::Xxh64;

/// Number of buckets used for percentage decisions.
pub const BUCKET_COUNT: u32 = 100;

/// Seed for bucketing hashes. Changing it reshuffles every assignment.
const HASH_SEED: u64 = 0;

/// Hashes a subject under a salt.
#[must_use]
pub fn hash(subject_id: &str, salt: &str) -> u64 {
    let mut hasher = Xxh64::new(HASH_SEED);
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(subject_id.as_bytes());
    hasher.digest()
}

/// Returns the subject's bucket in `[0, 100)`.
///
/// # Examples
///
/// ```
/// use flagstone_engine::bucket;
///
/// let b = bucket("user-42", "new-checkout");
/// assert!(b < 100);
/// assert_eq!(b, bucket("user-42", "new-checkout"));
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn bucket(subject_id: &str, salt: &str) -> u32 {
    bucket_in(subject_id, salt, u64::from(BUCKET_COUNT)) as u32
}

/// Returns the subject's position in `[0, range)`; `0` when `range` is zero.
#[must_use]
pub fn bucket_in(subject_id: &str, salt: &str, range: u64) -> u64 {
    if range == 0 {
        return 0;
    }
    hash(subject_id, salt) % range
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn streaming_hash_matches_one_shot() {
        let one_shot = xxhash_rust::xxh64::xxh64(b"flag:user-1", HASH_SEED);
        assert_eq!(hash("user-1", "flag"), one_shot);
    }

    #[test]
    fn empty_subject_is_valid() {
        assert!(bucket("", "flag") < BUCKET_COUNT);
    }

    #[test]
    fn zero_range_is_zero() {
        assert_eq!(bucket_in("user-1", "flag", 0), 0);
    }

    #[test]
    fn buckets_spread_across_range() {
        let mut seen = [false; 100];
        for i in 0..5000 {
            seen[bucket(&format!("user-{i}"), "spread") as usize] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
    }

    #[test]
    fn salts_decorrelate_flags() {
        // Subjects in the lowest decile of one flag should not cluster in the
        // lowest decile of another.
        let low_on_a: Vec<String> = (0..5000)
            .map(|i| format!("user-{i}"))
            .filter(|s| bucket(s, "flag-a") < 10)
            .collect();
        let also_low_on_b = low_on_a.iter().filter(|s| bucket(s, "flag-b") < 10).count();
        assert!(low_on_a.len() > 300);
        assert!(also_low_on_b * 4 < low_on_a.len());
    }

    proptest! {
        #[test]
        fn bucket_is_in_range_and_stable(subject in ".*", salt in "[a-z-]{0,20}") {
            let b = bucket(&subject, &salt);
            prop_assert!(b < BUCKET_COUNT);
            prop_assert_eq!(b, bucket(&subject, &salt));
        }

        #[test]
        fn bucket_in_respects_range(subject in "[a-z0-9]{1,12}", range in 1u64..10_000) {
            prop_assert!(bucket_in(&subject, "salt", range) < range);
        }
    }
}
