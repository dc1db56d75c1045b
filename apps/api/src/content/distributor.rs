/// Target meaning "one bucket per record".
pub const ONE_PER_RECORD: i64 = -1;

/// Groups `records` into at most `target` contiguous, non-empty buckets.
///
/// Record `i` of `count` lands in bucket `i * target / count` (clamped to
/// `target - 1`). A target of [`ONE_PER_RECORD`], or one at least as large as
/// the record count, yields one bucket per record. Any other non-positive
/// target is treated as 1. The result depends only on the inputs, which is
/// what lets regeneration find the same content for a slide number again.
pub fn distribute<T: Clone>(records: &[T], target: i64) -> Vec<Vec<T>> {
    let count = records.len();
    if count == 0 {
        return Vec::new();
    }

    if target == ONE_PER_RECORD || (target > 0 && target as usize >= count) {
        return records.iter().map(|r| vec![r.clone()]).collect();
    }

    let buckets = target.max(1) as usize;
    let mut grouped: Vec<Vec<T>> = vec![Vec::new(); buckets];
    for (i, record) in records.iter().enumerate() {
        let index = (i * buckets / count).min(buckets - 1);
        grouped[index].push(record.clone());
    }

    grouped.into_iter().filter(|b| !b.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_buckets_from_five_records() {
        let records = ["A", "B", "C", "D", "E"];
        assert_eq!(
            distribute(&records, 2),
            vec![vec!["A", "B", "C"], vec!["D", "E"]]
        );
    }

    #[test]
    fn test_one_per_record_target() {
        let records = ["A", "B", "C", "D", "E"];
        let buckets = distribute(&records, ONE_PER_RECORD);
        assert_eq!(buckets.len(), 5);
        assert!(buckets.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn test_non_positive_target_means_single_bucket() {
        let records = [1, 2, 3];
        assert_eq!(distribute(&records, 0), vec![vec![1, 2, 3]]);
        assert_eq!(distribute(&records, -7), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_target_above_count_is_identity() {
        let records = [1, 2];
        assert_eq!(distribute(&records, 10), vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_empty_input() {
        let records: [u8; 0] = [];
        assert!(distribute(&records, 3).is_empty());
    }

    proptest! {
        #[test]
        fn test_concatenation_preserves_order(count in 1usize..200, target in -3i64..250) {
            let records: Vec<usize> = (0..count).collect();
            let buckets = distribute(&records, target);

            let flat: Vec<usize> = buckets.iter().flatten().copied().collect();
            prop_assert_eq!(flat, records.clone());
            prop_assert!(buckets.iter().all(|b| !b.is_empty()));

            let effective = if target == ONE_PER_RECORD { count } else { target.max(1) as usize };
            prop_assert!(!buckets.is_empty());
            prop_assert!(buckets.len() <= effective.min(count));
        }

        #[test]
        fn test_distribution_is_deterministic(count in 0usize..100, target in -1i64..120) {
            let records: Vec<usize> = (0..count).collect();
            prop_assert_eq!(distribute(&records, target), distribute(&records, target));
        }
    }
}
