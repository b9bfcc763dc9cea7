//! Work key generation and partitioning.
//!
//! Keys form the arithmetic progression `start + k * stride` bounded by an
//! inclusive end. [`TaskSource`] splits that progression into contiguous,
//! non-overlapping partitions; the remainder of an uneven split is appended to
//! the last partition as an explicit extra span.

use crate::harvest::traits::ConfigurationError;
use crate::model::WorkKey;

/// Inclusive arithmetic progression of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    start: u64,
    end_inclusive: u64,
    stride: u64,
}

impl KeyRange {
    /// Keys start at 1; key 0 is never valid.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ZeroStride`] if `stride == 0` and
    /// [`ConfigurationError::ZeroStartKey`] if `start == 0`.
    pub fn new(start: u64, end_inclusive: u64, stride: u64) -> Result<Self, ConfigurationError> {
        if stride == 0 {
            return Err(ConfigurationError::ZeroStride);
        }
        if start == 0 {
            return Err(ConfigurationError::ZeroStartKey);
        }
        Ok(Self {
            start,
            end_inclusive,
            stride,
        })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Number of keys in the progression.
    pub fn len(&self) -> u64 {
        if self.start > self.end_inclusive {
            0
        } else {
            (self.end_inclusive - self.start) / self.stride + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Span of `count` keys starting at progression index `first_index`.
    fn span(&self, first_index: u64, count: u64) -> KeySpan {
        KeySpan {
            first: self.start + first_index * self.stride,
            count,
            stride: self.stride,
        }
    }
}

/// Contiguous run of `count` keys spaced by `stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpan {
    pub first: u64,
    pub count: u64,
    pub stride: u64,
}

impl KeySpan {
    pub fn keys(&self) -> impl Iterator<Item = WorkKey> {
        let KeySpan {
            first,
            count,
            stride,
        } = *self;
        (0..count).map(move |i| WorkKey(first + i * stride))
    }
}

/// Keys owned by one worker: a primary span plus, for the designated last
/// partition, the remainder of an uneven split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub primary: KeySpan,
    pub remainder: Option<KeySpan>,
}

impl Partition {
    /// Keys in pull order: the primary span, then the remainder span.
    pub fn keys(&self) -> impl Iterator<Item = WorkKey> {
        let remainder = self.remainder.into_iter().flat_map(|span| span.keys());
        self.primary.keys().chain(remainder)
    }

    pub fn len(&self) -> u64 {
        self.primary.count + self.remainder.map_or(0, |span| span.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Produces the ordered key partitions for one run.
#[derive(Debug, Clone)]
pub struct TaskSource {
    range: KeyRange,
    partition_count: usize,
}

impl TaskSource {
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ZeroPartitions`] if `partition_count == 0`.
    pub fn new(range: KeyRange, partition_count: usize) -> Result<Self, ConfigurationError> {
        if partition_count == 0 {
            return Err(ConfigurationError::ZeroPartitions);
        }
        Ok(Self {
            range,
            partition_count,
        })
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    pub fn total_keys(&self) -> u64 {
        self.range.len()
    }

    /// Splits the range into `partition_count` partitions.
    ///
    /// Every partition gets `len / partition_count` keys; the last one also
    /// receives the `len % partition_count` leftover keys.
    pub fn partitions(&self) -> Vec<Partition> {
        let total = self.range.len();
        let count = self.partition_count as u64;
        let per_partition = total / count;
        let leftover = total % count;

        (0..self.partition_count)
            .map(|index| {
                let is_last = index + 1 == self.partition_count;
                let primary = self.range.span(index as u64 * per_partition, per_partition);
                let remainder = (is_last && leftover > 0)
                    .then(|| self.range.span(count * per_partition, leftover));
                Partition {
                    index,
                    primary,
                    remainder,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn keys_of(partition: &Partition) -> Vec<u64> {
        partition.keys().map(WorkKey::get).collect()
    }

    #[test]
    fn test_even_split() {
        let source = TaskSource::new(KeyRange::new(1, 10, 1).unwrap(), 2).unwrap();
        let partitions = source.partitions();

        assert_eq!(partitions.len(), 2);
        assert_eq!(keys_of(&partitions[0]), vec![1, 2, 3, 4, 5]);
        assert_eq!(keys_of(&partitions[1]), vec![6, 7, 8, 9, 10]);
        assert!(partitions[1].remainder.is_none());
    }

    #[test]
    fn test_remainder_goes_to_last_partition() {
        let source = TaskSource::new(KeyRange::new(1, 11, 1).unwrap(), 3).unwrap();
        let partitions = source.partitions();

        assert_eq!(keys_of(&partitions[0]), vec![1, 2, 3]);
        assert_eq!(keys_of(&partitions[1]), vec![4, 5, 6]);
        assert_eq!(keys_of(&partitions[2]), vec![7, 8, 9, 10, 11]);
        assert_eq!(
            partitions[2].remainder,
            Some(KeySpan {
                first: 10,
                count: 2,
                stride: 1
            })
        );
    }

    #[test]
    fn test_sampled_stride_matches_multiples() {
        let source = TaskSource::new(KeyRange::new(10, 100, 10).unwrap(), 3).unwrap();
        let all: Vec<u64> = source
            .partitions()
            .iter()
            .flat_map(|p| keys_of(p))
            .collect();

        assert_eq!(all, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn test_more_partitions_than_keys() {
        let source = TaskSource::new(KeyRange::new(1, 3, 1).unwrap(), 5).unwrap();
        let partitions = source.partitions();

        assert_eq!(partitions.len(), 5);
        assert!(partitions[..4].iter().all(Partition::is_empty));
        assert_eq!(keys_of(&partitions[4]), vec![1, 2, 3]);
    }

    #[test]
    fn test_partitions_are_exhaustive_and_disjoint() {
        for start in [1u64, 4, 17] {
            for end in [start, start + 1, start + 29, start + 100] {
                for stride in [1u64, 2, 3, 7] {
                    for workers in [1usize, 2, 3, 4, 9] {
                        let range = KeyRange::new(start, end, stride).unwrap();
                        let source = TaskSource::new(range, workers).unwrap();

                        let mut seen = Vec::new();
                        for partition in source.partitions() {
                            seen.extend(keys_of(&partition));
                        }

                        let expected: Vec<u64> = (start..=end).step_by(stride as usize).collect();
                        let unique: BTreeSet<u64> = seen.iter().copied().collect();
                        assert_eq!(unique.len(), seen.len(), "duplicate keys");
                        assert_eq!(seen, expected);
                        assert_eq!(source.total_keys(), expected.len() as u64);
                    }
                }
            }
        }
    }

    #[test]
    fn test_full_width_range_length() {
        let range = KeyRange::new(1, u64::MAX, 1).unwrap();
        assert_eq!(range.len(), u64::MAX);
    }

    #[test]
    fn test_empty_range() {
        let range = KeyRange::new(5, 4, 1).unwrap();
        assert!(range.is_empty());
        let source = TaskSource::new(range, 2).unwrap();
        assert!(source.partitions().iter().all(Partition::is_empty));
    }

    #[test]
    fn test_invalid_parameters() {
        assert_eq!(KeyRange::new(1, 10, 0), Err(ConfigurationError::ZeroStride));
        assert_eq!(KeyRange::new(0, u64::MAX, 1), Err(ConfigurationError::ZeroStartKey));
        let range = KeyRange::new(1, 10, 1).unwrap();
        assert!(matches!(
            TaskSource::new(range, 0),
            Err(ConfigurationError::ZeroPartitions)
        ));
    }
}
