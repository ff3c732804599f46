//! Splits device recipient lists into gateway-sized batches.

use serde::Serialize;

use super::types::DeviceId;

/// Most registration ids the gateway accepts in a single multicast call.
/// Larger requests are rejected outright, not truncated.
pub const MAX_IDS_PER_CALL: usize = 1000;

/// A contiguous slice of a devices target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Position of this batch within the dispatch
    pub index: usize,
    pub ids: Vec<DeviceId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split `ids` into order-preserving batches of at most `max_per_batch` ids.
///
/// Every batch is full except possibly the last. A `max_per_batch` of zero is
/// treated as one.
pub fn split(ids: &[DeviceId], max_per_batch: usize) -> Vec<Batch> {
    ids.chunks(max_per_batch.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            ids: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<DeviceId> {
        (0..n).map(|i| format!("token-{}", i)).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(split(&[], MAX_IDS_PER_CALL).is_empty());
    }

    #[test]
    fn test_batch_counts_and_sizes() {
        for n in [1, 999, 1000, 1001, 2500, 3000] {
            let input = ids(n);
            let batches = split(&input, MAX_IDS_PER_CALL);

            assert_eq!(batches.len(), n.div_ceil(MAX_IDS_PER_CALL), "n = {}", n);
            assert!(batches.iter().all(|b| b.len() <= MAX_IDS_PER_CALL));
            assert!(batches[..batches.len() - 1]
                .iter()
                .all(|b| b.len() == MAX_IDS_PER_CALL));

            let rejoined: Vec<DeviceId> = batches.into_iter().flat_map(|b| b.ids).collect();
            assert_eq!(rejoined, input);
        }
    }

    #[test]
    fn test_indices_are_sequential() {
        let batches = split(&ids(7), 3);
        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(batches[2].ids, vec!["token-6".to_string()]);
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        let batches = split(&ids(3), 0);
        assert_eq!(batches.len(), 3);
    }
}
