//! Seeded, disjoint train/validation/test partitions.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use dp_mnist_core::{DpError, Result};

use crate::dataset::Dataset;

/// Requested number of examples per split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitSizes {
    /// Training examples.
    pub train: usize,
    /// Validation examples.
    pub validation: usize,
    /// Test examples.
    pub test: usize,
}

impl SplitSizes {
    /// Total examples consumed by the split, `None` on overflow.
    pub fn total(&self) -> Option<usize> {
        self.train
            .checked_add(self.validation)?
            .checked_add(self.test)
    }
}

/// Indices of each split into the source dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitIndices {
    /// Training indices.
    pub train: Vec<usize>,
    /// Validation indices.
    pub validation: Vec<usize>,
    /// Test indices.
    pub test: Vec<usize>,
}

/// The three datasets of a split.
#[derive(Clone, Debug)]
pub struct DataSplits {
    /// Training data.
    pub train: Dataset,
    /// Validation data.
    pub validation: Dataset,
    /// Test data.
    pub test: Dataset,
}

/// Shuffle `0..n` with `seed` and cut consecutive, non-overlapping ranges.
pub fn train_val_test_split(n: usize, sizes: SplitSizes, seed: u64) -> Result<SplitIndices> {
    if sizes.train == 0 || sizes.test == 0 {
        return Err(DpError::invalid("train and test splits must be non-empty"));
    }
    let total = sizes
        .total()
        .ok_or_else(|| DpError::invalid("split sizes overflow usize"))?;
    if total > n {
        return Err(DpError::invalid(format!(
            "requested {total} examples but only {n} are available"
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);

    let (train, rest) = indices.split_at(sizes.train);
    let (validation, rest) = rest.split_at(sizes.validation);
    let test = &rest[..sizes.test];

    Ok(SplitIndices {
        train: train.to_vec(),
        validation: validation.to_vec(),
        test: test.to_vec(),
    })
}

/// Split a dataset into train/validation/test.
pub fn split_dataset(ds: &Dataset, sizes: SplitSizes, seed: u64) -> Result<DataSplits> {
    let idx = train_val_test_split(ds.len(), sizes, seed)?;
    Ok(DataSplits {
        train: ds.subset(&idx.train)?,
        validation: ds.subset(&idx.validation)?,
        test: ds.subset(&idx.test)?,
    })
}

impl DataSplits {
    /// Add a channel axis to every split.
    pub fn with_channel_axis(self) -> Result<Self> {
        Ok(Self {
            train: self.train.with_channel_axis()?,
            validation: self.validation.with_channel_axis()?,
            test: self.test.with_channel_axis()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn splits_are_disjoint_and_sized() {
        let sizes = SplitSizes {
            train: 60,
            validation: 15,
            test: 20,
        };
        let idx = train_val_test_split(100, sizes, 3).expect("split");
        assert_eq!(idx.train.len(), 60);
        assert_eq!(idx.validation.len(), 15);
        assert_eq!(idx.test.len(), 20);

        let mut seen = HashSet::new();
        for i in idx.train.iter().chain(&idx.validation).chain(&idx.test) {
            assert!(seen.insert(*i), "index {i} appears twice");
            assert!(*i < 100);
        }
    }

    #[test]
    fn split_is_seed_deterministic() {
        let sizes = SplitSizes {
            train: 5,
            validation: 2,
            test: 3,
        };
        let a = train_val_test_split(20, sizes, 11).expect("split");
        let b = train_val_test_split(20, sizes, 11).expect("split");
        let c = train_val_test_split(20, sizes, 12).expect("split");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn oversized_split_is_rejected() {
        let sizes = SplitSizes {
            train: 8,
            validation: 2,
            test: 1,
        };
        assert!(train_val_test_split(10, sizes, 0).is_err());
    }

    #[test]
    fn overflowing_sizes_are_an_error() {
        let sizes = SplitSizes {
            train: usize::MAX,
            validation: 1,
            test: 1,
        };
        assert_eq!(sizes.total(), None);
        let err = train_val_test_split(10, sizes, 0).unwrap_err();
        assert!(matches!(err, DpError::InvalidParameters { .. }));
    }
}
