//! Binary MNIST data preparation.
//!
//! Decodes IDX files, keeps two digit classes, binarizes and norm-bounds the
//! images, and partitions them into disjoint train/validation/test splits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dataset;
pub mod idx;
pub mod preprocess;
pub mod split;
pub mod synthetic;

pub use dataset::Dataset;
pub use idx::{load_idx_pair, read_idx_images, read_idx_labels};
pub use preprocess::{binarize, max_example_norm, normalize_rows, select_digits, Preprocessing};
pub use split::{split_dataset, train_val_test_split, DataSplits, SplitIndices, SplitSizes};
pub use synthetic::synthetic_digits;

/// Common imports for data preparation.
pub mod prelude {
    pub use crate::{
        binarize, load_idx_pair, normalize_rows, select_digits, split_dataset,
        synthetic_digits, train_val_test_split, DataSplits, Dataset, Preprocessing,
        SplitIndices, SplitSizes,
    };
}
