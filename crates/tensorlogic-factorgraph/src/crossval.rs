//! Cross-validation splits over training instances.
//!
//! - K-fold cross-validation with optional seeded shuffling
//! - Predefined folds, for datasets that carry a fold id per example
//!
//! Splits are index lists; [`select_mut`] turns one into the `&mut` views the
//! trainers accept, so instances are never cloned between folds.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{FactorGraphError, Result};

/// Trait for cross-validation splitting strategies.
pub trait CrossValidationSplit {
    /// Get the number of splits.
    fn num_splits(&self) -> usize;

    /// Get the `(train, held_out)` indices for a specific fold.
    fn get_split(&self, fold: usize, n_samples: usize) -> Result<(Vec<usize>, Vec<usize>)>;
}

fn check_fold(fold: usize, n_splits: usize) -> Result<()> {
    if fold >= n_splits {
        return Err(FactorGraphError::VariableOutOfRange {
            what: "fold",
            index: fold,
            limit: n_splits,
        });
    }
    Ok(())
}

/// K-fold cross-validation.
///
/// Splits the data into K nearly equal folds; the first `n % K` folds get
/// one extra sample. Each fold is held out once.
#[derive(Debug, Clone)]
pub struct KFold {
    /// Number of folds.
    pub n_splits: usize,
    /// Whether to shuffle the data before splitting.
    pub shuffle: bool,
    /// Random seed for shuffling.
    pub random_seed: u64,
}

impl KFold {
    /// Create a K-fold splitter; `n_splits` must be at least 2.
    pub fn new(n_splits: usize) -> Result<Self> {
        if n_splits < 2 {
            return Err(FactorGraphError::InvalidParameter(
                "n_splits must be at least 2".to_string(),
            ));
        }
        Ok(Self {
            n_splits,
            shuffle: false,
            random_seed: 42,
        })
    }

    /// Enable shuffling with a specific seed.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.random_seed = seed;
        self
    }
}

impl CrossValidationSplit for KFold {
    fn num_splits(&self) -> usize {
        self.n_splits
    }

    fn get_split(&self, fold: usize, n_samples: usize) -> Result<(Vec<usize>, Vec<usize>)> {
        check_fold(fold, self.n_splits)?;
        if n_samples < self.n_splits {
            return Err(FactorGraphError::InvalidParameter(format!(
                "cannot split {} samples into {} folds",
                n_samples, self.n_splits
            )));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.random_seed);
            for i in (1..n_samples).rev() {
                let j = rng.random_range(0..=i);
                indices.swap(i, j);
            }
        }

        let fold_size = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;
        let start = fold * fold_size + fold.min(remainder);
        let end = start + fold_size + usize::from(fold < remainder);

        let held_out = indices[start..end].to_vec();
        let mut train = Vec::with_capacity(n_samples - held_out.len());
        train.extend_from_slice(&indices[..start]);
        train.extend_from_slice(&indices[end..]);
        Ok((train, held_out))
    }
}

/// Folds given by an explicit fold id per sample.
#[derive(Debug, Clone)]
pub struct PredefinedFolds {
    fold_ids: Vec<usize>,
    /// Distinct fold ids in ascending order
    folds: Vec<usize>,
}

impl PredefinedFolds {
    /// Create folds from one id per sample; needs at least two distinct ids.
    pub fn new(fold_ids: Vec<usize>) -> Result<Self> {
        let mut folds = fold_ids.clone();
        folds.sort_unstable();
        folds.dedup();
        if folds.len() < 2 {
            return Err(FactorGraphError::InvalidParameter(
                "predefined folds need at least two distinct fold ids".to_string(),
            ));
        }
        Ok(Self { fold_ids, folds })
    }

    /// Fold id of the `fold`-th split.
    pub fn fold_id(&self, fold: usize) -> Option<usize> {
        self.folds.get(fold).copied()
    }
}

impl CrossValidationSplit for PredefinedFolds {
    fn num_splits(&self) -> usize {
        self.folds.len()
    }

    fn get_split(&self, fold: usize, n_samples: usize) -> Result<(Vec<usize>, Vec<usize>)> {
        check_fold(fold, self.folds.len())?;
        if n_samples != self.fold_ids.len() {
            return Err(FactorGraphError::DimensionMismatch {
                context: "fold ids".to_string(),
                expected: self.fold_ids.len(),
                got: n_samples,
            });
        }
        let id = self.folds[fold];
        let (held_out, train): (Vec<usize>, Vec<usize>) =
            (0..n_samples).partition(|&i| self.fold_ids[i] == id);
        Ok((train, held_out))
    }
}

/// All `(train, held_out)` splits for per-sample fold ids.
pub fn folds_from_ids(fold_ids: &[usize]) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    let folds = PredefinedFolds::new(fold_ids.to_vec())?;
    (0..folds.num_splits())
        .map(|fold| folds.get_split(fold, fold_ids.len()))
        .collect()
}

/// Mutable references to the selected items, in slice order.
///
/// Out-of-range and repeated indices are ignored.
pub fn select_mut<'a, T>(items: &'a mut [T], indices: &[usize]) -> Vec<&'a mut T> {
    let mut selected = vec![false; items.len()];
    for &i in indices {
        if let Some(flag) = selected.get_mut(i) {
            *flag = true;
        }
    }
    items
        .iter_mut()
        .zip(selected)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}
