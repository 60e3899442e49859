//! Index samplers and a minimal batching loader.
//!
//! A sampler is constructed with an optional data source and only reports
//! [`Error::MissingDataSource`] when it is asked for indices or a length.

use crate::data::{Dataset, TensorDataset};
use crate::{Backend, Error, Tensor};
use log::trace;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cell::RefCell;
use std::vec;

/// Produces the order in which dataset indices are visited in one epoch.
pub trait Sampler {
    /// Indices for one pass over the data source.
    fn iter(&self) -> Result<vec::IntoIter<usize>, Error>;

    /// Number of indices one pass yields.
    fn len(&self) -> Result<usize, Error>;

    fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }
}

fn source_len(data_source: Option<&dyn Dataset>) -> Result<usize, Error> {
    data_source
        .map(|source| source.len())
        .ok_or(Error::MissingDataSource)
}

/// Yields `0, 1, ..., N - 1`.
#[derive(Clone, Copy)]
pub struct SequentialSampler<'a> {
    data_source: Option<&'a dyn Dataset>,
}

impl<'a> SequentialSampler<'a> {
    pub fn new(data_source: Option<&'a dyn Dataset>) -> Self {
        Self { data_source }
    }
}

impl Sampler for SequentialSampler<'_> {
    fn iter(&self) -> Result<vec::IntoIter<usize>, Error> {
        let n = source_len(self.data_source)?;
        Ok((0..n).collect::<Vec<_>>().into_iter())
    }

    fn len(&self) -> Result<usize, Error> {
        source_len(self.data_source)
    }
}

/// Yields a fresh random permutation of `0..N` on every call to `iter`.
pub struct RandomSampler<'a> {
    data_source: Option<&'a dyn Dataset>,
    rng: RefCell<StdRng>,
}

impl<'a> RandomSampler<'a> {
    /// Seeded from the operating system.
    pub fn new(data_source: Option<&'a dyn Dataset>) -> Self {
        Self {
            data_source,
            rng: RefCell::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible sequence of permutations; each epoch still differs.
    pub fn with_seed(data_source: Option<&'a dyn Dataset>, seed: u64) -> Self {
        Self {
            data_source,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Sampler for RandomSampler<'_> {
    fn iter(&self) -> Result<vec::IntoIter<usize>, Error> {
        let n = source_len(self.data_source)?;
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut *self.rng.borrow_mut());
        trace!("RandomSampler: drew permutation of {} indices", n);
        Ok(indices.into_iter())
    }

    fn len(&self) -> Result<usize, Error> {
        source_len(self.data_source)
    }
}

/// Groups sampler indices into batches and gathers them from a [`TensorDataset`].
pub struct DataLoader<S: Sampler> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> DataLoader<S> {
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Result<Self, Error> {
        if batch_size == 0 {
            return Err(Error::InvalidOperation(
                "DataLoader batch_size must be positive".to_string(),
            ));
        }
        Ok(Self {
            sampler,
            batch_size,
            drop_last,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> Result<usize, Error> {
        let n = self.sampler.len()?;
        Ok(if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        })
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Draws one epoch of indices from the sampler, split into batches.
    /// With `drop_last` a trailing short batch is discarded.
    pub fn index_batches(&self) -> Result<Vec<Vec<usize>>, Error> {
        let indices: Vec<usize> = self.sampler.iter()?.collect();
        Ok(indices
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(<[usize]>::to_vec)
            .collect())
    }

    /// One epoch of `(features, targets)` batches from `dataset`.
    pub fn epoch<B: Backend>(
        &self,
        dataset: &TensorDataset<B>,
    ) -> Result<Vec<(Tensor<B>, Tensor<B>)>, Error> {
        self.index_batches()?
            .iter()
            .map(|batch| dataset.get_batch(batch))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;

    #[test]
    fn test_sequential_order() -> Result<(), Error> {
        let data = vec![0u8; 5];
        let sampler = SequentialSampler::new(Some(&data));
        assert_eq!(sampler.iter()?.collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(sampler.len()?, 5);
        Ok(())
    }

    #[test]
    fn test_missing_source_reported_lazily() {
        let sequential = SequentialSampler::new(None);
        let random = RandomSampler::new(None);
        assert!(matches!(sequential.iter(), Err(Error::MissingDataSource)));
        assert!(matches!(sequential.len(), Err(Error::MissingDataSource)));
        assert!(matches!(random.iter(), Err(Error::MissingDataSource)));
        assert!(matches!(random.len(), Err(Error::MissingDataSource)));
    }

    #[test]
    fn test_seeded_random_sampler_is_reproducible() -> Result<(), Error> {
        let data = vec![0u8; 32];
        let a = RandomSampler::with_seed(Some(&data), 7);
        let b = RandomSampler::with_seed(Some(&data), 7);
        let first: Vec<usize> = a.iter()?.collect();
        assert_eq!(first, b.iter()?.collect::<Vec<_>>());

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_loader_batches_and_drop_last() -> Result<(), Error> {
        let data = vec![0u8; 5];
        let loader = DataLoader::new(SequentialSampler::new(Some(&data)), 2, false)?;
        assert_eq!(loader.index_batches()?, vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert_eq!(loader.len()?, 3);

        let loader = DataLoader::new(SequentialSampler::new(Some(&data)), 2, true)?;
        assert_eq!(loader.index_batches()?, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(loader.len()?, 2);

        assert!(DataLoader::new(SequentialSampler::new(Some(&data)), 0, false).is_err());
        Ok(())
    }

    #[test]
    fn test_loader_epoch_gathers_tensors() -> Result<(), Error> {
        let x = Tensor::<CpuBackend>::from_vec(vec![1., 2., 3., 4.], &[4, 1], false)?;
        let y = Tensor::<CpuBackend>::from_vec(vec![0., 1., 0., 1.], &[4], false)?;
        let dataset = TensorDataset::new(x, y)?;
        let loader = DataLoader::new(SequentialSampler::new(Some(&dataset)), 3, false)?;
        let batches = loader.epoch(&dataset)?;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0.shape(), vec![3, 1]);
        assert_eq!(batches[1].1.to_vec()?, vec![1.0]);
        Ok(())
    }
}
