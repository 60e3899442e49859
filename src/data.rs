// src/data.rs
use crate::{Backend, Error, Tensor};

#[cfg(feature = "csv")]
use csv::ReaderBuilder;
#[cfg(feature = "csv")]
use std::path::Path;

/// Anything with a known number of samples that a sampler can index.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Dataset for [T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }
}

impl<T> Dataset for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }
}

/// Features and targets paired along axis 0.
pub struct TensorDataset<B: Backend> {
    features: Tensor<B>,
    targets: Tensor<B>,
}

/// Number of scalars in one sample (product of all axes but the first).
fn row_width(shape: &[usize]) -> usize {
    shape[1..].iter().product()
}

impl<B: Backend> TensorDataset<B> {
    pub fn new(features: Tensor<B>, targets: Tensor<B>) -> Result<Self, Error> {
        let x_shape = features.shape();
        let y_shape = targets.shape();
        if x_shape.is_empty() || y_shape.is_empty() {
            return Err(Error::ShapeError(
                "TensorDataset needs tensors with a sample axis".to_string(),
            ));
        }
        if x_shape[0] != y_shape[0] {
            return Err(Error::ShapeMismatch {
                expected: vec![x_shape[0]],
                actual: vec![y_shape[0]],
            });
        }
        Ok(Self { features, targets })
    }

    pub fn features(&self) -> &Tensor<B> {
        &self.features
    }

    pub fn targets(&self) -> &Tensor<B> {
        &self.targets
    }

    /// Copies the rows at `indices` into a new (features, targets) pair.
    pub fn get_batch(&self, indices: &[usize]) -> Result<(Tensor<B>, Tensor<B>), Error> {
        Ok((
            gather_rows(&self.features, indices)?,
            gather_rows(&self.targets, indices)?,
        ))
    }
}

impl<B: Backend> Dataset for TensorDataset<B> {
    fn len(&self) -> usize {
        self.features.shape()[0]
    }
}

fn gather_rows<B: Backend>(source: &Tensor<B>, indices: &[usize]) -> Result<Tensor<B>, Error> {
    let shape = source.shape();
    let num_samples = shape[0];
    let width = row_width(&shape);
    let data = source.to_vec()?;

    let mut batch = Vec::with_capacity(indices.len() * width);
    for &idx in indices {
        if idx >= num_samples {
            return Err(Error::InvalidOperation(format!(
                "Sample index {} out of range for {} samples",
                idx, num_samples
            )));
        }
        batch.extend_from_slice(&data[idx * width..(idx + 1) * width]);
    }

    let mut batch_shape = shape;
    batch_shape[0] = indices.len();
    Ok(Tensor::new(B::from_vec(batch, &batch_shape)?, false))
}

/// How [`load_csv`] interprets a file.
#[cfg(feature = "csv")]
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub has_headers: bool,
    /// Every feature is multiplied by this value.
    pub feature_scale: f32,
    /// One-hot encode integer labels into this many classes; raw labels otherwise.
    pub num_classes: Option<usize>,
}

#[cfg(feature = "csv")]
impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_headers: false,
            feature_scale: 1.0,
            num_classes: None,
        }
    }
}

/// Loads a CSV file whose first column is the label and whose remaining
/// columns are features.
///
/// Returns `([N, F], [N, K])` with `K = num_classes` when one-hot encoding,
/// or `([N, F], [N, 1])` with the raw labels otherwise.
#[cfg(feature = "csv")]
pub fn load_csv<B: Backend, P: AsRef<Path>>(
    path: P,
    options: &CsvOptions,
) -> Result<TensorDataset<B>, Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(options.has_headers)
        .from_path(path)?;

    let mut features_flat = Vec::new();
    let mut labels = Vec::new();
    let mut num_features: Option<usize> = None;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;

        let label_str = record.get(0).ok_or_else(|| {
            Error::InvalidOperation(format!("Missing label column at row {}", row_idx))
        })?;
        let label = label_str.trim().parse::<f32>().map_err(|e| {
            Error::InvalidOperation(format!(
                "Invalid label format at row {}: '{}' - {}",
                row_idx, label_str, e
            ))
        })?;
        if let Some(num_classes) = options.num_classes {
            if !(0.0..num_classes as f32).contains(&label) || label.fract() != 0.0 {
                return Err(Error::InvalidOperation(format!(
                    "Invalid label value at row {}: {}. Expected integer 0-{}.",
                    row_idx,
                    label,
                    num_classes - 1
                )));
            }
        }
        labels.push(label);

        let current_features: Vec<f32> = record
            .iter()
            .skip(1)
            .enumerate()
            .map(|(col_idx, s)| {
                s.trim()
                    .parse::<f32>()
                    .map(|v| v * options.feature_scale)
                    .map_err(|e| {
                        Error::InvalidOperation(format!(
                            "Invalid feature format at row {}, column {}: '{}' - {}",
                            row_idx,
                            col_idx + 1,
                            s,
                            e
                        ))
                    })
            })
            .collect::<Result<_, _>>()?;

        match num_features {
            None => num_features = Some(current_features.len()),
            Some(n_feat) if current_features.len() != n_feat => {
                return Err(Error::InvalidOperation(format!(
                    "Inconsistent number of features at row {}. Expected {}, found {}",
                    row_idx,
                    n_feat,
                    current_features.len()
                )));
            }
            Some(_) => {}
        }
        features_flat.extend(current_features);
    }

    let num_samples = labels.len();
    let x_storage = B::from_vec(features_flat, &[num_samples, num_features.unwrap_or(0)])?;
    let y_storage = match options.num_classes {
        Some(num_classes) => {
            let mut one_hot = vec![0.0; num_samples * num_classes];
            for (i, &label) in labels.iter().enumerate() {
                one_hot[i * num_classes + label as usize] = 1.0;
            }
            B::from_vec(one_hot, &[num_samples, num_classes])?
        }
        None => B::from_vec(labels, &[num_samples, 1])?,
    };

    TensorDataset::new(Tensor::new(x_storage, false), Tensor::new(y_storage, false))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;

    fn dataset() -> Result<TensorDataset<CpuBackend>, Error> {
        let x = Tensor::from_vec(vec![1., 2., 3., 4., 5., 6.], &[3, 2], false)?;
        let y = Tensor::from_vec(vec![10., 20., 30.], &[3], false)?;
        TensorDataset::new(x, y)
    }

    #[test]
    fn test_get_batch_gathers_rows() -> Result<(), Error> {
        let data = dataset()?;
        assert_eq!(data.len(), 3);
        let (bx, by) = data.get_batch(&[2, 0])?;
        assert_eq!(bx.shape(), vec![2, 2]);
        assert_eq!(bx.to_vec()?, vec![5., 6., 1., 2.]);
        assert_eq!(by.to_vec()?, vec![30., 10.]);
        Ok(())
    }

    #[test]
    fn test_get_batch_out_of_range() -> Result<(), Error> {
        let data = dataset()?;
        assert!(matches!(
            data.get_batch(&[3]),
            Err(Error::InvalidOperation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_sample_count_mismatch() -> Result<(), Error> {
        let x = Tensor::<CpuBackend>::zeros(&[3, 2], false)?;
        let y = Tensor::<CpuBackend>::zeros(&[2], false)?;
        assert!(matches!(
            TensorDataset::new(x, y),
            Err(Error::ShapeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_slices_are_datasets() {
        let items = vec![1u8, 2, 3];
        assert_eq!(Dataset::len(&items), 3);
        assert!(!Dataset::is_empty(items.as_slice()));
    }
}
