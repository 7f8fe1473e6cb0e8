use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::debug;

use super::dataset::SpamDataset;
use crate::error::{Error, Result};

/// Shuffled row positions for a plain (unstratified) train/test split.
/// `ceil(test_size * rows)` rows go to the test side.
pub fn split_indices(rows: usize, test_size: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(Error::InvalidArgument(format!(
            "test size must be in (0, 1), got {test_size}"
        )));
    }

    let test_len = (test_size * rows as f64).ceil() as usize;
    if test_len == 0 || test_len >= rows {
        return Err(Error::InvalidArgument(format!(
            "cannot split {rows} rows with test size {test_size}"
        )));
    }

    let mut positions: Vec<usize> = (0..rows).collect();
    positions.shuffle(&mut StdRng::seed_from_u64(seed));

    let train = positions.split_off(test_len);
    debug!(train = train.len(), test = positions.len(), seed, "split rows");

    Ok((train, positions))
}

pub fn train_test_split(
    dataset: &SpamDataset,
    test_size: f64,
    seed: u64,
) -> Result<(SpamDataset, SpamDataset)> {
    let (train, test) = split_indices(dataset.len(), test_size, seed)?;
    Ok((dataset.select(&train), dataset.select(&test)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spam::dataset::parse;
    use std::collections::HashSet;

    #[test]
    fn test_side_is_ceiling_of_fraction() {
        for (rows, expected) in [(10, 2), (11, 3), (4601, 921), (5, 1)] {
            let (train, test) = split_indices(rows, 0.2, 42).unwrap();
            assert_eq!(test.len(), expected, "{rows} rows");
            assert_eq!(train.len() + test.len(), rows);
        }
    }

    #[test]
    fn split_is_disjoint_and_covering() {
        let (train, test) = split_indices(97, 0.2, 42).unwrap();

        let train: HashSet<_> = train.into_iter().collect();
        let test: HashSet<_> = test.into_iter().collect();

        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), 97);
        assert!(train.union(&test).all(|&i| i < 97));
    }

    #[test]
    fn same_seed_gives_same_assignment() {
        assert_eq!(split_indices(50, 0.2, 42).unwrap(), split_indices(50, 0.2, 42).unwrap());
        assert_ne!(split_indices(50, 0.2, 42).unwrap(), split_indices(50, 0.2, 7).unwrap());
    }

    #[test]
    fn degenerate_sizes_are_rejected() {
        assert!(split_indices(10, 0.0, 42).is_err());
        assert!(split_indices(10, 1.0, 42).is_err());
        assert!(split_indices(1, 0.2, 42).is_err());
    }

    #[test]
    fn dataset_split_carries_rows_with_their_labels() {
        let dataset = parse("x,spam\n0,0\n1,1\n2,0\n3,1\n4,0\n").unwrap();
        let (train, test) = train_test_split(&dataset, 0.2, 42).unwrap();

        assert_eq!(train.len(), 4);
        assert_eq!(test.len(), 1);
        for part in [&train, &test] {
            for (position, (&row, &label)) in part.index.iter().zip(&part.labels).enumerate() {
                assert_eq!(usize::from(label), row % 2);
                assert!((part.features[(position, 0)] - row as f64).abs() < f64::EPSILON);
            }
        }
    }
}
