//! Binning
//!
//! Equal-frequency discretisation of raw features. Trees are grown on the
//! bin indices, while the cut values let fitted trees route raw rows.
use crate::data::{JaggedMatrix, Matrix};
use crate::errors::ConformalError;
use crate::utils::{map_bin, percentiles, validate_finite_features};

/// If there are fewer unique values than there are
/// percentiles, just return the unique values of the
/// vector.
fn percentiles_or_value(v: &[f64], sample_weight: &[f64], pcts: &[f64]) -> Vec<f64> {
    let mut v_u = v.to_owned();
    v_u.sort_unstable_by(|a, b| a.total_cmp(b));
    v_u.dedup();
    if v_u.len() <= pcts.len() + 1 {
        v_u
    } else {
        percentiles(v, sample_weight, pcts)
    }
}

// Cuts for a column are [p_0, p_1, ..., p_k, +inf], with p_0 the column
// minimum. A value v lands in bin `#{cuts <= v}`, so bin b >= 1 covers
// [cuts[b - 1], cuts[b]) and bin 0 only receives values below the training
// minimum (which can happen for unseen rows at predict time). Finite values,
// `f64::MAX` included, stay below the sentinel, so bins stay below `cuts.len()`.
#[derive(Debug)]
pub struct BinnedData {
    pub binned_data: Vec<u16>,
    pub cuts: JaggedMatrix<f64>,
    pub nunique: Vec<usize>,
}

/// Convert a matrix of data, into a binned matrix.
///
/// * `data` - Numeric data to be binned.
/// * `cuts` - Cut values for each of the columns.
pub fn bin_matrix_from_cuts(data: &Matrix<f64>, cuts: &JaggedMatrix<f64>) -> Vec<u16> {
    data.data
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let col = i / data.rows;
            map_bin(cuts.get_col(col), v)
        })
        .collect()
}

/// Bin a numeric matrix.
///
/// * `data` - A numeric matrix, of data to be binned.
/// * `sample_weight` - Instance weights for each row of the data.
/// * `nbins` - The number of bins each column should be binned into.
pub fn bin_matrix(data: &Matrix<f64>, sample_weight: Option<&[f64]>, nbins: u16) -> Result<BinnedData, ConformalError> {
    if nbins < 2 {
        return Err(ConformalError::InvalidParameter(
            "max_bin".to_string(),
            "at least 2".to_string(),
            nbins.to_string(),
        ));
    }
    validate_finite_features(data.data)?;

    let nbins_ = f64::from(nbins);
    let pcts: Vec<f64> = (0..nbins).map(|i| f64::from(i) / nbins_).collect();

    let s_w = vec![1.0; data.rows];
    let weight = sample_weight.unwrap_or(&s_w);

    let mut col_cuts_all = Vec::with_capacity(data.cols);
    let mut nunique = Vec::with_capacity(data.cols);
    for i in 0..data.cols {
        let mut col_cuts = percentiles_or_value(data.get_col(i), weight, &pcts);
        col_cuts.push(f64::INFINITY);
        col_cuts.dedup();
        nunique.push(col_cuts.len());
        col_cuts_all.push(col_cuts);
    }
    let cuts = JaggedMatrix::from_vecs(&col_cuts_all);
    let binned_data = bin_matrix_from_cuts(data, &cuts);

    Ok(BinnedData {
        binned_data,
        cuts,
        nunique,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::Rng;
    use rand::SeedableRng;

    #[test]
    fn test_bin_data() {
        let mut rng = StdRng::seed_from_u64(0);
        let n_rows = 500;
        let n_cols = 3;
        let data_vec: Vec<f64> = (0..(n_rows * n_cols)).map(|_| rng.gen::<f64>() * 10.0).collect();
        let data = Matrix::new(&data_vec, n_rows, n_cols);
        let b = bin_matrix(&data, None, 10).unwrap();
        let bdata = Matrix::new(&b.binned_data, data.rows, data.cols);
        for column in 0..data.cols {
            let mut b_compare = 1;
            for cuts in b.cuts.get_col(column).windows(2) {
                let c1 = cuts[0];
                let c2 = cuts[1];
                let mut n_v = 0;
                let mut n_b = 0;
                for (bin, value) in bdata.get_col(column).iter().zip(data.get_col(column)) {
                    if *bin == b_compare {
                        n_b += 1;
                    }
                    if (c1 <= *value) && (*value < c2) {
                        n_v += 1;
                    }
                }
                assert_eq!(n_v, n_b);
                b_compare += 1;
            }
            // Every training value is at or above the first cut.
            assert!(bdata.get_col(column).iter().all(|b| *b >= 1));
        }
    }

    #[test]
    fn test_bin_data_few_unique() {
        let data_vec = vec![1.0, 2.0, 1.0, 2.0, 3.0, 3.0];
        let data = Matrix::new(&data_vec, 6, 1);
        let b = bin_matrix(&data, None, 10).unwrap();
        assert_eq!(b.cuts.get_col(0), &[1.0, 2.0, 3.0, f64::INFINITY]);
        assert_eq!(b.binned_data, vec![1, 2, 1, 2, 3, 3]);
    }

    #[test]
    fn test_bin_data_extreme_values() {
        let data_vec = vec![f64::MAX, 0.0, f64::MAX, -f64::MAX, 1.0, f64::MAX];
        let data = Matrix::new(&data_vec, 6, 1);
        let b = bin_matrix(&data, None, 4).unwrap();
        let n_cuts = b.cuts.get_col(0).len();
        assert_eq!(b.cuts.get_col(0).last(), Some(&f64::INFINITY));
        assert!(b.binned_data.iter().all(|v| usize::from(*v) < n_cuts));
        assert_eq!(usize::from(b.binned_data[0]), n_cuts - 1);
        assert_eq!(b.binned_data[3], 1);
    }

    #[test]
    fn test_bin_data_rejects_non_finite() {
        let data_vec = vec![1.0, f64::NAN, 3.0];
        let data = Matrix::new(&data_vec, 3, 1);
        assert!(matches!(
            bin_matrix(&data, None, 10),
            Err(ConformalError::InvalidArgument(_))
        ));
    }
}
