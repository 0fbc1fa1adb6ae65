//! Histogram
//!
//! Histograms store aggregated gradient and hessian statistics for each bin
//! of each feature, and are what the splitter scans for the best split.
use crate::data::{JaggedMatrix, Matrix};
use rayon::prelude::*;

/// Struct to hold the information of a given bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    /// The bin number or index.
    pub num: u16,
    /// Lower edge of the bin in raw feature units (NaN for bin 0).
    pub cut_value: f64,
    pub gradient_sum: f32,
    pub hessian_sum: f32,
    pub counts: u32,
}

impl Bin {
    /// Create an empty bin.
    pub fn empty(num: u16, cut_value: f64) -> Self {
        Bin {
            num,
            cut_value,
            gradient_sum: 0.0,
            hessian_sum: 0.0,
            counts: 0,
        }
    }

    /// Set this bin to `root - child`.
    pub fn from_parent_child(&mut self, root: &Bin, child: &Bin) {
        self.gradient_sum = root.gradient_sum - child.gradient_sum;
        self.hessian_sum = root.hessian_sum - child.hessian_sum;
        self.counts = root.counts - child.counts;
    }
}

/// Histogram for a single feature.
#[derive(Debug, Clone)]
pub struct FeatureHistogram {
    pub data: Vec<Bin>,
}

impl FeatureHistogram {
    /// Create an empty histogram from cut points. Bin `b >= 1` starts at `cuts[b - 1]`.
    pub fn empty_from_cuts(cuts: &[f64]) -> Self {
        let mut histogram: Vec<Bin> = Vec::with_capacity(cuts.len());
        histogram.push(Bin::empty(0, f64::NAN));
        histogram.extend(
            cuts[..(cuts.len() - 1)]
                .iter()
                .enumerate()
                .map(|(it, c)| Bin::empty(it as u16 + 1, *c)),
        );
        FeatureHistogram { data: histogram }
    }

    fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| {
            b.gradient_sum = 0.0;
            b.hessian_sum = 0.0;
            b.counts = 0;
        });
    }

    /// Accumulate the gradients of the rows in `index` into the bins.
    ///
    /// * `feature` - Bin indices of this feature for every row.
    /// * `grad` - Gradient for every row.
    /// * `hess` - Hessian for every row, `None` for a constant hessian of one.
    pub fn update(&mut self, feature: &[u16], grad: &[f32], hess: Option<&[f32]>, index: &[usize]) {
        self.clear();
        match hess {
            Some(hess) => {
                for &i in index {
                    let bin = &mut self.data[feature[i] as usize];
                    bin.gradient_sum += grad[i];
                    bin.hessian_sum += hess[i];
                    bin.counts += 1;
                }
            }
            None => {
                for &i in index {
                    let bin = &mut self.data[feature[i] as usize];
                    bin.gradient_sum += grad[i];
                    bin.hessian_sum += 1.0;
                    bin.counts += 1;
                }
            }
        }
    }
}

/// Histograms of all features for a single node.
#[derive(Debug, Clone)]
pub struct NodeHistogram {
    pub data: Vec<FeatureHistogram>,
}

impl NodeHistogram {
    pub fn empty_from_cuts(cuts: &JaggedMatrix<f64>) -> Self {
        let data = (0..cuts.cols)
            .map(|col| FeatureHistogram::empty_from_cuts(cuts.get_col(col)))
            .collect();
        NodeHistogram { data }
    }

    /// Fill this histogram as `root - child`, the sibling of `child`.
    pub fn from_parent_child(&mut self, root: &NodeHistogram, child: &NodeHistogram) {
        for ((update, r), c) in self.data.iter_mut().zip(root.data.iter()).zip(child.data.iter()) {
            for ((ub, rb), cb) in update.data.iter_mut().zip(r.data.iter()).zip(c.data.iter()) {
                ub.from_parent_child(rb, cb);
            }
        }
    }
}

/// Update every feature histogram of a node.
///
/// * `hist` - The node histogram to fill.
/// * `data` - Binned feature matrix.
/// * `grad` - Gradient for every row.
/// * `hess` - Optional hessian for every row.
/// * `index` - Rows that belong to the node.
/// * `parallel` - Build the feature histograms on the rayon pool.
pub fn update_histogram(
    hist: &mut NodeHistogram,
    data: &Matrix<u16>,
    grad: &[f32],
    hess: Option<&[f32]>,
    index: &[usize],
    parallel: bool,
) {
    if parallel {
        hist.data
            .par_iter_mut()
            .enumerate()
            .for_each(|(col, h)| h.update(data.get_col(col), grad, hess, index));
    } else {
        hist.data
            .iter_mut()
            .enumerate()
            .for_each(|(col, h)| h.update(data.get_col(col), grad, hess, index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::bin_matrix;

    #[test]
    fn test_single_histogram() {
        let data_vec = vec![1.0, 2.0, 1.0, 3.0, 2.0, 1.0];
        let data = Matrix::new(&data_vec, 6, 1);
        let b = bin_matrix(&data, None, 10).unwrap();
        let bdata = Matrix::new(&b.binned_data, data.rows, data.cols);
        let grad = vec![1.0, -2.0, 0.5, 3.0, 1.0, 0.5];
        let index: Vec<usize> = (0..6).collect();

        let mut hist = NodeHistogram::empty_from_cuts(&b.cuts);
        update_histogram(&mut hist, &bdata, &grad, None, &index, false);

        let bins = &hist.data[0].data;
        // Bin 0 is reserved for values below the first cut.
        assert_eq!(bins[0].counts, 0);
        assert_eq!(bins[1].counts, 3);
        assert_eq!(bins[1].gradient_sum, 2.0);
        assert_eq!(bins[2].counts, 2);
        assert_eq!(bins[2].gradient_sum, -1.0);
        assert_eq!(bins[3].counts, 1);
        assert_eq!(bins[3].cut_value, 3.0);

        let total: u32 = bins.iter().map(|b| b.counts).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_parent_child_subtraction() {
        let data_vec = vec![1.0, 2.0, 1.0, 3.0, 2.0, 1.0];
        let data = Matrix::new(&data_vec, 6, 1);
        let b = bin_matrix(&data, None, 10).unwrap();
        let bdata = Matrix::new(&b.binned_data, data.rows, data.cols);
        let grad = vec![1.0, -2.0, 0.5, 3.0, 1.0, 0.5];

        let mut root = NodeHistogram::empty_from_cuts(&b.cuts);
        update_histogram(&mut root, &bdata, &grad, None, &[0, 1, 2, 3, 4, 5], true);
        let mut left = NodeHistogram::empty_from_cuts(&b.cuts);
        update_histogram(&mut left, &bdata, &grad, None, &[0, 2, 5], true);
        let mut right_direct = NodeHistogram::empty_from_cuts(&b.cuts);
        update_histogram(&mut right_direct, &bdata, &grad, None, &[1, 3, 4], true);

        let mut right = NodeHistogram::empty_from_cuts(&b.cuts);
        right.from_parent_child(&root, &left);
        for (r, d) in right.data[0].data.iter().zip(right_direct.data[0].data.iter()) {
            assert_eq!(r.counts, d.counts);
            assert_eq!(r.gradient_sum, d.gradient_sum);
            assert_eq!(r.hessian_sum, d.hessian_sum);
        }
    }
}
