//! Splitter
//!
//! Scans node histograms for the split with the largest gain.
use crate::histogram::NodeHistogram;
use crate::node::SplittableNode;
use crate::utils::{gain, weight};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeInfo {
    pub gain: f32,
    pub grad: f32,
    pub cover: f32,
    pub counts: usize,
    pub weight: f32,
}

impl NodeInfo {
    pub fn new(grad: f32, cover: f32, counts: usize) -> Self {
        NodeInfo {
            gain: gain(grad, cover),
            grad,
            cover,
            counts,
            weight: weight(grad, cover),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitInfo {
    pub split_gain: f32,
    pub split_feature: usize,
    /// Raw feature threshold: rows with `value < split_value` go left.
    pub split_value: f64,
    /// Binned threshold: rows with `bin < split_bin` go left.
    pub split_bin: u16,
    pub left_node: NodeInfo,
    pub right_node: NodeInfo,
}

pub trait Splitter {
    /// Shrinkage applied to leaf weights.
    fn get_eta(&self) -> f32;

    /// Find the best possible split, considering all feature histograms.
    /// Returns `None` when no split improves on the parent.
    fn best_split(&self, node: &SplittableNode, col_index: &[usize]) -> Option<SplitInfo> {
        let mut best: Option<SplitInfo> = None;
        for &feature in col_index {
            if let Some(split) = self.best_feature_split(node, &node.histogram, feature) {
                if best.as_ref().map_or(true, |b| split.split_gain > b.split_gain) {
                    best = Some(split);
                }
            }
        }
        best
    }

    /// Find the best split for a single feature.
    fn best_feature_split(&self, node: &SplittableNode, histogram: &NodeHistogram, feature: usize) -> Option<SplitInfo>;
}

/// Binary splitter honouring a minimum number of rows per child.
pub struct HistogramSplitter {
    pub eta: f32,
    pub min_leaf_size: usize,
}

impl Splitter for HistogramSplitter {
    fn get_eta(&self) -> f32 {
        self.eta
    }

    fn best_feature_split(&self, node: &SplittableNode, histogram: &NodeHistogram, feature: usize) -> Option<SplitInfo> {
        let bins = &histogram.data[feature].data;
        let mut best: Option<SplitInfo> = None;

        let mut left_grad = 0.0_f32;
        let mut left_hess = 0.0_f32;
        let mut left_counts = 0_usize;

        // Splitting at bin b sends bins [0, b) left.
        for b in 1..bins.len() {
            let prev = &bins[b - 1];
            left_grad += prev.gradient_sum;
            left_hess += prev.hessian_sum;
            left_counts += prev.counts as usize;

            let right_counts = node.counts_sum - left_counts;
            if left_counts < self.min_leaf_size || right_counts < self.min_leaf_size {
                continue;
            }
            let left_node = NodeInfo::new(left_grad, left_hess, left_counts);
            let right_node = NodeInfo::new(
                node.gradient_sum - left_grad,
                node.hessian_sum - left_hess,
                right_counts,
            );
            let split_gain = left_node.gain + right_node.gain - node.gain_value;
            if split_gain <= 0.0 || !split_gain.is_finite() {
                continue;
            }
            if best.as_ref().map_or(true, |s| split_gain > s.split_gain) {
                best = Some(SplitInfo {
                    split_gain,
                    split_feature: feature,
                    split_value: bins[b].cut_value,
                    split_bin: bins[b].num,
                    left_node,
                    right_node,
                });
            }
        }
        best
    }
}
