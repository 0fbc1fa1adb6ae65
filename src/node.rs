use crate::histogram::NodeHistogram;
use crate::splitter::{NodeInfo, SplitInfo};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A node that is still a candidate for splitting while a tree is grown.
#[derive(Debug)]
pub struct SplittableNode {
    pub num: usize,
    pub weight_value: f32,
    pub gain_value: f32,
    pub gradient_sum: f32,
    pub hessian_sum: f32,
    pub counts_sum: usize,
    pub depth: usize,
    pub start_idx: usize,
    pub stop_idx: usize,
    /// Gain of the best split found for this node, used to order the heap.
    pub split_gain: f32,
    pub best_split: Option<SplitInfo>,
    pub histogram: NodeHistogram,
}

/// A finalised tree node.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Node {
    pub num: usize,
    pub weight_value: f64,
    pub hessian_sum: f32,
    pub counts: usize,
    pub depth: usize,
    pub split_value: f64,
    pub split_feature: usize,
    pub split_gain: f32,
    pub left_child: usize,
    pub right_child: usize,
    pub is_leaf: bool,
}

impl Ord for SplittableNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.split_gain.total_cmp(&other.split_gain)
    }
}

impl PartialOrd for SplittableNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SplittableNode {
    fn eq(&self, other: &Self) -> bool {
        self.split_gain == other.split_gain
    }
}

impl Eq for SplittableNode {}

impl SplittableNode {
    #[allow(clippy::too_many_arguments)]
    pub fn from_node_info(
        num: usize,
        depth: usize,
        start_idx: usize,
        stop_idx: usize,
        node_info: &NodeInfo,
        histogram: NodeHistogram,
    ) -> Self {
        SplittableNode {
            num,
            weight_value: node_info.weight,
            gain_value: node_info.gain,
            gradient_sum: node_info.grad,
            hessian_sum: node_info.cover,
            counts_sum: node_info.counts,
            depth,
            start_idx,
            stop_idx,
            split_gain: f32::NEG_INFINITY,
            best_split: None,
            histogram,
        }
    }

    /// Record the best split for this node.
    pub fn set_best_split(&mut self, split: Option<SplitInfo>) {
        self.split_gain = split.as_ref().map_or(f32::NEG_INFINITY, |s| s.split_gain);
        self.best_split = split;
    }

    /// Convert into a leaf node, scaling the Newton weight by `eta`.
    pub fn as_node(&self, eta: f32) -> Node {
        Node {
            num: self.num,
            weight_value: f64::from(self.weight_value * eta),
            hessian_sum: self.hessian_sum,
            counts: self.counts_sum,
            depth: self.depth,
            split_value: 0.0,
            split_feature: 0,
            split_gain: 0.0,
            left_child: 0,
            right_child: 0,
            is_leaf: true,
        }
    }
}

impl Node {
    /// Turn a leaf into a parent node.
    pub fn make_parent_node(&mut self, split_feature: usize, split_value: f64, split_gain: f32, left: usize, right: usize) {
        self.is_leaf = false;
        self.split_feature = split_feature;
        self.split_value = split_value;
        self.split_gain = split_gain;
        self.left_child = left;
        self.right_child = right;
    }

    /// Get the path that should be traveled down, given a value.
    #[inline]
    pub fn get_child_idx(&self, v: &f64) -> usize {
        if v < &self.split_value {
            self.left_child
        } else {
            self.right_child
        }
    }
}
