//! Tree
//!
//! Histogram regression tree grown best-first on binned features, and
//! evaluated on raw feature values through the stored cut thresholds.
use crate::data::{JaggedMatrix, Matrix};
use crate::histogram::{update_histogram, NodeHistogram};
use crate::node::{Node, SplittableNode};
use crate::objective::ObjectiveFunction;
use crate::splitter::{NodeInfo, Splitter};
use crate::utils::pivot_on_split;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use std::fmt::{self, Display};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub depth: usize,
    pub n_leaves: usize,
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            nodes: Vec::new(),
            depth: 0,
            n_leaves: 0,
        }
    }

    /// Grow the tree on the gradients of the rows in `index`.
    ///
    /// * `objective` - Objective, consulted for leaf renewal.
    /// * `data` - Binned feature matrix.
    /// * `cuts` - Cut values the matrix was binned with.
    /// * `index` - Rows used to grow the tree.
    /// * `col_index` - Features eligible for splitting.
    /// * `grad` / `hess` - Gradient and optional hessian per row.
    /// * `y` / `yhat` - Target and current prediction per row.
    /// * `max_depth` - Nodes at this depth are not split further.
    #[allow(clippy::too_many_arguments)]
    pub fn fit<T: Splitter>(
        &mut self,
        objective: &dyn ObjectiveFunction,
        data: &Matrix<u16>,
        cuts: &JaggedMatrix<f64>,
        mut index: Vec<usize>,
        col_index: &[usize],
        grad: &[f32],
        hess: Option<&[f32]>,
        y: &[f64],
        yhat: &[f64],
        splitter: &T,
        max_depth: usize,
        parallel: bool,
    ) {
        self.nodes.clear();
        self.depth = 0;
        self.n_leaves = 0;
        let eta = splitter.get_eta();

        let mut root_hist = NodeHistogram::empty_from_cuts(cuts);
        update_histogram(&mut root_hist, data, grad, hess, &index, parallel);
        let root_info = node_info_for(&index, grad, hess);
        let mut root = SplittableNode::from_node_info(0, 0, 0, index.len(), &root_info, root_hist);
        self.nodes.push(root.as_node(eta));

        // (node number, start, stop) for every finalised leaf.
        let mut leaves: Vec<(usize, usize, usize)> = Vec::new();
        let mut growable = BinaryHeap::<SplittableNode>::new();

        if max_depth > 0 {
            root.set_best_split(splitter.best_split(&root, col_index));
        }
        if root.best_split.is_some() {
            growable.push(root);
        } else {
            leaves.push((root.num, root.start_idx, root.stop_idx));
        }

        while let Some(mut node) = growable.pop() {
            let split = match node.best_split.take() {
                Some(s) => s,
                None => {
                    leaves.push((node.num, node.start_idx, node.stop_idx));
                    continue;
                }
            };
            let mid = pivot_on_split(
                node.start_idx,
                node.stop_idx,
                &mut index,
                data.get_col(split.split_feature),
                split.split_bin,
            );

            let left_num = self.nodes.len();
            let right_num = left_num + 1;
            let depth = node.depth + 1;

            // Build the smaller child directly, the other one by subtraction.
            let left_is_smaller = (mid - node.start_idx) <= (node.stop_idx - mid);
            let mut small_hist = NodeHistogram::empty_from_cuts(cuts);
            let small_rows = if left_is_smaller {
                &index[node.start_idx..mid]
            } else {
                &index[mid..node.stop_idx]
            };
            update_histogram(&mut small_hist, data, grad, hess, small_rows, parallel);
            let mut large_hist = node.histogram.clone();
            large_hist.from_parent_child(&node.histogram, &small_hist);
            let (left_hist, right_hist) = if left_is_smaller {
                (small_hist, large_hist)
            } else {
                (large_hist, small_hist)
            };

            let left = SplittableNode::from_node_info(
                left_num,
                depth,
                node.start_idx,
                mid,
                &split.left_node,
                left_hist,
            );
            let right = SplittableNode::from_node_info(
                right_num,
                depth,
                mid,
                node.stop_idx,
                &split.right_node,
                right_hist,
            );
            self.nodes.push(left.as_node(eta));
            self.nodes.push(right.as_node(eta));
            self.nodes[node.num].make_parent_node(
                split.split_feature,
                split.split_value,
                split.split_gain,
                left_num,
                right_num,
            );
            self.depth = self.depth.max(depth);

            for mut child in [left, right] {
                if depth < max_depth {
                    child.set_best_split(splitter.best_split(&child, col_index));
                }
                if child.best_split.is_some() {
                    growable.push(child);
                } else {
                    leaves.push((child.num, child.start_idx, child.stop_idx));
                }
            }
        }

        for (num, start, stop) in &leaves {
            if let Some(v) = objective.leaf_value(y, yhat, &index[*start..*stop]) {
                self.nodes[*num].weight_value = v * f64::from(eta);
            }
        }
        self.n_leaves = leaves.len();
    }

    /// Number of the leaf a raw feature row lands in.
    pub fn leaf_index(&self, row: &[f64]) -> usize {
        let mut n = 0;
        let mut node = &self.nodes[n];
        while !node.is_leaf {
            n = node.get_child_idx(&row[node.split_feature]);
            node = &self.nodes[n];
        }
        n
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.nodes[self.leaf_index(row)].weight_value
    }

    pub fn predict(&self, data: &Matrix<f64>, parallel: bool) -> Vec<f64> {
        if parallel {
            (0..data.rows)
                .into_par_iter()
                .map(|i| self.predict_row(&data.get_row(i)))
                .collect()
        } else {
            (0..data.rows).map(|i| self.predict_row(&data.get_row(i))).collect()
        }
    }

    /// Numbers of all leaf nodes, in node order.
    pub fn leaf_nodes(&self) -> Vec<usize> {
        self.nodes.iter().filter(|n| n.is_leaf).map(|n| n.num).collect()
    }
}

fn node_info_for(index: &[usize], grad: &[f32], hess: Option<&[f32]>) -> NodeInfo {
    let grad_sum: f32 = index.iter().map(|i| grad[*i]).sum();
    let hess_sum: f32 = match hess {
        Some(h) => index.iter().map(|i| h[*i]).sum(),
        None => index.len() as f32,
    };
    NodeInfo::new(grad_sum, hess_sum, index.len())
}

impl Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut print_buffer: Vec<usize> = vec![0];
        let mut r = String::new();
        while let Some(idx) = print_buffer.pop() {
            let node = &self.nodes[idx];
            let indent = "      ".repeat(node.depth);
            if node.is_leaf {
                r += format!("{}{}:leaf={},cover={}\n", indent, node.num, node.weight_value, node.hessian_sum).as_str();
            } else {
                r += format!(
                    "{}{}:[{} < {}] yes={},no={},gain={}\n",
                    indent,
                    node.num,
                    node.split_feature,
                    node.split_value,
                    node.left_child,
                    node.right_child,
                    node.split_gain
                )
                .as_str();
                print_buffer.push(node.right_child);
                print_buffer.push(node.left_child);
            }
        }
        write!(f, "{}", r)
    }
}
