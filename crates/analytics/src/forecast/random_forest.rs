//! Bagged regression trees for point forecasting
//!
//! Classic random-forest regression: each tree fits a bootstrap resample
//! of the training rows, splits greedily on the feature/threshold pair
//! with the largest variance reduction, and the ensemble prediction is
//! the mean of the per-tree leaf means. Split search sweeps each feature
//! in sorted order with running sums, so every candidate threshold is
//! evaluated in one pass.
//!
//! Feature importances accumulate the variance reduction of every split,
//! normalized to sum to one across features.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        prediction: f64,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { prediction } => return *prediction,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { left } else { right };
                }
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Sum of child SSEs; lower is better
    cost: f64,
    /// Parent SSE minus `cost`, credited to the feature's importance
    reduction: f64,
}

struct TreeBuilder<'a> {
    features: &'a [Vec<f64>],
    targets: &'a [f64],
    max_depth: usize,
    min_leaf: usize,
    importances: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, samples: &[usize], depth: usize) -> Node {
        let (mean, sse) = mean_and_sse(self.targets, samples);
        if depth >= self.max_depth || samples.len() < 2 * self.min_leaf || sse <= 0.0 {
            return Node::Leaf { prediction: mean };
        }

        let best = match self.best_split(samples, sse) {
            Some(split) => split,
            None => return Node::Leaf { prediction: mean },
        };
        self.importances[best.feature] += best.reduction;

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.features[i][best.feature] < best.threshold);

        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.build(&left, depth + 1)),
            right: Box::new(self.build(&right, depth + 1)),
        }
    }

    /// Best variance-reducing split across all features, or `None` when
    /// every feature is constant over `samples`.
    fn best_split(&self, samples: &[usize], parent_sse: f64) -> Option<SplitCandidate> {
        let width = self.features[0].len();
        let mut best: Option<SplitCandidate> = None;

        let mut order: Vec<usize> = samples.to_vec();
        for feature in 0..width {
            order.sort_by(|&a, &b| {
                self.features[a][feature]
                    .partial_cmp(&self.features[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            // One sweep evaluates every split position via running sums
            let total_sum: f64 = order.iter().map(|&i| self.targets[i]).sum();
            let total_sq: f64 = order.iter().map(|&i| self.targets[i].powi(2)).sum();
            let n = order.len() as f64;

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 1..order.len() {
                let prev = order[k - 1];
                left_sum += self.targets[prev];
                left_sq += self.targets[prev].powi(2);

                let lo = self.features[prev][feature];
                let hi = self.features[order[k]][feature];
                if lo == hi || k < self.min_leaf || order.len() - k < self.min_leaf {
                    continue;
                }

                let left_n = k as f64;
                let right_n = n - left_n;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let cost = (left_sq - left_sum.powi(2) / left_n)
                    + (right_sq - right_sum.powi(2) / right_n);

                if best.as_ref().map_or(true, |b| cost < b.cost) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (lo + hi) / 2.0,
                        cost,
                        reduction: (parent_sse - cost).max(0.0),
                    });
                }
            }
        }
        best
    }
}

/// Ensemble of bootstrap-trained regression trees
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl RandomForestRegressor {
    /// Train an ensemble on row-major features and parallel targets.
    ///
    /// The seed fixes bootstrap sampling, so training is deterministic
    /// for identical input.
    pub fn fit(
        features: &[Vec<f64>],
        targets: &[f64],
        tree_count: usize,
        max_depth: usize,
        min_leaf: usize,
        seed: u64,
    ) -> AnalysisResult<Self> {
        if features.is_empty() || features.len() != targets.len() {
            return Err(AnalysisError::Model(format!(
                "cannot fit forest on {} feature rows and {} targets",
                features.len(),
                targets.len()
            )));
        }

        let n = features.len();
        let width = features[0].len();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut builder = TreeBuilder {
            features,
            targets,
            max_depth,
            min_leaf: min_leaf.max(1),
            importances: vec![0.0; width],
        };

        let mut trees = Vec::with_capacity(tree_count);
        for _ in 0..tree_count {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(RegressionTree {
                root: builder.build(&bootstrap, 0),
            });
        }

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for importance in importances.iter_mut() {
                *importance /= total;
            }
        }

        Ok(Self { trees, importances })
    }

    /// Ensemble mean prediction for one feature row
    pub fn predict(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// Normalized per-feature importance; sums to 1 when any split occurred
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

fn mean_and_sse(targets: &[f64], samples: &[usize]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let sum: f64 = samples.iter().map(|&i| targets[i]).sum();
    let mean = sum / n;
    let sse: f64 = samples.iter().map(|&i| (targets[i] - mean).powi(2)).sum();
    (mean, sse)
}
