//! Hierarchical Risk Parity (López de Prado).
//!
//! 1. Correlation distance `d_ij = sqrt((1 - ρ_ij) / 2)`.
//! 2. Single-linkage agglomerative clustering into a dendrogram.
//! 3. Quasi-diagonal ordering: pre-order traversal of the dendrogram.
//! 4. Recursive bisection of the ordered list, splitting weight between the
//!    halves in inverse proportion to their inverse-variance-portfolio variance.

use super::mean_variance::quadratic_form;
use crate::error::{Result, StrataError};
use crate::returns::ReturnsCovariance;
use tracing::debug;

/// One agglomeration step. Merging clusters `left` and `right` creates the
/// cluster with id `n + step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
}

/// HRP allocator over a covariance and a correlation matrix.
#[derive(Debug, Clone)]
pub struct HierarchicalRiskParityOptimizer {
    covariance_matrix: Vec<Vec<f64>>,
    correlation_matrix: Vec<Vec<f64>>,
}

impl HierarchicalRiskParityOptimizer {
    pub fn new(covariance_matrix: Vec<Vec<f64>>, correlation_matrix: Vec<Vec<f64>>) -> Result<Self> {
        let n = covariance_matrix.len();
        if n == 0 {
            return Err(StrataError::InsufficientData(
                "Need at least one instrument for HRP".to_string(),
            ));
        }
        for (name, m) in [("Covariance", &covariance_matrix), ("Correlation", &correlation_matrix)] {
            if m.len() != n || m.iter().any(|row| row.len() != n) {
                return Err(StrataError::DimensionMismatch(format!(
                    "{} matrix must be {}x{}",
                    name, n, n
                )));
            }
        }
        if let Some(i) = (0..n).find(|&i| !(covariance_matrix[i][i] > 0.0)) {
            return Err(StrataError::InfeasibleOptimization(format!(
                "Instrument {} has zero variance; inverse-variance allocation undefined",
                i
            )));
        }

        Ok(Self {
            covariance_matrix,
            correlation_matrix,
        })
    }

    pub fn from_returns(returns: &ReturnsCovariance) -> Result<Self> {
        Self::new(returns.covariance.clone(), returns.correlation())
    }

    /// Compute the HRP weights, in instrument order.
    pub fn optimize(&self) -> Result<Vec<f64>> {
        let n = self.covariance_matrix.len();
        let merges = self.linkage();
        let order = quasi_diagonal_order(n, &merges);
        debug!("HRP leaf order: {:?}", order);

        let mut weights = vec![1.0; n];
        self.bisect(&order, &mut weights)?;

        let total: f64 = weights.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(StrataError::InfeasibleOptimization(
                "HRP produced no positive weight".to_string(),
            ));
        }
        Ok(weights.iter().map(|w| w / total).collect())
    }

    /// Correlation distance matrix.
    pub fn distance_matrix(&self) -> Vec<Vec<f64>> {
        let n = self.correlation_matrix.len();
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j {
                            0.0
                        } else {
                            ((1.0 - self.correlation_matrix[i][j]) / 2.0)
                                .clamp(0.0, 1.0)
                                .sqrt()
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Single-linkage dendrogram, `n - 1` merges.
    ///
    /// Among equally distant pairs the one with the lowest cluster ids wins.
    pub fn linkage(&self) -> Vec<Merge> {
        let n = self.correlation_matrix.len();
        let dist = self.distance_matrix();

        // (cluster id, member leaves), kept sorted by id
        let mut active: Vec<(usize, Vec<usize>)> = (0..n).map(|i| (i, vec![i])).collect();
        let mut merges = Vec::with_capacity(n.saturating_sub(1));

        while active.len() > 1 {
            let mut best = (0, 1, f64::INFINITY);
            for a in 0..active.len() {
                for b in (a + 1)..active.len() {
                    let d = active[a]
                        .1
                        .iter()
                        .flat_map(|&i| active[b].1.iter().map(move |&j| (i, j)))
                        .map(|(i, j)| dist[i][j])
                        .fold(f64::INFINITY, f64::min);
                    if d < best.2 {
                        best = (a, b, d);
                    }
                }
            }

            let (a, b, distance) = best;
            let (right_id, right_members) = active.remove(b);
            let (left_id, mut members) = active.remove(a);
            members.extend(right_members);

            merges.push(Merge {
                left: left_id,
                right: right_id,
                distance,
            });
            active.push((n + merges.len() - 1, members));
        }

        merges
    }

    fn bisect(&self, order: &[usize], weights: &mut [f64]) -> Result<()> {
        if order.len() <= 1 {
            return Ok(());
        }
        let mid = order.len() / 2;
        let (left, right) = order.split_at(mid);

        let v_left = self.cluster_variance(left);
        let v_right = self.cluster_variance(right);
        let total = v_left + v_right;
        if !(total > 0.0) || !total.is_finite() {
            return Err(StrataError::InfeasibleOptimization(
                "Cluster variances are not positive".to_string(),
            ));
        }
        let alpha = 1.0 - v_left / total;

        for &i in left {
            weights[i] *= alpha;
        }
        for &i in right {
            weights[i] *= 1.0 - alpha;
        }

        self.bisect(left, weights)?;
        self.bisect(right, weights)
    }

    /// Variance of the inverse-variance portfolio over `members`.
    fn cluster_variance(&self, members: &[usize]) -> f64 {
        let inv: Vec<f64> = members
            .iter()
            .map(|&i| 1.0 / self.covariance_matrix[i][i])
            .collect();
        let total: f64 = inv.iter().sum();
        let w: Vec<f64> = inv.iter().map(|v| v / total).collect();
        let sub: Vec<Vec<f64>> = members
            .iter()
            .map(|&i| members.iter().map(|&j| self.covariance_matrix[i][j]).collect())
            .collect();
        quadratic_form(&sub, &w)
    }
}

/// Leaves of the dendrogram in pre-order, left child first.
pub fn quasi_diagonal_order(n: usize, merges: &[Merge]) -> Vec<usize> {
    let Some(root) = (n + merges.len()).checked_sub(1) else {
        return Vec::new();
    };
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if id < n {
            order.push(id);
        } else {
            let m = merges[id - n];
            stack.push(m.right);
            stack.push(m.left);
        }
    }
    order
}
