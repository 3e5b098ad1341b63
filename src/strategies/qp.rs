//! Dense quadratic programs solved with Clarabel.
//!
//! Solves `minimize 0.5 x'Px + q'x` subject to `A_eq x = b_eq` and
//! `A_in x <= b_in`. All strategy solvers (mean-variance problems and the
//! risk parity SQP sub-problems) go through this one entry point.

use crate::error::{Result, StrataError};
use tracing::trace;

/// Entries below this magnitude are dropped from the sparse matrices.
const SPARSITY_EPS: f64 = 1e-14;

/// A dense quadratic program with linear equality and inequality constraints.
#[derive(Debug, Clone)]
pub struct QuadraticProgram {
    pub p: Vec<Vec<f64>>,
    pub q: Vec<f64>,
    pub eq_rows: Vec<Vec<f64>>,
    pub eq_rhs: Vec<f64>,
    pub ineq_rows: Vec<Vec<f64>>,
    pub ineq_rhs: Vec<f64>,
}

impl QuadraticProgram {
    /// Program over `n` variables with the given quadratic and linear terms.
    pub fn new(p: Vec<Vec<f64>>, q: Vec<f64>) -> Self {
        Self {
            p,
            q,
            eq_rows: Vec::new(),
            eq_rhs: Vec::new(),
            ineq_rows: Vec::new(),
            ineq_rhs: Vec::new(),
        }
    }

    pub fn n(&self) -> usize {
        self.q.len()
    }

    /// Add `row' x = rhs`.
    pub fn equality(mut self, row: Vec<f64>, rhs: f64) -> Self {
        self.eq_rows.push(row);
        self.eq_rhs.push(rhs);
        self
    }

    /// Add `row' x <= rhs`.
    pub fn inequality(mut self, row: Vec<f64>, rhs: f64) -> Self {
        self.ineq_rows.push(row);
        self.ineq_rhs.push(rhs);
        self
    }

    /// Add `lower_i <= x_i <= upper_i` for every variable.
    pub fn bounds(mut self, lower: &[f64], upper: &[f64]) -> Self {
        let n = self.n();
        for i in 0..n {
            let mut row = vec![0.0; n];
            row[i] = -1.0;
            self.ineq_rows.push(row);
            self.ineq_rhs.push(-lower[i]);
        }
        for i in 0..n {
            let mut row = vec![0.0; n];
            row[i] = 1.0;
            self.ineq_rows.push(row);
            self.ineq_rhs.push(upper[i]);
        }
        self
    }

    /// Solve the program, returning the primal solution.
    ///
    /// Any terminal status other than solved is reported as
    /// [`StrataError::InfeasibleOptimization`].
    pub fn solve(&self, max_iter: u32) -> Result<Vec<f64>> {
        use clarabel::algebra::*;
        use clarabel::solver::*;

        let n = self.n();
        if self.p.len() != n || self.p.iter().any(|row| row.len() != n) {
            return Err(StrataError::DimensionMismatch(format!(
                "Quadratic term must be {}x{}",
                n, n
            )));
        }

        // Upper triangle of P, column by column
        let mut p_data = Vec::new();
        let mut p_indices = Vec::new();
        let mut p_indptr = vec![0];
        for j in 0..n {
            for i in 0..=j {
                let val = 0.5 * (self.p[i][j] + self.p[j][i]);
                if val.abs() > SPARSITY_EPS {
                    p_data.push(val);
                    p_indices.push(i);
                }
            }
            p_indptr.push(p_data.len());
        }
        let p = CscMatrix::new(n, n, p_indptr, p_indices, p_data);

        // Stack [A_eq; A_in] in CSC format
        let rows: Vec<&Vec<f64>> = self.eq_rows.iter().chain(self.ineq_rows.iter()).collect();
        let m = rows.len();
        let mut a_data = Vec::new();
        let mut a_indices = Vec::new();
        let mut a_indptr = vec![0];
        for j in 0..n {
            for (i, row) in rows.iter().enumerate() {
                let val = row[j];
                if val.abs() > SPARSITY_EPS {
                    a_data.push(val);
                    a_indices.push(i);
                }
            }
            a_indptr.push(a_data.len());
        }
        let a = CscMatrix::new(m, n, a_indptr, a_indices, a_data);

        let b: Vec<f64> = self
            .eq_rhs
            .iter()
            .chain(self.ineq_rhs.iter())
            .copied()
            .collect();

        let mut cones = Vec::with_capacity(2);
        if !self.eq_rows.is_empty() {
            cones.push(ZeroConeT(self.eq_rows.len()));
        }
        if !self.ineq_rows.is_empty() {
            cones.push(NonnegativeConeT(self.ineq_rows.len()));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(max_iter)
            .verbose(false)
            .build()
            .map_err(|e| {
                StrataError::InfeasibleOptimization(format!("Failed to build settings: {}", e))
            })?;

        let mut solver = DefaultSolver::new(&p, &self.q, &a, &b, &cones, settings).map_err(|e| {
            StrataError::InfeasibleOptimization(format!("Failed to create solver: {:?}", e))
        })?;

        solver.solve();

        trace!(
            "QP with {} variables and {} constraints finished: {:?}",
            n,
            m,
            solver.solution.status
        );

        if !matches!(
            solver.solution.status,
            SolverStatus::Solved | SolverStatus::AlmostSolved
        ) {
            return Err(StrataError::InfeasibleOptimization(format!(
                "Solver finished with status: {:?}",
                solver.solution.status
            )));
        }

        let x = solver.solution.x.clone();
        if x.iter().any(|v| !v.is_finite()) {
            return Err(StrataError::InfeasibleOptimization(
                "Solver returned a non-finite solution".to_string(),
            ));
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_constrained_projection() {
        // minimize 0.5 (x - 2)^2 with x in [0, 1] -> x = 1
        let qp = QuadraticProgram::new(vec![vec![1.0]], vec![-2.0]).bounds(&[0.0], &[1.0]);
        let x = qp.solve(100).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_equality_constrained_minimum() {
        // minimize x1^2 + x2^2 subject to x1 + x2 = 1 -> (0.5, 0.5)
        let qp = QuadraticProgram::new(vec![vec![2.0, 0.0], vec![0.0, 2.0]], vec![0.0, 0.0])
            .equality(vec![1.0, 1.0], 1.0);
        let x = qp.solve(100).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-6);
        assert!((x[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_program() {
        // x >= 1 and x <= 0 cannot both hold
        let qp = QuadraticProgram::new(vec![vec![1.0]], vec![0.0])
            .inequality(vec![-1.0], -1.0)
            .inequality(vec![1.0], 0.0);
        assert!(matches!(
            qp.solve(100),
            Err(StrataError::InfeasibleOptimization(_))
        ));
    }
}
