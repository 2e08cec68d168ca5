//! Doubly-stochastic mixing matrices.
//!
//! [`WeightMatrixBuilder`] freezes an agent ordering at construction time and
//! builds either the global optimal-step matrix `W = I - alpha * L` used by the
//! synchronous engine, or the per-activation neighborhood matrix used by the
//! matrix-based asynchronous engine. Every matrix is validated before use; a
//! violation is fatal for the run. Per-activation matrices get every
//! [`MixingCheck`]; the global matrix skips nonnegativity.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::engine::errors::{ConsensusError, MixingCheck};
use crate::engine::graph::{index_of, AgentGraph, AgentId};
use crate::engine::numeric_kernels::{symmetric_eigenvalues, DenseMatrix};

/// Mixing matrix bound to the agent ordering it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct MixingMatrix {
    order: Vec<AgentId>,
    matrix: DenseMatrix,
}

impl MixingMatrix {
    pub fn new(order: Vec<AgentId>, matrix: DenseMatrix) -> Self {
        Self { order, matrix }
    }

    pub fn order(&self) -> &[AgentId] {
        &self.order
    }

    pub fn matrix(&self) -> &DenseMatrix {
        &self.matrix
    }

    pub fn dim(&self) -> usize {
        self.matrix.dim()
    }

    /// Checks dimension, symmetry, row and column sums, nonnegativity and
    /// `|lambda| <= 1 + tolerance` for every eigenvalue.
    pub fn validate(&self, tolerance: f64) -> Result<(), ConsensusError> {
        self.validate_checks(tolerance, MixingCheck::ALL)
    }

    /// Runs only the listed checks, in the order of [`MixingCheck::ALL`].
    /// The dimension check always runs.
    pub fn validate_checks(
        &self,
        tolerance: f64,
        checks: &[MixingCheck],
    ) -> Result<(), ConsensusError> {
        let w = &self.matrix;
        let enabled = |check: MixingCheck| checks.contains(&check);
        if w.dim() != self.order.len() {
            return Err(ConsensusError::mixing(
                MixingCheck::Dimension,
                format!(
                    "{}x{} matrix for {} agents",
                    w.dim(),
                    w.dim(),
                    self.order.len()
                ),
            ));
        }

        let asymmetry = w.max_asymmetry();
        if enabled(MixingCheck::Symmetry) && asymmetry > tolerance {
            return Err(ConsensusError::mixing(
                MixingCheck::Symmetry,
                format!("max |W - W^T| = {:e}", asymmetry),
            ));
        }

        if enabled(MixingCheck::RowSums) {
            if let Some((row, sum)) = first_off_unit(&w.row_sums(), tolerance) {
                return Err(ConsensusError::mixing(
                    MixingCheck::RowSums,
                    format!("row {} sums to {}", row, sum),
                ));
            }
        }
        if enabled(MixingCheck::ColumnSums) {
            if let Some((col, sum)) = first_off_unit(&w.column_sums(), tolerance) {
                return Err(ConsensusError::mixing(
                    MixingCheck::ColumnSums,
                    format!("column {} sums to {}", col, sum),
                ));
            }
        }

        if enabled(MixingCheck::Nonnegativity) {
            if let Some((row, col, value)) = w.min_entry().filter(|e| e.2 < -tolerance) {
                return Err(ConsensusError::mixing(
                    MixingCheck::Nonnegativity,
                    format!(
                        "W[{:?}][{:?}] = {}",
                        self.order[row], self.order[col], value
                    ),
                ));
            }
        }

        if enabled(MixingCheck::SpectralRadius) {
            let eigenvalues = symmetric_eigenvalues(w)?;
            if let Some(bad) = eigenvalues.iter().find(|l| l.abs() > 1.0 + tolerance) {
                return Err(ConsensusError::mixing(
                    MixingCheck::SpectralRadius,
                    format!("eigenvalue {} outside the unit disc", bad),
                ));
            }
        }
        Ok(())
    }

    /// Spectral radius of `W - 11^T / N`, the asymptotic per-round
    /// contraction of the disagreement.
    pub fn asymptotic_convergence_factor(&self) -> Result<f64, ConsensusError> {
        let n = self.dim();
        if n == 0 {
            return Ok(0.0);
        }
        let averaging = DenseMatrix::from_row_major(n, vec![1.0; n * n])?;
        let deviation = self.matrix.sub_scaled(1.0 / n as f64, &averaging)?;
        let eigenvalues = symmetric_eigenvalues(&deviation)?;
        Ok(eigenvalues.iter().fold(0.0_f64, |acc, l| acc.max(l.abs())))
    }

    /// Applies `x <- W x` to the estimates of the agents in this ordering.
    pub fn apply(&self, graph: &mut AgentGraph) -> Result<(), ConsensusError> {
        let mut x = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let value = graph.estimate(*id).ok_or_else(|| {
                ConsensusError::Internal(format!(
                    "agent {:?} left the graph under a stale mixing matrix",
                    id
                ))
            })?;
            x.push(value);
        }
        let next = self.matrix.mul_vec(&x)?;
        for (id, value) in self.order.iter().zip(next) {
            graph.set_estimate(*id, value)?;
        }
        Ok(())
    }
}

fn first_off_unit(sums: &[f64], tolerance: f64) -> Option<(usize, f64)> {
    sums.iter()
        .copied()
        .enumerate()
        .find(|(_, s)| (s - 1.0).abs() > tolerance)
}

/// Convergence-optimal step for `W = I - alpha * L`: `2 / (lambda_1 + lambda_{N-1})`
/// with eigenvalues sorted in descending order (`lambda_{N-1}` is the
/// second-smallest, the algebraic connectivity).
pub fn optimal_step_size(laplacian_eigenvalues: &[f64]) -> Result<f64, ConsensusError> {
    let n = laplacian_eigenvalues.len();
    if n < 2 {
        return Err(ConsensusError::Validation(format!(
            "optimal step size needs at least 2 agents, got {}",
            n
        )));
    }
    let denominator = laplacian_eigenvalues[0] + laplacian_eigenvalues[n - 2];
    if denominator <= 0.0 || !denominator.is_finite() {
        return Err(ConsensusError::Validation(format!(
            "Laplacian spectrum gives step denominator {}; the graph has no edges",
            denominator
        )));
    }
    Ok(2.0 / denominator)
}

/// Builds mixing matrices over a fixed agent ordering.
///
/// The ordering is taken from the graph at construction time; after any
/// membership change a new builder must be created.
#[derive(Debug, Clone)]
pub struct WeightMatrixBuilder {
    order: Vec<AgentId>,
    index: FxHashMap<AgentId, usize>,
}

impl WeightMatrixBuilder {
    pub fn new(graph: &AgentGraph) -> Self {
        let order = graph.agent_ids().to_vec();
        let index = index_of(&order);
        Self { order, index }
    }

    pub fn order(&self) -> &[AgentId] {
        &self.order
    }

    /// Global matrix `W = I - alpha * L` with the optimal step size.
    pub fn synchronous(&self, graph: &AgentGraph) -> Result<MixingMatrix, ConsensusError> {
        let laplacian = graph.laplacian(&self.order);
        let eigenvalues = symmetric_eigenvalues(&laplacian)?;
        let alpha = optimal_step_size(&eigenvalues)?;
        debug!(
            agents = self.order.len(),
            alpha,
            lambda_max = eigenvalues[0],
            "built synchronous mixing matrix"
        );
        let identity = DenseMatrix::identity(self.order.len());
        let matrix = identity.sub_scaled(alpha, &laplacian)?;
        Ok(MixingMatrix::new(self.order.clone(), matrix))
    }

    /// Identity except on the closed neighborhood of `agent`, where every
    /// entry is `1 / (deg(agent) + 1)`.
    pub fn local_activation(
        &self,
        graph: &AgentGraph,
        agent: AgentId,
    ) -> Result<MixingMatrix, ConsensusError> {
        let mut block = Vec::with_capacity(graph.degree(agent) + 1);
        block.push(self.position(agent)?);
        for neighbor in graph.neighbors(agent) {
            block.push(self.position(*neighbor)?);
        }
        let weight = 1.0 / block.len() as f64;

        let mut matrix = DenseMatrix::identity(self.order.len());
        for &row in &block {
            for &col in &block {
                matrix.set(row, col, weight);
            }
        }
        Ok(MixingMatrix::new(self.order.clone(), matrix))
    }

    fn position(&self, id: AgentId) -> Result<usize, ConsensusError> {
        self.index.get(&id).copied().ok_or_else(|| {
            ConsensusError::Internal(format!(
                "agent {:?} is not part of the mixing order",
                id
            ))
        })
    }
}
