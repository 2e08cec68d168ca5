//! Error types for consensus runs.

use std::fmt;

use thiserror::Error;

/// Algebraic property checked on every constructed mixing matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixingCheck {
    /// Matrix shape does not match the agent ordering it was built for.
    Dimension,
    /// `W[i][j] != W[j][i]` for some pair.
    Symmetry,
    /// Some row does not sum to one.
    RowSums,
    /// Some column does not sum to one.
    ColumnSums,
    /// Some entry is negative.
    Nonnegativity,
    /// Some eigenvalue has magnitude above `1 + tolerance`.
    SpectralRadius,
}

impl MixingCheck {
    /// Every check, in the order they run. Applied to per-activation matrices.
    pub const ALL: &'static [MixingCheck] = &[
        MixingCheck::Dimension,
        MixingCheck::Symmetry,
        MixingCheck::RowSums,
        MixingCheck::ColumnSums,
        MixingCheck::Nonnegativity,
        MixingCheck::SpectralRadius,
    ];

    /// Checks for the global optimal-step matrix. Skips nonnegativity:
    /// `I - alpha * L` has negative diagonal entries wherever
    /// `alpha * deg(i) > 1`.
    pub const GLOBAL: &'static [MixingCheck] = &[
        MixingCheck::Dimension,
        MixingCheck::Symmetry,
        MixingCheck::RowSums,
        MixingCheck::ColumnSums,
        MixingCheck::SpectralRadius,
    ];
}

impl fmt::Display for MixingCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MixingCheck::Dimension => "dimension",
            MixingCheck::Symmetry => "symmetry",
            MixingCheck::RowSums => "row sums",
            MixingCheck::ColumnSums => "column sums",
            MixingCheck::Nonnegativity => "nonnegativity",
            MixingCheck::SpectralRadius => "spectral radius",
        };
        f.write_str(name)
    }
}

/// Errors that can abort a consensus run.
///
/// This enum is marked `#[non_exhaustive]` so new failure classes can be added
/// without breaking callers. Running out of iterations is *not* an error: a
/// capped run returns normally with `RunMetrics::converged == false`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Invalid run, PDMM or fault parameters, or a graph too small to run on.
    #[error("validation error: {0}")]
    Validation(String),

    /// A constructed mixing matrix violates one of its invariants. Fatal for
    /// the run; it indicates a graph or construction defect.
    #[error("invalid mixing matrix ({check}): {detail}")]
    InvalidMixingMatrix { check: MixingCheck, detail: String },

    /// Structural graph error (unknown agent, self-loop, duplicate id).
    #[error("graph error: {0}")]
    Graph(String),

    /// Non-finite estimates or an eigen solver that failed to converge.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Internal invariant broken (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConsensusError {
    pub(crate) fn mixing(check: MixingCheck, detail: impl Into<String>) -> Self {
        ConsensusError::InvalidMixingMatrix {
            check,
            detail: detail.into(),
        }
    }

    /// Returns true for the fatal matrix-invariant class of errors.
    pub fn is_invalid_mixing_matrix(&self) -> bool {
        matches!(self, ConsensusError::InvalidMixingMatrix { .. })
    }
}
