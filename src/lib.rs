//! Subdivision-based solver for systems of multivariate piecewise
//! polynomial constraints.
//!
//! Constraints are scalar Bezier or B-spline functions over a shared
//! parameter box, each tagged with a sign condition (zero, positive,
//! negative). The solver recursively subdivides the box, pruning by the
//! convex-hull property of the control mesh and certifying isolated roots
//! with gradient-cone and Newton-Kantorovich tests, then polishes and
//! deduplicates the surviving candidates.
//!
//! ```
//! use zerocool::{Constraint, PowerPoly, Term, solve};
//!
//! // Unit circle against the diagonal, over [0, 1]^2.
//! let circle = PowerPoly::from_terms([
//!     Term::new(-1.0, [0, 0]),
//!     Term::new(1.0, [2, 0]),
//!     Term::new(1.0, [0, 2]),
//! ]);
//! let diag = PowerPoly::from_terms([Term::new(1.0, [1, 0]), Term::new(-1.0, [0, 1])]);
//!
//! let bbox = [(0.0, 1.0), (0.0, 1.0)];
//! let points = solve(
//!     vec![
//!         Constraint::zero(circle.to_bezier(bbox)),
//!         Constraint::zero(diag.to_bezier(bbox)),
//!     ],
//!     1e-4,
//!     1e-10,
//! )
//! .unwrap();
//!
//! assert_eq!(points.len(), 1);
//! assert!((points[0].coords[0] - 0.5f64.sqrt()).abs() < 1e-8);
//! ```

mod basis;
mod constraint;
mod domain;
mod func;
mod linalg;
mod mesh;
mod power;
mod solver;

#[cfg(test)]
mod test_utils;

pub use constraint::{Constraint, ConstraintKind};
pub use domain::DomainBox;
pub use func::{BasisKind, MultivarFunc};
pub use linalg::MAX_DIM;
pub use power::{PowerPoly, Term};
pub use solver::{
    NodeAction, NodeHook, SolutionPoint, Solver, SolverConfig, Workspace, solve,
};

use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ZerocoolError {
    #[snafu(display("constraints do not all share one domain"))]
    MismatchedDomain,

    #[snafu(display("cannot mix Bezier and B-spline constraints in one solve"))]
    MixedBases,

    #[snafu(display("equality constraints must be scalar-valued"))]
    NonScalarEquality,

    #[snafu(display("{} parameter directions exceed the supported maximum of {}", dim, max))]
    DimensionTooHigh { dim: usize, max: usize },

    #[snafu(display("Algorithm error (bug in library): {}", message))]
    AlgorithmError { message: String },
}
