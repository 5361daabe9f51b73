//! Solver entry: validation, normalization, and the subdivide → refine →
//! filter → sort pipeline over a constraint system.

use rand::SeedableRng;
use rand::rngs::StdRng;
use snafu::ensure;

use crate::{
    DimensionTooHighSnafu, MismatchedDomainSnafu, MixedBasesSnafu, NonScalarEqualitySnafu,
    ZerocoolError,
    constraint::{Constraint, ConstraintSet},
    domain::DomainBox,
    linalg::MAX_DIM,
};

mod cones;
mod kantorovich;
mod reduce;
mod refine;
mod subdivide;

pub(crate) use reduce::HullClip;

// Subdivision tolerances below this are clamped up; box widths at that
// scale are dominated by f64 rounding anyway.
const SUBDIV_TOL_FLOOR: f64 = 1e-10;

// Points closer than this many tolerances are considered the same root.
const MERGE_TOL_FACTOR: f64 = 4.0;

/// One solution of the constraint system.
#[derive(Clone, Copy, Debug)]
pub struct SolutionPoint<const D: usize> {
    pub coords: [f64; D],
    /// True when a certifier proved the point is the only root of its
    /// sub-box, false for unverified subdivision-terminal candidates.
    pub single_sol: bool,
    /// Max equality residual measured at the point, when it was polished.
    pub residual: Option<f64>,
}

/// What a node callback tells the driver to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeAction {
    Continue,
    /// Abandon this sub-box (and everything under it) unexamined.
    SkipSubtree,
}

/// Per-node callback: receives the sub-box and recursion depth at the
/// start of every node visit.
pub type NodeHook<const D: usize> = Box<dyn FnMut(&DomainBox<D>, usize) -> NodeAction>;

/// Feature toggles and numeric knobs, captured per solver so concurrent
/// solves cannot observe each other's settings.
#[derive(Clone, Copy, Debug)]
pub struct SolverConfig {
    /// Normal-cone single-root certification.
    pub cone_test: bool,
    /// Parallel-hyperplane pruning (needs gradients, off by default).
    pub hyperplane_test: bool,
    /// Convex-hull domain reduction between splits.
    pub domain_reduction: bool,
    /// Gradient orthogonalization before each reduction.
    pub gradient_precondition: bool,
    /// Newton-Kantorovich uniqueness certification.
    pub kantorovich_test: bool,
    /// Carve certified balls out of boxes too big to certify whole.
    pub box_carving: bool,
    /// Minimum certified-ball volume fraction that justifies carving.
    pub carve_volume_ratio: f64,
    /// Seed for the certifier's sample points; fixed for reproducibility.
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            cone_test: true,
            hyperplane_test: false,
            domain_reduction: true,
            gradient_precondition: false,
            kantorovich_test: true,
            box_carving: false,
            carve_volume_ratio: 0.25,
            seed: 0x5eed,
        }
    }
}

/// Reusable scratch buffers, owned by the solver and recycled across
/// solves.
#[derive(Debug, Default)]
pub struct Workspace {
    pub(crate) hull: HullClip,
}

/// A configured solver. Reusable; `solve` takes `&mut self` only for the
/// scratch workspace and the node hook.
pub struct Solver<const D: usize> {
    config: SolverConfig,
    workspace: Workspace,
    on_node: Option<NodeHook<D>>,
}

impl<const D: usize> Default for Solver<D> {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl<const D: usize> Solver<D> {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            workspace: Workspace::default(),
            on_node: None,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Install a per-node callback; mainly a debugging and test aid.
    pub fn set_node_hook(
        &mut self,
        hook: impl FnMut(&DomainBox<D>, usize) -> NodeAction + 'static,
    ) {
        self.on_node = Some(Box::new(hook));
    }

    pub fn clear_node_hook(&mut self) {
        self.on_node = None;
    }

    /// Find all points in the shared domain where every constraint holds.
    ///
    /// `subdiv_tol` is the parametric box-width termination threshold.
    /// Newton refinement runs when `|numeric_tol| < subdiv_tol`; a
    /// negative `numeric_tol` additionally discards candidates Newton
    /// cannot converge. Points come back sorted by first coordinate.
    pub fn solve(
        &mut self,
        constraints: Vec<Constraint<D>>,
        subdiv_tol: f64,
        numeric_tol: f64,
    ) -> Result<Vec<SolutionPoint<D>>, ZerocoolError> {
        ensure!(
            D <= MAX_DIM,
            DimensionTooHighSnafu {
                dim: D,
                max: MAX_DIM
            }
        );
        let Some(first) = constraints.first() else {
            return Ok(Vec::new());
        };

        let domain = *first.func().domain();
        let basis = first.func().basis_kind();
        for c in &constraints {
            for f in &c.funcs {
                ensure!(*f.domain() == domain, MismatchedDomainSnafu);
                ensure!(f.basis_kind() == basis, MixedBasesSnafu);
            }
            ensure!(
                !c.kind().is_equality() || c.funcs.len() == 1,
                NonScalarEqualitySnafu
            );
        }

        let subdiv_tol = subdiv_tol.max(SUBDIV_TOL_FLOOR);
        let set = normalize(constraints, domain);
        log::info!(
            "solving {} constraints ({} zero, {} zero-subdiv) to tol {subdiv_tol:.2e}",
            set.constraints.len(),
            set.num_zero,
            set.num_zero_subdiv,
        );

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut points = subdivide::drive(
            set.clone(),
            &self.config,
            &mut self.workspace,
            &mut self.on_node,
            &mut rng,
            subdiv_tol,
            numeric_tol,
        )?;

        if numeric_tol.abs() < subdiv_tol {
            refine::refine_points(&set, &mut points, &domain, numeric_tol);
        }

        let merge_tol = MERGE_TOL_FACTOR * subdiv_tol.max(numeric_tol.abs());
        let eq_tol = merge_tol;
        let mut points = refine::filter_points(&set, points, merge_tol, eq_tol);

        points.sort_by(|a, b| {
            a.coords
                .iter()
                .zip(b.coords.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        log::info!("found {} points", points.len());
        Ok(points)
    }
}

/// One-shot solve with the default configuration.
pub fn solve<const D: usize>(
    constraints: Vec<Constraint<D>>,
    subdiv_tol: f64,
    numeric_tol: f64,
) -> Result<Vec<SolutionPoint<D>>, ZerocoolError> {
    Solver::new(SolverConfig::default()).solve(constraints, subdiv_tol, numeric_tol)
}

// Scale every function to unit coefficient magnitude (roots are
// scale-invariant), drop identically-zero equalities (satisfied
// everywhere), partition by kind, and cache the gradients the certifier
// and refinement stages evaluate.
fn normalize<const D: usize>(
    mut constraints: Vec<Constraint<D>>,
    domain: DomainBox<D>,
) -> ConstraintSet<D> {
    constraints.retain(|c| !(c.kind().is_equality() && c.func().coeff_abs_max() == 0.0));
    for c in &mut constraints {
        for f in &mut c.funcs {
            let scale = f.coeff_abs_max();
            if scale > 0.0 {
                f.scale_coeffs(1.0 / scale);
            }
        }
    }

    let mut set = ConstraintSet::partition(constraints, domain);
    let num_zero = set.num_zero;
    for c in &mut set.constraints[..num_zero] {
        c.cache_gradients();
    }
    set
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::func::MultivarFunc;
    use crate::power::{PowerPoly, Term};
    use crate::test_utils::{init_test_logger, unit_box};

    use super::*;

    fn axis_line<const D: usize>(dim: usize, offset: f64) -> Constraint<D> {
        let mut exp = [0u8; D];
        exp[dim] = 1;
        let poly = PowerPoly::from_terms([Term::new(1.0, exp), Term::new(-offset, [0u8; D])]);
        Constraint::zero(poly.to_bezier(DomainBox::unit()))
    }

    #[test]
    fn two_linear_patches_meet_in_one_point() {
        init_test_logger();

        let points = solve(vec![axis_line::<2>(0, 0.3), axis_line::<2>(1, 0.7)], 1e-3, 1e-10)
            .unwrap();

        assert_eq!(points.len(), 1);
        assert_abs_diff_eq!(points[0].coords[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(points[0].coords[1], 0.7, epsilon = 1e-6);
    }

    #[test]
    fn reduction_converges_before_any_split() {
        init_test_logger();

        // A lone Positive constraint u - 0.5: the feasible region is
        // [0.5, 1] and clipping must find it in one reduction.
        let gate = PowerPoly::from_terms([Term::new(1.0, [1]), Term::new(-0.5, [0])]);
        let constraint = Constraint::positive(gate.to_bezier(unit_box()));

        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let log = seen.clone();
        let mut solver = Solver::new(SolverConfig::default());
        solver.set_node_hook(move |bbox: &DomainBox<1>, _depth| {
            log.borrow_mut().push(bbox[0]);
            if bbox[0].0 > 0.4 {
                // Reduced box observed; no need to subdivide further.
                NodeAction::SkipSubtree
            } else {
                NodeAction::Continue
            }
        });
        solver.solve(vec![constraint], 1e-2, 1e-9).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen[0], (0.0, 1.0));
        assert_abs_diff_eq!(seen[1].0, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(seen[1].1, 1.0, epsilon = 1e-6);
        assert_eq!(seen.len(), 2, "reduction must precede any split");
    }

    #[test]
    fn coincident_constraints_collapse_to_one_point() {
        init_test_logger();

        // The same line twice: no certifier applies (two equalities in one
        // variable), so subdivision rains candidates around u = 0.5 and
        // the duplicate filter must collapse them.
        let points = solve(
            vec![axis_line::<1>(0, 0.5), axis_line::<1>(0, 0.5)],
            1e-3,
            1e-10,
        )
        .unwrap();

        assert_eq!(points.len(), 1);
        assert_abs_diff_eq!(points[0].coords[0], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn kantorovich_certifies_linear_system_at_depth_zero() {
        init_test_logger();

        let mut depths = Vec::new();
        let mut solver = Solver::new(SolverConfig {
            cone_test: false,
            ..SolverConfig::default()
        });
        let collected = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let log = collected.clone();
        solver.set_node_hook(move |_bbox: &DomainBox<2>, depth| {
            log.borrow_mut().push(depth);
            NodeAction::Continue
        });
        let points = solver
            .solve(vec![axis_line::<2>(0, 0.5), axis_line::<2>(1, 0.5)], 1e-3, 1e-10)
            .unwrap();
        depths.extend(collected.borrow().iter().copied());

        assert_eq!(depths, vec![0], "no subdivision expected");
        assert_eq!(points.len(), 1);
        assert!(points[0].single_sol);
        assert_abs_diff_eq!(points[0].coords[0], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(points[0].coords[1], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn lines_crossing_outside_the_box_yield_nothing() {
        init_test_logger();

        // Both zero sets cross the box but their intersection (1.05, 0.25)
        // lies outside it; no point may be reported.
        let f1 = PowerPoly::from_terms([Term::new(1.0, [0, 1]), Term::new(-0.25, [0, 0])]);
        let f2 = PowerPoly::from_terms([
            Term::new(1.0, [1, 0]),
            Term::new(1.0, [0, 1]),
            Term::new(-1.3, [0, 0]),
        ]);
        let bbox = [(0.0, 1.0), (0.0, 0.5)];
        let points = solve(
            vec![
                Constraint::zero(f1.to_bezier(bbox)),
                Constraint::zero(f2.to_bezier(bbox)),
            ],
            1e-3,
            1e-10,
        )
        .unwrap();

        assert!(points.is_empty(), "spurious point at {:?}", points);
    }

    #[test]
    fn incompatible_zero_subdiv_rejects_the_root() {
        init_test_logger();

        // The Zero root at 0.3 violates the ZeroSubdiv equality at 0.6, so
        // the system has no solution.
        let off = PowerPoly::from_terms([Term::new(1.0, [1]), Term::new(-0.6, [0])]);
        let points = solve(
            vec![
                axis_line::<1>(0, 0.3),
                Constraint::zero_subdiv(off.to_bezier(unit_box())),
            ],
            1e-3,
            1e-10,
        )
        .unwrap();

        assert!(points.is_empty(), "spurious point at {:?}", points);
    }

    #[test]
    fn identically_zero_equality_is_dropped() {
        init_test_logger();

        let zero = MultivarFunc::bezier(&[0.0, 0.0], [2], unit_box());
        let points = solve(
            vec![Constraint::zero(zero), axis_line::<1>(0, 0.25)],
            1e-3,
            1e-10,
        )
        .unwrap();

        assert_eq!(points.len(), 1);
        assert_abs_diff_eq!(points[0].coords[0], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn mismatched_domains_are_rejected() {
        let a = axis_line::<1>(0, 0.5);
        let poly = PowerPoly::from_terms([Term::new(1.0, [1])]);
        let b = Constraint::zero(poly.to_bezier([(0.0, 2.0)]));

        assert!(matches!(
            solve(vec![a, b], 1e-3, 1e-10),
            Err(ZerocoolError::MismatchedDomain)
        ));
    }

    #[test]
    fn vector_valued_equality_is_rejected() {
        let poly = PowerPoly::from_terms([Term::new(1.0, [1])]);
        let c = Constraint::any_of(
            [poly.to_bezier(unit_box()), poly.to_bezier(unit_box())],
            crate::constraint::ConstraintKind::Zero,
        );

        assert!(matches!(
            solve(vec![c], 1e-3, 1e-10),
            Err(ZerocoolError::NonScalarEquality)
        ));
    }

    #[test]
    fn mixed_bases_are_rejected() {
        let bez = axis_line::<1>(0, 0.5);
        let bsp = Constraint::zero(MultivarFunc::bspline(
            &[-0.5, 0.5],
            [2],
            [2],
            [&[0.0, 0.0, 1.0, 1.0][..]],
        ));

        assert!(matches!(
            solve(vec![bez, bsp], 1e-3, 1e-10),
            Err(ZerocoolError::MixedBases)
        ));
    }

    #[test]
    fn dimension_limit_is_enforced() {
        let c = axis_line::<5>(0, 0.5);
        assert!(matches!(
            solve(vec![c], 1e-3, 1e-10),
            Err(ZerocoolError::DimensionTooHigh { dim: 5, .. })
        ));
    }

    #[test]
    fn bspline_constraints_solve_end_to_end() {
        init_test_logger();

        // Piecewise-linear spline crossing zero at u = 0.25, with an
        // interior knot at 0.375 for the split chooser to find.
        let f = MultivarFunc::bspline(
            &[-0.5, 0.25, 1.0],
            [3],
            [2],
            [&[0.0, 0.0, 0.375, 1.0, 1.0][..]],
        );
        let points = solve(vec![Constraint::zero(f)], 1e-3, 1e-10).unwrap();

        assert_eq!(points.len(), 1);
        assert_abs_diff_eq!(points[0].coords[0], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn zero_subdiv_prunes_but_does_not_join_the_jacobian() {
        init_test_logger();

        // The ZeroSubdiv copy keeps the system square for the certifier
        // (one Zero in one variable) while still pruning boxes away from
        // its own zero set.
        let points = solve(
            vec![
                axis_line::<1>(0, 0.6),
                Constraint::zero_subdiv(
                    PowerPoly::from_terms([Term::new(1.0, [1]), Term::new(-0.6, [0])])
                        .to_bezier(unit_box()),
                ),
            ],
            1e-3,
            1e-10,
        )
        .unwrap();

        assert_eq!(points.len(), 1);
        assert!(points[0].single_sol);
        assert_abs_diff_eq!(points[0].coords[0], 0.6, epsilon = 1e-6);
    }

    #[test]
    fn tighter_tolerance_keeps_well_separated_roots() {
        init_test_logger();

        let circle = crate::test_utils::sphere_poly::<2>();
        let chord = PowerPoly::from_terms([Term::new(1.0, [0, 1]), Term::new(-0.5, [0, 0])]);
        let bbox = [(-1.5, 1.5), (-1.5, 1.5)];
        let run = |tol: f64| {
            solve(
                vec![
                    Constraint::zero(circle.to_bezier(bbox)),
                    Constraint::zero(chord.to_bezier(bbox)),
                ],
                tol,
                1e-10,
            )
            .unwrap()
        };

        let coarse = run(1e-2);
        let fine = run(1e-4);
        assert_eq!(coarse.len(), 2);
        assert_eq!(fine.len(), 2);
        for (a, b) in coarse.iter().zip(fine.iter()) {
            assert_abs_diff_eq!(a.coords[0], b.coords[0], epsilon = 1e-6);
            assert_abs_diff_eq!(a.coords[1], b.coords[1], epsilon = 1e-6);
        }

        // Soundness: residuals stay within a few tolerances.
        for p in fine {
            assert!(circle.eval(&p.coords).abs() <= 1e-8);
            assert!(chord.eval(&p.coords).abs() <= 1e-8);
        }
    }

    #[test]
    fn empty_input_solves_to_nothing() {
        let points = solve::<2>(Vec::new(), 1e-3, 1e-10).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn identical_solves_are_identical() {
        init_test_logger();

        // Circle against a line: two roots, found via the full pipeline.
        let circle = crate::test_utils::sphere_poly::<2>();
        let chord = PowerPoly::from_terms([Term::new(1.0, [0, 1]), Term::new(-0.5, [0, 0])]);
        let bbox = [(-1.5, 1.5), (-1.5, 1.5)];
        let run = || {
            solve(
                vec![
                    Constraint::zero(circle.to_bezier(bbox)),
                    Constraint::zero(chord.to_bezier(bbox)),
                ],
                1e-3,
                1e-10,
            )
            .unwrap()
        };

        let first = run();
        let second = run();
        assert_eq!(first.len(), 2);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.coords, b.coords);
            assert_eq!(a.single_sol, b.single_sol);
        }

        // And the two chord crossings are where they should be.
        let x = (1.0f64 - 0.25).sqrt();
        assert_abs_diff_eq!(first[0].coords[0], -x, epsilon = 1e-6);
        assert_abs_diff_eq!(first[1].coords[0], x, epsilon = 1e-6);
        assert_abs_diff_eq!(first[0].coords[1], 0.5, epsilon = 1e-6);
    }
}
