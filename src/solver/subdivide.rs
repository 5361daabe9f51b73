//! The subdivision driver: an explicit depth-first work stack of
//! constraint-set frames, so pathological tolerances deepen the heap
//! instead of the call stack.

use rand::rngs::StdRng;

use crate::{AlgorithmSnafu, ZerocoolError, constraint::ConstraintSet};

use super::{
    NodeAction, NodeHook, SolutionPoint, SolverConfig, Workspace, cones, kantorovich,
    kantorovich::Certify,
    reduce,
    reduce::Reduction,
    refine,
};

// Frames popped before the solve is declared pathological.
const MAX_NODES: usize = 4_000_000;

// Reduction is skipped every fourth depth so an oscillating clip cannot
// stall subdivision.
const REDUCE_PERIOD: usize = 4;

// A clip must shrink the box volume below this ratio to be worth a
// dedicated recursion instead of a split.
const REDUCE_GAIN: f64 = 0.95;

// Splits land slightly off center so a root on a symmetry line does not
// sit exactly on the cut, where both children would rediscover it.
const SPLIT_FRACTION: f64 = 0.5078125;

pub(crate) fn drive<const D: usize>(
    root: ConstraintSet<D>,
    config: &SolverConfig,
    ws: &mut Workspace,
    hook: &mut Option<NodeHook<D>>,
    rng: &mut StdRng,
    subdiv_tol: f64,
    numeric_tol: f64,
) -> Result<Vec<SolutionPoint<D>>, ZerocoolError> {
    let mut points = Vec::new();
    let mut stack: Vec<(ConstraintSet<D>, usize)> = vec![(root, 0)];
    let mut visited = 0usize;

    while let Some((node, depth)) = stack.pop() {
        visited += 1;
        if visited > MAX_NODES {
            return AlgorithmSnafu {
                message: "subdivision node budget exhausted",
            }
            .fail();
        }

        if let Some(hook) = hook.as_mut() {
            if matches!(hook(&node.domain, depth), NodeAction::SkipSubtree) {
                continue;
            }
        }

        if node.any_infeasible() {
            continue;
        }

        let square = node.num_zero == D && D > 0;
        if square && config.cone_test && cones::no_second_root(&node) {
            // At most one root in the box; emit only when Newton actually
            // lands on it, otherwise keep subdividing (the root may lie
            // outside the box entirely).
            if let Some(point) = certified(&node, numeric_tol) {
                log::debug!("cone-certified {:?} at depth {depth}", node.domain);
                points.push(point);
                continue;
            }
        }
        if square && config.hyperplane_test && cones::hyperplane_prune(&node) {
            log::debug!("hyperplane-pruned {:?} at depth {depth}", node.domain);
            continue;
        }
        if square && config.kantorovich_test {
            match kantorovich::certify(&node, config, rng, numeric_tol) {
                Certify::Unique(coords) => {
                    points.push(SolutionPoint {
                        coords,
                        single_sol: true,
                        residual: None,
                    });
                    continue;
                }
                Certify::Empty => continue,
                Certify::Carved { point, shells } => {
                    if let Some(coords) = point {
                        points.push(SolutionPoint {
                            coords,
                            single_sol: true,
                            residual: None,
                        });
                    }
                    for shell in shells.into_iter().rev() {
                        stack.push((node.subsection(shell), depth + 1));
                    }
                    continue;
                }
                Certify::Inconclusive => {}
            }
        }

        if node.domain.all_below(subdiv_tol) {
            points.push(SolutionPoint {
                coords: node.domain.center(),
                single_sol: false,
                residual: None,
            });
            continue;
        }

        if config.domain_reduction && depth % REDUCE_PERIOD != REDUCE_PERIOD - 1 {
            match reduce::clip(&node, ws, config.gradient_precondition, subdiv_tol) {
                Reduction::Pruned => continue,
                Reduction::Tightened(tight) => {
                    if tight.volume() < REDUCE_GAIN * node.domain.volume() {
                        stack.push((node.subsection(tight), depth + 1));
                        continue;
                    }
                }
            }
        }

        let (dim, t) = split_choice(&node, subdiv_tol);
        let (lower, upper) = node.split_at(dim, t);
        stack.push((upper, depth + 1));
        stack.push((lower, depth + 1));
    }

    Ok(points)
}

fn certified<const D: usize>(node: &ConstraintSet<D>, numeric_tol: f64) -> Option<SolutionPoint<D>> {
    let center = node.domain.center();
    let polish = refine::newton_polish(node, center, &node.domain, numeric_tol.abs());
    polish.converged.then_some(SolutionPoint {
        coords: polish.point,
        single_sol: true,
        residual: Some(polish.residual),
    })
}

/// Subdivision direction and parameter: the widest splittable direction
/// carrying an interior knot wins, otherwise the widest overall at a
/// near-midpoint.
fn split_choice<const D: usize>(node: &ConstraintSet<D>, subdiv_tol: f64) -> (usize, f64) {
    let mut best: Option<(usize, f64, f64)> = None;
    for d in 0..D {
        let width = node.domain.width(d);
        if width <= subdiv_tol {
            continue;
        }
        let knot = node
            .constraints
            .iter()
            .flat_map(|c| c.funcs.iter())
            .find_map(|f| f.interior_knot(d));
        if let Some(t) = knot {
            if best.is_none_or(|(_, w, _)| width > w) {
                best = Some((d, width, t));
            }
        }
    }
    if let Some((dim, _, t)) = best {
        return (dim, t);
    }

    let (dim, width) = node.domain.max_width();
    (dim, node.domain[dim].0 + width * SPLIT_FRACTION)
}
