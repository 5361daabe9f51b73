//! Numeric polishing and post-filtering of candidate points.

use crate::{constraint::ConstraintSet, domain::DomainBox, linalg};

use super::SolutionPoint;

const MAX_NEWTON_ITERS: usize = 20;

pub(crate) struct Polish<const D: usize> {
    pub point: [f64; D],
    pub residual: f64,
    pub converged: bool,
}

/// Damped Newton iteration over the `Zero` constraints, clamped to `domain`.
/// Requires `num_zero == D`; other shapes are returned unpolished with
/// their residual measured.
pub(crate) fn newton_polish<const D: usize>(
    set: &ConstraintSet<D>,
    start: [f64; D],
    domain: &DomainBox<D>,
    tol: f64,
) -> Polish<D> {
    let zeros = set.zeros();
    let mut point = start;
    let mut residual = residual_at(set, point);
    if zeros.len() != D {
        return Polish {
            point,
            residual,
            converged: residual <= tol,
        };
    }

    for _ in 0..MAX_NEWTON_ITERS {
        if residual <= tol {
            return Polish {
                point,
                residual,
                converged: true,
            };
        }

        let values: [f64; D] = std::array::from_fn(|i| zeros[i].func().eval(point));
        let jacobian: [[f64; D]; D] = std::array::from_fn(|i| zeros[i].eval_grad(point));
        let Some(step) = linalg::solve_linear(&jacobian, &values) else {
            break;
        };

        let mut next: [f64; D] = std::array::from_fn(|d| point[d] - step[d]);
        for d in 0..D {
            next[d] = next[d].clamp(domain[d].0, domain[d].1);
        }
        let next_residual = residual_at(set, next);
        if next_residual >= residual {
            // Stalled, typically against the domain wall.
            break;
        }
        point = next;
        residual = next_residual;
    }

    Polish {
        point,
        residual,
        converged: residual <= tol,
    }
}

/// Max absolute `Zero`-constraint value at a point.
pub(crate) fn residual_at<const D: usize>(set: &ConstraintSet<D>, point: [f64; D]) -> f64 {
    set.zeros()
        .iter()
        .map(|c| c.func().eval(point).abs())
        .fold(0.0, f64::max)
}

/// Polish every candidate against the `Zero` subset. A negative
/// `numeric_tol` additionally purges points Newton could not converge.
pub(crate) fn refine_points<const D: usize>(
    set: &ConstraintSet<D>,
    points: &mut Vec<SolutionPoint<D>>,
    domain: &DomainBox<D>,
    numeric_tol: f64,
) {
    let purge = numeric_tol < 0.0;
    let tol = numeric_tol.abs();

    points.retain_mut(|p| {
        let polish = newton_polish(set, p.coords, domain, tol);
        p.coords = polish.point;
        p.residual = Some(polish.residual);
        polish.converged || !purge
    });
}

/// Drop points violating any constraint (equalities within `eq_tol`,
/// inequalities strictly), then merge points closer than `merge_tol`
/// (keeping the certified one, or the one with the smaller residual).
pub(crate) fn filter_points<const D: usize>(
    set: &ConstraintSet<D>,
    points: Vec<SolutionPoint<D>>,
    merge_tol: f64,
    eq_tol: f64,
) -> Vec<SolutionPoint<D>> {
    let mut kept: Vec<SolutionPoint<D>> = Vec::with_capacity(points.len());
    'candidates: for p in points {
        if !set
            .constraints
            .iter()
            .all(|c| c.satisfied_at(p.coords, eq_tol))
        {
            log::debug!("dropping infeasible candidate {:?}", p.coords);
            continue;
        }

        for q in kept.iter_mut() {
            let close = (0..D).all(|d| (p.coords[d] - q.coords[d]).abs() <= merge_tol);
            if close {
                if better(&p, q) {
                    *q = p;
                }
                continue 'candidates;
            }
        }
        kept.push(p);
    }
    kept
}

fn better<const D: usize>(a: &SolutionPoint<D>, b: &SolutionPoint<D>) -> bool {
    if a.single_sol != b.single_sol {
        return a.single_sol;
    }
    match (a.residual, b.residual) {
        (Some(ra), Some(rb)) => ra < rb,
        _ => false,
    }
}
