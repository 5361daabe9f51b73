//! Per-direction domain reduction by convex-hull ("Bezier") clipping.
//!
//! Each constraint's control coefficients are plotted against their node
//! abscissas; the convex hull of that point set bounds the function's
//! graph, so intersecting the hull with the zero line bounds where the
//! constraint can still be satisfied. Intervals are intersected across all
//! constraints per direction.

use smallvec::SmallVec;

use crate::{
    constraint::{ConstraintKind, ConstraintSet},
    domain::DomainBox,
    func::MultivarFunc,
    linalg,
};

use super::Workspace;

const REDUCE_PAD: f64 = 1e-10;

pub(crate) enum Reduction<const D: usize> {
    /// Some constraint has no feasible sub-interval: the whole box goes.
    Pruned,
    /// Tightest provable super-box of all solutions, `⊆` the node box.
    Tightened(DomainBox<D>),
}

/// Clip the node's box against every constraint in every direction.
pub(crate) fn clip<const D: usize>(
    node: &ConstraintSet<D>,
    ws: &mut Workspace,
    precondition: bool,
    subdiv_tol: f64,
) -> Reduction<D> {
    let mut tight = node.domain;

    // Equality constraints, optionally preconditioned so their gradients
    // are orthogonal at the box center.
    let blended = if precondition {
        orthogonalized_zeros(node)
    } else {
        None
    };
    let zero_funcs: Vec<&MultivarFunc<D>> = match &blended {
        Some(funcs) => funcs.iter().collect(),
        None => node
            .constraints
            .iter()
            .take(node.num_equalities())
            .map(|c| c.func())
            .collect(),
    };

    for f in zero_funcs {
        for d in 0..D {
            match clip_interval(f, d, ClipMode::Span, &mut ws.hull) {
                None => return Reduction::Pruned,
                Some(interval) => {
                    narrow(&mut tight, d, interval, subdiv_tol);
                    if !tight.is_valid() {
                        return Reduction::Pruned;
                    }
                }
            }
        }
    }

    for c in &node.constraints[node.num_equalities()..] {
        let mode = match c.kind() {
            ConstraintKind::Positive => ClipMode::AbovePossible,
            ConstraintKind::Negative => ClipMode::BelowPossible,
            _ => unreachable!("equalities precede inequalities"),
        };
        for d in 0..D {
            // OR semantics: the constraint survives wherever any component
            // does, so union the per-component intervals.
            let mut union: Option<(f64, f64)> = None;
            for f in &c.funcs {
                if let Some((lo, hi)) = clip_interval(f, d, mode, &mut ws.hull) {
                    union = Some(match union {
                        None => (lo, hi),
                        Some((ulo, uhi)) => (ulo.min(lo), uhi.max(hi)),
                    });
                }
            }
            match union {
                None => return Reduction::Pruned,
                Some(interval) => {
                    narrow(&mut tight, d, interval, subdiv_tol);
                    if !tight.is_valid() {
                        return Reduction::Pruned;
                    }
                }
            }
        }
    }

    tight.pad_within(REDUCE_PAD, &node.domain);
    log::debug!("reduced {:?} -> {:?}", node.domain, tight);
    Reduction::Tightened(tight)
}

fn narrow<const D: usize>(
    tight: &mut DomainBox<D>,
    d: usize,
    (mut lo, mut hi): (f64, f64),
    subdiv_tol: f64,
) {
    // A single crossing collapses to a band wide enough that rounding
    // cannot push the root outside it.
    let band = subdiv_tol.max(10.0 * f64::EPSILON);
    if hi - lo < band {
        let mid = 0.5 * (lo + hi);
        lo = mid - band;
        hi = mid + band;
    }
    tight[d].0 = tight[d].0.max(lo);
    tight[d].1 = tight[d].1.min(hi);
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClipMode {
    /// Keep where the hull spans zero (equality constraints).
    Span,
    /// Keep where the upper hull reaches above zero (`Positive`).
    AbovePossible,
    /// Keep where the lower hull reaches below zero (`Negative`).
    BelowPossible,
}

/// Buckets of graph points above/below the zero line, plus the abscissa
/// range of points exactly on it. Crossing abscissas come from the
/// pairwise chords; the hull's zero-line intersection is their extreme.
#[derive(Debug, Clone, Default)]
pub(crate) struct HullClip {
    above: SmallVec<[[f64; 2]; 16]>,
    below: SmallVec<[[f64; 2]; 16]>,
    on_min: f64,
    on_max: f64,
}

impl HullClip {
    pub(crate) fn reset(&mut self) {
        self.above.clear();
        self.below.clear();
        self.on_min = f64::INFINITY;
        self.on_max = f64::NEG_INFINITY;
    }

    pub(crate) fn add_point(&mut self, x: f64, y: f64) {
        debug_assert!(x.is_finite() && y.is_finite(), "invalid point ({x}, {y})");
        if y > 0.0 {
            self.above.push([x, y]);
        } else if y < 0.0 {
            self.below.push([x, y]);
        } else {
            self.on_min = self.on_min.min(x);
            self.on_max = self.on_max.max(x);
        }
    }

    fn interval(&self, mode: ClipMode) -> Option<(f64, f64)> {
        let mut min_x = self.on_min;
        let mut max_x = self.on_max;

        // The sign-matching bucket's own abscissas belong to the kept
        // region for the inequality modes.
        match mode {
            ClipMode::Span => {}
            ClipMode::AbovePossible => {
                if self.above.is_empty() {
                    return None;
                }
                for &[x, _] in &self.above {
                    min_x = min_x.min(x);
                    max_x = max_x.max(x);
                }
            }
            ClipMode::BelowPossible => {
                if self.below.is_empty() {
                    return None;
                }
                for &[x, _] in &self.below {
                    min_x = min_x.min(x);
                    max_x = max_x.max(x);
                }
            }
        }

        for &[x1, y1] in &self.above {
            for &[x2, y2] in &self.below {
                let t = y1 / (y1 - y2);
                let x = x1 + t * (x2 - x1);
                min_x = min_x.min(x);
                max_x = max_x.max(x);
            }
        }

        if min_x > max_x {
            // No crossings and nothing on the line.
            return None;
        }
        Some((min_x, max_x))
    }
}

/// Interval along `dim` where `func` can still meet its sign condition,
/// or `None` when provably nowhere.
pub(crate) fn clip_interval<const D: usize>(
    func: &MultivarFunc<D>,
    dim: usize,
    mode: ClipMode,
    hull: &mut HullClip,
) -> Option<(f64, f64)> {
    hull.reset();
    for (coord, coeff) in func.graph_points() {
        hull.add_point(coord[dim], coeff);
    }
    hull.interval(mode)
}

// Linearly blend the Zero constraints so their gradients are orthogonal at
// the box center (modified Gram-Schmidt on the Jacobian rows, applied to
// the coefficient meshes). Requires identical meshes across constraints;
// silently skipped otherwise. Re-derived per node, never cached.
fn orthogonalized_zeros<const D: usize>(node: &ConstraintSet<D>) -> Option<Vec<MultivarFunc<D>>> {
    if node.num_zero != D || node.num_zero_subdiv != 0 {
        return None;
    }
    let zeros = node.zeros();
    let shape = zeros[0].func().shape();
    if !zeros.iter().all(|c| c.func().shape() == shape) {
        return None;
    }

    let center = node.domain.center();
    let mut rows: Vec<[f64; D]> = zeros.iter().map(|c| c.eval_grad(center)).collect();
    let mut weights = [[0.0; D]; D];
    for i in 0..D {
        weights[i][i] = 1.0;
    }

    for i in 0..D {
        for j in 0..i {
            let rj = rows[j];
            let wj = weights[j];
            let denom: f64 = rj.iter().map(|x| x * x).sum();
            if denom < 1e-20 {
                return None;
            }
            let proj: f64 = (0..D).map(|k| rows[i][k] * rj[k]).sum::<f64>() / denom;
            for k in 0..D {
                rows[i][k] -= proj * rj[k];
                weights[i][k] -= proj * wj[k];
            }
        }
        if linalg::norm(&rows[i]) < 1e-12 {
            return None;
        }
    }

    let mut blended = Vec::with_capacity(D);
    for i in 0..D {
        let mut f = zeros[i].func().clone();
        for c in &mut f.coeffs {
            *c *= weights[i][i];
        }
        for j in 0..D {
            if j == i || weights[i][j] == 0.0 {
                continue;
            }
            let other = &zeros[j].func().coeffs;
            for (c, o) in f.coeffs.iter_mut().zip(other.iter()) {
                *c += weights[i][j] * o;
            }
        }
        blended.push(f);
    }
    Some(blended)
}
