//! Gradient-cone tests over a sub-box.
//!
//! Both tests bound each equality constraint's gradient over the box by the
//! coefficient ranges of its gradient meshes. The cone test certifies that
//! the box holds at most one root; the hyperplane test bounds each
//! constraint between two parallel hyperplanes in graph space and prunes
//! the box when the slab intersection misses it.

use crate::{constraint::ConstraintSet, linalg, mesh::mesh_indices_excl};

const HYPERPLANE_PAD: f64 = 1e-10;

/// Gradient interval box of one constraint: center direction and the
/// radius of the deviation from it, both in the gradient's own scale.
fn gradient_box<const D: usize>(c: &crate::constraint::Constraint<D>) -> Option<([f64; D], f64)> {
    let grads = c.grads.as_ref()?;
    let mut center = [0.0; D];
    let mut radius_sq = 0.0;
    for d in 0..D {
        let (lo, hi) = grads[d].coeff_range();
        center[d] = 0.5 * (lo + hi);
        radius_sq += (0.5 * (hi - lo)).powi(2);
    }
    Some((center, radius_sq.sqrt()))
}

/// True when the gradient cones certify at most one root in the box.
///
/// With unit center directions as rows of `G`, any Jacobian over the box is
/// a row-scaled `G + E` with `‖E‖_F` bounded by the summed relative cone
/// radii. `1/‖G⁻¹‖_F` is a lower bound on the smallest singular value, so
/// the Jacobian stays nonsingular over the whole box whenever the radii
/// stay below it, and two distinct roots would contradict the mean value
/// theorem along the segment joining them.
pub(crate) fn no_second_root<const D: usize>(node: &ConstraintSet<D>) -> bool {
    debug_assert_eq!(node.num_zero, D);

    let mut unit_centers = [[0.0; D]; D];
    let mut deviation_sq = 0.0;
    for (i, c) in node.zeros().iter().enumerate() {
        let Some((center, radius)) = gradient_box(c) else {
            return false;
        };
        let scale = linalg::norm(&center);
        if scale < 1e-14 {
            // The cone covers every direction.
            return false;
        }
        for d in 0..D {
            unit_centers[i][d] = center[d] / scale;
        }
        deviation_sq += (radius / scale).powi(2);
    }

    match linalg::inverse_frobenius_norm(&unit_centers) {
        None => false,
        Some(inv_norm) => deviation_sq.sqrt() * inv_norm < 1.0,
    }
}

/// True when the parallel-hyperplane bounds prove the box root-free.
///
/// Each equality constraint's graph `(u, f(u))` lies between two
/// hyperplanes normal to `(∇f(center), -1)`; its zero set therefore lies in
/// the slab those planes cut out of parameter space. The slab intersection
/// is a parallelepiped whose axis-aligned extent comes from its `2^D`
/// vertices; an extent disjoint from the box means no root.
pub(crate) fn hyperplane_prune<const D: usize>(node: &ConstraintSet<D>) -> bool {
    debug_assert_eq!(node.num_zero, D);
    let center = node.domain.center();

    let mut normals = [[0.0; D]; D];
    let mut lows = [0.0; D];
    let mut highs = [0.0; D];
    for (i, c) in node.zeros().iter().enumerate() {
        let grad = c.eval_grad(center);

        // Graph-space normal (grad, -1), normalized.
        let scale = (grad.iter().map(|g| g * g).sum::<f64>() + 1.0).sqrt();
        let normal: [f64; D] = std::array::from_fn(|d| grad[d] / scale);
        let last = -1.0 / scale;

        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (coord, coeff) in c.func().graph_points() {
            let dot: f64 =
                (0..D).map(|d| normal[d] * coord[d]).sum::<f64>() + last * coeff;
            lo = lo.min(dot);
            hi = hi.max(dot);
        }

        // Roots have coeff = 0, so normal · u must land in [lo, hi].
        normals[i] = normal;
        lows[i] = lo;
        highs[i] = hi;
    }

    // Extent of the slab-intersection parallelepiped: the hull of the 2^D
    // plane-intersection vertices, one per choice of low/high face.
    let mut extent_lo = [f64::INFINITY; D];
    let mut extent_hi = [f64::NEG_INFINITY; D];
    for pick in mesh_indices_excl([2u8; D]) {
        let rhs: [f64; D] =
            std::array::from_fn(|i| if pick[i] == 0 { lows[i] } else { highs[i] });
        let Some(vertex) = linalg::solve_linear(&normals, &rhs) else {
            // Near-parallel planes: the slab is unbounded, nothing to prove.
            return false;
        };
        for d in 0..D {
            extent_lo[d] = extent_lo[d].min(vertex[d]);
            extent_hi[d] = extent_hi[d].max(vertex[d]);
        }
    }

    (0..D).any(|d| {
        extent_hi[d] < node.domain[d].0 - HYPERPLANE_PAD
            || extent_lo[d] > node.domain[d].1 + HYPERPLANE_PAD
    })
}
