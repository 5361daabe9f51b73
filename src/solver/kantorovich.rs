//! Newton-Kantorovich uniqueness certification over a sub-box.
//!
//! From a sample point the test measures Beta (inverse-Jacobian norm),
//! Etha (Newton step length) and Gamma (a Lipschitz bound on the Jacobian
//! from the convex-hull bounds of the second-derivative meshes). When
//! Alpha = Beta * Etha * Gamma stays at or below one half, Newton's method
//! is guaranteed to converge and the ball of radius
//! `(1 + sqrt(1 - 2 Alpha)) / (Beta * Gamma)` holds at most one root.

use rand::Rng;
use rand::rngs::StdRng;

use crate::{constraint::ConstraintSet, domain::DomainBox, linalg};

use super::{SolverConfig, refine};

const MAX_SAMPLES: usize = 4;
const AFFINE_GAMMA: f64 = 1e-13;

pub(crate) enum Certify<const D: usize> {
    /// Exactly one root in the box, already polished.
    Unique([f64; D]),
    /// Provably no root in the box.
    Empty,
    /// The certified ball covers part of the box: its root (when inside)
    /// plus the leftover shell boxes still to be searched.
    Carved {
        point: Option<[f64; D]>,
        shells: Vec<DomainBox<D>>,
    },
    Inconclusive,
}

pub(crate) fn certify<const D: usize>(
    node: &ConstraintSet<D>,
    config: &SolverConfig,
    rng: &mut StdRng,
    numeric_tol: f64,
) -> Certify<D> {
    debug_assert_eq!(node.num_zero, D);
    let zeros = node.zeros();
    let bbox = &node.domain;

    let Some(gamma) = lipschitz_bound(node) else {
        return Certify::Inconclusive;
    };

    for attempt in 0..MAX_SAMPLES {
        let sample: [f64; D] = if attempt == 0 {
            bbox.center()
        } else {
            std::array::from_fn(|d| rng.gen_range(bbox[d].0..bbox[d].1))
        };

        let values: [f64; D] = std::array::from_fn(|i| zeros[i].func().eval(sample));
        let jacobian: [[f64; D]; D] = std::array::from_fn(|i| zeros[i].eval_grad(sample));
        let Some(step) = linalg::solve_linear(&jacobian, &values) else {
            continue;
        };
        let Some(beta) = linalg::inverse_frobenius_norm(&jacobian) else {
            continue;
        };
        let etha = linalg::norm(&step);

        if gamma <= AFFINE_GAMMA {
            // Affine system: the Newton step is exact and the root unique
            // in all of space.
            let root: [f64; D] = std::array::from_fn(|d| sample[d] - step[d]);
            return if bbox.contains(&root) {
                Certify::Unique(root)
            } else {
                Certify::Empty
            };
        }

        let alpha = beta * etha * gamma;
        if alpha > 0.5 {
            continue;
        }
        let discriminant = (1.0 - 2.0 * alpha).sqrt();
        let unique_radius = (1.0 + discriminant) / (beta * gamma);
        let exist_radius = (1.0 - discriminant) / (beta * gamma);

        if ball_covers_box(sample, unique_radius, bbox) {
            // At most one root in the box; Newton from the sample finds
            // the one root of the existence ball, which may sit just
            // outside the box.
            let mut reach = *bbox;
            for d in 0..D {
                reach[d].0 -= exist_radius;
                reach[d].1 += exist_radius;
            }
            let polish = refine::newton_polish(node, sample, &reach, numeric_tol.abs());
            if polish.converged {
                return if bbox.contains(&polish.point) {
                    Certify::Unique(polish.point)
                } else {
                    Certify::Empty
                };
            }
            return Certify::Inconclusive;
        }

        if config.box_carving {
            // Largest axis-aligned box inscribed in the certified ball.
            let half = unique_radius / (D as f64).sqrt();
            let mut carved = *bbox;
            for d in 0..D {
                carved[d].0 = carved[d].0.max(sample[d] - half);
                carved[d].1 = carved[d].1.min(sample[d] + half);
            }
            if carved.is_valid()
                && carved.volume() > config.carve_volume_ratio * bbox.volume()
            {
                // Newton must be free to follow the full Kantorovich path;
                // clamping to the carved box could stall at its wall and
                // lose a root no shell covers.
                let mut reach = *bbox;
                for d in 0..D {
                    reach[d].0 -= exist_radius;
                    reach[d].1 += exist_radius;
                }
                let polish = refine::newton_polish(node, sample, &reach, numeric_tol.abs());
                if !polish.converged {
                    return Certify::Inconclusive;
                }
                // A root outside the carved box lies in a shell (or outside
                // the box) and is handled there.
                let point = carved.contains(&polish.point).then_some(polish.point);
                return Certify::Carved {
                    point,
                    shells: shell_boxes(bbox, &carved),
                };
            }
        }
    }

    Certify::Inconclusive
}

/// Lipschitz constant of the Jacobian over the box, from the coefficient
/// bounds of every second derivative. `None` when gradients are missing.
fn lipschitz_bound<const D: usize>(node: &ConstraintSet<D>) -> Option<f64> {
    let mut sum_sq = 0.0;
    for c in node.zeros() {
        let grads = c.grads.as_ref()?;
        for j in 0..D {
            let mut row = 0.0;
            for k in 0..D {
                row += grads[j].derive(k).coeff_abs_max();
            }
            sum_sq += row * row;
        }
    }
    Some(sum_sq.sqrt())
}

fn ball_covers_box<const D: usize>(
    center: [f64; D],
    radius: f64,
    bbox: &DomainBox<D>,
) -> bool {
    // Farthest box corner from the sample.
    let mut dist_sq = 0.0;
    for d in 0..D {
        let lo = (center[d] - bbox[d].0).abs();
        let hi = (bbox[d].1 - center[d]).abs();
        dist_sq += lo.max(hi).powi(2);
    }
    dist_sq <= radius * radius
}

/// `outer \ inner` as at most `2 * D` disjoint boxes: two slabs per
/// direction, earlier directions already narrowed to the inner interval.
fn shell_boxes<const D: usize>(outer: &DomainBox<D>, inner: &DomainBox<D>) -> Vec<DomainBox<D>> {
    let mut shells = Vec::with_capacity(2 * D);
    let mut core = *outer;
    for d in 0..D {
        if inner[d].0 > core[d].0 {
            let mut slab = core;
            slab[d] = (core[d].0, inner[d].0);
            shells.push(slab);
        }
        if inner[d].1 < core[d].1 {
            let mut slab = core;
            slab[d] = (inner[d].1, core[d].1);
            shells.push(slab);
        }
        core[d] = inner[d];
    }
    shells
}
