//! Small dense solves for the cone, hyperplane, and Kantorovich stages.
//! Closed-form kernels for one and two directions, nalgebra LU for three
//! and four, dispatched on the const dimension.

/// Largest parameter-space dimension the solver accepts.
pub const MAX_DIM: usize = 4;

const SINGULAR_EPS: f64 = 1e-12;

/// Solve `a * x = rhs`. `None` when the matrix is numerically singular.
pub(crate) fn solve_linear<const D: usize>(a: &[[f64; D]; D], rhs: &[f64; D]) -> Option<[f64; D]> {
    match D {
        1 => {
            if a[0][0].abs() < SINGULAR_EPS {
                return None;
            }
            let mut out = [0.0; D];
            out[0] = rhs[0] / a[0][0];
            Some(out)
        }
        2 => solve2(a, rhs),
        3 => solve_na3(a, rhs),
        4 => solve_na4(a, rhs),
        _ => None,
    }
}

/// Frobenius norm of the inverse, from column-by-column solves. An upper
/// bound on `1/σ_min`, which is how the cone test and the certifier use it.
pub(crate) fn inverse_frobenius_norm<const D: usize>(a: &[[f64; D]; D]) -> Option<f64> {
    let mut sum = 0.0;
    for col in 0..D {
        let mut e = [0.0; D];
        e[col] = 1.0;
        let x = solve_linear(a, &e)?;
        for xi in x {
            sum += xi * xi;
        }
    }
    Some(sum.sqrt())
}

fn solve2<const D: usize>(a: &[[f64; D]; D], rhs: &[f64; D]) -> Option<[f64; D]> {
    debug_assert!(D == 2);
    let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
    if det.abs() < SINGULAR_EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut out = [0.0; D];
    out[0] = inv_det * (a[1][1] * rhs[0] - a[0][1] * rhs[1]);
    out[1] = inv_det * (-a[1][0] * rhs[0] + a[0][0] * rhs[1]);
    Some(out)
}

macro_rules! impl_solve_na {
    ($fn_name:ident, $N:expr) => {
        fn $fn_name<const D: usize>(a: &[[f64; D]; D], rhs: &[f64; D]) -> Option<[f64; D]> {
            use nalgebra as na;
            debug_assert!(D == $N);

            let lhs = na::SMatrix::<f64, $N, $N>::from_fn(|r, c| a[r][c]);
            if lhs.determinant().abs() < SINGULAR_EPS {
                return None;
            }
            let rhs_v = na::SVector::<f64, $N>::from_fn(|r, _c| rhs[r]);
            let sol = lhs.lu().solve(&rhs_v)?;

            let mut out = [0.0; D];
            for i in 0..D {
                out[i] = sol[i];
            }
            Some(out)
        }
    };
}

impl_solve_na!(solve_na3, 3);
impl_solve_na!(solve_na4, 4);

pub(crate) fn norm<const D: usize>(v: &[f64; D]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
