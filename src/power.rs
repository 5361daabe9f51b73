//! Sparse power-basis polynomials and their conversion to a Bezier control
//! mesh. This is the input-construction path: callers pose constraints as
//! monomial sums and hand the resulting meshes to the solver.
//!
//! Conversion follows Berchtold & Bowyer, "The Bernstein basis and its
//! applications in solving geometric constraint systems".

use smallvec::{SmallVec, smallvec};

use crate::{
    basis::binomial_product,
    domain::DomainBox,
    func::MultivarFunc,
    mesh::mesh_indices_incl,
};

/// One term `coeff * x_0^e_0 * ... * x_{D-1}^e_{D-1}`.
#[derive(Clone, Debug)]
pub struct Term<const D: usize> {
    pub coeff: f64,
    pub exp: [u8; D],
}

impl<const D: usize> Term<D> {
    pub fn new(coeff: f64, exp: [u8; D]) -> Self {
        Self { coeff, exp }
    }

    fn eval(&self, vars: &[f64; D]) -> f64 {
        let mut result = self.coeff;
        for i in 0..D {
            result *= vars[i].powi(self.exp[i] as i32);
        }
        result
    }

    fn exp_all_le(&self, other: &[u8; D]) -> bool {
        (0..D).all(|i| self.exp[i] <= other[i])
    }
}

/// A sparse multivariate polynomial in the power basis, terms kept sorted
/// by exponent.
#[derive(Clone, Debug, Default)]
pub struct PowerPoly<const D: usize> {
    terms: SmallVec<[Term<D>; 8]>,
}

impl<const D: usize> PowerPoly<D> {
    pub fn new() -> Self {
        Self {
            terms: SmallVec::new(),
        }
    }

    pub fn from_terms(terms: impl IntoIterator<Item = Term<D>>) -> Self {
        let mut terms: SmallVec<[Term<D>; 8]> = terms.into_iter().collect();
        terms.sort_by(|a, b| a.exp.cmp(&b.exp));
        Self { terms }.collapse()
    }

    pub fn eval(&self, vars: &[f64; D]) -> f64 {
        self.terms.iter().map(|t| t.eval(vars)).sum()
    }

    // Combine adjacent terms with equal exponents, dropping zeros.
    fn collapse(self) -> Self {
        let mut out: SmallVec<[Term<D>; 8]> = SmallVec::new();
        for term in self.terms {
            match out.last_mut() {
                Some(last) if last.exp == term.exp => {
                    last.coeff += term.coeff;
                    if last.coeff == 0.0 {
                        out.pop();
                    }
                }
                _ => out.push(term),
            }
        }
        Self { terms: out }
    }

    /// Substitute `x_i = a_i + b_i * u_i` per variable, yielding the
    /// polynomial in the shifted variables.
    fn sub_affine(&self, affines: &[[f64; 2]; D]) -> Self {
        let mut result = PowerPoly::new();
        for term in &self.terms {
            // Expand the product of per-variable binomial powers.
            let mut var_polys: SmallVec<[SmallVec<[f64; 8]>; 4]> = SmallVec::new();
            let mut lens = [0u8; D];
            for i in 0..D {
                let pow = affine_pow(affines[i], term.exp[i]);
                lens[i] = pow.len() as u8;
                var_polys.push(pow);
            }

            let mut expanded: SmallVec<[Term<D>; 8]> = smallvec![];
            for exp in crate::mesh::mesh_indices_excl(lens) {
                let mut coeff = term.coeff;
                for i in 0..D {
                    coeff *= var_polys[i][exp[i] as usize];
                }
                if coeff != 0.0 {
                    expanded.push(Term::new(coeff, exp));
                }
            }
            result = result.merge(PowerPoly::from_terms(expanded));
        }
        result
    }

    fn merge(self, other: Self) -> Self {
        let mut all = self.terms;
        all.extend(other.terms);
        all.sort_by(|a, b| a.exp.cmp(&b.exp));
        Self { terms: all }.collapse()
    }

    /// Bernstein control mesh of this polynomial over `bbox`, as a Bezier
    /// function the solver accepts.
    pub fn to_bezier(&self, bbox: impl Into<DomainBox<D>>) -> MultivarFunc<D> {
        let bbox = bbox.into();

        // Affine map from bbox onto the unit box, then the Berchtold sum.
        let affines: [[f64; 2]; D] = std::array::from_fn(|i| {
            let (min_i, max_i) = bbox[i];
            [min_i, max_i - min_i]
        });
        let unit_poly = self.sub_affine(&affines);

        let mut max_degs = [0u8; D];
        for term in &unit_poly.terms {
            for (i, &exp) in term.exp.iter().enumerate() {
                max_degs[i] = max_degs[i].max(exp);
            }
        }

        let shape: [u8; D] = std::array::from_fn(|i| (max_degs[i] + 1).max(2));
        let num: usize = shape.iter().map(|&s| s as usize).product();
        let mut coeffs = vec![0.0; num];

        let mut flat = 0;
        for control in mesh_indices_incl(std::array::from_fn(|i| shape[i] - 1)) {
            coeffs[flat] = unit_poly
                .terms
                .iter()
                .filter(|t| t.exp_all_le(&control))
                .map(|t| {
                    let num = binomial_product(control, t.exp) as f64;
                    let den = binomial_product(max_degs, t.exp) as f64;
                    t.coeff * num / den
                })
                .sum();
            flat += 1;
        }

        MultivarFunc::bezier(&coeffs, shape.map(usize::from), bbox)
    }
}

// (a + b*u)^e as coefficients of u^0..u^e.
fn affine_pow([a, b]: [f64; 2], e: u8) -> SmallVec<[f64; 8]> {
    let mut result: SmallVec<[f64; 8]> = smallvec![1.0];
    for _ in 0..e {
        let mut next: SmallVec<[f64; 8]> = smallvec![0.0; result.len() + 1];
        for (i, &c) in result.iter().enumerate() {
            next[i] += c * a;
            next[i + 1] += c * b;
        }
        result = next;
    }
    result
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use assertables::assert_lt;

    use crate::test_utils::{linspace, unit_box};

    use super::*;

    #[test]
    fn eval_circle() {
        // f(x, y) = -1 + x^2 + y^2
        let circle = PowerPoly::from_terms([
            Term::new(-1.0, [0, 0]),
            Term::new(1.0, [2, 0]),
            Term::new(1.0, [0, 2]),
        ]);

        assert_abs_diff_eq!(circle.eval(&[0.0, 0.0]), -1.0);
        assert_abs_diff_eq!(circle.eval(&[-1.0, 0.0]), 0.0);
        assert_abs_diff_eq!(circle.eval(&[1.0, 0.0]), 0.0);
        assert_abs_diff_eq!(circle.eval(&[1.0, 1.0]), 1.0);
    }

    #[test]
    fn duplicate_terms_collapse() {
        let p = PowerPoly::from_terms([
            Term::new(1.0, [1]),
            Term::new(2.0, [1]),
            Term::new(-3.0, [0]),
        ]);
        assert_abs_diff_eq!(p.eval(&[2.0]), 3.0);
    }

    #[test]
    fn to_bezier_linear_plane() {
        let poly = PowerPoly::from_terms([
            Term::new(1.0, [1, 0]),
            Term::new(2.0, [0, 1]),
            Term::new(3.0, [0, 0]),
        ]);

        let f = poly.to_bezier(unit_box());
        let expected = MultivarFunc::bezier(&[3.0, 5.0, 4.0, 6.0], [2, 2], unit_box());
        assert_abs_diff_eq!(f, expected);
    }

    #[test]
    fn to_bezier_circle_mesh() {
        let circle = PowerPoly::from_terms([
            Term::new(-1.0, [0, 0]),
            Term::new(1.0, [2, 0]),
            Term::new(1.0, [0, 2]),
        ]);

        let f = circle.to_bezier([(-1.0, 1.0), (-1.0, 1.0)]);
        let expected = MultivarFunc::bezier(
            &[
                1.0, -1.0, 1.0, //
                -1.0, -3.0, -1.0, //
                1.0, -1.0, 1.0,
            ],
            [3, 3],
            [(-1.0, 1.0), (-1.0, 1.0)],
        );
        assert_abs_diff_eq!(f, expected);
    }

    #[test]
    fn to_bezier_matches_eval_on_shifted_box() {
        let poly = PowerPoly::from_terms([
            Term::new(2.0, [0, 0]),
            Term::new(1.0, [1, 0]),
            Term::new(-4.0, [1, 1]),
            Term::new(0.5, [2, 1]),
        ]);
        let bbox = [(1.0, 3.0), (-2.0, 0.5)];
        let f = poly.to_bezier(bbox);

        let grid = itertools::iproduct!(linspace(1.0, 3.0, 7), linspace(-2.0, 0.5, 7));
        for (x, y) in grid {
            assert_lt!((f.eval([x, y]) - poly.eval(&[x, y])).abs(), 1e-9);
        }
    }
}
