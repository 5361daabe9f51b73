use smallvec::SmallVec;

use crate::{
    domain::DomainBox,
    func::{BasisKind, MultivarFunc},
};

/// How a constraint's function must relate to zero at a solution point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Equality; participates in the uniqueness certifier's Jacobian and in
    /// numeric refinement. Scalar-valued only.
    Zero,
    /// Equality used for subdivision pruning only, excluded from the
    /// certifier and refinement. Scalar-valued only.
    ZeroSubdiv,
    /// Strictly positive. Vector-valued allowed: at least one component
    /// must satisfy the inequality (OR semantics).
    Positive,
    /// Strictly negative, OR semantics as for `Positive`.
    Negative,
}

impl ConstraintKind {
    pub fn is_equality(&self) -> bool {
        matches!(self, ConstraintKind::Zero | ConstraintKind::ZeroSubdiv)
    }
}

/// A function (or several, for a vector-valued inequality) paired with the
/// sign condition it imposes.
#[derive(Clone, Debug)]
pub struct Constraint<const D: usize> {
    pub(crate) funcs: SmallVec<[MultivarFunc<D>; 1]>,
    pub(crate) kind: ConstraintKind,

    // Gradient functions of funcs[0], filled in by the solver entry for
    // equality constraints so later stages evaluate value and gradient from
    // the same subdivided meshes.
    pub(crate) grads: Option<Box<[MultivarFunc<D>; D]>>,
}

impl<const D: usize> Constraint<D> {
    pub fn zero(func: MultivarFunc<D>) -> Self {
        Self::scalar(func, ConstraintKind::Zero)
    }

    pub fn zero_subdiv(func: MultivarFunc<D>) -> Self {
        Self::scalar(func, ConstraintKind::ZeroSubdiv)
    }

    pub fn positive(func: MultivarFunc<D>) -> Self {
        Self::scalar(func, ConstraintKind::Positive)
    }

    pub fn negative(func: MultivarFunc<D>) -> Self {
        Self::scalar(func, ConstraintKind::Negative)
    }

    /// Vector-valued inequality: satisfied where at least one component is.
    pub fn any_of(funcs: impl IntoIterator<Item = MultivarFunc<D>>, kind: ConstraintKind) -> Self {
        Self {
            funcs: funcs.into_iter().collect(),
            kind,
            grads: None,
        }
    }

    fn scalar(func: MultivarFunc<D>, kind: ConstraintKind) -> Self {
        let mut funcs = SmallVec::new();
        funcs.push(func);
        Self {
            funcs,
            kind,
            grads: None,
        }
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub(crate) fn func(&self) -> &MultivarFunc<D> {
        &self.funcs[0]
    }

    pub(crate) fn cache_gradients(&mut self) {
        let f = &self.funcs[0];
        self.grads = Some(Box::new(std::array::from_fn(|d| f.derive(d))));
    }

    pub(crate) fn eval_grad(&self, point: [f64; D]) -> [f64; D] {
        match &self.grads {
            Some(grads) => std::array::from_fn(|d| grads[d].eval(point)),
            None => std::array::from_fn(|d| self.funcs[0].derive(d).eval(point)),
        }
    }

    /// True at a point when the sign condition holds, with OR semantics
    /// across components and a tolerance band for equalities.
    pub(crate) fn satisfied_at(&self, point: [f64; D], eq_tol: f64) -> bool {
        match self.kind {
            ConstraintKind::Zero | ConstraintKind::ZeroSubdiv => {
                self.funcs[0].eval(point).abs() <= eq_tol
            }
            ConstraintKind::Positive => self.funcs.iter().any(|f| f.eval(point) > 0.0),
            ConstraintKind::Negative => self.funcs.iter().any(|f| f.eval(point) < 0.0),
        }
    }

    /// Definitely-infeasible test over the constraint's current sub-box,
    /// from the convex-hull bound on the coefficient range.
    ///
    /// Returns true when the constraint provably cannot be satisfied
    /// anywhere in the box; false is always inconclusive.
    pub(crate) fn infeasible(&self) -> bool {
        match self.kind {
            ConstraintKind::Zero | ConstraintKind::ZeroSubdiv => {
                let (min, max) = self.funcs[0].coeff_range();
                min > 0.0 || max < 0.0
            }
            // A single passing component makes the whole constraint
            // inconclusive.
            ConstraintKind::Positive => self.funcs.iter().all(|f| f.coeff_range().1 <= 0.0),
            ConstraintKind::Negative => self.funcs.iter().all(|f| f.coeff_range().0 >= 0.0),
        }
    }

    fn subsection(&self, bbox: &DomainBox<D>) -> Self {
        Self {
            funcs: self.funcs.iter().map(|f| f.subsection(*bbox)).collect(),
            kind: self.kind,
            grads: self
                .grads
                .as_ref()
                .map(|g| Box::new(std::array::from_fn(|d| g[d].subsection(*bbox)))),
        }
    }
}

/// The full constraint system restricted to one sub-box: the working unit
/// of the subdivision driver. Constraints are stably partitioned
/// Zero → ZeroSubdiv → inequality, with the group counts tracked.
#[derive(Clone, Debug)]
pub struct ConstraintSet<const D: usize> {
    pub(crate) constraints: Vec<Constraint<D>>,
    pub(crate) domain: DomainBox<D>,
    pub(crate) num_zero: usize,
    pub(crate) num_zero_subdiv: usize,
}

impl<const D: usize> ConstraintSet<D> {
    /// Stable partition by kind. Constraint domains must already agree;
    /// the solver entry validates that before building the set.
    pub(crate) fn partition(constraints: Vec<Constraint<D>>, domain: DomainBox<D>) -> Self {
        let mut zeros = Vec::new();
        let mut subdivs = Vec::new();
        let mut inequalities = Vec::new();
        for c in constraints {
            match c.kind {
                ConstraintKind::Zero => zeros.push(c),
                ConstraintKind::ZeroSubdiv => subdivs.push(c),
                _ => inequalities.push(c),
            }
        }

        let num_zero = zeros.len();
        let num_zero_subdiv = subdivs.len();
        zeros.extend(subdivs);
        zeros.extend(inequalities);
        Self {
            constraints: zeros,
            domain,
            num_zero,
            num_zero_subdiv,
        }
    }

    pub(crate) fn num_equalities(&self) -> usize {
        self.num_zero + self.num_zero_subdiv
    }

    /// The `Zero` group: the constraints the certifier and refinement see.
    pub(crate) fn zeros(&self) -> &[Constraint<D>] {
        &self.constraints[..self.num_zero]
    }

    pub(crate) fn basis_kind(&self) -> Option<BasisKind> {
        self.constraints.first().map(|c| c.func().basis_kind())
    }

    /// Any constraint provably infeasible prunes the whole box.
    pub(crate) fn any_infeasible(&self) -> bool {
        self.constraints.iter().any(|c| c.infeasible())
    }

    /// Restrict every constraint (and cached gradients) to a sub-box,
    /// producing a brand-new set.
    pub(crate) fn subsection(&self, bbox: DomainBox<D>) -> Self {
        Self {
            constraints: self.constraints.iter().map(|c| c.subsection(&bbox)).collect(),
            domain: bbox,
            num_zero: self.num_zero,
            num_zero_subdiv: self.num_zero_subdiv,
        }
    }

    pub(crate) fn split_at(&self, dim: usize, t: f64) -> (Self, Self) {
        let (lower_box, upper_box) = self.domain.split_at(dim, t);
        (self.subsection(lower_box), self.subsection(upper_box))
    }
}

#[cfg(test)]
mod tests {
    use crate::power::{PowerPoly, Term};
    use crate::test_utils::unit_box;

    use super::*;

    fn line(offset: f64) -> MultivarFunc<1> {
        PowerPoly::from_terms([Term::new(1.0, [1]), Term::new(offset, [0])]).to_bezier(unit_box())
    }

    #[test]
    fn sign_test_prunes_one_sided_equality() {
        // u + 2 has no zero in [0, 1].
        let c = Constraint::zero(line(2.0));
        assert!(c.infeasible());

        // u - 0.5 might.
        let c = Constraint::zero(line(-0.5));
        assert!(!c.infeasible());
    }

    #[test]
    fn sign_test_or_semantics_for_inequalities() {
        // Both components non-positive everywhere: infeasible.
        let c = Constraint::any_of([line(-2.0), line(-3.0)], ConstraintKind::Positive);
        assert!(c.infeasible());

        // One component can be positive: inconclusive.
        let c = Constraint::any_of([line(-2.0), line(-0.5)], ConstraintKind::Positive);
        assert!(!c.infeasible());
    }

    #[test]
    fn partition_is_stable_with_counts() {
        let set = ConstraintSet::partition(
            vec![
                Constraint::positive(line(0.0)),
                Constraint::zero(line(-0.1)),
                Constraint::zero_subdiv(line(-0.2)),
                Constraint::zero(line(-0.3)),
            ],
            DomainBox::unit(),
        );

        assert_eq!(set.num_zero, 2);
        assert_eq!(set.num_zero_subdiv, 1);
        assert_eq!(set.constraints[0].kind(), ConstraintKind::Zero);
        assert_eq!(set.constraints[1].kind(), ConstraintKind::Zero);
        assert_eq!(set.constraints[2].kind(), ConstraintKind::ZeroSubdiv);
        assert_eq!(set.constraints[3].kind(), ConstraintKind::Positive);

        // Stable: the two Zero constraints keep their input order.
        let (min0, _) = set.constraints[0].func().coeff_range();
        let (min1, _) = set.constraints[1].func().coeff_range();
        assert!(min0 > min1);
    }

    #[test]
    fn gradients_follow_subdivision() {
        let circle = PowerPoly::from_terms([
            Term::new(-1.0, [0, 0]),
            Term::new(1.0, [2, 0]),
            Term::new(1.0, [0, 2]),
        ]);
        let mut c = Constraint::zero(circle.to_bezier([(-1.0, 1.0), (-1.0, 1.0)]));
        c.cache_gradients();

        let sub = c.subsection(&DomainBox([(0.0, 1.0), (-0.5, 0.5)]));
        let g = sub.eval_grad([0.5, 0.25]);
        approx::assert_abs_diff_eq!(g[0], 1.0, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(g[1], 0.5, epsilon = 1e-9);
    }
}
