/// The current Cartesian product of per-direction parameter intervals under
/// examination. Shrinks under reduction, splits under subdivision, never
/// grows.
#[derive(Clone, Copy, Debug)]
pub struct DomainBox<const D: usize>(pub [(f64, f64); D]);

impl<const D: usize> DomainBox<D> {
    pub fn unit() -> Self {
        DomainBox(std::array::from_fn(|_| (0.0, 1.0)))
    }

    pub fn center(&self) -> [f64; D] {
        std::array::from_fn(|i| {
            let (min, max) = self.0[i];
            0.5 * (min + max)
        })
    }

    pub fn is_valid(&self) -> bool {
        for i in 0..D {
            let (min, max) = self.0[i];
            if min > max {
                return false;
            }
        }
        true
    }

    pub fn width(&self, dim: usize) -> f64 {
        let (min, max) = self.0[dim];
        max - min
    }

    pub fn max_width(&self) -> (usize, f64) {
        let mut widest_dim = 0;
        let mut widest = 0.0;
        for i in 0..D {
            let w = self.width(i);
            if w > widest {
                widest = w;
                widest_dim = i;
            }
        }
        (widest_dim, widest)
    }

    /// True when every direction is at or below `tol`: the terminal
    /// condition of the subdivision driver.
    pub fn all_below(&self, tol: f64) -> bool {
        (0..D).all(|i| self.width(i) <= tol)
    }

    pub fn contains(&self, point: &[f64; D]) -> bool {
        for i in 0..D {
            let (min, max) = self.0[i];
            if point[i] < min || point[i] > max {
                return false;
            }
        }
        true
    }

    /// Split one direction at an interior parameter, yielding the two
    /// sub-boxes. `t` must lie strictly inside the interval.
    pub fn split_at(&self, dim: usize, t: f64) -> (Self, Self) {
        let (min, max) = self.0[dim];
        debug_assert!(min < t && t < max, "split parameter outside interval");

        let mut lower = *self;
        let mut upper = *self;
        lower.0[dim] = (min, t);
        upper.0[dim] = (t, max);
        (lower, upper)
    }

    pub fn split_mid(&self, dim: usize) -> (Self, Self) {
        let (min, max) = self.0[dim];
        self.split_at(dim, 0.5 * (min + max))
    }

    /// Tighten each interval against `other`. The result may be invalid
    /// (empty); callers check `is_valid`.
    pub fn intersect(&mut self, other: &Self) {
        for d in 0..D {
            self.0[d].0 = self.0[d].0.max(other.0[d].0);
            self.0[d].1 = self.0[d].1.min(other.0[d].1);
        }
    }

    /// Pad every interval outward by `eps`, clamped to `outer`. Used after
    /// clipping so rounding cannot lose a root at an interval end.
    pub fn pad_within(&mut self, eps: f64, outer: &Self) {
        for d in 0..D {
            self.0[d].0 = (self.0[d].0 - eps).max(outer.0[d].0);
            self.0[d].1 = (self.0[d].1 + eps).min(outer.0[d].1);
        }
    }

    pub fn volume(&self) -> f64 {
        (0..D).map(|i| self.width(i).max(0.0)).product()
    }
}

impl<const D: usize> From<[(f64, f64); D]> for DomainBox<D> {
    fn from(bounds: [(f64, f64); D]) -> Self {
        DomainBox(bounds)
    }
}

impl<const D: usize> std::ops::Index<usize> for DomainBox<D> {
    type Output = (f64, f64);

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<const D: usize> std::ops::IndexMut<usize> for DomainBox<D> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl<const D: usize> PartialEq for DomainBox<D> {
    fn eq(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(&(a_min, a_max), &(b_min, b_max))| a_min == b_min && a_max == b_max)
    }
}

#[cfg(test)]
impl<const D: usize> approx::AbsDiffEq for DomainBox<D> {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(&(a_min, a_max), &(b_min, b_max))| {
                (a_min - b_min).abs() <= epsilon && (a_max - b_max).abs() <= epsilon
            })
    }
}
