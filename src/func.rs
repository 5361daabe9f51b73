use smallvec::SmallVec;

use crate::{
    basis::{bezier_node, greville_node},
    domain::DomainBox,
    mesh::{mesh_indices_excl, strides_for},
};

/// Which piecewise-polynomial basis a function is expressed in. One solve
/// call must not mix kinds across constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BasisKind {
    Bezier,
    BSpline,
}

type Coeffs = SmallVec<[f64; 32]>;
type Knots = SmallVec<[f64; 16]>;

/// A scalar tensor-product piecewise-polynomial over a `D`-dimensional
/// parameter box.
///
/// The control-coefficient mesh is flattened with the last direction
/// contiguous. The convex hull of the `(node, coeff)` graph points bounds
/// the function's graph over the domain, which is what every pruning test
/// in the solver relies on.
#[derive(Clone, Debug)]
pub struct MultivarFunc<const D: usize> {
    pub(crate) coeffs: Coeffs,

    // Number of control coefficients along each direction.
    pub(crate) shape: [usize; D],

    // Stride lengths for each direction in the flattened mesh.
    strides: [usize; D],

    pub(crate) domain: DomainBox<D>,

    // Per-direction clamped knot vectors; absent for the Bezier basis.
    knots: Option<[Knots; D]>,

    // Basis order (degree + 1) per direction. Equals `shape` for Bezier.
    orders: [usize; D],
}

impl<const D: usize> MultivarFunc<D> {
    /// Build a Bezier function from a flattened control mesh.
    ///
    /// # Panics
    /// Panics if the mesh size does not match `shape`, or any direction has
    /// fewer than one coefficient.
    pub fn bezier(coeffs: &[f64], shape: [usize; D], domain: impl Into<DomainBox<D>>) -> Self {
        assert!(
            shape.iter().product::<usize>() == coeffs.len(),
            "mesh size mismatch with shape"
        );
        assert!(shape.iter().all(|&s| s >= 1), "empty mesh direction");

        Self {
            coeffs: coeffs.iter().copied().collect(),
            shape,
            strides: strides_for(shape),
            domain: domain.into(),
            knots: None,
            orders: shape,
        }
    }

    /// Build a B-spline function from a flattened control mesh and clamped
    /// per-direction knot vectors. The domain is read off the knots.
    ///
    /// # Panics
    /// Panics on a knot vector whose length is not `shape[d] + orders[d]`,
    /// that is not non-decreasing, or that is not clamped at both ends.
    pub fn bspline(
        coeffs: &[f64],
        shape: [usize; D],
        orders: [usize; D],
        knots: [&[f64]; D],
    ) -> Self {
        assert!(
            shape.iter().product::<usize>() == coeffs.len(),
            "mesh size mismatch with shape"
        );

        let mut domain = [(0.0, 0.0); D];
        let mut owned: [Knots; D] = std::array::from_fn(|_| Knots::new());
        for d in 0..D {
            let k = orders[d];
            let n = shape[d];
            assert!(k >= 1 && n >= k, "order/length mismatch in direction {d}");
            assert!(knots[d].len() == n + k, "knot count mismatch in direction {d}");
            assert!(
                knots[d].windows(2).all(|w| w[0] <= w[1]),
                "decreasing knot vector in direction {d}"
            );
            assert!(
                knots[d][k - 1] == knots[d][0] && knots[d][n] == knots[d][n + k - 1],
                "knot vector not clamped in direction {d}"
            );
            domain[d] = (knots[d][k - 1], knots[d][n]);
            owned[d] = knots[d].iter().copied().collect();
        }

        Self {
            coeffs: coeffs.iter().copied().collect(),
            shape,
            strides: strides_for(shape),
            domain: DomainBox(domain),
            knots: Some(owned),
            orders,
        }
    }

    pub fn basis_kind(&self) -> BasisKind {
        if self.knots.is_some() {
            BasisKind::BSpline
        } else {
            BasisKind::Bezier
        }
    }

    pub fn domain(&self) -> &DomainBox<D> {
        &self.domain
    }

    pub fn shape(&self) -> [usize; D] {
        self.shape
    }

    /// Min and max of the control coefficients: a guaranteed bound on the
    /// function's range over its domain.
    pub fn coeff_range(&self) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &c in &self.coeffs {
            min = min.min(c);
            max = max.max(c);
        }
        (min, max)
    }

    pub fn coeff_abs_max(&self) -> f64 {
        self.coeffs.iter().fold(0.0f64, |m, c| m.max(c.abs()))
    }

    pub fn scale_coeffs(&mut self, factor: f64) {
        for c in &mut self.coeffs {
            *c *= factor;
        }
    }

    /// Node abscissa paired with control index `i` along `dim`: uniform
    /// fractions for Bezier, Greville abscissas for B-spline.
    pub fn node(&self, dim: usize, i: usize) -> f64 {
        match &self.knots {
            None => bezier_node(i, self.shape[dim], self.domain[dim]),
            Some(knots) => greville_node(i, self.orders[dim] - 1, &knots[dim]),
        }
    }

    /// An interior knot along `dim`, preferring the one nearest the middle
    /// of the current interval. Bezier directions have none.
    pub fn interior_knot(&self, dim: usize) -> Option<f64> {
        let knots = self.knots.as_ref()?;
        let (min, max) = self.domain[dim];
        let mid = 0.5 * (min + max);
        // Leave room so a split at the knot keeps both halves non-trivial.
        let margin = 1e-3 * (max - min);
        knots[dim]
            .iter()
            .copied()
            .filter(|&t| t > min + margin && t < max - margin)
            .min_by(|a, b| {
                (a - mid)
                    .abs()
                    .partial_cmp(&(b - mid).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Graph points `(node coordinates, coefficient)` of every control
    /// coefficient; the function's graph lies in their convex hull.
    pub fn graph_points(&self) -> impl Iterator<Item = ([f64; D], f64)> + '_ {
        mesh_indices_excl(self.shape).map(move |index| {
            let coord = std::array::from_fn(|d| self.node(d, index[d]));
            (coord, self.coeffs[self.flat_index(index)])
        })
    }

    /// Evaluate at a parameter point by collapsing one direction at a time
    /// (de Casteljau for Bezier directions, de Boor for B-spline ones).
    pub fn eval(&self, point: [f64; D]) -> f64 {
        let mut cur = self.coeffs.clone();
        let mut live_shape = self.shape;

        let mut lane: Coeffs = SmallVec::new();
        for d in 0..D {
            live_shape[d] = 1;
            for start_index in mesh_indices_excl(live_shape) {
                let start = self.flat_index(start_index);
                lane.clear();
                for i in 0..self.shape[d] {
                    lane.push(cur[start + i * self.strides[d]]);
                }
                cur[start] = self.eval_lane(d, &mut lane, point[d]);
            }
        }
        cur[0]
    }

    fn eval_lane(&self, dim: usize, lane: &mut [f64], x: f64) -> f64 {
        match &self.knots {
            None => {
                let (min, max) = self.domain[dim];
                let t = if max == min {
                    0.5
                } else {
                    (x - min) / (max - min)
                };
                de_casteljau_eval(lane, t)
            }
            Some(knots) => de_boor_eval(lane, &knots[dim], self.orders[dim], x),
        }
    }

    /// Exact partial derivative along `dim`, as a new function over the
    /// same domain.
    pub fn derive(&self, dim: usize) -> Self {
        let n = self.shape[dim];
        let p = self.orders[dim] - 1;
        if p == 0 {
            // Constant along this direction; derivative is identically zero.
            let mut out = self.clone();
            out.coeffs.iter_mut().for_each(|c| *c = 0.0);
            return out;
        }

        match &self.knots {
            None => {
                let width = self.domain.width(dim);
                let scale = p as f64 / width;
                let mut out = self.map_lanes(dim, n - 1, |src, dst| {
                    for i in 0..n - 1 {
                        dst[i] = scale * (src[i + 1] - src[i]);
                    }
                });
                out.orders[dim] = n - 1;
                out
            }
            Some(knots) => {
                let kv = knots[dim].clone();
                let k = self.orders[dim];
                let mut out = self.map_lanes(dim, n - 1, |src, dst| {
                    for i in 0..n - 1 {
                        let den = kv[i + k] - kv[i + 1];
                        dst[i] = if den == 0.0 {
                            0.0
                        } else {
                            p as f64 * (src[i + 1] - src[i]) / den
                        };
                    }
                });
                let new_knots: Knots = kv[1..kv.len() - 1].iter().copied().collect();
                out.orders[dim] = k - 1;
                out.knots.as_mut().unwrap()[dim] = new_knots;
                out
            }
        }
    }

    /// Split into two functions at parameter `t` along `dim`, each owning
    /// its half of the domain. `t` must lie strictly inside the interval.
    pub fn split_at(&self, dim: usize, t: f64) -> (Self, Self) {
        let (min, max) = self.domain[dim];
        debug_assert!(min < t && t < max, "split parameter outside interval");

        match &self.knots {
            None => {
                let tn = (t - min) / (max - min);
                let n = self.shape[dim];

                let mut lower = self.map_lanes(dim, n, |src, dst| {
                    dst.copy_from_slice(src);
                    de_casteljau_keep_lower(dst, tn);
                });
                lower.domain[dim] = (min, t);

                let mut upper = self.map_lanes(dim, n, |src, dst| {
                    dst.copy_from_slice(src);
                    de_casteljau_keep_upper(dst, tn);
                });
                upper.domain[dim] = (t, max);

                (lower, upper)
            }
            Some(_) => self.split_bspline(dim, t),
        }
    }

    /// Re-express the function over a sub-box of its domain. Every call
    /// produces brand-new meshes; the original is untouched.
    pub fn subsection(&self, bbox: impl Into<DomainBox<D>>) -> Self {
        let bbox = bbox.into();
        let mut out = self.clone();
        for d in 0..D {
            let (min, max) = out.domain[d];
            let (t0, t1) = bbox[d];
            debug_assert!(min <= t0 && t1 <= max, "subsection outside domain");
            if t1 < max {
                out = out.split_at(d, t1).0;
            }
            if t0 > min {
                out = out.split_at(d, t0).1;
            }
        }
        out
    }

    // B-spline split: raise the multiplicity of `t` to the degree via Boehm
    // insertion, then cut the mesh and knot vector at the now-interpolating
    // control point.
    fn split_bspline(&self, dim: usize, t: f64) -> (Self, Self) {
        let p = self.orders[dim] - 1;

        if p == 0 {
            // Piecewise constant: cut the knot line at the containing span.
            let knots = &self.knots.as_ref().unwrap()[dim];
            let n = self.shape[dim];
            let mut span = 0;
            while span + 1 < n && knots[span + 1] <= t {
                span += 1;
            }
            let mut left_knots: Knots = knots[..=span].iter().copied().collect();
            left_knots.push(t);
            let mut right_knots: Knots = SmallVec::new();
            right_knots.push(t);
            right_knots.extend(knots[span + 1..].iter().copied());

            let left = self.slice_lanes(dim, 0, span + 1, left_knots);
            let right = self.slice_lanes(dim, span, n, right_knots);
            return (left, right);
        }

        let mut cur = self.clone();
        let mult = cur.knots.as_ref().unwrap()[dim]
            .iter()
            .filter(|&&u| u == t)
            .count();
        for _ in mult..p {
            cur = cur.insert_knot(dim, t);
        }

        let knots = cur.knots.as_ref().unwrap()[dim].clone();
        let n = cur.shape[dim];
        // First of the p copies of t.
        let k0 = knots
            .iter()
            .position(|&u| u == t)
            .expect("inserted knot not found");

        let mut left_knots: Knots = knots[..k0 + p].iter().copied().collect();
        left_knots.push(t);
        let mut right_knots: Knots = SmallVec::new();
        right_knots.push(t);
        right_knots.extend(knots[k0..].iter().copied());

        let left = cur.slice_lanes(dim, 0, k0, left_knots);
        let right = cur.slice_lanes(dim, k0 - 1, n, right_knots);
        (left, right)
    }

    /// Boehm single-knot insertion along `dim`; the function is unchanged,
    /// the mesh gains one row.
    fn insert_knot(&self, dim: usize, t: f64) -> Self {
        let knots = &self.knots.as_ref().unwrap()[dim];
        let p = self.orders[dim] - 1;
        let n = self.shape[dim];

        // Span index: last j with knots[j] <= t < knots[j + 1].
        let mut span = p;
        while span + 1 < n && knots[span + 1] <= t {
            span += 1;
        }

        let mut alphas: Knots = SmallVec::new();
        for i in (span - p + 1)..=span {
            let den = knots[i + p] - knots[i];
            alphas.push(if den == 0.0 { 0.0 } else { (t - knots[i]) / den });
        }

        let lo = span - p + 1;
        let mut out = self.map_lanes(dim, n + 1, |src, dst| {
            for i in 0..=span - p {
                dst[i] = src[i];
            }
            for i in lo..=span {
                let a = alphas[i - lo];
                dst[i] = (1.0 - a) * src[i - 1] + a * src[i];
            }
            for i in span + 1..n + 1 {
                dst[i] = src[i - 1];
            }
        });

        let kv = out.knots.as_mut().unwrap();
        kv[dim].insert(span + 1, t);
        out
    }

    // Keep control indices `[from, to)` along `dim`, installing the given
    // knot vector for that direction.
    fn slice_lanes(&self, dim: usize, from: usize, to: usize, new_knots: Knots) -> Self {
        let mut out = self.map_lanes(dim, to - from, |src, dst| {
            dst.copy_from_slice(&src[from..to]);
        });
        let (min, max) = {
            let k = out.orders[dim];
            (new_knots[k - 1], new_knots[to - from])
        };
        out.knots.as_mut().unwrap()[dim] = new_knots;
        out.domain[dim] = (min, max);
        out
    }

    // Rebuild the mesh by transforming each 1-D lane along `dim` with `f`,
    // changing that direction's length to `new_len`.
    fn map_lanes(&self, dim: usize, new_len: usize, f: impl Fn(&[f64], &mut [f64])) -> Self {
        let mut new_shape = self.shape;
        new_shape[dim] = new_len;
        let new_strides = strides_for(new_shape);

        let mut new_coeffs: Coeffs = SmallVec::new();
        new_coeffs.resize(new_shape.iter().product(), 0.0);

        let mut lane_shape = self.shape;
        lane_shape[dim] = 1;

        let mut src_lane: Coeffs = SmallVec::new();
        let mut dst_lane: Coeffs = SmallVec::new();
        for start_index in mesh_indices_excl(lane_shape) {
            src_lane.clear();
            let start = self.flat_index(start_index);
            for i in 0..self.shape[dim] {
                src_lane.push(self.coeffs[start + i * self.strides[dim]]);
            }

            dst_lane.clear();
            dst_lane.resize(new_len, 0.0);
            f(&src_lane, &mut dst_lane);

            let mut dst_start = 0;
            for i in 0..D {
                dst_start += start_index[i] * new_strides[i];
            }
            for i in 0..new_len {
                new_coeffs[dst_start + i * new_strides[dim]] = dst_lane[i];
            }
        }

        Self {
            coeffs: new_coeffs,
            shape: new_shape,
            strides: new_strides,
            domain: self.domain,
            knots: self.knots.clone(),
            orders: self.orders,
        }
    }

    fn flat_index(&self, index: [usize; D]) -> usize {
        let mut flat = 0;
        for i in 0..D {
            flat += index[i] * self.strides[i];
        }
        flat
    }
}

/// Evaluate a Bezier lane at normalized `t`, destroying the buffer.
fn de_casteljau_eval(lane: &mut [f64], t: f64) -> f64 {
    let s = 1.0 - t;
    let n = lane.len();
    for r in 1..n {
        for i in 0..n - r {
            lane[i] = s * lane[i] + t * lane[i + 1];
        }
    }
    lane[0]
}

/// In-place de Casteljau pass leaving the control points of the `[0, t]`
/// segment in the buffer.
fn de_casteljau_keep_lower(lane: &mut [f64], t: f64) {
    let s = 1.0 - t;
    let n = lane.len();
    for r in 1..n {
        for i in (r..n).rev() {
            lane[i] = s * lane[i - 1] + t * lane[i];
        }
    }
}

/// In-place de Casteljau pass leaving the control points of the `[t, 1]`
/// segment in the buffer.
fn de_casteljau_keep_upper(lane: &mut [f64], t: f64) {
    let s = 1.0 - t;
    let n = lane.len();
    for r in 1..n {
        for i in 0..n - r {
            lane[i] = s * lane[i] + t * lane[i + 1];
        }
    }
}

/// Evaluate a clamped B-spline lane at `x` via de Boor.
fn de_boor_eval(lane: &mut [f64], knots: &[f64], order: usize, x: f64) -> f64 {
    let p = order - 1;
    let n = lane.len();
    let x = x.clamp(knots[p], knots[n]);

    // Span: largest j in [p, n - 1] with knots[j] <= x.
    let mut span = p;
    while span + 1 < n && knots[span + 1] <= x {
        span += 1;
    }

    let mut d: SmallVec<[f64; 8]> = SmallVec::new();
    for i in 0..=p {
        d.push(lane[span - p + i]);
    }
    for r in 1..=p {
        for i in (r..=p).rev() {
            let num = x - knots[span - p + i];
            let den = knots[span + 1 + i - r] - knots[span - p + i];
            let alpha = if den == 0.0 { 0.0 } else { num / den };
            d[i] = (1.0 - alpha) * d[i - 1] + alpha * d[i];
        }
    }
    d[p]
}

impl<const D: usize> PartialEq for MultivarFunc<D> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.orders == other.orders
            && self.domain == other.domain
            && self.knots == other.knots
            && self.coeffs == other.coeffs
    }
}

#[cfg(test)]
impl<const D: usize> approx::AbsDiffEq for MultivarFunc<D> {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-10
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        if self.shape != other.shape {
            return false;
        }
        if !self.domain.abs_diff_eq(&other.domain, epsilon) {
            return false;
        }
        self.coeffs
            .iter()
            .zip(other.coeffs.iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}
