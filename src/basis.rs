//! Basis-level helpers shared by the function library and the clipping
//! stage: binomial kernels for Bernstein conversion, and the "node"
//! abscissas that pair each control coefficient with a parameter value.

pub fn binomial_product<const N: usize>(ns: [u8; N], ks: [u8; N]) -> u64 {
    ns.iter()
        .zip(ks)
        .map(|(&n, k)| binomial_coefficient(n, k))
        .product()
}

pub fn binomial_coefficient(n: u8, k: u8) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k) as u64;
    let n = n as u64;
    // Each partial product is C(n - k + i, i), so the division is exact.
    (1..=k).fold(1u64, |acc, i| acc * (n - k + i) / i)
}

/// Node abscissa of Bezier control coefficient `i` out of `len`, as a
/// fraction of the interval `[min, max]`. The convex hull of
/// `(node, coeff)` pairs bounds the graph of the function.
pub fn bezier_node(i: usize, len: usize, (min, max): (f64, f64)) -> f64 {
    if len <= 1 {
        return 0.5 * (min + max);
    }
    let t = i as f64 / (len - 1) as f64;
    (1.0 - t) * min + t * max
}

/// Greville abscissa of B-spline control coefficient `i`: the average of
/// `degree` consecutive interior knots. Plays the same role for B-splines
/// that the uniform fraction plays for Bezier.
pub fn greville_node(i: usize, degree: usize, knots: &[f64]) -> f64 {
    if degree == 0 {
        return knots[i];
    }
    let mut sum = 0.0;
    for j in 1..=degree {
        sum += knots[i + j];
    }
    sum / degree as f64
}

#[cfg(test)]
mod tests {
    use assertables::assert_lt;

    use super::*;

    #[test]
    fn binomial_coefficient_pascal_row() {
        let row: Vec<u64> = (0..=6).map(|k| binomial_coefficient(6, k)).collect();
        assert_eq!(row, vec![1, 6, 15, 20, 15, 6, 1]);
    }

    #[test]
    fn binomial_coefficient_out_of_range() {
        assert_eq!(binomial_coefficient(4, 7), 0);
    }

    #[test]
    fn binomial_coefficient_stays_exact_midway() {
        assert_eq!(binomial_coefficient(30, 15), 155_117_520);
    }

    #[test]
    fn binomial_product_multiplies_per_direction() {
        assert_eq!(binomial_product([4, 5], [2, 2]), 60);
        assert_eq!(binomial_product([3, 3], [0, 3]), 1);
    }

    #[test]
    fn bezier_nodes_span_interval() {
        let nodes: Vec<f64> = (0..4).map(|i| bezier_node(i, 4, (-1.0, 2.0))).collect();
        assert_lt!((nodes[0] + 1.0).abs(), 1e-12);
        assert_lt!((nodes[3] - 2.0).abs(), 1e-12);
        assert_lt!((nodes[1] - 0.0).abs(), 1e-12);
    }

    #[test]
    fn greville_nodes_of_open_knots() {
        // Cubic over [0, 1] with one interior knot at 0.4.
        let knots = [0.0, 0.0, 0.0, 0.0, 0.4, 1.0, 1.0, 1.0, 1.0];
        let n = knots.len() - 4;
        let nodes: Vec<f64> = (0..n).map(|i| greville_node(i, 3, &knots)).collect();
        assert_lt!((nodes[0] - 0.0).abs(), 1e-12);
        assert_lt!((nodes[n - 1] - 1.0).abs(), 1e-12);
        // Interior nodes are strictly increasing.
        for w in nodes.windows(2) {
            assert_lt!(w[0], w[1]);
        }
    }
}
