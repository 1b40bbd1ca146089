//! Quadrature rules used to discretise the zenith and azimuthal angles.
use base::{error::Error, math::sqr};
use std::f64::consts::{FRAC_PI_2, PI};

/// Nodes and weights of a quadrature rule on `[-1, 1]`.
///
/// The nodes are the cosines of the zenith angle. They are strictly
/// increasing and mirrored around zero, so the upper half of the rule can be
/// used to index both hemispheres.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureNodes {
    nodes: Box<[f64]>,
    weights: Box<[f64]>,
}

impl QuadratureNodes {
    /// Builds the Gauss-Lobatto rule with `n` points.
    ///
    /// The rule includes both end points and integrates polynomials up to
    /// degree `2n - 3` exactly.
    pub fn gauss_lobatto(n: usize) -> Result<Self, Error> {
        if n < 2 {
            return Err(Error::InvalidQuadratureRequest {
                node_count: n,
                reason: "the rule needs at least both end points",
            });
        }

        let degree = n - 1;
        let positive = isolate_roots(degree, (n - 2) / 2)?
            .into_iter()
            .map(|(lo, hi)| polish_root(degree, lo, hi))
            .collect::<Vec<_>>();

        let mut nodes = Vec::with_capacity(n);
        nodes.push(-1.0);
        nodes.extend(positive.iter().rev().map(|x| -x));
        if n % 2 == 1 {
            nodes.push(0.0);
        }
        nodes.extend(positive.iter().copied());
        nodes.push(1.0);

        let scale = 2.0 / (degree * (degree + 1)) as f64;
        let weights = nodes
            .iter()
            .map(|&x| {
                if x.abs() == 1.0 {
                    scale
                } else {
                    scale / sqr(legendre(degree, x).0)
                }
            })
            .collect::<Vec<_>>();

        log::trace!("Gauss-Lobatto rule with {} nodes: {:?}", n, nodes);

        Ok(Self {
            nodes: nodes.into_boxed_slice(),
            weights: weights.into_boxed_slice(),
        })
    }

    /// Creates a rule from already computed nodes and weights.
    ///
    /// Used when reading a rule back from a file; the caller is responsible
    /// for the ordering and symmetry of the nodes.
    pub(crate) fn from_parts(nodes: Vec<f64>, weights: Vec<f64>) -> Self {
        debug_assert_eq!(nodes.len(), weights.len());
        Self {
            nodes: nodes.into_boxed_slice(),
            weights: weights.into_boxed_slice(),
        }
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Whether the rule has no nodes. Never true for a valid rule.
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// All nodes, ascending.
    pub fn nodes(&self) -> &[f64] { &self.nodes }

    /// All weights, matching [`Self::nodes`].
    pub fn weights(&self) -> &[f64] { &self.weights }

    /// Number of nodes strictly inside one hemisphere.
    pub fn hemisphere_len(&self) -> usize { self.nodes.len() / 2 }

    /// Nodes of the upper hemisphere, `|μ|` ascending.
    pub fn positive_nodes(&self) -> &[f64] {
        &self.nodes[self.nodes.len() - self.hemisphere_len()..]
    }

    /// Weights of the upper hemisphere nodes.
    pub fn positive_weights(&self) -> &[f64] {
        &self.weights[self.weights.len() - self.hemisphere_len()..]
    }

    /// Integrates `f` over `[-1, 1]`.
    pub fn integrate<F: Fn(f64) -> f64>(&self, f: F) -> f64 {
        self.nodes
            .iter()
            .zip(self.weights.iter())
            .map(|(&x, &w)| w * f(x))
            .sum()
    }
}

/// Evaluates the Legendre polynomial `P_n` and its derivative at `x`.
fn legendre(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let (mut p_prev, mut p) = (1.0, x);
    let (mut dp_prev, mut dp) = (0.0, 1.0);
    for k in 1..n {
        let kf = k as f64;
        let p_next = ((2.0 * kf + 1.0) * x * p - kf * p_prev) / (kf + 1.0);
        let dp_next = dp_prev + (2.0 * kf + 1.0) * p;
        p_prev = p;
        p = p_next;
        dp_prev = dp;
        dp = dp_next;
    }
    (p, dp)
}

/// Brackets the `expected` roots of `P'_n` lying in `(0, 1)`.
///
/// The grid is uniform in the angle `θ = acos(x)`, where the roots are
/// roughly equidistant. It is refined until every root has its own bracket.
fn isolate_roots(n: usize, expected: usize) -> Result<Vec<(f64, f64)>, Error> {
    if expected == 0 {
        return Ok(Vec::new());
    }

    // x = 0 is a root itself when n is even; its bracket is skipped.
    let skip_last = n % 2 == 0;
    let mut intervals = 4 * (n + 1);
    while intervals <= 1 << 22 {
        let xs = (0..=intervals)
            .map(|j| (FRAC_PI_2 * j as f64 / intervals as f64).cos())
            .collect::<Vec<_>>();
        let end = if skip_last { intervals - 1 } else { intervals };
        let mut brackets = Vec::with_capacity(expected);
        let mut f_hi = legendre(n, xs[0]).1;
        for j in 0..end {
            let f_lo = legendre(n, xs[j + 1]).1;
            if f_hi != 0.0 && f_hi * f_lo <= 0.0 {
                brackets.push((xs[j + 1], xs[j]));
            }
            f_hi = f_lo;
        }
        if brackets.len() == expected {
            brackets.reverse();
            return Ok(brackets);
        }
        log::trace!(
            "found {} of {} roots of P'_{} with {} intervals, refining",
            brackets.len(),
            expected,
            n,
            intervals
        );
        intervals *= 2;
    }

    Err(Error::InvalidQuadratureRequest {
        node_count: n + 1,
        reason: "failed to isolate the interior nodes",
    })
}

/// Finds the root of `P'_n` inside `[lo, hi]` with Newton's method, falling
/// back to bisection whenever a step leaves the bracket.
fn polish_root(n: usize, mut lo: f64, mut hi: f64) -> f64 {
    let nn = (n * (n + 1)) as f64;
    let positive_at_lo = legendre(n, lo).1 > 0.0;
    let mut x = 0.5 * (lo + hi);
    for _ in 0..128 {
        let (p, dp) = legendre(n, x);
        if dp == 0.0 {
            return x;
        }
        if (dp > 0.0) == positive_at_lo {
            lo = x;
        } else {
            hi = x;
        }
        // P''_n from the Legendre differential equation.
        let ddp = (2.0 * x * dp - nn * p) / (1.0 - x * x);
        let mut next = x - dp / ddp;
        if !(next > lo && next < hi) {
            next = 0.5 * (lo + hi);
        }
        if (next - x).abs() <= 2.0 * f64::EPSILON || hi - lo <= 2.0 * f64::EPSILON {
            return next;
        }
        x = next;
    }
    x
}

/// Nodes and weights of the composite trapezoidal rule on `[0, π]` with the
/// given number of intervals.
///
/// For smooth functions that are even and `2π`-periodic, as the azimuthal
/// dependence of an isotropic BSDF is, the rule converges spectrally.
pub fn trapezoid_half_period(intervals: usize) -> (Vec<f64>, Vec<f64>) {
    let intervals = intervals.max(1);
    let h = PI / intervals as f64;
    let nodes = (0..=intervals).map(|k| k as f64 * h).collect();
    let weights = (0..=intervals)
        .map(|k| {
            if k == 0 || k == intervals {
                0.5 * h
            } else {
                h
            }
        })
        .collect();
    (nodes, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn rejects_fewer_than_two_nodes() {
        for n in [0, 1] {
            assert!(matches!(
                QuadratureNodes::gauss_lobatto(n),
                Err(Error::InvalidQuadratureRequest { node_count, .. }) if node_count == n
            ));
        }
    }

    #[test]
    fn small_rules_match_closed_forms() {
        let q = QuadratureNodes::gauss_lobatto(2).unwrap();
        assert_eq!(q.nodes(), &[-1.0, 1.0]);
        assert_eq!(q.weights(), &[1.0, 1.0]);

        let q = QuadratureNodes::gauss_lobatto(3).unwrap();
        assert_eq!(q.nodes(), &[-1.0, 0.0, 1.0]);
        assert_relative_eq!(q.weights()[0], 1.0 / 3.0, epsilon = 1e-15);
        assert_relative_eq!(q.weights()[1], 4.0 / 3.0, epsilon = 1e-15);

        let q = QuadratureNodes::gauss_lobatto(4).unwrap();
        assert_relative_eq!(q.nodes()[2], 1.0 / 5.0f64.sqrt(), epsilon = 1e-14);
        assert_relative_eq!(q.weights()[2], 5.0 / 6.0, epsilon = 1e-14);

        let q = QuadratureNodes::gauss_lobatto(5).unwrap();
        assert_relative_eq!(q.nodes()[3], (3.0f64 / 7.0).sqrt(), epsilon = 1e-14);
        assert_relative_eq!(q.weights()[2], 32.0 / 45.0, epsilon = 1e-14);
        assert_relative_eq!(q.weights()[3], 49.0 / 90.0, epsilon = 1e-14);
    }

    #[test]
    fn x5_integrates_to_zero_with_four_nodes() {
        let q = QuadratureNodes::gauss_lobatto(4).unwrap();
        assert!(q.integrate(|x| x.powi(5)).abs() < 1e-10);
        assert_relative_eq!(q.integrate(|x| x.powi(4)), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn large_rules_are_well_formed() {
        for n in [64, 129, 256, 512] {
            let q = QuadratureNodes::gauss_lobatto(n).unwrap();
            assert_eq!(q.len(), n);
            assert!(q.nodes().windows(2).all(|w| w[0] < w[1]), "n = {}", n);
            assert!(q.weights().iter().all(|&w| w > 0.0));
            assert_relative_eq!(q.weights().iter().sum::<f64>(), 2.0, epsilon = 1e-11);
        }
    }

    #[test]
    fn hemisphere_halves_mirror_each_other() {
        let q = QuadratureNodes::gauss_lobatto(10).unwrap();
        assert_eq!(q.hemisphere_len(), 5);
        for k in 0..q.len() {
            assert_eq!(q.nodes()[k], -q.nodes()[q.len() - 1 - k]);
            assert_eq!(q.weights()[k], q.weights()[q.len() - 1 - k]);
        }
        assert_eq!(q.positive_nodes().len(), 5);
        assert!(q.positive_nodes()[0] > 0.0);
        assert_eq!(*q.positive_nodes().last().unwrap(), 1.0);

        let q = QuadratureNodes::gauss_lobatto(7).unwrap();
        assert_eq!(q.nodes()[3], 0.0);
        assert!(q.positive_nodes()[0] > 0.0);
    }

    #[test]
    fn trapezoid_reproduces_cosine_series() {
        let (phis, ws) = trapezoid_half_period(16);
        assert_eq!(phis.len(), 17);
        assert_relative_eq!(ws.iter().sum::<f64>(), PI, epsilon = 1e-14);
        // ∫_0^π cos(2φ)^2 dφ = π / 2
        let v: f64 = phis
            .iter()
            .zip(ws.iter())
            .map(|(p, w)| w * sqr((2.0 * p).cos()))
            .sum();
        assert_relative_eq!(v, PI / 2.0, epsilon = 1e-13);
        // ∫_0^π exp(cos φ) dφ = π I_0(1)
        let v: f64 = phis
            .iter()
            .zip(ws.iter())
            .map(|(p, w)| w * p.cos().exp())
            .sum();
        assert_relative_eq!(v, PI * 1.266_065_877_752_008_4, epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn integrates_polynomials_exactly(n in 2usize..48, d in 0usize..200) {
            let degree = d % (2 * n - 2);
            let q = QuadratureNodes::gauss_lobatto(n).unwrap();
            let exact = if degree % 2 == 1 { 0.0 } else { 2.0 / (degree + 1) as f64 };
            let approx = q.integrate(|x| x.powi(degree as i32));
            prop_assert!((approx - exact).abs() < 1e-10, "n={} degree={} {} vs {}", n, degree, approx, exact);
        }
    }
}
