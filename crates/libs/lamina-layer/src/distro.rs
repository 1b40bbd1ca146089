//! Microfacet distribution function models.
use base::math::{rcp_f64, sqr};
use nalgebra::Vector3;
use std::fmt::Debug;

/// Common interface for isotropic microfacet distribution functions.
///
/// Directions are normalised and expressed in the local frame of the
/// macro-surface, `z` being the normal.
pub trait MicrofacetDistribution: Debug + Send + Sync {
    /// Returns the roughness parameter of the distribution.
    fn alpha(&self) -> f64;

    /// Evaluates the microfacet area distribution function for a microfacet
    /// normal with the given polar angle cosine.
    fn eval_ndf(&self, cos_theta: f64) -> f64;

    /// Evaluates the Smith auxiliary function Λ for a direction with the
    /// given polar angle cosine.
    fn eval_lambda(&self, cos_theta: f64) -> f64;

    /// Evaluates the Smith masking-shadowing function with either the
    /// incident or outgoing direction.
    ///
    /// Zero when `v` sees the back side of the microfacet `m`.
    fn eval_msf1(&self, m: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
        if v.dot(m) * v.z <= 0.0 {
            return 0.0;
        }
        1.0 / (1.0 + self.eval_lambda(v.z.abs()))
    }

    /// Evaluates the Smith masking-shadowing function with the incident and
    /// outgoing directions.
    fn eval_msf(&self, m: &Vector3<f64>, i: &Vector3<f64>, o: &Vector3<f64>) -> f64 {
        self.eval_msf1(m, i) * self.eval_msf1(m, o)
    }
}

/// Beckmann microfacet distribution function.
///
/// Beckman-Spizzichino distribution is based on the Gaussian distribution of
/// microfacet slopes. If σ is the RMS slope of the microfacets, then the alpha
/// parameter of the Beckmann distribution is given by: $\alpha = \sqrt{2}
/// \sigma$.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BeckmannDistribution {
    alpha: f64,
}

impl BeckmannDistribution {
    /// Creates a new isotropic Beckmann distribution with the given roughness.
    pub fn new(alpha: f64) -> Self {
        BeckmannDistribution {
            alpha: alpha.max(1.0e-6),
        }
    }

    /// Microfacet normals at the centres of `slopes × azimuths` cells that
    /// each hold the same share of the projected area `D(m) cos θm dωm`.
    ///
    /// The slope cells come from inverting the cumulative slope distribution,
    /// `tan² θm = -α² ln(1 - p)`.
    pub fn normal_grid(&self, slopes: usize, azimuths: usize) -> Vec<Vector3<f64>> {
        let alpha = self.alpha();
        (0..slopes)
            .flat_map(|j| {
                let p = (j as f64 + 0.5) / slopes as f64;
                let tan_theta = alpha * (-(-p).ln_1p()).sqrt();
                let cos_theta = 1.0 / (1.0 + sqr(tan_theta)).sqrt();
                let sin_theta = tan_theta * cos_theta;
                (0..azimuths).map(move |k| {
                    let phi = std::f64::consts::TAU * (k as f64 + 0.5) / azimuths as f64;
                    let (sin_phi, cos_phi) = phi.sin_cos();
                    Vector3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
                })
            })
            .collect()
    }
}

impl MicrofacetDistribution for BeckmannDistribution {
    fn alpha(&self) -> f64 { self.alpha }

    fn eval_ndf(&self, cos_theta: f64) -> f64 {
        if cos_theta <= 0.0 {
            return 0.0;
        }
        let cos_theta2 = sqr(cos_theta);
        let cos_theta4 = sqr(cos_theta2);
        if cos_theta4 < 1.0e-16 {
            return 0.0;
        }
        let tan_theta2 = (1.0 - cos_theta2) * rcp_f64(cos_theta2);
        (-tan_theta2 * rcp_f64(sqr(self.alpha))).exp()
            * rcp_f64(std::f64::consts::PI * cos_theta4 * sqr(self.alpha))
    }

    #[rustfmt::skip]
    /// Under the assumption that there is no correlation of heights of the
    /// nearby points on the surface, the lambda function for the
    /// Beckmann-Spizzichino distribution has the analytical form:
    ///
    /// $$\Lambda(\mathbf{\omega})=\frac{erf(a)-1+\frac{e^{-a^2}}{a\sqrt{\pi}}}{2}$$
    ///
    /// `erf(a) - 1` is evaluated as `-erfc(a)` to keep precision for large `a`.
    fn eval_lambda(&self, cos_theta: f64) -> f64 {
        let cos_theta = cos_theta.abs().min(1.0);
        if cos_theta < 1.0e-12 {
            return f64::INFINITY;
        }
        let tan_theta = (1.0 - sqr(cos_theta)).max(0.0).sqrt() / cos_theta;
        if tan_theta < 1.0e-8 {
            return 0.0;
        }
        let a = 1.0 / (tan_theta * self.alpha);
        let exp_a2 = (-sqr(a)).exp();
        ((exp_a2 * rcp_f64(a * std::f64::consts::PI.sqrt()) - libm::erfc(a)) * 0.5).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use base::math::pairwise_sum;

    #[test]
    fn ndf_is_normalised_over_projected_area() {
        // ∫ D(m) cos θm dωm = 1
        for alpha in [0.05, 0.1, 0.3, 0.7] {
            let distro = BeckmannDistribution::new(alpha);
            let steps = 20_000;
            let dtheta = std::f64::consts::FRAC_PI_2 / steps as f64;
            let terms = (0..steps)
                .map(|k| {
                    let theta = (k as f64 + 0.5) * dtheta;
                    let (s, c) = theta.sin_cos();
                    distro.eval_ndf(c) * c * s * dtheta * 2.0 * std::f64::consts::PI
                })
                .collect::<Vec<_>>();
            assert_relative_eq!(pairwise_sum(&terms), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn normal_grid_follows_the_slope_distribution() {
        let distro = BeckmannDistribution::new(0.25);
        let normals = distro.normal_grid(256, 16);
        assert_eq!(normals.len(), 256 * 16);
        assert!(normals.iter().all(|m| (m.norm() - 1.0).abs() < 1e-12 && m.z > 0.0));
        // E[tan² θm] = α² under the projected-area measure
        let tan2 = normals
            .iter()
            .map(|m| (1.0 - sqr(m.z)) / sqr(m.z))
            .collect::<Vec<_>>();
        let mean = pairwise_sum(&tan2) / normals.len() as f64;
        assert_relative_eq!(mean / sqr(distro.alpha()), 1.0, epsilon = 2e-2);
        let mean_x = normals.iter().map(|m| m.x).sum::<f64>() / normals.len() as f64;
        assert!(mean_x.abs() < 1e-12);
    }

    #[test]
    fn lambda_limits() {
        let distro = BeckmannDistribution::new(0.3);
        assert_eq!(distro.eval_lambda(1.0), 0.0);
        assert!(distro.eval_lambda(0.0).is_infinite());
        let mut prev = 0.0;
        for k in (1..100).rev() {
            let l = distro.eval_lambda(k as f64 / 100.0);
            assert!(l >= prev, "Λ must grow towards grazing angles");
            prev = l;
        }
    }

    #[test]
    fn masking_rejects_back_facing_microfacets() {
        let distro = BeckmannDistribution::new(0.2);
        let m = Vector3::new(0.0, 0.0, 1.0);
        let up = Vector3::new(0.6, 0.0, 0.8);
        let down = Vector3::new(0.6, 0.0, -0.8);
        assert!(distro.eval_msf1(&m, &up) > 0.9);
        assert!(distro.eval_msf1(&m, &down) > 0.9);
        let tilted = Vector3::new(0.8, 0.0, 0.6);
        let grazing = Vector3::new(-0.8, 0.0, 0.6);
        assert_eq!(distro.eval_msf1(&tilted, &grazing), 0.0);
        assert_relative_eq!(
            distro.eval_msf(&m, &up, &up),
            sqr(distro.eval_msf1(&m, &up)),
            epsilon = 1e-15
        );
    }
}
