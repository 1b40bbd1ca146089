//! Fresnel equations.
//!
//! All functions take the refractive index of the medium on the far side of
//! the interface *relative* to the medium the light arrives from, so the
//! incident medium always has index 1.
//!
//! For unpolarised light, the reflectance is the average of the squares of the
//! parallel and perpendicular amplitude terms:
//!
//! $F_r = \frac{1}{2}(r_\parallel^2 + r_\perp^2)$
//!
//! Dielectrics have real-valued indices and transmit $1 - F_r$; conductors
//! have a complex index $\eta + i\kappa$ and absorb whatever is not reflected.
use crate::{
    math::{rcp_f64, sqr},
    optics::ior::Ior,
};

/// Computes the unpolarised Fresnel reflectance at a planar interface between
/// two dielectrics.
///
/// Returns 1 in case of total internal reflection.
///
/// # Arguments
///
/// * `cos_i` - cosine of the incident angle, clamped to `[0, 1]`; this is the
///   absolute value of the cosine between the incident direction and the
///   normal.
/// * `eta` - relative refractive index `η_t / η_i`.
pub fn reflectance_dielectric(cos_i: f64, eta: f64) -> f64 {
    let cos_i = cos_i.clamp(0.0, 1.0);
    let sin_t2 = (1.0 - sqr(cos_i)) * rcp_f64(sqr(eta));

    // Handle total internal reflection.
    if sin_t2 >= 1.0 {
        return 1.0;
    }

    let cos_t = (1.0 - sin_t2).sqrt();
    let r_parl = (eta * cos_i - cos_t) * rcp_f64(eta * cos_i + cos_t);
    let r_perp = (cos_i - eta * cos_t) * rcp_f64(cos_i + eta * cos_t);

    0.5 * (sqr(r_parl) + sqr(r_perp))
}

/// Cosine of the refracted angle for a dielectric interface, or `None` in
/// case of total internal reflection.
pub fn refracted_cos(cos_i: f64, eta: f64) -> Option<f64> {
    let sin_t2 = (1.0 - sqr(cos_i.clamp(0.0, 1.0))) * rcp_f64(sqr(eta));
    (sin_t2 < 1.0).then(|| (1.0 - sin_t2).sqrt())
}

/// Fresnel reflectance of unpolarised light between a dielectric and a
/// conductor.
///
/// Modified from "Optics" by K.D. Moeller, University Science Books, 1988
///
/// # Arguments
///
/// * `cos_i` - cosine of the incident angle (should always be positive).
/// * `ior` - complex refractive index of the conductor relative to the
///   incident medium.
pub fn reflectance_conductor(cos_i: f64, ior: Ior) -> f64 {
    let cos_i = cos_i.clamp(0.0, 1.0);
    let cos_i2 = sqr(cos_i);
    let sin_i2 = 1.0 - cos_i2;
    let eta2 = sqr(ior.eta);
    let k2 = sqr(ior.k);

    let t0 = eta2 - k2 - sin_i2;
    let a2_plus_b2 = (sqr(t0) + 4.0 * eta2 * k2).sqrt();
    let t1 = a2_plus_b2 + cos_i2;
    let a = (0.5 * (a2_plus_b2 + t0)).max(0.0).sqrt();
    let t2 = 2.0 * a * cos_i;
    let rs = (t1 - t2) * rcp_f64(t1 + t2);
    let t3 = a2_plus_b2 * cos_i2 + sqr(sin_i2);
    let t4 = t2 * sin_i2;
    let rp = rs * (t3 - t4) * rcp_f64(t3 + t4);

    0.5 * (rp + rs)
}

/// Computes the unpolarised Fresnel reflectance for any relative index,
/// dispatching to [`reflectance_dielectric`] or [`reflectance_conductor`].
pub fn reflectance(cos_i: f64, ior: Ior) -> f64 {
    if ior.is_dielectric() {
        reflectance_dielectric(cos_i, ior.eta)
    } else {
        reflectance_conductor(cos_i, ior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn normal_incidence_matches_closed_form() {
        for eta in [1.1, 1.33, 1.5, 2.4] {
            let r0 = sqr((eta - 1.0) / (eta + 1.0));
            assert_relative_eq!(reflectance_dielectric(1.0, eta), r0, epsilon = 1e-12);
            assert_relative_eq!(reflectance_dielectric(1.0, 1.0 / eta), r0, epsilon = 1e-12);
        }
        let gold = Ior::new(0.143, 3.983);
        let c = nalgebra::Complex::new(gold.eta, gold.k);
        let one = nalgebra::Complex::new(1.0, 0.0);
        let r0 = ((c - one) / (c + one)).norm_sqr();
        assert_relative_eq!(reflectance_conductor(1.0, gold), r0, epsilon = 1e-12);
    }

    #[test]
    fn total_internal_reflection() {
        let eta: f64 = 1.0 / 1.5;
        let critical = eta.asin().cos();
        assert_eq!(reflectance_dielectric(critical * 0.5, eta), 1.0);
        assert!(refracted_cos(critical * 0.5, eta).is_none());
        assert!(reflectance_dielectric(critical + 0.05, eta) < 1.0);
        assert!(refracted_cos(1.0, eta).is_some());
    }

    #[test]
    fn conductor_without_absorption_is_dielectric() {
        for i in 0..=100 {
            let cos_i = i as f64 / 100.0;
            let r0 = reflectance_dielectric(cos_i, 1.5);
            let r1 = reflectance_conductor(cos_i, Ior::new(1.5, 0.0));
            assert!((r0 - r1).abs() < 1e-10, "cos_i: {}, r0: {}, r1: {}", cos_i, r0, r1);
        }
    }

    #[test]
    fn grazing_incidence_reflects_everything() {
        assert_relative_eq!(reflectance_dielectric(0.0, 1.5), 1.0, epsilon = 1e-12);
        assert_relative_eq!(reflectance(0.0, Ior::new(0.2, 3.1)), 1.0, epsilon = 1e-12);
        assert_eq!(reflectance(0.7, Ior::VACUUM), 0.0);
    }

    #[test]
    fn reflectance_is_bounded() {
        for i in 0..=200 {
            let cos_i = i as f64 / 200.0;
            for ior in [Ior::dielectric(1.5), Ior::dielectric(0.75), Ior::new(1.2, 7.0)] {
                let r = reflectance(cos_i, ior);
                assert!((0.0..=1.0 + 1e-12).contains(&r), "{:?} at {}: {}", ior, cos_i, r);
            }
        }
    }

    proptest! {
        #[test]
        fn dielectric_reflectance_is_reciprocal(cos_i in 0.05f64..1.0, eta in 1.01f64..3.0) {
            let cos_t = refracted_cos(cos_i, eta).unwrap();
            let r_in = reflectance_dielectric(cos_i, eta);
            let r_out = reflectance_dielectric(cos_t, 1.0 / eta);
            prop_assert!((r_in - r_out).abs() < 1e-10, "{} vs {}", r_in, r_out);
        }
    }
}
