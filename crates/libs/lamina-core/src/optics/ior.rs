//! Index of refraction.
use nalgebra::Complex;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// Complex index of refraction `η + iκ`.
///
/// A layer interface is always described by the index of the medium below it
/// *relative* to the medium above it, so `Ior::VACUUM` also stands for an
/// index-matched interface.
#[derive(Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IorRepr", into = "IorRepr")]
pub struct Ior {
    /// Index of refraction.
    pub eta: f64,
    /// Extinction coefficient.
    pub k: f64,
}

/// Serialized form of [`Ior`]: either a bare real number or a `[η, κ]` pair.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IorRepr {
    Real(f64),
    Complex([f64; 2]),
}

impl From<IorRepr> for Ior {
    fn from(value: IorRepr) -> Self {
        match value {
            IorRepr::Real(eta) => Ior::dielectric(eta),
            IorRepr::Complex([eta, k]) => Ior::new(eta, k),
        }
    }
}

impl From<Ior> for IorRepr {
    fn from(value: Ior) -> Self {
        if value.is_dielectric() {
            IorRepr::Real(value.eta)
        } else {
            IorRepr::Complex([value.eta, value.k])
        }
    }
}

impl Debug for Ior {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "IOR(η={}, κ={})", self.eta, self.k)
    }
}

impl Display for Ior {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "η={}, κ={}", self.eta, self.k)
    }
}

impl From<Complex<f64>> for Ior {
    fn from(c: Complex<f64>) -> Self { Self::new(c.re, c.im) }
}

impl From<Ior> for Complex<f64> {
    fn from(ior: Ior) -> Self { Complex::new(ior.eta, ior.k) }
}

impl Ior {
    /// Refractive index of vacuum.
    pub const VACUUM: Self = Self { eta: 1.0, k: 0.0 };

    /// Creates a new complex refractive index.
    pub const fn new(eta: f64, k: f64) -> Self { Self { eta, k } }

    /// Creates a real refractive index.
    pub const fn dielectric(eta: f64) -> Self { Self { eta, k: 0.0 } }

    /// Checks whether the refractive index represents insulator material.
    pub fn is_dielectric(&self) -> bool { self.k == 0.0 }

    /// Checks whether the refractive index represents conductor material.
    pub fn is_conductor(&self) -> bool { !self.is_dielectric() }

    /// Checks whether the interface does not change the refractive index at
    /// all, i.e. light crosses it undeflected.
    pub fn is_index_matched(&self) -> bool { self.k == 0.0 && self.eta == 1.0 }

    /// Returns the index relative to the medium `outer` lying above the
    /// interface, using a complex division.
    pub fn relative_to(&self, outer: Ior) -> Ior {
        (Complex::<f64>::from(*self) / Complex::<f64>::from(outer)).into()
    }

    /// Returns the reciprocal index, i.e. the same interface seen from below.
    pub fn recip(&self) -> Ior { Complex::<f64>::from(*self).inv().into() }

    /// Fresnel amplitude at normal incidence, `|(η - 1) / (η + 1)|`.
    ///
    /// It measures the optical contrast of the interface and lies in `[0, 1)`
    /// for any physical index.
    pub fn contrast(&self) -> f64 {
        let c = Complex::<f64>::from(*self);
        let one = Complex::new(1.0, 0.0);
        ((c - one) / (c + one)).norm()
    }
}
