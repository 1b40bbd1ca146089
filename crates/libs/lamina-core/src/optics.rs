//! Optics related types: refractive indices and Fresnel equations.

pub mod fresnel;
pub mod ior;

pub use ior::Ior;
