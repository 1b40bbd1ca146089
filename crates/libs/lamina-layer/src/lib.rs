//! # lamina-layer
//! Layered BSDF construction.
//!
//! Rough interfaces are sampled on a Gauss-Lobatto rule in the cosine of the
//! zenith angle and expanded into a cosine Fourier series in the azimuth.
//! Each Fourier order of a [`Layer`] holds four scattering matrices, which
//! the adding operator combines into the matrices of a stack. The result is
//! written to a binary file a renderer can evaluate directly.
#![warn(missing_docs)]

pub mod adding;
pub mod distro;
pub mod heuristic;
pub mod layer;
pub mod microfacet;
pub mod pipeline;
pub mod quad;
pub mod storage;

pub use adding::{combine_on_top, AddingOptions, SolveMethod};
pub use heuristic::Discretization;
pub use layer::{Block, Interface, Layer, LayerMode};
pub use microfacet::MicrofacetParams;
pub use pipeline::{build_channels, CoatedMaterial};
pub use quad::QuadratureNodes;
pub use storage::{BsdfFile, BsdfStorage, StorageOptions, StorageParams};
