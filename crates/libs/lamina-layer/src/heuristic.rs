//! Choice of the angular and azimuthal resolution for a material.
//!
//! Narrow lobes need more zenith nodes to be resolved and more Fourier
//! orders to be reconstructed in azimuth; strong index contrasts sharpen the
//! Fresnel term near grazing angles and need more nodes as well.
//!
//! Transmission lobes of nearly index-matched interfaces are much narrower
//! than the reflection lobe. They are not resolved by the node count chosen
//! here: their flux is integrated into the zenith cell around each node when
//! the layer is built, so a weak contrast only costs angular detail.
use crate::microfacet::MicrofacetParams;
use base::{error::Error, math::ceil_even};
use serde::{Deserialize, Serialize};

/// Fewest quadrature nodes ever chosen.
pub const MIN_NODES: usize = 8;
/// Most quadrature nodes ever chosen.
pub const MAX_NODES: usize = 512;
/// Fewest Fourier orders ever chosen.
pub const MIN_ORDERS: usize = 4;
/// Most Fourier orders ever chosen.
pub const MAX_ORDERS: usize = 256;

/// Keeps round-off from pushing an exact integer to the next one.
const ROUNDING_SLACK: f64 = 1.0e-9;

/// Number of quadrature nodes and of Fourier orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Discretization {
    /// Number of Gauss-Lobatto nodes over `[-1, 1]`, always even.
    pub n: usize,
    /// Number of Fourier orders.
    pub m: usize,
}

/// Picks the discretization of a single interface.
///
/// With the contrast `κ = |(η - 1) / (η + 1)|`:
///
/// * `n = 10 (1 + κ) α^-0.75`, rounded up to an even number,
/// * `m = 3 (1 + κ / 2) / α`, rounded up,
///
/// both clamped to [`MIN_NODES`]..=[`MAX_NODES`] and
/// [`MIN_ORDERS`]..=[`MAX_ORDERS`]. The contrast of a real index below one
/// equals the one of its reciprocal, so light entering a denser or a rarer
/// medium is treated alike.
pub fn choose(params: &MicrofacetParams) -> Result<Discretization, Error> {
    params.validate()?;
    let contrast = params.eta.contrast();
    let alpha = params.alpha;
    let n = ceil_even(10.0 * (1.0 + contrast) * alpha.powf(-0.75) - ROUNDING_SLACK)
        .clamp(MIN_NODES, MAX_NODES);
    let m = ((3.0 * (1.0 + 0.5 * contrast) / alpha - ROUNDING_SLACK)
        .ceil()
        .min(MAX_ORDERS as f64) as usize)
        .clamp(MIN_ORDERS, MAX_ORDERS);
    log::debug!(
        "discretization for {:?}, α = {}: contrast {:.4}, n = {}, m = {}",
        params.eta,
        alpha,
        contrast,
        n,
        m
    );
    Ok(Discretization { n, m })
}

/// Picks the discretization of a coating stacked on top of substrates.
///
/// The node count must resolve every interface of the stack, while the
/// coating, seen first by the light, sets the number of Fourier orders.
pub fn choose_for_stack(
    coating: &MicrofacetParams,
    substrates: &[MicrofacetParams],
) -> Result<Discretization, Error> {
    let top = choose(coating)?;
    substrates.iter().try_fold(top, |acc, substrate| {
        let d = choose(substrate)?;
        Ok(Discretization {
            n: acc.n.max(d.n),
            m: acc.m,
        })
    })
}
