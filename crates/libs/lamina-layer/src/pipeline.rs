//! Building multi-channel coated materials.
use crate::{
    adding::AddingOptions,
    heuristic::{self, Discretization},
    layer::Layer,
    microfacet::MicrofacetParams,
    quad::QuadratureNodes,
};
use base::{error::Error, optics::Ior};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

fn default_true() -> bool { true }

/// A rough dielectric coating on top of a rough substrate, with one
/// substrate per colour channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoatedMaterial {
    /// Coating interface, relative to vacuum above it.
    pub coating: MicrofacetParams,
    /// Substrate interface of each channel.
    pub substrates: Vec<MicrofacetParams>,
    /// Whether the substrate indices are given relative to vacuum and must
    /// be divided by the coating index.
    #[serde(default = "default_true")]
    pub substrate_relative_to_coating: bool,
    /// Discretization to use instead of the heuristic one.
    #[serde(default)]
    pub discretization: Option<Discretization>,
}

/// Index of refraction of gold in the red, green and blue channels.
pub const GOLD_RGB: [Ior; 3] = [
    Ior::new(0.143, 3.983),
    Ior::new(0.374, 2.385),
    Ior::new(1.442, 1.603),
];

impl CoatedMaterial {
    /// Rough gold (α = 0.1) under a rough coating of index 1.5 (α = 0.1).
    pub fn coated_gold() -> Self {
        Self {
            coating: MicrofacetParams::new(Ior::dielectric(1.5), 0.1),
            substrates: GOLD_RGB
                .iter()
                .map(|&eta| MicrofacetParams::new(eta, 0.1))
                .collect(),
            substrate_relative_to_coating: true,
            discretization: None,
        }
    }

    /// Substrate parameters as seen from inside the coating.
    pub fn effective_substrates(&self) -> Vec<MicrofacetParams> {
        self.substrates
            .iter()
            .map(|s| {
                if self.substrate_relative_to_coating {
                    MicrofacetParams::new(s.eta.relative_to(self.coating.eta), s.alpha)
                } else {
                    *s
                }
            })
            .collect()
    }

    /// Discretization of the stack: the override if any, otherwise the
    /// finest node count of all interfaces with the coating's orders.
    pub fn discretization(&self) -> Result<Discretization, Error> {
        match self.discretization {
            Some(d) => Ok(d),
            None => heuristic::choose_for_stack(&self.coating, &self.effective_substrates()),
        }
    }
}

/// Builds the coated layer of every channel of `material`.
///
/// The coating is built once and shared; channels are built and combined
/// in parallel. Layers are returned in channel order.
pub fn build_channels(
    material: &CoatedMaterial,
    options: &AddingOptions,
) -> Result<(QuadratureNodes, Vec<Layer>), Error> {
    if material.substrates.is_empty() {
        return Err(Error::InvalidConfig(
            "a coated material needs at least one substrate".into(),
        ));
    }
    let Discretization { n, m } = material.discretization()?;
    log::info!(
        "building {} channels with {} nodes and {} Fourier orders",
        material.substrates.len(),
        n,
        m
    );
    let quadrature = QuadratureNodes::gauss_lobatto(n)?;
    let coating = Layer::microfacet(&quadrature, m, &material.coating)?;
    let layers = material
        .effective_substrates()
        .par_iter()
        .enumerate()
        .map(|(channel, substrate)| {
            log::debug!("channel {}: substrate {:?}, α = {}", channel, substrate.eta, substrate.alpha);
            let layer = Layer::microfacet(&quadrature, m, substrate)?;
            let combined = layer.add_to_top(&coating, options)?;
            log::info!("channel {} done", channel);
            Ok(combined)
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok((quadrature, layers))
}
