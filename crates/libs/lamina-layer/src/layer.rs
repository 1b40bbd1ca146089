//! Scattering layers discretised in zenith angle and azimuthal frequency.
use crate::{
    adding::{combine_on_top, AddingOptions},
    heuristic::Discretization,
    microfacet::{self, check_discretization, clamp_energy, flux_weights, MicrofacetParams, Side},
    quad::QuadratureNodes,
};
use base::{error::Error, optics::Ior};
use nalgebra::DMatrix;
use std::{f64::consts::PI, ops::Range};

/// One of the four scattering blocks of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    /// Light arriving from above, reflected back up.
    ReflectionTop,
    /// Light arriving from below, reflected back down.
    ReflectionBottom,
    /// Light arriving from above, transmitted downwards.
    TransmissionTopBottom,
    /// Light arriving from below, transmitted upwards.
    TransmissionBottomTop,
}

impl Block {
    /// All blocks, in storage order.
    pub const ALL: [Block; 4] = [
        Block::ReflectionTop,
        Block::ReflectionBottom,
        Block::TransmissionTopBottom,
        Block::TransmissionBottomTop,
    ];
}

/// Scattering matrices of one Fourier order.
///
/// Every matrix is `h × h` and maps incident radiance to exitant radiance:
/// the row is the exitant node and the column the incident node, both
/// indexing the upper half of the quadrature rule. The entries are
/// `c_l f_l(μ_o, μ_i) |μ_i| w_i` with `c_0 = 2π` and `c_l = π` otherwise, `f_l`
/// being the `l`-th cosine coefficient of the BSDF in the azimuth difference
/// of the propagation directions.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMode {
    /// Reflection of light arriving from above.
    pub reflection_top: DMatrix<f64>,
    /// Reflection of light arriving from below.
    pub reflection_bottom: DMatrix<f64>,
    /// Transmission from the top to the bottom.
    pub transmission_tb: DMatrix<f64>,
    /// Transmission from the bottom to the top.
    pub transmission_bt: DMatrix<f64>,
}

impl LayerMode {
    /// A mode that scatters nothing.
    pub fn zeros(h: usize) -> Self {
        Self {
            reflection_top: DMatrix::zeros(h, h),
            reflection_bottom: DMatrix::zeros(h, h),
            transmission_tb: DMatrix::zeros(h, h),
            transmission_bt: DMatrix::zeros(h, h),
        }
    }

    /// A mode that lets everything through unchanged.
    pub fn identity(h: usize) -> Self {
        Self {
            reflection_top: DMatrix::zeros(h, h),
            reflection_bottom: DMatrix::zeros(h, h),
            transmission_tb: DMatrix::identity(h, h),
            transmission_bt: DMatrix::identity(h, h),
        }
    }

    /// Returns the matrix of the given block.
    pub fn block(&self, block: Block) -> &DMatrix<f64> {
        match block {
            Block::ReflectionTop => &self.reflection_top,
            Block::ReflectionBottom => &self.reflection_bottom,
            Block::TransmissionTopBottom => &self.transmission_tb,
            Block::TransmissionBottomTop => &self.transmission_bt,
        }
    }

    /// Returns the mode seen upside down.
    pub fn reversed(&self) -> Self {
        Self {
            reflection_top: self.reflection_bottom.clone(),
            reflection_bottom: self.reflection_top.clone(),
            transmission_tb: self.transmission_bt.clone(),
            transmission_bt: self.transmission_tb.clone(),
        }
    }
}

/// Description of one interface a layer was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interface {
    /// Rough dielectric or conductor interface.
    Microfacet(MicrofacetParams),
    /// Opaque Lambertian reflector.
    Diffuse {
        /// Hemispherical reflectance.
        albedo: f64,
    },
    /// Interface that does not deflect light at all.
    IndexMatched,
}

/// A single interface, or an already combined stack of interfaces, sampled
/// on a quadrature rule and a number of Fourier orders.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    quadrature: QuadratureNodes,
    modes: Vec<LayerMode>,
    /// Interfaces from top to bottom.
    interfaces: Vec<Interface>,
}

impl Layer {
    /// Creates a layer from its modes.
    ///
    /// Fails if the quadrature node count is odd, if there is no mode or if
    /// any matrix does not have the hemisphere size of the rule.
    pub fn new(
        quadrature: QuadratureNodes,
        modes: Vec<LayerMode>,
        interfaces: Vec<Interface>,
    ) -> Result<Self, Error> {
        check_discretization(&quadrature, modes.len())?;
        let h = quadrature.hemisphere_len();
        for mode in &modes {
            for block in Block::ALL {
                let m = mode.block(block);
                if m.nrows() != h || m.ncols() != h {
                    return Err(Error::DiscretizationMismatch {
                        expected: (quadrature.len(), modes.len()),
                        found: (2 * m.nrows().max(m.ncols()), modes.len()),
                    });
                }
            }
        }
        Ok(Self {
            quadrature,
            modes,
            interfaces,
        })
    }

    /// Layer that transmits all light unchanged.
    pub fn identity(quadrature: &QuadratureNodes, orders: usize) -> Result<Self, Error> {
        check_discretization(quadrature, orders)?;
        let h = quadrature.hemisphere_len();
        Self::new(
            quadrature.clone(),
            vec![LayerMode::identity(h); orders],
            vec![Interface::IndexMatched],
        )
    }

    /// Rough interface layer, see [`microfacet::build`].
    pub fn microfacet(
        quadrature: &QuadratureNodes,
        orders: usize,
        params: &MicrofacetParams,
    ) -> Result<Self, Error> {
        microfacet::build(quadrature, orders, params)
    }

    /// Opaque Lambertian layer with the given albedo, reflecting on both
    /// sides.
    ///
    /// A diffuse BSDF has no azimuthal dependence, so only order 0 is
    /// non-zero.
    pub fn diffuse(quadrature: &QuadratureNodes, orders: usize, albedo: f64) -> Result<Self, Error> {
        if !(0.0..=1.0).contains(&albedo) {
            return Err(Error::UnsupportedMaterial {
                eta: Ior::VACUUM,
                alpha: albedo,
                reason: "diffuse albedo must lie in [0, 1]",
            });
        }
        check_discretization(quadrature, orders)?;
        let h = quadrature.hemisphere_len();
        let flux = flux_weights(quadrature);
        let mut modes = vec![LayerMode::zeros(h); orders];
        // f = albedo / π, so 2π f |μ_i| w_i = 2 albedo |μ_i| w_i
        let lambert = DMatrix::from_fn(h, h, |_, i| 2.0 * albedo * flux[i]);
        modes[0].reflection_top = lambert.clone();
        modes[0].reflection_bottom = lambert;
        clamp_energy(&mut modes, quadrature, Side::Top);
        clamp_energy(&mut modes, quadrature, Side::Bottom);
        Self::new(quadrature.clone(), modes, vec![Interface::Diffuse { albedo }])
    }

    pub(crate) fn set_interfaces(&mut self, interfaces: Vec<Interface>) {
        self.interfaces = interfaces;
    }

    /// Quadrature rule the layer is sampled on.
    pub fn quadrature(&self) -> &QuadratureNodes { &self.quadrature }

    /// All Fourier modes, lowest order first.
    pub fn modes(&self) -> &[LayerMode] { &self.modes }

    /// Number of Fourier orders.
    pub fn order_count(&self) -> usize { self.modes.len() }

    /// Number of nodes per hemisphere.
    pub fn node_count(&self) -> usize { self.quadrature.hemisphere_len() }

    /// Interfaces the layer was built from, top to bottom.
    pub fn interfaces(&self) -> &[Interface] { &self.interfaces }

    /// Number of quadrature nodes and Fourier orders of the layer.
    pub fn discretization(&self) -> Discretization {
        Discretization {
            n: self.quadrature.len(),
            m: self.modes.len(),
        }
    }

    /// Returns one scattering coefficient.
    ///
    /// # Arguments
    ///
    /// * `block` - Which of the four matrices to read.
    /// * `order` - Fourier order.
    /// * `incident` - Incident node, indexing the upper half of the rule.
    /// * `exitant` - Exitant node, indexing the upper half of the rule.
    pub fn coeff(&self, block: Block, order: usize, incident: usize, exitant: usize) -> f64 {
        self.modes[order].block(block)[(exitant, incident)]
    }

    /// Whether both layers are sampled on the same nodes and orders.
    pub fn is_compatible(&self, other: &Layer) -> bool {
        self.modes.len() == other.modes.len()
            && self.quadrature.nodes() == other.quadrature.nodes()
            && self.quadrature.weights() == other.quadrature.weights()
    }

    /// Same as [`Self::is_compatible`] but reports the mismatch.
    pub fn check_compatible(&self, other: &Layer) -> Result<(), Error> {
        if self.is_compatible(other) {
            Ok(())
        } else {
            Err(Error::DiscretizationMismatch {
                expected: (self.quadrature.len(), self.modes.len()),
                found: (other.quadrature.len(), other.modes.len()),
            })
        }
    }

    /// Returns the layer seen upside down.
    pub fn reversed(&self) -> Layer {
        Layer {
            quadrature: self.quadrature.clone(),
            modes: self.modes.iter().map(LayerMode::reversed).collect(),
            interfaces: self.interfaces.iter().rev().copied().collect(),
        }
    }

    /// Evaluates the Fourier series of one block for a pair of nodes.
    ///
    /// Returns the BSDF value (without cosine factor) for the azimuth
    /// difference `phi` between the propagation directions, summing the
    /// orders in `orders` only.
    pub fn eval(
        &self,
        block: Block,
        orders: Range<usize>,
        incident: usize,
        exitant: usize,
        phi: f64,
    ) -> f64 {
        let flux = self.quadrature.positive_nodes()[incident]
            * self.quadrature.positive_weights()[incident];
        let end = orders.end.min(self.modes.len());
        (orders.start..end)
            .map(|l| {
                let norm = if l == 0 { 2.0 * PI } else { PI };
                self.coeff(block, l, incident, exitant) * (l as f64 * phi).cos() / norm
            })
            .sum::<f64>()
            / flux
    }

    /// Fraction of the flux arriving from above at each node that leaves the
    /// layer, reflected or transmitted.
    pub fn albedo_top(&self) -> Vec<f64> {
        self.albedo(
            &self.modes[0].reflection_top,
            &self.modes[0].transmission_tb,
        )
    }

    /// Fraction of the flux arriving from below at each node that leaves the
    /// layer, reflected or transmitted.
    pub fn albedo_bottom(&self) -> Vec<f64> {
        self.albedo(
            &self.modes[0].reflection_bottom,
            &self.modes[0].transmission_bt,
        )
    }

    fn albedo(&self, r: &DMatrix<f64>, t: &DMatrix<f64>) -> Vec<f64> {
        let flux = flux_weights(&self.quadrature);
        (0..flux.len())
            .map(|i| {
                (0..flux.len())
                    .map(|o| (r[(o, i)] + t[(o, i)]) * flux[o])
                    .sum::<f64>()
                    / flux[i]
            })
            .collect()
    }

    /// Finds the worst breach of energy conservation beyond `tolerance`.
    ///
    /// Order 0 must not scatter more flux than it receives, and the absolute
    /// flux of higher orders must not exceed the one of order 0. Returns the
    /// offending `(order, incident node, value)`, where the value is the
    /// albedo for order 0 and the excess over order 0 otherwise.
    pub fn energy_violation(&self, tolerance: f64) -> Option<(usize, usize, f64)> {
        let flux = flux_weights(&self.quadrature);
        let h = flux.len();
        let weighted = |mode: &LayerMode, i: usize, top: bool| -> f64 {
            let (r, t) = if top {
                (&mode.reflection_top, &mode.transmission_tb)
            } else {
                (&mode.reflection_bottom, &mode.transmission_bt)
            };
            (0..h)
                .map(|o| (r[(o, i)].abs() + t[(o, i)].abs()) * flux[o])
                .sum::<f64>()
                / flux[i]
        };

        let mut worst: Option<(f64, (usize, usize, f64))> = None;
        let mut record = |order: usize, node: usize, excess: f64, value: f64| {
            if excess > tolerance && worst.map_or(true, |(w, _)| excess > w) {
                worst = Some((excess, (order, node, value)));
            }
        };
        for top in [true, false] {
            for i in 0..h {
                let albedo = weighted(&self.modes[0], i, top);
                record(0, i, albedo - 1.0, albedo);
                for (l, mode) in self.modes.iter().enumerate().skip(1) {
                    let excess = weighted(mode, i, top) - albedo;
                    record(l, i, excess, excess);
                }
            }
        }
        worst.map(|(_, found)| found)
    }

    /// Places `coating` on top of this layer, returning the combined layer.
    pub fn add_to_top(self, coating: &Layer, options: &AddingOptions) -> Result<Layer, Error> {
        combine_on_top(&self, coating, options)
    }

    /// Places `substrate` below this layer, returning the combined layer.
    pub fn add_to_bottom(
        self,
        substrate: &Layer,
        options: &AddingOptions,
    ) -> Result<Layer, Error> {
        combine_on_top(substrate, &self, options)
    }
}
