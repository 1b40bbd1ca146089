//! Rough interface layers built from a Beckmann microfacet model.
//!
//! The BSDF follows Walter et al., "Microfacet Models for Refraction through
//! Rough Surfaces" (EGSR 2007), with the Smith masking-shadowing term and the
//! exact Fresnel equations for real or complex indices of refraction.
use crate::{
    distro::{BeckmannDistribution, MicrofacetDistribution},
    layer::{Interface, Layer, LayerMode},
    quad::{trapezoid_half_period, QuadratureNodes},
};
use base::{
    error::Error,
    math::{ceil_even, pairwise_sum, sqr},
    optics::{fresnel, Ior},
};
use nalgebra::{DMatrix, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum number of azimuthal samples used for the Fourier projection.
pub const MAX_AZIMUTHAL_SAMPLES: usize = 4096;

/// Real indices of refraction this close to one, without absorption, are
/// built as index-matched interfaces.
pub const INDEX_MATCHED_TOLERANCE: f64 = 1.0e-6;

/// Slope cells of the microfacet normal grid used to integrate the energy
/// scattered towards each incident node.
const NORMAL_SLOPE_CELLS: usize = 64;
/// Azimuth cells of the microfacet normal grid.
const NORMAL_AZIMUTH_CELLS: usize = 128;

/// Largest L1 distance between the normalised point-sampled and integrated
/// zenith profiles for which the point samples are kept.
const SHAPE_TOLERANCE: f64 = 0.5;

/// Parameters of a rough interface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MicrofacetParams {
    /// Index of refraction of the medium below the interface relative to the
    /// medium above it. A non-zero extinction coefficient makes the interface
    /// an opaque conductor.
    pub eta: Ior,
    /// Beckmann roughness.
    pub alpha: f64,
}

impl MicrofacetParams {
    /// Creates new microfacet parameters.
    pub const fn new(eta: Ior, alpha: f64) -> Self { Self { eta, alpha } }

    /// Checks that the parameters describe a supported material.
    pub fn validate(&self) -> Result<(), Error> {
        let reason = if !(self.alpha.is_finite() && self.alpha > 0.0) {
            "roughness must be positive and finite"
        } else if !(self.eta.eta.is_finite() && self.eta.eta > 0.0) {
            "real part of the index of refraction must be positive"
        } else if !(self.eta.k.is_finite() && self.eta.k >= 0.0) {
            "extinction coefficient must be non-negative"
        } else {
            return Ok(());
        };
        Err(Error::UnsupportedMaterial {
            eta: self.eta,
            alpha: self.alpha,
            reason,
        })
    }
}

/// Rough dielectric or conductor interface BSDF.
///
/// Directions point away from the surface; `wi` points towards the light.
/// Light arriving from below (`wi.z < 0`) sees the reciprocal index.
#[derive(Debug, Clone, Copy)]
pub struct MicrofacetBsdf {
    eta: Ior,
    distro: BeckmannDistribution,
}

impl MicrofacetBsdf {
    /// Creates the BSDF of the given interface.
    pub fn new(params: &MicrofacetParams) -> Self {
        Self {
            eta: params.eta,
            distro: BeckmannDistribution::new(params.alpha),
        }
    }

    /// Evaluates the BSDF (without the cosine factor).
    pub fn eval(&self, wi: &Vector3<f64>, wo: &Vector3<f64>) -> f64 {
        let (wi, wo, eta) = if wi.z < 0.0 {
            if self.eta.is_conductor() {
                return 0.0;
            }
            let flip = Vector3::new(1.0, 1.0, -1.0);
            (wi.component_mul(&flip), wo.component_mul(&flip), self.eta.recip())
        } else {
            (*wi, *wo, self.eta)
        };

        let cos_i = wi.z;
        let cos_o = wo.z;
        if cos_i <= 0.0 || cos_o == 0.0 {
            return 0.0;
        }

        if cos_o > 0.0 {
            let h = wi + wo;
            let len = h.norm();
            if len == 0.0 {
                return 0.0;
            }
            let h = h / len;
            let f = fresnel::reflectance(wi.dot(&h), eta);
            let d = self.distro.eval_ndf(h.z);
            let g = self.distro.eval_msf(&h, &wi, &wo);
            f * d * g / (4.0 * cos_i * cos_o)
        } else {
            if eta.is_conductor() {
                return 0.0;
            }
            let eta = eta.eta;
            let h = -(wi + wo * eta);
            let len = h.norm();
            if len < 1.0e-12 {
                return 0.0;
            }
            let h = if h.z < 0.0 { -h / len } else { h / len };
            let cos_ih = wi.dot(&h);
            let cos_oh = wo.dot(&h);
            if cos_ih * cos_oh >= 0.0 {
                return 0.0;
            }
            let denom = sqr(cos_ih + eta * cos_oh);
            if denom == 0.0 {
                return 0.0;
            }
            let f = fresnel::reflectance_dielectric(cos_ih.abs(), eta);
            let d = self.distro.eval_ndf(h.z);
            let g = self.distro.eval_msf(&h, &wi, &wo);
            (cos_ih * cos_oh).abs() * sqr(eta) * (1.0 - f) * d * g
                / ((cos_i * cos_o).abs() * denom)
        }
    }

    /// Reflected and refracted directions of light arriving from above and
    /// bouncing off the single microfacet `m`, with their energy weights.
    ///
    /// Averaging the weights over normals distributed as `D(m) m.z dωm`
    /// gives the albedo of the interface.
    fn scatter(&self, wi: &Vector3<f64>, m: &Vector3<f64>) -> [Option<(Vector3<f64>, f64)>; 2] {
        let cos_im = wi.dot(m);
        if wi.z <= 0.0 || m.z <= 0.0 || cos_im <= 0.0 {
            return [None, None];
        }
        let f = fresnel::reflectance(cos_im, self.eta);
        let projection = cos_im / (wi.z * m.z);

        let wo = m * (2.0 * cos_im) - wi;
        let reflected =
            (wo.z > 0.0).then(|| (wo, f * self.distro.eval_msf(m, wi, &wo) * projection));
        let refracted = if self.eta.is_conductor() {
            None
        } else {
            let eta = self.eta.eta;
            fresnel::refracted_cos(cos_im, eta).and_then(|cos_t| {
                let wo = m * (cos_im / eta - cos_t) - wi / eta;
                (wo.z < 0.0)
                    .then(|| (wo, (1.0 - f) * self.distro.eval_msf(m, wi, &wo) * projection))
            })
        };
        [reflected, refracted]
    }
}

/// Number of azimuthal intervals used to project a lobe of roughness `alpha`
/// onto `orders` cosine harmonics.
pub fn azimuthal_samples(orders: usize, alpha: f64) -> usize {
    let by_orders = 4 * orders;
    let by_lobe = (16.0 / alpha).ceil().min(MAX_AZIMUTHAL_SAMPLES as f64) as usize;
    ceil_even(by_orders.max(by_lobe) as f64).min(MAX_AZIMUTHAL_SAMPLES)
}

/// Builds the layer of a single rough interface.
///
/// # Arguments
///
/// * `quadrature` - Zenith discretisation; the node count must be even.
/// * `orders` - Number of Fourier orders, at least one.
/// * `params` - Interface parameters.
pub fn build(
    quadrature: &QuadratureNodes,
    orders: usize,
    params: &MicrofacetParams,
) -> Result<Layer, Error> {
    params.validate()?;
    check_discretization(quadrature, orders)?;

    let interfaces = vec![Interface::Microfacet(*params)];
    if is_index_matched(params.eta) {
        log::debug!("index matched interface with α = {}, using identity", params.alpha);
        let mut layer = Layer::identity(quadrature, orders)?;
        layer.set_interfaces(interfaces);
        return Ok(layer);
    }

    let h = quadrature.hemisphere_len();
    let projector = Projector::new(quadrature, orders, params.alpha);
    log::debug!(
        "building microfacet layer {:?}, α = {}: {} nodes, {} orders, {} azimuthal intervals",
        params.eta,
        params.alpha,
        quadrature.len(),
        orders,
        projector.phis.len() - 1
    );
    let bsdf = MicrofacetBsdf::new(params);
    let mut modes = vec![LayerMode::zeros(h); orders];

    let (r_top, t_tb) = projector.project(&bsdf);
    if params.eta.is_conductor() {
        for (mode, r) in modes.iter_mut().zip(r_top) {
            mode.reflection_top = r;
        }
        clamp_energy(&mut modes, quadrature, Side::Top);
        return Layer::new(quadrature.clone(), modes, interfaces);
    }

    for (mode, (r, t)) in modes.iter_mut().zip(r_top.into_iter().zip(t_tb)) {
        mode.reflection_top = r;
        mode.transmission_tb = t;
    }
    clamp_energy(&mut modes, quadrature, Side::Top);

    // Bottom side: reflection under angle reversal, transmission by
    // reciprocity of the (already clamped) top to bottom transmission,
    // carrying the flux the reversed interface transmits.
    let flipped = MicrofacetBsdf::new(&MicrofacetParams::new(params.eta.recip(), params.alpha));
    let (r_bottom, t_reversed) = projector.project(&flipped);
    let eta2 = sqr(params.eta.eta);
    let flux = &projector.flux;
    for (mode, r) in modes.iter_mut().zip(r_bottom) {
        mode.reflection_bottom = r;
        mode.transmission_bt = DMatrix::from_fn(h, h, |row, col| {
            mode.transmission_tb[(col, row)] * flux[col] / (flux[row] * eta2)
        });
    }
    match_transmitted_flux(&mut modes, &t_reversed, flux);
    clamp_energy(&mut modes, quadrature, Side::Bottom);

    Layer::new(quadrature.clone(), modes, interfaces)
}

fn is_index_matched(eta: Ior) -> bool {
    eta.is_index_matched()
        || (eta.is_dielectric() && (eta.eta - 1.0).abs() <= INDEX_MATCHED_TOLERANCE)
}

/// Flux leaving column `i` of `m`, relative to the flux arriving at node `i`.
fn column_albedo(m: &DMatrix<f64>, i: usize, flux: &[f64]) -> f64 {
    let terms = flux.iter().enumerate().map(|(o, f)| m[(o, i)] * f).collect::<Vec<_>>();
    pairwise_sum(&terms) / flux[i]
}

/// Rescales every column of the bottom to top transmission to the flux
/// `reversed` transmits from the same node.
///
/// Columns the reciprocal transmission leaves empty while the reversed
/// interface does transmit are taken from `reversed`.
fn match_transmitted_flux(modes: &mut [LayerMode], reversed: &[DMatrix<f64>], flux: &[f64]) {
    for i in 0..flux.len() {
        let target = column_albedo(&reversed[0], i, flux);
        let derived = column_albedo(&modes[0].transmission_bt, i, flux);
        if derived > 0.0 {
            let scale = target.max(0.0) / derived;
            for mode in modes.iter_mut() {
                mode.transmission_bt.column_mut(i).scale_mut(scale);
            }
        } else if target > 0.0 {
            log::trace!("bottom transmission of node {} taken from the reversed interface", i);
            for (mode, t) in modes.iter_mut().zip(reversed) {
                mode.transmission_bt.set_column(i, &t.column(i));
            }
        }
    }
}

pub(crate) fn check_discretization(
    quadrature: &QuadratureNodes,
    orders: usize,
) -> Result<(), Error> {
    if quadrature.len() % 2 != 0 {
        return Err(Error::InvalidQuadratureRequest {
            node_count: quadrature.len(),
            reason: "layers need an even node count",
        });
    }
    if orders == 0 {
        return Err(Error::InvalidQuadratureRequest {
            node_count: quadrature.len(),
            reason: "layers need at least one Fourier order",
        });
    }
    Ok(())
}

/// `|μ| w` for every node of the upper hemisphere.
pub(crate) fn flux_weights(quadrature: &QuadratureNodes) -> Vec<f64> {
    quadrature
        .positive_nodes()
        .iter()
        .zip(quadrature.positive_weights())
        .map(|(mu, w)| mu * w)
        .collect()
}

/// Side of a layer light arrives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Top,
    Bottom,
}

/// Rescales every incident column whose order-0 albedo exceeds one.
///
/// Discretisation error can push the albedo of grazing nodes slightly above
/// one; the same factor is applied to all orders so that higher orders stay
/// bounded by order 0.
pub(crate) fn clamp_energy(modes: &mut [LayerMode], quadrature: &QuadratureNodes, side: Side) {
    let flux = flux_weights(quadrature);
    let h = flux.len();
    for i in 0..h {
        let albedo = {
            let (r, t) = match side {
                Side::Top => (&modes[0].reflection_top, &modes[0].transmission_tb),
                Side::Bottom => (&modes[0].reflection_bottom, &modes[0].transmission_bt),
            };
            (0..h)
                .map(|o| (r[(o, i)] + t[(o, i)]) * flux[o])
                .sum::<f64>()
                / flux[i]
        };
        if albedo > 1.0 {
            log::debug!(
                "clamping {:?} albedo {:.6} of incident node {} (μ = {:.4})",
                side,
                albedo,
                i,
                quadrature.positive_nodes()[i]
            );
            let scale = 1.0 / albedo;
            for mode in modes.iter_mut() {
                let (r, t) = match side {
                    Side::Top => (&mut mode.reflection_top, &mut mode.transmission_tb),
                    Side::Bottom => (&mut mode.reflection_bottom, &mut mode.transmission_bt),
                };
                r.column_mut(i).scale_mut(scale);
                t.column_mut(i).scale_mut(scale);
            }
        }
    }
}

/// Per order columns, indexed `[l][o]`.
type Columns = Vec<Vec<f64>>;

/// Projects a BSDF onto the cosine harmonics of the azimuth difference for
/// every pair of hemisphere nodes.
///
/// Each incident column is computed twice: by point sampling the BSDF at the
/// nodes, and by integrating the flux scattered by a grid of microfacet
/// normals into the zenith cells around the nodes. The point samples give
/// the shape of lobes wider than a cell; the integration gives the energy,
/// and the whole column when the lobe falls between nodes.
struct Projector {
    mus: Vec<f64>,
    flux: Vec<f64>,
    /// Zenith cell boundaries between consecutive positive nodes.
    bounds: Vec<f64>,
    orders: usize,
    /// Sines and cosines of the azimuthal sample angles.
    phis: Vec<(f64, f64)>,
    /// `2 w_k cos(l φ_k)`, indexed `[l][k]`.
    basis: Vec<Vec<f64>>,
    normals: Vec<Vector3<f64>>,
}

impl Projector {
    fn new(quadrature: &QuadratureNodes, orders: usize, alpha: f64) -> Self {
        let (phis, weights) = trapezoid_half_period(azimuthal_samples(orders, alpha));
        let basis = (0..orders)
            .map(|l| {
                phis.iter()
                    .zip(weights.iter())
                    .map(|(phi, w)| 2.0 * w * (l as f64 * phi).cos())
                    .collect()
            })
            .collect();
        let mus = quadrature.positive_nodes().to_vec();
        let bounds = mus.windows(2).map(|pair| 0.5 * (pair[0] + pair[1])).collect();
        let distro = BeckmannDistribution::new(alpha);
        Self {
            mus,
            flux: flux_weights(quadrature),
            bounds,
            orders,
            phis: phis.iter().map(|phi| phi.sin_cos()).collect(),
            basis,
            normals: distro.normal_grid(NORMAL_SLOPE_CELLS, NORMAL_AZIMUTH_CELLS),
        }
    }

    fn incident(&self, i: usize) -> Vector3<f64> {
        let mu_i = self.mus[i];
        Vector3::new(-(1.0 - sqr(mu_i)).max(0.0).sqrt(), 0.0, mu_i)
    }

    /// Returns the reflection and transmission matrices of every order, for
    /// light arriving from above.
    fn project(&self, bsdf: &MicrofacetBsdf) -> (Vec<DMatrix<f64>>, Vec<DMatrix<f64>>) {
        let h = self.mus.len();
        let columns = (0..h)
            .into_par_iter()
            .map(|i| {
                let (r, t) = self.sample(bsdf, i);
                let (r_energy, t_energy) = self.integrate(bsdf, i);
                (self.resolve(r, r_energy), self.resolve(t, t_energy))
            })
            .collect::<Vec<_>>();

        let mut reflected = vec![DMatrix::zeros(h, h); self.orders];
        let mut transmitted = vec![DMatrix::zeros(h, h); self.orders];
        for (i, (r, t)) in columns.iter().enumerate() {
            for l in 0..self.orders {
                reflected[l].column_mut(i).copy_from_slice(&r[l]);
                transmitted[l].column_mut(i).copy_from_slice(&t[l]);
            }
        }
        (reflected, transmitted)
    }

    /// Fourier coefficients of the BSDF at the nodes, from point samples in
    /// azimuth.
    fn sample(&self, bsdf: &MicrofacetBsdf, i: usize) -> (Columns, Columns) {
        let h = self.mus.len();
        let wi = self.incident(i);
        let mut r = vec![vec![0.0; h]; self.orders];
        let mut t = vec![vec![0.0; h]; self.orders];
        let mut samples = vec![0.0; self.phis.len()];
        for o in 0..h {
            let mu_o = self.mus[o];
            let sin_o = (1.0 - sqr(mu_o)).max(0.0).sqrt();
            for (dz, out) in [(1.0, &mut r), (-1.0, &mut t)] {
                for (s, (sin_phi, cos_phi)) in samples.iter_mut().zip(self.phis.iter()) {
                    let wo = Vector3::new(sin_o * cos_phi, sin_o * sin_phi, dz * mu_o);
                    *s = bsdf.eval(&wi, &wo);
                }
                for (l, basis) in self.basis.iter().enumerate() {
                    let coeff = samples.iter().zip(basis).map(|(s, b)| s * b).sum::<f64>();
                    out[l][o] = coeff * self.flux[i];
                }
            }
        }
        (r, t)
    }

    /// Fourier coefficients of the flux the microfacet normals scatter into
    /// each zenith cell.
    fn integrate(&self, bsdf: &MicrofacetBsdf, i: usize) -> (Columns, Columns) {
        let h = self.mus.len();
        let wi = self.incident(i);
        let share = 1.0 / self.normals.len() as f64;
        let mut r = vec![vec![0.0; h]; self.orders];
        let mut t = vec![vec![0.0; h]; self.orders];
        for m in &self.normals {
            for (scattered, out) in bsdf.scatter(&wi, m).into_iter().zip([&mut r, &mut t]) {
                let Some((wo, weight)) = scattered else {
                    continue;
                };
                let o = self.bounds.partition_point(|&b| b < wo.z.abs());
                let sin_o = wo.x.hypot(wo.y);
                let cos_phi = if sin_o > 1.0e-12 { wo.x / sin_o } else { 1.0 };
                let energy = weight * share * self.flux[i] / self.flux[o];
                // cos(l φ) by the Chebyshev recurrence
                let (mut prev, mut cur) = (cos_phi, 1.0);
                for column in out.iter_mut() {
                    column[o] += energy * cur;
                    let next = 2.0 * cos_phi * cur - prev;
                    prev = cur;
                    cur = next;
                }
            }
        }
        (r, t)
    }

    /// Keeps the point samples scaled to the integrated flux when both agree
    /// on the zenith profile of order 0, otherwise the integrated columns.
    fn resolve(&self, sampled: Columns, integrated: Columns) -> Columns {
        let outgoing = |column: &[f64]| {
            let terms = column.iter().zip(&self.flux).map(|(v, f)| v * f).collect::<Vec<_>>();
            pairwise_sum(&terms)
        };
        let target = outgoing(&integrated[0]);
        let found = outgoing(&sampled[0]);
        if target <= 0.0 || found <= 0.0 {
            return integrated;
        }
        let distance = sampled[0]
            .iter()
            .zip(&integrated[0])
            .zip(&self.flux)
            .map(|((s, g), f)| (s / found - g / target).abs() * f)
            .sum::<f64>();
        if distance > SHAPE_TOLERANCE {
            log::trace!("lobe falls between nodes (distance {:.3}), integrating", distance);
            return integrated;
        }
        let scale = target / found;
        sampled
            .into_iter()
            .map(|column| column.into_iter().map(|v| v * scale).collect())
            .collect()
    }
}
