//! Adding operator: optical combination of two stacked layers.
//!
//! For every Fourier order, with the coating as layer 1 and the substrate as
//! layer 2, the light bouncing between the two layers is accounted for by
//! solving
//!
//! ```text
//! Xd   = (I - R1b R2t)^-1 T1tb        Xu   = (I - R2t R1b)^-1 T2bt
//! R_t  = R1t + T1bt R2t Xd            R_b  = R2b + T2tb R1b Xu
//! T_tb = T2tb Xd                      T_bt = T1bt Xu
//! ```
//!
//! Fourier orders do not interact, so they are combined in parallel.
use crate::layer::{Layer, LayerMode};
use base::error::Error;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How the interreflection systems are solved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum SolveMethod {
    /// LU factorisation with a condition number check.
    #[default]
    Direct,
    /// Fixed point iteration `X <- T + P X`, i.e. the Neumann series of the
    /// interreflections, summed until it converges.
    Neumann {
        /// Relative size of the last update below which the series is
        /// considered converged.
        #[serde(default = "default_tolerance")]
        tolerance: f64,
        /// Number of iterations after which the solve fails.
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
    },
}

fn default_tolerance() -> f64 { 1.0e-12 }

fn default_max_iterations() -> usize { 10_000 }

impl SolveMethod {
    /// Neumann iteration with the default tolerance and iteration count.
    pub fn neumann() -> Self {
        SolveMethod::Neumann {
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Options of the adding operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddingOptions {
    /// Solver of the interreflection systems.
    pub method: SolveMethod,
    /// Largest 1-norm condition number accepted by the direct solver.
    pub max_condition: f64,
}

impl Default for AddingOptions {
    fn default() -> Self {
        Self {
            method: SolveMethod::Direct,
            max_condition: 1.0e12,
        }
    }
}

/// Combines `coating` placed on top of `substrate` into a single layer.
///
/// Both layers must share the quadrature rule and the number of Fourier
/// orders. The interfaces of the result list the coating's first.
pub fn combine_on_top(
    substrate: &Layer,
    coating: &Layer,
    options: &AddingOptions,
) -> Result<Layer, Error> {
    substrate.check_compatible(coating)?;

    let modes = coating
        .modes()
        .par_iter()
        .zip(substrate.modes().par_iter())
        .enumerate()
        .map(|(order, (top, bottom))| add_mode(order, top, bottom, options))
        .collect::<Result<Vec<_>, Error>>()?;

    let interfaces = coating
        .interfaces()
        .iter()
        .chain(substrate.interfaces())
        .copied()
        .collect();
    let layer = Layer::new(substrate.quadrature().clone(), modes, interfaces)?;

    if let Some((order, node, value)) = layer.energy_violation(1.0e-9) {
        log::warn!(
            "combined layer breaks energy conservation in order {} at node {}: {:.6e}",
            order,
            node,
            value
        );
    }
    log::debug!(
        "combined {} interfaces over {} orders",
        layer.interfaces().len(),
        layer.order_count()
    );
    Ok(layer)
}

/// Combines one Fourier order of the coating (`top`) and the substrate
/// (`bottom`).
fn add_mode(
    order: usize,
    top: &LayerMode,
    bottom: &LayerMode,
    options: &AddingOptions,
) -> Result<LayerMode, Error> {
    let down = solve(
        order,
        &top.reflection_bottom * &bottom.reflection_top,
        &top.transmission_tb,
        options,
    )?;
    let up = solve(
        order,
        &bottom.reflection_top * &top.reflection_bottom,
        &bottom.transmission_bt,
        options,
    )?;

    Ok(LayerMode {
        reflection_top: &top.reflection_top
            + &top.transmission_bt * (&bottom.reflection_top * &down),
        reflection_bottom: &bottom.reflection_bottom
            + &bottom.transmission_tb * (&top.reflection_bottom * &up),
        transmission_tb: &bottom.transmission_tb * &down,
        transmission_bt: &top.transmission_bt * &up,
    })
}

/// Solves `(I - bounce) X = rhs`.
fn solve(
    order: usize,
    bounce: DMatrix<f64>,
    rhs: &DMatrix<f64>,
    options: &AddingOptions,
) -> Result<DMatrix<f64>, Error> {
    match options.method {
        SolveMethod::Direct => solve_direct(order, bounce, rhs, options.max_condition),
        SolveMethod::Neumann {
            tolerance,
            max_iterations,
        } => solve_neumann(order, &bounce, rhs, tolerance, max_iterations),
    }
}

/// Maximum absolute column sum.
fn norm_1(m: &DMatrix<f64>) -> f64 {
    m.column_iter()
        .map(|c| c.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

fn solve_direct(
    order: usize,
    bounce: DMatrix<f64>,
    rhs: &DMatrix<f64>,
    max_condition: f64,
) -> Result<DMatrix<f64>, Error> {
    let h = bounce.nrows();
    let a = DMatrix::identity(h, h) - bounce;
    let lu = a.clone().lu();
    let inverse = match lu.try_inverse() {
        Some(inverse) => inverse,
        None => {
            let u = lu.u();
            let node = (0..h)
                .min_by(|&x, &y| u[(x, x)].abs().total_cmp(&u[(y, y)].abs()))
                .unwrap_or(0);
            return Err(Error::NumericalInstability {
                order,
                node,
                condition: f64::INFINITY,
            });
        },
    };

    let condition = norm_1(&a) * norm_1(&inverse);
    if !condition.is_finite() || condition > max_condition {
        // The node whose incident light is amplified the most.
        let node = inverse
            .column_iter()
            .map(|c| c.iter().map(|v| v.abs()).sum::<f64>())
            .enumerate()
            .max_by(|x, y| x.1.total_cmp(&y.1))
            .map_or(0, |(i, _)| i);
        return Err(Error::NumericalInstability {
            order,
            node,
            condition,
        });
    }
    log::trace!("order {}: condition number {:.3e}", order, condition);

    Ok(inverse * rhs)
}

/// Sums the Neumann series `X = Σ_k bounce^k rhs`.
///
/// On failure the reported condition is the amplification `1 / (1 - ρ)`
/// estimated from the contraction rate `ρ` of the last two updates.
fn solve_neumann(
    order: usize,
    bounce: &DMatrix<f64>,
    rhs: &DMatrix<f64>,
    tolerance: f64,
    max_iterations: usize,
) -> Result<DMatrix<f64>, Error> {
    let mut x = rhs.clone();
    let mut prev_update = f64::INFINITY;
    let mut rate = 0.0;
    for iteration in 0..max_iterations {
        let next = rhs + bounce * &x;
        let diff = &next - &x;
        let update = diff.amax();
        x = next;
        if !update.is_finite() {
            break;
        }
        if update <= tolerance * x.amax().max(1.0) {
            log::trace!("order {}: Neumann series converged after {} terms", order, iteration + 1);
            return Ok(x);
        }
        if prev_update.is_finite() && prev_update > 0.0 {
            rate = update / prev_update;
        }
        prev_update = update;
        if iteration + 1 == max_iterations {
            let node = diff
                .column_iter()
                .map(|c| c.amax())
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map_or(0, |(i, _)| i);
            return Err(Error::NumericalInstability {
                order,
                node,
                condition: amplification(rate),
            });
        }
    }

    // Diverged to infinity or NaN.
    let node = x
        .column_iter()
        .position(|c| c.iter().any(|v| !v.is_finite()))
        .unwrap_or(0);
    Err(Error::NumericalInstability {
        order,
        node,
        condition: f64::INFINITY,
    })
}

fn amplification(rate: f64) -> f64 {
    if rate < 1.0 {
        1.0 / (1.0 - rate)
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layer::Block,
        microfacet::MicrofacetParams,
        quad::QuadratureNodes,
    };
    use approx::assert_relative_eq;
    use base::optics::Ior;

    fn rule(n: usize) -> QuadratureNodes { QuadratureNodes::gauss_lobatto(n).unwrap() }

    fn layer(quad: &QuadratureNodes, m: usize, eta: Ior, alpha: f64) -> Layer {
        Layer::microfacet(quad, m, &MicrofacetParams::new(eta, alpha)).unwrap()
    }

    #[test]
    fn index_matched_coating_leaves_substrate_unchanged() {
        let quad = rule(16);
        let substrate = layer(&quad, 5, Ior::new(0.2, 3.0), 0.3);
        for coating in [
            Layer::identity(&quad, 5).unwrap(),
            layer(&quad, 5, Ior::VACUUM, 0.2),
        ] {
            let combined = combine_on_top(&substrate, &coating, &AddingOptions::default()).unwrap();
            for (a, b) in combined.modes().iter().zip(substrate.modes()) {
                for block in Block::ALL {
                    assert!(
                        (a.block(block) - b.block(block)).amax() < 1e-14,
                        "{:?} changed",
                        block
                    );
                }
            }
            assert_eq!(combined.interfaces().len(), 2);
            assert_eq!(combined.interfaces()[1], substrate.interfaces()[0]);
        }
    }

    #[test]
    fn combined_layers_conserve_energy() {
        let quad = rule(16);
        let m = 5;
        let cases = [
            (Ior::dielectric(1.5), 0.3, Ior::new(0.143, 3.983), 0.3),
            (Ior::dielectric(1.5), 0.5, Ior::new(1.2, 7.0), 0.2),
            (Ior::dielectric(1.33), 0.3, Ior::dielectric(1.5 / 1.33), 0.4),
            (Ior::dielectric(1.05), 0.6, Ior::dielectric(1.02), 0.3),
            (Ior::dielectric(2.4), 0.25, Ior::new(0.05, 0.5), 0.5),
        ];
        for (eta_top, alpha_top, eta_bottom, alpha_bottom) in cases {
            let coating = layer(&quad, m, eta_top, alpha_top);
            let substrate = layer(&quad, m, eta_bottom, alpha_bottom);
            let combined = substrate
                .add_to_top(&coating, &AddingOptions::default())
                .unwrap();
            assert!(
                combined.energy_violation(1e-9).is_none(),
                "{:?} over {:?}: {:?}",
                eta_top,
                eta_bottom,
                combined.energy_violation(1e-9)
            );
        }
    }

    #[test]
    fn nearly_matched_coating_approaches_the_bare_substrate() {
        let quad = rule(24);
        let substrate = layer(&quad, 6, Ior::new(0.2, 3.0), 0.3);
        let coating = layer(&quad, 6, Ior::dielectric(1.0 + 1e-4), 0.01);
        let combined = substrate
            .clone()
            .add_to_top(&coating, &AddingOptions::default())
            .unwrap();
        for (a, b) in combined.modes().iter().zip(substrate.modes()) {
            let scale = b.reflection_top.amax();
            let diff = (&a.reflection_top - &b.reflection_top).amax();
            assert!(diff <= 1e-2 * scale, "{} vs {}", diff, scale);
        }
    }

    #[test]
    fn faint_coating_barely_dims_gold() {
        let quad = rule(24);
        let gold = layer(&quad, 8, Ior::new(0.143, 3.983), 0.1);
        let coating = layer(&quad, 8, Ior::dielectric(1.05), 0.1);
        let bare = *gold.albedo_top().last().unwrap();
        let coated = gold.add_to_top(&coating, &AddingOptions::default()).unwrap();
        let albedo = *coated.albedo_top().last().unwrap();
        assert!(albedo >= 0.85 * bare, "{} vs bare {}", albedo, bare);
        assert!(albedo <= 1.0 + 1e-9);
    }

    #[test]
    fn coating_keeps_opaque_base_opaque() {
        let quad = rule(16);
        let coating = layer(&quad, 4, Ior::dielectric(1.5), 0.3);
        let diffuse = Layer::diffuse(&quad, 4, 0.8).unwrap();
        let combined = diffuse.add_to_top(&coating, &AddingOptions::default()).unwrap();
        for a in combined.albedo_top() {
            assert!(a > 0.0 && a <= 1.0 + 1e-12, "albedo {}", a);
        }
        assert_eq!(combined.modes()[0].transmission_tb.amax(), 0.0);
        assert_eq!(combined.modes()[0].transmission_bt.amax(), 0.0);
        // the diffuse base has no azimuthal dependence, the coating does
        assert_eq!(combined.modes()[2].reflection_top, coating.modes()[2].reflection_top);
    }

    #[test]
    fn direct_and_neumann_solves_agree() {
        let quad = rule(12);
        let coating = layer(&quad, 4, Ior::dielectric(1.5), 0.4);
        let substrate = layer(&quad, 4, Ior::new(0.2, 3.0), 0.4);
        let direct = combine_on_top(&substrate, &coating, &AddingOptions::default()).unwrap();
        let iterative = combine_on_top(
            &substrate,
            &coating,
            &AddingOptions {
                method: SolveMethod::neumann(),
                ..Default::default()
            },
        )
        .unwrap();
        for (a, b) in direct.modes().iter().zip(iterative.modes()) {
            for block in Block::ALL {
                let scale = a.block(block).amax().max(1.0);
                assert!((a.block(block) - b.block(block)).amax() < 1e-9 * scale);
            }
        }
    }

    #[test]
    fn adding_to_bottom_is_adding_to_top_mirrored() {
        let quad = rule(12);
        let coating = layer(&quad, 3, Ior::dielectric(1.5), 0.4);
        let substrate = layer(&quad, 3, Ior::new(0.2, 3.0), 0.4);
        let options = AddingOptions::default();
        let a = substrate.clone().add_to_top(&coating, &options).unwrap();
        let b = coating.add_to_bottom(&substrate, &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let a = Layer::identity(&rule(12), 4).unwrap();
        let b = Layer::identity(&rule(16), 4).unwrap();
        assert!(matches!(
            combine_on_top(&a, &b, &AddingOptions::default()),
            Err(Error::DiscretizationMismatch { .. })
        ));
    }

    #[test]
    fn lossless_interreflection_is_reported() {
        // Two perfect mirrors facing each other never let light escape.
        let quad = rule(8);
        let h = quad.hemisphere_len();
        let mut mirror = LayerMode::zeros(h);
        mirror.reflection_top = DMatrix::identity(h, h);
        mirror.reflection_bottom = DMatrix::identity(h, h);
        let mut half = LayerMode::zeros(h);
        half.reflection_bottom = DMatrix::identity(h, h);
        half.transmission_tb = DMatrix::identity(h, h) * 0.5;
        let substrate = Layer::new(quad.clone(), vec![mirror], vec![]).unwrap();
        let coating = Layer::new(quad, vec![half], vec![]).unwrap();

        let err = combine_on_top(&substrate, &coating, &AddingOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NumericalInstability { order: 0, .. }));

        let err = combine_on_top(
            &substrate,
            &coating,
            &AddingOptions {
                method: SolveMethod::Neumann {
                    tolerance: 1e-12,
                    max_iterations: 50,
                },
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::NumericalInstability { order: 0, condition, .. } if condition.is_infinite()
        ));
    }

    #[test]
    fn ill_conditioned_systems_are_rejected() {
        let quad = rule(8);
        let h = quad.hemisphere_len();
        let mut mirror = LayerMode::zeros(h);
        mirror.reflection_top = DMatrix::identity(h, h);
        let mut leaky = LayerMode::zeros(h);
        leaky.reflection_bottom = DMatrix::identity(h, h) * 0.5;
        leaky.reflection_bottom[(2, 2)] = 1.0 - 1e-14;
        leaky.transmission_tb = DMatrix::identity(h, h) * 1e-3;
        leaky.transmission_bt = DMatrix::identity(h, h) * 1e-3;
        let substrate = Layer::new(quad.clone(), vec![mirror], vec![]).unwrap();
        let coating = Layer::new(quad, vec![leaky], vec![]).unwrap();
        match combine_on_top(&substrate, &coating, &AddingOptions::default()) {
            Err(Error::NumericalInstability { node, condition, .. }) => {
                assert_eq!(node, 2);
                assert!(condition > 1e12);
            },
            other => panic!("unexpected result {:?}", other.map(|l| l.order_count())),
        }
        let relaxed = AddingOptions {
            max_condition: 1e16,
            ..Default::default()
        };
        let combined = combine_on_top(&substrate, &coating, &relaxed).unwrap();
        assert_relative_eq!(
            combined.coeff(Block::ReflectionTop, 0, 0, 0),
            1e-6 / 0.5,
            max_relative = 1e-12
        );
    }
}
