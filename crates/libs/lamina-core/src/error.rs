//! Error type shared by every lamina crate.
use crate::{
    io::{ReadFileError, WriteFileError},
    optics::Ior,
};

/// Errors raised while discretising, combining or storing layers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested quadrature rule cannot be built.
    #[error("cannot build a Gauss-Lobatto rule with {node_count} nodes: {reason}")]
    InvalidQuadratureRequest {
        /// Requested number of nodes.
        node_count: usize,
        /// Why the request was rejected.
        reason: &'static str,
    },
    /// The material parameters are outside the supported domain.
    #[error("unsupported material ({eta}, alpha={alpha}): {reason}")]
    UnsupportedMaterial {
        /// Relative refractive index of the interface.
        eta: Ior,
        /// Roughness of the interface.
        alpha: f64,
        /// Why the material was rejected.
        reason: &'static str,
    },
    /// Two layers (or a layer and a file) use different discretisations.
    #[error(
        "discretization mismatch: expected {} nodes and {} orders, found {} nodes and {} orders",
        .expected.0, .expected.1, .found.0, .found.1
    )]
    DiscretizationMismatch {
        /// Expected `(nodes, orders)`.
        expected: (usize, usize),
        /// Actual `(nodes, orders)`.
        found: (usize, usize),
    },
    /// A linear system of the adding equations is singular or too badly
    /// conditioned.
    #[error(
        "numerical instability in Fourier order {order} at node {node} (condition number \
         {condition:e})"
    )]
    NumericalInstability {
        /// Fourier order where the solve failed.
        order: usize,
        /// Quadrature node (positive hemisphere index) that dominates the
        /// failure.
        node: usize,
        /// Estimated 1-norm condition number, infinite if singular.
        condition: f64,
    },
    /// Channels were written out of order, or the file was closed too early.
    #[error(
        "invalid write order: expected channel {expected} of {channels}, got {}",
        describe_write(.found)
    )]
    InvalidWriteOrder {
        /// Next channel the writer expects.
        expected: usize,
        /// Channel that was written, `None` when closing.
        found: Option<usize>,
        /// Total number of channels declared at creation.
        channels: usize,
    },
    /// Error while writing a file.
    #[error(transparent)]
    WriteFile(#[from] WriteFileError),
    /// Error while reading a file.
    #[error(transparent)]
    ReadFile(#[from] ReadFileError),
    /// A configuration (recipe) is malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn describe_write(found: &Option<usize>) -> String {
    match found {
        Some(channel) => format!("channel {}", channel),
        None => "close".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_values() {
        let err = Error::InvalidWriteOrder {
            expected: 2,
            found: None,
            channels: 3,
        };
        assert_eq!(
            err.to_string(),
            "invalid write order: expected channel 2 of 3, got close"
        );
        let err = Error::DiscretizationMismatch {
            expected: (32, 8),
            found: (16, 8),
        };
        assert!(err.to_string().contains("found 16 nodes"));
        let err = Error::NumericalInstability {
            order: 3,
            node: 7,
            condition: f64::INFINITY,
        };
        assert!(err.to_string().contains("order 3 at node 7"));
    }
}
