//! Small numeric helpers.
use num_traits::Float;

/// Returns the square of the given value.
#[inline(always)]
pub fn sqr<F: Float>(x: F) -> F { x * x }

/// Returns the reciprocal of the double precision floating point.
///
/// Zero maps to a signed infinity instead of NaN.
#[inline(always)]
pub fn rcp_f64(x: f64) -> f64 {
    if x == 0.0 {
        return f64::INFINITY * x.signum();
    }
    1.0 / x
}

/// Pairwise summation of the given values.
///
/// This is a more accurate way of summing up floating point numbers, especially
/// when small values are added to large values.
pub fn pairwise_sum<F: Float>(values: &[F]) -> F {
    match values.len() {
        0 => F::zero(),
        1 => values[0],
        2 => values[0] + values[1],
        len => {
            let (left, right) = values.split_at(len / 2);
            pairwise_sum(left) + pairwise_sum(right)
        },
    }
}

/// Rounds a positive value up to the next even integer.
pub fn ceil_even(x: f64) -> usize {
    let c = x.max(0.0).ceil() as usize;
    c + (c & 1)
}
