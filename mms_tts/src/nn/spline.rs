//! Piecewise rational-quadratic spline transform used by the duration
//! predictor's conv flows.
//!
//! Only the inverse transform is needed at inference (the flows run in
//! reverse on noise), applied elementwise on host values: each time step
//! carries its own bin parameters and the sequence lengths involved are tiny.

const MIN_BIN_WIDTH: f64 = 1e-3;
const MIN_BIN_HEIGHT: f64 = 1e-3;
const MIN_DERIVATIVE: f64 = 1e-3;

fn softplus(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp().ln_1p() }
}

fn softmax(values: &mut [f64]) {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Cumulative bin edges on `[-tail_bound, tail_bound]` from unnormalized
/// logits, with the minimum bin size enforced.
fn bin_edges(unnormalized: &[f32], min_size: f64, tail_bound: f64) -> (Vec<f64>, Vec<f64>) {
    let num_bins = unnormalized.len();
    let mut sizes: Vec<f64> = unnormalized.iter().map(|&v| v as f64).collect();
    softmax(&mut sizes);
    for size in sizes.iter_mut() {
        *size = min_size + (1.0 - min_size * num_bins as f64) * *size;
    }
    let mut edges = Vec::with_capacity(num_bins + 1);
    let mut cum = 0.0;
    edges.push(-tail_bound);
    for size in &sizes[..num_bins - 1] {
        cum += size;
        edges.push(-tail_bound + 2.0 * tail_bound * cum);
    }
    edges.push(tail_bound);
    let widths: Vec<f64> = edges.windows(2).map(|w| w[1] - w[0]).collect();
    (edges, widths)
}

/// Inverse of the unconstrained rational-quadratic spline at a single value.
///
/// `unnormalized_derivatives` has `num_bins - 1` interior entries; the
/// boundary derivatives are pinned so the identity tails join smoothly.
/// Inputs outside `[-tail_bound, tail_bound]` pass through unchanged.
pub(crate) fn spline_inverse(
    input: f32,
    unnormalized_widths: &[f32],
    unnormalized_heights: &[f32],
    unnormalized_derivatives: &[f32],
    tail_bound: f64,
) -> f32 {
    let x = input as f64;
    if !(-tail_bound..=tail_bound).contains(&x) {
        return input;
    }

    let num_bins = unnormalized_widths.len();
    let (cumwidths, widths) = bin_edges(unnormalized_widths, MIN_BIN_WIDTH, tail_bound);
    let (cumheights, heights) = bin_edges(unnormalized_heights, MIN_BIN_HEIGHT, tail_bound);

    // Boundary derivatives chosen so softplus yields exactly 1 - MIN_DERIVATIVE,
    // making the overall edge derivative 1 (linear tails).
    let boundary = ((1.0 - MIN_DERIVATIVE).exp() - 1.0).ln();
    let mut derivatives = Vec::with_capacity(num_bins + 1);
    derivatives.push(MIN_DERIVATIVE + softplus(boundary));
    for &d in unnormalized_derivatives {
        derivatives.push(MIN_DERIVATIVE + softplus(d as f64));
    }
    derivatives.push(MIN_DERIVATIVE + softplus(boundary));

    // The inverse maps through the heights axis.
    let mut bin = 0;
    for k in 0..num_bins {
        if cumheights[k] <= x {
            bin = k;
        }
    }

    let input_cumwidths = cumwidths[bin];
    let input_bin_width = widths[bin];
    let input_cumheights = cumheights[bin];
    let input_heights = heights[bin];
    let delta = input_heights / widths[bin];
    let d_lo = derivatives[bin];
    let d_hi = derivatives[bin + 1];

    let intermediate = d_lo + d_hi - 2.0 * delta;
    let a = (x - input_cumheights) * intermediate + input_heights * (delta - d_lo);
    let b = input_heights * d_lo - (x - input_cumheights) * intermediate;
    let c = -delta * (x - input_cumheights);
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    let root = (2.0 * c) / (-b - discriminant.sqrt());

    (input_cumwidths + root * input_bin_width) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAIL: f64 = 5.0;
    const BINS: usize = 10;

    fn params(seed: u64) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        // Deterministic pseudo-random parameters; values in roughly [-1, 1].
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let mut next = || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0
        };
        let widths: Vec<f32> = (0..BINS).map(|_| next()).collect();
        let heights: Vec<f32> = (0..BINS).map(|_| next()).collect();
        let derivatives: Vec<f32> = (0..BINS - 1).map(|_| next()).collect();
        (widths, heights, derivatives)
    }

    #[test]
    fn test_tails_pass_through() {
        let (w, h, d) = params(7);
        for input in [-12.0f32, -5.5, 5.5, 100.0] {
            assert_eq!(spline_inverse(input, &w, &h, &d, TAIL), input);
        }
    }

    #[test]
    fn test_outputs_stay_inside_interval() {
        let (w, h, d) = params(42);
        for i in 0..100 {
            let input = -5.0 + 10.0 * (i as f32 / 99.0);
            let output = spline_inverse(input, &w, &h, &d, TAIL);
            assert!(
                (-TAIL as f32..=TAIL as f32).contains(&output),
                "output {output} escaped the interval for input {input}"
            );
        }
    }

    #[test]
    fn test_inverse_is_monotonic() {
        let (w, h, d) = params(3);
        let mut previous = f32::NEG_INFINITY;
        for i in 0..200 {
            let input = -4.999 + 9.998 * (i as f32 / 199.0);
            let output = spline_inverse(input, &w, &h, &d, TAIL);
            assert!(
                output >= previous,
                "non-monotonic at input {input}: {output} < {previous}"
            );
            previous = output;
        }
    }

    #[test]
    fn test_interval_endpoints_map_to_endpoints() {
        let (w, h, d) = params(11);
        let lo = spline_inverse(-TAIL as f32, &w, &h, &d, TAIL);
        let hi = spline_inverse(TAIL as f32, &w, &h, &d, TAIL);
        assert!((lo - (-TAIL as f32)).abs() < 1e-4, "lower endpoint moved: {lo}");
        assert!((hi - TAIL as f32).abs() < 1e-4, "upper endpoint moved: {hi}");
    }
}
