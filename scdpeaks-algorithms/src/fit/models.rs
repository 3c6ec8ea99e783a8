//! Peak-shape models.
//!
//! Every model is a peak term on a linear background `slope·x + constant`,
//! with `x` the channel index. Parameter layouts:
//!
//! | Model | Parameters |
//! |---|---|
//! | [`Gaussian`] | `a, σ, μ, slope, constant` |
//! | [`SingleExponential`] | `scale, μ, α, σ, slope, constant` |
//! | [`DoubleExponential`] | `scale, μ, α, β, σ, slope, constant` |
#![allow(clippy::cast_precision_loss)]

use super::quadrature::adaptive_simpson;
use scdpeaks_core::config::ProfileFunction;
use statrs::function::erf::erfc;
use std::f64::consts::{PI, SQRT_2};

/// Widths below this are treated as a delta function.
const MIN_WIDTH: f64 = 1e-12;

/// Smallest Gaussian σ the fitter may reach (channels).
///
/// Keeps a single-channel spike from driving σ towards zero, where the model
/// is flat in σ and μ and the solver has nothing left to descend.
pub const GAUSSIAN_SIGMA_FLOOR: f64 = 0.05;

/// Above this argument `erfcx` switches to its asymptotic series.
const ERFCX_ASYMPTOTIC: f64 = 25.0;

/// Per-channel absolute tolerance of the intensity integral.
const INTEGRATION_TOLERANCE: f64 = 1e-9;

/// A parametric peak shape on a linear background.
pub trait PeakShape: Send + Sync {
    /// Which model this is.
    fn function(&self) -> ProfileFunction;

    /// Parameter names in layout order.
    fn parameter_names(&self) -> &'static [&'static str];

    /// Number of parameters.
    fn num_params(&self) -> usize {
        self.parameter_names().len()
    }

    /// Peak term alone at channel `x`.
    fn peak(&self, x: f64, params: &[f64]) -> f64;

    /// Background term alone at channel `x`.
    fn background(&self, x: f64, params: &[f64]) -> f64;

    /// Full model at channel `x`.
    fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        self.peak(x, params) + self.background(x, params)
    }

    /// Lower bound of each parameter in layout order; unbounded by default.
    fn lower_bounds(&self) -> Vec<f64> {
        vec![f64::NEG_INFINITY; self.num_params()]
    }

    /// Starting parameters for `counts`, looking for the maximum within
    /// `search_half_width` channels of the designed center.
    fn initial_guess(&self, counts: &[f64], search_half_width: usize) -> Vec<f64>;

    /// Fitted peak position (channels).
    fn center(&self, params: &[f64]) -> f64;

    /// Fitted Gaussian width (channels).
    fn width(&self, params: &[f64]) -> f64;

    /// Integrated intensity of the peak term over a profile of `num_steps`.
    fn intensity(&self, params: &[f64], num_steps: usize) -> f64;

    /// Map sign-ambiguous parameters to their canonical form.
    fn normalize(&self, params: &mut [f64]);
}

/// Create the model for `function`.
#[must_use]
pub fn model_for(function: ProfileFunction) -> Box<dyn PeakShape> {
    match function {
        ProfileFunction::Gaussian => Box::new(Gaussian),
        ProfileFunction::SingleExponential => Box::new(SingleExponential),
        ProfileFunction::DoubleExponential => Box::new(DoubleExponential),
    }
}

/// Linear background and peak position estimated from raw counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartingPoint {
    /// Background slope.
    pub slope: f64,
    /// Background at channel 0.
    pub constant: f64,
    /// Channel of the observed maximum.
    pub peak_channel: usize,
    /// Counts at that channel.
    pub peak_height: f64,
}

impl StartingPoint {
    /// Estimate from `counts`.
    ///
    /// The background is the line through the mean of the outer tenth of
    /// channels at each end. The maximum is searched within
    /// `search_half_width` of the center channel; ties go to the channel
    /// nearest the center, then the lower one.
    #[must_use]
    pub fn estimate(counts: &[f64], search_half_width: usize) -> Self {
        let n = counts.len();
        if n == 0 {
            return Self {
                slope: 0.0,
                constant: 0.0,
                peak_channel: 0,
                peak_height: 0.0,
            };
        }
        let k = (n / 10).max(1);
        let left = counts[..k].iter().sum::<f64>() / k as f64;
        let right = counts[n - k..].iter().sum::<f64>() / k as f64;
        let x_left = (k - 1) as f64 / 2.0;
        let x_right = (n - 1) as f64 - x_left;
        let slope = if x_right > x_left {
            (right - left) / (x_right - x_left)
        } else {
            0.0
        };
        let constant = left - slope * x_left;

        let center = n / 2;
        let lo = center.saturating_sub(search_half_width);
        let hi = (center + search_half_width).min(n - 1);
        let mut peak_channel = lo.min(n - 1);
        for i in lo..=hi {
            let (y, best) = (counts[i], counts[peak_channel]);
            if y > best || (y == best && i.abs_diff(center) < peak_channel.abs_diff(center)) {
                peak_channel = i;
            }
        }
        Self {
            slope,
            constant,
            peak_channel,
            peak_height: counts[peak_channel],
        }
    }

    fn background_at_peak(&self) -> f64 {
        self.slope * self.peak_channel as f64 + self.constant
    }
}

/// Gaussian on a linear background.
///
/// The Gaussian of area `a` is integrated across each unit-wide channel, so
/// `a` stays the peak area even when σ shrinks below a channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl PeakShape for Gaussian {
    fn function(&self) -> ProfileFunction {
        ProfileFunction::Gaussian
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["a", "sigma", "mu", "slope", "constant"]
    }

    fn peak(&self, x: f64, params: &[f64]) -> f64 {
        let (a, sigma, mu) = (params[0], params[1].abs(), params[2]);
        if sigma < MIN_WIDTH {
            return if (x - mu).abs() < 0.5 { a } else { 0.0 };
        }
        a * normal_mass((x - 0.5 - mu) / sigma, (x + 0.5 - mu) / sigma)
    }

    fn background(&self, x: f64, params: &[f64]) -> f64 {
        params[3] * x + params[4]
    }

    fn lower_bounds(&self) -> Vec<f64> {
        let mut lower = vec![f64::NEG_INFINITY; 5];
        lower[1] = GAUSSIAN_SIGMA_FLOOR;
        lower
    }

    fn initial_guess(&self, counts: &[f64], search_half_width: usize) -> Vec<f64> {
        let start = StartingPoint::estimate(counts, search_half_width);
        let sigma = 2.5;
        let a = (start.peak_height - start.background_at_peak()) * sigma * (2.0 * PI).sqrt();
        vec![
            a,
            sigma,
            start.peak_channel as f64,
            start.slope,
            start.constant,
        ]
    }

    fn center(&self, params: &[f64]) -> f64 {
        params[2]
    }

    fn width(&self, params: &[f64]) -> f64 {
        params[1].abs()
    }

    fn intensity(&self, params: &[f64], _num_steps: usize) -> f64 {
        params[0]
    }

    fn normalize(&self, params: &mut [f64]) {
        params[1] = params[1].abs();
    }
}

/// One back-to-back exponential convolved with a Gaussian (GSAS TOF
/// profile function 1 with a single decay).
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleExponential;

impl PeakShape for SingleExponential {
    fn function(&self) -> ProfileFunction {
        ProfileFunction::SingleExponential
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["scale", "mu", "alpha", "sigma", "slope", "constant"]
    }

    fn peak(&self, x: f64, params: &[f64]) -> f64 {
        let (scale, mu, alpha, sigma) = (params[0], params[1], params[2], params[3]);
        scale * exp_erfc(alpha, x - mu, sigma)
    }

    fn background(&self, x: f64, params: &[f64]) -> f64 {
        params[4] * x + params[5]
    }

    fn initial_guess(&self, counts: &[f64], search_half_width: usize) -> Vec<f64> {
        let start = StartingPoint::estimate(counts, search_half_width);
        vec![
            start.peak_height,
            start.peak_channel as f64,
            1.0,
            1.0,
            start.slope,
            start.constant,
        ]
    }

    fn center(&self, params: &[f64]) -> f64 {
        params[1]
    }

    fn width(&self, params: &[f64]) -> f64 {
        params[3].abs()
    }

    fn intensity(&self, params: &[f64], num_steps: usize) -> f64 {
        integrate_peak(self, params, num_steps)
    }

    fn normalize(&self, params: &mut [f64]) {
        params[3] = params[3].abs();
    }
}

/// Two back-to-back exponentials convolved with a Gaussian (GSAS TOF
/// profile function 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleExponential;

impl PeakShape for DoubleExponential {
    fn function(&self) -> ProfileFunction {
        ProfileFunction::DoubleExponential
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["scale", "mu", "alpha", "beta", "sigma", "slope", "constant"]
    }

    fn peak(&self, x: f64, params: &[f64]) -> f64 {
        let (scale, mu, alpha, beta, sigma) =
            (params[0], params[1], params[2], params[3], params[4]);
        let delta = x - mu;
        scale * (exp_erfc(alpha, delta, sigma) + exp_erfc(beta, -delta, sigma))
    }

    fn background(&self, x: f64, params: &[f64]) -> f64 {
        params[5] * x + params[6]
    }

    fn initial_guess(&self, counts: &[f64], search_half_width: usize) -> Vec<f64> {
        let start = StartingPoint::estimate(counts, search_half_width);
        vec![
            start.peak_height,
            start.peak_channel as f64,
            1.0,
            1.0,
            1.0,
            start.slope,
            start.constant,
        ]
    }

    fn center(&self, params: &[f64]) -> f64 {
        params[1]
    }

    fn width(&self, params: &[f64]) -> f64 {
        params[4].abs()
    }

    fn intensity(&self, params: &[f64], num_steps: usize) -> f64 {
        integrate_peak(self, params, num_steps)
    }

    fn normalize(&self, params: &mut [f64]) {
        params[4] = params[4].abs();
    }
}

/// Standard normal probability mass between `lo` and `hi` (`lo ≤ hi`).
///
/// Uses the tail on the side away from the mean so that masses far out in
/// either tail keep their precision.
fn normal_mass(lo: f64, hi: f64) -> f64 {
    if lo >= 0.0 {
        0.5 * (erfc(lo / SQRT_2) - erfc(hi / SQRT_2))
    } else {
        0.5 * (erfc(-hi / SQRT_2) - erfc(-lo / SQRT_2))
    }
}

/// Scaled complementary error function `exp(y²)·erfc(y)` for `y ≥ 0`.
fn erfcx(y: f64) -> f64 {
    if y < ERFCX_ASYMPTOTIC {
        (y * y).exp() * erfc(y)
    } else {
        let inv2 = 1.0 / (y * y);
        (1.0 - 0.5 * inv2 + 0.75 * inv2 * inv2) / (y * PI.sqrt())
    }
}

/// `exp(u)·erfc(y)` with `u = r/2·(rσ² + 2d)` and `y = (rσ² + d)/(√2·σ)`.
///
/// For `y ≥ 0` this equals `exp(-d²/2σ²)·erfcx(y)`, which stays finite where
/// `exp(u)` alone would overflow.
fn exp_erfc(rate: f64, delta: f64, sigma: f64) -> f64 {
    let sigma = sigma.abs();
    if sigma < MIN_WIDTH {
        // Pure exponential decay on the low side.
        return match delta.partial_cmp(&0.0) {
            Some(std::cmp::Ordering::Less) => 2.0 * (rate * delta).exp(),
            Some(std::cmp::Ordering::Equal) => 1.0,
            _ => 0.0,
        };
    }
    let variance = sigma * sigma;
    let y = (rate * variance + delta) / (SQRT_2 * sigma);
    if y >= 0.0 {
        (-delta * delta / (2.0 * variance)).exp() * erfcx(y)
    } else {
        let u = 0.5 * rate * (rate * variance + 2.0 * delta);
        u.exp() * erfc(y)
    }
}

/// Integral of the peak term over `[0, num_steps - 1]`, channel by channel.
fn integrate_peak<M: PeakShape + ?Sized>(model: &M, params: &[f64], num_steps: usize) -> f64 {
    (1..num_steps)
        .map(|i| {
            let a = (i - 1) as f64;
            adaptive_simpson(|x| model.peak(x, params), a, a + 1.0, INTEGRATION_TOLERANCE)
        })
        .sum()
}
