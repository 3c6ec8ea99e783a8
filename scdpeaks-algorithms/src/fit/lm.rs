//! Levenberg–Marquardt least squares.
//!
//! Minimizes `½·Σ (wᵢ·(yᵢ - f(xᵢ; p)))²` with a forward-difference Jacobian
//! and damped normal equations solved by Cholesky factorization. Parameters
//! may carry lower bounds; trial points are projected onto them.

use crate::error::{FitError, Result};
use nalgebra::{DMatrix, DVector};

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
/// Beyond this damping no downhill step exists at machine precision.
const MAX_DAMPING: f64 = 1e16;
const JACOBIAN_STEP: f64 = 1e-7;
/// Cost below this fraction of `½·Σ (wᵢ·yᵢ)²` is an exact fit.
const NEGLIGIBLE_COST: f64 = 1e-16;

/// Solver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevenbergMarquardt {
    /// Iteration limit (one Jacobian per iteration).
    pub max_iterations: usize,
    /// Relative cost reduction that counts as converged.
    pub ftol: f64,
    /// Relative step size that counts as converged.
    pub xtol: f64,
    /// Largest scaled gradient component that counts as converged.
    pub gtol: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-8,
        }
    }
}

/// Converged parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Fitted parameters.
    pub params: Vec<f64>,
    /// Iterations used.
    pub iterations: usize,
    /// Final `½·Σ r²`.
    pub cost: f64,
}

impl LevenbergMarquardt {
    /// Create a solver with the given iteration limit.
    #[must_use]
    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }

    /// Fit `model(x, params)` to `(xs, ys)` with per-point `weights`.
    ///
    /// # Errors
    /// Returns [`FitError::NonFiniteStart`] if the residuals at `start` are
    /// not finite, [`FitError::TooFewPoints`] for an underdetermined problem,
    /// and [`FitError::NotConverged`] when the iteration limit is reached.
    pub fn minimize<F>(
        &self,
        model: F,
        xs: &[f64],
        ys: &[f64],
        weights: &[f64],
        start: &[f64],
    ) -> Result<Solution>
    where
        F: Fn(f64, &[f64]) -> f64,
    {
        let lower = vec![f64::NEG_INFINITY; start.len()];
        self.minimize_bounded(model, xs, ys, weights, start, &lower)
    }

    /// Like [`minimize`](Self::minimize), keeping `params[j] >= lower[j]`.
    ///
    /// Missing entries of `lower` are unbounded. The start is clamped onto
    /// the bounds before the first residual evaluation.
    ///
    /// Converges when any of these hold: the relative cost reduction of an
    /// accepted step is below `ftol`, the projected step is below `xtol`
    /// relative to the parameters, every free component of the scaled
    /// gradient is below `gtol`, or the cost is negligible next to the data.
    ///
    /// # Errors
    /// Same as [`minimize`](Self::minimize).
    pub fn minimize_bounded<F>(
        &self,
        model: F,
        xs: &[f64],
        ys: &[f64],
        weights: &[f64],
        start: &[f64],
        lower: &[f64],
    ) -> Result<Solution>
    where
        F: Fn(f64, &[f64]) -> f64,
    {
        let n = xs.len().min(ys.len()).min(weights.len());
        let m = start.len();
        if n < m {
            return Err(FitError::TooFewPoints {
                points: n,
                params: m,
            });
        }

        let bound = |j: usize| lower.get(j).copied().unwrap_or(f64::NEG_INFINITY);
        let residuals = |params: &[f64]| -> Option<DVector<f64>> {
            let r = DVector::from_iterator(
                n,
                (0..n).map(|i| weights[i] * (ys[i] - model(xs[i], params))),
            );
            r.iter().all(|v| v.is_finite()).then_some(r)
        };

        let mut params: Vec<f64> = start
            .iter()
            .enumerate()
            .map(|(j, p)| p.max(bound(j)))
            .collect();
        let mut r = residuals(&params).ok_or(FitError::NonFiniteStart)?;
        let mut cost = 0.5 * r.norm_squared();
        let mut damping = INITIAL_DAMPING;
        let exact_fit = NEGLIGIBLE_COST
            * 0.5
            * (0..n).map(|i| (weights[i] * ys[i]).powi(2)).sum::<f64>();

        for iteration in 0..self.max_iterations {
            let jacobian = jacobian(&model, xs, weights, &params, n);
            let jtj = jacobian.tr_mul(&jacobian);
            // Descent direction: the cost gradient is -Jᵀr.
            let gradient = jacobian.tr_mul(&r);

            if cost <= exact_fit
                || self.gradient_converged(&jacobian, &gradient, &r, &params, lower)
            {
                return Ok(Solution {
                    params,
                    iterations: iteration,
                    cost,
                });
            }

            loop {
                let mut damped = jtj.clone();
                for j in 0..m {
                    damped[(j, j)] += damping * jtj[(j, j)].max(MIN_DAMPING);
                }
                let Some(delta) = damped.cholesky().map(|c| c.solve(&gradient)) else {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        return Ok(Solution {
                            params,
                            iterations: iteration,
                            cost,
                        });
                    }
                    continue;
                };
                let trial: Vec<f64> = params
                    .iter()
                    .zip(delta.iter())
                    .enumerate()
                    .map(|(j, (p, d))| (p + d).max(bound(j)))
                    .collect();
                let step_norm = trial
                    .iter()
                    .zip(&params)
                    .map(|(t, p)| (t - p) * (t - p))
                    .sum::<f64>()
                    .sqrt();
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                let stalled = step_norm <= self.xtol * (param_norm + self.xtol);

                match residuals(&trial) {
                    Some(r_new) if 0.5 * r_new.norm_squared() < cost => {
                        let new_cost = 0.5 * r_new.norm_squared();
                        let converged = stalled || cost - new_cost <= self.ftol * cost;
                        params = trial;
                        r = r_new;
                        cost = new_cost;
                        damping = (damping / 10.0).max(MIN_DAMPING);
                        if converged {
                            return Ok(Solution {
                                params,
                                iterations: iteration + 1,
                                cost,
                            });
                        }
                        break;
                    }
                    _ => {
                        damping *= 10.0;
                        if stalled || damping > MAX_DAMPING {
                            return Ok(Solution {
                                params,
                                iterations: iteration,
                                cost,
                            });
                        }
                    }
                }
            }
        }
        Err(FitError::NotConverged {
            iterations: self.max_iterations,
        })
    }

    /// Scaled-gradient test over the components not pinned at a bound.
    ///
    /// Component `j` is `|Jⱼᵀr| / (‖Jⱼ‖·‖r‖)`; a component sitting on its
    /// lower bound whose descent direction points further down is skipped.
    fn gradient_converged(
        &self,
        jacobian: &DMatrix<f64>,
        gradient: &DVector<f64>,
        r: &DVector<f64>,
        params: &[f64],
        lower: &[f64],
    ) -> bool {
        let r_norm = r.norm();
        if r_norm == 0.0 {
            return true;
        }
        gradient.iter().enumerate().all(|(j, &g)| {
            let pinned = lower.get(j).is_some_and(|&lo| params[j] <= lo) && g < 0.0;
            let column = jacobian.column(j).norm();
            pinned || column == 0.0 || g.abs() / (column * r_norm) <= self.gtol
        })
    }
}

/// Forward-difference Jacobian of the weighted model.
fn jacobian<F>(
    model: &F,
    xs: &[f64],
    weights: &[f64],
    params: &[f64],
    n: usize,
) -> DMatrix<f64>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let m = params.len();
    let base: Vec<f64> = (0..n).map(|i| model(xs[i], params)).collect();
    let mut jacobian = DMatrix::zeros(n, m);
    let mut shifted = params.to_vec();
    for j in 0..m {
        let h = JACOBIAN_STEP * params[j].abs().max(1e-3);
        shifted[j] = params[j] + h;
        for i in 0..n {
            jacobian[(i, j)] = weights[i] * (model(xs[i], &shifted) - base[i]) / h;
        }
        shifted[j] = params[j];
    }
    jacobian
}
