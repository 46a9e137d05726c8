// Adaptive Runge-Kutta-Fehlberg 7(8) stepper for the 5-state geodesic ODE

use crate::coefficients::{A, B, B_ERR, C, STAGES};
use crate::geodesic::{State, STATE_DIM};

// ============================================================================
// ODE SYSTEM TRAIT
// ============================================================================

// A 5-dimensional first-order system dx/dτ = f(τ, x).
//
// The geodesic field is autonomous, but the stepper passes τ through anyway
// so the stage times stay visible to any system that wants them.
pub trait OdeSystem {
    fn rhs(&self, tau: f64, x: &State) -> State;
}

// ============================================================================
// STEP CONTROL
// ============================================================================

// Uniform absolute/relative error tolerances.
//
// The error norm scales each component by atol + rtol·max(|x|, |x_new|),
// so coordinate time (order 10³ near a distant observer) and the polar
// angle (order 1) are weighted comparably.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub atol: f64,
    pub rtol: f64,
}

impl Tolerances {
    pub fn new(atol: f64, rtol: f64) -> Self {
        Self { atol, rtol }
    }
}

// Elementary I-controller: h_new = safety · h · err^(-1/8).
//
// The exponent is 1/(p+1) with p = 7, the order of the embedded estimate.
#[derive(Debug, Clone, Copy)]
pub struct StepController {
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for StepController {
    fn default() -> Self {
        Self { safety: 0.9, min_factor: 0.2, max_factor: 5.0 }
    }
}

impl StepController {
    pub fn factor(&self, error: f64) -> f64 {
        if error == 0.0 {
            return self.max_factor;
        }
        // An overflowed stage cascade yields a NaN/inf estimate; clamp on a
        // NaN would pass the NaN through, so back off hard instead
        if !error.is_finite() {
            return self.min_factor;
        }
        (self.safety * error.powf(-1.0 / 8.0)).clamp(self.min_factor, self.max_factor)
    }
}

// Step counters, exposed for diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub rhs_evals: u64,
    pub accepted: u64,
    pub rejected: u64,
}

// Outcome of one attempted step
#[derive(Debug, Clone, Copy)]
pub struct StepResult {
    // 8th-order solution at tau (only meaningful when accepted)
    pub x: State,
    pub tau: f64,
    // Normalized error; accepted iff ≤ 1
    pub error: f64,
    // Suggested magnitude for the next attempt (unsigned)
    pub h_next: f64,
    pub accepted: bool,
}

// ============================================================================
// RKF78 STEPPER
// ============================================================================

// 13-stage Fehlberg 7(8) embedded pair.
//
// Each call to `step` attempts a single step of signed size h: negative h
// integrates backward, which is the normal direction here (Mino time runs
// from 0 down to -taumax). The caller owns the accept/reject loop so that
// event detection can inspect every accepted step.
pub struct Rkf78 {
    tol: Tolerances,
    controller: StepController,
    pub h_min: f64,
    pub h_max: f64,
    k: [[f64; STATE_DIM]; STAGES],
    pub stats: Stats,
}

impl Rkf78 {
    pub fn new(tol: Tolerances) -> Self {
        Self {
            tol,
            controller: StepController::default(),
            h_min: 1e-14,
            h_max: f64::INFINITY,
            k: [[0.0; STATE_DIM]; STAGES],
            stats: Stats::default(),
        }
    }

    // Clamp bounds applied to the step MAGNITUDE; the sign is the caller's
    pub fn set_step_limits(&mut self, h_min: f64, h_max: f64) {
        self.h_min = h_min;
        self.h_max = h_max;
    }

    // Attempt one step of signed size h from (tau, x)
    pub fn step<S: OdeSystem>(&mut self, sys: &S, tau: f64, x: &State, h: f64) -> StepResult {
        let h = h.signum() * h.abs().clamp(self.h_min, self.h_max);

        self.compute_stages(sys, tau, x, h);
        let x8 = self.propagate(x, h);
        let mut error = self.error_norm(x, &x8, h);

        // A step whose stages blew up must come back as a hard rejection
        // with a finite, shrunken h_next, never as a NaN the caller loops on
        if !error.is_finite() || !x8.iter().all(|v| v.is_finite()) {
            error = f64::INFINITY;
        }

        let accepted = error <= 1.0;
        let h_next = (h.abs() * self.controller.factor(error)).clamp(self.h_min, self.h_max);

        self.stats.rhs_evals += STAGES as u64;
        if accepted {
            self.stats.accepted += 1;
        } else {
            self.stats.rejected += 1;
        }

        StepResult { x: x8, tau: tau + h, error, h_next, accepted }
    }

    fn compute_stages<S: OdeSystem>(&mut self, sys: &S, tau: f64, x: &State, h: f64) {
        self.k[0] = sys.rhs(tau, x);
        for i in 1..STAGES {
            let mut xi = [0.0; STATE_DIM];
            for n in 0..STATE_DIM {
                let mut acc = 0.0;
                for j in 0..i {
                    acc += A[i - 1][j] * self.k[j][n];
                }
                xi[n] = x[n] + h * acc;
            }
            self.k[i] = sys.rhs(tau + C[i] * h, &xi);
        }
    }

    fn propagate(&self, x: &State, h: f64) -> State {
        let mut x8 = *x;
        for n in 0..STATE_DIM {
            let mut acc = 0.0;
            for i in 0..STAGES {
                acc += B[i] * self.k[i][n];
            }
            x8[n] += h * acc;
        }
        x8
    }

    // RMS of the componentwise scaled error
    fn error_norm(&self, x: &State, x8: &State, h: f64) -> f64 {
        let mut sum = 0.0;
        for n in 0..STATE_DIM {
            let mut e = 0.0;
            for i in 0..STAGES {
                e += B_ERR[i] * self.k[i][n];
            }
            e *= h;
            let scale = self.tol.atol + self.tol.rtol * x[n].abs().max(x8[n].abs());
            let scaled = e / scale;
            sum += scaled * scaled;
        }
        (sum / STATE_DIM as f64).sqrt()
    }
}

// ============================================================================
// DENSE OUTPUT
// ============================================================================

// Cubic Hermite interpolation across one accepted step.
//
// Uses the state and derivative at both endpoints, giving O(h⁴) accuracy in
// the interpolated state; the event layer refines turning-point times on
// this interpolant rather than re-stepping the solver.
pub fn hermite_interp(
    tau_a: f64,
    x_a: &State,
    f_a: &State,
    tau_b: f64,
    x_b: &State,
    f_b: &State,
    tau: f64,
) -> State {
    let dt = tau_b - tau_a;
    let s = (tau - tau_a) / dt;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 1.0 - 3.0 * s2 + 2.0 * s3;
    let h10 = s - 2.0 * s2 + s3;
    let h01 = 3.0 * s2 - 2.0 * s3;
    let h11 = s3 - s2;

    let mut x = [0.0; STATE_DIM];
    for n in 0..STATE_DIM {
        x[n] = h00 * x_a[n] + h10 * dt * f_a[n] + h01 * x_b[n] + h11 * dt * f_b[n];
    }
    x
}
