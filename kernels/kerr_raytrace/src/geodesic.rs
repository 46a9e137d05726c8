// Kerr null-geodesic equations of motion in Mino time

use crate::coordinates::{delta, sigma};

// ============================================================================
// STATE VECTOR
// ============================================================================

// State layout: [t, r, theta, phi, sigma]
//
// t      coordinate time
// r      Boyer-Lindquist radius
// theta  polar angle
// phi    azimuth (unwrapped, not reduced mod 2π)
// sigma  affine parameter accumulated along the ray
//
// The independent variable is Mino time τ, which runs from 0 backward to
// -taumax (rays are traced from the observer into the geometry).
pub type State = [f64; 5];

pub const STATE_DIM: usize = 5;

pub const IDX_T: usize = 0;
pub const IDX_R: usize = 1;
pub const IDX_THETA: usize = 2;
pub const IDX_PHI: usize = 3;
pub const IDX_SIGMA: usize = 4;

// ============================================================================
// EFFECTIVE POTENTIALS
// ============================================================================

// Radial potential R(r) = (r² + a² - aλ)² - Δ(η + (λ-a)²)
//
// Physics: (dr/dτ)² = R(r). A zero of R is a radial turning point. This is
// the raw, unclamped value: event detection needs the sign change, so only
// the vector field clamps negatives away.
#[inline]
pub fn radial_potential(r: f64, spin: f64, lambda: f64, eta: f64) -> f64 {
    let p = r * r + spin * spin - spin * lambda;
    let lm = lambda - spin;
    p * p - delta(r, spin) * (eta + lm * lm)
}

// Polar potential Θ(θ) = η + a²cos²θ - λ²cot²θ
//
// Physics: (dθ/dτ)² = Θ(θ). A zero of Θ is a polar turning point. Unclamped,
// same reasoning as radial_potential.
#[inline]
pub fn polar_potential(theta: f64, spin: f64, lambda: f64, eta: f64) -> f64 {
    let cos_th = theta.cos();
    let sin_th = theta.sin();
    let cot = cos_th / sin_th;
    eta + spin * spin * cos_th * cos_th - lambda * lambda * cot * cot
}

// ============================================================================
// GEODESIC VECTOR FIELD
// ============================================================================

// Right-hand side of the 5-dimensional geodesic ODE, with the current
// motion signs baked in.
//
// Physics: separating the Kerr geodesic equations in Mino time gives
//
//   dt/dτ = (r²+a²)(r²+a²-aλ)/Δ + a(λ - a sin²θ)
//   dr/dτ = s_r √R(r)
//   dθ/dτ = s_θ √Θ(θ)
//   dφ/dτ = a(r²+a²-aλ)/Δ + λ/sin²θ - a
//   dσ/dτ = Σ
//
// The square roots demand R ≥ 0 and Θ ≥ 0; the adaptive solver will probe
// slightly past a turning point where the exact values dip negative by a
// hair, so both are clamped to 0 here. Sign flips are NOT this type's job:
// s_r and s_θ stay fixed within one integration segment and the controller
// in `integration` rebuilds the field after each turning event.
#[derive(Debug, Clone, Copy)]
pub struct VectorField {
    pub spin: f64,
    pub lambda: f64,
    pub eta: f64,
    // Radial motion sign, ±1 (+1 means dr/dτ ≥ 0 along the segment)
    pub sr: f64,
    // Polar motion sign, ±1
    pub sth: f64,
}

impl VectorField {
    pub fn new(spin: f64, lambda: f64, eta: f64, sr: f64, sth: f64) -> Self {
        Self { spin, lambda, eta, sr, sth }
    }
}

impl crate::solver::OdeSystem for VectorField {
    // Evaluate dx/dτ at the given state. τ never appears on the right-hand
    // side (the system is autonomous) but the stepper passes it anyway.
    fn rhs(&self, _tau: f64, x: &State) -> State {
        let a = self.spin;
        let lambda = self.lambda;
        let r = x[IDX_R];
        let theta = x[IDX_THETA];

        let dlt = delta(r, a);
        let sin_th = theta.sin();
        let sin2 = sin_th * sin_th;
        let p = r * r + a * a - a * lambda;

        let rr = radial_potential(r, a, lambda, self.eta).max(0.0);
        let th = polar_potential(theta, a, lambda, self.eta).max(0.0);

        [
            (r * r + a * a) * p / dlt + a * (lambda - a * sin2),
            self.sr * rr.sqrt(),
            self.sth * th.sqrt(),
            a * p / dlt + lambda / sin2 - a,
            sigma(r, theta, a),
        ]
    }
}

impl VectorField {
    // Exact 5×5 Jacobian ∂(dx/dτ)/∂x.
    //
    // Only the r and θ columns are nonzero: nothing on the right-hand side
    // depends on t, φ, or σ. The √R and √Θ diagonal entries are singular at
    // a turning point; they are zeroed once the potential is nonpositive,
    // which matches the clamped field (identically zero past the root).
    pub fn jacobian(&self, x: &State) -> [[f64; STATE_DIM]; STATE_DIM] {
        let a = self.spin;
        let lambda = self.lambda;
        let eta = self.eta;
        let r = x[IDX_R];
        let theta = x[IDX_THETA];

        let a2 = a * a;
        let r2 = r * r;
        let dlt = delta(r, a);
        let dlt2 = dlt * dlt;
        let sin_th = theta.sin();
        let cos_th = theta.cos();
        let sin3 = sin_th * sin_th * sin_th;
        let p = r2 + a2 - a * lambda;
        let lm = lambda - a;

        let mut j = [[0.0; STATE_DIM]; STATE_DIM];

        // ∂(dt/dτ)/∂r and ∂(dt/dτ)/∂θ
        j[IDX_T][IDX_R] =
            2.0 * r * (2.0 * r2 + 2.0 * a2 - a * lambda) / dlt
                - (2.0 * r - 2.0) * (r2 + a2) * p / dlt2;
        j[IDX_T][IDX_THETA] = -2.0 * a2 * sin_th * cos_th;

        // ∂(dr/dτ)/∂r = s_r R'(r) / (2√R), finite only strictly between roots
        let rr = radial_potential(r, a, lambda, eta);
        if rr > 0.0 {
            let rprime = 4.0 * r * p - (2.0 * r - 2.0) * (eta + lm * lm);
            j[IDX_R][IDX_R] = self.sr * rprime / (2.0 * rr.sqrt());
        }

        // ∂(dθ/dτ)/∂θ = s_θ Θ'(θ) / (2√Θ)
        let th = polar_potential(theta, a, lambda, eta);
        if th > 0.0 {
            let thprime =
                -2.0 * a2 * sin_th * cos_th + 2.0 * lambda * lambda * cos_th / sin3;
            j[IDX_THETA][IDX_THETA] = self.sth * thprime / (2.0 * th.sqrt());
        }

        // ∂(dφ/dτ)/∂r = 2a(a² + aλ(r-1) - r²)/Δ² and ∂(dφ/dτ)/∂θ
        j[IDX_PHI][IDX_R] = 2.0 * a * (a2 + a * lambda * (r - 1.0) - r2) / dlt2;
        j[IDX_PHI][IDX_THETA] = -2.0 * lambda * cos_th / sin3;

        // ∂(dσ/dτ)/∂r and ∂(dσ/dτ)/∂θ
        j[IDX_SIGMA][IDX_R] = 2.0 * r;
        j[IDX_SIGMA][IDX_THETA] = -2.0 * a2 * sin_th * cos_th;

        j
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::OdeSystem;
    use std::f64::consts::PI;

    #[test]
    fn test_potentials_at_observer() {
        // At the observer, Θ(th_o) must equal β² by construction of (λ, η):
        // η + a²cos²(th_o) - λ²cot²(th_o)
        //   = (α²-a²)cos² + β² + a²cos² - α²sin²·cos²/sin² = β²
        let a = 0.94;
        let th_o = 20.0_f64.to_radians();
        for (alpha, beta) in [(0.0, -0.001), (6.0, -2.0), (-3.5, 4.2)] {
            let c = crate::conserved::ConservedQuantities::from_impact_parameters(
                alpha, beta, th_o, a,
            );
            let th = polar_potential(th_o, a, c.lambda, c.eta);
            assert!(
                (th - beta * beta).abs() < 1e-10,
                "Theta({}) = {}, want {}",
                th_o,
                th,
                beta * beta
            );
        }
    }

    #[test]
    fn test_radial_potential_large_r() {
        // R(r) ~ r⁴ at large radius: far from the hole every ray moves radially
        let rr = radial_potential(1000.0, 0.94, -2.0, 30.0);
        assert!(rr > 0.9e12);
    }

    #[test]
    fn test_rhs_clamps_negative_potentials() {
        // Vortical geodesic (η < 0) probed in the forbidden equatorial band:
        // raw Θ < 0 there, but the field must clamp and return dθ/dτ = 0
        let a = 0.94;
        let (lambda, eta) = (0.0, -0.7);
        let field = VectorField::new(a, lambda, eta, 1.0, 1.0);
        assert!(polar_potential(PI / 2.0, a, lambda, eta) < 0.0);
        let dx = field.rhs(0.0, &[0.0, 10.0, PI / 2.0, 0.0, 0.0]);
        assert_eq!(dx[IDX_THETA], 0.0);
        assert!(dx[IDX_T].is_finite());
        assert!(dx[IDX_R].is_finite());
    }

    #[test]
    fn test_rhs_sign_factors() {
        let a = 0.94;
        let (lambda, eta) = (-2.0, 30.0);
        let x = [0.0, 50.0, 0.6, 0.0, 0.0];
        let fwd = VectorField::new(a, lambda, eta, 1.0, 1.0).rhs(0.0, &x);
        let rev = VectorField::new(a, lambda, eta, -1.0, -1.0).rhs(0.0, &x);
        assert!((fwd[IDX_R] + rev[IDX_R]).abs() < 1e-12);
        assert!((fwd[IDX_THETA] + rev[IDX_THETA]).abs() < 1e-12);
        // Non-square-root components are unaffected by the signs
        assert_eq!(fwd[IDX_T], rev[IDX_T]);
        assert_eq!(fwd[IDX_PHI], rev[IDX_PHI]);
        assert_eq!(fwd[IDX_SIGMA], rev[IDX_SIGMA]);
    }

    #[test]
    fn test_sigma_rate() {
        let a = 0.94;
        let field = VectorField::new(a, 1.0, 5.0, 1.0, 1.0);
        let x = [0.0, 7.0, 0.8, 0.0, 0.0];
        let dx = field.rhs(0.0, &x);
        let expected = 49.0 + a * a * 0.8_f64.cos().powi(2);
        assert!((dx[IDX_SIGMA] - expected).abs() < 1e-12);
    }

    // Central finite differences against the analytic Jacobian. The state is
    // chosen well inside the allowed region so both potentials are positive
    // and every entry is smooth.
    #[test]
    fn test_jacobian_finite_differences() {
        let a = 0.94;
        let (lambda, eta) = (-2.0, 35.0);
        let field = VectorField::new(a, lambda, eta, 1.0, -1.0);
        let x: State = [12.3, 8.0, 0.7, 0.4, 3.0];
        assert!(radial_potential(x[IDX_R], a, lambda, eta) > 0.0);
        assert!(polar_potential(x[IDX_THETA], a, lambda, eta) > 0.0);

        let jac = field.jacobian(&x);
        let h = 1e-6;
        for col in 0..STATE_DIM {
            let mut xp = x;
            let mut xm = x;
            xp[col] += h;
            xm[col] -= h;
            let fp = field.rhs(0.0, &xp);
            let fm = field.rhs(0.0, &xm);
            for row in 0..STATE_DIM {
                let fd = (fp[row] - fm[row]) / (2.0 * h);
                let scale = 1.0 + fd.abs();
                assert!(
                    (jac[row][col] - fd).abs() / scale < 1e-5,
                    "J[{}][{}] = {}, finite difference = {}",
                    row,
                    col,
                    jac[row][col],
                    fd
                );
            }
        }
    }

    #[test]
    fn test_jacobian_structural_zero_columns() {
        // t, φ, σ never appear on the right-hand side
        let field = VectorField::new(0.7, 1.3, 12.0, 1.0, 1.0);
        let jac = field.jacobian(&[5.0, 6.0, 1.1, 2.0, 1.0]);
        for row in 0..STATE_DIM {
            assert_eq!(jac[row][IDX_T], 0.0);
            assert_eq!(jac[row][IDX_PHI], 0.0);
            assert_eq!(jac[row][IDX_SIGMA], 0.0);
        }
    }

    #[test]
    fn test_jacobian_finite_past_turning_point() {
        // Past a radial root the clamped field is flat, so the √-singular
        // diagonal entry must be reported as 0, not NaN/inf
        let a = 0.94;
        let (lambda, eta) = (-2.052, 35.0);
        // r chosen inside the classically forbidden region
        let mut r_forbidden = None;
        for i in 0..400 {
            let r = 1.9 + 0.01 * i as f64;
            if radial_potential(r, a, lambda, eta) < 0.0 {
                r_forbidden = Some(r);
                break;
            }
        }
        let r = r_forbidden.expect("no forbidden radius found");
        let field = VectorField::new(a, lambda, eta, 1.0, 1.0);
        let jac = field.jacobian(&[0.0, r, 0.7, 0.0, 0.0]);
        assert_eq!(jac[IDX_R][IDX_R], 0.0);
    }
}
