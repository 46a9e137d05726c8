// Boyer-Lindquist coordinate helper functions (geometric units, M = 1)

// ============================================================================
// METRIC FUNCTIONS
// ============================================================================

// Δ = r² - 2r + a²
//
// Physics: the horizon function. Δ = 0 at the horizon radii r± and Δ > 0
// everywhere outside; dt/dτ and dφ/dτ carry 1/Δ factors and blow up as a
// ray approaches r+, which is how a plunging geodesic announces itself.
#[inline]
pub fn delta(r: f64, spin: f64) -> f64 {
    r * r - 2.0 * r + spin * spin
}

// Σ = r² + a²cos²θ
//
// Physics: dσ/dτ = Σ relates Mino time τ to the affine parameter σ.
// Σ > 0 everywhere outside the ring singularity (r = 0, θ = π/2).
#[inline]
pub fn sigma(r: f64, theta: f64, spin: f64) -> f64 {
    let cos_theta = theta.cos();
    r * r + spin * spin * cos_theta * cos_theta
}
