// Conserved quantities of a Kerr null geodesic from image-plane coordinates

use serde::Serialize;

// ============================================================================
// CONSERVED-QUANTITY MAPPER
// ============================================================================

// The two constants of motion of a photon, normalized by energy.
//
// Physics: a Kerr null geodesic is fixed (up to parametrization) by the
// energy-rescaled angular momentum λ = L_z/E and Carter constant η = Q/E².
// For a distant observer at inclination th_o, a pixel (α, β) on the image
// plane maps to
//
//   λ = -α sin(th_o)
//   η = (α² - a²) cos²(th_o) + β²
//
// α runs along the projected equator (positive = co-rotating side), β along
// the projected spin axis. The map is pure arithmetic: the same inputs give
// bitwise-identical outputs.
//
// Invariant: η = 0 exactly is degenerate (the polar potential factorizes and
// the turning-point logic breaks down); callers must reject it before
// integrating. η < 0 is fine: those are vortical geodesics confined away
// from the equator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConservedQuantities {
    pub lambda: f64,
    pub eta: f64,
}

impl ConservedQuantities {
    #[inline]
    pub fn from_impact_parameters(alpha: f64, beta: f64, th_o: f64, spin: f64) -> Self {
        let cos_o = th_o.cos();
        Self {
            lambda: -alpha * th_o.sin(),
            eta: (alpha * alpha - spin * spin) * cos_o * cos_o + beta * beta,
        }
    }
}
