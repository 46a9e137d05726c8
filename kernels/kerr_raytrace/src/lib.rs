// kernels/kerr_raytrace/src/lib.rs

// Kerr Null-Geodesic Numerical Ray Tracing Core
//
// This library integrates null geodesics ("light rays") in Kerr spacetime
// backward in Mino time from a distant observer, one image-plane pixel at a
// time. All computations use f64; the turning-point geometry is sensitive
// enough that nothing less will do.

use std::f64::consts::PI;

pub mod batch;
pub mod coefficients;
pub mod conserved;
pub mod coordinates;
pub mod events;
pub mod geodesic;
pub mod integration;
pub mod solver;

pub use batch::{raytrace_batch, raytrace_batch_with_progress, ImpactAxis};
pub use conserved::ConservedQuantities;
pub use geodesic::{State, VectorField, STATE_DIM};
pub use integration::{trace_ray, RayConfig, Termination, Trajectory};

// ============================================================================
// SPACETIME / OBSERVER CONFIGURATION
// ============================================================================

// A sub-extremal Kerr black hole plus a distant stationary observer.
//
// Physics: We work in geometric units with M = 1, so the spin parameter
// a = J/M is dimensionless and must satisfy 0 <= a < 1. The observer sits
// at Boyer-Lindquist radius r_o ("near infinity", typically hundreds to
// thousands of M) and polar inclination th_o measured from the spin axis.
//
// Invariant: the horizon radii r± = 1 ± sqrt(1 - a²) bound the reachable
// domain. Coordinate time and azimuth diverge as r -> r+, so callers stop
// integration strictly outside the horizon (see integration::trace_ray).
#[derive(Debug, Clone, Copy)]
pub struct Spacetime {
    // Spin parameter a ∈ [0, 1)
    pub spin: f64,

    // Observer inclination in radians, th_o ∈ (0, π/2]
    pub th_o: f64,

    // Observer radius in units of M (large, outside the horizon)
    pub r_o: f64,
}

impl Spacetime {
    // Create a validated spacetime/observer configuration.
    //
    // All range violations are fatal input errors: nothing downstream is
    // defined for extremal spin, polar/equator-exterior inclinations, or an
    // observer inside the horizon.
    pub fn new(spin: f64, th_o: f64, r_o: f64) -> Result<Self, KerrError> {
        if !spin.is_finite() || !(0.0..1.0).contains(&spin) {
            return Err(KerrError::SpinOutOfRange(spin));
        }
        if !th_o.is_finite() || th_o <= 0.0 || th_o > PI / 2.0 {
            return Err(KerrError::InclinationOutOfRange(th_o));
        }
        let r_plus = 1.0 + (1.0 - spin * spin).sqrt();
        if !r_o.is_finite() || r_o <= r_plus {
            return Err(KerrError::ObserverInsideHorizon { r_o, r_plus });
        }
        Ok(Self { spin, th_o, r_o })
    }

    // Convenience constructor taking the inclination in degrees
    // (the CLI surface speaks degrees, the math speaks radians)
    pub fn from_inclination_degrees(spin: f64, inclination_deg: f64, r_o: f64) -> Result<Self, KerrError> {
        Self::new(spin, inclination_deg * PI / 180.0, r_o)
    }

    // Outer horizon radius r₊ = 1 + √(1 - a²)
    #[inline]
    pub fn r_plus(&self) -> f64 {
        1.0 + (1.0 - self.spin * self.spin).sqrt()
    }

    // Inner (Cauchy) horizon radius r₋ = 1 - √(1 - a²)
    #[inline]
    pub fn r_minus(&self) -> f64 {
        1.0 - (1.0 - self.spin * self.spin).sqrt()
    }
}

// ============================================================================
// ERROR TYPE
// ============================================================================

// Fatal input-validation errors.
//
// These are all rejected before any integration starts; mid-integration
// numerical trouble is either clamped locally (negative potentials) or
// surfaced as a soft truncation on the trajectory itself, never as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum KerrError {
    // Spin outside [0, 1)
    SpinOutOfRange(f64),
    // Observer inclination outside (0, π/2]
    InclinationOutOfRange(f64),
    // Observer radius at or inside the outer horizon
    ObserverInsideHorizon { r_o: f64, r_plus: f64 },
    // Target Mino time must be positive and finite
    NonPositiveMinoTarget(f64),
    // Per-ray sample count must be nonzero
    ZeroSampleCount,
    // Pixel arrays resolved to different lengths
    MismatchedLengths { alpha: usize, beta: usize, taumax: usize },
    // eta == 0 exactly: the geodesic constants degenerate and the polar
    // formulas break down. Measure-zero case, rejected rather than patched.
    DegenerateCarterConstant { alpha: f64, beta: f64 },
}

impl std::fmt::Display for KerrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KerrError::SpinOutOfRange(a) => {
                write!(f, "spin a = {} outside the sub-extremal range [0, 1)", a)
            }
            KerrError::InclinationOutOfRange(th) => {
                write!(f, "inclination th_o = {} rad outside (0, pi/2]", th)
            }
            KerrError::ObserverInsideHorizon { r_o, r_plus } => {
                write!(f, "observer radius r_o = {} not outside the horizon r+ = {}", r_o, r_plus)
            }
            KerrError::NonPositiveMinoTarget(tau) => {
                write!(f, "target Mino time {} must be positive and finite", tau)
            }
            KerrError::ZeroSampleCount => {
                write!(f, "per-ray sample count ngeo must be at least 1")
            }
            KerrError::MismatchedLengths { alpha, beta, taumax } => {
                write!(
                    f,
                    "pixel arrays have different lengths: alpha = {}, beta = {}, taumax = {}",
                    alpha, beta, taumax
                )
            }
            KerrError::DegenerateCarterConstant { alpha, beta } => {
                write!(
                    f,
                    "eta is exactly 0 for pixel (alpha = {}, beta = {}); degenerate geodesic constants",
                    alpha, beta
                )
            }
        }
    }
}

impl std::error::Error for KerrError {}
