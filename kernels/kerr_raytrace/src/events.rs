// Turning-point event detection: sign-change tests and Brent root refinement

use crate::geodesic::{polar_potential, radial_potential, State, IDX_R, IDX_THETA};

// ============================================================================
// EVENT FUNCTIONS
// ============================================================================

// The two terminal event functions watched during every segment.
//
// Physics: a turning point is a simple zero of the corresponding potential.
// Both events use the RAW potentials: the clamped values of the vector field
// never go negative and would never produce a sign change.
#[derive(Debug, Clone, Copy)]
pub struct EventDetectors {
    pub spin: f64,
    pub lambda: f64,
    pub eta: f64,
    // Below this spin the equatorial override may engage
    pub min_spin: f64,
    // Below this η the equatorial override may engage
    pub eta_tol: f64,
}

impl EventDetectors {
    pub fn new(spin: f64, lambda: f64, eta: f64, min_spin: f64, eta_tol: f64) -> Self {
        Self { spin, lambda, eta, min_spin, eta_tol }
    }

    // Radial event value R(r)
    #[inline]
    pub fn radial(&self, x: &State) -> f64 {
        radial_potential(x[IDX_R], self.spin, self.lambda, self.eta)
    }

    // Polar event value Θ(θ), with the equatorial override.
    //
    // Physics: for a ≈ 0 and η ≈ 0 the motion is pinned to the equator and
    // Θ sits at a degenerate zero; floating-point jitter around it would
    // fire spurious polar events every step. Forcing the value to 1.0
    // removes the event entirely for that regime.
    #[inline]
    pub fn polar(&self, x: &State) -> f64 {
        if self.spin < self.min_spin && self.eta < self.eta_tol {
            return 1.0;
        }
        polar_potential(x[IDX_THETA], self.spin, self.lambda, self.eta)
    }
}

// True when the event value crossed (or landed on) zero across a step.
//
// A zero at the START of the step does not count: the controller retreats
// past each root after handling it, and re-counting the same root would
// deadlock the switch loop.
#[inline]
pub fn sign_change(g_old: f64, g_new: f64) -> bool {
    if g_old == 0.0 {
        return false;
    }
    if g_new == 0.0 {
        return true;
    }
    g_old * g_new < 0.0
}

// ============================================================================
// BRENT ROOT FINDING
// ============================================================================

// Brent's method on a bracketing interval [a, b] with f(a)·f(b) ≤ 0.
//
// Combines bisection, secant, and inverse quadratic interpolation; always
// converges for a valid bracket and is superlinear near a simple root.
// Returns the root abscissa.
pub fn brent_root<F>(f: F, a: f64, b: f64, tol: f64, max_iter: usize) -> Option<f64>
where
    F: Fn(f64) -> f64,
{
    let mut a = a;
    let mut b = b;
    let mut fa = f(a);
    let mut fb = f(b);

    if fa == 0.0 {
        return Some(a);
    }
    if fb == 0.0 {
        return Some(b);
    }
    if fa * fb > 0.0 {
        return None;
    }

    // b holds the best estimate, a the previous one, c the counterpoint
    let mut c = a;
    let mut fc = fa;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..max_iter {
        if fb.abs() > fc.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);

        if xm.abs() <= tol1 || fb == 0.0 {
            return Some(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Attempt inverse quadratic interpolation (secant if a == c)
            let s = fb / fa;
            let (mut p, mut q);
            if a == c {
                p = 2.0 * xm * s;
                q = 1.0 - s;
            } else {
                let q0 = fa / fc;
                let r = fb / fc;
                p = s * (2.0 * xm * q0 * (q0 - r) - (b - a) * (r - 1.0));
                q = (q0 - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            if 2.0 * p < (3.0 * xm * q - (tol1 * q).abs()).min((e * q).abs()) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        if d.abs() > tol1 {
            b += d;
        } else {
            b += if xm > 0.0 { tol1 } else { -tol1 };
        }
        fb = f(b);

        if (fb > 0.0) == (fc > 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
    }

    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conserved::ConservedQuantities;
    use std::f64::consts::PI;

    #[test]
    fn test_sign_change_semantics() {
        assert!(sign_change(1.0, -1.0));
        assert!(sign_change(-1.0, 1.0));
        assert!(sign_change(1.0, 0.0));
        assert!(!sign_change(0.0, -1.0)); // root at step start: already handled
        assert!(!sign_change(1.0, 2.0));
        assert!(!sign_change(-1.0, -0.5));
    }

    #[test]
    fn test_equatorial_override() {
        // a < min_spin and η < eta_tol: polar event suppressed even though
        // the raw potential sits at (degenerate) zero
        let c = ConservedQuantities::from_impact_parameters(5.3, 1e-7, PI / 2.0, 0.0);
        assert!(c.eta < 1e-12);
        let det = EventDetectors::new(0.0, c.lambda, c.eta, 1e-6, 1e-12);
        let x = [0.0, 10.0, PI / 2.0, 0.0, 0.0];
        assert_eq!(det.polar(&x), 1.0);

        // With real spin the override must NOT engage
        let det = EventDetectors::new(0.94, c.lambda, c.eta, 1e-6, 1e-12);
        assert_ne!(det.polar(&x), 1.0);
    }

    #[test]
    fn test_radial_event_matches_potential() {
        let det = EventDetectors::new(0.94, -2.0, 35.0, 1e-6, 1e-12);
        let x = [0.0, 6.0, 0.7, 0.0, 0.0];
        assert_eq!(det.radial(&x), radial_potential(6.0, 0.94, -2.0, 35.0));
    }

    #[test]
    fn test_brent_simple_roots() {
        // cos has a root at π/2
        let root = brent_root(|x| x.cos(), 1.0, 2.0, 1e-12, 100).unwrap();
        assert!((root - PI / 2.0).abs() < 1e-10);

        // Cubic with root at 1
        let root = brent_root(|x| x * x * x - 1.0, 0.0, 3.0, 1e-12, 100).unwrap();
        assert!((root - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_brent_rejects_non_bracket() {
        assert!(brent_root(|x| x * x + 1.0, -1.0, 1.0, 1e-12, 100).is_none());
    }

    #[test]
    fn test_brent_endpoint_root() {
        let root = brent_root(|x| x - 2.0, 2.0, 5.0, 1e-12, 100).unwrap();
        assert_eq!(root, 2.0);
    }
}
