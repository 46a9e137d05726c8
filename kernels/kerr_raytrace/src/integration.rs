// Segmented backward integration with turning-point sign flips

use log::{debug, warn};
use serde::Serialize;

use crate::conserved::ConservedQuantities;
use crate::events::{brent_root, sign_change, EventDetectors};
use crate::geodesic::{State, VectorField};
use crate::solver::{hermite_interp, OdeSystem, Rkf78, Tolerances};
use crate::{KerrError, Spacetime};

use std::f64::consts::FRAC_PI_2;

// ============================================================================
// CONFIGURATION
// ============================================================================

// Tunables of the per-ray integration loop. The defaults reproduce the
// long-standing behavior of the production pipeline; tests override
// individual fields.
#[derive(Debug, Clone, Copy)]
pub struct RayConfig {
    // Target number of output samples; max_step = taumax / ngeo
    pub ngeo: usize,
    // Soft cap on total sign flips before the ray is truncated
    pub max_switches: usize,
    // Fractional retreat behind a located turning point before restarting
    pub retreat_epsilon: f64,
    pub rtol: f64,
    pub atol: f64,
    // Below this spin the equatorial polar-event override may engage
    pub min_spin: f64,
    // Below this eta the equatorial polar-event override may engage
    pub eta_tol: f64,
    // |beta| below this (off-equator) is nudged to avoid a degenerate start
    pub beta_min: f64,
}

impl Default for RayConfig {
    fn default() -> Self {
        Self {
            ngeo: 100,
            max_switches: 10,
            retreat_epsilon: 1e-8,
            rtol: 1e-8,
            atol: 1e-8,
            min_spin: 1e-6,
            eta_tol: 1e-12,
            beta_min: 1e-6,
        }
    }
}

// Why a ray stopped where it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    // Integrated all the way to -taumax
    ReachedTarget,
    // Sign flips exceeded max_switches; trajectory is a valid prefix
    SwitchLimitExceeded,
    // Step size collapsed or the state went non-finite; valid prefix
    SolverStalled,
}

// One integrated ray: Mino-time samples plus the full 5-state at each.
//
// tau is decreasing (0 at the observer) apart from the epsilon-sized
// backward nudge at each turning-point restart.
#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    pub tau: Vec<f64>,
    pub states: Vec<State>,
    pub conserved: ConservedQuantities,
    pub switches: usize,
    pub radial_switches: usize,
    pub polar_switches: usize,
    pub termination: Termination,
}

// ============================================================================
// SEGMENT LOOP
// ============================================================================

enum SegmentEnd {
    Completed,
    Event {
        radial: bool,
        polar: bool,
        // Restart point an epsilon behind the located root
        tau_retreat: f64,
        x_retreat: State,
    },
    Stalled,
}

const BRENT_TOL: f64 = 1e-12;
const BRENT_MAX_ITER: usize = 100;
// Per-segment attempt budget, scaled by the requested sample count. Healthy
// rays use on the order of ngeo accepted steps plus a handful of rejections;
// the budget bounds the cost of a pathological ray without touching them.
const MAX_STEPS_PER_SAMPLE: u64 = 1000;

// Integrate one fixed-sign segment from (tau0, x0) toward tau_end, appending
// samples to the shared buffers. The start sample is pushed unconditionally;
// on a turning event the final sample is the Brent-refined root state rather
// than the overshooting solver step.
#[allow(clippy::too_many_arguments)]
fn run_segment(
    solver: &mut Rkf78,
    field: &VectorField,
    detectors: &EventDetectors,
    tau0: f64,
    x0: State,
    tau_end: f64,
    retreat_epsilon: f64,
    max_steps: u64,
    taus: &mut Vec<f64>,
    states: &mut Vec<State>,
) -> SegmentEnd {
    taus.push(tau0);
    states.push(x0);

    let dir = (tau_end - tau0).signum();
    let mut tau = tau0;
    let mut x = x0;
    let mut h = tau_end - tau0;

    let mut g_r = detectors.radial(&x);
    let mut g_th = detectors.polar(&x);

    for _ in 0..max_steps {
        if (tau_end - tau) * dir <= 0.0 {
            return SegmentEnd::Completed;
        }
        if (tau + h - tau_end) * dir > 0.0 {
            h = tau_end - tau;
        }

        let res = solver.step(field, tau, &x, h);

        if !res.accepted {
            // Non-finite stages come back as a rejection with a finite
            // shrunken h_next; only an h_next pinned at the floor (or one
            // the controller somehow lost to NaN) means the ray is stuck
            if !res.h_next.is_finite() || res.h_next <= solver.h_min {
                return SegmentEnd::Stalled;
            }
            h = res.h_next * dir;
            continue;
        }

        if !res.x.iter().all(|v| v.is_finite()) {
            return SegmentEnd::Stalled;
        }

        let g_r_new = detectors.radial(&res.x);
        let g_th_new = detectors.polar(&res.x);
        let radial_fired = sign_change(g_r, g_r_new);
        let polar_fired = sign_change(g_th, g_th_new);

        if radial_fired || polar_fired {
            // Hermite dense output over the step, then Brent per fired event
            let f_a = field.rhs(tau, &x);
            let f_b = field.rhs(res.tau, &res.x);
            let interp =
                |t: f64| hermite_interp(tau, &x, &f_a, res.tau, &res.x, &f_b, t);

            let root_r = if radial_fired {
                brent_root(
                    |t| detectors.radial(&interp(t)),
                    tau,
                    res.tau,
                    BRENT_TOL,
                    BRENT_MAX_ITER,
                )
            } else {
                None
            };
            let root_th = if polar_fired {
                brent_root(
                    |t| detectors.polar(&interp(t)),
                    tau,
                    res.tau,
                    BRENT_TOL,
                    BRENT_MAX_ITER,
                )
            } else {
                None
            };

            // Stop at the FIRST root along the direction of travel. Both
            // events only count as fired if their root sits at (or within
            // bracketing slack of) the stop time.
            let roots: Vec<f64> = root_r.iter().chain(root_th.iter()).copied().collect();
            if !roots.is_empty() {
                let stop = if dir < 0.0 {
                    roots.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                } else {
                    roots.iter().cloned().fold(f64::INFINITY, f64::min)
                };
                let slack = 1e-9 * (res.tau - tau).abs();
                let radial_at_stop =
                    root_r.map(|t| (t - stop).abs() <= slack).unwrap_or(false);
                let polar_at_stop =
                    root_th.map(|t| (t - stop).abs() <= slack).unwrap_or(false);

                let x_stop = interp(stop);
                taus.push(stop);
                states.push(x_stop);

                // Restart a hair before the root, inside the allowed region,
                // so the flipped segment does not immediately re-trigger
                let tau_retreat = stop - retreat_epsilon * (stop - tau);
                let x_retreat = interp(tau_retreat);

                return SegmentEnd::Event {
                    radial: radial_at_stop,
                    polar: polar_at_stop,
                    tau_retreat,
                    x_retreat,
                };
            }
            // Brent failed to bracket despite the sign change; treat the
            // step as event-free and keep going
        }

        taus.push(res.tau);
        states.push(res.x);
        tau = res.tau;
        x = res.x;
        g_r = g_r_new;
        g_th = g_th_new;
        h = res.h_next * dir;
    }

    SegmentEnd::Stalled
}

// ============================================================================
// PER-RAY DRIVER
// ============================================================================

// Resolve a pixel into its conserved quantities and initial polar sign,
// applying the degenerate-beta nudge. Shared by the per-ray driver and the
// batch pre-scan so both reject exactly the same pixels.
pub(crate) fn pixel_setup(
    spacetime: &Spacetime,
    alpha: f64,
    beta: f64,
    config: &RayConfig,
) -> Result<(ConservedQuantities, f64), KerrError> {
    let th_o = spacetime.th_o;

    // Initial polar sign follows the pixel's vertical offset; beta = 0 from
    // off-equator gets the positive branch
    let sth = if beta < 0.0 { -1.0 } else { 1.0 };

    // Off the equator, a ray aimed exactly along beta ≈ 0 starts at a
    // degenerate polar turning point; nudge it onto the chosen branch
    let beta_eff = if beta.abs() < config.beta_min && th_o != FRAC_PI_2 {
        sth * config.beta_min
    } else {
        beta
    };

    let conserved =
        ConservedQuantities::from_impact_parameters(alpha, beta_eff, th_o, spacetime.spin);
    if conserved.eta == 0.0 {
        return Err(KerrError::DegenerateCarterConstant { alpha, beta });
    }
    Ok((conserved, sth))
}

// Trace one null geodesic backward in Mino time from the observer.
//
// The ray is identified by its image-plane pixel (alpha, beta); taumax is
// the externally supplied integration horizon (total Mino time to the
// horizon or back out to r_o, computed upstream). Integration runs from
// τ = 0 to τ = -taumax in fixed-sign segments, flipping the radial/polar
// motion signs at each detected turning point.
//
// Fatal input errors come back as Err before any stepping; everything that
// goes wrong mid-flight (switch runaway, step-size collapse) soft-truncates
// and is reported on the trajectory's termination field instead.
pub fn trace_ray(
    spacetime: &Spacetime,
    alpha: f64,
    beta: f64,
    taumax: f64,
    config: &RayConfig,
) -> Result<Trajectory, KerrError> {
    if !taumax.is_finite() || taumax <= 0.0 {
        return Err(KerrError::NonPositiveMinoTarget(taumax));
    }
    if config.ngeo == 0 {
        return Err(KerrError::ZeroSampleCount);
    }

    let a = spacetime.spin;
    let th_o = spacetime.th_o;

    let (conserved, sth) = pixel_setup(spacetime, alpha, beta, config)?;

    // All rays start ingoing from the distant observer
    let mut sr = 1.0;
    let mut sth = sth;

    let detectors = EventDetectors::new(
        a,
        conserved.lambda,
        conserved.eta,
        config.min_spin,
        config.eta_tol,
    );

    let max_step = taumax / config.ngeo as f64;
    let mut solver = Rkf78::new(Tolerances::new(config.atol, config.rtol));
    // The floor is a stall detector, not a real resolution limit
    solver.set_step_limits(max_step * 1e-10, max_step);

    let tau_end = -taumax;
    let mut tau = 0.0;
    let mut x: State = [0.0, spacetime.r_o, th_o, 0.0, 0.0];

    let mut taus: Vec<f64> = Vec::with_capacity(config.ngeo + 1);
    let mut states: Vec<State> = Vec::with_capacity(config.ngeo + 1);

    let mut radial_switches = 0usize;
    let mut polar_switches = 0usize;

    let max_steps = MAX_STEPS_PER_SAMPLE * config.ngeo as u64;

    let termination = loop {
        let field = VectorField::new(a, conserved.lambda, conserved.eta, sr, sth);
        let end = run_segment(
            &mut solver,
            &field,
            &detectors,
            tau,
            x,
            tau_end,
            config.retreat_epsilon,
            max_steps,
            &mut taus,
            &mut states,
        );

        match end {
            SegmentEnd::Completed => break Termination::ReachedTarget,
            SegmentEnd::Stalled => {
                warn!(
                    "solver stalled at tau = {} (pixel alpha = {}, beta = {}); \
                     returning partial trajectory",
                    tau, alpha, beta
                );
                break Termination::SolverStalled;
            }
            SegmentEnd::Event { radial, polar, tau_retreat, x_retreat } => {
                if radial {
                    sr = -sr;
                    radial_switches += 1;
                    debug!("radial turning point at tau = {}, new sr = {}", tau_retreat, sr);
                }
                if polar {
                    sth = -sth;
                    polar_switches += 1;
                    debug!("polar turning point at tau = {}, new sth = {}", tau_retreat, sth);
                }

                if radial_switches + polar_switches > config.max_switches {
                    warn!(
                        "switch limit {} exceeded (pixel alpha = {}, beta = {}); \
                         truncating ray",
                        config.max_switches, alpha, beta
                    );
                    break Termination::SwitchLimitExceeded;
                }

                tau = tau_retreat;
                x = x_retreat;
            }
        }
    };

    Ok(Trajectory {
        tau: taus,
        states,
        conserved,
        switches: radial_switches + polar_switches,
        radial_switches,
        polar_switches,
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesic::{
        polar_potential, radial_potential, IDX_R, IDX_SIGMA, IDX_T, IDX_THETA,
    };
    use std::f64::consts::PI;

    fn observer() -> Spacetime {
        Spacetime::from_inclination_degrees(0.94, 20.0, 1000.0).unwrap()
    }

    // Vortical plunging ray: no radial turning, exactly one polar turning
    // inside the integration window
    #[test]
    fn test_plunging_ray_end_to_end() {
        let st = observer();
        let traj =
            trace_ray(&st, 0.0, -0.001, 0.55, &RayConfig::default()).unwrap();

        assert_eq!(traj.termination, Termination::ReachedTarget);
        assert!(traj.tau.len() >= 50, "too few samples: {}", traj.tau.len());
        assert_eq!(traj.tau.len(), traj.states.len());

        for (tau, x) in traj.tau.iter().zip(traj.states.iter()) {
            assert!(tau.is_finite());
            assert!(x.iter().all(|v| v.is_finite()), "non-finite state at tau = {}", tau);
        }

        // Reached the full horizon of the integration
        let tau_f = *traj.tau.last().unwrap();
        assert!((tau_f + 0.55).abs() < 1e-9, "final tau = {}", tau_f);

        // lambda = 0 on-axis pixel: no radial turning, single polar switch
        assert_eq!(traj.radial_switches, 0);
        assert_eq!(traj.polar_switches, 1);
        assert!(traj.switches <= 10);

        // r decreases monotonically apart from the epsilon retreat jitter
        for w in traj.states.windows(2) {
            assert!(
                w[1][IDX_R] <= w[0][IDX_R] + 1e-4,
                "r increased: {} -> {}",
                w[0][IDX_R],
                w[1][IDX_R]
            );
        }

        // Ends well inside, still outside the horizon
        let r_f = traj.states.last().unwrap()[IDX_R];
        assert!(r_f > st.r_plus(), "final r = {} inside horizon", r_f);
        assert!(r_f < 10.0, "final r = {} did not plunge", r_f);

        // t and sigma accumulate monotonically backward (both decrease as
        // tau decreases, modulo retreat jitter)
        let t_f = traj.states.last().unwrap()[IDX_T];
        let sig_f = traj.states.last().unwrap()[IDX_SIGMA];
        assert!(t_f < 0.0);
        assert!(sig_f < 0.0);
    }

    // Off-axis pixel (lambda != 0) from r_o = 1000: dr/dτ ≈ -r² makes the
    // first trial step overflow the stage cascade to a non-finite error
    // estimate. The controller must recover through hard rejections and
    // finish the ray instead of stalling at the observer with one sample.
    #[test]
    fn test_off_axis_pixel_recovers_from_overflowing_first_step() {
        let st = observer();
        let traj =
            trace_ray(&st, -1.0, -0.001, 0.55, &RayConfig::default()).unwrap();

        assert_eq!(traj.termination, Termination::ReachedTarget);
        assert!(traj.tau.len() >= 50, "too few samples: {}", traj.tau.len());
        let tau_f = *traj.tau.last().unwrap();
        assert!((tau_f + 0.55).abs() < 1e-9, "final tau = {}", tau_f);
        for x in &traj.states {
            assert!(x.iter().all(|v| v.is_finite()));
        }
        // Small impact parameter: the ray plunges with no radial turning
        assert_eq!(traj.radial_switches, 0);
        let r_f = traj.states.last().unwrap()[IDX_R];
        assert!(r_f > st.r_plus() && r_f < 10.0, "final r = {}", r_f);
    }

    // Raw potentials must be consistent with every sample the integrator
    // claims to have visited: at most a clamp-sized excursion below zero
    #[test]
    fn test_round_trip_potential_consistency() {
        let st = observer();
        let traj =
            trace_ray(&st, 0.0, -0.001, 0.55, &RayConfig::default()).unwrap();
        let (lambda, eta) = (traj.conserved.lambda, traj.conserved.eta);
        for x in &traj.states {
            let rr = radial_potential(x[IDX_R], st.spin, lambda, eta);
            let th = polar_potential(x[IDX_THETA], st.spin, lambda, eta);
            assert!(rr > -1e-6, "R = {} at r = {}", rr, x[IDX_R]);
            assert!(th > -1e-6, "Theta = {} at theta = {}", th, x[IDX_THETA]);
        }
    }

    #[test]
    fn test_switch_limit_truncates() {
        let st = observer();
        let full = trace_ray(&st, 0.0, -0.001, 0.55, &RayConfig::default()).unwrap();

        let cfg = RayConfig { max_switches: 0, ..RayConfig::default() };
        let cut = trace_ray(&st, 0.0, -0.001, 0.55, &cfg).unwrap();

        assert_eq!(cut.termination, Termination::SwitchLimitExceeded);
        // Truncated strictly before the full run's end, but still a valid prefix
        assert!(cut.tau.len() < full.tau.len());
        assert!(*cut.tau.last().unwrap() > *full.tau.last().unwrap());
        assert!(cut.states.iter().all(|x| x.iter().all(|v| v.is_finite())));
    }

    // Ray with a genuine radial turning point: comes in, turns, goes back out
    #[test]
    fn test_radial_turning_point() {
        let st = observer();
        let traj = trace_ray(&st, 6.0, -2.0, 0.75, &RayConfig::default()).unwrap();

        assert_eq!(traj.termination, Termination::ReachedTarget);
        assert!(traj.radial_switches >= 1);

        let r_min = traj
            .states
            .iter()
            .map(|x| x[IDX_R])
            .fold(f64::INFINITY, f64::min);
        assert!(
            r_min > 4.0 && r_min < 5.0,
            "pericenter r = {} outside expected range",
            r_min
        );
        // After the turn the ray climbs back out
        let r_f = traj.states.last().unwrap()[IDX_R];
        assert!(r_f > r_min + 0.3, "final r = {} vs pericenter {}", r_f, r_min);
    }

    // Zero spin, equatorial observer, essentially-zero eta: the polar
    // override must suppress every polar event
    #[test]
    fn test_equatorial_zero_spin_no_polar_trigger() {
        let st = Spacetime::new(0.0, PI / 2.0, 1000.0).unwrap();
        let traj = trace_ray(&st, 5.3, 1e-7, 1.0, &RayConfig::default()).unwrap();

        assert_eq!(traj.polar_switches, 0);
        assert_eq!(traj.termination, Termination::ReachedTarget);
        // b = 5.3 > 3*sqrt(3): the ray escapes after one radial turn
        assert_eq!(traj.radial_switches, 1);
        // theta stays pinned to the equator
        for x in &traj.states {
            assert!(
                (x[IDX_THETA] - PI / 2.0).abs() < 1e-3,
                "theta = {} drifted off the equator",
                x[IDX_THETA]
            );
        }
    }

    #[test]
    fn test_degenerate_eta_rejected() {
        let st = Spacetime::new(0.5, PI / 2.0, 1000.0).unwrap();
        // alpha = a with beta = 0: (alpha^2 - a^2) vanishes identically and
        // eta comes out exactly 0
        let err = trace_ray(&st, 0.5, 0.0, 0.5, &RayConfig::default()).unwrap_err();
        assert!(matches!(err, KerrError::DegenerateCarterConstant { .. }));
    }

    #[test]
    fn test_invalid_ray_inputs() {
        let st = observer();
        assert!(matches!(
            trace_ray(&st, 0.0, -0.001, 0.0, &RayConfig::default()),
            Err(KerrError::NonPositiveMinoTarget(_))
        ));
        assert!(matches!(
            trace_ray(&st, 0.0, -0.001, -1.0, &RayConfig::default()),
            Err(KerrError::NonPositiveMinoTarget(_))
        ));
        assert!(matches!(
            trace_ray(&st, 0.0, -0.001, f64::INFINITY, &RayConfig::default()),
            Err(KerrError::NonPositiveMinoTarget(_))
        ));
        let cfg = RayConfig { ngeo: 0, ..RayConfig::default() };
        assert!(matches!(
            trace_ray(&st, 0.0, -0.001, 0.5, &cfg),
            Err(KerrError::ZeroSampleCount)
        ));
    }

    // beta = 0 off the equator is nudged onto the positive polar branch;
    // the result must be identical to asking for beta = +beta_min directly
    #[test]
    fn test_beta_nudge_matches_explicit_branch() {
        let st = observer();
        let cfg = RayConfig::default();
        let nudged = trace_ray(&st, 0.0, 0.0, 0.55, &cfg).unwrap();
        let explicit = trace_ray(&st, 0.0, cfg.beta_min, 0.55, &cfg).unwrap();

        assert_eq!(nudged.conserved.lambda, explicit.conserved.lambda);
        assert_eq!(nudged.conserved.eta, explicit.conserved.eta);
        assert_eq!(nudged.tau.len(), explicit.tau.len());
        assert_eq!(
            nudged.states.last().unwrap(),
            explicit.states.last().unwrap()
        );
    }
}
