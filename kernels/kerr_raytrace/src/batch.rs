// Batch ray driver: input resolution, pre-flight validation, parallel fan-out

use log::info;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::integration::{pixel_setup, trace_ray, RayConfig, Trajectory};
use crate::{KerrError, Spacetime};

// ============================================================================
// INPUT RESOLUTION
// ============================================================================

// A per-pixel input that may be shared across the batch (one value for all
// rays) or given per ray. Sequence lengths are checked once, up front.
#[derive(Debug, Clone)]
pub enum ImpactAxis {
    Scalar(f64),
    Values(Vec<f64>),
}

impl ImpactAxis {
    fn explicit_len(&self) -> Option<usize> {
        match self {
            ImpactAxis::Scalar(_) => None,
            ImpactAxis::Values(v) => Some(v.len()),
        }
    }

    fn get(&self, i: usize) -> f64 {
        match self {
            ImpactAxis::Scalar(v) => *v,
            ImpactAxis::Values(v) => v[i],
        }
    }
}

// Batch size plus a lengths check: every sequence input must agree, scalars
// broadcast to whatever that common length is.
fn resolve_len(
    alpha: &ImpactAxis,
    beta: &ImpactAxis,
    taumax: &ImpactAxis,
) -> Result<usize, KerrError> {
    let n = alpha
        .explicit_len()
        .or(beta.explicit_len())
        .or(taumax.explicit_len())
        .unwrap_or(1);
    let la = alpha.explicit_len().unwrap_or(n);
    let lb = beta.explicit_len().unwrap_or(n);
    let lt = taumax.explicit_len().unwrap_or(n);
    if la != n || lb != n || lt != n {
        return Err(KerrError::MismatchedLengths { alpha: la, beta: lb, taumax: lt });
    }
    Ok(n)
}

// ============================================================================
// BATCH DRIVERS
// ============================================================================

// Trace a whole image-plane batch of rays.
//
// Every input is validated before ANY ray integrates: mismatched sequence
// lengths, a non-positive taumax, or an eta == 0 pixel abort the batch with
// nothing computed. Past validation, rays are independent and run on the
// rayon pool; results come back in pixel order. A ray that truncates
// mid-flight still yields its partial trajectory, it never aborts the rest.
pub fn raytrace_batch(
    spacetime: &Spacetime,
    alpha: &ImpactAxis,
    beta: &ImpactAxis,
    taumax: &ImpactAxis,
    config: &RayConfig,
) -> Result<Vec<Trajectory>, KerrError> {
    raytrace_batch_with_progress(spacetime, alpha, beta, taumax, config, |_| {})
}

// Same as `raytrace_batch`, invoking `progress` with the number of rays
// completed so far after each one finishes (in completion order).
pub fn raytrace_batch_with_progress<F>(
    spacetime: &Spacetime,
    alpha: &ImpactAxis,
    beta: &ImpactAxis,
    taumax: &ImpactAxis,
    config: &RayConfig,
    progress: F,
) -> Result<Vec<Trajectory>, KerrError>
where
    F: Fn(u64) + Sync,
{
    let n = resolve_len(alpha, beta, taumax)?;
    if config.ngeo == 0 {
        return Err(KerrError::ZeroSampleCount);
    }

    // Pre-flight scan: fail the whole batch before spending any solver time
    for i in 0..n {
        let tm = taumax.get(i);
        if !tm.is_finite() || tm <= 0.0 {
            return Err(KerrError::NonPositiveMinoTarget(tm));
        }
        pixel_setup(spacetime, alpha.get(i), beta.get(i), config)?;
    }

    info!("tracing {} rays (spin = {}, th_o = {})", n, spacetime.spin, spacetime.th_o);

    let done = AtomicU64::new(0);
    (0..n)
        .into_par_iter()
        .map(|i| {
            let traj = trace_ray(
                spacetime,
                alpha.get(i),
                beta.get(i),
                taumax.get(i),
                config,
            )?;
            progress(done.fetch_add(1, Ordering::Relaxed) + 1);
            Ok(traj)
        })
        .collect()
}
