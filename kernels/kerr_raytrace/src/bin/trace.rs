// Kerr Ray Tracing CLI
//
// Traces a horizontal strip of image-plane pixels backward through the Kerr
// geometry and writes the full trajectories as JSON for downstream analysis.

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use kerr_raytrace::*;

/// CLI arguments for the ray tracer
#[derive(Parser, Debug)]
#[command(name = "trace")]
#[command(about = "Trace Kerr null geodesics backward in Mino time", long_about = None)]
struct Args {
    /// Black hole spin parameter a (0 <= a < 1)
    #[arg(short, long, default_value_t = 0.94)]
    spin: f64,

    /// Observer inclination in degrees (0 < i <= 90)
    #[arg(short, long, default_value_t = 20.0)]
    inclination: f64,

    /// Observer radius in units of M
    #[arg(short = 'r', long, default_value_t = 1000.0)]
    observer_radius: f64,

    /// Left edge of the alpha scan on the image plane
    #[arg(long, default_value_t = -6.0, allow_hyphen_values = true)]
    alpha_min: f64,

    /// Right edge of the alpha scan on the image plane
    #[arg(long, default_value_t = 6.0, allow_hyphen_values = true)]
    alpha_max: f64,

    /// Number of pixels along the alpha scan
    #[arg(short, long, default_value_t = 64)]
    npix: usize,

    /// Vertical impact parameter beta (shared by all pixels)
    #[arg(short, long, default_value_t = -0.001, allow_hyphen_values = true)]
    beta: f64,

    /// Mino-time integration horizon per ray
    #[arg(short, long)]
    taumax: f64,

    /// Target number of output samples per ray
    #[arg(long, default_value_t = 100)]
    ngeo: usize,

    /// Sign-flip cap before a ray is truncated
    #[arg(long, default_value_t = 10)]
    max_switches: usize,

    /// Output JSON path
    #[arg(short, long, default_value = "trajectories.json")]
    output: PathBuf,
}

/// Everything a consumer needs to interpret the trajectories
#[derive(Serialize)]
struct TraceOutput<'a> {
    spin: f64,
    inclination_deg: f64,
    observer_radius: f64,
    ngeo: usize,
    taumax: f64,
    rays: &'a [Trajectory],
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let spacetime =
        Spacetime::from_inclination_degrees(args.spin, args.inclination, args.observer_radius)?;

    let config = RayConfig {
        ngeo: args.ngeo,
        max_switches: args.max_switches,
        ..RayConfig::default()
    };

    if args.npix == 0 {
        return Err("npix must be at least 1".into());
    }
    let alphas: Vec<f64> = if args.npix == 1 {
        vec![args.alpha_min]
    } else {
        (0..args.npix)
            .map(|i| {
                args.alpha_min
                    + (args.alpha_max - args.alpha_min) * i as f64 / (args.npix - 1) as f64
            })
            .collect()
    };

    println!("\nKerr Null-Geodesic Ray Tracer");
    println!("=======================================");
    println!("  Spin: {}", args.spin);
    println!("  Inclination: {:.1} degrees", args.inclination);
    println!("  Observer radius: {} M", args.observer_radius);
    println!("  Horizon r+: {:.6} M", spacetime.r_plus());
    println!("  Pixels: {} (alpha in [{}, {}], beta = {})",
        args.npix, args.alpha_min, args.alpha_max, args.beta);
    println!("  taumax: {}  ngeo: {}", args.taumax, args.ngeo);
    println!("=======================================\n");

    let pb = ProgressBar::new(args.npix as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rays ({percent}%)")?
            .progress_chars("=>-"),
    );

    println!("Tracing geodesics...");
    let rays = raytrace_batch_with_progress(
        &spacetime,
        &ImpactAxis::Values(alphas),
        &ImpactAxis::Scalar(args.beta),
        &ImpactAxis::Scalar(args.taumax),
        &config,
        |done| pb.set_position(done),
    )?;
    pb.finish_with_message("integration complete");

    let completed = rays
        .iter()
        .filter(|t| t.termination == Termination::ReachedTarget)
        .count();
    let truncated = rays
        .iter()
        .filter(|t| t.termination == Termination::SwitchLimitExceeded)
        .count();
    let stalled = rays
        .iter()
        .filter(|t| t.termination == Termination::SolverStalled)
        .count();
    let total_switches: usize = rays.iter().map(|t| t.switches).sum();

    let out = TraceOutput {
        spin: args.spin,
        inclination_deg: args.inclination,
        observer_radius: args.observer_radius,
        ngeo: args.ngeo,
        taumax: args.taumax,
        rays: &rays,
    };
    fs::write(&args.output, serde_json::to_string(&out)?)?;

    println!("\nStatistics:");
    println!("  Rays traced: {}", rays.len());
    println!("  Reached target: {}", completed);
    println!("  Switch-limit truncated: {}", truncated);
    println!("  Solver stalled: {}", stalled);
    println!("  Total turning points: {}", total_switches);
    println!("\nOutput: {}\n", args.output.display());

    Ok(())
}
