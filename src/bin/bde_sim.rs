//! Binary delay equation simulator CLI
//!
//! Runs one of the built-in example models and prints the resulting switch
//! points to stdout.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use solve_bde::{BdeSolver, SolveBdeOptions, State, Transition};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bde-sim")]
#[command(about = "Discrete-event simulator for binary delay equations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// JSON file with solver options (rel_tol, abs_tol)
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    /// Relative tolerance for time comparisons (overrides --options)
    #[arg(long, global = true)]
    rel_tol: Option<f64>,

    /// Absolute tolerance for time comparisons (overrides --options)
    #[arg(long, global = true)]
    abs_tol: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One line per interval
    Table,
    /// Step-plot series as JSON
    PlotJson,
    /// Raw switch points as JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Single inverter fed back through one delay
    Oscillator {
        #[arg(long, default_value = "1.0")]
        delay: f64,

        #[arg(long, default_value = "10.0")]
        end: f64,
    },

    /// Ring of inverters, each negating its predecessor after one delay
    Ring {
        /// Number of variables in the ring
        #[arg(long, default_value = "3")]
        size: usize,

        #[arg(long, default_value = "1.0")]
        delay: f64,

        #[arg(long, default_value = "10.0")]
        end: f64,
    },

    /// A variable following a square-wave forced input after a delay
    Forced {
        #[arg(long, default_value = "0.5")]
        delay: f64,

        /// Half period of the forced square wave
        #[arg(long, default_value = "2.0")]
        period: f64,

        #[arg(long, default_value = "10.0")]
        end: f64,
    },
}

fn load_options(common: &CommonArgs) -> Result<SolveBdeOptions> {
    let mut options = match &common.options {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading options file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing options file {}", path.display()))?
        }
        None => SolveBdeOptions::default(),
    };
    if let Some(rel_tol) = common.rel_tol {
        options.rel_tol = rel_tol;
    }
    if let Some(abs_tol) = common.abs_tol {
        options.abs_tol = abs_tol;
    }
    Ok(options)
}

fn oscillator(delay: f64, options: SolveBdeOptions) -> Result<(BdeSolver, f64)> {
    let func = Transition::unforced(|z: &[State]| vec![!z[0][0]]);
    let solver =
        BdeSolver::new(func, vec![delay], vec![0.0], vec![vec![false]], None, None, options)?;
    Ok((solver, delay))
}

fn ring(size: usize, delay: f64, options: SolveBdeOptions) -> Result<(BdeSolver, f64)> {
    anyhow::ensure!(size > 0, "ring size must be at least 1");

    let func = Transition::unforced(move |z: &[State]| {
        (0..size).map(|v| !z[0][(v + size - 1) % size]).collect()
    });
    // Start with only the first variable set so the ring is not symmetric.
    let initial: State = (0..size).map(|v| v == 0).collect();
    let solver = BdeSolver::new(func, vec![delay], vec![0.0], vec![initial], None, None, options)?;
    Ok((solver, delay))
}

fn forced(delay: f64, period: f64, end: f64, options: SolveBdeOptions) -> Result<(BdeSolver, f64)> {
    anyhow::ensure!(period > 0.0, "period must be positive");

    let mut forced_x = Vec::new();
    let mut forced_y = Vec::new();
    let mut t = 0.0;
    let mut on = false;
    while t <= end {
        forced_x.push(t);
        forced_y.push(vec![on]);
        t += period;
        on = !on;
    }

    let func = Transition::forced(|_z: &[State], z2: &[State]| vec![z2[0][0]]);
    let solver = BdeSolver::new(
        func,
        vec![delay],
        vec![0.0],
        vec![vec![false]],
        Some(forced_x),
        Some(forced_y),
        options,
    )?;
    Ok((solver, delay))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let options = load_options(&cli.common)?;

    // Every model has a single history point at 0, so the start must be
    // strictly after it.
    let delay = match &cli.command {
        Commands::Oscillator { delay, .. }
        | Commands::Ring { delay, .. }
        | Commands::Forced { delay, .. } => *delay,
    };
    anyhow::ensure!(delay > 0.0, "delay must be positive, got {}", delay);

    let ((mut solver, start), end) = match cli.command {
        Commands::Oscillator { delay, end } => (oscillator(delay, options)?, end),
        Commands::Ring { size, delay, end } => (ring(size, delay, options)?, end),
        Commands::Forced { delay, period, end } => (forced(delay, period, end, options)?, end),
    };

    info!(start, end, "Solving");
    let solution = solver.solve(start, end)?;
    info!(switch_points = solution.len(), "Solved");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.common.format {
        OutputFormat::Table => solver.print_result(&mut out)?,
        OutputFormat::PlotJson => {
            if let Some((result, forced)) = solver.result_plots() {
                let json = serde_json::json!({ "result": result, "forced": forced });
                serde_json::to_writer_pretty(&mut out, &json)?;
                writeln!(out)?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &solution)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
