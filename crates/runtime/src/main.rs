//! # compute_main
//!
//! Command-line front end for `gpu-compute`. Runs a WGSL kernel over a list
//! of integers, replays the built-in Collatz demo, or prints what the
//! adapter supports. The mock driver is used unless `--backend gpu` is given
//! to a binary built with the `gpu` feature.

#![deny(clippy::all, clippy::pedantic)]

mod watcher;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gpu_compute::backend::MockDriver;
use gpu_compute::{kernels, ComputeComponent, ComputeConfig, ComputeDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "compute_main", version, about = "Run WGSL compute kernels as blocking calls")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Driver to dispatch on
    #[arg(long, value_enum, global = true, default_value_t = Backend::Mock)]
    backend: Backend,

    /// Milliseconds between completion checks
    #[arg(long, global = true)]
    poll_ms: Option<u64>,

    /// Give up on a driver callback after this many milliseconds (0 waits forever)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Kernel entry point
    #[arg(long, global = true)]
    entry_point: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch a kernel once, or on every change with --watch
    Run {
        /// WGSL file, or the name of a bundled kernel (collatz, double, square)
        #[arg(long)]
        kernel: PathBuf,
        /// Comma-separated 32-bit integers
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        input: Vec<i32>,
        #[arg(long)]
        watch: bool,
    },
    /// Run the bundled Collatz kernel on [1, 2, 3, 4]
    Demo,
    /// Print adapter name, backend and limits
    Info,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Mock,
    Gpu,
}

impl Cli {
    fn config(&self) -> ComputeConfig {
        let mut config = ComputeConfig::from_env();
        if let Some(ms) = self.poll_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(entry) = &self.entry_point {
            config.entry_point.clone_from(entry);
        }
        config.install_log_sink = false;
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    gpu_compute::logging::install_log_sink_with(log_directive(cli.verbose));

    let config = cli.config();
    tracing::debug!(?config, backend = ?cli.backend, "configuration");
    match cli.backend {
        Backend::Mock => execute(Arc::new(MockDriver::new().with_bundled_emulations()), config, &cli.command),
        Backend::Gpu => gpu(config, &cli.command),
    }
}

#[cfg(feature = "gpu")]
fn gpu(config: ComputeConfig, command: &Command) -> Result<()> {
    execute(Arc::new(gpu_compute::backend::WgpuDriver::new()), config, command)
}

#[cfg(not(feature = "gpu"))]
fn gpu(_config: ComputeConfig, _command: &Command) -> Result<()> {
    bail!("compute_main was built without the `gpu` feature")
}

fn log_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn execute<D: ComputeDriver>(driver: Arc<D>, config: ComputeConfig, command: &Command) -> Result<()> {
    let mut compute = ComputeComponent::new(driver, config);
    match command {
        Command::Run { kernel, input, watch } => {
            let source = load_kernel(kernel)?;
            dispatch_once(&mut compute, &source, input, *watch)?;
            if *watch {
                rerun_on_change(&mut compute, kernel, input)?;
            }
        }
        Command::Demo => {
            compute.startup()?;
            if let Some(report) = compute.adapter_report() {
                println!("{report}");
            }
            let output = compute.try_dispatch(kernels::COLLATZ, &[1, 2, 3, 4])?;
            println!("collatz times: {output:?}");
            compute.shutdown();
        }
        Command::Info => {
            compute.startup()?;
            let report = compute.adapter_report().context("session started without an adapter report")?;
            println!("{report}");
        }
    }
    Ok(())
}

/// Prints the output. A failure only ends the process when nothing is watching the kernel.
fn dispatch_once<D: ComputeDriver>(
    compute: &mut ComputeComponent<D>,
    source: &str,
    input: &[i32],
    watching: bool,
) -> Result<()> {
    match compute.try_dispatch(source, input) {
        Ok(output) => println!("output: {output:?}"),
        Err(e) if watching => tracing::error!("dispatch failed, waiting for the kernel to change: {e}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn load_kernel(kernel: &Path) -> Result<String> {
    if kernel.is_file() {
        return std::fs::read_to_string(kernel).with_context(|| format!("failed to read {}", kernel.display()));
    }
    match kernel.to_str().and_then(kernels::by_name) {
        Some(source) => Ok(source.to_owned()),
        None => bail!("{} is neither a file nor a bundled kernel", kernel.display()),
    }
}

fn rerun_on_change<D: ComputeDriver>(compute: &mut ComputeComponent<D>, kernel: &Path, input: &[i32]) -> Result<()> {
    let (_watcher, changes) = watcher::start(kernel)?;
    for changed in changes {
        tracing::info!(path = %changed.display(), "kernel changed, dispatching again");
        let source = match load_kernel(kernel) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("{e:#}");
                continue;
            }
        };
        match compute.try_dispatch(&source, input) {
            Ok(output) => println!("output: {output:?}"),
            Err(e) => tracing::error!("dispatch failed: {e}"),
        }
    }
    Ok(())
}
