//! Telemetrify shim binary.
//!
//! Starts the pipeline process and then reads control actions (`start`,
//! `stop`, `restart`, `teardown`) from stdin, one per line. End of input or
//! Ctrl-C tears the process down.

use std::path::PathBuf;

use clap::Parser;
use telemetrify_shim::{ControlAction, ShimConfig, Supervisor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Shim command line arguments.
#[derive(Parser, Debug)]
#[command(name = "telemetrify-shim")]
#[command(about = "Supervises the telemetry pipeline process")]
struct Args {
	/// TOML configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Program to supervise, overriding the configuration file
	#[arg(short, long, value_name = "PATH")]
	program: Option<PathBuf>,

	/// Milliseconds to wait after SIGTERM before killing the process
	#[arg(long, value_name = "MS")]
	stop_timeout_ms: Option<u64>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	/// Arguments passed to the supervised program
	#[arg(last = true)]
	args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = ShimConfig::resolve(args.config.as_deref(), args.program, args.args, args.stop_timeout_ms)?;
	info!(program = %config.program.display(), "starting telemetrify-shim");

	let supervisor = Supervisor::spawn(config);
	let mut lines = BufReader::new(tokio::io::stdin()).lines();

	loop {
		tokio::select! {
			line = lines.next_line() => {
				let Some(line) = line? else {
					info!("control input closed");
					break;
				};
				if line.trim().is_empty() {
					continue;
				}
				match line.parse::<ControlAction>() {
					Ok(action) => {
						supervisor.send(action).await?;
						if action == ControlAction::Teardown {
							break;
						}
					}
					Err(err) => warn!(error = %err, "ignoring control line"),
				}
			}
			_ = tokio::signal::ctrl_c() => {
				info!("interrupted");
				break;
			}
		}
	}

	// Already torn down if the loop ended on a teardown action.
	let _ = supervisor.send(ControlAction::Teardown).await;
	let exit = supervisor.join().await;
	info!(?exit, "telemetrify-shim stopped");

	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("telemetrify_shim=trace,telemetrify_worker=debug,info")
		} else {
			EnvFilter::new("telemetrify_shim=info,warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();
}
