//! Export-all driver.
//!
//! Mounts each `--region` as a producer on a round barrier, triggers one export
//! round per `--rounds` and prints each round's outputs as a JSON line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cropwall_barrier::{BarrierConfig, RoundBarrier};
use serde::Serialize;
use tracing::info;

mod region;

use region::{OutputImage, WallRegion};

/// Export command line arguments.
#[derive(Parser, Debug)]
#[command(name = "cropwall-export")]
#[command(about = "Collect wall-height crop outputs from every mounted region")]
struct Args {
	/// Crop region as LABEL:TILE_WIDTH:TILE_HEIGHT:TILES (repeatable)
	#[arg(short, long = "region", value_name = "REGION", required = true)]
	regions: Vec<WallRegion>,

	/// Number of export rounds to run
	#[arg(short = 'n', long, default_value_t = 1)]
	rounds: u32,

	/// Simulated encoding time per output image
	#[arg(long, value_name = "MS", default_value_t = 0)]
	delay_ms: u64,

	/// Barrier config file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

/// One line of output per export round.
#[derive(Debug, Serialize)]
struct RoundManifest<'a> {
	round: u32,
	files: &'a [OutputImage],
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = match &args.config {
		Some(path) => BarrierConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => BarrierConfig::named("export-crops"),
	};
	let barrier = RoundBarrier::<OutputImage>::new(config);
	let delay = Duration::from_millis(args.delay_ms);

	for region in args.regions {
		let id = barrier.next_producer_id();
		let label = region.label.clone();
		let region = Arc::new(region);
		barrier.register(id, move || Arc::clone(&region).render(delay))?;
		info!(producer = %id, region = %label, "Mounted crop region");
	}

	for round in 0..args.rounds {
		let files = barrier.trigger_and_await().await.with_context(|| format!("export round {round}"))?;
		info!(round, files = files.len(), "Export round complete");
		println!("{}", serde_json::to_string(&RoundManifest { round, files: &files })?);
	}

	Ok(())
}
