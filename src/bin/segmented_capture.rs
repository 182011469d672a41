
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::info;

use segscope::devices::dsox3000::{Dsox3000, ScopeSettings};
use segscope::logging::{init_logging, level_with_verbosity};
use segscope::sim::SimulatedDsox;
use segscope::transport::{Transport, Vxi11Transport};
use segscope::Result;

#[derive(Parser, Debug)]
#[command(name = "segmented_capture", about = "Capture one segmented acquisition from a DSOX3000 and read it out in a single transfer")]
struct Args {
	/// JSON settings file
	#[arg(short, long)]
	config: PathBuf,
	/// Instrument address, overriding the settings file
	#[arg(long)]
	host: Option<String>,
	/// Run against the built-in simulated instrument
	#[arg(long)]
	simulate: bool,
	/// Write the decoded segments to this file as JSON
	#[arg(long)]
	json: Option<PathBuf>,
	/// More logging, repeatable
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

fn main() {
	let args = Args::parse();
	init_logging(level_with_verbosity(args.verbose));

	if let Err(e) = run(args) {
		eprintln!("Error: {}", e);
		exit(1);
	}
}

fn run(args:Args) -> Result<()> {
	let mut settings = ScopeSettings::load(&args.config)?;
	if let Some(host) = args.host {
		settings.address = host;
	}
	let timing = settings.timing();

	let transport:Box<dyn Transport> = if args.simulate {
		info!("Using simulated instrument");
		Box::new(SimulatedDsox::new())
	} else {
		info!("Connecting to {}", settings.address);
		Box::new(Vxi11Transport::open(&settings.address)?.with_timeout(timing.command_timeout))
	};

	let mut scope = Dsox3000::new(transport)?.with_timing(timing);
	if settings.reset_on_connect {
		scope.reset()?;
	}

	let acq = scope.acquire(&settings.acquisition, settings.arm_timeout(), settings.read_timestamps)?;

	println!("{} segments of {} points, {:e} s/point", acq.len(), settings.acquisition.points_per_segment, acq.x_increment);
	for seg in acq.segments.iter().take(5) {
		let min = seg.samples.iter().cloned().fold(f64::INFINITY, f64::min);
		let max = seg.samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
		match seg.timestamp {
			Some(t) => println!("  segment {:4} @ {:>12.6e} s: {:+.4} V .. {:+.4} V", seg.index, t, min, max),
			None    => println!("  segment {:4}: {:+.4} V .. {:+.4} V", seg.index, min, max),
		}
	}
	if acq.len() > 5 {
		println!("  ...");
	}

	if let Some(path) = args.json {
		let writer = BufWriter::new(File::create(&path)?);
		serde_json::to_writer(writer, &acq).map_err(io::Error::from)?;
		info!("Wrote {}", path.display());
	}

	Ok(())
}
