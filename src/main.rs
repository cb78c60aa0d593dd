// vim: noet

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use matrixlight::animation::{EffectEngine, Geometry};
use matrixlight::config::{ConfigUpdate, PipelineConfig};
use matrixlight::palette::Palette;
use matrixlight::scheduler::FrameScheduler;
use matrixlight::sink::{FrameSink, NullSink};
use matrixlight::source::{CaptureSource, SampleSource, ToneSource};
use matrixlight::state::SharedState;
use matrixlight::udpproto::UdpSink;
use matrixlight::{Error, Result};

#[derive(Parser, Debug)]
#[command(name = "matrixlight", about = "Audio-reactive LED matrix driver. Reads 16 bit PCM from stdin.")]
struct Cli
{
	/// Configuration file (TOML)
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Initial effect
	#[arg(short, long)]
	effect: Option<String>,

	/// Initial palette
	#[arg(short, long)]
	palette: Option<String>,

	/// Initial brightness (0.0-1.0)
	#[arg(short, long)]
	brightness: Option<f32>,

	/// WLED device to send frames to, e.g. 192.168.23.118:21324
	#[arg(long)]
	udp_target: Option<String>,

	/// Use a generated sine tone of this frequency instead of stdin
	#[arg(long)]
	tone: Option<f32>,

	/// File or FIFO to read config updates from, one per line
	/// (e.g. "effect=sparks&brightness=0.4")
	#[arg(long)]
	control: Option<PathBuf>,

	/// Seconds between metrics log lines, 0 disables them
	#[arg(long, default_value_t = 1.0)]
	metrics_interval: f32,

	/// List available effects and palettes and exit
	#[arg(long)]
	list_effects: bool,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig>
{
	let mut config = match &cli.config {
		Some(path) => {
			let config = PipelineConfig::load(path)?;
			log::info!("Loaded config from {}", path.display());
			config
		},
		None => PipelineConfig::default(),
	};

	// command line beats config file
	let overrides = ConfigUpdate {
		effect: cli.effect.clone(),
		palette: cli.palette.clone(),
		brightness: cli.brightness,
		..ConfigUpdate::default()
	};
	if let Some(next) = overrides.apply_to(&config.effect) {
		config.effect = next;
	}

	if cli.udp_target.is_some() {
		config.output.udp_target = cli.udp_target.clone();
	}

	config.validate()?;

	Ok(config)
}

fn spawn_control_reader(path: PathBuf, shared: Arc<SharedState>) -> std::io::Result<()>
{
	std::thread::Builder::new()
		.name("control".to_string())
		.spawn(move || loop {
			if let Err(e) = read_control(&path, &shared) {
				log::warn!("Control input {}: {}", path.display(), e);
			}

			// a FIFO reaches EOF whenever its writer goes away
			std::thread::sleep(Duration::from_millis(500));
		})?;

	Ok(())
}

fn read_control(path: &Path, shared: &SharedState) -> std::io::Result<()>
{
	let file = std::fs::File::open(path)?;

	for line in std::io::BufReader::new(file).lines() {
		let line = line?;
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}

		match line.parse::<ConfigUpdate>() {
			Ok(update) => {
				if shared.apply(&update) {
					log::info!("Applied config update '{}'", line);
				}
			},
			Err(e) => log::warn!("Ignoring control line '{}': {}", line, e),
		}
	}

	Ok(())
}

/// `None` disables metrics logging.
fn metrics_period(interval: f32) -> Result<Option<Duration>>
{
	if interval == 0.0 {
		return Ok(None);
	}

	match Duration::try_from_secs_f32(interval) {
		Ok(period) => Ok(Some(period)),
		Err(_) => Err(Error::InvalidConfig(format!("bad metrics interval {}", interval))),
	}
}

fn spawn_metrics_logger(period: Option<Duration>, shared: Arc<SharedState>) -> std::io::Result<()>
{
	let period = match period {
		Some(p) => p,
		None => return Ok(()),
	};

	std::thread::Builder::new()
		.name("metrics".to_string())
		.spawn(move || loop {
			std::thread::sleep(period);

			let m = shared.metrics();
			let (bass, mid, treble) = m.features.bass_mid_treble();

			log::info!("Bass: {:4.2} – Mid: {:4.2} – Treble: {:4.2} – {:5.1} fps, {} dropped, {} underruns",
				bass, mid, treble, m.frame_rate, m.dropped_frames, m.underruns);
		})?;

	Ok(())
}

fn run_pipeline<S: SampleSource>(config: &PipelineConfig, source: S, sink: Box<dyn FrameSink>, shared: Arc<SharedState>) -> Result<()>
{
	let mut scheduler = FrameScheduler::new(config, source, sink, shared)?;
	scheduler.run();

	Ok(())
}

fn run(cli: Cli) -> Result<()>
{
	let config = load_config(&cli)?;
	let metrics_every = metrics_period(cli.metrics_interval)?;
	let shared = Arc::new(SharedState::new(config.effect.clone()));

	let sink: Box<dyn FrameSink> = match &config.output.udp_target {
		Some(target) => {
			log::info!("Sending frames to {}", target);
			Box::new(UdpSink::new(target, config.output.serpentine)?)
		},
		None => {
			log::info!("No output configured, frames are discarded");
			Box::new(NullSink)
		}
	};

	if let Some(path) = &cli.control {
		spawn_control_reader(path.clone(), shared.clone())?;
	}
	spawn_metrics_logger(metrics_every, shared.clone())?;

	match cli.tone {
		Some(freq) => {
			let source = ToneSource::new(config.audio.sample_rate, freq, 0.5, config.audio.block_size).realtime();
			run_pipeline(&config, source, sink, shared)
		},
		None => {
			let (source, _capture) = CaptureSource::spawn(std::io::stdin(), &config.audio)?;
			run_pipeline(&config, source, sink, shared)
		}
	}
}

fn main()
{
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
		.format_timestamp_millis()
		.init();

	let cli = Cli::parse();

	if cli.list_effects {
		let engine = EffectEngine::new(Geometry { width: 1, height: 1, frame_rate: 1.0 });
		println!("Effects:  {}", engine.effect_names().join(", "));
		println!("Palettes: {}", Palette::names().join(", "));
		return;
	}

	if let Err(e) = run(cli) {
		log::error!("{}", e);
		exit(1);
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn metrics_interval_must_be_finite()
	{
		assert_eq!(metrics_period(0.0).unwrap(), None);
		assert_eq!(metrics_period(0.5).unwrap(), Some(Duration::from_millis(500)));

		assert!(metrics_period(f32::INFINITY).is_err());
		assert!(metrics_period(f32::NAN).is_err());
		assert!(metrics_period(-1.0).is_err());
	}
}
