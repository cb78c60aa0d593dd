// vim: noet

/*
 * The pipeline task: pulls audio, analyses it, renders one frame and hands it
 * to the sink, once per period. The only place it waits is the sample source
 * read, and never past the current cycle's deadline.
 */

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::animation::{EffectEngine, Geometry};
use crate::config::{EffectConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::features::{FeatureExtractor, FeatureSet};
use crate::frame::Frame;
use crate::signal_processing::{SignalProcessing, Spectrum};
use crate::sink::FrameSink;
use crate::source::{AudioBlock, SampleSource};
use crate::state::{PipelineMetrics, SharedState};
use crate::window::WindowBuffer;

// smoothing of the measured frame rate
const FRAME_RATE_ALPHA: f32 = 0.1;
const OVERRUN_LOG_INTERVAL: Duration = Duration::from_secs(1);

pub struct FrameScheduler<S, K>
{
	source: S,
	sink: K,
	shared: Arc<SharedState>,

	window: WindowBuffer,
	sigproc: SignalProcessing,
	extractor: FeatureExtractor,
	engine: EffectEngine,

	spectrum: Spectrum,
	features: FeatureSet,
	frame: Frame,

	period: Duration,
	read_timeout: Duration,
	sink_budget: Duration,
	max_blocks_per_cycle: usize,

	next_deadline: Option<Instant>,
	last_cycle_start: Option<Instant>,
	last_overrun_log: Option<Instant>,

	sequence: u64,
	silence_blocks: u64,
	metrics: PipelineMetrics,
}

impl<S: SampleSource, K: FrameSink> FrameScheduler<S, K>
{
	/// Builds all pipeline stages. Fails if the configuration is invalid, in
	/// particular with `Error::InvalidWindowSize` for a bad FFT size.
	pub fn new(config: &PipelineConfig, source: S, sink: K, shared: Arc<SharedState>) -> Result<FrameScheduler<S, K>>
	{
		config.validate()?;

		let analysis = &config.analysis;
		let sigproc = SignalProcessing::new(analysis.window_size, config.audio.sample_rate)?;
		let extractor = FeatureExtractor::new(analysis, analysis.window_size, sigproc.bin_width());
		let geometry = Geometry::new(&config.matrix, config.scheduler.frame_rate);

		log::info!("Pipeline: {} Hz, FFT size {}, hop {}, {} bands, {}x{} matrix at {} fps",
			config.audio.sample_rate, analysis.window_size, analysis.hop(), extractor.band_count(),
			config.matrix.width, config.matrix.height, config.scheduler.frame_rate);

		Ok(FrameScheduler {
			source,
			sink,
			shared,
			window: WindowBuffer::new(analysis.window_size, analysis.overlap),
			sigproc,
			extractor,
			engine: EffectEngine::new(geometry),
			spectrum: Spectrum::default(),
			features: FeatureSet::default(),
			frame: Frame::new(&config.matrix),
			period: Duration::from_secs_f32(1.0 / config.scheduler.frame_rate),
			read_timeout: Duration::from_millis(config.scheduler.read_timeout_ms),
			sink_budget: Duration::from_millis(config.scheduler.sink_budget_ms),
			max_blocks_per_cycle: config.scheduler.max_blocks_per_cycle,
			next_deadline: None,
			last_cycle_start: None,
			last_overrun_log: None,
			sequence: 0,
			silence_blocks: 0,
			metrics: PipelineMetrics::default(),
		})
	}

	pub fn engine_mut(&mut self) -> &mut EffectEngine
	{
		&mut self.engine
	}

	pub fn shared(&self) -> &Arc<SharedState>
	{
		&self.shared
	}

	pub fn metrics(&self) -> &PipelineMetrics
	{
		&self.metrics
	}

	pub fn features(&self) -> &FeatureSet
	{
		&self.features
	}

	/// Runs until the sample source closes.
	pub fn run(&mut self)
	{
		log::info!("Done! Starting main loop…");

		while self.step() {}

		log::info!("Main loop finished after {} frames ({} dropped).",
			self.metrics.frames, self.metrics.dropped_frames);
	}

	/// One cycle plus the wait for the next period. Returns false once the
	/// source has closed.
	pub fn step(&mut self) -> bool
	{
		let started = Instant::now();
		let deadline = *self.next_deadline.get_or_insert(started + self.period);

		if let Some(last) = self.last_cycle_start {
			let dt = started.duration_since(last).as_secs_f32();
			if dt > 0.0 {
				let fps = 1.0 / dt;
				self.metrics.frame_rate = if self.metrics.frame_rate == 0.0 {
					fps
				} else {
					(1.0 - FRAME_RATE_ALPHA) * self.metrics.frame_rate + FRAME_RATE_ALPHA * fps
				};
			}
		}
		self.last_cycle_start = Some(started);

		// faults are contained to the cycle they happen in
		let outcome = catch_unwind(AssertUnwindSafe(|| self.cycle(deadline)));

		match outcome {
			Ok(Ok(())) => {},
			Ok(Err(Error::SourceClosed)) => {
				log::info!("Audio source closed.");
				self.publish();
				return false;
			},
			Ok(Err(e)) => {
				log::warn!("Cycle failed, frame skipped: {}", e);
				self.metrics.dropped_frames += 1;
			},
			Err(_) => {
				log::error!("Cycle panicked, frame skipped");
				self.metrics.dropped_frames += 1;
			},
		}

		// wait for the next period, or skip the slots we overran
		let now = Instant::now();
		if now < deadline {
			std::thread::sleep(deadline - now);
			self.next_deadline = Some(deadline + self.period);
		} else {
			let late = now.duration_since(deadline);
			let missed = (late.as_nanos() / self.period.as_nanos().max(1)) as u64 + 1;
			self.metrics.dropped_frames += missed;
			self.next_deadline = Some(now + self.period);
		}

		self.publish();
		true
	}

	fn publish(&self)
	{
		self.shared.publish_metrics(self.metrics);
	}

	fn cycle(&mut self, deadline: Instant) -> Result<()>
	{
		// config changes become visible here and only here
		let config = self.shared.config();

		self.feed(&config, deadline)?;

		self.engine.render(&self.features, &config, &mut self.frame);
		self.frame.sequence = self.sequence;
		self.sequence += 1;

		self.submit();

		self.metrics.frames += 1;
		self.metrics.features = self.features;

		Ok(())
	}

	/*
	 * Reads blocks until a new analysis window is ready, then keeps draining
	 * whatever is already queued so the analysis follows the newest audio.
	 * A read that times out is replaced by silence.
	 */
	fn feed(&mut self, config: &EffectConfig, deadline: Instant) -> Result<()>
	{
		let mut window = None;

		for _i in 0 .. self.max_blocks_per_cycle {
			let have_window = window.is_some();
			if have_window && self.source.backlog() == 0 {
				break;
			}

			let now = Instant::now();
			let read_deadline = if have_window { now } else { (now + self.read_timeout).min(deadline) };

			let block = match self.source.read(read_deadline) {
				Ok(b) => b,
				Err(Error::Underrun) if have_window => break,
				Err(Error::Underrun) => {
					self.metrics.underruns += 1;
					self.silence_blocks += 1;
					AudioBlock::silence(self.source.block_size(), self.silence_blocks)
				},
				Err(e) => return Err(e),
			};

			if let Some(w) = self.window.push(&block) {
				if have_window {
					self.metrics.skipped_windows += 1;
				}
				window = Some(w);
			}
		}

		if let Some(w) = window {
			self.sigproc.analyze_into(&w, &mut self.spectrum);
			self.features = self.extractor.extract(&self.spectrum, config.sensitivity);
		}

		Ok(())
	}

	fn submit(&mut self)
	{
		let started = Instant::now();
		let res = self.sink.submit(&self.frame);
		let elapsed = started.elapsed();

		if let Err(e) = res {
			self.metrics.sink_errors += 1;
			log::warn!("Output sink rejected frame {}: {}", self.frame.sequence, e);
		}

		if elapsed > self.sink_budget {
			self.metrics.sink_overruns += 1;

			let should_log = match self.last_overrun_log {
				Some(t) => t.elapsed() >= OVERRUN_LOG_INTERVAL,
				None => true,
			};
			if should_log {
				log::warn!("{} ({} overruns so far)",
					Error::SinkOverloaded { elapsed, budget: self.sink_budget },
					self.metrics.sink_overruns);
				self.last_overrun_log = Some(Instant::now());
			}
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	use std::f32::consts::PI;
	use std::sync::Mutex;

	use crate::animation::Animation;
	use crate::config::{ConfigUpdate, MatrixConfig};
	use crate::frame::{Canvas, Color, Shade};
	use crate::sink::NullSink;
	use crate::source::ToneSource;

	fn test_config() -> PipelineConfig
	{
		let mut config = PipelineConfig::default();
		config.scheduler.frame_rate = 500.0;
		config.matrix = MatrixConfig { width: 8, height: 4 };
		config
	}

	#[derive(Clone, Default)]
	struct RecordingSink
	{
		frames: Arc<Mutex<Vec<Frame>>>,
		delay: Duration,
	}

	impl FrameSink for RecordingSink
	{
		fn submit(&mut self, frame: &Frame) -> Result<()>
		{
			if !self.delay.is_zero() {
				std::thread::sleep(self.delay);
			}
			self.frames.lock().unwrap().push(frame.clone());
			Ok(())
		}
	}

	/// A source that never has data.
	struct Starved;

	impl SampleSource for Starved
	{
		fn block_size(&self) -> usize
		{
			256
		}

		fn read(&mut self, _deadline: Instant) -> Result<AudioBlock>
		{
			Err(Error::Underrun)
		}
	}

	/// A 1 kHz tone with a per-block amplitude.
	struct RampSource
	{
		amplitudes: Vec<f32>,
		next: usize,
		phase: f32,
	}

	impl SampleSource for RampSource
	{
		fn block_size(&self) -> usize
		{
			256
		}

		fn read(&mut self, _deadline: Instant) -> Result<AudioBlock>
		{
			let amplitude = *self.amplitudes.get(self.next).ok_or(Error::SourceClosed)?;
			let step = 2.0 * PI * 1000.0 / 48000.0;

			let samples = (0..256).map(|_| {
				let s = (self.phase.sin() * amplitude * 32767.0) as i16;
				self.phase = (self.phase + step) % (2.0 * PI);
				s
			}).collect();

			self.next += 1;
			Ok(AudioBlock { samples, sequence: self.next as u64 })
		}
	}

	/// Paints everything at full value; on its first frame it changes the
	/// brightness behind the pipeline's back.
	struct MidCycleUpdater
	{
		shared: Arc<SharedState>,
		frames: u32,
	}

	impl Animation for MidCycleUpdater
	{
		fn render(&mut self, _f: &FeatureSet, _c: &EffectConfig, _p: &Canvas, canvas: &mut Canvas)
		{
			if self.frames == 0 {
				self.shared.apply(&ConfigUpdate { brightness: Some(0.5), ..ConfigUpdate::default() });
			}
			self.frames += 1;
			canvas.fill(Shade::new(0.0, 1.0));
		}
	}

	struct Panicky(u32);

	impl Animation for Panicky
	{
		fn render(&mut self, _f: &FeatureSet, _c: &EffectConfig, _p: &Canvas, _canvas: &mut Canvas)
		{
			self.0 += 1;
			if self.0 == 2 {
				panic!("effect fault");
			}
		}
	}

	#[test]
	fn refuses_invalid_window_size()
	{
		let mut config = test_config();
		config.analysis.window_size = 300;
		config.analysis.overlap = 100;

		let res = FrameScheduler::new(&config, Starved, RecordingSink::default(), Arc::new(SharedState::default()));
		assert!(matches!(res, Err(Error::InvalidWindowSize(300))));
	}

	#[test]
	fn frames_are_sequential_and_matrix_sized()
	{
		let sink = RecordingSink::default();
		let source = ToneSource::new(48000.0, 440.0, 0.5, 256).limit(20);
		let mut scheduler = FrameScheduler::new(&test_config(), source, sink.clone(), Arc::new(SharedState::default())).unwrap();

		scheduler.run();

		let frames = sink.frames.lock().unwrap();
		assert!(frames.len() >= 10);
		for (i, frame) in frames.iter().enumerate() {
			assert_eq!(frame.sequence, i as u64);
			assert_eq!((frame.width(), frame.height()), (8, 4));
		}

		let metrics = scheduler.shared().metrics();
		assert_eq!(metrics.frames, frames.len() as u64);
		assert_eq!(metrics.band_energies().len(), 8);
	}

	#[test]
	fn starved_source_yields_silence_without_stalling()
	{
		let sink = RecordingSink::default();
		let mut scheduler = FrameScheduler::new(&test_config(), Starved, sink.clone(), Arc::new(SharedState::default())).unwrap();

		let started = Instant::now();
		for _ in 0..20 {
			assert!(scheduler.step());
		}

		assert!(started.elapsed() < Duration::from_secs(2));
		assert_eq!(sink.frames.lock().unwrap().len(), 20);
		assert!(scheduler.metrics().underruns >= 20);
		assert!(scheduler.features().bands().iter().all(|&e| e == 0.0));
		assert!(!scheduler.features().beat);
	}

	#[test]
	fn slow_sink_counts_dropped_frames()
	{
		let mut config = test_config();
		config.scheduler.frame_rate = 100.0;

		let sink = RecordingSink { delay: Duration::from_millis(25), ..RecordingSink::default() };
		let source = ToneSource::new(48000.0, 440.0, 0.5, 256);
		let mut scheduler = FrameScheduler::new(&config, source, sink, Arc::new(SharedState::default())).unwrap();

		let mut last_dropped = 0;
		for _ in 0..8 {
			let started = Instant::now();
			assert!(scheduler.step());

			// bounded by the sink delay plus bookkeeping, never piling up
			assert!(started.elapsed() < Duration::from_millis(25 + 200));

			let dropped = scheduler.metrics().dropped_frames;
			assert!(dropped > last_dropped);
			last_dropped = dropped;
		}

		assert_eq!(scheduler.metrics().sink_overruns, 8);
	}

	#[test]
	fn config_changes_apply_from_the_next_cycle()
	{
		let shared = Arc::new(SharedState::new(EffectConfig {
			effect: "updater".to_string(),
			palette: "mono".to_string(),
			..EffectConfig::default()
		}));
		let sink = RecordingSink::default();
		let source = ToneSource::new(48000.0, 440.0, 0.5, 256);
		let mut scheduler = FrameScheduler::new(&test_config(), source, sink.clone(), shared.clone()).unwrap();

		let effect_shared = shared.clone();
		scheduler.engine_mut().register("updater", move |_| {
			Box::new(MidCycleUpdater { shared: effect_shared.clone(), frames: 0 })
		});

		for _ in 0..3 {
			scheduler.step();
		}

		let frames = sink.frames.lock().unwrap();

		// the update happened while frame 0 was rendered, frame 0 ignores it
		assert_eq!(frames[0].config_version, 0);
		assert_eq!(*frames[0].pixels.get(0, 0).unwrap(), Color::WHITE);

		assert_eq!(frames[1].config_version, 1);
		assert_eq!(frames[1].pixels.get(0, 0).unwrap().r, 0.5);
		assert_eq!(frames[2].config_version, 1);
	}

	#[test]
	fn concurrent_updates_never_reorder_versions()
	{
		let shared = Arc::new(SharedState::default());
		let sink = RecordingSink::default();
		let source = ToneSource::new(48000.0, 440.0, 0.5, 256);
		let mut scheduler = FrameScheduler::new(&test_config(), source, sink.clone(), shared.clone()).unwrap();

		let writer = {
			let shared = shared.clone();
			std::thread::spawn(move || {
				for i in 0..200 {
					let effect = if i % 2 == 0 { "sparks" } else { "spectrum" };
					shared.apply(&ConfigUpdate { effect: Some(effect.to_string()), ..ConfigUpdate::default() });
					std::thread::sleep(Duration::from_micros(300));
				}
			})
		};

		for _ in 0..50 {
			scheduler.step();
		}
		writer.join().unwrap();

		let frames = sink.frames.lock().unwrap();
		for pair in frames.windows(2) {
			assert!(pair[0].config_version <= pair[1].config_version);
			assert_eq!(pair[0].sequence + 1, pair[1].sequence);
		}
	}

	#[test]
	fn panicking_effect_skips_one_frame()
	{
		let shared = Arc::new(SharedState::new(EffectConfig { effect: "panicky".to_string(), ..EffectConfig::default() }));
		let sink = RecordingSink::default();
		let source = ToneSource::new(48000.0, 440.0, 0.5, 256);
		let mut scheduler = FrameScheduler::new(&test_config(), source, sink.clone(), shared).unwrap();
		scheduler.engine_mut().register("panicky", |_| Box::new(Panicky(0)));

		for _ in 0..5 {
			assert!(scheduler.step());
		}

		assert_eq!(sink.frames.lock().unwrap().len(), 4);
		assert!(scheduler.metrics().dropped_frames >= 1);
	}

	#[test]
	fn tone_ramp_drives_its_band_up_then_down()
	{
		let config = test_config();
		let steps = 60;
		let peak = 0.9f32;
		let floor = 0.001f32;

		// geometric ramp up to the peak and back down again
		let ratio = (peak / floor).powf(1.0 / (steps - 1) as f32);
		let up: Vec<f32> = (0..steps).map(|i| floor * ratio.powi(i)).collect();
		let down: Vec<f32> = up.iter().rev().copied().collect();
		let amplitudes: Vec<f32> = up.iter().chain(down.iter()).copied().collect();

		let source = RampSource { amplitudes, next: 0, phase: 0.0 };
		let mut scheduler = FrameScheduler::new(&config, source, NullSink, Arc::new(SharedState::default())).unwrap();

		let probe = FeatureExtractor::new(&config.analysis, 512, 48000.0 / 512.0);
		let band = probe.band_for_freq(1000.0, 48000.0 / 512.0).unwrap();

		let mut energies = Vec::new();
		while scheduler.step() {
			energies.push(scheduler.features().band(band));
		}

		// window k spans blocks k and k+1; window steps-1 straddles the peak
		assert_eq!(energies.len(), 2 * steps as usize - 1);
		let turn = steps as usize - 1;

		for e in energies.iter() {
			assert!((0.0..=1.0).contains(e));
		}
		for pair in energies[..=turn].windows(2) {
			assert!(pair[1] >= pair[0] - 1e-3, "rising phase dipped: {:?}", pair);
		}
		for pair in energies[turn..].windows(2) {
			assert!(pair[1] <= pair[0] + 1e-3, "falling phase rose: {:?}", pair);
		}

		assert!(energies[turn] > energies[0] + 0.5);
		assert!(energies[energies.len() - 1] < energies[turn] - 0.5);
	}
}
