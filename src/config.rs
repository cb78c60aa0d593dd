// vim: noet

/*
 * Pipeline configuration: static settings loaded once at startup and the live
 * effect configuration that can be changed while the pipeline runs.
 */

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

// definitions for the FFT
pub const WINDOW_LEN: usize = 512;
pub const SAMP_RATE: f32    = 48000.0;

// samples per block delivered by the source
pub const BLOCK_LEN: usize = WINDOW_LEN/2;

// upper bound for the number of frequency bands
pub const MAX_BANDS: usize = 16;

// LED matrix configuration
pub const MATRIX_WIDTH:  usize = 16;
pub const MATRIX_HEIGHT: usize =  8;

pub const FPS_ANIMATION: f32 = 60.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig
{
	pub audio: AudioConfig,
	pub analysis: AnalysisConfig,
	pub matrix: MatrixConfig,
	pub scheduler: SchedulerConfig,
	pub effect: EffectConfig,
	pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig
{
	pub sample_rate: f32,
	pub block_size: usize,
	/// 1 = mono, 2 = interleaved stereo (downmixed at capture)
	pub channels: usize,
	/// capacity of the capture queue, in blocks
	pub queue_blocks: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig
{
	pub window_size: usize,
	pub overlap: usize,
	pub band_count: usize,
	pub min_freq: f32,
	pub max_freq: f32,
	/// per-window decay of the auto-gain reference
	pub gain_decay: f32,
	/// lowest value the auto-gain reference may decay to
	pub reference_floor: f32,
	pub beat_k: f32,
	pub beat_refractory_ms: u32,
	/// number of windows in the beat detector's moving statistics
	pub beat_history: usize,
	pub envelope_attack: f32,
	pub envelope_release: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MatrixConfig
{
	pub width: usize,
	pub height: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig
{
	pub frame_rate: f32,
	pub read_timeout_ms: u64,
	pub sink_budget_ms: u64,
	pub max_blocks_per_cycle: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig
{
	pub udp_target: Option<String>,
	pub serpentine: bool,
}

/*
 * The live, user-facing effect settings. A snapshot of this is taken once per
 * frame; `version` changes whenever any other field changes.
 */
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EffectConfig
{
	pub effect: String,
	pub palette: String,
	pub brightness: f32,
	pub sensitivity: f32,
	pub enabled: bool,

	#[serde(skip)]
	pub version: u64,
}

impl Default for AudioConfig
{
	fn default() -> Self
	{
		AudioConfig {
			sample_rate: SAMP_RATE,
			block_size: BLOCK_LEN,
			channels: 1,
			queue_blocks: 8,
		}
	}
}

impl Default for AnalysisConfig
{
	fn default() -> Self
	{
		AnalysisConfig {
			window_size: WINDOW_LEN,
			overlap: WINDOW_LEN/2,
			band_count: 8,
			min_freq: 40.0,
			max_freq: 16000.0,
			gain_decay: 0.995,
			reference_floor: 0.01,
			beat_k: 1.5,
			beat_refractory_ms: 100,
			beat_history: 43,
			envelope_attack: 0.5,
			envelope_release: 0.05,
		}
	}
}

impl Default for MatrixConfig
{
	fn default() -> Self
	{
		MatrixConfig { width: MATRIX_WIDTH, height: MATRIX_HEIGHT }
	}
}

impl Default for SchedulerConfig
{
	fn default() -> Self
	{
		SchedulerConfig {
			frame_rate: FPS_ANIMATION,
			read_timeout_ms: 5,
			sink_budget_ms: 4,
			max_blocks_per_cycle: 32,
		}
	}
}

impl Default for OutputConfig
{
	fn default() -> Self
	{
		OutputConfig { udp_target: None, serpentine: true }
	}
}

impl Default for EffectConfig
{
	fn default() -> Self
	{
		EffectConfig {
			effect: "spectrum".to_string(),
			palette: "rainbow".to_string(),
			brightness: 1.0,
			sensitivity: 1.0,
			enabled: true,
			version: 0,
		}
	}
}

impl AnalysisConfig
{
	/// Number of new samples between two analysis windows.
	pub fn hop(&self) -> usize
	{
		self.window_size - self.overlap
	}
}

// false for zero, negatives, NaN and infinities
fn positive(x: f32) -> bool
{
	x.is_finite() && x > 0.0
}

impl PipelineConfig
{
	pub fn load(path: &Path) -> Result<PipelineConfig>
	{
		let content = std::fs::read_to_string(path)?;
		let config: PipelineConfig = toml::from_str(&content)?;

		Ok(config)
	}

	/// Checks everything the pipeline relies on before any stage is built.
	pub fn validate(&self) -> Result<()>
	{
		let a = &self.analysis;

		if a.window_size < 4 || !a.window_size.is_power_of_two() {
			return Err(Error::InvalidWindowSize(a.window_size));
		}

		if a.overlap >= a.window_size {
			return Err(Error::InvalidConfig(format!(
				"overlap {} must be smaller than window size {}", a.overlap, a.window_size)));
		}

		if a.band_count == 0 || a.band_count > MAX_BANDS {
			return Err(Error::InvalidConfig(format!("band_count must be in 1..={}", MAX_BANDS)));
		}

		if !(positive(a.min_freq) && a.max_freq.is_finite() && a.min_freq < a.max_freq) {
			return Err(Error::InvalidConfig("min_freq must be positive and below max_freq".to_string()));
		}

		if !(positive(a.gain_decay) && a.gain_decay <= 1.0) {
			return Err(Error::InvalidConfig("gain_decay must be in (0, 1]".to_string()));
		}

		if !positive(a.reference_floor) || !(a.beat_k.is_finite() && a.beat_k >= 0.0) || a.beat_history < 2 {
			return Err(Error::InvalidConfig("invalid auto-gain or beat detector parameters".to_string()));
		}

		if !(a.envelope_attack.is_finite() && a.envelope_release.is_finite()) {
			return Err(Error::InvalidConfig("envelope coefficients must be finite".to_string()));
		}

		if !positive(self.audio.sample_rate) || self.audio.block_size == 0 {
			return Err(Error::InvalidConfig("sample_rate and block_size must be positive".to_string()));
		}

		if self.audio.channels != 1 && self.audio.channels != 2 {
			return Err(Error::InvalidConfig(format!("unsupported channel count {}", self.audio.channels)));
		}

		if self.matrix.width == 0 || self.matrix.height == 0 {
			return Err(Error::InvalidConfig("matrix dimensions must be non-zero".to_string()));
		}

		if !positive(self.scheduler.frame_rate) || self.scheduler.max_blocks_per_cycle == 0 {
			return Err(Error::InvalidConfig("frame_rate and max_blocks_per_cycle must be positive".to_string()));
		}

		if !(self.effect.brightness.is_finite() && self.effect.sensitivity.is_finite()) {
			return Err(Error::InvalidConfig("brightness and sensitivity must be finite".to_string()));
		}

		Ok(())
	}
}

/*
 * A partial change to the effect configuration, as delivered by the web/API
 * layer. Applying the same update twice gives the same result as applying it
 * once.
 */
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate
{
	pub effect: Option<String>,
	pub palette: Option<String>,
	pub brightness: Option<f32>,
	pub sensitivity: Option<f32>,
	pub enabled: Option<bool>,
}

impl ConfigUpdate
{
	pub fn is_empty(&self) -> bool
	{
		*self == ConfigUpdate::default()
	}

	/// Returns the updated config, or `None` if nothing would change.
	pub fn apply_to(&self, current: &EffectConfig) -> Option<EffectConfig>
	{
		let mut next = current.clone();

		if let Some(effect) = &self.effect {
			next.effect = effect.clone();
		}
		if let Some(palette) = &self.palette {
			next.palette = palette.clone();
		}
		// non-finite values count as absent
		if let Some(brightness) = self.brightness.filter(|b| b.is_finite()) {
			next.brightness = brightness.clamp(0.0, 1.0);
		}
		if let Some(sensitivity) = self.sensitivity.filter(|s| s.is_finite()) {
			next.sensitivity = sensitivity.max(MIN_SENSITIVITY);
		}
		if let Some(enabled) = self.enabled {
			next.enabled = enabled;
		}

		if next == *current {
			None
		} else {
			next.version = current.version + 1;
			Some(next)
		}
	}
}

const MIN_SENSITIVITY: f32 = 0.01;

fn parse_field<T: FromStr>(key: &str, value: &str) -> Result<T>
{
	value.parse::<T>()
		.map_err(|_| Error::InvalidConfig(format!("bad value '{}' for '{}'", value, key)))
}

fn parse_unit(key: &str, value: &str) -> Result<f32>
{
	let v: f32 = parse_field(key, value)?;
	if !v.is_finite() {
		return Err(Error::InvalidConfig(format!("'{}' must be finite", key)));
	}
	Ok(v)
}

impl FromStr for ConfigUpdate
{
	type Err = Error;

	/// Parses `key=value` pairs separated by `&`, `;` or whitespace, e.g.
	/// `effect=sparks&brightness=0.4`.
	fn from_str(s: &str) -> Result<ConfigUpdate>
	{
		let mut update = ConfigUpdate::default();

		for pair in s.split(|c: char| c == '&' || c == ';' || c.is_whitespace()) {
			if pair.is_empty() {
				continue;
			}

			let (key, value) = pair.split_once('=')
				.ok_or_else(|| Error::InvalidConfig(format!("expected key=value, got '{}'", pair)))?;

			match key {
				"effect"      => update.effect = Some(value.to_string()),
				"palette"     => update.palette = Some(value.to_string()),
				"brightness"  => update.brightness = Some(parse_unit(key, value)?),
				"sensitivity" => update.sensitivity = Some(parse_unit(key, value)?),
				"enabled"     => update.enabled = Some(match value {
					"1" | "on" => true,
					"0" | "off" => false,
					_ => parse_field(key, value)?,
				}),
				_ => return Err(Error::InvalidConfig(format!("unknown key '{}'", key))),
			}
		}

		Ok(update)
	}
}
