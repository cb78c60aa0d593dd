// vim: noet

/*
 * The boundary between the pipeline task and everything else (web UI, control
 * inputs). Both directions go through `ArcSwap` cells, so readers never wait
 * and the pipeline never blocks on a writer.
 */

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::{ConfigUpdate, EffectConfig};
use crate::features::FeatureSet;

/// Read-only view of what the pipeline is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineMetrics
{
	/// Features of the most recent analysis window.
	pub features: FeatureSet,
	/// Measured frames per second.
	pub frame_rate: f32,
	pub frames: u64,
	/// Frame slots lost to overruns or failed cycles.
	pub dropped_frames: u64,
	/// Blocks of silence substituted for missing audio.
	pub underruns: u64,
	/// Submits that took longer than the sink budget.
	pub sink_overruns: u64,
	pub sink_errors: u64,
	/// Analysis windows skipped while catching up with queued audio.
	pub skipped_windows: u64,
}

impl PipelineMetrics
{
	pub fn band_energies(&self) -> &[f32]
	{
		self.features.bands()
	}

	pub fn beat_detected(&self) -> bool
	{
		self.features.beat
	}
}

pub struct SharedState
{
	config: ArcSwap<EffectConfig>,
	metrics: ArcSwap<PipelineMetrics>,
}

impl SharedState
{
	pub fn new(initial: EffectConfig) -> SharedState
	{
		SharedState {
			config: ArcSwap::from_pointee(initial),
			metrics: ArcSwap::from_pointee(PipelineMetrics::default()),
		}
	}

	/// Current configuration snapshot.
	pub fn config(&self) -> Arc<EffectConfig>
	{
		self.config.load_full()
	}

	/// Apply a partial update atomically. Returns true if anything changed.
	pub fn apply(&self, update: &ConfigUpdate) -> bool
	{
		let mut changed = false;

		// rcu retries if another writer got in between; the last run counts
		self.config.rcu(|current| {
			match update.apply_to(current) {
				Some(next) => {
					changed = true;
					Arc::new(next)
				},
				None => {
					changed = false;
					Arc::clone(current)
				}
			}
		});

		if changed {
			log::debug!("Config updated: {:?}", update);
		}

		changed
	}

	pub fn metrics(&self) -> Arc<PipelineMetrics>
	{
		self.metrics.load_full()
	}

	pub(crate) fn publish_metrics(&self, metrics: PipelineMetrics)
	{
		self.metrics.store(Arc::new(metrics));
	}
}

impl Default for SharedState
{
	fn default() -> Self
	{
		SharedState::new(EffectConfig::default())
	}
}
