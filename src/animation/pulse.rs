// vim: noet

use crate::animation::{Animation, Geometry};
use crate::config::EffectConfig;
use crate::features::FeatureSet;
use crate::frame::{Canvas, Shade};

// golden ratio step, so consecutive beats land far apart on the palette
const HUE_STEP       : f32 = 0.618_034;
const FADE_PER_SEC   : f32 = 0.02;
const BASE_LEVEL     : f32 = 0.15;
const MIN_FLASH      : f32 = 0.5;
const EDGE_DIMMING   : f32 = 0.4;

/*
 * Washes the whole matrix in one palette color on every beat and lets it fade
 * out. Between beats a faint glow follows the loudness envelope.
 */
pub struct BeatPulse
{
	hue: f32,
	fade: f32,
	center: (f32, f32),
	max_dist: f32,
}

impl BeatPulse
{
	pub fn new(geometry: &Geometry) -> BeatPulse
	{
		let cx = (geometry.width as f32 - 1.0) / 2.0;
		let cy = (geometry.height as f32 - 1.0) / 2.0;

		BeatPulse {
			hue: 0.0,
			fade: FADE_PER_SEC.powf(1.0 / geometry.frame_rate.max(1.0)),
			center: (cx, cy),
			max_dist: (cx * cx + cy * cy).sqrt().max(1.0),
		}
	}
}

impl Animation for BeatPulse
{
	fn render(&mut self, features: &FeatureSet, _config: &EffectConfig, previous: &Canvas, canvas: &mut Canvas)
	{
		if features.beat {
			self.hue = (self.hue + HUE_STEP) % 1.0;
		}

		let flash = MIN_FLASH + (1.0 - MIN_FLASH) * features.beat_confidence;
		let base = BASE_LEVEL * features.envelope;

		for y in 0..canvas.height() {
			for x in 0..canvas.width() {
				let prev = previous.get(x, y).copied().unwrap_or_default();

				let shade = if features.beat {
					// brightest in the middle
					let dx = x as f32 - self.center.0;
					let dy = y as f32 - self.center.1;
					let dist = (dx * dx + dy * dy).sqrt() / self.max_dist;

					Shade::new(self.hue, flash * (1.0 - EDGE_DIMMING * dist))
				} else {
					let faded = prev.value * self.fade;
					Shade::new(self.hue, faded.max(base))
				};

				canvas.set(x, y, shade);
			}
		}
	}
}
