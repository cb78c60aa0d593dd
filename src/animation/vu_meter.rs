// vim: noet

use crate::animation::{Animation, Geometry};
use crate::config::EffectConfig;
use crate::features::FeatureSet;
use crate::frame::{Canvas, Shade};

// peak marker falls this far per second (full width = 1.0)
const PEAK_FALL_RATE : f32 = 0.6;
const PEAK_HOLD_SEC  : f32 = 0.5;
const BAR_VALUE      : f32 = 0.8;

/*
 * Classic level meter: a bar growing from the left edge with the loudness
 * envelope, bass/mid/treble split over the rows, and a held peak marker.
 */
pub struct VuMeter
{
	peak: f32,
	peak_hold: f32,
	frame_time: f32,
}

impl VuMeter
{
	pub fn new(geometry: &Geometry) -> VuMeter
	{
		VuMeter {
			peak: 0.0,
			peak_hold: 0.0,
			frame_time: 1.0 / geometry.frame_rate.max(1.0),
		}
	}
}

impl Animation for VuMeter
{
	fn render(&mut self, features: &FeatureSet, _config: &EffectConfig, _previous: &Canvas, canvas: &mut Canvas)
	{
		let width = canvas.width();
		let height = canvas.height();
		let (bass, mid, treble) = features.bass_mid_treble();

		// track the peak with hold time and slow fall
		let level = features.envelope;
		if level >= self.peak {
			self.peak = level;
			self.peak_hold = PEAK_HOLD_SEC;
		} else if self.peak_hold > 0.0 {
			self.peak_hold -= self.frame_time;
		} else {
			self.peak = (self.peak - PEAK_FALL_RATE * self.frame_time).max(level);
		}

		for y in 0..height {
			// top rows follow treble, bottom rows bass
			let row_pos = if height > 1 { y as f32 / (height - 1) as f32 } else { 0.5 };
			let band = if row_pos < 1./3. { treble } else if row_pos < 2./3. { mid } else { bass };
			let row_level = 0.5 * (level + band);

			let lit = row_level * width as f32;
			for x in 0..width {
				let coverage = (lit - x as f32).clamp(0.0, 1.0);
				if coverage > 0.0 {
					let pos = x as f32 / width as f32;
					canvas.set(x, y, Shade::new(pos, coverage * BAR_VALUE));
				}
			}

			let peak_x = ((self.peak * width as f32) as usize).min(width - 1);
			if self.peak > 0.0 {
				canvas.set(peak_x, y, Shade::new(1.0, 1.0));
			}
		}
	}
}
