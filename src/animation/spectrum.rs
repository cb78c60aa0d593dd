// vim: noet

use crate::animation::{Animation, Geometry};
use crate::config::EffectConfig;
use crate::features::FeatureSet;
use crate::frame::{Canvas, Shade};

const COOLDOWN_FACTOR : f32 = 0.960;
const BAR_EXPONENT    : f32 = 1.5;
const PEAK_VALUE      : f32 = 1.0;
const BAR_VALUE       : f32 = 0.7;

/*
 * One vertical bar per column, columns spread over the frequency bands from
 * bass (left) to treble (right). Bars jump up instantly and fall off slowly.
 */
pub struct Spectrum
{
	energies: Vec<f32>,
}

impl Spectrum
{
	pub fn new(geometry: &Geometry) -> Spectrum
	{
		Spectrum {
			energies: vec![0.0; geometry.width],
		}
	}
}

impl Animation for Spectrum
{
	fn render(&mut self, features: &FeatureSet, _config: &EffectConfig, _previous: &Canvas, canvas: &mut Canvas)
	{
		let width = canvas.width();
		let height = canvas.height() as f32;

		self.energies.resize(width, 0.0);

		for x in 0..width {
			let col_pos = if width > 1 { x as f32 / (width - 1) as f32 } else { 0.0 };
			let energy = features.band_at(col_pos).powf(BAR_EXPONENT);

			self.energies[x] = (COOLDOWN_FACTOR * self.energies[x]).max(energy);

			// bar top in rows, measured from the bottom
			let top = self.energies[x] * height;

			for y in 0..canvas.height() {
				let row_from_bottom = (canvas.height() - 1 - y) as f32;
				let coverage = (top - row_from_bottom).clamp(0.0, 1.0);

				if coverage > 0.0 {
					let pos = row_from_bottom / height;
					let value = if top - row_from_bottom < 1.0 { PEAK_VALUE } else { BAR_VALUE };
					canvas.set(x, y, Shade::new(pos, value * coverage.sqrt()));
				}
			}
		}
	}
}
