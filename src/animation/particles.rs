// vim: noet

use crate::animation::{Animation, Geometry};
use crate::config::EffectConfig;
use crate::features::FeatureSet;
use crate::frame::{Canvas, Grid, Shade};

use rand::Rng;

const ENERGY_EXPONENT     : f32 = 1.8;
const FADE_FACTOR         : f32 = 0.90;
const AVG_LEDS_ACTIVATED  : f32 = 0.02;
const CONDENSATION_FACTOR : f32 = 5.0;

// palette positions of the particles spawned by bass, mid and treble
const GROUP_POS: [f32; 3] = [0.0, 0.45, 0.8];

/*
 * Sparks: each frame, the energy of the bass, mid and treble bands is split
 * into randomly sized chunks that light up random pixels, which then fade.
 */
pub struct Particles
{
	energy: Grid<Shade>,
	max_sparks: usize,
}

impl Particles
{
	pub fn new(geometry: &Geometry) -> Particles
	{
		Particles {
			energy: Grid::new(geometry.width, geometry.height),
			max_sparks: geometry.num_pixels().max(1),
		}
	}
}

impl Animation for Particles
{
	fn render(&mut self, features: &FeatureSet, _config: &EffectConfig, _previous: &Canvas, canvas: &mut Canvas)
	{
		let width = self.energy.width();
		let height = self.energy.height();
		if width == 0 || height == 0 {
			return;
		}

		let (bass, mid, treble) = features.bass_mid_treble();

		// fade all LEDs towards black
		self.energy.cells_mut().iter_mut().for_each(|s| s.value *= FADE_FACTOR);

		let mut rng = rand::thread_rng();
		let mut sparks = 0;

		for (group, &cur_energy) in [bass, mid, treble].iter().enumerate() {
			let new_energy = cur_energy.powf(ENERGY_EXPONENT);
			let mut remaining = new_energy * AVG_LEDS_ACTIVATED * (width * height) as f32;

			// distribute the energy in random chunks
			while remaining > 0.0 && sparks < self.max_sparks {
				let mut rnd_energy = rng.gen::<f32>() * new_energy * CONDENSATION_FACTOR;

				if rnd_energy > remaining {
					rnd_energy = remaining;
					remaining = 0.0;
				} else {
					remaining -= rnd_energy;
				}

				let x = rng.gen_range(0..width);
				let y = rng.gen_range(0..height);

				if let Some(cell) = self.energy.get_mut(x, y) {
					// blend the palette position by contributed energy
					let total = cell.value + rnd_energy;
					if total > 0.0 {
						cell.pos = (cell.pos * cell.value + GROUP_POS[group] * rnd_energy) / total;
					}
					cell.value = total;
				}

				sparks += 1;
			}
		}

		// color post-processing
		for (out, cell) in canvas.cells_mut().iter_mut().zip(self.energy.cells()) {
			*out = Shade::new(cell.pos, cell.value.min(1.0));
		}
	}
}
