// vim: noet

use crate::animation::{Animation, Geometry};
use crate::config::EffectConfig;
use crate::features::FeatureSet;
use crate::frame::{Canvas, Shade};

use rand::Rng;

const ENERGY_FILTER_ALPHA     : f32 = 0.20;
const BRIGHTNESS_FILTER_ALPHA : f32 = 0.05;
const FLARE_DECAY             : f32 = 0.85;

// racers per group for every 100 pixels
const RACERS_PER_100_LEDS     : usize = 3;

// LEDs per second
const RACER_MIN_SPEED         : f32 =  0.5;
const RACER_MAX_SPEED         : f32 = 80.0;
const RACER_MIN_BRIGHTNESS    : f32 = 0.05;
const RACER_MAX_BRIGHTNESS    : f32 = 1.00;

const SPEED_SCALE_RANGE       : f32 = 0.10;

// palette positions for the bass, mid and treble racers
const GROUP_POS: [f32; 3] = [0.0, 0.33, 0.66];

/*
 * A racer is a point of light that moves back and forth along the matrix,
 * following a serpentine path through all pixels.
 */
struct Racer
{
	min_speed:  f32, // LEDs per frame
	max_speed:  f32, // LEDs per frame
	direction:  f32, // either +1 or -1

	pos: f32,
	palette_pos: f32,

	brightness: f32,
	flare: f32,
}

impl Racer
{
	fn pos2xy(pos: usize, width: usize) -> (usize, usize)
	{
		let y = pos / width;
		let mut x = pos % width;

		if (y % 2) == 1 {
			x = width - x - 1;
		}

		(x, y)
	}

	fn update(&mut self, speed: f32, brightness: f32, flare: f32, num_leds: f32)
	{
		// move along the path
		let cur_speed = self.min_speed + speed * (self.max_speed - self.min_speed);

		self.pos += self.direction * cur_speed;

		let maxpos = num_leds - 1.0;

		// if the end is reached, reverse the direction
		if self.pos >= maxpos {
			self.direction = -1.0;
			self.pos = (2.0 * maxpos - self.pos).max(0.0);
		} else if self.pos <= 0.0 {
			self.direction = 1.0;
			self.pos = (-self.pos).min(maxpos);
		}

		self.brightness = brightness;
		self.flare = flare;
	}

	fn render(&self, canvas: &mut Canvas)
	{
		let width = canvas.width();
		let num_leds = canvas.len();

		let brightness = RACER_MIN_BRIGHTNESS + self.brightness * (RACER_MAX_BRIGHTNESS - RACER_MIN_BRIGHTNESS);
		let value = (brightness + self.flare).min(1.0);

		let fract_led = self.pos - self.pos.floor();
		let led1_idx = self.pos.floor() as usize;
		let led2_idx = self.pos.ceil() as usize;

		for (idx, share) in [(led1_idx, 1.0 - fract_led), (led2_idx, fract_led)] {
			if idx >= num_leds || share <= 0.0 {
				continue;
			}

			let (x, y) = Racer::pos2xy(idx, width);
			if let Some(cell) = canvas.get_mut(x, y) {
				let add = value * share;
				let total = cell.value + add;
				cell.pos = (cell.pos * cell.value + self.palette_pos * add) / total;
				cell.value = total.min(1.0);
			}
		}
	}
}

pub struct Racers
{
	filtered_energy     : [f32; 3],
	filtered_brightness : [f32; 3],
	flare               : f32,

	racers : Vec<(usize, Racer)>,
}

impl Racers
{
	pub fn new(geometry: &Geometry) -> Racers
	{
		let mut rng = rand::thread_rng();
		let num_leds = geometry.num_pixels();
		let per_group = (RACERS_PER_100_LEDS * num_leds / 100).max(1);
		let fps = geometry.frame_rate.max(1.0);

		let mut racers = Vec::with_capacity(3 * per_group);

		for group in 0..3 {
			for _i in 0 .. per_group {
				let speed_scale = 1.0 + SPEED_SCALE_RANGE * (rng.gen::<f32>() - 0.5);

				racers.push((group, Racer {
					min_speed: RACER_MIN_SPEED / fps * speed_scale,
					max_speed: RACER_MAX_SPEED / fps * speed_scale,
					direction: if rng.gen::<bool>() { 1.0 } else { -1.0 },
					pos: rng.gen::<f32>() * (num_leds.saturating_sub(1)) as f32,
					palette_pos: GROUP_POS[group],
					brightness: 0.0,
					flare: 0.0,
				}));
			}
		}

		Racers {
			filtered_energy: [0.0; 3],
			filtered_brightness: [0.0; 3],
			flare: 0.0,
			racers,
		}
	}
}

impl Animation for Racers
{
	fn render(&mut self, features: &FeatureSet, _config: &EffectConfig, _previous: &Canvas, canvas: &mut Canvas)
	{
		let (bass, mid, treble) = features.bass_mid_treble();
		let cur_energy = [bass, mid, treble];

		for i in 0..3 {
			let f = &mut self.filtered_energy[i];
			*f = (1.0 - ENERGY_FILTER_ALPHA) * (*f) + ENERGY_FILTER_ALPHA * cur_energy[i];

			// lowpass-filter brightness to reduce intensive fast flashing
			let b = &mut self.filtered_brightness[i];
			*b = (1.0 - BRIGHTNESS_FILTER_ALPHA) * (*b) + BRIGHTNESS_FILTER_ALPHA * cur_energy[i];
		}

		self.flare *= FLARE_DECAY;
		if features.beat {
			self.flare = self.flare.max(features.beat_confidence);
		}

		let num_leds = canvas.len() as f32;

		for (group, racer) in self.racers.iter_mut() {
			let g = *group;
			racer.update(self.filtered_energy[g], self.filtered_brightness[g], self.flare, num_leds);
		}

		for (_, racer) in self.racers.iter() {
			racer.render(canvas);
		}
	}
}
