// vim: noet

/*
 * The effect engine: a registry of interchangeable animations selected by
 * name, plus the palette/brightness post-process shared by all of them.
 */

use crate::config::{EffectConfig, MatrixConfig};
use crate::features::FeatureSet;
use crate::frame::{Canvas, Color, Frame};
use crate::palette::Palette;

pub mod particles;
pub mod pulse;
pub mod racers;
pub mod spectrum;
pub mod vu_meter;

pub const OFF: &str = "off";

/// What an animation knows about the display it draws on.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Geometry
{
	pub width: usize,
	pub height: usize,
	pub frame_rate: f32,
}

impl Geometry
{
	pub fn new(matrix: &MatrixConfig, frame_rate: f32) -> Geometry
	{
		Geometry { width: matrix.width, height: matrix.height, frame_rate }
	}

	pub fn num_pixels(&self) -> usize
	{
		self.width * self.height
	}
}

/////////// Animation Trait ////////////

pub trait Animation: Send
{
	/// Paint one frame into `canvas`, which arrives cleared. `previous` holds
	/// what this animation painted last time (cleared after a reselect).
	fn render(&mut self, features: &FeatureSet, config: &EffectConfig, previous: &Canvas, canvas: &mut Canvas);
}

pub type Factory = Box<dyn Fn(&Geometry) -> Box<dyn Animation> + Send>;

/// The fallback: paints nothing.
pub struct Blank;

impl Animation for Blank
{
	fn render(&mut self, _features: &FeatureSet, _config: &EffectConfig, _previous: &Canvas, _canvas: &mut Canvas)
	{
	}
}

/////////// Effect Engine ////////////

pub struct EffectEngine
{
	geometry: Geometry,
	registry: Vec<(String, Factory)>,

	// the effect name most recently requested, known or not
	selected: String,
	active: Box<dyn Animation>,

	canvas: Canvas,
	previous: Canvas,

	palette_name: String,
	palette: Palette,
}

impl EffectEngine
{
	/// An engine with all built-in effects registered and "off" selected.
	pub fn new(geometry: Geometry) -> EffectEngine
	{
		let mut engine = EffectEngine {
			geometry,
			registry: Vec::new(),
			selected: OFF.to_string(),
			active: Box::new(Blank),
			canvas: Canvas::new(geometry.width, geometry.height),
			previous: Canvas::new(geometry.width, geometry.height),
			palette_name: "rainbow".to_string(),
			palette: Palette::DEFAULT,
		};

		engine.register(OFF, |_| Box::new(Blank));
		engine.register("vu_meter", |g| Box::new(vu_meter::VuMeter::new(g)));
		engine.register("spectrum", |g| Box::new(spectrum::Spectrum::new(g)));
		engine.register("beat_pulse", |g| Box::new(pulse::BeatPulse::new(g)));
		engine.register("sparks", |g| Box::new(particles::Particles::new(g)));
		engine.register("racers", |g| Box::new(racers::Racers::new(g)));

		engine
	}

	/// Add an effect, replacing any existing one with the same name.
	pub fn register<F>(&mut self, name: &str, factory: F)
		where F: Fn(&Geometry) -> Box<dyn Animation> + Send + 'static
	{
		let factory: Factory = Box::new(factory);

		match self.registry.iter_mut().find(|(n, _)| n == name) {
			Some(entry) => entry.1 = factory,
			None => self.registry.push((name.to_string(), factory)),
		}
	}

	pub fn effect_names(&self) -> Vec<&str>
	{
		self.registry.iter().map(|(n, _)| n.as_str()).collect()
	}

	pub fn is_registered(&self, name: &str) -> bool
	{
		self.registry.iter().any(|(n, _)| n == name)
	}

	pub fn geometry(&self) -> &Geometry
	{
		&self.geometry
	}

	fn select(&mut self, name: &str)
	{
		if self.selected == name {
			return;
		}

		let animation = match self.registry.iter().find(|(n, _)| n == name) {
			Some((_, factory)) => {
				log::info!("Switching effect to '{}'", name);
				factory(&self.geometry)
			},
			None => {
				log::warn!("Unknown effect '{}', falling back to '{}'", name, OFF);
				Box::new(Blank)
			}
		};

		// a fresh instance starts from a blank display
		self.active = animation;
		self.selected = name.to_string();
		self.canvas.fill(Default::default());
		self.previous.fill(Default::default());
	}

	fn select_palette(&mut self, name: &str)
	{
		if self.palette_name == name {
			return;
		}

		self.palette = match Palette::from_name(name) {
			Ok(p) => p,
			Err(e) => {
				log::warn!("{}, falling back to the default palette", e);
				Palette::DEFAULT
			}
		};
		self.palette_name = name.to_string();
	}

	/// Render one frame for `config` into `frame`. Never fails: unknown
	/// effect or palette names fall back to defaults.
	pub fn render(&mut self, features: &FeatureSet, config: &EffectConfig, frame: &mut Frame)
	{
		self.select(&config.effect);
		self.select_palette(&config.palette);

		frame.config_version = config.version;

		if !config.enabled {
			frame.pixels.fill(Color::BLACK);
			return;
		}

		std::mem::swap(&mut self.canvas, &mut self.previous);
		self.canvas.fill(Default::default());

		self.active.render(features, config, &self.previous, &mut self.canvas);

		self.post_process(config.brightness, frame);
	}

	// palette and global brightness, identical for every effect
	fn post_process(&self, brightness: f32, frame: &mut Frame)
	{
		let brightness = if brightness.is_nan() { 0.0 } else { brightness.clamp(0.0, 1.0) };

		for (pixel, shade) in frame.pixels.cells_mut().iter_mut().zip(self.canvas.cells()) {
			let value = if shade.value.is_nan() { 0.0 } else { shade.value.clamp(0.0, 1.0) };

			let mut color = self.palette.sample(shade.pos);
			color.scale(value * brightness);
			color.limit();

			*pixel = color;
		}
	}
}
