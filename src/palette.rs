// vim: noet

use crate::error::{Error, Result};
use crate::frame::Color;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Palette
{
	Rainbow,
	Fire,
	Ocean,
	Forest,
	Party,
	Mono,
}

const FIRE: [Color; 4] = [
	Color { r: 0.0, g: 0.0, b: 0.0 },
	Color { r: 0.8, g: 0.0, b: 0.0 },
	Color { r: 1.0, g: 0.6, b: 0.0 },
	Color { r: 1.0, g: 1.0, b: 0.6 },
];

const OCEAN: [Color; 4] = [
	Color { r: 0.0, g: 0.0, b: 0.3 },
	Color { r: 0.0, g: 0.2, b: 1.0 },
	Color { r: 0.0, g: 0.8, b: 0.8 },
	Color { r: 0.7, g: 1.0, b: 1.0 },
];

const FOREST: [Color; 4] = [
	Color { r: 0.0, g: 0.2, b: 0.0 },
	Color { r: 0.1, g: 0.6, b: 0.0 },
	Color { r: 0.5, g: 0.8, b: 0.1 },
	Color { r: 0.9, g: 0.9, b: 0.3 },
];

const PARTY: [Color; 5] = [
	Color { r: 0.4, g: 0.0, b: 1.0 },
	Color { r: 1.0, g: 0.0, b: 0.6 },
	Color { r: 1.0, g: 0.3, b: 0.0 },
	Color { r: 1.0, g: 0.9, b: 0.0 },
	Color { r: 0.4, g: 0.0, b: 1.0 },
];

impl Palette
{
	pub const DEFAULT: Palette = Palette::Rainbow;

	pub fn names() -> &'static [&'static str]
	{
		&["rainbow", "fire", "ocean", "forest", "party", "mono"]
	}

	pub fn from_name(name: &str) -> Result<Palette>
	{
		match name {
			"rainbow" => Ok(Palette::Rainbow),
			"fire"    => Ok(Palette::Fire),
			"ocean"   => Ok(Palette::Ocean),
			"forest"  => Ok(Palette::Forest),
			"party"   => Ok(Palette::Party),
			"mono"    => Ok(Palette::Mono),
			_         => Err(Error::UnknownPalette(name.to_string())),
		}
	}

	/// Color at position `pos` in [0, 1]; values outside are clamped.
	pub fn sample(&self, pos: f32) -> Color
	{
		let pos = if pos.is_nan() { 0.0 } else { pos.clamp(0.0, 1.0) };

		match self {
			Palette::Rainbow => rainbow(pos),
			Palette::Fire    => gradient(&FIRE, pos),
			Palette::Ocean   => gradient(&OCEAN, pos),
			Palette::Forest  => gradient(&FOREST, pos),
			Palette::Party   => gradient(&PARTY, pos),
			Palette::Mono    => Color::WHITE,
		}
	}
}

fn gradient(stops: &[Color], pos: f32) -> Color
{
	let x = pos * (stops.len() - 1) as f32;
	let i = (x.floor() as usize).min(stops.len() - 2);

	stops[i].mix(&stops[i + 1], x - i as f32)
}

fn rainbow(val: f32) -> Color
{
	if val < 1./3. {
		let v = val * 3.;
		Color {
			r: 1.0 - v,
			g: v,
			b: 0.0,
		}
	}
	else if val < 2./3. {
		let v = (val - 1./3.) * 3.;
		Color {
			r: 0.0,
			g: 1.0 - v,
			b: v,
		}
	}
	else {
		let v = (val - 2./3.) * 3.;
		Color {
			r: v,
			g: 0.0,
			b: 1.0 - v,
		}
	}
}
