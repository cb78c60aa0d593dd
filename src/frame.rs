// vim: noet

use crate::config::MatrixConfig;

/////////// Helper Structs ////////////

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Color
{
	pub r: f32,
	pub g: f32,
	pub b: f32,
}

impl Color
{
	pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0 };
	pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0 };

	pub fn new(r: f32, g: f32, b: f32) -> Color
	{
		Color { r, g, b }
	}

	pub fn scale(&mut self, factor: f32)
	{
		self.r *= factor;
		self.g *= factor;
		self.b *= factor;
	}

	pub fn scaled_copy(&self, factor: f32) -> Color
	{
		let mut c = *self;
		c.scale(factor);
		c
	}

	pub fn add(&mut self, other: &Color)
	{
		self.r += other.r;
		self.g += other.g;
		self.b += other.b;
	}

	/// Linear blend, `t = 0` gives `self`, `t = 1` gives `other`.
	pub fn mix(&self, other: &Color, t: f32) -> Color
	{
		Color {
			r: self.r + (other.r - self.r) * t,
			g: self.g + (other.g - self.g) * t,
			b: self.b + (other.b - self.b) * t,
		}
	}

	fn _limit_component(c: &mut f32)
	{
		// NaN ends up black
		*c = if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) };
	}

	pub fn limit(&mut self)
	{
		Color::_limit_component(&mut self.r);
		Color::_limit_component(&mut self.g);
		Color::_limit_component(&mut self.b);
	}

	pub fn to_rgb8(&self) -> [u8; 3]
	{
		let mut c = *self;
		c.limit();
		[
			(c.r * 255.0).round() as u8,
			(c.g * 255.0).round() as u8,
			(c.b * 255.0).round() as u8,
		]
	}
}

/*
 * What effects paint: a position on the active palette and an intensity. The
 * palette and global brightness are applied afterwards, the same way for all
 * effects.
 */
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Shade
{
	pub pos: f32,
	pub value: f32,
}

impl Shade
{
	pub const OFF: Shade = Shade { pos: 0.0, value: 0.0 };

	pub fn new(pos: f32, value: f32) -> Shade
	{
		Shade { pos, value }
	}
}

/// Row-major 2D grid, (0, 0) is the top left corner.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T>
{
	width: usize,
	height: usize,
	cells: Vec<T>,
}

impl<T: Copy + Default> Grid<T>
{
	pub fn new(width: usize, height: usize) -> Grid<T>
	{
		Grid { width, height, cells: vec![T::default(); width * height] }
	}

	pub fn width(&self) -> usize
	{
		self.width
	}

	pub fn height(&self) -> usize
	{
		self.height
	}

	pub fn len(&self) -> usize
	{
		self.cells.len()
	}

	pub fn is_empty(&self) -> bool
	{
		self.cells.is_empty()
	}

	pub fn get(&self, x: usize, y: usize) -> Option<&T>
	{
		if x < self.width && y < self.height {
			self.cells.get(y * self.width + x)
		} else {
			None
		}
	}

	pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut T>
	{
		if x < self.width && y < self.height {
			self.cells.get_mut(y * self.width + x)
		} else {
			None
		}
	}

	/// Out-of-range writes are ignored.
	pub fn set(&mut self, x: usize, y: usize, value: T)
	{
		if let Some(cell) = self.get_mut(x, y) {
			*cell = value;
		}
	}

	pub fn fill(&mut self, value: T)
	{
		self.cells.iter_mut().for_each(|c| *c = value);
	}

	pub fn cells(&self) -> &[T]
	{
		&self.cells
	}

	pub fn cells_mut(&mut self) -> &mut [T]
	{
		&mut self.cells
	}

	pub fn rows(&self) -> std::slice::Chunks<'_, T>
	{
		self.cells.chunks(self.width.max(1))
	}
}

pub type Canvas = Grid<Shade>;

impl Canvas
{
	pub fn fade(&mut self, factor: f32)
	{
		self.cells.iter_mut().for_each(|c| c.value *= factor);
	}
}

/// One finished frame, ready for the output sink.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame
{
	pub pixels: Grid<Color>,
	/// Monotonic frame counter.
	pub sequence: u64,
	/// Version of the effect configuration this frame was rendered with.
	pub config_version: u64,
}

impl Frame
{
	pub fn new(matrix: &MatrixConfig) -> Frame
	{
		Frame {
			pixels: Grid::new(matrix.width, matrix.height),
			sequence: 0,
			config_version: 0,
		}
	}

	pub fn width(&self) -> usize
	{
		self.pixels.width()
	}

	pub fn height(&self) -> usize
	{
		self.pixels.height()
	}

	pub fn is_black(&self) -> bool
	{
		self.pixels.cells().iter().all(|c| *c == Color::BLACK)
	}
}
