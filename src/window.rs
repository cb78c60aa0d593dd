// vim: noet

use crate::source::AudioBlock;

/// A contiguous run of `window_size` samples, oldest first, scaled to [-1, 1).
#[derive(Debug, Clone)]
pub struct AnalysisWindow
{
	pub samples: Vec<f32>,
	/// Absolute index of the sample following the last one in this window.
	pub end_sample: u64,
}

/*
 * Fixed-capacity ring accumulating samples into overlapping analysis windows.
 * A window is emitted once `window_size - overlap` new samples have arrived
 * since the previous one. If a single push brings in more than that, only the
 * newest window is emitted, so consecutive windows never share more than
 * `overlap` samples.
 */
pub struct WindowBuffer
{
	ring: Vec<f32>,
	write_pos: usize,
	filled: usize,
	fresh: usize,
	hop: usize,
	total: u64,
}

impl WindowBuffer
{
	pub fn new(window_size: usize, overlap: usize) -> WindowBuffer
	{
		debug_assert!(overlap < window_size);

		WindowBuffer {
			ring: vec![0.0; window_size],
			write_pos: 0,
			filled: 0,
			fresh: 0,
			hop: window_size - overlap,
			total: 0,
		}
	}

	pub fn window_size(&self) -> usize
	{
		self.ring.len()
	}

	/// Total number of samples pushed so far.
	pub fn samples_seen(&self) -> u64
	{
		self.total
	}

	pub fn push(&mut self, block: &AudioBlock) -> Option<AnalysisWindow>
	{
		let len = self.ring.len();

		for &sample in block.samples.iter() {
			self.ring[self.write_pos] = sample as f32 / 32768.0;
			self.write_pos = (self.write_pos + 1) % len;
		}

		self.filled = (self.filled + block.len()).min(len);
		self.fresh += block.len();
		self.total += block.len() as u64;

		if self.filled < len || self.fresh < self.hop {
			return None;
		}

		self.fresh = 0;

		// write_pos points at the oldest sample once the ring is full
		let mut samples = Vec::with_capacity(len);
		samples.extend_from_slice(&self.ring[self.write_pos..]);
		samples.extend_from_slice(&self.ring[..self.write_pos]);

		Some(AnalysisWindow { samples, end_sample: self.total })
	}
}
