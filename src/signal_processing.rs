// vim: noet

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::{Error, Result};
use crate::window::AnalysisWindow;

/// Magnitude spectrum of one analysis window.
#[derive(Debug, Clone, Default)]
pub struct Spectrum
{
	/// |FFT(x)[k]| for k in 0 .. window_size/2
	pub bins: Vec<f32>,
	/// Width of one bin in Hz.
	pub bin_width: f32,
	/// Stream position of the window's end, in samples and seconds.
	pub end_sample: u64,
	pub time: f64,
}

impl Spectrum
{
	pub fn freq_to_idx(&self, freq: f32) -> usize
	{
		((freq / self.bin_width) as usize).min(self.bins.len().saturating_sub(1))
	}

	/// Mean magnitude of the bins covering `freq_start ..= freq_end`.
	pub fn get_energy_in_band(&self, freq_start: f32, freq_end: f32) -> f32
	{
		if self.bins.is_empty() {
			return 0.0;
		}

		let start_bin = self.freq_to_idx(freq_start);
		let end_bin = self.freq_to_idx(freq_end).max(start_bin);

		let sum: f32 = self.bins[start_bin ..= end_bin].iter().sum();
		sum / (end_bin - start_bin + 1) as f32
	}

	pub fn dominant_bin(&self) -> usize
	{
		self.bins.iter()
			.enumerate()
			.fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best })
			.0
	}

	pub fn is_silent(&self) -> bool
	{
		self.bins.iter().all(|&m| m == 0.0)
	}
}

/*
 * Hann window + real-input FFT of fixed size. The window coefficients, FFT
 * plan and scratch memory are allocated once in `new`; `analyze_into` does
 * not allocate.
 */
pub struct SignalProcessing
{
	samp_rate: f32,

	fft_window: Vec<f32>,

	fft_buffer: Vec<Complex<f32>>,
	fft_scratch: Vec<Complex<f32>>,

	fft_plan: Arc<dyn Fft<f32>>,
}

impl SignalProcessing
{
	fn hann_window(block_size: usize) -> Vec<f32>
	{
		(0..block_size)
			.map(|i| (PI * (i as f32) / (block_size as f32)).sin().powi(2))
			.collect()
	}

	pub fn new(block_size: usize, samp_rate: f32) -> Result<SignalProcessing>
	{
		if block_size < 4 || !block_size.is_power_of_two() {
			return Err(Error::InvalidWindowSize(block_size));
		}

		let mut planner = FftPlanner::<f32>::new();
		let fft_plan = planner.plan_fft_forward(block_size);
		let scratch_len = fft_plan.get_inplace_scratch_len();

		let s = SignalProcessing {
			samp_rate,
			fft_window: SignalProcessing::hann_window(block_size),
			fft_buffer: vec![Complex::new(0.0, 0.0); block_size],
			fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
			fft_plan,
		};

		Ok(s)
	}

	pub fn window_size(&self) -> usize
	{
		self.fft_window.len()
	}

	pub fn bin_count(&self) -> usize
	{
		self.fft_window.len() / 2
	}

	pub fn bin_width(&self) -> f32
	{
		self.samp_rate / self.fft_window.len() as f32
	}

	pub fn analyze(&mut self, window: &AnalysisWindow) -> Spectrum
	{
		let mut spectrum = Spectrum::default();
		self.analyze_into(window, &mut spectrum);
		spectrum
	}

	/// Like `analyze`, but reuses the storage of `spectrum`.
	pub fn analyze_into(&mut self, window: &AnalysisWindow, spectrum: &mut Spectrum)
	{
		debug_assert_eq!(window.samples.len(), self.fft_window.len());

		// import and apply the window; a short window is zero-padded
		let mut input = window.samples.iter();
		for (c, w) in self.fft_buffer.iter_mut().zip(self.fft_window.iter()) {
			let sample = input.next().copied().unwrap_or(0.0);
			*c = Complex::new(sample * w, 0.0);
		}

		self.fft_plan.process_with_scratch(&mut self.fft_buffer, &mut self.fft_scratch);

		let bin_count = self.bin_count();
		spectrum.bins.clear();
		spectrum.bins.extend(self.fft_buffer[..bin_count].iter().map(|c| c.norm()));

		spectrum.bin_width = self.bin_width();
		spectrum.end_sample = window.end_sample;
		spectrum.time = window.end_sample as f64 / self.samp_rate as f64;
	}
}
