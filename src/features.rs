// vim: noet

use std::collections::VecDeque;

use crate::config::{AnalysisConfig, MAX_BANDS};
use crate::signal_processing::Spectrum;

// below this overall energy nothing counts as a beat
const BEAT_ENERGY_FLOOR: f32 = 1e-6;
// the spread used for the beat threshold never drops below this share of the mean
const BEAT_MIN_RELATIVE_SPREAD: f32 = 0.1;
// windows of history needed before beats are flagged
const BEAT_MIN_HISTORY: usize = 4;

/// Audio features of one analysis window. All energies are in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureSet
{
	bands: [f32; MAX_BANDS],
	band_count: usize,

	/// Smoothed overall loudness.
	pub envelope: f32,
	pub beat: bool,
	/// How far above the beat threshold the current window is, in [0, 1].
	pub beat_confidence: f32,
	/// Stream time of the analysed window, in seconds.
	pub time: f64,
}

impl FeatureSet
{
	/// A feature set with the given band energies (clamped to [0, 1]) and
	/// everything else zero.
	pub fn with_bands(energies: &[f32]) -> FeatureSet
	{
		let mut features = FeatureSet::default();
		features.band_count = energies.len().min(MAX_BANDS);

		for (b, e) in features.bands.iter_mut().zip(energies) {
			*b = (*e).clamp(0.0, 1.0);
		}

		features
	}

	pub fn bands(&self) -> &[f32]
	{
		&self.bands[..self.band_count]
	}

	pub fn band(&self, idx: usize) -> f32
	{
		self.bands().get(idx).copied().unwrap_or(0.0)
	}

	/// Linearly interpolated band energy for a position in [0, 1] across all
	/// bands (0 = lowest band, 1 = highest).
	pub fn band_at(&self, pos: f32) -> f32
	{
		match self.band_count {
			0 => 0.0,
			1 => self.bands[0],
			n => {
				let x = pos.clamp(0.0, 1.0) * (n - 1) as f32;
				let i = (x.floor() as usize).min(n - 2);
				let frac = x - i as f32;
				self.bands[i] * (1.0 - frac) + self.bands[i + 1] * frac
			}
		}
	}

	/// Mean energy of the lowest, middle and highest third of the bands.
	pub fn bass_mid_treble(&self) -> (f32, f32, f32)
	{
		let n = self.band_count;
		if n == 0 {
			return (0.0, 0.0, 0.0);
		}

		let mean = |from: usize, to: usize| {
			let to = to.max(from + 1).min(n);
			let from = from.min(to - 1);
			self.bands[from..to].iter().sum::<f32>() / (to - from) as f32
		};

		(mean(0, n / 3), mean(n / 3, 2 * n / 3), mean(2 * n / 3, n))
	}
}

/*
 * Moving mean/variance of the overall energy with a refractory period, flags
 * windows whose energy stands out from the recent past.
 */
struct BeatDetector
{
	history: VecDeque<f32>,
	capacity: usize,
	k: f32,
	// in samples, so precision does not depend on uptime
	refractory: u64,
	last_beat: Option<u64>,
}

impl BeatDetector
{
	fn new(capacity: usize, k: f32, refractory_ms: u32, sample_rate: f32) -> BeatDetector
	{
		BeatDetector {
			history: VecDeque::with_capacity(capacity),
			capacity,
			k,
			refractory: (refractory_ms as f64 * sample_rate as f64 / 1000.0).round() as u64,
			last_beat: None,
		}
	}

	/// Returns (beat, confidence). `end_sample` is the stream position of the
	/// window's last sample.
	fn update(&mut self, energy: f32, end_sample: u64) -> (bool, f32)
	{
		let mut result = (false, 0.0);

		if self.history.len() >= BEAT_MIN_HISTORY {
			let n = self.history.len() as f32;
			let mean = self.history.iter().sum::<f32>() / n;
			let var = self.history.iter().map(|e| (e - mean) * (e - mean)).sum::<f32>() / n;
			let spread = var.sqrt().max(mean * BEAT_MIN_RELATIVE_SPREAD);

			if spread > 0.0 {
				let z = (energy - mean) / spread;
				let confidence = (z / (2.0 * self.k.max(f32::EPSILON))).clamp(0.0, 1.0);

				let cooled_down = match self.last_beat {
					Some(last) => end_sample.saturating_sub(last) >= self.refractory,
					None => true,
				};

				let beat = energy > BEAT_ENERGY_FLOOR && z > self.k && cooled_down;
				if beat {
					self.last_beat = Some(end_sample);
				}

				result = (beat, confidence);
			}
		}

		// avoid increasing the size of the deque
		if self.history.len() == self.capacity {
			self.history.pop_front();
		}
		self.history.push_back(energy);

		result
	}
}

/*
 * Reduces spectra to normalized band energies, a loudness envelope and beat
 * events. Bands are spaced logarithmically between min_freq and max_freq;
 * each band carries its own auto-gain reference.
 */
pub struct FeatureExtractor
{
	band_bins: Vec<(usize, usize)>,
	bin_scale: f32,

	reference: [f32; MAX_BANDS],
	gain_decay: f32,
	reference_floor: f32,

	envelope: f32,
	envelope_attack: f32,
	envelope_release: f32,

	beat: BeatDetector,
}

impl FeatureExtractor
{
	/// `bin_width` is the spectrum's Hz per bin, `window_size` the FFT size.
	pub fn new(analysis: &AnalysisConfig, window_size: usize, bin_width: f32) -> FeatureExtractor
	{
		let bin_count = window_size / 2;
		let band_count = analysis.band_count.clamp(1, MAX_BANDS);
		let max_freq = analysis.max_freq.min(bin_width * bin_count as f32);
		let ratio = (max_freq / analysis.min_freq).max(1.0);

		// band edges in bins; bin 0 (DC) is never part of a band
		let mut edges = Vec::with_capacity(band_count + 1);
		for i in 0 ..= band_count {
			let freq = analysis.min_freq * ratio.powf(i as f32 / band_count as f32);
			let mut bin = ((freq / bin_width).round() as usize).clamp(1, bin_count);

			if let Some(&prev) = edges.last() {
				bin = bin.max(prev + 1).min(bin_count);
			}
			edges.push(bin);
		}

		let band_bins = edges.windows(2).map(|e| (e[0], e[1])).collect();

		FeatureExtractor {
			band_bins,
			bin_scale: 2.0 / window_size as f32,
			reference: [analysis.reference_floor; MAX_BANDS],
			gain_decay: analysis.gain_decay,
			reference_floor: analysis.reference_floor,
			envelope: 0.0,
			envelope_attack: analysis.envelope_attack.clamp(0.0, 1.0),
			envelope_release: analysis.envelope_release.clamp(0.0, 1.0),
			beat: BeatDetector::new(analysis.beat_history, analysis.beat_k, analysis.beat_refractory_ms,
				bin_width * window_size as f32),
		}
	}

	pub fn band_count(&self) -> usize
	{
		self.band_bins.len()
	}

	/// Bin range `[start, end)` of each band.
	pub fn band_bins(&self) -> &[(usize, usize)]
	{
		&self.band_bins
	}

	/// Index of the band containing `freq`, if any.
	pub fn band_for_freq(&self, freq: f32, bin_width: f32) -> Option<usize>
	{
		let bin = (freq / bin_width).round() as usize;
		self.band_bins.iter().position(|&(start, end)| bin >= start && bin < end)
	}

	/// RMS magnitude of a bin range, scaled so a full-scale sine is about 0.5.
	fn raw_energy(&self, spectrum: &Spectrum, start: usize, end: usize) -> f32
	{
		let end = end.min(spectrum.bins.len());
		if start >= end {
			return 0.0;
		}

		let sum_sq: f32 = spectrum.bins[start..end].iter().map(|m| m * m).sum();
		(sum_sq / (end - start) as f32).sqrt() * self.bin_scale
	}

	pub fn extract(&mut self, spectrum: &Spectrum, sensitivity: f32) -> FeatureSet
	{
		let mut features = FeatureSet {
			band_count: self.band_bins.len(),
			time: spectrum.time,
			..FeatureSet::default()
		};

		let sensitivity = if sensitivity.is_finite() && sensitivity > 0.0 { sensitivity } else { 1.0 };
		let mut overall = 0.0;

		for (i, &(start, end)) in self.band_bins.iter().enumerate() {
			let raw = self.raw_energy(spectrum, start, end);
			overall += raw;

			// exponential moving maximum with slow decay
			self.reference[i] = (self.reference[i] * self.gain_decay)
				.max(raw)
				.max(self.reference_floor);

			features.bands[i] = (raw / (self.reference[i] * sensitivity)).min(1.0);
		}

		if overall > 0.0 {
			let loudness = features.bands().iter().sum::<f32>() / features.band_count as f32;
			let alpha = if loudness > self.envelope { self.envelope_attack } else { self.envelope_release };
			self.envelope += alpha * (loudness - self.envelope);
		} else {
			// digital silence: nothing left to smooth
			self.envelope = 0.0;
		}
		features.envelope = self.envelope.clamp(0.0, 1.0);

		let (beat, confidence) = self.beat.update(overall, spectrum.end_sample);
		features.beat = beat;
		features.beat_confidence = confidence;

		features
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	const WINDOW: usize = 512;
	const RATE: f32 = 48000.0;

	fn extractor() -> FeatureExtractor
	{
		FeatureExtractor::new(&AnalysisConfig::default(), WINDOW, RATE / WINDOW as f32)
	}

	fn spectrum(magnitude: f32, window_idx: u64) -> Spectrum
	{
		spectrum_at(magnitude, window_idx, 0)
	}

	fn spectrum_at(magnitude: f32, window_idx: u64, offset: u64) -> Spectrum
	{
		let hop = 256;
		let end_sample = offset + (window_idx + 2) * hop;
		Spectrum {
			bins: vec![magnitude; WINDOW / 2],
			bin_width: RATE / WINDOW as f32,
			end_sample,
			time: end_sample as f64 / RATE as f64,
		}
	}

	#[test]
	fn bands_are_disjoint_and_ordered()
	{
		let fe = extractor();
		let bins = fe.band_bins();

		assert_eq!(bins.len(), 8);
		assert!(bins[0].0 >= 1);
		for &(start, end) in bins {
			assert!(start < end);
		}
		for pair in bins.windows(2) {
			assert_eq!(pair[0].1, pair[1].0);
		}

		assert_eq!(fe.band_for_freq(1000.0, RATE / WINDOW as f32), Some(4));
	}

	#[test]
	fn silence_gives_zero_features_and_no_beats()
	{
		let mut fe = extractor();

		// some sound first, so the envelope has somewhere to fall from
		for i in 0..10 {
			fe.extract(&spectrum(20.0, i), 1.0);
		}

		let mut last = FeatureSet::default();
		for i in 10..1000 {
			last = fe.extract(&spectrum(0.0, i), 1.0);
			assert!(!last.beat);
			assert!(last.bands().iter().all(|&e| e == 0.0));
		}

		assert_eq!(last.envelope, 0.0);
	}

	#[test]
	fn envelope_drops_to_zero_on_digital_silence()
	{
		let mut fe = extractor();

		for i in 0..10 {
			fe.extract(&spectrum(20.0, i), 1.0);
		}

		let features = fe.extract(&spectrum(0.0, 10), 1.0);
		assert_eq!(features, FeatureSet { band_count: 8, time: features.time, ..FeatureSet::default() });
	}

	#[test]
	fn energies_stay_in_unit_range()
	{
		let mut fe = extractor();

		for i in 0..200 {
			let magnitude = ((i * 37) % 101) as f32;
			let features = fe.extract(&spectrum(magnitude, i), 0.5);

			assert!(features.bands().iter().all(|&e| (0.0..=1.0).contains(&e)));
			assert!((0.0..=1.0).contains(&features.envelope));
			assert!((0.0..=1.0).contains(&features.beat_confidence));
		}
	}

	#[test]
	fn auto_gain_recovers_after_loud_passage()
	{
		let mut fe = extractor();

		for i in 0..20 {
			fe.extract(&spectrum(100.0, i), 1.0);
		}

		let right_after = fe.extract(&spectrum(10.0, 20), 1.0).band(3);
		let mut later = 0.0;
		for i in 21..2000 {
			later = fe.extract(&spectrum(10.0, i), 1.0).band(3);
		}

		assert!(right_after < 0.2);
		assert!(later > 0.9, "reference did not decay: {}", later);
	}

	#[test]
	fn beat_respects_refractory_interval()
	{
		let mut fe = extractor();
		let mut beats = Vec::new();

		// windows are 256 samples apart, about 5.3 ms
		for i in 0..200 {
			let transient = i == 100 || i == 110;
			let magnitude = if transient { 50.0 } else { 2.0 };

			if fe.extract(&spectrum(magnitude, i), 1.0).beat {
				beats.push(i);
			}
		}

		// the second transient is only 53 ms after the first
		assert_eq!(beats, vec![100]);
	}

	#[test]
	fn beats_separated_by_more_than_refractory_are_both_flagged()
	{
		let mut fe = extractor();
		let mut beats = Vec::new();

		for i in 0..300 {
			let transient = i == 100 || i == 200;
			let magnitude = if transient { 50.0 } else { 2.0 };

			let features = fe.extract(&spectrum(magnitude, i), 1.0);
			if features.beat {
				assert!(features.beat_confidence > 0.5);
				beats.push(i);
			}
		}

		assert_eq!(beats, vec![100, 200]);
	}

	#[test]
	fn refractory_interval_holds_after_long_uptime()
	{
		// about 100 days of audio at 48 kHz
		let offset = 100 * 24 * 3600 * 48000u64;

		for &start in &[0, offset] {
			let mut fe = extractor();
			let mut beats = Vec::new();

			// 80 windows apart is about 427 ms, well past the refractory period
			for i in 0..250 {
				let transient = i == 100 || i == 180;
				let magnitude = if transient { 50.0 } else { 2.0 };

				if fe.extract(&spectrum_at(magnitude, i, start), 1.0).beat {
					beats.push(i);
				}
			}

			assert_eq!(beats, vec![100, 180], "start offset {}", start);
		}
	}

	#[test]
	fn band_at_interpolates()
	{
		let mut features = FeatureSet { band_count: 3, ..FeatureSet::default() };
		features.bands[0] = 0.0;
		features.bands[1] = 1.0;
		features.bands[2] = 0.5;

		assert_eq!(features.band_at(0.0), 0.0);
		assert_eq!(features.band_at(0.25), 0.5);
		assert_eq!(features.band_at(0.5), 1.0);
		assert_eq!(features.band_at(1.0), 0.5);

		let (bass, mid, treble) = features.bass_mid_treble();
		assert_eq!((bass, mid, treble), (0.0, 1.0, 0.5));
	}
}
