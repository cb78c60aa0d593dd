// vim: noet

/*
 * Sample sources: everything that produces blocks of signed PCM samples for
 * the pipeline. The pipeline only ever waits inside `SampleSource::read`, and
 * only until the deadline it passes in.
 */

use std::f32::consts::PI;
use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use byteorder::{NativeEndian, ReadBytesExt};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TrySendError};

use crate::config::AudioConfig;
use crate::error::{Error, Result};

/// One block of mono samples as delivered by a source.
#[derive(Debug, Clone)]
pub struct AudioBlock
{
	pub samples: Vec<i16>,
	pub sequence: u64,
}

impl AudioBlock
{
	pub fn silence(len: usize, sequence: u64) -> AudioBlock
	{
		AudioBlock { samples: vec![0; len], sequence }
	}

	pub fn len(&self) -> usize
	{
		self.samples.len()
	}

	pub fn is_empty(&self) -> bool
	{
		self.samples.is_empty()
	}
}

pub trait SampleSource
{
	/// Number of samples in every block this source delivers.
	fn block_size(&self) -> usize;

	/// Wait at most until `deadline` for the next block. Fails with
	/// `Error::Underrun` if nothing arrived in time and with
	/// `Error::SourceClosed` once no more data will ever arrive.
	fn read(&mut self, deadline: Instant) -> Result<AudioBlock>;

	/// Blocks that could be read right now without waiting.
	fn backlog(&self) -> usize
	{
		0
	}
}

/////////// Capture from a byte stream ////////////

/*
 * Reads native-endian i16 PCM from a byte stream (usually stdin) on its own
 * thread and hands complete blocks over a bounded queue.
 */
pub struct CaptureSource
{
	rx: Receiver<Vec<i16>>,
	block_size: usize,
	sequence: u64,
	dropped: Arc<AtomicU64>,
}

impl CaptureSource
{
	pub fn spawn<R>(reader: R, audio: &AudioConfig) -> Result<(CaptureSource, JoinHandle<()>)>
		where R: Read + Send + 'static
	{
		let (tx, rx) = bounded::<Vec<i16>>(audio.queue_blocks.max(1));
		let dropped = Arc::new(AtomicU64::new(0));

		let block_size = audio.block_size;
		let channels = audio.channels;
		let thread_dropped = dropped.clone();

		let handle = std::thread::Builder::new()
			.name("audio-capture".to_string())
			.spawn(move || {
				let mut input = BufReader::new(reader);

				loop {
					let block = match read_block(&mut input, block_size, channels) {
						Ok(b) => b,
						Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
							log::info!("End of audio stream.");
							return;
						},
						Err(e) => {
							log::error!("Audio capture failed: {}", e);
							return;
						}
					};

					match tx.try_send(block) {
						Ok(()) => {},
						Err(TrySendError::Full(_)) => {
							let n = thread_dropped.fetch_add(1, Ordering::Relaxed) + 1;
							if n.is_power_of_two() {
								log::warn!("Capture queue full, {} blocks dropped so far", n);
							}
						},
						Err(TrySendError::Disconnected(_)) => return,
					}
				}
			})?;

		let source = CaptureSource {
			rx,
			block_size,
			sequence: 0,
			dropped,
		};

		Ok((source, handle))
	}

	/// Blocks discarded by the capture thread because the queue was full.
	pub fn dropped_blocks(&self) -> u64
	{
		self.dropped.load(Ordering::Relaxed)
	}
}

fn read_block(input: &mut impl Read, block_size: usize, channels: usize) -> std::io::Result<Vec<i16>>
{
	let mut block = Vec::with_capacity(block_size);

	for _i in 0 .. block_size {
		let sample = if channels == 2 {
			let l = input.read_i16::<NativeEndian>()? as i32;
			let r = input.read_i16::<NativeEndian>()? as i32;
			((l + r) / 2) as i16
		} else {
			input.read_i16::<NativeEndian>()?
		};

		block.push(sample);
	}

	Ok(block)
}

impl SampleSource for CaptureSource
{
	fn block_size(&self) -> usize
	{
		self.block_size
	}

	fn read(&mut self, deadline: Instant) -> Result<AudioBlock>
	{
		match self.rx.recv_deadline(deadline) {
			Ok(samples) => {
				let block = AudioBlock { samples, sequence: self.sequence };
				self.sequence += 1;
				Ok(block)
			},
			Err(RecvTimeoutError::Timeout) => Err(Error::Underrun),
			Err(RecvTimeoutError::Disconnected) => Err(Error::SourceClosed),
		}
	}

	fn backlog(&self) -> usize
	{
		self.rx.len()
	}
}

/////////// Synthetic tone ////////////

/// Sine generator for demos and tests.
pub struct ToneSource
{
	sample_rate: f32,
	freq: f32,
	amplitude: f32,
	block_size: usize,
	phase: f32,
	sequence: u64,

	limit: Option<u64>,
	realtime: Option<Instant>,
}

impl ToneSource
{
	pub fn new(sample_rate: f32, freq: f32, amplitude: f32, block_size: usize) -> ToneSource
	{
		ToneSource {
			sample_rate,
			freq,
			amplitude: amplitude.clamp(0.0, 1.0),
			block_size,
			phase: 0.0,
			sequence: 0,
			limit: None,
			realtime: None,
		}
	}

	/// Close the source after `blocks` blocks.
	pub fn limit(mut self, blocks: u64) -> ToneSource
	{
		self.limit = Some(blocks);
		self
	}

	/// Deliver blocks at the pace a real peripheral would.
	pub fn realtime(mut self) -> ToneSource
	{
		self.realtime = Some(Instant::now());
		self
	}

	pub fn set_amplitude(&mut self, amplitude: f32)
	{
		self.amplitude = amplitude.clamp(0.0, 1.0);
	}

	/// Stream time at which `blocks` blocks have been captured.
	fn due_offset(&self, blocks: u64) -> Duration
	{
		Duration::from_secs_f64(self.block_size as f64 * blocks as f64 / self.sample_rate as f64)
	}

	fn generate(&mut self) -> AudioBlock
	{
		let step = 2.0 * PI * self.freq / self.sample_rate;
		let scale = self.amplitude * (i16::MAX as f32);

		let samples = (0 .. self.block_size)
			.map(|_| {
				let s = (self.phase.sin() * scale) as i16;
				self.phase = (self.phase + step) % (2.0 * PI);
				s
			})
			.collect();

		let block = AudioBlock { samples, sequence: self.sequence };
		self.sequence += 1;
		block
	}
}

impl SampleSource for ToneSource
{
	fn block_size(&self) -> usize
	{
		self.block_size
	}

	fn read(&mut self, deadline: Instant) -> Result<AudioBlock>
	{
		if let Some(limit) = self.limit {
			if self.sequence >= limit {
				return Err(Error::SourceClosed);
			}
		}

		if let Some(started) = self.realtime {
			let due = started + self.due_offset(self.sequence + 1);
			let now = Instant::now();

			if due > now {
				if due > deadline {
					std::thread::sleep(deadline.saturating_duration_since(now));
					return Err(Error::Underrun);
				}
				std::thread::sleep(due - now);
			}
		}

		Ok(self.generate())
	}

	fn backlog(&self) -> usize
	{
		match self.realtime {
			Some(started) => {
				let block_secs = self.block_size as f64 / self.sample_rate as f64;
				let captured = started.elapsed().as_secs_f64() / block_secs;
				(captured as u64).saturating_sub(self.sequence) as usize
			},
			None => 0,
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	use std::io::Cursor;

	fn pcm_bytes(samples: &[i16]) -> Vec<u8>
	{
		samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
	}

	fn audio(block_size: usize, channels: usize) -> AudioConfig
	{
		AudioConfig { block_size, channels, ..AudioConfig::default() }
	}

	#[test]
	fn capture_delivers_blocks_then_closes()
	{
		let bytes = pcm_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
		let (mut source, handle) = CaptureSource::spawn(Cursor::new(bytes), &audio(4, 1)).unwrap();
		handle.join().unwrap();

		let deadline = Instant::now() + Duration::from_millis(100);
		let first = source.read(deadline).unwrap();
		let second = source.read(deadline).unwrap();

		assert_eq!(first.samples, vec![1, 2, 3, 4]);
		assert_eq!(second.samples, vec![5, 6, 7, 8]);
		assert_eq!(second.sequence, first.sequence + 1);

		// the trailing partial block is discarded at EOF
		assert!(matches!(source.read(deadline), Err(Error::SourceClosed)));
	}

	#[test]
	fn capture_downmixes_stereo()
	{
		let bytes = pcm_bytes(&[100, 300, -50, -150]);
		let (mut source, handle) = CaptureSource::spawn(Cursor::new(bytes), &audio(2, 2)).unwrap();
		handle.join().unwrap();

		let block = source.read(Instant::now() + Duration::from_millis(100)).unwrap();
		assert_eq!(block.samples, vec![200, -100]);
	}

	#[test]
	fn capture_underruns_at_deadline()
	{
		let (_tx, rx) = std::sync::mpsc::channel::<u8>();
		// a reader that never yields data
		struct Stall(std::sync::mpsc::Receiver<u8>);
		impl Read for Stall {
			fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
				let _ = self.0.recv();
				Ok(0)
			}
		}

		let (mut source, _handle) = CaptureSource::spawn(Stall(rx), &audio(4, 1)).unwrap();

		let started = Instant::now();
		let res = source.read(started + Duration::from_millis(20));

		assert!(matches!(res, Err(Error::Underrun)));
		assert!(started.elapsed() < Duration::from_millis(500));
	}

	#[test]
	fn tone_has_requested_amplitude_and_limit()
	{
		let mut tone = ToneSource::new(48000.0, 1000.0, 0.5, 480).limit(2);
		let deadline = Instant::now();

		let block = tone.read(deadline).unwrap();
		let peak = block.samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
		assert_eq!(block.len(), 480);
		assert!(peak > 16000 && peak <= 16384, "peak = {}", peak);

		tone.read(deadline).unwrap();
		assert!(matches!(tone.read(deadline), Err(Error::SourceClosed)));
	}

	#[test]
	fn realtime_tone_underruns_before_block_is_due()
	{
		let mut tone = ToneSource::new(1000.0, 10.0, 1.0, 100).realtime();

		// the first block needs 100 ms of "capture"
		let res = tone.read(Instant::now() + Duration::from_millis(5));
		assert!(matches!(res, Err(Error::Underrun)));
	}

	#[test]
	fn realtime_pacing_survives_long_runs()
	{
		let tone = ToneSource::new(48000.0, 440.0, 0.5, 256);

		// far past where a 32 bit block counter would wrap
		let blocks = u32::MAX as u64 * 4;
		let expected = 256.0 * blocks as f64 / 48000.0;

		let offset = tone.due_offset(blocks).as_secs_f64();
		assert!((offset - expected).abs() / expected < 1e-9);
	}
}
