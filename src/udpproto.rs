// vim: noet

/*
 * Output sink speaking the WLED realtime UDP protocol. Matrices up to 490
 * pixels go out as a single DRGB packet, larger ones as a series of DNRGB
 * packets carrying their start index.
 */

use std::net::Ipv4Addr;
use std::net::SocketAddrV4;
use std::net::UdpSocket;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::sink::FrameSink;

const MAX_PACKET_LEN: usize = 1470;
const TIMEOUT_SEC: u8 = 3;
const WLED_MODE_DRGB: u8 = 2;
const WLED_MODE_DNRGB: u8 = 4;

const DRGB_MAX_LEDS: usize = 490;
const DNRGB_HEADER_LEN: usize = 4;
const DNRGB_MAX_LEDS: usize = (MAX_PACKET_LEN - DNRGB_HEADER_LEN) / 3;
// DNRGB start indices are 16 bit
const MAX_LEDS: usize = u16::MAX as usize;

pub struct UdpSink
{
	socket:     UdpSocket,
	packet:     Vec<u8>,
	serpentine: bool,
}

impl UdpSink
{
	pub fn new(target_address: &str, serpentine: bool) -> std::io::Result<UdpSink>
	{
		let u = UdpSink {
			socket: UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?,
			packet: Vec::with_capacity(MAX_PACKET_LEN),
			serpentine,
		};

		u.socket.connect(target_address)?;
		u.socket.set_nonblocking(true)?;

		Ok(u)
	}

	/// Position of pixel (x, y) on the LED chain.
	fn led_index(&self, x: usize, y: usize, width: usize) -> usize
	{
		if self.serpentine && (y % 2) == 1 {
			y * width + (width - x - 1)
		} else {
			y * width + x
		}
	}

	fn chain_order(&self, frame: &Frame) -> Vec<[u8; 3]>
	{
		let width = frame.width();
		let mut leds = vec![[0u8; 3]; frame.pixels.len()];

		for (y, row) in frame.pixels.rows().enumerate() {
			for (x, color) in row.iter().enumerate() {
				leds[self.led_index(x, y, width)] = color.to_rgb8();
			}
		}

		leds
	}

	fn commit(&mut self) -> std::io::Result<()>
	{
		self.socket.send(&self.packet)?;
		Ok( () )
	}
}

impl FrameSink for UdpSink
{
	fn submit(&mut self, frame: &Frame) -> Result<()>
	{
		if frame.pixels.len() > MAX_LEDS {
			return Err(Error::InvalidConfig(format!(
				"{} LEDs exceed the {} addressable over UDP", frame.pixels.len(), MAX_LEDS)));
		}

		let leds = self.chain_order(frame);

		if leds.len() <= DRGB_MAX_LEDS {
			self.packet.clear();
			self.packet.push(WLED_MODE_DRGB);
			self.packet.push(TIMEOUT_SEC);
			self.packet.extend(leds.iter().flatten());
			self.commit()?;
		} else {
			for (chunk_idx, chunk) in leds.chunks(DNRGB_MAX_LEDS).enumerate() {
				let start = (chunk_idx * DNRGB_MAX_LEDS) as u16; // bounded by MAX_LEDS

				self.packet.clear();
				self.packet.push(WLED_MODE_DNRGB);
				self.packet.push(TIMEOUT_SEC);
				self.packet.extend_from_slice(&start.to_be_bytes());
				self.packet.extend(chunk.iter().flatten());
				self.commit()?;
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	use std::time::Duration;

	use crate::config::MatrixConfig;
	use crate::frame::Color;

	fn receiver() -> (UdpSocket, String)
	{
		let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
		socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
		let addr = socket.local_addr().unwrap().to_string();
		(socket, addr)
	}

	#[test]
	fn sends_drgb_in_serpentine_order()
	{
		let (rx, addr) = receiver();
		let mut sink = UdpSink::new(&addr, true).unwrap();

		let mut frame = Frame::new(&MatrixConfig { width: 3, height: 2 });
		frame.pixels.set(0, 1, Color::new(1.0, 0.0, 0.0));
		frame.pixels.set(2, 0, Color::new(0.0, 0.0, 1.0));
		sink.submit(&frame).unwrap();

		let mut buf = [0u8; MAX_PACKET_LEN];
		let len = rx.recv(&mut buf).unwrap();

		assert_eq!(len, 2 + 3 * 6);
		assert_eq!(buf[0], WLED_MODE_DRGB);
		assert_eq!(buf[1], TIMEOUT_SEC);
		// (2, 0) is LED 2, (0, 1) is LED 5 on the reversed second row
		assert_eq!(&buf[2 + 3*2 .. 2 + 3*3], &[0, 0, 255]);
		assert_eq!(&buf[2 + 3*5 .. 2 + 3*6], &[255, 0, 0]);
	}

	#[test]
	fn large_matrices_use_indexed_packets()
	{
		let (rx, addr) = receiver();
		let mut sink = UdpSink::new(&addr, false).unwrap();

		let frame = Frame::new(&MatrixConfig { width: 32, height: 20 });
		sink.submit(&frame).unwrap();

		let mut buf = [0u8; MAX_PACKET_LEN];
		let first = rx.recv(&mut buf).unwrap();
		assert_eq!(buf[0], WLED_MODE_DNRGB);
		assert_eq!(&buf[2..4], &[0, 0]);
		assert_eq!(first, DNRGB_HEADER_LEN + 3 * DNRGB_MAX_LEDS);

		let second = rx.recv(&mut buf).unwrap();
		assert_eq!(u16::from_be_bytes([buf[2], buf[3]]) as usize, DNRGB_MAX_LEDS);
		assert_eq!(second, DNRGB_HEADER_LEN + 3 * (640 - DNRGB_MAX_LEDS));
	}

	#[test]
	fn rejects_matrices_beyond_indexable_range()
	{
		let (rx, addr) = receiver();
		rx.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
		let mut sink = UdpSink::new(&addr, false).unwrap();

		let frame = Frame::new(&MatrixConfig { width: 256, height: 257 });
		assert!(matches!(sink.submit(&frame), Err(Error::InvalidConfig(_))));

		// nothing was sent
		let mut buf = [0u8; MAX_PACKET_LEN];
		assert!(rx.recv(&mut buf).is_err());
	}
}
