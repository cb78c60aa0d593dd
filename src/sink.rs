// vim: noet

use crate::error::Result;
use crate::frame::Frame;

/// Consumer of finished frames (the display driver). `submit` must return
/// quickly; the scheduler measures it against its budget.
pub trait FrameSink
{
	fn submit(&mut self, frame: &Frame) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S>
{
	fn submit(&mut self, frame: &Frame) -> Result<()>
	{
		(**self).submit(frame)
	}
}

/// Discards every frame.
pub struct NullSink;

impl FrameSink for NullSink
{
	fn submit(&mut self, _frame: &Frame) -> Result<()>
	{
		Ok(())
	}
}
