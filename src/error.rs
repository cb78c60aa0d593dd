// vim: noet

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error
{
	/// The sample source had no block ready before the read deadline.
	#[error("audio source underrun")]
	Underrun,

	/// The sample source will never deliver data again (e.g. EOF on stdin).
	#[error("audio source closed")]
	SourceClosed,

	#[error("invalid window size {0}: must be a power of two and at least 4")]
	InvalidWindowSize(usize),

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("unknown effect '{0}'")]
	UnknownEffect(String),

	#[error("unknown palette '{0}'")]
	UnknownPalette(String),

	#[error("output sink took {elapsed:?}, budget is {budget:?}")]
	SinkOverloaded { elapsed: Duration, budget: Duration },

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("failed to parse config file: {0}")]
	ConfigParse(#[from] toml::de::Error),
}
