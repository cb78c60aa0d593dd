// vim: noet

//! Audio-reactive rendering pipeline for LED matrices.
//!
//! Audio flows from a [`source::SampleSource`] through the
//! [`window::WindowBuffer`], the FFT in [`signal_processing`] and the
//! [`features::FeatureExtractor`] into the [`animation::EffectEngine`]; the
//! [`scheduler::FrameScheduler`] drives it at a fixed frame rate and hands
//! every frame to a [`sink::FrameSink`]. Other tasks talk to the running
//! pipeline only through [`state::SharedState`].

pub mod animation;
pub mod config;
pub mod error;
pub mod features;
pub mod frame;
pub mod palette;
pub mod scheduler;
pub mod signal_processing;
pub mod sink;
pub mod source;
pub mod state;
pub mod udpproto;
pub mod window;

pub use crate::error::{Error, Result};
