//! PCM bridge for real-time audio channels.
//!
//! ## Receive path
//! 1. **Frame hook**: the engine's callback thread hands each 10 ms frame to the
//!    connection, which enqueues it in a drop-oldest [`queue::FrameQueue`].
//! 2. **Consumer**: a thread converts frames to `i16` and appends them to a bounded
//!    [`buffer::PlaybackBuffer`] that trims its oldest samples.
//! 3. **Playback**: a ticker drains a fixed block per period (silence-padded) into an
//!    [`sink::AudioSink`], e.g. the CPAL-backed [`playback::CpalSink`].
//!
//! ## Send path
//! [`connection::RtcConnection::push_audio_pcm`] pushes 16-bit PCM in the connection's
//! format; [`connection::RtcConnection::is_push_completed`] tells when the engine drained it.
//!
//! The engine itself sits behind [`engine::RtcEngine`]; [`loopback::LoopbackEngine`] is an
//! in-process implementation where peers on the same channel hear each other.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod loopback;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod service;
pub mod sink;
pub mod status;
pub mod token;

pub use error::{Error, Result};
