//! Seams to the real-time engine.
//!
//! The engine owns transport, jitter buffering and mixing; this crate only drives it
//! through these traits. Callbacks on [`ConnectionObserver`] arrive on engine-owned
//! threads and must return quickly.

use std::sync::Arc;

use crate::config::{ConnectionConfig, ServiceConfig};
use crate::error::EngineError;
use crate::frame::AudioFrame;

/// Identity of a connection as reported in engine events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub channel_id: String,
    pub local_user_id: String,
}

/// Publish state of the local audio track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PublishState {
    #[default]
    Idle,
    NoPublish,
    Publishing,
    Published,
}

/// Connection and media events raised by the engine.
///
/// Every method has a no-op default so implementors only override what they need.
#[allow(unused_variables)]
pub trait ConnectionObserver: Send + Sync {
    fn on_connected(&self, info: &ConnectionInfo, reason: i32) {}
    fn on_disconnected(&self, info: &ConnectionInfo, reason: i32) {}
    fn on_connecting(&self, info: &ConnectionInfo, reason: i32) {}
    fn on_reconnecting(&self, info: &ConnectionInfo, reason: i32) {}
    fn on_reconnected(&self, info: &ConnectionInfo, reason: i32) {}
    fn on_connection_lost(&self, info: &ConnectionInfo) {}
    fn on_connection_failure(&self, info: &ConnectionInfo, code: i32) {}
    fn on_user_joined(&self, user_id: &str) {}
    fn on_user_left(&self, user_id: &str, reason: i32) {}

    fn on_audio_publish_state_changed(
        &self,
        channel_id: &str,
        old_state: PublishState,
        new_state: PublishState,
    ) {
    }
    fn on_audio_track_publish_success(&self) {}
    fn on_audio_track_unpublished(&self) {}
    /// A remote user's audio track is now being received by this connection.
    fn on_user_audio_track_subscribed(&self, user_id: &str) {}

    /// Called once per remote audio frame, before mixing.
    ///
    /// Returning `false` tells the engine the frame was not handled.
    fn on_playback_frame_before_mixing(
        &self,
        channel_id: &str,
        user_id: &str,
        frame: &AudioFrame,
    ) -> bool {
        true
    }
}

/// A process-wide engine instance.
pub trait RtcEngine: Send + Sync {
    /// Bring the engine up. Called once per [`Service`](crate::service::Service).
    fn initialize(&self, config: &ServiceConfig) -> Result<(), EngineError>;

    /// Tear the engine down. Called once, after every connection is gone.
    fn release(&self);

    fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn EngineConnection>, EngineError>;
}

/// One engine-side connection to a channel.
pub trait EngineConnection: Send + Sync {
    fn register_observer(&self, observer: Arc<dyn ConnectionObserver>);

    /// Format of frames delivered to `on_playback_frame_before_mixing`.
    ///
    /// Must be set before registering observers.
    fn set_playback_params(&self, channels: u16, sample_rate: u32) -> Result<(), EngineError>;

    fn connect(&self, token: &str, channel_id: &str, user_id: &str) -> Result<(), EngineError>;
    fn disconnect(&self) -> Result<(), EngineError>;
    /// Start sending the local audio track. Fails for audience connections.
    fn publish_audio(&self) -> Result<(), EngineError>;
    fn publish_video(&self) -> Result<(), EngineError>;

    /// Send interleaved 16-bit little-endian PCM. The audio track must be published.
    fn push_pcm(
        &self,
        data: &[u8],
        sample_rate: u32,
        channels: u16,
        start_pts_ms: i64,
    ) -> Result<(), EngineError>;

    /// `true` once every pushed chunk has been handed to the network.
    fn is_push_completed(&self) -> bool;

    fn release(&self);
}
