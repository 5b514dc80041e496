//! A connected channel session.
//!
//! [`RtcConnection`] wires the engine's frame hook to a [`FrameQueue`] (queued mode) or
//! straight back into the engine (direct mode), and forwards every other event to an
//! optional application observer.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::config::{AudioChannels, AudioMode, ConnectionConfig};
use crate::engine::{ConnectionInfo, ConnectionObserver, EngineConnection, PublishState};
use crate::error::{EngineError, Error, FetchError, Result};
use crate::frame::AudioFrame;
use crate::queue::{FrameQueue, QueueStats};
use crate::service::EngineGuard;

/// Engine connection plus the receive-side frame queue.
pub struct RtcConnection {
    engine_conn: Arc<dyn EngineConnection>,
    queue: Option<Arc<FrameQueue<AudioFrame>>>,
    sample_rate: u32,
    channels: AudioChannels,
    audio_mode: AudioMode,
    // Dropped last so the engine outlives the connection.
    _engine: Arc<EngineGuard>,
}

impl RtcConnection {
    pub(crate) fn open(
        guard: Arc<EngineGuard>,
        token: &str,
        channel_name: &str,
        user_id: &str,
        config: ConnectionConfig,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Result<Self> {
        config.validate()?;

        let engine_conn = guard.engine.create_connection(&config)?;
        let queue = if config.pcm_queue_size > 0 {
            Some(Arc::new(FrameQueue::new(config.pcm_queue_size)?))
        } else {
            None
        };

        let conn = Self {
            engine_conn,
            queue,
            sample_rate: config.sample_rate,
            channels: config.channels,
            audio_mode: config.audio_mode,
            _engine: guard,
        };

        // Frame format has to be fixed before observers are registered.
        conn.engine_conn
            .set_playback_params(config.channels.count(), config.sample_rate)?;

        let (connected_tx, connected_rx) = crossbeam_channel::bounded(1);
        let dispatcher = FrameDispatcher {
            engine_conn: Arc::downgrade(&conn.engine_conn),
            queue: conn.queue.clone(),
            audio_mode: config.audio_mode,
            receive_audio_frames: config.receive_audio_frames,
            user: observer,
            connected_tx,
        };
        conn.engine_conn.register_observer(Arc::new(dispatcher));

        conn.engine_conn.connect(token, channel_name, user_id)?;
        if connected_rx.recv_timeout(config.connect_timeout).is_err() {
            return Err(Error::ConnectTimeout(config.connect_timeout));
        }

        tracing::info!(
            channel = %channel_name,
            user = %user_id,
            sample_rate = config.sample_rate,
            channels = config.channels.count(),
            mode = %config.audio_mode,
            queue = config.pcm_queue_size,
            "connected"
        );
        Ok(conn)
    }

    /// Take the oldest received frame.
    ///
    /// [`FetchError::Empty`] is the normal "nothing yet" answer; poll again later.
    pub fn fetch_audio_frame(&self) -> Result<AudioFrame, FetchError> {
        let queue = self.queue.as_ref().ok_or(FetchError::QueueDisabled)?;
        queue.dequeue().ok_or(FetchError::Empty)
    }

    /// Like [`fetch_audio_frame`](Self::fetch_audio_frame) but waits up to `timeout`.
    pub fn wait_audio_frame(&self, timeout: Duration) -> Result<AudioFrame, FetchError> {
        let queue = self.queue.as_ref().ok_or(FetchError::QueueDisabled)?;
        queue.dequeue_timeout(timeout).ok_or(FetchError::Empty)
    }

    pub fn queue_stats(&self) -> Option<QueueStats> {
        self.queue.as_ref().map(|q| q.stats())
    }

    /// Send 16-bit PCM in this connection's sample rate and channel layout.
    pub fn push_audio_pcm(&self, data: &[u8], start_pts_ms: i64) -> Result<(), EngineError> {
        self.engine_conn
            .push_pcm(data, self.sample_rate, self.channels.count(), start_pts_ms)
    }

    pub fn is_push_completed(&self) -> bool {
        self.engine_conn.is_push_completed()
    }

    pub fn publish_audio(&self) -> Result<(), EngineError> {
        self.engine_conn.publish_audio()
    }

    pub fn publish_video(&self) -> Result<(), EngineError> {
        self.engine_conn.publish_video()
    }

    pub fn disconnect(&self) -> Result<(), EngineError> {
        self.engine_conn.disconnect()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> AudioChannels {
        self.channels
    }

    pub fn audio_mode(&self) -> AudioMode {
        self.audio_mode
    }
}

impl Drop for RtcConnection {
    fn drop(&mut self) {
        self.engine_conn.release();
        if let Some(q) = &self.queue {
            let discarded = q.clear();
            if discarded > 0 {
                tracing::debug!(discarded, "discarded queued frames on release");
            }
        }
    }
}

/// Observer registered with the engine on behalf of an [`RtcConnection`].
struct FrameDispatcher {
    engine_conn: Weak<dyn EngineConnection>,
    queue: Option<Arc<FrameQueue<AudioFrame>>>,
    audio_mode: AudioMode,
    receive_audio_frames: bool,
    user: Option<Arc<dyn ConnectionObserver>>,
    connected_tx: Sender<()>,
}

impl FrameDispatcher {
    fn recv_frame(&self, frame: &AudioFrame) -> Result<(), EngineError> {
        match self.audio_mode {
            AudioMode::Direct => {
                let Some(conn) = self.engine_conn.upgrade() else {
                    return Ok(());
                };
                conn.push_pcm(&frame.buffer, frame.sample_rate, frame.channels, 0)
            }
            AudioMode::Queued => {
                if let Some(q) = &self.queue {
                    if q.enqueue(frame.clone()) {
                        tracing::trace!(dropped = q.dropped(), "frame queue full; evicted oldest");
                    }
                }
                Ok(())
            }
        }
    }
}

impl ConnectionObserver for FrameDispatcher {
    fn on_connected(&self, info: &ConnectionInfo, reason: i32) {
        tracing::debug!(id = info.id, reason, "on_connected");
        if let Some(u) = &self.user {
            u.on_connected(info, reason);
        }
        let _ = self.connected_tx.try_send(());
    }

    fn on_disconnected(&self, info: &ConnectionInfo, reason: i32) {
        tracing::debug!(id = info.id, reason, "on_disconnected");
        if let Some(u) = &self.user {
            u.on_disconnected(info, reason);
        }
    }

    fn on_connecting(&self, info: &ConnectionInfo, reason: i32) {
        if let Some(u) = &self.user {
            u.on_connecting(info, reason);
        }
    }

    fn on_reconnecting(&self, info: &ConnectionInfo, reason: i32) {
        if let Some(u) = &self.user {
            u.on_reconnecting(info, reason);
        }
    }

    fn on_reconnected(&self, info: &ConnectionInfo, reason: i32) {
        if let Some(u) = &self.user {
            u.on_reconnected(info, reason);
        }
    }

    fn on_connection_lost(&self, info: &ConnectionInfo) {
        tracing::warn!(id = info.id, "connection lost");
        if let Some(u) = &self.user {
            u.on_connection_lost(info);
        }
    }

    fn on_connection_failure(&self, info: &ConnectionInfo, code: i32) {
        tracing::warn!(id = info.id, code, "connection failure");
        if let Some(u) = &self.user {
            u.on_connection_failure(info, code);
        }
    }

    fn on_user_joined(&self, user_id: &str) {
        if let Some(u) = &self.user {
            u.on_user_joined(user_id);
        }
    }

    fn on_user_left(&self, user_id: &str, reason: i32) {
        if let Some(u) = &self.user {
            u.on_user_left(user_id, reason);
        }
    }

    fn on_audio_publish_state_changed(
        &self,
        channel_id: &str,
        old_state: PublishState,
        new_state: PublishState,
    ) {
        tracing::debug!(?old_state, ?new_state, "audio publish state changed");
        if let Some(u) = &self.user {
            u.on_audio_publish_state_changed(channel_id, old_state, new_state);
        }
    }

    fn on_audio_track_publish_success(&self) {
        if let Some(u) = &self.user {
            u.on_audio_track_publish_success();
        }
    }

    fn on_audio_track_unpublished(&self) {
        if let Some(u) = &self.user {
            u.on_audio_track_unpublished();
        }
    }

    fn on_user_audio_track_subscribed(&self, user_id: &str) {
        tracing::debug!(user = %user_id, "subscribed to remote audio");
        if let Some(u) = &self.user {
            u.on_user_audio_track_subscribed(user_id);
        }
    }

    fn on_playback_frame_before_mixing(
        &self,
        channel_id: &str,
        user_id: &str,
        frame: &AudioFrame,
    ) -> bool {
        if self.receive_audio_frames {
            if let Err(e) = self.recv_frame(frame) {
                tracing::warn!("failed to handle received frame: {e}");
                return false;
            }
        }
        match &self.user {
            Some(u) => u.on_playback_frame_before_mixing(channel_id, user_id, frame),
            None => true,
        }
    }
}
