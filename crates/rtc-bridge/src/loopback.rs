//! In-process engine used when no native engine is linked.
//!
//! Connections that join the same channel name form a room. PCM pushed by one member is
//! cut into 10 ms frames on that member's worker thread and handed to every *other*
//! member's frame hook, optionally paced in real time. A connection never hears itself.
//!
//! Only published audio is sent: a broadcaster publishes on connect when its publish
//! config carries audio, or later through `publish_audio`. Audience connections cannot
//! publish. Members created with `auto_subscribe_audio` off receive no frames.
//!
//! Frames are delivered in the sender's format; the loopback engine does not resample
//! to the receiver's playback parameters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::config::{ClientRole, ConnectionConfig, ServiceConfig};
use crate::engine::{
    ConnectionInfo, ConnectionObserver, EngineConnection, PublishState, RtcEngine,
};
use crate::error::EngineError;
use crate::frame::{AudioFrame, PCM16_BYTES_PER_SAMPLE};

pub const ERR_INVALID_ARGUMENT: i32 = -2;
pub const ERR_NOT_READY: i32 = -3;
pub const ERR_REFUSED: i32 = -5;
pub const ERR_NOT_INITIALIZED: i32 = -7;

/// Reason code reported with connection state callbacks.
const REASON_OK: i32 = 0;
/// Reason code reported when a peer leaves voluntarily.
const REASON_QUIT: i32 = 0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tuning for the loopback engine.
#[derive(Clone, Debug)]
pub struct LoopbackSettings {
    /// Duration of one delivered frame.
    pub frame_duration: Duration,
    /// Sleep `frame_duration` between frames so delivery runs at playback speed.
    pub paced: bool,
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            frame_duration: Duration::from_millis(10),
            paced: true,
        }
    }
}

/// Loopback implementation of [`RtcEngine`].
pub struct LoopbackEngine {
    settings: LoopbackSettings,
    hub: Arc<Hub>,
    initialized: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl LoopbackEngine {
    pub fn new(settings: LoopbackSettings) -> Self {
        Self {
            settings,
            hub: Arc::new(Hub::default()),
            initialized: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Number of connected peers in `channel_id`.
    pub fn room_size(&self, channel_id: &str) -> usize {
        lock(&self.hub.rooms)
            .get(channel_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(LoopbackSettings::default())
    }
}

impl RtcEngine for LoopbackEngine {
    fn initialize(&self, config: &ServiceConfig) -> Result<(), EngineError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(EngineError::new("initialize engine", ERR_NOT_READY));
        }
        tracing::info!(
            channel = %config.channel_name,
            user = %config.user_id,
            paced = self.settings.paced,
            "loopback engine initialized"
        );
        // Nothing is written to disk; the paths only matter to native engines.
        tracing::debug!(
            log_path = %config.log_path.display(),
            config_dir = %config.config_dir.display(),
            data_dir = %config.data_dir.display(),
            "engine paths not used by the loopback engine"
        );
        Ok(())
    }

    fn release(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            tracing::info!("loopback engine released");
        }
    }

    fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn EngineConnection>, EngineError> {
        if !self.is_initialized() {
            return Err(EngineError::new("create connection", ERR_NOT_INITIALIZED));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = LoopbackConnection::spawn(
            id,
            config,
            self.hub.clone(),
            self.initialized.clone(),
            self.settings.clone(),
        );
        tracing::debug!(
            id,
            sample_rate = config.sample_rate,
            channels = config.channels.count(),
            role = ?config.client_role,
            profile = ?config.channel_profile,
            subscribe_audio = config.auto_subscribe_audio,
            publish_on_connect = config.publishes_audio_on_connect(),
            "loopback connection created"
        );
        Ok(Arc::new(conn))
    }
}

#[derive(Default)]
struct Hub {
    rooms: Mutex<HashMap<String, Vec<Arc<Peer>>>>,
}

impl Hub {
    /// Members of `channel_id` other than `id`.
    fn others(&self, channel_id: &str, id: u64) -> Vec<Arc<Peer>> {
        lock(&self.rooms)
            .get(channel_id)
            .map(|room| room.iter().filter(|p| p.id != id).cloned().collect())
            .unwrap_or_default()
    }

    /// Add `peer` to the session's room and return the members already there, plus
    /// whether this join started publishing its audio track.
    ///
    /// `None` if the peer no longer holds `session`; the check runs under the room lock so
    /// a concurrent `disconnect` either sees the peer in the room or keeps it out.
    fn join(
        &self,
        peer: &Arc<Peer>,
        session: &Session,
        publish: bool,
    ) -> Option<(Vec<Arc<Peer>>, bool)> {
        let mut rooms = lock(&self.rooms);
        if peer.session().as_ref() != Some(session) {
            return None;
        }
        let room = rooms.entry(session.channel_id.clone()).or_default();
        let existing = room.clone();
        room.push(peer.clone());
        let started = publish && !peer.publishing_audio.swap(true, Ordering::AcqRel);
        Some((existing, started))
    }

    fn leave(&self, channel_id: &str, id: u64) -> Vec<Arc<Peer>> {
        let mut rooms = lock(&self.rooms);
        let Some(room) = rooms.get_mut(channel_id) else {
            return Vec::new();
        };
        room.retain(|p| p.id != id);
        let remaining = room.clone();
        if room.is_empty() {
            rooms.remove(channel_id);
        }
        remaining
    }
}

/// State shared between a connection, its worker and the hub.
struct Peer {
    id: u64,
    subscribe_audio: bool,
    publishing_audio: AtomicBool,
    observer: Mutex<Option<Arc<dyn ConnectionObserver>>>,
    session: Mutex<Option<Session>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Session {
    channel_id: String,
    user_id: String,
    /// Distinguishes successive connects of the same connection.
    generation: u64,
}

impl Peer {
    fn observer(&self) -> Option<Arc<dyn ConnectionObserver>> {
        lock(&self.observer).clone()
    }

    fn session(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    fn info(&self, session: &Session) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            channel_id: session.channel_id.clone(),
            local_user_id: session.user_id.clone(),
        }
    }

    fn is_publishing_audio(&self) -> bool {
        self.publishing_audio.load(Ordering::Acquire)
    }
}

/// Report a newly published audio track to its owner and to subscribed room members.
fn announce_publish(peer: &Peer, hub: &Hub, session: &Session) {
    if let Some(obs) = peer.observer() {
        obs.on_audio_publish_state_changed(
            &session.channel_id,
            PublishState::Idle,
            PublishState::Publishing,
        );
        obs.on_audio_publish_state_changed(
            &session.channel_id,
            PublishState::Publishing,
            PublishState::Published,
        );
        obs.on_audio_track_publish_success();
    }
    for other in hub.others(&session.channel_id, peer.id) {
        if !other.subscribe_audio {
            continue;
        }
        if let Some(obs) = other.observer() {
            obs.on_user_audio_track_subscribed(&session.user_id);
        }
    }
}

/// Stop publishing audio, reporting it to the owner if the track was out.
fn unpublish(peer: &Peer, session: &Session) {
    if !peer.publishing_audio.swap(false, Ordering::AcqRel) {
        return;
    }
    if let Some(obs) = peer.observer() {
        obs.on_audio_publish_state_changed(
            &session.channel_id,
            PublishState::Published,
            PublishState::Idle,
        );
        obs.on_audio_track_unpublished();
    }
}

struct PushJob {
    data: Vec<u8>,
    sample_rate: u32,
    channels: u16,
}

/// Loopback implementation of [`EngineConnection`].
pub struct LoopbackConnection {
    peer: Arc<Peer>,
    hub: Arc<Hub>,
    engine_alive: Arc<AtomicBool>,
    role: ClientRole,
    publish_on_connect: bool,
    publishing_video: AtomicBool,
    generation: AtomicU64,
    pending: Arc<AtomicUsize>,
    jobs: Mutex<Option<Sender<PushJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl LoopbackConnection {
    fn spawn(
        id: u64,
        config: &ConnectionConfig,
        hub: Arc<Hub>,
        engine_alive: Arc<AtomicBool>,
        settings: LoopbackSettings,
    ) -> Self {
        let peer = Arc::new(Peer {
            id,
            subscribe_audio: config.auto_subscribe_audio,
            publishing_audio: AtomicBool::new(false),
            observer: Mutex::new(None),
            session: Mutex::new(None),
        });
        let pending = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = {
            let peer = peer.clone();
            let hub = hub.clone();
            let pending = pending.clone();
            thread::Builder::new()
                .name(format!("loopback-push-{id}"))
                .spawn(move || run_push_worker(rx, peer, hub, pending, settings))
                .ok()
        };
        if worker.is_none() {
            tracing::warn!(id, "failed to spawn loopback push worker");
        }

        Self {
            peer,
            hub,
            engine_alive,
            role: config.client_role,
            publish_on_connect: config.publishes_audio_on_connect(),
            publishing_video: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            pending,
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(worker),
            released: AtomicBool::new(false),
        }
    }

    fn ensure_usable(&self, op: &'static str) -> Result<(), EngineError> {
        if self.released.load(Ordering::Acquire) || !self.engine_alive.load(Ordering::Acquire) {
            return Err(EngineError::new(op, ERR_NOT_INITIALIZED));
        }
        Ok(())
    }

    fn ensure_connected(&self, op: &'static str) -> Result<Session, EngineError> {
        self.ensure_usable(op)?;
        self.peer
            .session()
            .ok_or_else(|| EngineError::new(op, ERR_NOT_READY))
    }

    fn ensure_broadcaster(&self, op: &'static str) -> Result<(), EngineError> {
        if self.role == ClientRole::Audience {
            return Err(EngineError::new(op, ERR_REFUSED));
        }
        Ok(())
    }
}

impl EngineConnection for LoopbackConnection {
    fn register_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        *lock(&self.peer.observer) = Some(observer);
    }

    fn set_playback_params(&self, channels: u16, sample_rate: u32) -> Result<(), EngineError> {
        self.ensure_usable("set playback parameters")?;
        if channels == 0 || channels > 2 || sample_rate == 0 {
            return Err(EngineError::new("set playback parameters", ERR_INVALID_ARGUMENT));
        }
        tracing::debug!(id = self.peer.id, channels, sample_rate, "playback parameters set");
        Ok(())
    }

    fn connect(&self, _token: &str, channel_id: &str, user_id: &str) -> Result<(), EngineError> {
        self.ensure_usable("connect")?;
        if channel_id.is_empty() || user_id.is_empty() {
            return Err(EngineError::new("connect", ERR_INVALID_ARGUMENT));
        }
        let session = Session {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
        };
        {
            let mut current = lock(&self.peer.session);
            if current.is_some() {
                return Err(EngineError::new("connect", ERR_NOT_READY));
            }
            *current = Some(session.clone());
        }

        let peer = self.peer.clone();
        let hub = self.hub.clone();
        let publish_on_connect = self.publish_on_connect;
        // Connection events arrive asynchronously, like a real engine's network thread.
        let spawned = thread::Builder::new()
            .name(format!("loopback-connect-{}", peer.id))
            .spawn(move || {
                let info = peer.info(&session);
                if let Some(obs) = peer.observer() {
                    obs.on_connecting(&info, REASON_OK);
                }
                // The track is live before `on_connected` so pushes right after it succeed.
                let Some((existing, announce)) = hub.join(&peer, &session, publish_on_connect)
                else {
                    tracing::debug!(id = peer.id, "disconnected before joining the room");
                    return;
                };

                if let Some(obs) = peer.observer() {
                    obs.on_connected(&info, REASON_OK);
                }
                for other in existing {
                    if let Some(obs) = other.observer() {
                        obs.on_user_joined(&session.user_id);
                    }
                    let (Some(obs), Some(theirs)) = (peer.observer(), other.session()) else {
                        continue;
                    };
                    obs.on_user_joined(&theirs.user_id);
                    if peer.subscribe_audio && other.is_publishing_audio() {
                        obs.on_user_audio_track_subscribed(&theirs.user_id);
                    }
                }
                if announce {
                    announce_publish(&peer, &hub, &session);
                }
            });
        if spawned.is_err() {
            *lock(&self.peer.session) = None;
            return Err(EngineError::new("connect", ERR_NOT_READY));
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), EngineError> {
        let session = self.ensure_connected("disconnect")?;
        *lock(&self.peer.session) = None;
        self.publishing_video.store(false, Ordering::Relaxed);
        unpublish(&self.peer, &session);

        let remaining = self.hub.leave(&session.channel_id, self.peer.id);
        for other in remaining {
            if let Some(obs) = other.observer() {
                obs.on_user_left(&session.user_id, REASON_QUIT);
            }
        }
        if let Some(obs) = self.peer.observer() {
            obs.on_disconnected(&self.peer.info(&session), REASON_OK);
        }
        Ok(())
    }

    fn publish_audio(&self) -> Result<(), EngineError> {
        const OP: &str = "publish audio";
        let session = self.ensure_connected(OP)?;
        self.ensure_broadcaster(OP)?;
        if !self.peer.publishing_audio.swap(true, Ordering::AcqRel) {
            tracing::debug!(id = self.peer.id, user = %session.user_id, "publishing audio");
            announce_publish(&self.peer, &self.hub, &session);
        }
        Ok(())
    }

    /// Accepted for broadcasters; the loopback engine carries no video.
    fn publish_video(&self) -> Result<(), EngineError> {
        const OP: &str = "publish video";
        let session = self.ensure_connected(OP)?;
        self.ensure_broadcaster(OP)?;
        if !self.publishing_video.swap(true, Ordering::Relaxed) {
            tracing::debug!(id = self.peer.id, user = %session.user_id, "publishing video");
        }
        Ok(())
    }

    fn push_pcm(
        &self,
        data: &[u8],
        sample_rate: u32,
        channels: u16,
        _start_pts_ms: i64,
    ) -> Result<(), EngineError> {
        const OP: &str = "push audio pcm data";
        self.ensure_connected(OP)?;
        self.ensure_broadcaster(OP)?;
        if !self.peer.is_publishing_audio() {
            return Err(EngineError::new(OP, ERR_REFUSED));
        }
        let stride = channels as usize * PCM16_BYTES_PER_SAMPLE;
        if data.is_empty() || sample_rate == 0 || stride == 0 || data.len() % stride != 0 {
            return Err(EngineError::new(OP, ERR_INVALID_ARGUMENT));
        }

        let jobs = lock(&self.jobs);
        let Some(tx) = jobs.as_ref() else {
            return Err(EngineError::new(OP, ERR_NOT_INITIALIZED));
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        let job = PushJob {
            data: data.to_vec(),
            sample_rate,
            channels,
        };
        if tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(EngineError::new(OP, ERR_NOT_READY));
        }
        Ok(())
    }

    fn is_push_completed(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(session) = self.peer.session() {
            *lock(&self.peer.session) = None;
            unpublish(&self.peer, &session);
            for other in self.hub.leave(&session.channel_id, self.peer.id) {
                if let Some(obs) = other.observer() {
                    obs.on_user_left(&session.user_id, REASON_QUIT);
                }
            }
        }
        *lock(&self.peer.observer) = None;
        lock(&self.jobs).take();

        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Slice each pushed chunk into frames and fan them out to the audio subscribers in the room.
fn run_push_worker(
    rx: Receiver<PushJob>,
    peer: Arc<Peer>,
    hub: Arc<Hub>,
    pending: Arc<AtomicUsize>,
    settings: LoopbackSettings,
) {
    let frames_per_second = (1000 / settings.frame_duration.as_millis().max(1)).max(1) as u32;

    for job in rx.iter() {
        let samples_per_frame = (job.sample_rate / frames_per_second).max(1) as usize;
        let frame_bytes = samples_per_frame * job.channels as usize * PCM16_BYTES_PER_SAMPLE;

        for chunk in job.data.chunks(frame_bytes) {
            let Some(session) = peer.session() else {
                break;
            };
            if !peer.is_publishing_audio() {
                break;
            }
            let frame = AudioFrame::pcm16(chunk.to_vec(), job.sample_rate, job.channels);
            for other in hub.others(&session.channel_id, peer.id) {
                if !other.subscribe_audio {
                    continue;
                }
                if let Some(obs) = other.observer() {
                    if !obs.on_playback_frame_before_mixing(
                        &session.channel_id,
                        &session.user_id,
                        &frame,
                    ) {
                        tracing::trace!(to = other.id, "frame hook reported unhandled frame");
                    }
                }
            }
            if settings.paced {
                thread::sleep(settings.frame_duration);
            }
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
}
