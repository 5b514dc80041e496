//! Service and connection configuration with defaults and validation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable consulted when no app id is configured.
pub const APP_ID_ENV_VAR: &str = "RTC_APP_ID";
/// Environment variable consulted when no app certificate is configured.
pub const APP_CERT_ENV_VAR: &str = "RTC_APP_CERT";

pub const DEFAULT_CHANNEL_NAME: &str = "rtc_pcm_example";
pub const DEFAULT_USER_ID: &str = "0";
pub const DEFAULT_BASE_DIR: &str = "./rtc_example";
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_PCM_QUEUE_SIZE: usize = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-level settings: credentials, identity and engine directories.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub app_id: String,
    pub app_cert: String,
    pub user_id: String,
    pub channel_name: String,
    /// Pre-issued session token. When `None` a token provider (if any) is asked.
    pub token: Option<String>,
    pub log_path: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let base = PathBuf::from(DEFAULT_BASE_DIR);
        Self {
            app_id: String::new(),
            app_cert: String::new(),
            user_id: DEFAULT_USER_ID.to_string(),
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            token: None,
            log_path: base.join("logs").join("rtc.log"),
            config_dir: base.join("config"),
            data_dir: base.join("data"),
        }
    }
}

impl ServiceConfig {
    /// Fill an empty app id / certificate from the environment.
    pub fn resolve_env(mut self) -> Self {
        self.resolve_with(|key| std::env::var(key).ok());
        self
    }

    fn resolve_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.app_id.trim().is_empty() {
            if let Some(v) = lookup(APP_ID_ENV_VAR) {
                self.app_id = v;
            }
        }
        if self.app_cert.trim().is_empty() {
            if let Some(v) = lookup(APP_CERT_ENV_VAR) {
                self.app_cert = v;
            }
        }
    }

    /// Check required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::EmptyAppId);
        }
        if self.app_cert.trim().is_empty() {
            return Err(ConfigError::EmptyAppCert);
        }
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::EmptyUserId);
        }
        if self.channel_name.trim().is_empty() {
            return Err(ConfigError::EmptyChannelName);
        }
        Ok(())
    }
}

/// How received frames are handed to the application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioMode {
    /// Push each received frame straight back into the engine.
    Direct,
    /// Enqueue received frames for the application to fetch.
    #[default]
    Queued,
}

impl TryFrom<i32> for AudioMode {
    type Error = ConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AudioMode::Direct),
            1 => Ok(AudioMode::Queued),
            other => Err(ConfigError::InvalidAudioMode(other.to_string())),
        }
    }
}

impl FromStr for AudioMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "0" => Ok(AudioMode::Direct),
            "queued" | "queue" | "channel" | "1" => Ok(AudioMode::Queued),
            _ => Err(ConfigError::InvalidAudioMode(s.to_string())),
        }
    }
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioMode::Direct => f.write_str("direct"),
            AudioMode::Queued => f.write_str("queued"),
        }
    }
}

/// Channel layout negotiated with the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioChannels {
    #[default]
    Mono,
    Stereo,
}

impl AudioChannels {
    pub fn count(self) -> u16 {
        match self {
            AudioChannels::Mono => 1,
            AudioChannels::Stereo => 2,
        }
    }
}

impl TryFrom<u16> for AudioChannels {
    type Error = ConfigError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AudioChannels::Mono),
            2 => Ok(AudioChannels::Stereo),
            other => Err(ConfigError::InvalidChannels(other.to_string())),
        }
    }
}

impl FromStr for AudioChannels {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mono" | "1" => Ok(AudioChannels::Mono),
            "stereo" | "2" => Ok(AudioChannels::Stereo),
            _ => Err(ConfigError::InvalidChannels(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientRole {
    #[default]
    Broadcaster,
    Audience,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelProfile {
    Communication,
    #[default]
    LiveBroadcasting,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioPublishType {
    NoPublish,
    #[default]
    Pcm,
    EncodedPcm,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioScenario {
    #[default]
    Default,
    Chorus,
    AiServer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioProfile {
    #[default]
    Default,
    SpeechStandard,
    MusicStandard,
    MusicHighQuality,
}

/// What a connection publishes once connected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishConfig {
    pub publish_type: AudioPublishType,
    pub scenario: AudioScenario,
    pub profile: AudioProfile,
    pub publish_audio: bool,
    pub publish_video: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            publish_type: AudioPublishType::Pcm,
            scenario: AudioScenario::Default,
            profile: AudioProfile::Default,
            publish_audio: true,
            publish_video: false,
        }
    }
}

/// Per-connection settings.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Sample rate used for pushed PCM and for received frames.
    pub sample_rate: u32,
    pub channels: AudioChannels,
    pub audio_mode: AudioMode,
    /// Forward frames from the engine's frame hook into `audio_mode` handling.
    pub receive_audio_frames: bool,
    /// Frame queue capacity; `0` disables the queue.
    pub pcm_queue_size: usize,
    pub auto_subscribe_audio: bool,
    pub auto_subscribe_video: bool,
    pub client_role: ClientRole,
    pub channel_profile: ChannelProfile,
    pub publish: PublishConfig,
    /// How long to wait for the connected event after `connect`.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: AudioChannels::Mono,
            audio_mode: AudioMode::Queued,
            receive_audio_frames: false,
            pcm_queue_size: DEFAULT_PCM_QUEUE_SIZE,
            auto_subscribe_audio: true,
            auto_subscribe_video: false,
            client_role: ClientRole::Broadcaster,
            channel_profile: ChannelProfile::LiveBroadcasting,
            publish: PublishConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Whether the local audio track goes out as soon as the connection is up, without an
    /// explicit `publish_audio` call.
    pub fn publishes_audio_on_connect(&self) -> bool {
        self.client_role == ClientRole::Broadcaster
            && self.publish.publish_audio
            && self.publish.publish_type != AudioPublishType::NoPublish
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.receive_audio_frames
            && self.audio_mode == AudioMode::Queued
            && self.pcm_queue_size == 0
        {
            return Err(ConfigError::InvalidQueueSize);
        }
        Ok(())
    }
}
