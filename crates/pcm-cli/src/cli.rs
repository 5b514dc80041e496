use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use rtc_bridge::config::{AudioChannels, AudioMode, DEFAULT_CHANNEL_NAME, DEFAULT_USER_ID};

#[derive(Parser, Debug)]
#[command(name = "rtc-pcm", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Identity, credentials and audio format shared by every subcommand.
#[derive(ClapArgs, Debug, Clone)]
pub struct CommonArgs {
    /// App ID (falls back to RTC_APP_ID when empty)
    #[arg(long, global = true, default_value = "")]
    pub app_id: String,

    /// App certificate (falls back to RTC_APP_CERT when empty)
    #[arg(long, global = true, default_value = "")]
    pub app_cert: String,

    /// Pre-issued session token
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Channel name to join
    #[arg(long, global = true, default_value = DEFAULT_CHANNEL_NAME)]
    pub channel_name: String,

    /// User ID for the connection
    #[arg(long, global = true, default_value = DEFAULT_USER_ID)]
    pub user_id: String,

    /// Engine log file
    #[arg(long, global = true)]
    pub log_path: Option<PathBuf>,

    /// Engine configuration directory
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Engine data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// PCM sample rate in Hz
    #[arg(long, global = true, default_value_t = rtc_bridge::config::DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Channel layout: mono or stereo
    #[arg(long, global = true, default_value = "mono")]
    pub channels: AudioChannels,

    /// Stop by itself after this many seconds
    #[arg(long, global = true)]
    pub run_for_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push a raw 16-bit little-endian PCM file to the channel on an interval
    Send(SendArgs),

    /// Receive audio frames from the channel and play them
    Recv(RecvArgs),

    /// Run a sender and a receiver against each other in one process
    Loopback {
        #[command(flatten)]
        send: SendArgs,

        #[command(flatten)]
        recv: RecvArgs,

        /// User ID of the in-process sender
        #[arg(long, default_value = "sender")]
        peer_user_id: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SendArgs {
    /// Raw PCM file; a generated test tone is pushed when omitted
    #[arg(long)]
    pub audio_file_path: Option<PathBuf>,

    /// Seconds of audio per pushed chunk
    #[arg(long, default_value_t = 1)]
    pub seconds_per_push: u32,

    /// Seconds between push attempts
    #[arg(long, default_value_t = 5)]
    pub push_interval_secs: u64,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RecvArgs {
    /// Frame queue capacity (oldest frames are dropped when full)
    #[arg(long, default_value_t = rtc_bridge::config::DEFAULT_PCM_QUEUE_SIZE)]
    pub pcm_queue_size: usize,

    /// How received frames are handled: queued or direct
    #[arg(long, default_value = "queued")]
    pub audio_mode: AudioMode,

    /// Playback buffer capacity in samples (oldest samples are dropped when full)
    #[arg(long, default_value_t = rtc_bridge::buffer::DEFAULT_PLAYBACK_CAPACITY)]
    pub max_buffer_samples: usize,

    /// Samples written to the output per tick
    #[arg(long, default_value_t = 1024)]
    pub frame_size: usize,

    /// Playback tick period in milliseconds
    #[arg(long, default_value_t = 10)]
    pub tick_ms: u64,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Discard audio instead of opening an output device
    #[arg(long)]
    pub null_output: bool,

    /// Push every received frame back to the channel
    #[arg(long)]
    pub echo: bool,

    /// Seconds between pipeline stats log lines
    #[arg(long, default_value_t = 5)]
    pub stats_interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_defaults() {
        let args = Args::try_parse_from(["rtc-pcm", "recv"]).unwrap();
        let Command::Recv(recv) = args.cmd else {
            panic!("expected recv");
        };
        assert_eq!(recv.pcm_queue_size, 10);
        assert_eq!(recv.audio_mode, AudioMode::Queued);
        assert_eq!(recv.max_buffer_samples, 96_000);
        assert_eq!(recv.frame_size, 1024);
        assert_eq!(recv.tick_ms, 10);
        assert_eq!(args.common.sample_rate, 16_000);
        assert_eq!(args.common.channels, AudioChannels::Mono);
        assert_eq!(args.common.user_id, "0");
    }

    #[test]
    fn common_flags_accepted_after_subcommand() {
        let args = Args::try_parse_from([
            "rtc-pcm",
            "send",
            "--channel-name",
            "room",
            "--channels",
            "stereo",
            "--push-interval-secs",
            "2",
        ])
        .unwrap();
        assert_eq!(args.common.channel_name, "room");
        assert_eq!(args.common.channels, AudioChannels::Stereo);
        let Command::Send(send) = args.cmd else {
            panic!("expected send");
        };
        assert_eq!(send.push_interval_secs, 2);
        assert_eq!(send.seconds_per_push, 1);
        assert!(send.audio_file_path.is_none());
    }

    #[test]
    fn unknown_audio_mode_is_rejected() {
        let err = Args::try_parse_from(["rtc-pcm", "recv", "--audio-mode", "loud"]);
        assert!(err.is_err());
    }

    #[test]
    fn loopback_takes_both_sides() {
        let args = Args::try_parse_from([
            "rtc-pcm",
            "loopback",
            "--null-output",
            "--seconds-per-push",
            "2",
            "--peer-user-id",
            "talker",
        ])
        .unwrap();
        let Command::Loopback {
            send,
            recv,
            peer_user_id,
        } = args.cmd
        else {
            panic!("expected loopback");
        };
        assert!(recv.null_output);
        assert_eq!(send.seconds_per_push, 2);
        assert_eq!(peer_user_id, "talker");
    }
}
