use std::path::PathBuf;
use std::time::Duration;

use rtc_bridge::config::{AudioChannels, AudioMode, ConnectionConfig, PublishConfig, ServiceConfig};
use rtc_bridge::pipeline::{ConsumerConfig, TickerConfig};

use crate::cli::{CommonArgs, RecvArgs, SendArgs};

#[derive(Clone, Debug)]
pub struct SendConfig {
    pub audio_file_path: Option<PathBuf>,
    pub sample_rate: u32,
    pub channels: AudioChannels,
    pub seconds_per_push: u32,
    pub push_interval: Duration,
}

impl SendConfig {
    /// Bytes per pushed chunk of 16-bit PCM.
    pub fn chunk_bytes(&self) -> usize {
        self.sample_rate as usize
            * self.seconds_per_push.max(1) as usize
            * rtc_bridge::frame::PCM16_BYTES_PER_SAMPLE
            * usize::from(self.channels.count())
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            ..ConnectionConfig::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecvConfig {
    pub connection: ConnectionConfig,
    pub buffer_capacity: usize,
    pub consumer: ConsumerConfig,
    pub ticker: TickerConfig,
    pub device: Option<String>,
    pub null_output: bool,
    pub stats_interval: Duration,
}

pub fn service_config(common: &CommonArgs) -> ServiceConfig {
    let defaults = ServiceConfig::default();
    ServiceConfig {
        app_id: common.app_id.clone(),
        app_cert: common.app_cert.clone(),
        user_id: common.user_id.clone(),
        channel_name: common.channel_name.clone(),
        token: common.token.clone(),
        log_path: common.log_path.clone().unwrap_or(defaults.log_path),
        config_dir: common.config_dir.clone().unwrap_or(defaults.config_dir),
        data_dir: common.data_dir.clone().unwrap_or(defaults.data_dir),
    }
    .resolve_env()
}

pub fn send_config(common: &CommonArgs, args: &SendArgs) -> SendConfig {
    SendConfig {
        audio_file_path: args.audio_file_path.clone(),
        sample_rate: common.sample_rate,
        channels: common.channels,
        seconds_per_push: args.seconds_per_push,
        push_interval: Duration::from_secs(args.push_interval_secs.max(1)),
    }
}

pub fn recv_config(common: &CommonArgs, args: &RecvArgs) -> RecvConfig {
    RecvConfig {
        connection: ConnectionConfig {
            sample_rate: common.sample_rate,
            channels: common.channels,
            audio_mode: args.audio_mode,
            receive_audio_frames: true,
            pcm_queue_size: args.pcm_queue_size,
            // A receiver only sends when it pushes received audio back.
            publish: PublishConfig {
                publish_audio: args.echo || args.audio_mode == AudioMode::Direct,
                ..PublishConfig::default()
            },
            ..ConnectionConfig::default()
        },
        buffer_capacity: args.max_buffer_samples,
        consumer: ConsumerConfig {
            expected_sample_rate: common.sample_rate,
            echo: args.echo,
            ..ConsumerConfig::default()
        },
        ticker: TickerConfig {
            frame_size: args.frame_size,
            tick: Duration::from_millis(args.tick_ms.max(1)),
        },
        device: normalize_device_name(args.device.clone()),
        null_output: args.null_output,
        stats_interval: Duration::from_secs(args.stats_interval_secs.max(1)),
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Command};
    use clap::Parser;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("   ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }

    #[test]
    fn chunk_bytes_scale_with_rate_seconds_and_channels() {
        let args = parse(&["rtc-pcm", "send"]);
        let Command::Send(send) = &args.cmd else {
            panic!("expected send");
        };
        assert_eq!(send_config(&args.common, send).chunk_bytes(), 32_000);

        let args = parse(&["rtc-pcm", "send", "--channels", "stereo", "--seconds-per-push", "2"]);
        let Command::Send(send) = &args.cmd else {
            panic!("expected send");
        };
        assert_eq!(send_config(&args.common, send).chunk_bytes(), 128_000);
    }

    #[test]
    fn recv_config_enables_frame_receiving() {
        let args = parse(&["rtc-pcm", "recv", "--audio-mode", "direct", "--echo"]);
        let Command::Recv(recv) = &args.cmd else {
            panic!("expected recv");
        };
        let cfg = recv_config(&args.common, recv);
        assert!(cfg.connection.receive_audio_frames);
        assert_eq!(cfg.connection.audio_mode, AudioMode::Direct);
        assert!(cfg.consumer.echo);
        assert_eq!(cfg.ticker.tick, Duration::from_millis(10));
        assert_eq!(cfg.buffer_capacity, 96_000);
        assert!(cfg.connection.publishes_audio_on_connect());
    }

    #[test]
    fn plain_receiver_does_not_publish() {
        let args = parse(&["rtc-pcm", "recv"]);
        let Command::Recv(recv) = &args.cmd else {
            panic!("expected recv");
        };
        let cfg = recv_config(&args.common, recv);
        assert_eq!(cfg.connection.audio_mode, AudioMode::Queued);
        assert!(!cfg.connection.publishes_audio_on_connect());
    }

    #[test]
    fn service_config_keeps_default_directories() {
        let args = parse(&["rtc-pcm", "recv", "--app-id", "a", "--app-cert", "c"]);
        let cfg = service_config(&args.common);
        assert_eq!(cfg.app_id, "a");
        assert_eq!(cfg.data_dir, ServiceConfig::default().data_dir);
        assert!(cfg.validate().is_ok());
    }
}
