//! Subcommand runners.
//!
//! Each runner builds a [`Service`] on the in-process loopback engine, connects, starts its
//! worker threads and then waits for the stop signal (Ctrl-C or `--run-for-secs`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rtc_bridge::connection::RtcConnection;
use rtc_bridge::device;
use rtc_bridge::engine::{ConnectionInfo, ConnectionObserver, RtcEngine};
use rtc_bridge::loopback::LoopbackEngine;
use rtc_bridge::service::Service;
use rtc_bridge::status::{StatusSnapshot, StopSignal};

use crate::cli::CommonArgs;
use crate::config::{RecvConfig, SendConfig, service_config};
use crate::recv::ReceivePipeline;
use crate::send;

const WAIT_POLL: Duration = Duration::from_millis(40);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

pub fn run_send(
    common: &CommonArgs,
    cfg: SendConfig,
    run_for: Option<Duration>,
    stop: StopSignal,
) -> Result<()> {
    let svc = Service::new(service_config(common), engine()).context("create service")?;
    let conn = Arc::new(
        svc.connect(cfg.connection(), Some(Arc::new(LogObserver)))
            .context("create connection")?,
    );
    conn.publish_audio().context("publish audio")?;

    let source = send::open_source(&cfg)?;
    let pusher = send::spawn_file_pusher(conn.clone(), source, cfg, stop.clone())?;

    wait_for_stop(&stop, run_for, || {});
    let _ = pusher.join();
    disconnect(&conn);
    Ok(())
}

pub fn run_recv(
    common: &CommonArgs,
    cfg: RecvConfig,
    run_for: Option<Duration>,
    stop: StopSignal,
) -> Result<StatusSnapshot> {
    let svc = Service::new(service_config(common), engine()).context("create service")?;
    let conn = Arc::new(
        svc.connect(cfg.connection.clone(), Some(Arc::new(LogObserver)))
            .context("create connection")?,
    );

    let pipeline = ReceivePipeline::start(conn.clone(), &cfg, stop.clone())?;
    let mut last_stats = Instant::now();
    wait_for_stop(&stop, run_for, || {
        if last_stats.elapsed() >= cfg.stats_interval {
            pipeline.log_stats(&conn);
            last_stats = Instant::now();
        }
    });

    disconnect(&conn);
    Ok(pipeline.join())
}

/// Receiver under the configured user id, sender under `peer_user_id`, same engine.
pub fn run_loopback(
    common: &CommonArgs,
    send_cfg: SendConfig,
    recv_cfg: RecvConfig,
    peer_user_id: &str,
    run_for: Option<Duration>,
    stop: StopSignal,
) -> Result<StatusSnapshot> {
    let svc = Service::new(service_config(common), engine()).context("create service")?;
    let receiver = Arc::new(
        svc.connect(recv_cfg.connection.clone(), Some(Arc::new(LogObserver)))
            .context("create receiving connection")?,
    );
    let sender = Arc::new(
        svc.connect_as(peer_user_id, send_cfg.connection(), None)
            .context("create sending connection")?,
    );
    sender.publish_audio().context("publish audio")?;
    let source = send::open_source(&send_cfg)?;

    let pipeline = ReceivePipeline::start(receiver.clone(), &recv_cfg, stop.clone())?;
    let pusher = match send::spawn_file_pusher(sender.clone(), source, send_cfg, stop.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            stop.stop();
            pipeline.join();
            return Err(e);
        }
    };

    let mut last_stats = Instant::now();
    wait_for_stop(&stop, run_for, || {
        if last_stats.elapsed() >= recv_cfg.stats_interval {
            pipeline.log_stats(&receiver);
            last_stats = Instant::now();
        }
    });

    let _ = pusher.join();
    disconnect(&sender);
    disconnect(&receiver);
    Ok(pipeline.join())
}

fn engine() -> Arc<dyn RtcEngine> {
    Arc::new(LoopbackEngine::default())
}

/// Block until `stop` is set, setting it ourselves once `run_for` elapses.
fn wait_for_stop(stop: &StopSignal, run_for: Option<Duration>, mut on_poll: impl FnMut()) {
    let deadline = run_for.map(|d| Instant::now() + d);
    while !stop.is_stopped() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("run time elapsed; stopping");
            stop.stop();
            break;
        }
        on_poll();
        std::thread::sleep(WAIT_POLL);
    }
}

fn disconnect(conn: &RtcConnection) {
    if let Err(e) = conn.disconnect() {
        tracing::warn!("failed to disconnect: {e}");
    }
}

/// Logs connection lifecycle events.
struct LogObserver;

impl ConnectionObserver for LogObserver {
    fn on_connected(&self, info: &ConnectionInfo, reason: i32) {
        tracing::info!(channel = %info.channel_id, user = %info.local_user_id, reason, "connected");
    }

    fn on_disconnected(&self, info: &ConnectionInfo, reason: i32) {
        tracing::info!(channel = %info.channel_id, user = %info.local_user_id, reason, "disconnected");
    }

    fn on_user_joined(&self, user_id: &str) {
        tracing::info!(user = %user_id, "user joined");
    }

    fn on_user_left(&self, user_id: &str, reason: i32) {
        tracing::info!(user = %user_id, reason, "user left");
    }

    fn on_audio_track_publish_success(&self) {
        tracing::info!("audio track published");
    }

    fn on_user_audio_track_subscribed(&self, user_id: &str) {
        tracing::info!(user = %user_id, "subscribed to remote audio");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Command};
    use crate::config::{recv_config, send_config};
    use clap::Parser;

    #[test]
    fn wait_for_stop_honours_deadline() {
        let stop = StopSignal::new();
        let started = Instant::now();
        let mut polls = 0;
        wait_for_stop(&stop, Some(Duration::from_millis(100)), || polls += 1);
        assert!(stop.is_stopped());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(polls > 0);
    }

    #[test]
    fn loopback_delivers_tone_to_receiver() {
        let args = Args::try_parse_from([
            "rtc-pcm",
            "loopback",
            "--null-output",
            "--app-id",
            "app",
            "--app-cert",
            "cert",
            "--channel-name",
            "runtime-loopback-test",
        ])
        .unwrap();
        let Command::Loopback {
            send,
            recv,
            peer_user_id,
        } = &args.cmd
        else {
            panic!("expected loopback");
        };

        let mut send_cfg = send_config(&args.common, send);
        send_cfg.push_interval = Duration::from_millis(20);
        let recv_cfg = recv_config(&args.common, recv);

        let snap = run_loopback(
            &args.common,
            send_cfg,
            recv_cfg,
            peer_user_id,
            Some(Duration::from_millis(600)),
            StopSignal::new(),
        )
        .unwrap();

        assert!(snap.frames_received > 0);
        assert_eq!(snap.frames_skipped, 0);
        assert!(snap.samples_played > 0);
    }

    #[test]
    fn loopback_with_missing_file_fails_before_starting_playback() {
        let args = Args::try_parse_from([
            "rtc-pcm",
            "loopback",
            "--null-output",
            "--app-id",
            "app",
            "--app-cert",
            "cert",
            "--channel-name",
            "runtime-missing-file-test",
            "--audio-file-path",
            "/nonexistent/rtc-pcm/input.pcm",
        ])
        .unwrap();
        let Command::Loopback {
            send,
            recv,
            peer_user_id,
        } = &args.cmd
        else {
            panic!("expected loopback");
        };

        let stop = StopSignal::new();
        let started = Instant::now();
        let result = run_loopback(
            &args.common,
            send_config(&args.common, send),
            recv_config(&args.common, recv),
            peer_user_id,
            None,
            stop.clone(),
        );

        assert!(result.is_err());
        // No receive threads were started, so nothing needed the stop signal.
        assert!(!stop.is_stopped());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
