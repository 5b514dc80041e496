//! rtc-pcm: push and receive raw PCM on a real-time audio channel.
//!
//! ## Modes
//! - `send`: publish audio and push a 16-bit PCM file every interval, rewinding at EOF.
//! - `recv`: queue received frames, buffer them and play them on an output device.
//! - `loopback`: both of the above in one process, the sender feeding the receiver.
//!
//! Channels are served by the in-process loopback engine, so `send` and `recv` only hear
//! peers that live in the same process.

mod cli;
mod config;
mod recv;
mod runtime;
mod send;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rtc_bridge::status::StopSignal;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,rtc_pcm=info,rtc_bridge=info")
        }))
        .init();

    if let cli::Command::Recv(recv) = &args.cmd {
        if recv.list_devices {
            return runtime::list_devices();
        }
    }

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        let _ = ctrlc::set_handler(move || {
            tracing::info!("received termination signal, exiting");
            stop.stop();
        });
    }

    let run_for = args.common.run_for_secs.map(Duration::from_secs);
    let common = &args.common;
    match &args.cmd {
        cli::Command::Send(send) => {
            runtime::run_send(common, config::send_config(common, send), run_for, stop)?;
        }
        cli::Command::Recv(recv) => {
            let snap =
                runtime::run_recv(common, config::recv_config(common, recv), run_for, stop)?;
            tracing::info!(?snap, "receive finished");
        }
        cli::Command::Loopback {
            send,
            recv,
            peer_user_id,
        } => {
            let snap = runtime::run_loopback(
                common,
                config::send_config(common, send),
                config::recv_config(common, recv),
                peer_user_id,
                run_for,
                stop,
            )?;
            tracing::info!(?snap, "loopback finished");
        }
    }

    Ok(())
}
