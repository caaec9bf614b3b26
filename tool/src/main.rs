// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receives, sends, and inspects H.264 Annex B streams carried over RTP.

mod info;
mod recv;
mod send;
mod verify;

use anyhow::Error;
use clap::Parser;
use log::{error, info};

#[derive(Parser)]
#[command(about = "RTP/H.264 tools that reconstitute and compare raw H.264 streams")]
enum Cmd {
    /// Receives RTP into an Annex B file and compares it with a reference; use Ctrl+C to stop.
    Recv(recv::Opts),
    /// Packetizes an Annex B file and sends it as RTP.
    Send(send::Opts),
    /// Lists the NAL units of an Annex B file.
    Info(info::Opts),
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = main_inner().await {
        error!("Fatal: {}", itertools::join(e.chain(), "\ncaused by: "));
        std::process::exit(1);
    }
    info!("Done");
}

async fn main_inner() -> Result<(), Error> {
    let cmd = Cmd::parse();
    match cmd {
        Cmd::Recv(opts) => recv::run(opts).await,
        Cmd::Send(opts) => send::run(opts).await,
        Cmd::Info(opts) => info::run(opts),
    }
}
