// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Packetizes an Annex B file and sends it as RTP over UDP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Error};
use clap::Parser;
use rtp_annexb::annexb::{self, NalUnit};
use rtp_annexb::codec::h264::Packetizer;
use tokio::net::UdpSocket;

/// RTP clock rate for video, per RFC 6184 section 8.2.1.
const CLOCK_RATE: f64 = 90_000.0;

#[derive(Parser)]
pub struct Opts {
    /// Annex B file to send.
    #[arg(long)]
    input: PathBuf,

    /// Destination address.
    #[arg(long, default_value = "127.0.0.1:5004")]
    dest: SocketAddr,

    /// Maximum RTP payload size; larger NAL units are sent as FU-A.
    #[arg(long, default_value_t = 1400)]
    mtu_payload: u16,

    /// Aggregates small NAL units of an access unit into STAP-A packets.
    #[arg(long)]
    aggregate: bool,

    /// Pacing; 0 sends as fast as possible.
    #[arg(long, default_value_t = 5000)]
    packets_per_sec: u32,

    /// Frame rate used to advance RTP timestamps between access units.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    #[arg(long, default_value_t = 96)]
    payload_type: u8,
}

fn is_vcl(nal: &NalUnit) -> bool {
    matches!(nal.nal_unit_type(), 1..=5)
}

/// Splits NAL units into access units.
///
/// A new access unit starts at an access unit delimiter, SEI, SPS, or PPS
/// following a slice, or at a slice with `first_mb_in_slice == 0` following
/// another slice. This ignores the finer rules of H.264 section 7.4.1.2.3.
pub fn access_units<'a>(nals: &[NalUnit<'a>]) -> Vec<Vec<&'a [u8]>> {
    let mut aus: Vec<Vec<&'a [u8]>> = Vec::new();
    let mut cur: Vec<&'a [u8]> = Vec::new();
    let mut cur_has_vcl = false;
    for nal in nals {
        let starts_au = if is_vcl(nal) {
            // first_mb_in_slice is ue(v); it's 0 iff the first bit is set.
            cur_has_vcl && nal.payload().first().map_or(true, |&b| (b & 0x80) != 0)
        } else {
            cur_has_vcl && matches!(nal.nal_unit_type(), 6..=9)
        };
        if starts_au {
            aus.push(std::mem::take(&mut cur));
            cur_has_vcl = false;
        }
        cur_has_vcl |= is_vcl(nal);
        cur.push(nal.bytes());
    }
    if !cur.is_empty() {
        aus.push(cur);
    }
    aus
}

/// Time between packets; `None` for unpaced. Rates beyond 1 GHz are clamped.
fn pacing_period(packets_per_sec: u32) -> Option<Duration> {
    (packets_per_sec > 0).then(|| {
        Duration::from_secs_f64(1.0 / f64::from(packets_per_sec)).max(Duration::from_nanos(1))
    })
}

pub async fn run(opts: Opts) -> Result<(), Error> {
    if !opts.fps.is_finite() || opts.fps <= 0.0 {
        bail!("--fps must be positive");
    }
    let data = std::fs::read(&opts.input)
        .with_context(|| format!("unable to read {}", opts.input.display()))?;
    let nals = annexb::nal_units(&data)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("in {}", opts.input.display()))?;
    let aus = access_units(&nals);
    let mut p = Packetizer::with_random_ids(opts.mtu_payload, opts.payload_type)
        .map_err(Error::msg)?
        .aggregate(opts.aggregate);
    let bind: SocketAddr = if opts.dest.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let sock = UdpSocket::bind(bind).await?;
    let mut pacer = pacing_period(opts.packets_per_sec).map(|period| {
        let mut i = tokio::time::interval(period);
        i.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        i
    });
    log::info!(
        "Sending {} NAL units in {} access units to {} (ssrc {:08x})",
        nals.len(),
        aus.len(),
        opts.dest,
        p.ssrc()
    );
    let ts_step = CLOCK_RATE / opts.fps;
    let base: u32 = rand::random();
    let mut packets = 0u64;
    for (i, au) in aus.iter().enumerate() {
        let timestamp = base.wrapping_add((i as f64 * ts_step) as u64 as u32);
        p.push_access_unit(timestamp, au).map_err(Error::msg)?;
        while let Some(pkt) = p.pull() {
            if let Some(pacer) = pacer.as_mut() {
                pacer.tick().await;
            }
            sock.send_to(&pkt, opts.dest)
                .await
                .with_context(|| format!("unable to send to {}", opts.dest))?;
            packets += 1;
        }
    }
    println!("Sent {packets} packets ({} bytes of Annex B)", data.len());
    Ok(())
}
