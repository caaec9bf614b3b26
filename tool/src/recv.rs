// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receives an RTP H.264 stream into an Annex B file, then compares it with
//! the reference file it was sent from.

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Error};
use clap::Parser;
use rtp_annexb::annexb::{detect_start_code_len_from_reader, StartCodeCollector};
use rtp_annexb::codec::{StartCodeLen, StartCodePlan};
use rtp_annexb::receiver::{Receiver, ReceiverOptions, Stats, Summary};

use crate::verify::Comparison;

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// The `--start-code` choice.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum StartCodeArg {
    /// Whatever the reference file's first start code uses.
    Auto,
    Len(StartCodeLen),
}

impl FromStr for StartCodeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(StartCodeArg::Auto),
            "3" => Ok(StartCodeArg::Len(StartCodeLen::Three)),
            "4" => Ok(StartCodeArg::Len(StartCodeLen::Four)),
            _ => Err(format!("{s:?} isn't one of auto, 3, or 4")),
        }
    }
}

#[derive(Parser)]
pub struct Opts {
    /// Original Annex B file to compare against.
    #[arg(long)]
    input: PathBuf,

    /// Output Annex B path.
    #[arg(long, default_value = "dump.h264")]
    output: PathBuf,

    /// Bind host.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Bind port.
    #[arg(long, default_value_t = 5004)]
    port: u16,

    /// Capture duration in seconds after the first packet; 0 means unlimited.
    #[arg(long, default_value_t = 0.0)]
    duration: f64,

    /// Stop after this many idle seconds once packets have arrived; 0 disables.
    #[arg(long, default_value_t = 2.0)]
    idle_timeout: f64,

    /// Requested UDP receive buffer size in bytes; 0 keeps the OS default.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    recv_buffer: usize,

    /// Don't reproduce the input's start code lengths in the output.
    #[arg(long)]
    no_preserve_start_codes: bool,

    /// Start code length to write: auto, 3, or 4.
    #[arg(long, default_value = "auto")]
    start_code: StartCodeArg,
}

fn secs(name: &str, s: f64) -> Result<Option<Duration>, Error> {
    if !s.is_finite() || s < 0.0 {
        bail!("--{name} must be a non-negative number of seconds, not {s}");
    }
    Ok((s > 0.0).then(|| Duration::from_secs_f64(s)))
}

/// Builds the start code plan from the reference file.
fn plan(opts: &Opts) -> Result<StartCodePlan, Error> {
    let open = || {
        std::fs::File::open(&opts.input)
            .with_context(|| format!("unable to open {}", opts.input.display()))
    };
    let fallback = match opts.start_code {
        StartCodeArg::Auto => detect_start_code_len_from_reader(open()?)?,
        StartCodeArg::Len(l) => l,
    };
    if opts.no_preserve_start_codes {
        return Ok(StartCodePlan::Fixed(fallback));
    }
    let lengths = StartCodeCollector::collect_from_reader(open()?)?;
    if lengths.is_empty() {
        return Ok(StartCodePlan::Fixed(fallback));
    }
    Ok(StartCodePlan::Replay { lengths, fallback })
}

/// Prints a progress line every [`REPORT_INTERVAL`] until aborted.
async fn report(stats: Arc<Stats>) {
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    let mut first_packet: Option<Instant> = None;
    let mut last = (Instant::now(), 0u64);
    loop {
        interval.tick().await;
        let s = stats.snapshot();
        let now = Instant::now();
        if s.packets == 0 {
            last = (now, 0);
            continue;
        }
        let first = *first_packet.get_or_insert_with(|| {
            println!("Receiving...");
            now
        });
        let pps = (s.packets - last.1) as f64 / now.duration_since(last.0).as_secs_f64().max(1e-6);
        print!(
            "\rPackets {} | Payload {:.2} MiB | NAL {} | Loss {} | OOO {} | {:6.1} pkt/s | {:6.1}s    ",
            s.packets,
            s.payload_bytes as f64 / (1024.0 * 1024.0),
            s.nal_units,
            s.lost,
            s.out_of_order,
            pps,
            now.duration_since(first).as_secs_f64(),
        );
        let _ = std::io::stdout().flush();
        last = (now, s.packets);
    }
}

fn print_summary(summary: &Summary, expected_nals: Option<usize>) {
    let s = &summary.stats;
    println!();
    println!("RTP Receive Summary");
    println!("{}", "-".repeat(60));
    println!("Stopped          : {:?}", summary.reason);
    println!("Packets received : {}", s.packets);
    println!("Payload bytes    : {}", s.payload_bytes);
    println!("Seq gaps (lost)  : {}", s.lost);
    println!("Out-of-order     : {}", s.out_of_order);
    println!("Duplicates       : {}", s.duplicate);
    println!("Markers          : {}", s.markers);
    println!("NAL units        : {}", s.nal_units);
    println!("FU-A complete    : {}", s.fu_a_completed);
    println!("STAP-A units     : {}", s.stap_a_units);
    println!("Decode errors    : {}", s.decode_errors);
    println!("Dropped          : {}", s.dropped);
    println!("Empty payloads   : {}", s.empty);
    if let Some(len) = summary.pending_fragment_len {
        println!("Unfinished FU-A  : {len} bytes (discarded)");
    }
    if let Some(n) = expected_nals {
        println!("Input NAL count  : {n}");
    }
}

fn print_comparison(opts: &Opts, c: &Comparison) {
    println!();
    println!("File Comparison");
    println!("{}", "-".repeat(60));
    println!("Input  : {} ({} bytes)", opts.input.display(), c.input.size);
    println!("Output : {} ({} bytes)", opts.output.display(), c.output.size);
    println!("Hash in : {}", c.input.sha256);
    println!("Hash out: {}", c.output.sha256);
    println!(
        "Exact match: {}",
        if c.exact_match() { "YES" } else { "NO" }
    );
    println!("Size delta : {} bytes", c.size_delta());
    println!("Loss       : {:.2}%", c.loss_pct());
}

pub async fn run(opts: Opts) -> Result<(), Error> {
    let duration = secs("duration", opts.duration)?;
    let idle_timeout = secs("idle-timeout", opts.idle_timeout)?;
    let plan = plan(&opts)?;
    let expected_nals = match &plan {
        StartCodePlan::Replay { lengths, .. } => Some(lengths.len()),
        StartCodePlan::Fixed(_) => None,
    };
    let plan_desc = match &plan {
        StartCodePlan::Replay { lengths, .. } => {
            let fours = lengths.iter().filter(|&&l| l == StartCodeLen::Four).count();
            format!(
                "preserve start codes: {}x4, {}x3",
                fours,
                lengths.len() - fours
            )
        }
        StartCodePlan::Fixed(l) => format!("start code {l} bytes"),
    };

    let receiver = Receiver::bind(
        ReceiverOptions::default()
            .bind_addr(SocketAddr::new(opts.host, opts.port))
            .duration(duration)
            .idle_timeout(idle_timeout)
            .recv_buffer_size(opts.recv_buffer)
            .start_codes(plan),
    )?;
    println!("Listening on UDP {}", receiver.local_addr());
    match receiver.recv_buffer_size() {
        Some(b) => println!("UDP receive buffer: {b} bytes"),
        None => println!("UDP receive buffer: unknown"),
    }
    println!("Writing {} ({})", opts.output.display(), plan_desc);

    let file = tokio::fs::File::create(&opts.output)
        .await
        .with_context(|| format!("unable to create {}", opts.output.display()))?;
    let mut sink = tokio::io::BufWriter::new(file);
    let reporter = tokio::spawn(report(receiver.stats()));
    let summary = receiver
        .run(&mut sink, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("unable to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;
    reporter.abort();
    println!();
    let summary = summary?;
    drop(sink);

    print_summary(&summary, expected_nals);
    let comparison = Comparison::new(&opts.input, &opts.output)?;
    print_comparison(&opts, &comparison);
    Ok(())
}
