// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receives an RTP H.264 stream on a UDP socket and writes it out as Annex B.
//!
//! ```no_run
//! # async fn f() -> Result<(), Box<dyn std::error::Error>> {
//! use rtp_annexb::receiver::{Receiver, ReceiverOptions};
//! let receiver = Receiver::bind(ReceiverOptions::default())?;
//! let mut out = tokio::io::sink();
//! let summary = receiver.run(&mut out, std::future::pending()).await?;
//! println!("{:?}", summary.stats);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::codec::h264::Depacketizer;
use crate::codec::{NalSource, StartCodePlan};
use crate::rtp::ReceivedPacket;
use crate::{Error, ErrorInt};

mod sequence;
mod stats;

pub use sequence::{LastSeqUpdate, SeqClass, SequenceTracker};
pub use stats::{Stats, StatsSnapshot};

/// How long a single receive waits before stop conditions are rechecked.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Options for [`Receiver`], in builder style.
#[derive(Clone, Debug)]
pub struct ReceiverOptions {
    bind_addr: SocketAddr,
    duration: Option<Duration>,
    idle_timeout: Option<Duration>,
    recv_buffer_size: usize,
    start_codes: StartCodePlan,
    last_seq_update: LastSeqUpdate,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5004)),
            duration: None,
            idle_timeout: Some(Duration::from_secs(2)),
            recv_buffer_size: 4 << 20,
            start_codes: StartCodePlan::default(),
            last_seq_update: LastSeqUpdate::default(),
        }
    }
}

impl ReceiverOptions {
    pub fn bind_addr(self, bind_addr: SocketAddr) -> Self {
        Self { bind_addr, ..self }
    }

    /// Stops once this much time has passed since the first accepted packet.
    pub fn duration(self, duration: Option<Duration>) -> Self {
        Self { duration, ..self }
    }

    /// Stops once no packet has been accepted for this long. The clock starts
    /// with the first accepted packet. `None` disables the idle stop.
    pub fn idle_timeout(self, idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            ..self
        }
    }

    /// Requests a socket receive buffer of this many bytes; 0 keeps the OS
    /// default. The OS may adjust or cap the request.
    pub fn recv_buffer_size(self, recv_buffer_size: usize) -> Self {
        Self {
            recv_buffer_size,
            ..self
        }
    }

    pub fn start_codes(self, start_codes: StartCodePlan) -> Self {
        Self {
            start_codes,
            ..self
        }
    }

    pub fn last_seq_update(self, last_seq_update: LastSeqUpdate) -> Self {
        Self {
            last_seq_update,
            ..self
        }
    }
}

/// Why [`Receiver::run`] returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The caller's shutdown future completed.
    Shutdown,

    /// The capture duration elapsed.
    Duration,

    /// No packet arrived within the idle timeout.
    Idle,
}

/// The outcome of a [`Receiver::run`].
#[derive(Clone, Debug)]
pub struct Summary {
    pub reason: StopReason,
    pub stats: StatsSnapshot,

    /// Time from the first to the last accepted packet, if any arrived.
    pub receiving: Option<Duration>,

    /// Size of an FU-A left unfinished at stop. It's not written to the sink.
    pub pending_fragment_len: Option<usize>,

    pub start_codes_replayed: usize,
    pub start_codes_remaining: usize,
}

/// A bound UDP socket ready to receive one RTP H.264 stream.
#[derive(Debug)]
pub struct Receiver {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer_size: Option<usize>,
    options: ReceiverOptions,
    stats: Arc<Stats>,
}

impl Receiver {
    /// Binds the socket. Must be called from within a tokio runtime.
    pub fn bind(options: ReceiverOptions) -> Result<Self, Error> {
        if options.idle_timeout == Some(Duration::ZERO) {
            bail!(ErrorInt::InvalidArgument("idle timeout must be positive".into()));
        }
        let addr = options.bind_addr;
        let bind_err = |source: std::io::Error| wrap!(ErrorInt::BindError { addr, source });
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(bind_err)?;
        if options.recv_buffer_size > 0 {
            if let Err(e) = socket.set_recv_buffer_size(options.recv_buffer_size) {
                log::warn!(
                    "Unable to set receive buffer to {} bytes on {}: {}",
                    options.recv_buffer_size,
                    addr,
                    e
                );
            }
        }
        let recv_buffer_size = socket.recv_buffer_size().ok();
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        let socket = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        Ok(Self {
            socket,
            local_addr,
            recv_buffer_size,
            options,
            stats: Arc::new(Stats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The receive buffer size as reported by the OS after setup.
    pub fn recv_buffer_size(&self) -> Option<usize> {
        self.recv_buffer_size
    }

    pub fn options(&self) -> &ReceiverOptions {
        &self.options
    }

    /// Returns the live counters, which may be read while [`Receiver::run`] is in progress.
    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Receives until `shutdown` completes or the duration or idle limit is
    /// reached, writing each reconstructed NAL unit (with its start code) to
    /// `sink` in order. `sink` is flushed before returning.
    ///
    /// Malformed datagrams and per-unit depacketization errors are counted
    /// in [`Stats`] and otherwise skipped. Only socket and sink failures are
    /// returned as errors.
    pub async fn run<W, F>(self, sink: &mut W, shutdown: F) -> Result<Summary, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let Receiver {
            socket,
            local_addr,
            options,
            stats,
            ..
        } = self;
        let mut buf = vec![0u8; crate::MAX_DATAGRAM_LEN];
        let mut tracker = SequenceTracker::new(options.last_seq_update);
        let mut depacketizer = Depacketizer::new(options.start_codes.clone());
        let mut first_packet: Option<Instant> = None;
        let mut last_packet: Option<Instant> = None;
        let mut records = 0u64;
        log::info!("Receiving RTP on {}", local_addr);

        let reason = loop {
            let now = Instant::now();
            if let (Some(d), Some(first)) = (options.duration, first_packet) {
                if now.duration_since(first) >= d {
                    break StopReason::Duration;
                }
            }
            if let (Some(idle), Some(last)) = (options.idle_timeout, last_packet) {
                if now.duration_since(last) >= idle {
                    break StopReason::Idle;
                }
            }

            let len = tokio::select! {
                _ = &mut shutdown => break StopReason::Shutdown,
                r = tokio::time::timeout(POLL_INTERVAL, socket.recv(&mut buf)) => match r {
                    Err(_elapsed) => continue,
                    Ok(Ok(len)) => len,
                    Ok(Err(source)) => {
                        let e = wrap!(ErrorInt::UdpRecvError { local_addr, source });
                        return Err(flush_before(sink, e).await);
                    }
                },
            };
            let pkt = match ReceivedPacket::parse(Bytes::copy_from_slice(&buf[..len])) {
                Ok(pkt) => pkt,
                Err(e) => {
                    log::trace!("Dropping datagram: {:?}", e);
                    stats.add_dropped(1);
                    continue;
                }
            };
            if pkt.version() != 2 {
                log::trace!("Dropping version {} datagram: {:?}", pkt.version(), &pkt);
                stats.add_dropped(1);
                continue;
            }

            let now = Instant::now();
            first_packet.get_or_insert(now);
            last_packet = Some(now);
            let seq = pkt.sequence_number();
            stats.add_packets(1);
            stats.add_payload_bytes(pkt.payload().len() as u64);
            if pkt.mark() {
                stats.add_markers(1);
            }
            match tracker.observe(seq) {
                SeqClass::InOrder => {}
                SeqClass::Lost(n) => {
                    log::debug!("Lost {} packets before seq={:04x}", n, seq);
                    stats.add_lost(u64::from(n));
                }
                SeqClass::Duplicate => stats.add_duplicate(1),
                SeqClass::OutOfOrder => stats.add_out_of_order(1),
            }
            if pkt.payload().is_empty() {
                stats.add_empty(1);
                continue;
            }

            depacketizer.push(pkt.into_payload_bytes());
            while let Some(r) = depacketizer.pull() {
                let record = match r {
                    Ok(r) => r,
                    Err(e) => {
                        log::debug!("seq={:04x}: {}", seq, e);
                        stats.add_decode_errors(1);
                        continue;
                    }
                };
                match record.source() {
                    NalSource::Single => {}
                    NalSource::StapA => stats.add_stap_a_units(1),
                    NalSource::FuA => stats.add_fu_a_completed(1),
                }
                sink.write_all(record.data())
                    .await
                    .map_err(|source| wrap!(ErrorInt::WriteError { records, source }))?;
                records += 1;
                stats.add_nal_units(1);
                stats.add_bytes_written(record.data().len() as u64);
            }
        };

        sink.flush()
            .await
            .map_err(|source| wrap!(ErrorInt::WriteError { records, source }))?;
        let pending_fragment_len = depacketizer.pending_fragment_len();
        if let Some(len) = pending_fragment_len {
            log::debug!("Discarding unfinished {}-byte FU-A", len);
        }
        log::info!(
            "Stopped receiving on {} ({:?}) after {} NAL units",
            local_addr,
            reason,
            records
        );
        Ok(Summary {
            reason,
            stats: stats.snapshot(),
            receiving: first_packet.zip(last_packet).map(|(f, l)| l - f),
            pending_fragment_len,
            start_codes_replayed: depacketizer.planner().replayed(),
            start_codes_remaining: depacketizer.planner().remaining(),
        })
    }
}

/// Flushes what's already been written to `sink`, then hands back `err`.
async fn flush_before<W: AsyncWrite + Unpin + ?Sized>(sink: &mut W, err: Error) -> Error {
    if let Err(e) = sink.flush().await {
        log::warn!("Unable to flush output before failing with {}: {}", err, e);
    }
    err
}
