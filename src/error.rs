// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, net::SocketAddr, sync::Arc};

use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// Only failures which end a session are reported this way: socket setup,
/// socket receive, sink writes, and reads of a reference file. Problems with
/// individual packets or NAL units are counted, not returned; see
/// [`crate::rtp::RawPacketError`] and [`crate::codec::DepacketizeError`].
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&*self.0)
    }
}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unable to set up UDP socket on {addr}: {source}")]
    BindError {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("[{local_addr}] Error receiving UDP packet: {source}")]
    UdpRecvError {
        local_addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Error writing reconstructed stream after {records} NAL units: {source}")]
    WriteError {
        records: u64,
        source: std::io::Error,
    },

    #[error("Error reading reference stream at byte {pos}: {source}")]
    ReadError { pos: u64, source: std::io::Error },
}
