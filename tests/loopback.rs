// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the receive loop over loopback UDP.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use rtp_annexb::annexb;
use rtp_annexb::codec::{h264::Packetizer, StartCodeLen, StartCodePlan};
use rtp_annexb::receiver::{Receiver, ReceiverOptions, StopReason, Summary};
use rtp_annexb::rtp::RawPacketBuilder;
use tokio::net::UdpSocket;

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

/// SPS, PPS, a large IDR slice, and some small non-IDR slices, with mixed
/// start code lengths.
fn reference_stream() -> Vec<u8> {
    let mut s = Vec::new();
    s.extend_from_slice(b"\x00\x00\x00\x01\x67\x64\x00\x1f\xac\xd9");
    s.extend_from_slice(b"\x00\x00\x00\x01\x68\xee\x3c\xb0");
    s.extend_from_slice(b"\x00\x00\x01\x65");
    s.extend((0..5_000u32).map(|i| (i % 251) as u8 + 1));
    for i in 0..5u8 {
        s.extend_from_slice(if i % 2 == 0 {
            b"\x00\x00\x01\x41"
        } else {
            b"\x00\x00\x00\x01\x41"
        });
        s.extend_from_slice(&[0x9a, i + 1, 0x42]);
    }
    s
}

fn packetize(stream: &[u8]) -> Vec<Bytes> {
    let nals: Vec<&[u8]> = annexb::nal_units(stream)
        .map(|n| n.unwrap().bytes())
        .collect();
    let mut p = Packetizer::new(1200, 96, 0xdead_beef, 1000)
        .unwrap()
        .aggregate(true);
    p.push_access_unit(0, &nals[..3]).unwrap();
    for (i, nal) in nals[3..].iter().enumerate() {
        p.push_access_unit(3000 * (i as u32 + 1), &[*nal]).unwrap();
    }
    std::iter::from_fn(|| p.pull()).collect()
}

async fn receive(options: ReceiverOptions, datagrams: Vec<Bytes>) -> (Vec<u8>, Summary) {
    let receiver = Receiver::bind(
        options
            .bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .idle_timeout(Some(Duration::from_millis(200))),
    )
    .unwrap();
    let dest = receiver.local_addr();
    let sender = tokio::spawn(async move {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for d in datagrams {
            sock.send_to(&d, dest).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });
    let mut out = Vec::new();
    let summary = receiver
        .run(&mut out, std::future::pending())
        .await
        .unwrap();
    sender.await.unwrap();
    (out, summary)
}

#[tokio::test]
async fn reproduces_reference() {
    init_logging();
    let stream = reference_stream();
    let pkts = packetize(&stream);
    let plan = StartCodePlan::Replay {
        lengths: annexb::start_code_lengths(&stream),
        fallback: StartCodeLen::Four,
    };
    let (out, summary) = receive(ReceiverOptions::default().start_codes(plan), pkts.clone()).await;
    assert_eq!(summary.reason, StopReason::Idle);
    assert!(out == stream, "{} vs {} bytes", out.len(), stream.len());
    let s = summary.stats;
    assert_eq!(s.packets, pkts.len() as u64);
    assert_eq!(s.nal_units, 8);
    assert_eq!(s.stap_a_units, 2);
    assert_eq!(s.fu_a_completed, 1);
    assert_eq!(s.markers, 6);
    assert_eq!(s.lost + s.out_of_order + s.duplicate + s.decode_errors, 0);
    assert_eq!(s.bytes_written, stream.len() as u64);
    assert_eq!(summary.start_codes_remaining, 0);
    assert_eq!(summary.start_codes_replayed, 8);
    assert!(summary.pending_fragment_len.is_none());
}

#[tokio::test]
async fn counts_anomalies_and_junk() {
    init_logging();
    let stream = reference_stream();
    let mut pkts = packetize(&stream);

    // Sequence numbers start at 1000. The IDR slice's FU-A fragments are
    // 1001 through 1005; without 1005 it's abandoned when 1006 arrives.
    pkts.remove(5);
    let late = pkts.remove(6);
    pkts.insert(7, late); // 1008 before 1007
    let dup = pkts[8].clone();
    pkts.insert(9, dup); // 1009 twice

    // junk: too short, and a version 1 header.
    pkts.insert(0, Bytes::from_static(b"\x80\x60\x00\x01\x00\x00\x00\x00"));
    let (v1, _) = RawPacketBuilder {
        sequence_number: 5,
        payload_type: 96,
        ..Default::default()
    }
    .build(*b"\x09\xf0")
    .unwrap();
    let mut v1 = v1.0.to_vec();
    v1[0] = (v1[0] & 0x3f) | 0x40;
    pkts.insert(1, Bytes::from(v1));

    let (out, summary) = receive(ReceiverOptions::default(), pkts).await;
    let s = summary.stats;
    assert_eq!(s.dropped, 2);

    // 1006 and 1008 each follow a gap; 1009 also looks one ahead of the late 1007.
    assert_eq!(s.lost, 3, "{s:?}");
    assert_eq!(s.out_of_order, 1, "{s:?}");
    assert_eq!(s.duplicate, 1, "{s:?}");
    assert_eq!(s.fu_a_completed, 0);
    assert_eq!(s.decode_errors, 1, "{s:?}");
    assert_eq!(s.nal_units, 8, "{s:?}");
    assert!(summary.pending_fragment_len.is_none());
    assert!(out.starts_with(b"\x00\x00\x00\x01\x67"));
    assert!(out.len() < stream.len());
}

#[tokio::test]
async fn empty_payload_keeps_sequence() {
    init_logging();
    let stream = reference_stream();
    let pkts = packetize(&stream);

    // Renumber so an empty packet can take 1006's place without a gap.
    let mut with_empty = Vec::new();
    for (i, pkt) in pkts.iter().enumerate() {
        let i = i as u16;
        if i == 6 {
            let (empty, _) = RawPacketBuilder {
                sequence_number: 1006,
                timestamp: 0,
                payload_type: 96,
                ssrc: 0xdead_beef,
                ..Default::default()
            }
            .build(std::iter::empty())
            .unwrap();
            with_empty.push(empty.0);
        }
        let mut p = pkt.to_vec();
        let seq = 1000 + i + u16::from(i >= 6);
        p[2..4].copy_from_slice(&seq.to_be_bytes());
        with_empty.push(Bytes::from(p));
    }

    let plan = StartCodePlan::Replay {
        lengths: annexb::start_code_lengths(&stream),
        fallback: StartCodeLen::Four,
    };
    let (out, summary) = receive(ReceiverOptions::default().start_codes(plan), with_empty).await;
    let s = summary.stats;
    assert_eq!(s.empty, 1, "{s:?}");
    assert_eq!(s.packets, pkts.len() as u64 + 1);
    assert_eq!(s.lost + s.out_of_order + s.duplicate, 0, "{s:?}");
    assert_eq!(s.decode_errors, 0, "{s:?}");
    assert_eq!(s.nal_units, 8);
    assert!(out == stream, "{} vs {} bytes", out.len(), stream.len());
}

#[tokio::test]
async fn stops_after_duration() {
    init_logging();
    let receiver = Receiver::bind(
        ReceiverOptions::default()
            .bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .duration(Some(Duration::from_millis(100)))
            .idle_timeout(None),
    )
    .unwrap();
    let dest = receiver.local_addr();
    let stats = receiver.stats();
    let sender = tokio::spawn(async move {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut p = Packetizer::new(1200, 96, 1, 0).unwrap();
        for i in 0..20u32 {
            p.push_nal(i * 3000, b"\x41\x9a\x01", true).unwrap();
            let pkt = p.pull().unwrap();
            if sock.send_to(&pkt, dest).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    let mut out = Vec::new();
    let summary = receiver
        .run(&mut out, std::future::pending())
        .await
        .unwrap();
    assert_eq!(summary.reason, StopReason::Duration);
    assert!(summary.stats.packets >= 1);
    assert_eq!(stats.snapshot(), summary.stats);
    assert_eq!(out.len() as u64, summary.stats.bytes_written);
    sender.abort();
}
