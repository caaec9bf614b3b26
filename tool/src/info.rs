// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lists the NAL units of an Annex B file.

use std::path::PathBuf;

use anyhow::{Context, Error};
use clap::Parser;
use rtp_annexb::annexb::{ForbiddenBitPolicy, NalUnits};

#[derive(Parser)]
pub struct Opts {
    /// Annex B file to read.
    #[arg(long, default_value = "input.h264")]
    input: PathBuf,

    /// Skips NAL units with the forbidden bit set rather than failing.
    #[arg(long)]
    skip_invalid: bool,
}

pub fn run(opts: Opts) -> Result<(), Error> {
    let data = std::fs::read(&opts.input)
        .with_context(|| format!("unable to read {}", opts.input.display()))?;
    let policy = if opts.skip_invalid {
        ForbiddenBitPolicy::Skip
    } else {
        ForbiddenBitPolicy::Fail
    };
    let mut units = NalUnits::new(&data, policy);
    for nal in units.by_ref() {
        let nal = nal.with_context(|| format!("in {}", opts.input.display()))?;
        println!(
            "NAL type={:2} ref={} size={}",
            nal.nal_unit_type(),
            nal.nal_ref_idc(),
            nal.payload().len()
        );
    }
    if units.skipped() > 0 {
        log::warn!(
            "skipped {} NAL units with forbidden_zero_bit set",
            units.skipped()
        );
    }
    Ok(())
}
