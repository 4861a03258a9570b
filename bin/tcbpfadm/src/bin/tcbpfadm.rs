// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io;

use anyhow::Context;
use clap::Parser;

use tcbpf::api::Ipv4Cidr;
use tcbpf::engine::mode::COMPILED;
use tcbpf::engine::mode::Mode;
use tcbpf::helpers::fake::FakeHelpers;
use tcbpf::provider::PrintlnLog;
use tcbpf::provider::Providers;
use tcbpfadm::parse_hex;
use tcbpfadm::parse_u32;
use tcbpfadm::print_helpers_into;
use tcbpfadm::print_lpm_key_into;
use tcbpfadm::print_mark_into;
use tcbpfadm::print_mode_into;
use tcbpfadm::print_ttl_into;
use tcbpfadm::print_variants_into;
use tcbpfadm::ttl_report;

/// Inspect the TC and cgroup dataplane primitives.
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Show every predicate of a mode (default: the compiled one).
    Mode {
        #[arg(long, value_parser = parse_u32)]
        flags: Option<u32>,
    },

    /// List all buildable program variants.
    Variants,

    /// Decode a packet mark.
    Mark {
        #[arg(value_parser = parse_u32)]
        mark: u32,
    },

    /// Run an IPv4 header (hex) through the TTL check and decrement.
    Ttl {
        header: String,

        #[arg(long, value_parser = parse_u32)]
        flags: Option<u32>,
    },

    /// Show the LPM trie key for a prefix.
    LpmKey { cidr: Ipv4Cidr },

    /// List the helper import table.
    Helpers,
}

fn mode_arg(flags: Option<u32>) -> anyhow::Result<Mode> {
    match flags {
        Some(bits) => Mode::from_bits(bits)
            .with_context(|| format!("invalid mode flags {bits:#x}")),
        None => Ok(COMPILED),
    }
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    let mut out = io::stdout();

    match cmd {
        Command::Mode { flags } => {
            print_mode_into(&mut out, mode_arg(flags)?)?;
        }

        Command::Variants => {
            print_variants_into(&mut out)?;
        }

        Command::Mark { mark } => {
            print_mark_into(&mut out, mark)?;
        }

        Command::Ttl { header, flags } => {
            let mode = mode_arg(flags)?;
            let hdr = parse_hex(&header)?;
            let providers = Providers { log: Box::new(PrintlnLog) };
            let helpers = FakeHelpers::new(providers, 0);
            let report = ttl_report(&helpers, &hdr, mode)
                .context("failed to run the TTL check")?;
            print_ttl_into(&mut out, &report)?;
        }

        Command::LpmKey { cidr } => {
            print_lpm_key_into(&mut out, cidr)?;
        }

        Command::Helpers => {
            print_helpers_into(&mut out)?;
        }
    }

    Ok(())
}
