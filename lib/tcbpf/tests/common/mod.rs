// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than its worth here.
#![allow(dead_code)]

use rand::Rng;
use rand::RngCore;
use smoltcp::wire::Ipv4Packet;

pub use tcbpf::api::Ipv4Addr;
pub use tcbpf::api::Ipv4Cidr;
pub use tcbpf::api::Ipv4PrefixLen;
pub use tcbpf::api::SkbMark;
pub use tcbpf::engine::ip4::Ipv4Hdr;
pub use tcbpf::engine::ip4::ip_dec_ttl;
pub use tcbpf::engine::lpm::Ipv4LpmKey;
pub use tcbpf::engine::mode::Mode;
pub use tcbpf::engine::mode::TcFlags;
pub use tcbpf::helpers::CsumReplaceFlags;
pub use tcbpf::helpers::HelperError;
pub use tcbpf::helpers::Helpers;
pub use tcbpf::helpers::Map;
pub use tcbpf::helpers::RedirectDir;
pub use tcbpf::helpers::TcAction;
pub use tcbpf::helpers::UpdateFlag;
pub use tcbpf::helpers::fake::FakeHashMap;
pub use tcbpf::helpers::fake::FakeHelpers;
pub use tcbpf::helpers::fake::FakeLpmTrie;
pub use tcbpf::helpers::fake::FakeProgArray;
pub use tcbpf::helpers::fake::FakeSkb;
pub use tcbpf::provider::CaptureLog;
pub use tcbpf::provider::Providers;

/// The RFC 1141 update writes all ones where a full computation
/// writes zero, for this stored checksum only.
pub const NEG_ZERO_CORNER: [u8; 2] = [0xfe, 0xff];

/// A fixed-size IPv4 header with its checksum filled by smoltcp.
pub fn ipv4_hdr(
    ttl: u8,
    ident: u16,
    proto: u8,
    src: [u8; 4],
    dst: [u8; 4],
) -> [u8; 20] {
    let mut b = [0u8; 20];
    b[0] = 0x45;
    b[2..4].copy_from_slice(&84u16.to_be_bytes());
    b[4..6].copy_from_slice(&ident.to_be_bytes());
    b[6] = 0x40;
    b[8] = ttl;
    b[9] = proto;
    b[12..16].copy_from_slice(&src);
    b[16..20].copy_from_slice(&dst);
    smoltcp_fill(&mut b);
    b
}

/// A random header of random length (options included), its checksum
/// filled by smoltcp.
pub fn random_ipv4_hdr<R: RngCore>(rng: &mut R, ttl: u8) -> Vec<u8> {
    let ihl: u8 = rng.random_range(5..=15);
    let len = usize::from(ihl) * 4;
    let mut b = vec![0u8; len];
    rng.fill_bytes(&mut b);
    b[0] = 0x40 | ihl;
    b[8] = ttl;
    smoltcp_fill(&mut b);
    b
}

/// Recompute the header checksum from scratch.
pub fn smoltcp_fill(bytes: &mut [u8]) {
    let mut pkt = Ipv4Packet::new_unchecked(bytes);
    pkt.fill_checksum();
}

pub fn smoltcp_verify(bytes: &[u8]) -> bool {
    Ipv4Packet::new_unchecked(bytes).verify_checksum()
}

pub fn csum_bytes(bytes: &[u8]) -> [u8; 2] {
    [bytes[Ipv4Hdr::CSUM_OFFSET], bytes[Ipv4Hdr::CSUM_OFFSET + 1]]
}

pub fn fake_helpers(seed: u64) -> (FakeHelpers, CaptureLog) {
    let log = CaptureLog::new();
    let providers = Providers { log: Box::new(log.clone()) };
    (FakeHelpers::new(providers, seed), log)
}
