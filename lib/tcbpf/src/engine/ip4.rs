// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPv4 header primitives.
//!
//! [`Ipv4Hdr`] overlays the fixed 20 bytes of a header in place. All
//! accessors keep the wire representation: multi-byte fields are read
//! through the byte order layer, and the flag tests compare the raw
//! field against pre-swapped constants instead of swapping the field.

use super::byteorder::be16_to_host;
use super::byteorder::host_to_be16;
use super::checksum::incremental_add;
use super::checksum::ipv4_header_checksum;
use super::mode::Mode;
use tcbpf_api::Ipv4Addr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_HDR_LEN_MASK: u8 = 0x0F;
pub const IPV4_HDR_VER_SHIFT: u8 = 4;
pub const IPV4_VERSION: u8 = 4;

/// Don't Fragment, in host order.
pub const IP_DF: u16 = 0x4000;
/// More Fragments, in host order.
pub const IP_MF: u16 = 0x2000;
/// Fragment offset, in host order.
pub const IP_OFFSET: u16 = 0x1fff;

/// The TTL is the high byte of the big-endian (TTL, protocol) word, so
/// decrementing it lowers that word by 0x0100 and raises the stored
/// checksum by the same amount.
const TTL_DEC_CSUM_DELTA: u16 = host_to_be16(0x0100);

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Ipv4HdrError {
    #[error("buffer of {len} bytes is too short for an IPv4 header")]
    Truncated { len: usize },
    #[error("bad IP version: {vsn}")]
    BadVersion { vsn: u8 },
    #[error("header length {hdr_len} is shorter than 20 or exceeds the buffer")]
    BadHeaderLen { hdr_len: u16 },
}

/// The fixed part of an IPv4 header, as it sits in the packet.
///
/// Note: For now we keep this unaligned, a header is rarely 4-byte
/// aligned behind an Ethernet header.
#[repr(C)]
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
pub struct Ipv4Hdr {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_off: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

const _: () = assert!(core::mem::size_of::<Ipv4Hdr>() == Ipv4Hdr::BASE_SIZE);

impl Ipv4Hdr {
    pub const BASE_SIZE: usize = 20;
    pub const CSUM_OFFSET: usize = 10;
    pub const TTL_OFFSET: usize = 8;

    /// Overlay a header onto the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<&Self, Ipv4HdrError> {
        let (hdr, _) = Self::ref_from_prefix(bytes)
            .map_err(|_| Ipv4HdrError::Truncated { len: bytes.len() })?;
        hdr.validate(bytes.len())?;
        Ok(hdr)
    }

    /// Overlay a mutable header onto the front of `bytes`.
    pub fn parse_mut(bytes: &mut [u8]) -> Result<&mut Self, Ipv4HdrError> {
        let len = bytes.len();
        let (hdr, _) = Self::mut_from_prefix(bytes)
            .map_err(|_| Ipv4HdrError::Truncated { len })?;
        hdr.validate(len)?;
        Ok(hdr)
    }

    fn validate(&self, avail: usize) -> Result<(), Ipv4HdrError> {
        match self.version() {
            IPV4_VERSION => {}
            vsn => return Err(Ipv4HdrError::BadVersion { vsn }),
        }

        let hdr_len = self.hdr_len();
        if (hdr_len as usize) < Self::BASE_SIZE || hdr_len as usize > avail {
            return Err(Ipv4HdrError::BadHeaderLen { hdr_len });
        }

        Ok(())
    }

    /// Return the reported IP version field.
    #[inline]
    pub fn version(&self) -> u8 {
        self.ver_hdr_len >> IPV4_HDR_VER_SHIFT
    }

    /// Return the header length, in bytes.
    #[inline]
    pub fn hdr_len(&self) -> u16 {
        u16::from((self.ver_hdr_len & IPV4_HDR_LEN_MASK) * 4)
    }

    #[inline]
    pub fn total_len(&self) -> u16 {
        be16_to_host(u16::from_ne_bytes(self.total_len))
    }

    #[inline]
    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src)
    }

    #[inline]
    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst)
    }

    /// The flags and fragment offset word exactly as loaded from the
    /// packet, i.e. still in network order.
    #[inline]
    pub fn frag_off_raw(&self) -> u16 {
        u16::from_ne_bytes(self.frag_off)
    }

    /// Is the Don't Fragment bit set?
    #[inline]
    pub fn is_dnf(&self) -> bool {
        self.frag_off_raw() & host_to_be16(IP_DF) != 0
    }

    /// The fragment offset bits, left in network order. Zero for an
    /// unfragmented packet and for the first fragment.
    #[inline]
    pub fn frag_no(&self) -> u16 {
        self.frag_off_raw() & host_to_be16(IP_OFFSET)
    }

    /// The fragment offset in units of 8 bytes.
    #[inline]
    pub fn frag_offset(&self) -> u16 {
        be16_to_host(self.frag_no())
    }

    /// Is this packet any fragment of a larger datagram, including the
    /// first one (MF set, offset zero)?
    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.frag_off_raw() & host_to_be16(IP_MF | IP_OFFSET) != 0
    }

    /// Decrement the TTL and patch the checksum to match (RFC 1141).
    ///
    /// Only one byte changes, by a known amount, so the stored
    /// checksum is adjusted with a single carry fold rather than being
    /// recomputed. Whether the packet may be forwarded at all is
    /// [`Mode::ttl_exceeded`]'s call, not ours: a TTL of zero wraps.
    #[inline(always)]
    pub fn dec_ttl(&mut self) {
        self.ttl = self.ttl.wrapping_sub(1);
        let csum = u16::from_ne_bytes(self.csum);
        self.csum = incremental_add(csum, TTL_DEC_CSUM_DELTA).to_ne_bytes();
    }

    /// Must this packet be dropped with an ICMP time exceeded when
    /// handled by a program of the given `mode`?
    #[inline]
    pub fn ttl_exceeded(&self, mode: Mode) -> bool {
        mode.ttl_exceeded(self.ttl)
    }
}

/// Decrement the TTL of the IPv4 header at the front of `bytes`.
pub fn ip_dec_ttl(bytes: &mut [u8]) -> Result<(), Ipv4HdrError> {
    Ipv4Hdr::parse_mut(bytes)?.dec_ttl();
    Ok(())
}

/// Recompute the checksum of the IPv4 header at the front of `bytes`,
/// options included.
pub fn ip_fill_checksum(bytes: &mut [u8]) -> Result<(), Ipv4HdrError> {
    let ip = Ipv4Hdr::parse(bytes)?;
    let hdr_len = usize::from(ip.hdr_len());
    let csum = ipv4_header_checksum(ip, &bytes[Ipv4Hdr::BASE_SIZE..hdr_len]);
    Ipv4Hdr::parse_mut(bytes)?.csum = csum.bytes();
    Ok(())
}
