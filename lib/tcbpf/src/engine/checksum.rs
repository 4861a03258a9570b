// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The internet checksum.
//!
//! A checksum field is two bytes, not a logical `u16`. It is never
//! byte-swapped: every pair of bytes (the summed data and the stored
//! checksum) is viewed as a native-endian `u16` via
//! `{to,from}_ne_bytes()`. One's complement addition commutes with
//! byte swapping (RFC 1071 §1.B), so a sum built over network-order
//! words is already in network order when stored back.
//!
//! The same holds for any constant added to a stored checksum. A
//! constant describing a change at a known position of a big-endian
//! word must itself go through [`host_to_be16`] before being added,
//! which is what [`incremental_add`] expects.
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1141 Incremental Updating of the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update
//!
//! [`host_to_be16`]: super::byteorder::host_to_be16

use super::ip4::Ipv4Hdr;
use zerocopy::IntoBytes;

/// The checksum as stored in a header: the one's complement of the
/// one's complement sum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes of a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    /// Finalize the rolling checksum and put it into header form.
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement sum.
///
/// Carries accumulate in the upper half of the `u32` and are only
/// folded by [`Checksum::finalize`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Create a new rolling checksum, starting with `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Add the contents of `bytes` to the sum.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Remove the contents of `bytes` from the sum.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Add 32-bit words as they sit in memory.
    pub fn add_words(&mut self, words: &[u32]) {
        for w in words {
            self.add_bytes(&w.to_ne_bytes());
        }
    }

    /// Remove 32-bit words as they sit in memory.
    pub fn sub_words(&mut self, words: &[u32]) {
        for w in words {
            self.sub_bytes(&w.to_ne_bytes());
        }
    }

    /// Return the raw, unfolded sum.
    pub fn raw(&self) -> u32 {
        self.inner
    }

    /// Fold all accumulated carries and return the 16-bit sum.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: (!u16::from_ne_bytes(hc.bytes())) as u32 }
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self { inner: self.inner + other.inner }
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, other: Self) {
        self.inner += other.inner
    }
}

/// Add `delta` to a stored checksum and fold the carry once (RFC 1141).
///
/// `stored` is the native view of the checksum bytes and `delta` the
/// native view of the network-order adjustment. The sum of two `u16`
/// carries at most one bit out, so a single fold is exact.
#[inline(always)]
pub const fn incremental_add(stored: u16, delta: u16) -> u16 {
    let sum = stored as u32 + delta as u32;
    (sum + (sum >> 16)) as u16
}

/// Compute the checksum of an IPv4 header from scratch.
///
/// `options` are the bytes between the fixed header and the payload.
/// The checksum field is treated as zero whatever it currently holds.
pub fn ipv4_header_checksum(
    hdr: &Ipv4Hdr,
    options: &[u8],
) -> HeaderChecksum {
    let fixed = hdr.as_bytes();
    let mut csum = Checksum::compute(&fixed[..Ipv4Hdr::CSUM_OFFSET]);
    csum.add_bytes(&fixed[Ipv4Hdr::CSUM_OFFSET + 2..]);
    csum.add_bytes(options);
    HeaderChecksum::from(csum)
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);

    for pair in &mut chunks {
        csum += u16::from_ne_bytes([pair[0], pair[1]]) as u32;
    }

    // An odd trailing byte is padded with zero on the right, which
    // places it in the first byte of the native view.
    if let [last] = chunks.remainder() {
        csum += u16::from_ne_bytes([*last, 0]) as u32;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);

    for pair in &mut chunks {
        csum += (!u16::from_ne_bytes([pair[0], pair[1]])) as u32;
    }

    if let [last] = chunks.remainder() {
        csum += (!u16::from_ne_bytes([*last, 0])) as u32;
    }

    csum
}
