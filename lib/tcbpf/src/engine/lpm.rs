// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Longest prefix match keys.
//!
//! An LPM trie map compares keys as `struct bpf_lpm_trie_key`: a
//! host-order `u32` prefix length followed by the data bytes, compared
//! most significant bit first. For IPv4 the data is the address exactly
//! as it appears on the wire; no byte order conversion is applied.

use tcbpf_api::Ipv4Addr;
use tcbpf_api::Ipv4Cidr;
use tcbpf_api::Ipv4PrefixLen;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// An IPv4 LPM trie key.
#[repr(C)]
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
)]
pub struct Ipv4LpmKey {
    pub prefix_len: u32,
    pub addr: [u8; 4],
}

const _: () = {
    assert!(core::mem::size_of::<Ipv4LpmKey>() == 8);
    assert!(core::mem::offset_of!(Ipv4LpmKey, prefix_len) == 0);
    assert!(core::mem::offset_of!(Ipv4LpmKey, addr) == 4);
};

impl Ipv4LpmKey {
    /// The largest prefix length an IPv4 key may carry.
    pub const MAX_PREFIX_LEN: u32 = 32;

    pub fn new(prefix_len: Ipv4PrefixLen, addr: Ipv4Addr) -> Self {
        Self { prefix_len: u32::from(prefix_len.val()), addr: addr.bytes() }
    }

    /// Build a key from a prefix length and an address register loaded
    /// straight from a header (network order in memory).
    ///
    /// The caller must have checked `prefix_len <= 32`; the value is
    /// stored as given, never clamped.
    #[inline(always)]
    pub const fn from_raw(prefix_len: u32, addr: u32) -> Self {
        debug_assert!(prefix_len <= Self::MAX_PREFIX_LEN);
        Self { prefix_len, addr: addr.to_ne_bytes() }
    }

    /// A full-length key for looking up a single address.
    pub fn host(addr: Ipv4Addr) -> Self {
        Self::new(Ipv4PrefixLen::NETMASK_ALL, addr)
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.addr)
    }

    /// The prefix length, if it is one a key may legally carry.
    pub fn prefix(&self) -> Option<Ipv4PrefixLen> {
        u8::try_from(self.prefix_len)
            .ok()
            .and_then(|p| Ipv4PrefixLen::new(p).ok())
    }

    /// Does the prefix described by this key cover `other`'s?
    ///
    /// True when this key is no more specific than `other` and the
    /// leading `prefix_len` bits of both addresses agree; this is the
    /// match rule of the LPM trie.
    pub fn covers(&self, other: &Ipv4LpmKey) -> bool {
        let (Some(mine), Some(theirs)) = (self.prefix(), other.prefix()) else {
            return false;
        };

        mine <= theirs
            && other.addr().safe_mask(mine) == self.addr().safe_mask(mine)
    }
}

impl From<Ipv4Cidr> for Ipv4LpmKey {
    fn from(cidr: Ipv4Cidr) -> Self {
        let (ip, prefix_len) = cidr.parts();
        Self::new(prefix_len, ip)
    }
}
