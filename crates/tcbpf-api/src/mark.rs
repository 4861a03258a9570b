// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet mark vocabulary.
//!
//! A program that has handled a packet leaves a mark on the skb so
//! that later stages (iptables, the other side of a veth, a program
//! attached further down the path) know what was already decided.
//! Every mark we produce carries [`SEEN`] under [`SEEN_MASK`]; the
//! nibble below that encodes the decision. Consumers must mask with
//! [`SEEN_MASK`] before comparing, bits below the decision nibble may
//! be owned by someone else.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The pattern identifying a mark as ours.
pub const SEEN: u32 = 0xca10_0000;

/// The bits of the mark reserved for [`SEEN`].
pub const SEEN_MASK: u32 = 0xfff0_0000;

/// The bits below [`SEEN_MASK`] which carry the decision.
pub const DECISION_MASK: u32 = 0x000f_0000;

/// Set on every bypass variant.
const BYPASS_BIT: u32 = 0x0001_0000;

pub const MARK_BYPASS: u32 = SEEN | BYPASS_BIT;
pub const MARK_BYPASS_FWD: u32 = SEEN | 0x0003_0000;
pub const MARK_BYPASS_NAT_RET_ENCAPED: u32 = SEEN | 0x0005_0000;
pub const MARK_NAT_OUT: u32 = SEEN | 0x0008_0000;

const DECISIONS: [u32; 4] =
    [MARK_BYPASS, MARK_BYPASS_FWD, MARK_BYPASS_NAT_RET_ENCAPED, MARK_NAT_OUT];

const fn vocabulary_is_consistent() -> bool {
    let mut i = 0;
    while i < DECISIONS.len() {
        let d = DECISIONS[i];
        if d & SEEN_MASK != SEEN || d & DECISION_MASK == 0 {
            return false;
        }
        if d & !(SEEN_MASK | DECISION_MASK) != 0 {
            return false;
        }

        let mut j = i + 1;
        while j < DECISIONS.len() {
            if d & DECISION_MASK == DECISIONS[j] & DECISION_MASK {
                return false;
            }
            j += 1;
        }
        i += 1;
    }

    SEEN & !SEEN_MASK == 0
}

const _: () = assert!(
    vocabulary_is_consistent(),
    "mark decisions collide with each other or with the seen mask"
);

/// A decision recorded in the packet mark.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum SkbMark {
    /// Seen by the dataplane, no further decision.
    Seen,
    /// Policy already accepted the packet, skip it downstream.
    Bypass,
    /// Bypass and forward the packet without going up the stack.
    BypassFwd,
    /// Bypass; the packet is the return leg of a NAT flow which was
    /// IP-in-IP encapsulated.
    BypassNatRetEncaped,
    /// The packet needs NAT outgoing (masquerade) treatment.
    NatOut,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MarkError {
    #[error("mark {0:#010x} was not set by the dataplane")]
    NotSeen(u32),
    #[error("mark {0:#010x} carries an unknown decision")]
    UnknownDecision(u32),
}

impl SkbMark {
    pub const fn raw(self) -> u32 {
        match self {
            Self::Seen => SEEN,
            Self::Bypass => MARK_BYPASS,
            Self::BypassFwd => MARK_BYPASS_FWD,
            Self::BypassNatRetEncaped => MARK_BYPASS_NAT_RET_ENCAPED,
            Self::NatOut => MARK_NAT_OUT,
        }
    }

    /// Was the mark left by the dataplane?
    pub const fn seen(raw: u32) -> bool {
        raw & SEEN_MASK == SEEN
    }

    pub const fn is_bypass(self) -> bool {
        self.raw() & BYPASS_BIT != 0
    }

    /// Return `raw` with the decision bits replaced by `self`,
    /// keeping whatever other owners put below the decision nibble.
    pub const fn apply(self, raw: u32) -> u32 {
        (raw & !(SEEN_MASK | DECISION_MASK)) | self.raw()
    }
}

impl TryFrom<u32> for SkbMark {
    type Error = MarkError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        if !Self::seen(raw) {
            return Err(MarkError::NotSeen(raw));
        }

        match (raw & DECISION_MASK) | SEEN {
            SEEN => Ok(Self::Seen),
            MARK_BYPASS => Ok(Self::Bypass),
            MARK_BYPASS_FWD => Ok(Self::BypassFwd),
            MARK_BYPASS_NAT_RET_ENCAPED => Ok(Self::BypassNatRetEncaped),
            MARK_NAT_OUT => Ok(Self::NatOut),
            _ => Err(MarkError::UnknownDecision(raw)),
        }
    }
}

impl From<SkbMark> for u32 {
    fn from(mark: SkbMark) -> u32 {
        mark.raw()
    }
}

impl Display for SkbMark {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Seen => "SEEN",
            Self::Bypass => "BYPASS",
            Self::BypassFwd => "BYPASS_FWD",
            Self::BypassNatRetEncaped => "BYPASS_NAT_RET_ENCAPED",
            Self::NatOut => "NAT_OUT",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raw_values() {
        assert_eq!(SkbMark::Seen.raw(), 0xca10_0000);
        assert_eq!(SkbMark::Bypass.raw(), 0xca11_0000);
        assert_eq!(SkbMark::BypassFwd.raw(), 0xca13_0000);
        assert_eq!(SkbMark::BypassNatRetEncaped.raw(), 0xca15_0000);
        assert_eq!(SkbMark::NatOut.raw(), 0xca18_0000);
    }

    #[test]
    fn bypass_family() {
        assert!(SkbMark::Bypass.is_bypass());
        assert!(SkbMark::BypassFwd.is_bypass());
        assert!(SkbMark::BypassNatRetEncaped.is_bypass());
        assert!(!SkbMark::NatOut.is_bypass());
        assert!(!SkbMark::Seen.is_bypass());
    }

    #[test]
    fn decode_ignores_foreign_low_bits() {
        assert_eq!(SkbMark::try_from(0xca13_00ff), Ok(SkbMark::BypassFwd));
        assert_eq!(SkbMark::try_from(0xca10_1234), Ok(SkbMark::Seen));
    }

    #[test]
    fn decode_rejects() {
        assert_eq!(
            SkbMark::try_from(0x0003_0000),
            Err(MarkError::NotSeen(0x0003_0000))
        );
        assert_eq!(
            SkbMark::try_from(0xca12_0000),
            Err(MarkError::UnknownDecision(0xca12_0000))
        );
    }

    #[test]
    fn apply_preserves_low_bits() {
        let raw = SkbMark::NatOut.apply(0x0000_beef);
        assert_eq!(raw, 0xca18_beef);
        let raw = SkbMark::Bypass.apply(raw);
        assert_eq!(raw, 0xca11_beef);
        assert_eq!(SkbMark::try_from(raw), Ok(SkbMark::Bypass));
    }
}
