// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The mode calculus.
//!
//! Each program variant is compiled for exactly one attachment: a TC
//! hook on a host or workload interface in one direction (optionally
//! on the tunnel device), or a cgroup hook. The attachment is a
//! bitmask of [`TcFlags`] fixed at build time, and every topological
//! question the forwarding code asks ("is this packet heading into the
//! host stack?") is a predicate on [`Mode`] derived from it.
//!
//! A mask mixing the cgroup bit with any of the TC bits describes no
//! real attachment. [`Mode::new`] refuses such a mask during const
//! evaluation, so a variant built with one fails to compile:
//!
//! ```compile_fail
//! use tcbpf::engine::mode::{Mode, TcFlags};
//!
//! const BAD: Mode = Mode::new(TcFlags::CGROUP.union(TcFlags::INGRESS));
//!
//! fn main() {
//!     let _ = BAD;
//! }
//! ```
//!
//! while a consistent one is an ordinary constant:
//!
//! ```
//! use tcbpf::engine::mode::{Mode, TcFlags};
//!
//! const HEP_IN: Mode = Mode::new(TcFlags::HOST_EP.union(TcFlags::INGRESS));
//! assert!(HEP_IN.to_host());
//! ```
//!
//! The mask of the variant being built comes from the
//! `TCBPF_COMPILE_FLAGS` environment variable (decimal or `0x` hex) and
//! is available as [`COMPILED`]. When unset it is zero: a TC program on
//! the egress side of a workload interface.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use tcbpf_api::Direction;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/compile_flags.rs"));
}

/// The raw mask this crate was built with.
pub const COMPILE_FLAGS: u32 = generated::COMPILE_FLAGS;

bitflags::bitflags! {
    /// The attachment bits of a program variant.
    #[derive(
        Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
    )]
    pub struct TcFlags: u32 {
        /// Attached to a host endpoint rather than a workload.
        const HOST_EP = 1 << 0;
        /// Attached on the ingress hook.
        const INGRESS = 1 << 1;
        /// Attached to the IP-in-IP tunnel device.
        const TUNNEL = 1 << 2;
        /// A cgroup program rather than a TC program.
        const CGROUP = 1 << 3;
    }
}

impl TcFlags {
    /// The TC attachment bits, mutually exclusive with [`Self::CGROUP`].
    pub const TC: Self = Self::HOST_EP.union(Self::INGRESS).union(Self::TUNNEL);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ModeError {
    #[error("mode {0:#x} sets bits outside of HOST_EP|INGRESS|TUNNEL|CGROUP")]
    UnknownBits(u32),
    #[error("mode {0:#x} mixes CGROUP with TC attachment bits")]
    CgroupWithTc(u32),
}

/// The predicates of one program variant.
///
/// A `Mode` only exists for a consistent mask; every predicate is
/// recomputed from that mask.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Mode {
    flags: TcFlags,
}

/// The mode of the variant being built.
pub const COMPILED: Mode = Mode::new(TcFlags::from_bits_retain(COMPILE_FLAGS));

// Force evaluation so that a bad TCBPF_COMPILE_FLAGS fails the build
// even when nothing reads `COMPILED`.
const _: Mode = COMPILED;

impl Mode {
    /// Check a mask, failing with the rule it breaks.
    pub const fn try_new(flags: TcFlags) -> Result<Self, ModeError> {
        let bits = flags.bits();

        if bits & !TcFlags::all().bits() != 0 {
            return Err(ModeError::UnknownBits(bits));
        }

        if bits != 0
            && flags.contains(TcFlags::CGROUP) == flags.intersects(TcFlags::TC)
        {
            return Err(ModeError::CgroupWithTc(bits));
        }

        Ok(Self { flags })
    }

    /// Build a mode, panicking on an inconsistent mask.
    ///
    /// Used in a `const` item the panic is a compile error.
    pub const fn new(flags: TcFlags) -> Self {
        match Self::try_new(flags) {
            Ok(mode) => mode,
            Err(ModeError::UnknownBits(_)) => {
                panic!("mode sets bits outside of the known TC flags")
            }
            Err(ModeError::CgroupWithTc(_)) => {
                panic!("mode mixes CGROUP with TC attachment bits")
            }
        }
    }

    pub const fn from_bits(bits: u32) -> Result<Self, ModeError> {
        Self::try_new(TcFlags::from_bits_retain(bits))
    }

    pub const fn flags(self) -> TcFlags {
        self.flags
    }

    /// Every consistent mode, in mask order.
    pub fn variants() -> impl Iterator<Item = Mode> {
        (0..=TcFlags::all().bits()).filter_map(|b| Self::from_bits(b).ok())
    }

    pub const fn ingress(self) -> bool {
        self.flags.contains(TcFlags::INGRESS)
    }

    pub const fn egress(self) -> bool {
        !self.ingress()
    }

    /// The hook direction. Cgroup programs report [`Direction::Out`].
    pub const fn direction(self) -> Direction {
        if self.ingress() { Direction::In } else { Direction::Out }
    }

    pub const fn host_ep(self) -> bool {
        self.flags.contains(TcFlags::HOST_EP)
    }

    pub const fn workload_ep(self) -> bool {
        !self.host_ep()
    }

    pub const fn tunnel(self) -> bool {
        self.flags.contains(TcFlags::TUNNEL)
    }

    pub const fn cgroup(self) -> bool {
        self.flags.contains(TcFlags::CGROUP)
    }

    /// Packet arriving from the host's external interface.
    pub const fn from_host_ep(self) -> bool {
        self.host_ep() && self.ingress()
    }

    /// Packet leaving through the host's external interface.
    pub const fn to_host_ep(self) -> bool {
        self.host_ep() && !self.ingress()
    }

    /// Packet sent by the workload. The hook on the host side of the
    /// workload's veth sees those on egress.
    pub const fn from_workload_ep(self) -> bool {
        self.workload_ep() && self.egress()
    }

    pub const fn to_workload_ep(self) -> bool {
        self.workload_ep() && self.ingress()
    }

    /// Packet entering the host's network stack.
    pub const fn to_host(self) -> bool {
        self.from_host_ep() || self.from_workload_ep()
    }

    pub const fn from_host(self) -> bool {
        !self.to_host()
    }

    /// Leaving through the tunnel device, which carries no L2 header.
    pub const fn l3_only(self) -> bool {
        self.to_host_ep() && self.tunnel()
    }

    /// Arriving on the tunnel device, so the packet was IP-in-IP
    /// decapsulated before we saw it.
    pub const fn ipip_encapped(self) -> bool {
        self.ingress() && self.tunnel()
    }

    /// Must a packet with this `ttl` be dropped with an ICMP time
    /// exceeded instead of being forwarded?
    ///
    /// Only packets routed into the host stack are checked, and not on
    /// the tunnel path where the outer header's TTL was already dealt
    /// with.
    pub const fn ttl_exceeded(self, ttl: u8) -> bool {
        self.to_host() && !self.tunnel() && ttl <= 1
    }
}

impl Default for Mode {
    fn default() -> Self {
        COMPILED
    }
}

impl TryFrom<u32> for Mode {
    type Error = ModeError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Self::from_bits(bits)
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.flags.is_empty() {
            return write!(f, "(none)");
        }

        let mut first = true;
        for (name, _) in self.flags.iter_names() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{name}")?;
            first = false;
        }

        Ok(())
    }
}
