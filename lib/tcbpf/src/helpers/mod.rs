// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The helper import table.
//!
//! A program reaches the kernel only through helpers, each named by a
//! fixed numeric id ([`HelperId`]). The rest of this crate is written
//! against the [`Helpers`] and [`Map`] traits so the same program
//! logic runs against the real helpers on the BPF target
//! ([`kernel`]) and against an in-process stand-in under `std`
//! ([`fake`]).

use core::ffi::CStr;
use core::fmt;
use core::fmt::Display;

pub mod id;
pub use id::HelperId;

#[cfg(target_arch = "bpf")]
pub mod kernel;
#[cfg(target_arch = "bpf")]
pub mod sys;

#[cfg(feature = "std")]
pub mod fake;

// Kernel errno values the helpers are known to return.
pub const ENOENT: i64 = 2;
pub const E2BIG: i64 = 7;
pub const EFAULT: i64 = 14;
pub const EEXIST: i64 = 17;
pub const EINVAL: i64 = 22;

/// `bpf_skb_store_bytes()` flags.
pub const BPF_F_RECOMPUTE_CSUM: u64 = 1 << 0;
pub const BPF_F_INVALIDATE_HASH: u64 = 1 << 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum HelperError {
    #[error("no such entry")]
    NoEntry,
    #[error("entry exists")]
    Exists,
    #[error("map is full")]
    Full,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("access outside the packet")]
    OutOfBounds,
    #[error("no program at tail call index {index}")]
    TailCallMissing { index: u32 },
    #[error("helper failed: errno {0}")]
    Errno(i64),
}

impl HelperError {
    /// Map the negative errno returned by a helper.
    pub fn from_errno(ret: i64) -> Self {
        match -ret {
            ENOENT => Self::NoEntry,
            EEXIST => Self::Exists,
            E2BIG => Self::Full,
            EINVAL => Self::InvalidArgument,
            EFAULT => Self::OutOfBounds,
            _ => Self::Errno(ret),
        }
    }

    /// The negative errno a kernel helper would have returned.
    pub fn errno(&self) -> i64 {
        match self {
            Self::NoEntry => -ENOENT,
            Self::Exists => -EEXIST,
            Self::Full => -E2BIG,
            Self::InvalidArgument => -EINVAL,
            Self::OutOfBounds => -EFAULT,
            Self::TailCallMissing { .. } => -ENOENT,
            Self::Errno(ret) => *ret,
        }
    }
}

/// Split a helper return value into its success value and error.
#[inline(always)]
pub fn check(ret: i64) -> Result<i64, HelperError> {
    if ret < 0 { Err(HelperError::from_errno(ret)) } else { Ok(ret) }
}

/// The `flags` argument of `bpf_map_update_elem()`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u64)]
pub enum UpdateFlag {
    /// Create a new entry or update an existing one.
    #[default]
    Any = 0,
    /// Create a new entry only.
    NoExist = 1,
    /// Update an existing entry only.
    Exist = 2,
}

impl UpdateFlag {
    pub fn raw(self) -> u64 {
        self as u64
    }
}

/// Which side of the target device a redirected packet enters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u64)]
pub enum RedirectDir {
    Egress = 0,
    Ingress = 1,
}

impl RedirectDir {
    pub fn raw(self) -> u64 {
        self as u64
    }
}

impl Display for RedirectDir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Egress => "egress",
            Self::Ingress => "ingress",
        };
        write!(f, "{s}")
    }
}

bitflags::bitflags! {
    /// The `flags` argument of `bpf_l{3,4}_csum_replace()`.
    ///
    /// The low nibble is the size of the replaced field: 2, 4, or 0
    /// for a `to` holding a precomputed [`Helpers::csum_diff`].
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct CsumReplaceFlags: u64 {
        const SIZE_2 = 2;
        const SIZE_4 = 4;
        /// The field is part of the L4 pseudo header.
        const PSEUDO_HDR = 0x10;
        /// Leave a zero (UDP "no checksum") alone and never write one.
        const MARK_MANGLED_0 = 0x20;
    }
}

impl CsumReplaceFlags {
    pub const HDR_FIELD_MASK: u64 = 0xf;

    pub fn size(&self) -> u64 {
        self.bits() & Self::HDR_FIELD_MASK
    }
}

/// The verdict of a TC classifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum TcAction {
    Unspec = -1,
    Ok = 0,
    Shot = 2,
    Redirect = 7,
}

impl TcAction {
    pub fn raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Self::Unspec),
            0 => Some(Self::Ok),
            2 => Some(Self::Shot),
            7 => Some(Self::Redirect),
            _ => None,
        }
    }
}

impl Display for TcAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Unspec => "TC_ACT_UNSPEC",
            Self::Ok => "TC_ACT_OK",
            Self::Shot => "TC_ACT_SHOT",
            Self::Redirect => "TC_ACT_REDIRECT",
        };
        write!(f, "{s}")
    }
}

/// A key/value map shared with the kernel and with userspace.
///
/// Each operation is atomic for its key; nothing orders operations on
/// different keys.
pub trait Map<K, V> {
    fn lookup(&self, key: &K) -> Option<V>;

    fn update(
        &self,
        key: &K,
        value: &V,
        flags: UpdateFlag,
    ) -> Result<(), HelperError>;

    fn delete(&self, key: &K) -> Result<(), HelperError>;
}

/// The helpers a classifier calls on its packet and its environment.
pub trait Helpers {
    /// The packet context handed to the program.
    type Skb;
    /// A `BPF_MAP_TYPE_PROG_ARRAY` to tail call into.
    type ProgArray;
    /// A `BPF_MAP_TYPE_DEVMAP` of ifindexes to redirect to.
    type DevMap;

    /// Monotonic time in nanoseconds.
    fn ktime_get_ns(&self) -> u64;

    fn get_prandom_u32(&self) -> u32;

    /// Emit a debug line (`bpf_trace_printk`).
    fn trace(&self, msg: &CStr) -> Result<(), HelperError>;

    /// The one's complement sum of `to` minus that of `from`, plus
    /// `seed`, as a 32-bit unfolded checksum.
    ///
    /// How carries are spread over the 32 bits depends on the backend
    /// (and on the kernel's architecture), so only the value folded to
    /// 16 bits can be compared between them.
    fn csum_diff(
        &self,
        from: &[u32],
        to: &[u32],
        seed: u32,
    ) -> Result<u32, HelperError>;

    /// Send the packet to `ifindex` once the program returns
    /// [`TcAction::Redirect`], which is what this returns.
    fn redirect(&self, ifindex: u32, dir: RedirectDir) -> TcAction;

    /// Redirect through entry `key` of `map`, returning `fallback` if
    /// there is no such entry.
    fn redirect_map(
        &self,
        map: &Self::DevMap,
        key: u32,
        fallback: TcAction,
    ) -> TcAction;

    /// Jump to program `index` of `progs`.
    ///
    /// A successful tail call does not return to the caller: the
    /// verdict is that of the called program. An empty slot falls
    /// through with [`HelperError::TailCallMissing`].
    fn tail_call(
        &self,
        skb: &mut Self::Skb,
        progs: &Self::ProgArray,
        index: u32,
    ) -> Result<TcAction, HelperError>;

    fn skb_load_bytes(
        &self,
        skb: &Self::Skb,
        offset: u32,
        to: &mut [u8],
    ) -> Result<(), HelperError>;

    fn skb_store_bytes(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: &[u8],
        flags: u64,
    ) -> Result<(), HelperError>;

    /// Fix the L3 checksum at `offset` after a field changed from
    /// `from` to `to`. Both values are the raw (network order) bytes
    /// of the field.
    fn l3_csum_replace(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: u64,
        to: u64,
        flags: CsumReplaceFlags,
    ) -> Result<(), HelperError>;

    /// As [`Helpers::l3_csum_replace`], for an L4 checksum.
    fn l4_csum_replace(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: u64,
        to: u64,
        flags: CsumReplaceFlags,
    ) -> Result<(), HelperError>;

    /// The cookie of the socket owning the packet, or zero.
    fn get_socket_cookie(&self, skb: &Self::Skb) -> u64;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(HelperError::from_errno(-2), HelperError::NoEntry);
        assert_eq!(HelperError::from_errno(-17), HelperError::Exists);
        assert_eq!(HelperError::from_errno(-7), HelperError::Full);
        assert_eq!(HelperError::from_errno(-22), HelperError::InvalidArgument);
        assert_eq!(HelperError::from_errno(-14), HelperError::OutOfBounds);
        assert_eq!(HelperError::from_errno(-95), HelperError::Errno(-95));

        for e in [
            HelperError::NoEntry,
            HelperError::Exists,
            HelperError::Full,
            HelperError::InvalidArgument,
            HelperError::OutOfBounds,
            HelperError::Errno(-95),
        ] {
            assert_eq!(HelperError::from_errno(e.errno()), e);
        }
    }

    #[test]
    fn check_splits_return() {
        assert_eq!(check(0), Ok(0));
        assert_eq!(check(12), Ok(12));
        assert_eq!(check(-2), Err(HelperError::NoEntry));
    }

    #[test]
    fn csum_flags() {
        let f = CsumReplaceFlags::SIZE_4 | CsumReplaceFlags::PSEUDO_HDR;
        assert_eq!(f.size(), 4);
        assert_eq!(f.bits(), 0x14);
        assert_eq!(CsumReplaceFlags::MARK_MANGLED_0.size(), 0);
    }

    #[test]
    fn tc_action_raw() {
        for act in [
            TcAction::Unspec,
            TcAction::Ok,
            TcAction::Shot,
            TcAction::Redirect,
        ] {
            assert_eq!(TcAction::from_raw(act.raw()), Some(act));
        }
        assert_eq!(TcAction::from_raw(1), None);
    }
}
