// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Helper identifiers.
//!
//! These are kernel ABI (`enum bpf_func_id` in `uapi/linux/bpf.h`) and
//! never change once assigned. Only the helpers the dataplane uses are
//! listed.

use core::fmt;
use core::fmt::Display;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum HelperId {
    /// `void *(void *map, const void *key)`
    MapLookupElem = 1,
    /// `long (void *map, const void *key, const void *value, u64 flags)`
    MapUpdateElem = 2,
    /// `long (void *map, const void *key)`
    MapDeleteElem = 3,
    /// `u64 (void)`
    KtimeGetNs = 5,
    /// `long (const char *fmt, u32 fmt_size, ...)`
    TracePrintk = 6,
    /// `u32 (void)`
    GetPrandomU32 = 7,
    /// `long (struct sk_buff *skb, u32 offset, const void *from, u32 len, u64 flags)`
    SkbStoreBytes = 9,
    /// `long (struct sk_buff *skb, u32 offset, u64 from, u64 to, u64 size)`
    L3CsumReplace = 10,
    /// `long (struct sk_buff *skb, u32 offset, u64 from, u64 to, u64 flags)`
    L4CsumReplace = 11,
    /// `long (void *ctx, void *prog_array_map, u32 index)`
    TailCall = 12,
    /// `long (u32 ifindex, u64 flags)`
    Redirect = 23,
    /// `long (const void *skb, u32 offset, void *to, u32 len)`
    SkbLoadBytes = 26,
    /// `s64 (__be32 *from, u32 from_size, __be32 *to, u32 to_size, __wsum seed)`
    CsumDiff = 28,
    /// `long (struct sk_buff *skb, u32 len, u64 flags)`
    SkbChangeTail = 38,
    /// `long (struct sk_buff *skb, u32 len, u64 flags)`
    SkbChangeHead = 43,
    /// `u64 (void *ctx)`
    GetSocketCookie = 46,
    /// `long (struct sk_buff *skb, s32 len_diff, u32 mode, u64 flags)`
    SkbAdjustRoom = 50,
    /// `long (void *map, u32 key, u64 flags)`
    RedirectMap = 51,
    /// `long (void *ctx, struct bpf_fib_lookup *params, int plen, u32 flags)`
    FibLookup = 69,
    /// `long (struct bpf_sock_ops *skops, void *map, void *key, u64 flags)`
    SockHashUpdate = 70,
    /// `long (struct sk_msg_buff *msg, void *map, void *key, u64 flags)`
    MsgRedirectHash = 71,
}

impl HelperId {
    pub const ALL: [Self; 21] = [
        Self::MapLookupElem,
        Self::MapUpdateElem,
        Self::MapDeleteElem,
        Self::KtimeGetNs,
        Self::TracePrintk,
        Self::GetPrandomU32,
        Self::SkbStoreBytes,
        Self::L3CsumReplace,
        Self::L4CsumReplace,
        Self::TailCall,
        Self::Redirect,
        Self::SkbLoadBytes,
        Self::CsumDiff,
        Self::SkbChangeTail,
        Self::SkbChangeHead,
        Self::GetSocketCookie,
        Self::SkbAdjustRoom,
        Self::RedirectMap,
        Self::FibLookup,
        Self::SockHashUpdate,
        Self::MsgRedirectHash,
    ];

    pub const fn id(self) -> u32 {
        self as u32
    }

    /// The kernel's name for the helper.
    pub const fn name(self) -> &'static str {
        match self {
            Self::MapLookupElem => "bpf_map_lookup_elem",
            Self::MapUpdateElem => "bpf_map_update_elem",
            Self::MapDeleteElem => "bpf_map_delete_elem",
            Self::KtimeGetNs => "bpf_ktime_get_ns",
            Self::TracePrintk => "bpf_trace_printk",
            Self::GetPrandomU32 => "bpf_get_prandom_u32",
            Self::SkbStoreBytes => "bpf_skb_store_bytes",
            Self::L3CsumReplace => "bpf_l3_csum_replace",
            Self::L4CsumReplace => "bpf_l4_csum_replace",
            Self::TailCall => "bpf_tail_call",
            Self::Redirect => "bpf_redirect",
            Self::SkbLoadBytes => "bpf_skb_load_bytes",
            Self::CsumDiff => "bpf_csum_diff",
            Self::SkbChangeTail => "bpf_skb_change_tail",
            Self::SkbChangeHead => "bpf_skb_change_head",
            Self::GetSocketCookie => "bpf_get_socket_cookie",
            Self::SkbAdjustRoom => "bpf_skb_adjust_room",
            Self::RedirectMap => "bpf_redirect_map",
            Self::FibLookup => "bpf_fib_lookup",
            Self::SockHashUpdate => "bpf_sock_hash_update",
            Self::MsgRedirectHash => "bpf_msg_redirect_hash",
        }
    }
}

impl TryFrom<u32> for HelperId {
    type Error = u32;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::ALL.into_iter().find(|h| h.id() == id).ok_or(id)
    }
}

impl Display for HelperId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn abi_ids() {
        assert_eq!(HelperId::MapLookupElem.id(), 1);
        assert_eq!(HelperId::KtimeGetNs.id(), 5);
        assert_eq!(HelperId::TailCall.id(), 12);
        assert_eq!(HelperId::Redirect.id(), 23);
        assert_eq!(HelperId::CsumDiff.id(), 28);
        assert_eq!(HelperId::RedirectMap.id(), 51);
        assert_eq!(HelperId::FibLookup.id(), 69);
        assert_eq!(HelperId::MsgRedirectHash.id(), 71);
    }

    #[test]
    fn all_is_sorted_and_unique() {
        assert!(HelperId::ALL.windows(2).all(|w| w[0].id() < w[1].id()));
    }

    #[test]
    fn from_raw() {
        assert_eq!(HelperId::try_from(46), Ok(HelperId::GetSocketCookie));
        // 4 was bpf_probe_read, which the dataplane does not import.
        assert_eq!(HelperId::try_from(4), Err(4));
    }
}
