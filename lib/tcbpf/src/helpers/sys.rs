// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Raw helper bindings.
//!
//! A helper call in BPF bytecode is `call imm` where `imm` is the
//! helper id. The backend emits exactly that for a call through a
//! function pointer whose value is the id, so each binding below is
//! the id transmuted to a pointer of the helper's C signature.
//!
//! Nothing here checks anything: pointers must be valid for the sizes
//! passed, and `ctx` must be the program's own context.

use super::HelperId;
use core::ffi::c_char;
use core::ffi::c_void;

macro_rules! helpers {
    ($(
        $(#[$attr:meta])*
        fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty = $id:ident;
    )*) => {
        $(
            $(#[$attr])*
            ///
            /// # Safety
            ///
            /// See the module documentation.
            #[inline(always)]
            pub unsafe fn $name($($arg: $ty),*) -> $ret {
                let f: unsafe extern "C" fn($($ty),*) -> $ret = unsafe {
                    core::mem::transmute(HelperId::$id as usize)
                };
                unsafe { f($($arg),*) }
            }
        )*
    };
}

helpers! {
    fn map_lookup_elem(map: *mut c_void, key: *const c_void) -> *mut c_void
        = MapLookupElem;

    fn map_update_elem(
        map: *mut c_void,
        key: *const c_void,
        value: *const c_void,
        flags: u64,
    ) -> i64 = MapUpdateElem;

    fn map_delete_elem(map: *mut c_void, key: *const c_void) -> i64
        = MapDeleteElem;

    fn ktime_get_ns() -> u64 = KtimeGetNs;

    /// Only the format is passed; it must be NUL terminated and
    /// `fmt_size` includes the NUL.
    fn trace_printk(fmt: *const c_char, fmt_size: u32) -> i64 = TracePrintk;

    fn get_prandom_u32() -> u32 = GetPrandomU32;

    fn skb_store_bytes(
        skb: *mut c_void,
        offset: u32,
        from: *const c_void,
        len: u32,
        flags: u64,
    ) -> i64 = SkbStoreBytes;

    fn l3_csum_replace(
        skb: *mut c_void,
        offset: u32,
        from: u64,
        to: u64,
        size: u64,
    ) -> i64 = L3CsumReplace;

    fn l4_csum_replace(
        skb: *mut c_void,
        offset: u32,
        from: u64,
        to: u64,
        flags: u64,
    ) -> i64 = L4CsumReplace;

    /// Does not return on success.
    fn tail_call(ctx: *mut c_void, prog_array_map: *mut c_void, index: u32)
        -> i64 = TailCall;

    fn redirect(ifindex: u32, flags: u64) -> i64 = Redirect;

    fn skb_load_bytes(
        skb: *const c_void,
        offset: u32,
        to: *mut c_void,
        len: u32,
    ) -> i64 = SkbLoadBytes;

    fn csum_diff(
        from: *const u32,
        from_size: u32,
        to: *const u32,
        to_size: u32,
        seed: u32,
    ) -> i64 = CsumDiff;

    fn skb_change_tail(skb: *mut c_void, len: u32, flags: u64) -> i64
        = SkbChangeTail;

    fn skb_change_head(skb: *mut c_void, len: u32, flags: u64) -> i64
        = SkbChangeHead;

    fn get_socket_cookie(ctx: *mut c_void) -> u64 = GetSocketCookie;

    fn skb_adjust_room(
        skb: *mut c_void,
        len_diff: i32,
        mode: u32,
        flags: u64,
    ) -> i64 = SkbAdjustRoom;

    fn redirect_map(map: *mut c_void, key: u32, flags: u64) -> i64
        = RedirectMap;

    fn fib_lookup(
        ctx: *mut c_void,
        params: *mut c_void,
        plen: i32,
        flags: u32,
    ) -> i64 = FibLookup;

    fn sock_hash_update(
        skops: *mut c_void,
        map: *mut c_void,
        key: *mut c_void,
        flags: u64,
    ) -> i64 = SockHashUpdate;

    fn msg_redirect_hash(
        msg: *mut c_void,
        map: *mut c_void,
        key: *mut c_void,
        flags: u64,
    ) -> i64 = MsgRedirectHash;
}
