// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The helpers as the kernel provides them.

use super::CsumReplaceFlags;
use super::HelperError;
use super::Helpers;
use super::Map;
use super::RedirectDir;
use super::TcAction;
use super::UpdateFlag;
use super::check;
use super::sys;
use core::cell::UnsafeCell;
use core::ffi::CStr;
use core::ffi::c_void;
use core::marker::PhantomData;

pub const BPF_MAP_TYPE_HASH: u32 = 1;
pub const BPF_MAP_TYPE_PROG_ARRAY: u32 = 3;
pub const BPF_MAP_TYPE_LPM_TRIE: u32 = 11;
pub const BPF_MAP_TYPE_DEVMAP: u32 = 14;

/// LPM tries must be created without preallocation.
pub const BPF_F_NO_PREALLOC: u32 = 1;

/// The legacy `struct bpf_map_def`, as placed in the `maps` section
/// for the loader to create.
#[repr(C)]
pub struct MapDef {
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub map_flags: u32,
}

/// A map declared by the program. Declare one as a `static` in the
/// `maps` link section.
#[repr(transparent)]
pub struct KernelMap<K, V> {
    def: UnsafeCell<MapDef>,
    _kv: PhantomData<(K, V)>,
}

// The loader rewrites references to the definition into a map fd;
// the program never reads or writes the definition itself.
unsafe impl<K, V> Sync for KernelMap<K, V> {}

impl<K, V> KernelMap<K, V> {
    const fn with_type(
        map_type: u32,
        max_entries: u32,
        map_flags: u32,
    ) -> Self {
        Self {
            def: UnsafeCell::new(MapDef {
                map_type,
                key_size: core::mem::size_of::<K>() as u32,
                value_size: core::mem::size_of::<V>() as u32,
                max_entries,
                map_flags,
            }),
            _kv: PhantomData,
        }
    }

    pub const fn hash(max_entries: u32) -> Self {
        Self::with_type(BPF_MAP_TYPE_HASH, max_entries, 0)
    }

    pub const fn lpm_trie(max_entries: u32) -> Self {
        Self::with_type(BPF_MAP_TYPE_LPM_TRIE, max_entries, BPF_F_NO_PREALLOC)
    }

    fn as_ptr(&self) -> *mut c_void {
        self.def.get() as *mut c_void
    }
}

impl KernelMap<u32, u32> {
    pub const fn prog_array(max_entries: u32) -> Self {
        Self::with_type(BPF_MAP_TYPE_PROG_ARRAY, max_entries, 0)
    }

    pub const fn devmap(max_entries: u32) -> Self {
        Self::with_type(BPF_MAP_TYPE_DEVMAP, max_entries, 0)
    }
}

impl<K, V: Copy> Map<K, V> for KernelMap<K, V> {
    fn lookup(&self, key: &K) -> Option<V> {
        let value = unsafe {
            sys::map_lookup_elem(
                self.as_ptr(),
                key as *const K as *const c_void,
            )
        } as *const V;

        if value.is_null() {
            return None;
        }

        // Another CPU may be writing the slot.
        Some(unsafe { core::ptr::read_unaligned(value) })
    }

    fn update(
        &self,
        key: &K,
        value: &V,
        flags: UpdateFlag,
    ) -> Result<(), HelperError> {
        check(unsafe {
            sys::map_update_elem(
                self.as_ptr(),
                key as *const K as *const c_void,
                value as *const V as *const c_void,
                flags.raw(),
            )
        })
        .map(|_| ())
    }

    fn delete(&self, key: &K) -> Result<(), HelperError> {
        check(unsafe {
            sys::map_delete_elem(
                self.as_ptr(),
                key as *const K as *const c_void,
            )
        })
        .map(|_| ())
    }
}

/// The `struct __sk_buff` context of a classifier.
#[repr(transparent)]
pub struct SkBuff {
    ctx: *mut c_void,
}

impl SkBuff {
    /// # Safety
    ///
    /// `ctx` must be the context pointer the program was entered with.
    pub unsafe fn from_ctx(ctx: *mut c_void) -> Self {
        Self { ctx }
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.ctx
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct KernelHelpers;

impl Helpers for KernelHelpers {
    type Skb = SkBuff;
    type ProgArray = KernelMap<u32, u32>;
    type DevMap = KernelMap<u32, u32>;

    #[inline(always)]
    fn ktime_get_ns(&self) -> u64 {
        unsafe { sys::ktime_get_ns() }
    }

    #[inline(always)]
    fn get_prandom_u32(&self) -> u32 {
        unsafe { sys::get_prandom_u32() }
    }

    fn trace(&self, msg: &CStr) -> Result<(), HelperError> {
        let len = msg.to_bytes_with_nul().len() as u32;
        check(unsafe { sys::trace_printk(msg.as_ptr(), len) }).map(|_| ())
    }

    fn csum_diff(
        &self,
        from: &[u32],
        to: &[u32],
        seed: u32,
    ) -> Result<u32, HelperError> {
        let ret = check(unsafe {
            sys::csum_diff(
                from.as_ptr(),
                (from.len() * 4) as u32,
                to.as_ptr(),
                (to.len() * 4) as u32,
                seed,
            )
        })?;
        Ok(ret as u32)
    }

    fn redirect(&self, ifindex: u32, dir: RedirectDir) -> TcAction {
        let ret = unsafe { sys::redirect(ifindex, dir.raw()) };
        TcAction::from_raw(ret as i32).unwrap_or(TcAction::Shot)
    }

    fn redirect_map(
        &self,
        map: &Self::DevMap,
        key: u32,
        fallback: TcAction,
    ) -> TcAction {
        let ret = unsafe { sys::redirect_map(map.as_ptr(), key, 0) };
        match TcAction::from_raw(ret as i32) {
            Some(TcAction::Redirect) => TcAction::Redirect,
            _ => fallback,
        }
    }

    fn tail_call(
        &self,
        skb: &mut Self::Skb,
        progs: &Self::ProgArray,
        index: u32,
    ) -> Result<TcAction, HelperError> {
        unsafe { sys::tail_call(skb.ctx, progs.as_ptr(), index) };
        Err(HelperError::TailCallMissing { index })
    }

    fn skb_load_bytes(
        &self,
        skb: &Self::Skb,
        offset: u32,
        to: &mut [u8],
    ) -> Result<(), HelperError> {
        check(unsafe {
            sys::skb_load_bytes(
                skb.ctx,
                offset,
                to.as_mut_ptr() as *mut c_void,
                to.len() as u32,
            )
        })
        .map(|_| ())
    }

    fn skb_store_bytes(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: &[u8],
        flags: u64,
    ) -> Result<(), HelperError> {
        check(unsafe {
            sys::skb_store_bytes(
                skb.ctx,
                offset,
                from.as_ptr() as *const c_void,
                from.len() as u32,
                flags,
            )
        })
        .map(|_| ())
    }

    fn l3_csum_replace(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: u64,
        to: u64,
        flags: CsumReplaceFlags,
    ) -> Result<(), HelperError> {
        check(unsafe {
            sys::l3_csum_replace(skb.ctx, offset, from, to, flags.bits())
        })
        .map(|_| ())
    }

    fn l4_csum_replace(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: u64,
        to: u64,
        flags: CsumReplaceFlags,
    ) -> Result<(), HelperError> {
        check(unsafe {
            sys::l4_csum_replace(skb.ctx, offset, from, to, flags.bits())
        })
        .map(|_| ())
    }

    fn get_socket_cookie(&self, skb: &Self::Skb) -> u64 {
        unsafe { sys::get_socket_cookie(skb.ctx) }
    }
}
