// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! An in-process helper backend.
//!
//! Program logic written against [`Helpers`] and [`Map`] can run
//! unmodified in a test or a userland tool with this backend. The
//! parts that decide correctness (map update semantics, checksum
//! fixups, LPM matching) follow the kernel's behavior; the rest
//! (clock, randomness, trace output) is made controllable.

use super::BPF_F_INVALIDATE_HASH;
use super::BPF_F_RECOMPUTE_CSUM;
use super::CsumReplaceFlags;
use super::HelperError;
use super::Helpers;
use super::Map;
use super::RedirectDir;
use super::TcAction;
use super::UpdateFlag;
use crate::engine::checksum::Checksum;
use crate::engine::checksum::HeaderChecksum;
use crate::engine::lpm::Ipv4LpmKey;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::Providers;
use core::ffi::CStr;
use core::fmt;
use core::ops::Range;
use poptrie::Poptrie;
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tcbpf_api::Ipv4Cidr;
use tcbpf_api::Ipv4PrefixLen;
use tcbpf_api::MarkError;
use tcbpf_api::SkbMark;

/// `bpf_csum_diff()` refuses more than this many bytes in total.
pub const CSUM_DIFF_MAX_BYTES: usize = 512;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(feature = "usdt")]
fn res_str(res: &Result<(), HelperError>) -> String {
    match res {
        Ok(()) => String::from("ok"),
        Err(e) => e.to_string(),
    }
}

fn map_lookup_probe(map: &str, key: &dyn fmt::Debug, hit: bool) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            let key_s = format!("{key:?}");
            crate::tcbpf_provider::map__lookup!(
                || (map, key_s.as_str(), hit as u8)
            );
        } else {
            let (_, _, _) = (map, key, hit);
        }
    }
}

fn map_update_probe(
    map: &str,
    key: &dyn fmt::Debug,
    res: &Result<(), HelperError>,
) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            let key_s = format!("{key:?}");
            let res_s = res_str(res);
            crate::tcbpf_provider::map__update!(
                || (map, key_s.as_str(), res_s.as_str())
            );
        } else {
            let (_, _, _) = (map, key, res);
        }
    }
}

fn map_delete_probe(
    map: &str,
    key: &dyn fmt::Debug,
    res: &Result<(), HelperError>,
) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            let key_s = format!("{key:?}");
            let res_s = res_str(res);
            crate::tcbpf_provider::map__delete!(
                || (map, key_s.as_str(), res_s.as_str())
            );
        } else {
            let (_, _, _) = (map, key, res);
        }
    }
}

/// A packet and the parts of its `__sk_buff` the dataplane touches.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FakeSkb {
    data: Vec<u8>,
    mark: u32,
    cookie: u64,
}

impl FakeSkb {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, ..Default::default() }
    }

    /// Give the packet an owning socket.
    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn mark(&self) -> u32 {
        self.mark
    }

    pub fn set_raw_mark(&mut self, mark: u32) {
        self.mark = mark;
    }

    /// Record a decision in the mark, leaving bits set by others.
    pub fn set_mark(&mut self, mark: SkbMark) {
        self.mark = mark.apply(self.mark);
    }

    pub fn decision(&self) -> Result<SkbMark, MarkError> {
        SkbMark::try_from(self.mark)
    }

    fn range(
        &self,
        offset: u32,
        len: usize,
    ) -> Result<Range<usize>, HelperError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(HelperError::OutOfBounds)?;
        if end > self.data.len() {
            return Err(HelperError::OutOfBounds);
        }
        Ok(start..end)
    }
}

/// A hash map with the kernel's update semantics and size limit.
pub struct FakeHashMap<K, V> {
    name: &'static str,
    max_entries: u32,
    entries: RwLock<BTreeMap<K, V>>,
}

impl<K: Clone + fmt::Debug + Ord, V: Clone> FakeHashMap<K, V> {
    pub fn new(name: &'static str, max_entries: u32) -> Self {
        Self { name, max_entries, entries: RwLock::new(BTreeMap::new()) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dump(&self) -> Vec<(K, V)> {
        read(&self.entries)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Clone + fmt::Debug + Ord, V: Clone> Map<K, V> for FakeHashMap<K, V> {
    fn lookup(&self, key: &K) -> Option<V> {
        let val = read(&self.entries).get(key).cloned();
        map_lookup_probe(self.name, key, val.is_some());
        val
    }

    fn update(
        &self,
        key: &K,
        value: &V,
        flags: UpdateFlag,
    ) -> Result<(), HelperError> {
        let res = {
            let mut entries = write(&self.entries);
            let exists = entries.contains_key(key);

            match (flags, exists) {
                (UpdateFlag::NoExist, true) => Err(HelperError::Exists),
                (UpdateFlag::Exist, false) => Err(HelperError::NoEntry),
                (_, false) if entries.len() >= self.max_entries as usize => {
                    Err(HelperError::Full)
                }
                _ => {
                    entries.insert(key.clone(), value.clone());
                    Ok(())
                }
            }
        };

        map_update_probe(self.name, key, &res);
        res
    }

    fn delete(&self, key: &K) -> Result<(), HelperError> {
        let res = match write(&self.entries).remove(key) {
            Some(_) => Ok(()),
            None => Err(HelperError::NoEntry),
        };
        map_delete_probe(self.name, key, &res);
        res
    }
}

struct LpmTables<V> {
    tree: BTreeMap<Ipv4Cidr, V>,
    // Rebuilt from `tree` on every change; serves full-length lookups.
    pt: Poptrie<V>,
}

impl<V: Clone + Default> LpmTables<V> {
    fn rebuild(&mut self) {
        let table = poptrie::Ipv4RoutingTable(
            self.tree
                .iter()
                .map(|(k, v)| ((k.ip().bytes(), k.prefix_len()), v.clone()))
                .collect(),
        );
        self.pt = Poptrie::from(table);
    }
}

/// An IPv4 LPM trie.
///
/// A lookup with key `(len, addr)` returns the value of the longest
/// stored prefix no longer than `len` which contains `addr`. Address
/// bits past a stored prefix's length are ignored, so two keys that
/// differ only there name the same entry.
pub struct FakeLpmTrie<V> {
    name: &'static str,
    max_entries: u32,
    tables: RwLock<LpmTables<V>>,
}

impl<V: Clone + Default> FakeLpmTrie<V> {
    pub fn new(name: &'static str, max_entries: u32) -> Self {
        let mut tables =
            LpmTables { tree: BTreeMap::new(), pt: Poptrie::default() };
        tables.rebuild();
        Self { name, max_entries, tables: RwLock::new(tables) }
    }

    pub fn len(&self) -> usize {
        read(&self.tables).tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dump(&self) -> Vec<(Ipv4Cidr, V)> {
        read(&self.tables)
            .tree
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    fn cidr(key: &Ipv4LpmKey) -> Option<Ipv4Cidr> {
        key.prefix().map(|p| Ipv4Cidr::new(key.addr(), p))
    }
}

impl<V: Clone + Default> Map<Ipv4LpmKey, V> for FakeLpmTrie<V> {
    fn lookup(&self, key: &Ipv4LpmKey) -> Option<V> {
        let Some(prefix) = key.prefix() else {
            map_lookup_probe(self.name, key, false);
            return None;
        };

        let tables = read(&self.tables);
        let addr = key.addr();
        let val = if prefix == Ipv4PrefixLen::NETMASK_ALL {
            tables.pt.match_v4(u32::from(addr))
        } else {
            tables
                .tree
                .iter()
                .filter(|(c, _)| {
                    c.prefix_len() <= prefix.val() && c.is_member(addr)
                })
                .max_by_key(|(c, _)| c.prefix_len())
                .map(|(_, v)| v.clone())
        };

        map_lookup_probe(self.name, key, val.is_some());
        val
    }

    fn update(
        &self,
        key: &Ipv4LpmKey,
        value: &V,
        flags: UpdateFlag,
    ) -> Result<(), HelperError> {
        let res = match Self::cidr(key) {
            None => Err(HelperError::InvalidArgument),
            Some(cidr) => {
                let mut tables = write(&self.tables);
                let exists = tables.tree.contains_key(&cidr);

                match (flags, exists) {
                    (UpdateFlag::NoExist, true) => Err(HelperError::Exists),
                    (UpdateFlag::Exist, false) => Err(HelperError::NoEntry),
                    (_, false)
                        if tables.tree.len() >= self.max_entries as usize =>
                    {
                        Err(HelperError::Full)
                    }
                    _ => {
                        tables.tree.insert(cidr, value.clone());
                        tables.rebuild();
                        Ok(())
                    }
                }
            }
        };

        map_update_probe(self.name, key, &res);
        res
    }

    fn delete(&self, key: &Ipv4LpmKey) -> Result<(), HelperError> {
        let res = match Self::cidr(key) {
            None => Err(HelperError::InvalidArgument),
            Some(cidr) => {
                let mut tables = write(&self.tables);
                match tables.tree.remove(&cidr) {
                    Some(_) => {
                        tables.rebuild();
                        Ok(())
                    }
                    None => Err(HelperError::NoEntry),
                }
            }
        };

        map_delete_probe(self.name, key, &res);
        res
    }
}

/// A program that can be installed in a [`FakeProgArray`].
pub type FakeProgram = fn(&FakeHelpers, &mut FakeSkb) -> TcAction;

/// A program array for tail calls.
pub struct FakeProgArray {
    max_entries: u32,
    progs: RwLock<BTreeMap<u32, FakeProgram>>,
}

impl FakeProgArray {
    pub fn new(max_entries: u32) -> Self {
        Self { max_entries, progs: RwLock::new(BTreeMap::new()) }
    }

    pub fn install(
        &self,
        index: u32,
        prog: FakeProgram,
    ) -> Result<(), HelperError> {
        if index >= self.max_entries {
            return Err(HelperError::Full);
        }
        write(&self.progs).insert(index, prog);
        Ok(())
    }

    pub fn remove(&self, index: u32) -> Result<(), HelperError> {
        write(&self.progs)
            .remove(&index)
            .map(|_| ())
            .ok_or(HelperError::NoEntry)
    }

    fn get(&self, index: u32) -> Option<FakeProgram> {
        read(&self.progs).get(&index).copied()
    }
}

/// A call to `bpf_redirect()` or a successful `bpf_redirect_map()`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Redirect {
    pub ifindex: u32,
    pub dir: RedirectDir,
}

pub struct FakeHelpers {
    log: Box<dyn LogProvider>,
    now: AtomicU64,
    rng: Mutex<StdRng>,
    redirects: Mutex<Vec<Redirect>>,
}

impl FakeHelpers {
    /// Create a backend whose random numbers are determined by `seed`.
    pub fn new(providers: Providers, seed: u64) -> Self {
        Self {
            log: providers.log,
            now: AtomicU64::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            redirects: Mutex::new(Vec::new()),
        }
    }

    pub fn set_time(&self, ns: u64) {
        self.now.store(ns, Ordering::Relaxed);
    }

    pub fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::Relaxed);
    }

    /// Drain the redirects recorded so far.
    pub fn take_redirects(&self) -> Vec<Redirect> {
        core::mem::take(&mut *lock(&self.redirects))
    }

    fn record_redirect(&self, ifindex: u32, dir: RedirectDir) {
        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let ingress = (dir == RedirectDir::Ingress) as u8;
                crate::tcbpf_provider::redirect!(|| (ifindex, ingress));
            }
        }
        lock(&self.redirects).push(Redirect { ifindex, dir });
    }
}

/// Fold a 32-bit one's complement sum to 16 bits without
/// complementing it.
fn fold32(csum: u32) -> u32 {
    let csum = (csum & 0xffff) + (csum >> 16);
    (csum & 0xffff) + (csum >> 16)
}

/// Rewrite the stored checksum for a field that changed from `from` to
/// `to` (RFC 1624, eqn. 3). A `size` of zero means `to` is the output
/// of `bpf_csum_diff()`.
fn csum_replace(
    stored: [u8; 2],
    from: u64,
    to: u64,
    size: u64,
) -> Result<[u8; 2], HelperError> {
    let mut csum = Checksum::from(HeaderChecksum::wrap(stored));

    match size {
        0 => csum += Checksum::from(fold32(to as u32)),
        2 => {
            csum.sub_bytes(&(from as u16).to_ne_bytes());
            csum.add_bytes(&(to as u16).to_ne_bytes());
        }
        4 => {
            csum.sub_words(&[from as u32]);
            csum.add_words(&[to as u32]);
        }
        _ => return Err(HelperError::InvalidArgument),
    }

    Ok(HeaderChecksum::from(csum).bytes())
}

impl Helpers for FakeHelpers {
    type Skb = FakeSkb;
    type ProgArray = FakeProgArray;
    type DevMap = FakeHashMap<u32, u32>;

    fn ktime_get_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn get_prandom_u32(&self) -> u32 {
        lock(&self.rng).next_u32()
    }

    fn trace(&self, msg: &CStr) -> Result<(), HelperError> {
        self.log.log(LogLevel::Note, &msg.to_string_lossy());
        Ok(())
    }

    fn csum_diff(
        &self,
        from: &[u32],
        to: &[u32],
        seed: u32,
    ) -> Result<u32, HelperError> {
        if (from.len() + to.len()) * 4 > CSUM_DIFF_MAX_BYTES {
            return Err(HelperError::InvalidArgument);
        }

        let mut csum = Checksum::new();
        csum.sub_words(from);
        csum.add_words(to);

        // The seed joins with the end-around carry of a 32-bit sum.
        let (sum, carry) = csum.raw().overflowing_add(seed);
        Ok(sum + u32::from(carry))
    }

    fn redirect(&self, ifindex: u32, dir: RedirectDir) -> TcAction {
        self.record_redirect(ifindex, dir);
        TcAction::Redirect
    }

    fn redirect_map(
        &self,
        map: &Self::DevMap,
        key: u32,
        fallback: TcAction,
    ) -> TcAction {
        match map.lookup(&key) {
            Some(ifindex) => {
                self.record_redirect(ifindex, RedirectDir::Egress);
                TcAction::Redirect
            }
            None => fallback,
        }
    }

    fn tail_call(
        &self,
        skb: &mut Self::Skb,
        progs: &Self::ProgArray,
        index: u32,
    ) -> Result<TcAction, HelperError> {
        let res = match progs.get(index) {
            Some(prog) => Ok(prog(self, skb)),
            None => Err(HelperError::TailCallMissing { index }),
        };

        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let res_s = match &res {
                    Ok(act) => act.to_string(),
                    Err(e) => e.to_string(),
                };
                crate::tcbpf_provider::tail__call!(
                    || (index, res_s.as_str())
                );
            }
        }

        res
    }

    fn skb_load_bytes(
        &self,
        skb: &Self::Skb,
        offset: u32,
        to: &mut [u8],
    ) -> Result<(), HelperError> {
        let range = skb.range(offset, to.len())?;
        to.copy_from_slice(&skb.data[range]);
        Ok(())
    }

    fn skb_store_bytes(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: &[u8],
        flags: u64,
    ) -> Result<(), HelperError> {
        if flags & !(BPF_F_RECOMPUTE_CSUM | BPF_F_INVALIDATE_HASH) != 0 {
            return Err(HelperError::InvalidArgument);
        }

        let range = skb.range(offset, from.len())?;
        skb.data[range].copy_from_slice(from);
        Ok(())
    }

    fn l3_csum_replace(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: u64,
        to: u64,
        flags: CsumReplaceFlags,
    ) -> Result<(), HelperError> {
        if flags.bits() & !CsumReplaceFlags::HDR_FIELD_MASK != 0 {
            return Err(HelperError::InvalidArgument);
        }

        // A diff carries everything in `to`.
        if flags.size() == 0 && from != 0 {
            return Err(HelperError::InvalidArgument);
        }

        let range = skb.range(offset, 2)?;
        let stored = [skb.data[range.start], skb.data[range.start + 1]];
        let csum = csum_replace(stored, from, to, flags.size())?;
        skb.data[range].copy_from_slice(&csum);
        Ok(())
    }

    fn l4_csum_replace(
        &self,
        skb: &mut Self::Skb,
        offset: u32,
        from: u64,
        to: u64,
        flags: CsumReplaceFlags,
    ) -> Result<(), HelperError> {
        let mangled = flags.contains(CsumReplaceFlags::MARK_MANGLED_0);
        let range = skb.range(offset, 2)?;
        let stored = [skb.data[range.start], skb.data[range.start + 1]];

        if mangled && stored == [0, 0] {
            return Ok(());
        }

        let mut csum = csum_replace(stored, from, to, flags.size())?;
        if mangled && csum == [0, 0] {
            csum = [0xff, 0xff];
        }

        skb.data[range].copy_from_slice(&csum);
        Ok(())
    }

    fn get_socket_cookie(&self, skb: &Self::Skb) -> u64 {
        skb.cookie
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::checksum::ipv4_header_checksum;
    use crate::engine::ip4::Ipv4Hdr;
    use crate::provider::CaptureLog;
    use tcbpf_api::Ipv4Addr;

    fn helpers(seed: u64) -> (FakeHelpers, CaptureLog) {
        let log = CaptureLog::new();
        let providers = Providers { log: Box::new(log.clone()) };
        (FakeHelpers::new(providers, seed), log)
    }

    // 4500 0073 0000 4000 4011 b861 c0a8 0001 c0a8 00c7
    const HDR: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8,
        0x61, 0xc0, 0xa8, 0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn hash_map_update_flags() {
        let map = FakeHashMap::<u32, u64>::new("conntrack", 2);
        assert_eq!(map.lookup(&1), None);
        assert_eq!(
            map.update(&1, &10, UpdateFlag::Exist),
            Err(HelperError::NoEntry)
        );
        map.update(&1, &10, UpdateFlag::NoExist).unwrap();
        assert_eq!(
            map.update(&1, &11, UpdateFlag::NoExist),
            Err(HelperError::Exists)
        );
        map.update(&1, &12, UpdateFlag::Exist).unwrap();
        assert_eq!(map.lookup(&1), Some(12));

        map.update(&2, &20, UpdateFlag::Any).unwrap();
        assert_eq!(
            map.update(&3, &30, UpdateFlag::Any),
            Err(HelperError::Full)
        );
        // Replacing an entry of a full map is fine.
        map.update(&2, &21, UpdateFlag::Any).unwrap();

        map.delete(&1).unwrap();
        assert_eq!(map.delete(&1), Err(HelperError::NoEntry));
        assert_eq!(map.dump(), vec![(2, 21)]);
    }

    #[test]
    fn lpm_longest_match() {
        let trie = FakeLpmTrie::<u32>::new("routes", 16);
        let key = |s: &str| Ipv4LpmKey::from(s.parse::<Ipv4Cidr>().unwrap());

        trie.update(&key("0.0.0.0/0"), &1, UpdateFlag::Any).unwrap();
        trie.update(&key("10.0.0.0/8"), &2, UpdateFlag::Any).unwrap();
        trie.update(&key("10.65.0.0/16"), &3, UpdateFlag::Any).unwrap();

        let host = |a: [u8; 4]| Ipv4LpmKey::host(Ipv4Addr::from(a));
        assert_eq!(trie.lookup(&host([10, 65, 1, 1])), Some(3));
        assert_eq!(trie.lookup(&host([10, 66, 1, 1])), Some(2));
        assert_eq!(trie.lookup(&host([192, 168, 1, 1])), Some(1));

        // A shorter lookup key cannot see longer prefixes.
        let short = Ipv4LpmKey::new(
            Ipv4PrefixLen::new(12).unwrap(),
            Ipv4Addr::from([10, 65, 1, 1]),
        );
        assert_eq!(trie.lookup(&short), Some(2));

        trie.delete(&key("10.65.0.0/16")).unwrap();
        assert_eq!(trie.lookup(&host([10, 65, 1, 1])), Some(2));
        assert_eq!(
            trie.delete(&key("10.65.0.0/16")),
            Err(HelperError::NoEntry)
        );
    }

    #[test]
    fn lpm_ignores_host_bits_and_rejects_long_prefix() {
        let trie = FakeLpmTrie::<u32>::new("routes", 4);
        let sloppy = Ipv4LpmKey { prefix_len: 24, addr: [10, 0, 0, 77] };
        trie.update(&sloppy, &7, UpdateFlag::NoExist).unwrap();

        let clean = Ipv4LpmKey { prefix_len: 24, addr: [10, 0, 0, 0] };
        assert_eq!(
            trie.update(&clean, &8, UpdateFlag::NoExist),
            Err(HelperError::Exists)
        );
        assert_eq!(trie.len(), 1);

        let bad = Ipv4LpmKey { prefix_len: 33, addr: [10, 0, 0, 1] };
        assert_eq!(
            trie.update(&bad, &9, UpdateFlag::Any),
            Err(HelperError::InvalidArgument)
        );
        assert_eq!(trie.lookup(&bad), None);
    }

    #[test]
    fn trace_goes_to_log_provider() {
        let (h, log) = helpers(0);
        h.trace(c"ttl exceeded").unwrap();
        assert_eq!(
            log.take(),
            vec![(LogLevel::Note, String::from("ttl exceeded"))]
        );
    }

    #[test]
    fn clock_and_prandom_are_controlled() {
        let (a, _) = helpers(7);
        let (b, _) = helpers(7);
        a.set_time(1_000);
        a.advance(500);
        assert_eq!(a.ktime_get_ns(), 1_500);
        assert_eq!(b.ktime_get_ns(), 0);

        let xs: Vec<u32> = (0..8).map(|_| a.get_prandom_u32()).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.get_prandom_u32()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn redirects_are_recorded() {
        let (h, _) = helpers(0);
        let devs = FakeHashMap::<u32, u32>::new("devs", 4);
        devs.update(&0, &12, UpdateFlag::Any).unwrap();

        assert_eq!(h.redirect(3, RedirectDir::Ingress), TcAction::Redirect);
        assert_eq!(
            h.redirect_map(&devs, 0, TcAction::Shot),
            TcAction::Redirect
        );
        assert_eq!(h.redirect_map(&devs, 1, TcAction::Shot), TcAction::Shot);
        assert_eq!(
            h.take_redirects(),
            vec![
                Redirect { ifindex: 3, dir: RedirectDir::Ingress },
                Redirect { ifindex: 12, dir: RedirectDir::Egress },
            ]
        );
        assert!(h.take_redirects().is_empty());
    }

    #[test]
    fn tail_call_runs_installed_program() {
        fn mark_bypass(_: &FakeHelpers, skb: &mut FakeSkb) -> TcAction {
            skb.set_mark(SkbMark::Bypass);
            TcAction::Ok
        }

        let (h, _) = helpers(0);
        let progs = FakeProgArray::new(4);
        progs.install(1, mark_bypass).unwrap();
        assert_eq!(progs.install(4, mark_bypass), Err(HelperError::Full));

        let mut skb = FakeSkb::new(HDR.to_vec());
        assert_eq!(h.tail_call(&mut skb, &progs, 1), Ok(TcAction::Ok));
        assert_eq!(skb.decision(), Ok(SkbMark::Bypass));

        assert_eq!(
            h.tail_call(&mut skb, &progs, 2),
            Err(HelperError::TailCallMissing { index: 2 })
        );
        progs.remove(1).unwrap();
        assert!(h.tail_call(&mut skb, &progs, 1).is_err());
    }

    #[test]
    fn load_store_bounds() {
        let (h, _) = helpers(0);
        let mut skb = FakeSkb::new(HDR.to_vec());
        let mut ttl = [0u8; 1];
        h.skb_load_bytes(&skb, 8, &mut ttl).unwrap();
        assert_eq!(ttl, [0x40]);

        let mut big = [0u8; 4];
        assert_eq!(
            h.skb_load_bytes(&skb, 18, &mut big),
            Err(HelperError::OutOfBounds)
        );
        assert_eq!(
            h.skb_store_bytes(&mut skb, 17, &big, 0),
            Err(HelperError::OutOfBounds)
        );
        assert_eq!(
            h.skb_store_bytes(&mut skb, 0, &[0x45], 0x4),
            Err(HelperError::InvalidArgument)
        );

        h.skb_store_bytes(&mut skb, 8, &[0x3f], BPF_F_RECOMPUTE_CSUM).unwrap();
        assert_eq!(skb.data()[8], 0x3f);
    }

    #[test]
    fn l3_replace_matches_recompute() {
        let (h, _) = helpers(0);
        let mut skb = FakeSkb::new(HDR.to_vec());

        // Rewrite the destination address and fix the checksum.
        let old = u32::from_ne_bytes([0xc0, 0xa8, 0x00, 0xc7]);
        let new = u32::from_ne_bytes([0x0a, 0x41, 0x00, 0x03]);
        h.skb_store_bytes(&mut skb, 16, &new.to_ne_bytes(), 0).unwrap();
        h.l3_csum_replace(
            &mut skb,
            10,
            u64::from(old),
            u64::from(new),
            CsumReplaceFlags::SIZE_4,
        )
        .unwrap();

        let ip = Ipv4Hdr::parse(skb.data()).unwrap();
        let expected = ipv4_header_checksum(ip, &[]).bytes();
        assert_eq!(&skb.data()[10..12], &expected);
    }

    #[test]
    fn l3_replace_by_diff() {
        let (h, _) = helpers(0);
        let mut skb = FakeSkb::new(HDR.to_vec());

        let old = u32::from_ne_bytes([0xc0, 0xa8, 0x00, 0x01]);
        let new = u32::from_ne_bytes([0x0a, 0x00, 0x00, 0x36]);
        let diff = h.csum_diff(&[old], &[new], 0).unwrap();
        h.skb_store_bytes(&mut skb, 12, &new.to_ne_bytes(), 0).unwrap();
        h.l3_csum_replace(
            &mut skb,
            10,
            0,
            u64::from(diff),
            CsumReplaceFlags::empty(),
        )
        .unwrap();

        let ip = Ipv4Hdr::parse(skb.data()).unwrap();
        let expected = ipv4_header_checksum(ip, &[]).bytes();
        assert_eq!(&skb.data()[10..12], &expected);

        assert_eq!(
            h.l3_csum_replace(&mut skb, 10, 1, 0, CsumReplaceFlags::empty()),
            Err(HelperError::InvalidArgument)
        );
        assert_eq!(
            h.l3_csum_replace(&mut skb, 10, 0, 0, CsumReplaceFlags::PSEUDO_HDR),
            Err(HelperError::InvalidArgument)
        );
    }

    #[test]
    fn csum_diff_limit() {
        let (h, _) = helpers(0);
        let words = [0u32; 128];
        assert!(h.csum_diff(&words[..64], &words[..64], 0).is_ok());
        assert_eq!(
            h.csum_diff(&words, &words[..1], 0),
            Err(HelperError::InvalidArgument)
        );
    }

    #[test]
    fn csum_diff_is_unfolded() {
        let (h, _) = helpers(0);
        let ones = [u32::MAX; 2];

        // Four 0xffff halves sum to 0x3fffc before any fold.
        let diff = h.csum_diff(&[], &ones, 0).unwrap();
        assert_eq!(diff, 0x3_fffc);
        assert_eq!(fold32(diff), 0xffff);

        // The seed is added last, carrying around at 32 bits.
        assert_eq!(h.csum_diff(&[], &[], u32::MAX).unwrap(), u32::MAX);
        assert_eq!(h.csum_diff(&[], &ones, u32::MAX).unwrap(), 0x3_fffc);
        assert_eq!(h.csum_diff(&[], &[], 7).unwrap(), 7);
    }

    #[test]
    fn l4_mangled_zero() {
        let (h, _) = helpers(0);
        let flags = CsumReplaceFlags::SIZE_2 | CsumReplaceFlags::MARK_MANGLED_0;

        // A UDP checksum of zero means "none" and is left alone.
        let udp = vec![0x00, 0x35, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00];
        let mut skb = FakeSkb::new(udp);
        h.l4_csum_replace(&mut skb, 6, 0x3500, 0x3600, flags).unwrap();
        assert_eq!(&skb.data()[6..8], &[0, 0]);

        // A result of zero is written as all ones instead. The stored
        // 0xfeff plus the 0x0100 change folds to zero.
        let from = u64::from(u16::from_ne_bytes([0x01, 0x00]));
        let to = u64::from(u16::from_ne_bytes([0x00, 0x00]));
        let mut skb = FakeSkb::new(vec![0, 0, 0, 0, 0, 0, 0xfe, 0xff]);
        h.l4_csum_replace(&mut skb, 6, from, to, flags).unwrap();
        assert_eq!(&skb.data()[6..8], &[0xff, 0xff]);
    }

    #[test]
    fn socket_cookie_and_mark() {
        let (h, _) = helpers(0);
        let mut skb = FakeSkb::new(HDR.to_vec()).with_cookie(0xfeed);
        assert_eq!(h.get_socket_cookie(&skb), 0xfeed);
        assert_eq!(h.get_socket_cookie(&FakeSkb::default()), 0);

        skb.set_raw_mark(0x0000_00aa);
        assert!(skb.decision().is_err());
        skb.set_mark(SkbMark::NatOut);
        assert_eq!(skb.mark(), 0xca18_00aa);
        assert_eq!(skb.decision(), Ok(SkbMark::NatOut));
    }
}
