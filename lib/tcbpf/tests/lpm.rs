// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Prefix-match keys against an LPM table.

mod common;

use common::*;
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn exact_entry_found_for_every_prefix_len() {
    let mut rng = StdRng::seed_from_u64(0x1b3);

    for len in 0..=32u32 {
        for _ in 0..32 {
            let addr = Ipv4Addr::from(rng.next_u32());
            let trie = FakeLpmTrie::<u32>::new("exact", 1);

            // What the program builds from a header register.
            let key = Ipv4LpmKey::from_raw(len, addr.to_be());
            trie.update(&key, &len, UpdateFlag::NoExist).unwrap();
            assert_eq!(trie.lookup(&key), Some(len), "{addr}/{len}");

            // The same key built from typed parts.
            let typed = Ipv4LpmKey::new(
                Ipv4PrefixLen::new(len as u8).unwrap(),
                addr,
            );
            assert_eq!(typed, key);

            // Any host inside the prefix matches it.
            assert_eq!(trie.lookup(&Ipv4LpmKey::host(addr)), Some(len));
        }
    }
}

#[test]
fn prefix_len_33_is_unrepresentable() {
    assert!(Ipv4PrefixLen::new(33).is_err());
    assert!(Ipv4PrefixLen::try_from(u8::MAX).is_err());
    assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
}

#[test]
fn longest_prefix_wins() {
    let mut rng = StdRng::seed_from_u64(7);
    let trie = FakeLpmTrie::<u32>::new("nested", 64);

    for _ in 0..16 {
        let addr = Ipv4Addr::from(rng.next_u32());
        for len in 0..=32u8 {
            let cidr = Ipv4Cidr::new(addr, Ipv4PrefixLen::new(len).unwrap());
            let key = Ipv4LpmKey::from(cidr);
            trie.update(&key, &u32::from(len), UpdateFlag::Any).unwrap();
        }

        let host = Ipv4LpmKey::host(addr);
        assert_eq!(trie.lookup(&host), Some(32));

        // Shortening the lookup key walks down the nested prefixes.
        for len in 0..=32u8 {
            let key =
                Ipv4LpmKey::new(Ipv4PrefixLen::new(len).unwrap(), addr);
            assert_eq!(trie.lookup(&key), Some(u32::from(len)));
        }

        for len in 0..=32u8 {
            let cidr = Ipv4Cidr::new(addr, Ipv4PrefixLen::new(len).unwrap());
            trie.delete(&Ipv4LpmKey::from(cidr)).unwrap();
        }
        assert!(trie.is_empty());
    }
}

#[test]
fn kernel_key_layout() {
    let key = Ipv4LpmKey::from("192.168.7.0/24".parse::<Ipv4Cidr>().unwrap());
    let mut expected = 24u32.to_ne_bytes().to_vec();
    expected.extend_from_slice(&[192, 168, 7, 0]);
    assert_eq!(zerocopy::IntoBytes::as_bytes(&key), &expected[..]);
}
