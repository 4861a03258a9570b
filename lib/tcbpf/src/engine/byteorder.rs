// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Host/network byte order conversion.
//!
//! The names follow the direction of the conversion: `be*_to_host`
//! takes a value loaded from the wire and produces its logical value,
//! `host_to_be*` does the reverse. On a big-endian target both are the
//! identity. Header code in this crate goes through these instead of
//! assuming the endianness of the machine it runs on.

cfg_if! {
    if #[cfg(target_endian = "little")] {
        #[inline(always)]
        pub const fn be16_to_host(value: u16) -> u16 {
            value.swap_bytes()
        }

        #[inline(always)]
        pub const fn host_to_be16(value: u16) -> u16 {
            value.swap_bytes()
        }

        #[inline(always)]
        pub const fn be32_to_host(value: u32) -> u32 {
            value.swap_bytes()
        }

        #[inline(always)]
        pub const fn host_to_be32(value: u32) -> u32 {
            value.swap_bytes()
        }

        #[inline(always)]
        pub const fn be64_to_host(value: u64) -> u64 {
            value.swap_bytes()
        }

        #[inline(always)]
        pub const fn host_to_be64(value: u64) -> u64 {
            value.swap_bytes()
        }
    } else if #[cfg(target_endian = "big")] {
        #[inline(always)]
        pub const fn be16_to_host(value: u16) -> u16 {
            value
        }

        #[inline(always)]
        pub const fn host_to_be16(value: u16) -> u16 {
            value
        }

        #[inline(always)]
        pub const fn be32_to_host(value: u32) -> u32 {
            value
        }

        #[inline(always)]
        pub const fn host_to_be32(value: u32) -> u32 {
            value
        }

        #[inline(always)]
        pub const fn be64_to_host(value: u64) -> u64 {
            value
        }

        #[inline(always)]
        pub const fn host_to_be64(value: u64) -> u64 {
            value
        }
    } else {
        compile_error!("cannot determine target endianness");
    }
}
