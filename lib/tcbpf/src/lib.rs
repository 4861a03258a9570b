// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Primitives shared by the TC and cgroup dataplane programs.
//!
//! * [`engine::mode`]: the per-variant mode calculus.
//! * [`engine::ip4`], [`engine::port`], [`engine::lpm`]: in-place
//!   header mutation and lookup key construction.
//! * [`helpers`]: the helper import table, with a kernel backend on
//!   the BPF target and an in-process backend under `std`.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]
#![cfg_attr(
    all(feature = "usdt", target_os = "macos", not(usdt_stable_asm_sym)),
    feature(asm_sym)
)]

extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub use tcbpf_api as api;

pub mod engine;
pub mod helpers;
pub mod provider;

// ================================================================
// DTrace USDT Provider
//
// Fired by the in-process helper backend so that map and redirect
// activity of a test run can be traced.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod tcbpf_provider {
    fn map__lookup(map: &str, key: &str, hit: u8) {}
    fn map__update(map: &str, key: &str, res: &str) {}
    fn map__delete(map: &str, key: &str, res: &str) {}
    fn redirect(ifindex: u32, ingress: u8) {}
    fn tail__call(index: u32, res: &str) {}
}
