// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The per-packet primitives.
//!
//! Nothing under this namespace allocates, blocks, or keeps state:
//! every function runs to completion over the bytes of one packet.
pub mod byteorder;
pub mod checksum;
pub mod ip4;
pub mod lpm;
pub mod mode;
pub mod port;

pub use tcbpf_api::Direction;
pub use tcbpf_api::SkbMark;
