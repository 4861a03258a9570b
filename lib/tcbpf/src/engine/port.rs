// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Port extraction.
//!
//! Two unrelated helpers live here. [`port_to_host`] is an ordinary
//! byte order conversion of a 32-bit word whose first two wire bytes
//! hold a port. [`safe_extract_port`] exists only because of the BPF
//! verifier: context fields such as `bpf_sock_addr::user_port` must be
//! loaded with a 32-bit access, and the compiler happily narrows a
//! `port as u16` into a 16-bit load, which the verifier rejects. See
//! torvalds/linux@303def35f64e for the context access rules.

use super::byteorder::be32_to_host;

/// Fold both halves of the register so the optimizer has to keep the
/// full 32-bit load.
///
/// For a register holding a 16-bit port in its low half (the upper
/// half zero) the result is that port.
#[inline(always)]
pub const fn safe_extract_port(port: u32) -> u32 {
    (port >> 16) | (port & 0xffff)
}

/// Convert a 32-bit word loaded from the wire, whose first two bytes
/// are a port (the rest being the neighbouring field), to the port in
/// host order.
#[inline(always)]
pub const fn port_to_host(port: u32) -> u32 {
    be32_to_host(port) >> 16
}

/// Load the 32-bit word at `offset` of `bytes` the way a program does:
/// a native load of wire bytes. Returns `None` when out of bounds.
#[inline]
pub fn load_port_word(bytes: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let word = bytes.get(offset..end)?;
    Some(u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn safe_extract_keeps_low_port() {
        for p in [0u32, 1, 53, 443, 8080, 0x8000, 0xffff] {
            assert_eq!(safe_extract_port(p), p & 0xffff);
        }
    }

    #[test]
    fn port_to_host_from_tcp_header() {
        // Source port 443, destination port 51000.
        let tcp = [0x01, 0xbb, 0xc7, 0x38, 0, 0, 0, 0];
        let word = load_port_word(&tcp, 0).unwrap();
        assert_eq!(port_to_host(word), 443);
        let word = load_port_word(&tcp, 2).unwrap();
        assert_eq!(port_to_host(word), 51000);
    }

    #[test]
    fn load_port_word_bounds() {
        let b = [1, 2, 3, 4, 5];
        assert!(load_port_word(&b, 1).is_some());
        assert!(load_port_word(&b, 2).is_none());
        assert!(load_port_word(&b, usize::MAX).is_none());
    }
}
