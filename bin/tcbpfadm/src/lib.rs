// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Inspection routines for `tcbpfadm`.
//!
//! Everything prints into a given writer so the output can be checked
//! in tests.

use std::io::Write;
use tabwriter::TabWriter;
use tcbpf::api::Ipv4Cidr;
use tcbpf::api::SkbMark;
use tcbpf::engine::ip4::Ipv4Hdr;
use tcbpf::engine::ip4::Ipv4HdrError;
use tcbpf::engine::ip4::ip_dec_ttl;
use tcbpf::engine::lpm::Ipv4LpmKey;
use tcbpf::engine::mode::Mode;
use tcbpf::helpers::HelperError;
use tcbpf::helpers::HelperId;
use tcbpf::helpers::Helpers;
use tcbpf::helpers::fake::FakeHelpers;
use tcbpf::helpers::fake::FakeSkb;
use zerocopy::IntoBytes;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("bad number: {0:?}")]
    BadNumber(String),
    #[error("odd number of hex digits")]
    OddHex,
    #[error("bad hex digit: {0:?}")]
    BadHexDigit(char),
}

#[derive(Debug, thiserror::Error)]
pub enum TtlError {
    #[error(transparent)]
    Header(#[from] Ipv4HdrError),
    #[error("helper failed: {0}")]
    Helper(#[from] HelperError),
}

/// Parse a `u32` given in decimal or as `0x` hex.
pub fn parse_u32(s: &str) -> Result<u32, ParseError> {
    let s = s.trim();
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    res.map_err(|_| ParseError::BadNumber(s.to_string()))
}

/// Parse a hex dump. Whitespace and `:` between bytes are ignored.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, ParseError> {
    let digits = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .map(|c| {
            c.to_digit(16).map(|d| d as u8).ok_or(ParseError::BadHexDigit(c))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    if digits.len() % 2 != 0 {
        return Err(ParseError::OddHex);
    }

    Ok(digits.chunks_exact(2).map(|p| (p[0] << 4) | p[1]).collect())
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn yn(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

/// Print every predicate of a mode.
pub fn print_mode_into(
    writer: &mut impl Write,
    mode: Mode,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "MODE\t{mode} ({:#x})", mode.flags().bits())?;
    write_hr(&mut t)?;
    writeln!(t, "direction\t{}", mode.direction())?;
    let preds = [
        ("ingress", mode.ingress()),
        ("egress", mode.egress()),
        ("host_ep", mode.host_ep()),
        ("workload_ep", mode.workload_ep()),
        ("tunnel", mode.tunnel()),
        ("cgroup", mode.cgroup()),
        ("from_host_ep", mode.from_host_ep()),
        ("to_host_ep", mode.to_host_ep()),
        ("from_workload_ep", mode.from_workload_ep()),
        ("to_workload_ep", mode.to_workload_ep()),
        ("to_host", mode.to_host()),
        ("from_host", mode.from_host()),
        ("l3_only", mode.l3_only()),
        ("ipip_encapped", mode.ipip_encapped()),
    ];
    for (name, val) in preds {
        writeln!(t, "{name}\t{}", yn(val))?;
    }
    t.flush()
}

/// Print one row per buildable program variant.
pub fn print_variants_into(writer: &mut impl Write) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "FLAGS\tMODE\tTO_HOST\tL3_ONLY\tIPIP\tTTL_CHECK")?;
    for mode in Mode::variants() {
        writeln!(
            t,
            "{:#x}\t{mode}\t{}\t{}\t{}\t{}",
            mode.flags().bits(),
            yn(mode.to_host()),
            yn(mode.l3_only()),
            yn(mode.ipip_encapped()),
            yn(mode.to_host() && !mode.tunnel()),
        )?;
    }
    t.flush()
}

/// Decode a raw packet mark.
pub fn print_mark_into(
    writer: &mut impl Write,
    raw: u32,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "RAW\t{raw:#010x}")?;
    writeln!(t, "SEEN\t{}", yn(SkbMark::seen(raw)))?;
    match SkbMark::try_from(raw) {
        Ok(mark) => {
            writeln!(t, "DECISION\t{mark}")?;
            writeln!(t, "BYPASS\t{}", yn(mark.is_bypass()))?;
        }
        Err(e) => writeln!(t, "DECISION\t{e}")?,
    }
    t.flush()
}

/// The outcome of forwarding one header through the TTL check.
#[derive(Debug, Eq, PartialEq)]
pub struct TtlReport {
    pub ttl: u8,
    pub exceeded: bool,
    /// The header after decrement, absent if the packet is dropped.
    pub forwarded: Option<Vec<u8>>,
}

/// Run `hdr` through the TTL handling of a program built for `mode`,
/// on the in-process helpers. An expiring packet is traced.
pub fn ttl_report(
    helpers: &FakeHelpers,
    hdr: &[u8],
    mode: Mode,
) -> Result<TtlReport, TtlError> {
    let ip = Ipv4Hdr::parse(hdr)?;
    let ttl = ip.ttl;
    let exceeded = ip.ttl_exceeded(mode);
    let hdr_len = usize::from(ip.hdr_len());

    if exceeded {
        helpers.trace(c"ttl exceeded")?;
        return Ok(TtlReport { ttl, exceeded, forwarded: None });
    }

    let mut skb = FakeSkb::new(hdr[..hdr_len].to_vec());
    let mut fwd = vec![0u8; hdr_len];
    helpers.skb_load_bytes(&skb, 0, &mut fwd)?;
    ip_dec_ttl(&mut fwd)?;
    helpers.skb_store_bytes(&mut skb, 0, &fwd, 0)?;

    Ok(TtlReport { ttl, exceeded, forwarded: Some(skb.data().to_vec()) })
}

pub fn print_ttl_into(
    writer: &mut impl Write,
    report: &TtlReport,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "TTL\t{}", report.ttl)?;
    writeln!(t, "EXCEEDED\t{}", yn(report.exceeded))?;
    match &report.forwarded {
        Some(out) => {
            let csum = &out[Ipv4Hdr::CSUM_OFFSET..Ipv4Hdr::CSUM_OFFSET + 2];
            writeln!(t, "NEW TTL\t{}", out[Ipv4Hdr::TTL_OFFSET])?;
            writeln!(t, "NEW CSUM\t{}", to_hex(csum))?;
            writeln!(t, "HEADER\t{}", to_hex(out))?;
        }
        None => writeln!(t, "ACTION\tdrop, ICMP time exceeded")?,
    }
    t.flush()
}

/// Print the kernel layout of the LPM key for a prefix.
pub fn print_lpm_key_into(
    writer: &mut impl Write,
    cidr: Ipv4Cidr,
) -> std::io::Result<()> {
    let key = Ipv4LpmKey::from(cidr);
    let mut t = TabWriter::new(writer);
    writeln!(t, "PREFIX\t{cidr}")?;
    writeln!(t, "PREFIX_LEN\t{}", key.prefix_len)?;
    writeln!(t, "ADDR\t{}", key.addr())?;
    writeln!(t, "BYTES\t{}", to_hex(key.as_bytes()))?;
    t.flush()
}

/// Print the helper import table.
pub fn print_helpers_into(writer: &mut impl Write) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "ID\tHELPER")?;
    for h in HelperId::ALL {
        writeln!(t, "{}\t{h}", h.id())?;
    }
    t.flush()
}

#[cfg(test)]
mod test {
    use super::*;
    use tcbpf::engine::mode::TcFlags;
    use tcbpf::provider::CaptureLog;
    use tcbpf::provider::LogLevel;
    use tcbpf::provider::Providers;

    fn helpers() -> (FakeHelpers, CaptureLog) {
        let log = CaptureLog::new();
        let providers = Providers { log: Box::new(log.clone()) };
        (FakeHelpers::new(providers, 0), log)
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_u32("3").unwrap(), 3);
        assert_eq!(parse_u32("0xca110000").unwrap(), 0xca11_0000);
        assert!(parse_u32("0xg").is_err());
        assert!(parse_u32("-1").is_err());
    }

    #[test]
    fn hex() {
        assert_eq!(parse_hex("45 00:0a").unwrap(), vec![0x45, 0x00, 0x0a]);
        assert!(matches!(parse_hex("450"), Err(ParseError::OddHex)));
        assert!(matches!(parse_hex("4z"), Err(ParseError::BadHexDigit('z'))));
        assert_eq!(to_hex(&[0xab, 0x01]), "ab01");
    }

    const TTL_ONE_HDR: &str = "45000054b9d940000101abcd0a0000010a000002";

    #[test]
    fn ttl_forwarded() {
        let (h, log) = helpers();
        let hdr = parse_hex(TTL_ONE_HDR).unwrap();
        let from_host = Mode::new(TcFlags::HOST_EP);
        let report = ttl_report(&h, &hdr, from_host).unwrap();
        assert_eq!(report.ttl, 1);
        assert!(!report.exceeded);
        assert_eq!(
            report.forwarded.as_deref().map(to_hex).as_deref(),
            Some("45000054b9d940000001accd0a0000010a000002")
        );

        let out = render(|w| print_ttl_into(w, &report));
        assert!(out.contains("accd"));
        assert!(log.take().is_empty());
    }

    #[test]
    fn ttl_dropped() {
        let (h, log) = helpers();
        let hdr = parse_hex(TTL_ONE_HDR).unwrap();
        let to_host = Mode::new(TcFlags::HOST_EP.union(TcFlags::INGRESS));
        let report = ttl_report(&h, &hdr, to_host).unwrap();
        assert!(report.exceeded);
        assert_eq!(report.forwarded, None);
        assert_eq!(
            log.take(),
            vec![(LogLevel::Note, String::from("ttl exceeded"))]
        );

        assert!(matches!(
            ttl_report(&h, &hdr[..12], to_host),
            Err(TtlError::Header(Ipv4HdrError::Truncated { len: 12 }))
        ));
        assert!(log.take().is_empty());
    }

    #[test]
    fn mode_table_shows_direction() {
        let direction = |out: &str| {
            out.lines()
                .find(|l| l.starts_with("direction"))
                .map(|l| l.split_whitespace().last().unwrap().to_string())
        };

        let hep_in = Mode::new(TcFlags::HOST_EP.union(TcFlags::INGRESS));
        let out = render(|w| print_mode_into(w, hep_in));
        assert_eq!(direction(&out).as_deref(), Some("IN"));

        let cgroup = Mode::new(TcFlags::CGROUP);
        let out = render(|w| print_mode_into(w, cgroup));
        assert_eq!(direction(&out).as_deref(), Some("OUT"));
    }

    #[test]
    fn variants_table() {
        let out = render(|w| print_variants_into(w));
        // Header plus one row per variant.
        assert_eq!(out.lines().count(), 1 + Mode::variants().count());
        assert!(out.contains("HOST_EP|INGRESS"));
    }

    #[test]
    fn mark_decode() {
        let out = render(|w| print_mark_into(w, 0xca13_0042));
        assert!(out.contains("BYPASS_FWD"));
        let out = render(|w| print_mark_into(w, 0x1234));
        assert!(out.contains("not set by the dataplane"));
    }

    #[test]
    fn lpm_key_bytes() {
        let cidr = "10.65.0.0/16".parse().unwrap();
        let out = render(|w| print_lpm_key_into(w, cidr));
        let len = to_hex(&16u32.to_ne_bytes());
        assert!(out.contains(&format!("{len}0a410000")));
    }

    #[test]
    fn helper_table() {
        let out = render(|w| print_helpers_into(w));
        assert!(out.contains("bpf_fib_lookup"));
        assert_eq!(out.lines().count(), 1 + HelperId::ALL.len());
    }
}
