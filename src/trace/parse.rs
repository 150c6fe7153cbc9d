//! Parser for hop-discovery tool output.

use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

/// A hop as printed by the tool, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHop {
    pub index: u32,
    pub address: Ipv4Addr,
}

fn hop_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Hop number first, then the first dotted quad on the line. Anything in
    // between (RTT columns, "<1 ms", localized words, hostnames) is ignored.
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<hop>\d{1,3})\s+(?:.*?[\s(\[])?(?P<addr>\d{1,3}(?:\.\d{1,3}){3})(?:[\s)\]]|$)")
            .expect("valid hop pattern")
    })
}

/// Parse a single line. Lines that are not hop rows yield `None`.
pub fn parse_hop_line(line: &str) -> Option<RawHop> {
    let caps = hop_pattern().captures(line)?;
    let index = caps.name("hop")?.as_str().parse().ok()?;
    let address = caps.name("addr")?.as_str().parse().ok()?;
    Some(RawHop { index, address })
}

/// Parse the full tool output into hops in printed order.
///
/// Silent hops (`* * *`) and banner lines are skipped. A row whose hop number
/// does not exceed the previous one is dropped, so indices strictly increase.
pub fn parse_hops(output: &str) -> Vec<RawHop> {
    let mut hops: Vec<RawHop> = Vec::new();
    for hop in output.lines().filter_map(parse_hop_line) {
        if hop.index == 0 {
            continue;
        }
        if hops.last().is_some_and(|last| hop.index <= last.index) {
            tracing::debug!("Skipping out-of-order hop {} ({})", hop.index, hop.address);
            continue;
        }
        hops.push(hop);
    }
    hops
}
