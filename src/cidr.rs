//! CIDR ↔ closed-range conversions on the IPv4 address space.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// Convert a CIDR to the closed integer range it covers.
///
/// Host bits in the input are masked off.
pub(crate) fn cidr_to_range(net: &Ipv4Net) -> (u32, u32) {
    (u32::from(net.network()), u32::from(net.broadcast()))
}

/// Decompose the closed range `[start, end]` into the minimum set of
/// canonical CIDRs, in ascending order.
///
/// Each block is the largest power of two that both starts aligned at the
/// cursor and fits in the remaining span. The result covers exactly
/// `start..=end` with no overlap. An inverted range yields no blocks.
pub fn range_to_cidrs(start: u32, end: u32) -> Vec<Ipv4Net> {
    if start > end {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(8);
    let mut cur = u64::from(start);
    let end = u64::from(end);
    while cur <= end {
        let align = if cur == 0 { 32 } else { (cur as u32).trailing_zeros() };
        let fit = (end - cur + 1).ilog2();
        let block = align.min(fit);
        let prefix_len = (32 - block) as u8;
        let net = Ipv4Net::new(Ipv4Addr::from(cur as u32), prefix_len)
            .expect("prefix length is at most 32");
        out.push(net);
        cur += 1u64 << block;
    }
    out
}
