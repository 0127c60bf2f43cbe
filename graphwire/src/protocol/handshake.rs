//! The 20-byte handshake: a 4-byte magic preamble followed by four 4-byte version proposals
//! (§4.C). Each proposal is `[0x00, range, minor, major]`, where `minor` is the highest minor
//! offered for `major` and `range` is how many minors below it are also offered — resolved from
//! the worked example in §8 ("server replies `0x00 00 03 05`; driver binds protocol version
//! 5.3"), since the prose description in §4.C ("`00 00 minor_range major`") alone
//! under-determines byte order.

use crate::error::{GraphWireError, Result};
use crate::protocol::Version;

pub const MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];
const PROPOSAL_SLOTS: usize = 4;

/// A version as carried in a single 4-byte handshake word: a concrete `(major, minor)` plus how
/// many additional lower minors were bundled into the same proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub top_minor: u8,
    pub range: u8,
}

impl ProtocolVersion {
    pub fn to_bytes(self) -> [u8; 4] {
        [0x00, self.range, self.top_minor, self.major]
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            major: bytes[3],
            top_minor: bytes[2],
            range: bytes[1],
        }
    }

    /// Whether `version` falls within this proposal's compacted minor range.
    pub fn covers(&self, version: Version) -> bool {
        version.major == self.major
            && version.minor <= self.top_minor
            && version.minor + self.range >= self.top_minor
    }
}

/// Groups a descending `(major, minor)` list into at most four handshake proposals, coalescing
/// contiguous same-major minors into ranges (§4.C, §8 "Handshake offers").
fn compact_proposals(versions: &[Version]) -> Vec<ProtocolVersion> {
    let mut proposals = Vec::new();
    let mut iter = versions.iter().peekable();
    while let Some(&top) = iter.next() {
        let mut bottom_minor = top.minor;
        while let Some(&&next) = iter.peek() {
            if next.major == top.major && next.minor + 1 == bottom_minor {
                bottom_minor = next.minor;
                iter.next();
            } else {
                break;
            }
        }
        proposals.push(ProtocolVersion {
            major: top.major,
            top_minor: top.minor,
            range: top.minor - bottom_minor,
        });
        if proposals.len() == PROPOSAL_SLOTS {
            break;
        }
    }
    proposals
}

/// The 16-byte proposal section of the handshake (no magic), always exactly four 4-byte words,
/// padded with all-zero proposals when fewer than four ranges are offered.
pub fn handshake_proposals(versions: &[Version]) -> [u8; 16] {
    let proposals = compact_proposals(versions);
    let mut out = [0u8; 16];
    for (i, proposal) in proposals.iter().enumerate().take(PROPOSAL_SLOTS) {
        out[i * 4..i * 4 + 4].copy_from_slice(&proposal.to_bytes());
    }
    out
}

/// The full 20-byte handshake written to the wire: magic preamble + proposals.
pub fn build_handshake(versions: &[Version]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out[..4].copy_from_slice(&MAGIC);
    out[4..].copy_from_slice(&handshake_proposals(versions));
    out
}

/// Parses the server's single 4-byte reply into the version it chose, or `None` if the server
/// signalled no match (all-zero reply).
pub fn choose_version(reply: [u8; 4]) -> Result<Option<Version>> {
    if reply == [0, 0, 0, 0] {
        return Ok(None);
    }
    let chosen = ProtocolVersion::from_bytes(reply);
    if chosen.range != 0 {
        return Err(GraphWireError::Protocol(
            "server handshake reply must name an exact version, not a range".to_string(),
        ));
    }
    Ok(Some(Version::new(chosen.major, chosen.top_minor)))
}

/// Test/fake-server helper: given the versions a (fake) server supports and the client's
/// compacted proposals, picks the highest mutually supported version, highest proposal slot
/// (i.e. client preference) first.
pub fn negotiate_version(offered: &[u8; 16], server_supported: &[Version]) -> Option<Version> {
    for slot in offered.chunks(4) {
        let bytes: [u8; 4] = slot.try_into().unwrap();
        if bytes == [0, 0, 0, 0] {
            continue;
        }
        let proposal = ProtocolVersion::from_bytes(bytes);
        if let Some(best) = server_supported
            .iter()
            .filter(|v| proposal.covers(**v))
            .max()
        {
            return Some(*best);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_offers_exactly_sixteen_bytes_with_at_most_four_proposals_coalesced() {
        let versions = Version::supported();
        let proposals = handshake_proposals(&versions);
        assert_eq!(proposals.len(), 16);

        let compacted = compact_proposals(&versions);
        assert!(compacted.len() <= 4);
        // 5.6..5.0, 4.4..4.1, 3.0..3.0 -> three ranges.
        assert_eq!(compacted.len(), 3);
        assert_eq!(compacted[0], ProtocolVersion { major: 5, top_minor: 6, range: 6 });
        assert_eq!(compacted[1], ProtocolVersion { major: 4, top_minor: 4, range: 3 });
        assert_eq!(compacted[2], ProtocolVersion { major: 3, top_minor: 0, range: 0 });
    }

    #[test]
    fn scenario_handshake_negotiation_binds_5_3() {
        // driver offers [(5,6..5,0),(4,4..4,1),(3,0..3,0)], server replies 0x00 00 03 05
        let reply = [0x00, 0x00, 0x03, 0x05];
        let version = choose_version(reply).unwrap().unwrap();
        assert_eq!(version, Version::new(5, 3));
    }

    #[test]
    fn full_handshake_is_twenty_bytes_with_magic_prefix() {
        let versions = Version::supported();
        let handshake = build_handshake(&versions);
        assert_eq!(handshake.len(), 20);
        assert_eq!(&handshake[..4], &MAGIC);
    }

    #[test]
    fn no_match_yields_none() {
        assert!(choose_version([0, 0, 0, 0]).unwrap().is_none());
    }
}
