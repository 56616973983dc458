//! NAT type classification and hole-punch coordination.
//!
//! Probe servers and the signaling channel used to exchange hole-punch
//! sentinels are opaque to this crate; callers supply the observed external
//! addresses and this module does the classification and bookkeeping.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How long a NAT classification is cached before it is re-probed.
pub const NAT_CACHE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Classification of the local NAT, per RFC 3489 cone/symmetric distinctions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NatType {
    None,
    FullCone,
    AddressRestrictedCone,
    PortRestrictedCone,
    Symmetric,
    Unknown,
}

/// Whether a direct connection capability can be inferred from an address
/// alone, without a full probe round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressCapability {
    /// A public IPv4/IPv6 address: assume direct reachability, no NAT.
    Direct,
    /// A private address space: assume a NAT sits in front, UPnP candidate.
    NatUpnpCandidate,
}

/// Infer a coarse capability from a local address alone, before any probe
/// round-trip has completed.
pub fn infer_capability(addr: IpAddr) -> AddressCapability {
    let is_private = match addr {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local()
        }
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    };
    if is_private {
        AddressCapability::NatUpnpCandidate
    } else {
        AddressCapability::Direct
    }
}

/// Outcome of a NAT probe round against multiple probe servers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NatProbeResult {
    pub nat_type: NatType,
    pub external_addr: Option<SocketAddr>,
    pub hole_punch_feasible: bool,
}

/// Classify the local NAT from a set of `(probe_server, external_addr)`
/// observations. A `None` external address means that probe server did not
/// respond.
pub fn classify_nat(
    local_addr: SocketAddr,
    probe_results: &[(SocketAddr, Option<SocketAddr>)],
) -> NatProbeResult {
    let successful: Vec<(SocketAddr, SocketAddr)> = probe_results
        .iter()
        .filter_map(|(server, ext)| ext.map(|e| (*server, e)))
        .collect();

    if successful.is_empty() {
        return NatProbeResult {
            nat_type: NatType::Unknown,
            external_addr: None,
            hole_punch_feasible: false,
        };
    }

    let first_external = successful[0].1;

    if first_external.ip() == local_addr.ip() && first_external.port() == local_addr.port() {
        return NatProbeResult {
            nat_type: NatType::None,
            external_addr: Some(first_external),
            hole_punch_feasible: true,
        };
    }

    let all_same = successful.iter().all(|(_, ext)| *ext == first_external);
    if all_same {
        debug!(external = %first_external, "classified NAT as full cone");
        return NatProbeResult {
            nat_type: NatType::FullCone,
            external_addr: Some(first_external),
            hole_punch_feasible: true,
        };
    }

    let all_same_ip = successful
        .iter()
        .all(|(_, ext)| ext.ip() == first_external.ip());
    if all_same_ip {
        debug!(external_ip = %first_external.ip(), "classified NAT as port-restricted cone");
        return NatProbeResult {
            nat_type: NatType::PortRestrictedCone,
            external_addr: Some(first_external),
            hole_punch_feasible: true,
        };
    }

    debug!("classified NAT as symmetric");
    NatProbeResult {
        nat_type: NatType::Symmetric,
        external_addr: Some(first_external),
        hole_punch_feasible: false,
    }
}

/// Whether hole-punching should even be attempted given both sides' NAT
/// types. Per spec, only attempted when both sides are non-symmetric.
pub fn should_attempt_hole_punch(local: NatType, peer: NatType) -> bool {
    local != NatType::Symmetric && peer != NatType::Symmetric
}

/// Outcome of a hole-punch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HolePunchOutcome {
    Success,
    Rejected,
    Timeout,
    Unknown,
}

/// A hole-punch coordination message exchanged through a third-party signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HolePunchSentinel {
    pub initiator_addr: SocketAddr,
    pub nonce: [u8; 16],
}
