// Group Membership
//
// Everything a node knows about its peers lives here:
// - Member: one peer descriptor, keyed by its incarnation id
// - MembershipView: the lock-guarded ordered peer list (view.rs)
// - the failure detector task (detector.rs)
// - the protocol engine driving join/introduce/leave gossip (node.rs)

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub mod detector;
pub mod node;
pub mod view;

pub use node::Node;
pub use view::{MembershipView, ViewSnapshot};

/// One peer in the group.
///
/// The id is `"<machineId>-<joinEpochSeconds>-<observedAddress>"`, assigned
/// its final form by the introducer. Identity, equality and ordering all key
/// on the id alone; the address is embedded in it and carried separately only
/// for datagram targeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "member_id")]
    pub id: String,

    pub address: String,

    /// Consecutive failure-detector rounds without an Ack from this peer.
    /// Only meaningful on the node doing the pinging; peers exchange it on
    /// the wire but never act on the received value.
    pub pings_dropped: u32,

    /// UDP port the peer listens on. Not transmitted; filled from the local
    /// configuration on decode.
    pub port: u16,
}

impl Member {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            pings_dropped: 0,
            port,
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Member {}

impl PartialOrd for Member {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Member {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}
