// Failure Detector
//
// One periodic task per node. Every `ping_rate` it walks the current ring
// successors, bumps each one's drop counter, and pings it. A peer answering
// with an Ack gets its counter reset by the receive path before the next
// round; a peer that stays silent past `drop_threshold` rounds is declared
// failed and removed through the ordinary leave path, so the failure gossips
// exactly like a voluntary departure.
//
// The bump happens before the send: a lost datagram in either direction
// counts as one drop, and detection latency is bounded by
// ping_rate * (drop_threshold + 1).

use crate::membership::node::Node;
use crate::protocol::{Message, MessageType};
use crate::transport;
use std::sync::Arc;

/// Spawns the detector loop for a node. Runs until process exit.
pub fn spawn(node: Arc<Node>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(node.config().ping_rate);
        loop {
            interval.tick().await;
            if !node.view().is_member() {
                continue;
            }
            probe_round(&node).await;
        }
    })
}

/// One probing round over the successor set as of the current view.
pub async fn probe_round(node: &Node) {
    let ping = Message::new(MessageType::Ping, vec![]).encode();

    for member in node.successors() {
        // The peer may have been removed since the snapshot was taken.
        let drops = match node.view().bump_pings_dropped(&member.id) {
            Some(count) => count,
            None => continue,
        };

        if drops > node.config().drop_threshold {
            tracing::info!(
                member = %member.id,
                drops,
                elapsed_secs = node.elapsed_secs(),
                "peer failed to answer pings, declaring failure"
            );
            node.handle_leave(&member).await;
        } else {
            transport::try_send(
                &ping,
                &member.address,
                node.config().port,
                node.config().loss_rate,
            )
            .await;
        }
    }
}
