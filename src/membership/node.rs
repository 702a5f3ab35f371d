// Protocol Engine
//
// The Node owns the membership view and is its only mutator. Inbound
// datagrams are dispatched here, join/introduce/leave gossip is forwarded
// along the ring from here, and the introducer election runs here after
// every adoption or removal. User commands (LIST_MEM, LIST_SELF, JOIN,
// LEAVE, WAIT, STOP) enter through the command methods at the bottom.

use crate::config::{self, NodeConfig, NUM_MONITORS};
use crate::dns::DnsWriter;
use crate::error::{Result, RingError};
use crate::membership::view::{MembershipView, ViewSnapshot};
use crate::membership::{detector, Member};
use crate::notify::ChangeSink;
use crate::protocol::{Message, MessageType};
use crate::transport::{self, UdpReceiver};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One membership-service node.
pub struct Node {
    config: NodeConfig,
    view: MembershipView,
    dns: Arc<dyn DnsWriter>,
    is_introducer: AtomicBool,

    /// Minimum-id member as of the previous election round. Process-local:
    /// the became-introducer edge is detected once per process lifetime.
    last_minimum: Mutex<Option<Member>>,

    started_at: Instant,
}

impl Node {
    pub fn new(config: NodeConfig, dns: Arc<dyn DnsWriter>, sink: Arc<dyn ChangeSink>) -> Self {
        let is_introducer = AtomicBool::new(config.introducer);
        Self {
            config,
            view: MembershipView::new(sink),
            dns,
            is_introducer,
            last_minimum: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn view(&self) -> &MembershipView {
        &self.view
    }

    pub fn is_introducer(&self) -> bool {
        self.is_introducer.load(Ordering::SeqCst)
    }

    /// Seconds since this node started; attached to membership event logs.
    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Publishes the DNS entry when starting as the introducer, then spawns
    /// the failure detector and the receive loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.config.introducer {
            let host = config::local_hostname();
            if let Err(e) = self.dns.write_introducer(&host, self.config.port) {
                tracing::error!(error = %e, "could not publish introducer endpoint at startup");
            }
        }

        let receiver = UdpReceiver::bind(self.config.port)?;
        tracing::info!(port = self.config.port, "membership node listening");

        detector::spawn(Arc::clone(self));

        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.run_receiver(receiver).await;
        });

        Ok(())
    }

    async fn run_receiver(&self, receiver: UdpReceiver) {
        loop {
            let (payload, sender) = match receiver.recv().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "datagram receive failed");
                    continue;
                }
            };
            if sender.is_empty() {
                continue;
            }
            let message = match Message::decode(&payload, self.config.port) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(from = %sender, error = %e, "dropping undecodable datagram");
                    continue;
                }
            };
            self.dispatch(message, &sender).await;
        }
    }

    /// Routes one inbound message. Guard failures drop it silently.
    pub async fn dispatch(&self, message: Message, sender: &str) {
        match message.kind {
            MessageType::Join => {
                // Only the introducer processes joins.
                if !self.is_introducer() {
                    return;
                }
                let mut candidate = match message.members.into_iter().next() {
                    Some(member) => member,
                    None => return,
                };
                // The joiner does not know how the cluster sees it; stamp the
                // observed source address into both the id and the record.
                candidate.id = format!("{}-{}", candidate.id, sender);
                candidate.address = sender.to_string();

                // A node accepts its own bootstrap join (the machine prefix
                // matches) even while its view is still empty.
                if self.view.is_member()
                    || machine_prefix(&candidate.id) == Some(self.config.machine_id)
                {
                    self.handle_join(candidate).await;
                } else {
                    tracing::warn!(
                        candidate = %candidate.id,
                        "join rejected, introducer not in group yet"
                    );
                }
            }
            MessageType::JoinAck => {
                self.handle_join_ack(message.members).await;
            }
            MessageType::Introduce => {
                if self.view.is_member() {
                    if let Some(member) = message.members.into_iter().next() {
                        self.handle_introduce(member).await;
                    }
                }
            }
            MessageType::Ping => {
                if self.view.is_member() {
                    self.handle_ping(sender).await;
                }
            }
            MessageType::Ack => {
                if self.view.is_member() {
                    if let Some(member) = message.members.first() {
                        self.view.reset_pings_dropped(&member.id);
                    }
                }
            }
            MessageType::Leave => {
                if self.view.is_member() {
                    if let Some(member) = message.members.first() {
                        self.handle_leave(member).await;
                    }
                }
            }
        }
    }

    /// Introducer side of a join: gossip the newcomer to the ring, adopt it,
    /// and hand it back the whole view.
    async fn handle_join(&self, new_member: Member) {
        let introduce = Message::new(MessageType::Introduce, vec![new_member.clone()]).encode();
        for successor in self.successors() {
            self.send(&introduce, &successor.address).await;
        }

        self.view.append(new_member.clone());

        let ack = Message::new(MessageType::JoinAck, self.view.snapshot().members).encode();
        self.send(&ack, &new_member.address).await;

        tracing::info!(
            member = %new_member.id,
            elapsed_secs = self.elapsed_secs(),
            "introduced new member to group"
        );
    }

    /// Joiner side: adopt the introducer's view wholesale. We were appended
    /// last, so self sits at the tail.
    async fn handle_join_ack(&self, members: Vec<Member>) {
        if members.is_empty() {
            tracing::warn!("dropping empty join acknowledgement");
            return;
        }
        let self_index = members.len() - 1;
        self.view.replace_all(members, self_index);
        self.view.set_member(true);
        self.run_election();

        if let Some(me) = self.view.self_member() {
            tracing::info!(
                member = %me.id,
                ring_position = self_index,
                elapsed_secs = self.elapsed_secs(),
                "joined group"
            );
        }
    }

    /// Peer side of join gossip: append once, forward once.
    async fn handle_introduce(&self, new_member: Member) {
        if !self.view.append(new_member.clone()) {
            // Already known; the gossip wave stops here.
            return;
        }

        let introduce = Message::new(MessageType::Introduce, vec![new_member.clone()]).encode();
        for successor in self.successors() {
            self.send(&introduce, &successor.address).await;
        }

        tracing::info!(
            member = %new_member.id,
            elapsed_secs = self.elapsed_secs(),
            "added gossiped member to view"
        );
    }

    async fn handle_ping(&self, sender: &str) {
        let me = match self.view.self_member() {
            Some(member) => member,
            None => return,
        };
        let ack = Message::new(MessageType::Ack, vec![me]).encode();
        self.send(&ack, sender).await;
    }

    /// Removes a departed or failed peer and forwards the event. Idempotent:
    /// a second Leave for the same id is dropped before any forwarding.
    pub(crate) async fn handle_leave(&self, leaving: &Member) {
        let removed_index = match self.view.remove_by_id(&leaving.id) {
            Some(index) => index,
            None => return,
        };

        self.run_election();

        let leave = Message::new(MessageType::Leave, vec![leaving.clone()]).encode();
        for successor in self.successors() {
            self.send(&leave, &successor.address).await;
        }

        tracing::info!(
            member = %leaving.id,
            removed_index,
            elapsed_secs = self.elapsed_secs(),
            "removed member from view, forwarding leave"
        );
    }

    /// The member with the minimum id is the introducer. Runs after every
    /// adoption or removal; writes the DNS entry only on the round where
    /// this node first observes itself as the minimum.
    fn run_election(&self) {
        let snapshot = self.view.snapshot();
        let minimum = match snapshot.members.iter().min() {
            Some(member) => member.clone(),
            None => return,
        };

        let mut prior = self.last_minimum.lock();
        if let Some(me) = snapshot.self_member {
            let prior_is_self = prior.as_ref().map(|p| p.id == me.id).unwrap_or(false);
            if !prior_is_self && minimum.id == me.id {
                if let Err(e) = self.dns.write_introducer(&me.address, me.port) {
                    tracing::warn!(error = %e, "could not publish endpoint after election");
                }
                self.is_introducer.store(true, Ordering::SeqCst);
                tracing::info!(member = %me.id, "assumed introducer role");
            }
        }
        *prior = Some(minimum);
    }

    /// Up to NUM_MONITORS members following self on the ring.
    pub fn successors(&self) -> Vec<Member> {
        successors_of(&self.view.snapshot())
    }

    async fn send(&self, payload: &str, address: &str) {
        transport::try_send(payload, address, self.config.port, self.config.loss_rate).await;
    }

    // ========================================================================
    // User commands
    // ========================================================================

    /// LIST_MEM: the current member list as a JSON array.
    pub fn list_members(&self) -> Result<String> {
        let snapshot = self.view.snapshot();
        if snapshot.is_member {
            for member in &snapshot.members {
                tracing::debug!(
                    id = %member.id,
                    address = %member.address,
                    drops = member.pings_dropped,
                    "member"
                );
            }
        } else {
            tracing::debug!("not a member of a group");
        }
        Ok(serde_json::to_string(&snapshot.members)?)
    }

    /// LIST_SELF: this node's own member record as JSON.
    pub fn list_self(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.view.self_member())?)
    }

    /// JOIN: look up the introducer in DNS and ask to be let in. The id sent
    /// here is partial; the introducer appends the observed address.
    pub async fn join_group(&self) -> Result<String> {
        if self.view.is_member() {
            return Err(RingError::Command(
                "node is already in group, ignoring JOIN".to_string(),
            ));
        }

        let (host, port) = self.dns.read_introducer()?;
        let id = format!(
            "{}-{}",
            self.config.machine_id,
            chrono::Utc::now().timestamp()
        );
        let partial = Member::new(id, config::local_hostname(), self.config.port);

        tracing::debug!(introducer = %host, port, "sending join request");
        let join = Message::new(MessageType::Join, vec![partial]).encode();
        transport::try_send(&join, &host, port, self.config.loss_rate).await;

        Ok("Finished JOIN".to_string())
    }

    /// LEAVE: tell the successors, then forget the group.
    pub async fn leave_group(&self) -> Result<String> {
        if !self.view.is_member() {
            return Err(RingError::Command(
                "node is not in group, ignoring LEAVE".to_string(),
            ));
        }

        if let Some(me) = self.view.self_member() {
            let leave = Message::new(MessageType::Leave, vec![me.clone()]).encode();
            for successor in self.successors() {
                self.send(&leave, &successor.address).await;
            }
            tracing::info!(
                member = %me.id,
                elapsed_secs = self.elapsed_secs(),
                "leaving group"
            );
        }

        self.view.clear();
        self.view.set_member(false);

        Ok("{}".to_string())
    }

    /// WAIT: settle for one second. Used by drivers that want gossip to
    /// quiesce between commands.
    pub async fn wait(&self) -> String {
        tokio::time::sleep(Duration::from_secs(1)).await;
        "Waited".to_string()
    }

    /// STOP: the engine itself never shuts down; the control surface owns
    /// process exit. This only acknowledges.
    pub fn stop(&self) -> String {
        "stop acknowledged".to_string()
    }
}

/// Integer machine prefix of a member id ("<machine>-<epoch>-<address>").
fn machine_prefix(id: &str) -> Option<u32> {
    id.split('-').next()?.parse().ok()
}

/// Successor walk over a view snapshot.
///
/// When self is not in the list (transient, pre-adoption) the first
/// NUM_MONITORS entries stand in. Otherwise walk forward from the ring
/// position, stopping before wrapping back onto self.
pub fn successors_of(snapshot: &ViewSnapshot) -> Vec<Member> {
    let n = snapshot.members.len();
    if n == 0 {
        return Vec::new();
    }

    let self_in_view = snapshot
        .self_member
        .as_ref()
        .map(|me| snapshot.members.iter().any(|m| m.id == me.id))
        .unwrap_or(false);

    if !self_in_view {
        return snapshot.members.iter().take(NUM_MONITORS).cloned().collect();
    }

    let mut successors = Vec::new();
    let mut offset = 1;
    while offset <= NUM_MONITORS && (snapshot.ring_position + offset) % n != snapshot.ring_position
    {
        successors.push(snapshot.members[(snapshot.ring_position + offset) % n].clone());
        offset += 1;
    }
    successors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullChangeSink;

    struct RecordingDns {
        endpoint: Mutex<Option<(String, u16)>>,
        writes: Mutex<Vec<(String, u16)>>,
    }

    impl RecordingDns {
        fn new(endpoint: Option<(String, u16)>) -> Self {
            Self {
                endpoint: Mutex::new(endpoint),
                writes: Mutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<(String, u16)> {
            self.writes.lock().clone()
        }
    }

    impl DnsWriter for RecordingDns {
        fn read_introducer(&self) -> Result<(String, u16)> {
            self.endpoint
                .lock()
                .clone()
                .ok_or_else(|| RingError::Dns("no endpoint recorded".to_string()))
        }

        fn write_introducer(&self, host: &str, port: u16) -> Result<()> {
            self.writes.lock().push((host.to_string(), port));
            *self.endpoint.lock() = Some((host.to_string(), port));
            Ok(())
        }
    }

    fn member(id: &str, address: &str) -> Member {
        Member::new(id, address, 4321)
    }

    fn snapshot(ids: &[&str], ring_position: usize, self_id: Option<&str>) -> ViewSnapshot {
        ViewSnapshot {
            members: ids.iter().map(|id| member(id, "10.0.0.1")).collect(),
            ring_position,
            self_member: self_id.map(|id| member(id, "10.0.0.1")),
            is_member: self_id.is_some(),
        }
    }

    /// Node with all outbound sends suppressed by the loss gate, so tests
    /// drive the handlers without touching the network.
    fn quiet_node(machine_id: u32, introducer: bool, dns: Arc<RecordingDns>) -> Node {
        let config = NodeConfig {
            machine_id,
            introducer,
            loss_rate: 1.0,
            ..NodeConfig::default()
        };
        Node::new(config, dns, Arc::new(NullChangeSink))
    }

    #[test]
    fn test_machine_prefix() {
        assert_eq!(machine_prefix("1-1700000000-host-a"), Some(1));
        assert_eq!(machine_prefix("42-9"), Some(42));
        assert_eq!(machine_prefix("host-1"), None);
    }

    #[test]
    fn test_successors_walk_the_ring() {
        // Whole rest of the ring when it is small.
        let snap = snapshot(&["a", "b"], 0, Some("a"));
        assert_eq!(successors_of(&snap).len(), 1);

        let snap = snapshot(&["a", "b", "c", "d"], 0, Some("a"));
        let ids: Vec<String> = successors_of(&snap).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["b", "c", "d"]);

        // Capped at NUM_MONITORS, wrapping around the tail.
        let snap = snapshot(&["a", "b", "c", "d", "e", "f"], 4, Some("e"));
        let ids: Vec<String> = successors_of(&snap).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["f", "a", "b"]);
    }

    #[test]
    fn test_successors_edge_cases() {
        // Alone on the ring: nobody to monitor.
        let snap = snapshot(&["a"], 0, Some("a"));
        assert!(successors_of(&snap).is_empty());

        // Empty view.
        let snap = snapshot(&[], 0, None);
        assert!(successors_of(&snap).is_empty());

        // Self not adopted yet: first entries stand in.
        let snap = snapshot(&["a", "b", "c", "d"], 0, None);
        let ids: Vec<String> = successors_of(&snap).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_introducer_accepts_its_own_bootstrap_join() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(1, true, dns);

        let join = Message::new(MessageType::Join, vec![member("1-1700000000", "ignored")]);
        node.dispatch(join, "10.0.0.1").await;

        let snap = node.view().snapshot();
        assert_eq!(snap.members.len(), 1);
        assert_eq!(snap.members[0].id, "1-1700000000-10.0.0.1");
        assert_eq!(snap.members[0].address, "10.0.0.1");
        // Membership only begins once the JoinAck comes back around.
        assert!(!snap.is_member);
    }

    #[tokio::test]
    async fn test_introducer_rejects_foreign_join_before_joining_itself() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(1, true, dns);

        let join = Message::new(MessageType::Join, vec![member("2-1700000000", "ignored")]);
        node.dispatch(join, "10.0.0.2").await;

        assert!(node.view().is_empty());
    }

    #[tokio::test]
    async fn test_non_introducer_drops_join() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(1, false, dns);

        let join = Message::new(MessageType::Join, vec![member("1-1700000000", "ignored")]);
        node.dispatch(join, "10.0.0.1").await;

        assert!(node.view().is_empty());
    }

    #[tokio::test]
    async fn test_join_ack_adopts_view_at_the_tail() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(2, false, dns);

        let ack = Message::new(
            MessageType::JoinAck,
            vec![
                member("1-100-intro", "10.0.0.1"),
                member("2-200-joiner", "10.0.0.2"),
            ],
        );
        node.dispatch(ack, "10.0.0.1").await;

        let snap = node.view().snapshot();
        assert!(snap.is_member);
        assert_eq!(snap.ring_position, 1);
        assert_eq!(snap.self_member.unwrap().id, "2-200-joiner");
    }

    #[tokio::test]
    async fn test_empty_join_ack_is_dropped() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(2, false, dns);

        node.dispatch(Message::new(MessageType::JoinAck, vec![]), "10.0.0.1")
            .await;

        assert!(!node.view().is_member());
        assert!(node.view().is_empty());
    }

    #[tokio::test]
    async fn test_introduce_is_idempotent() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(1, false, dns);
        node.dispatch(
            Message::new(MessageType::JoinAck, vec![member("1-100-a", "10.0.0.1")]),
            "10.0.0.9",
        )
        .await;

        let introduce = Message::new(MessageType::Introduce, vec![member("3-300-c", "10.0.0.3")]);
        node.dispatch(introduce.clone(), "10.0.0.2").await;
        node.dispatch(introduce, "10.0.0.3").await;

        assert_eq!(node.view().len(), 2);
    }

    #[tokio::test]
    async fn test_ack_resets_drop_counter() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(1, false, dns);
        node.dispatch(
            Message::new(
                MessageType::JoinAck,
                vec![member("2-200-b", "10.0.0.2"), member("1-100-a", "10.0.0.1")],
            ),
            "10.0.0.9",
        )
        .await;

        node.view().bump_pings_dropped("2-200-b");
        node.view().bump_pings_dropped("2-200-b");

        let ack = Message::new(MessageType::Ack, vec![member("2-200-b", "10.0.0.2")]);
        node.dispatch(ack, "10.0.0.2").await;

        assert_eq!(node.view().find_by_id("2-200-b").unwrap().pings_dropped, 0);
    }

    #[tokio::test]
    async fn test_election_writes_dns_once_on_becoming_minimum() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(2, false, dns.clone());

        // Join behind a smaller id: not the minimum, no write. Self sits at
        // the tail of the adopted view.
        node.dispatch(
            Message::new(
                MessageType::JoinAck,
                vec![
                    member("1-100-a", "10.0.0.1"),
                    member("3-300-c", "10.0.0.3"),
                    member("2-200-b", "10.0.0.2"),
                ],
            ),
            "10.0.0.9",
        )
        .await;
        assert!(dns.writes().is_empty());
        assert!(!node.is_introducer());

        // The minimum fails: we are next in id order and take over.
        node.dispatch(
            Message::new(MessageType::Leave, vec![member("1-100-a", "10.0.0.1")]),
            "10.0.0.3",
        )
        .await;
        assert!(node.is_introducer());
        assert_eq!(dns.writes(), vec![("10.0.0.2".to_string(), 4321)]);

        // Further removals do not re-publish; the edge fired already.
        node.dispatch(
            Message::new(MessageType::Leave, vec![member("3-300-c", "10.0.0.3")]),
            "10.0.0.2",
        )
        .await;
        assert_eq!(dns.writes().len(), 1);
        assert!(node.is_introducer());
    }

    #[tokio::test]
    async fn test_join_command_guards_and_dns_errors() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(1, false, dns.clone());

        // DNS has no endpoint yet: the command surfaces the failure.
        assert!(node.join_group().await.is_err());

        *dns.endpoint.lock() = Some(("10.0.0.1".to_string(), 4321));
        assert_eq!(node.join_group().await.unwrap(), "Finished JOIN");

        // Already a member: guard refuses without touching state.
        node.dispatch(
            Message::new(MessageType::JoinAck, vec![member("1-1-a", "10.0.0.1")]),
            "10.0.0.1",
        )
        .await;
        assert!(node.join_group().await.is_err());
    }

    #[tokio::test]
    async fn test_leave_command_clears_the_view() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(2, false, dns);

        // Not a member yet: guard refuses.
        assert!(node.leave_group().await.is_err());

        node.dispatch(
            Message::new(
                MessageType::JoinAck,
                vec![member("1-100-a", "10.0.0.1"), member("2-200-b", "10.0.0.2")],
            ),
            "10.0.0.1",
        )
        .await;
        assert!(node.view().is_member());

        assert_eq!(node.leave_group().await.unwrap(), "{}");
        assert!(!node.view().is_member());
        assert!(node.view().is_empty());
        assert_eq!(node.list_members().unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_list_commands_serialize_json() {
        let dns = Arc::new(RecordingDns::new(None));
        let node = quiet_node(1, false, dns);

        assert_eq!(node.list_members().unwrap(), "[]");
        assert_eq!(node.list_self().unwrap(), "null");

        node.dispatch(
            Message::new(MessageType::JoinAck, vec![member("1-100-a", "10.0.0.1")]),
            "10.0.0.1",
        )
        .await;

        let members: serde_json::Value =
            serde_json::from_str(&node.list_members().unwrap()).unwrap();
        assert_eq!(members[0]["member_id"], "1-100-a");

        let me: serde_json::Value = serde_json::from_str(&node.list_self().unwrap()).unwrap();
        assert_eq!(me["member_id"], "1-100-a");
    }
}
