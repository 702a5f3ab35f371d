// Membership View
//
// The per-node picture of the group: an ordered member list, the index of
// self on the ring, and the joined flag. One coarse mutex guards all of it;
// every structural mutation notifies the change sink before the lock drops.
//
// Order is insertion order (new members append at the tail), which all live
// nodes share modulo gossip delay. The ring is this list read modulo its
// length; `ring_position` is nothing more than the index of self in it.

use crate::membership::Member;
use crate::notify::ChangeSink;
use parking_lot::Mutex;
use std::sync::Arc;

/// Consistent copy of the view, taken under the lock.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub members: Vec<Member>,
    pub ring_position: usize,
    pub self_member: Option<Member>,
    pub is_member: bool,
}

struct ViewState {
    members: Vec<Member>,
    ring_position: usize,
    self_member: Option<Member>,
    is_member: bool,
}

/// Thread-safe membership container. The protocol engine is its only writer.
pub struct MembershipView {
    state: Mutex<ViewState>,
    sink: Arc<dyn ChangeSink>,
}

impl MembershipView {
    pub fn new(sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            state: Mutex::new(ViewState {
                members: Vec::new(),
                ring_position: 0,
                self_member: None,
                is_member: false,
            }),
            sink,
        }
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let state = self.state.lock();
        ViewSnapshot {
            members: state.members.clone(),
            ring_position: state.ring_position,
            self_member: state.self_member.clone(),
            is_member: state.is_member,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_member(&self) -> bool {
        self.state.lock().is_member
    }

    pub fn set_member(&self, value: bool) {
        self.state.lock().is_member = value;
    }

    pub fn self_member(&self) -> Option<Member> {
        self.state.lock().self_member.clone()
    }

    /// Appends a member at the tail. Idempotent on id: a duplicate is
    /// dropped, returns false, and nobody is notified.
    pub fn append(&self, member: Member) -> bool {
        let mut state = self.state.lock();
        if state.members.iter().any(|m| m.id == member.id) {
            return false;
        }
        state.members.push(member);
        self.sink.on_membership_changed();
        true
    }

    /// Removes the member with the given id, returning its former index.
    ///
    /// When the removed index was below the ring position, the position
    /// shifts down with it, so `members[ring_position]` keeps naming self.
    pub fn remove_by_id(&self, id: &str) -> Option<usize> {
        let mut state = self.state.lock();
        let index = state.members.iter().position(|m| m.id == id)?;
        state.members.remove(index);
        if state.ring_position > index {
            state.ring_position -= 1;
        }
        self.sink.on_membership_changed();
        Some(index)
    }

    pub fn find_by_id(&self, id: &str) -> Option<Member> {
        let state = self.state.lock();
        state.members.iter().find(|m| m.id == id).cloned()
    }

    /// Clears the suspicion counter for a peer that just answered a ping.
    /// Returns false if the peer is no longer in the view.
    pub fn reset_pings_dropped(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        match state.members.iter_mut().find(|m| m.id == id) {
            Some(member) => {
                member.pings_dropped = 0;
                true
            }
            None => false,
        }
    }

    /// Increments a peer's suspicion counter, returning the new count, or
    /// None if the peer vanished from the view since the caller looked.
    pub fn bump_pings_dropped(&self, id: &str) -> Option<u32> {
        let mut state = self.state.lock();
        let member = state.members.iter_mut().find(|m| m.id == id)?;
        member.pings_dropped += 1;
        Some(member.pings_dropped)
    }

    /// Adopts a whole view at once, as handed down in a JoinAck.
    pub fn replace_all(&self, members: Vec<Member>, self_index: usize) {
        let mut state = self.state.lock();
        state.self_member = members.get(self_index).cloned();
        state.members = members;
        state.ring_position = self_index;
        self.sink.on_membership_changed();
    }

    /// Empties the member list on LEAVE. Self stays recorded; it is simply
    /// no longer part of any group.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.members.clear();
        self.sink.on_membership_changed();
    }
}
