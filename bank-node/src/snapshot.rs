use std::collections::HashMap;

use bank_commons::{MarkerId, Message};

use crate::peer::PeerHandle;

/// One running (or just-completed) instance of the Chandy-Lamport algorithm,
/// equivalent to spec.md's LocalState. `recorded_balance` is the balance at
/// the moment the marker was first seen on this node; `pending_channels`
/// holds messages recorded on links whose MARKER hasn't arrived yet;
/// `complete_channels` holds the final, frozen message list for links that
/// have reported their MARKER (or, for the initiating link, the empty list
/// seeded at creation — Note A).
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub recorded_balance: i64,
    pub pending_channels: HashMap<PeerHandle, Vec<Message>>,
    pub complete_channels: HashMap<PeerHandle, Vec<Message>>,
    pub max_channels: usize,
    complete: bool,
}

impl Snapshot {
    /// Creates a new snapshot. `initiating_link` is `None` when this node
    /// itself triggered the algorithm, `Some(link)` when MARKER arrived on
    /// `link` before any local snapshot for this marker existed.
    /// `max_channels` is the number of ready peer links at the moment of
    /// creation (Note B: zero ready peers yields an immediately-complete
    /// snapshot).
    pub fn new(recorded_balance: i64, initiating_link: Option<PeerHandle>, max_channels: usize) -> Self {
        let mut complete_channels = HashMap::new();
        if let Some(link) = initiating_link {
            complete_channels.insert(link, Vec::new());
        }
        let complete = complete_channels.len() == max_channels;
        Snapshot {
            recorded_balance,
            pending_channels: HashMap::new(),
            complete_channels,
            max_channels,
            complete,
        }
    }

    /// Records a non-MARKER message arriving on `link`, unless that
    /// channel's MARKER has already arrived (it is then frozen and no
    /// longer accepts new messages).
    pub fn record(&mut self, link: PeerHandle, message: Message) {
        if self.complete_channels.contains_key(&link) {
            return;
        }
        self.pending_channels.entry(link).or_default().push(message);
    }

    /// Freezes the message list recorded for `link` and marks the channel
    /// complete. Idempotent: a repeated MARKER on an already-complete
    /// channel is a no-op (spec.md §4.4 Note).
    pub fn complete_channel(&mut self, link: PeerHandle) {
        if self.complete_channels.contains_key(&link) {
            return;
        }
        let messages = self.pending_channels.remove(&link).unwrap_or_default();
        self.complete_channels.insert(link, messages);
        if self.complete_channels.len() == self.max_channels {
            self.complete = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// The set of snapshots currently in flight on this node, keyed by marker
/// id. Owned by the node loop; never touched from more than one task.
#[derive(Default)]
pub struct SnapshotRegistry {
    snapshots: HashMap<MarkerId, Snapshot>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, marker_id: &str) -> bool {
        self.snapshots.contains_key(marker_id)
    }

    pub fn create(
        &mut self,
        marker_id: MarkerId,
        recorded_balance: i64,
        initiating_link: Option<PeerHandle>,
        max_channels: usize,
    ) {
        self.snapshots.insert(
            marker_id,
            Snapshot::new(recorded_balance, initiating_link, max_channels),
        );
    }

    /// Appends `message` to every snapshot currently eligible to record on
    /// `link` (i.e. every in-flight snapshot whose `link` channel isn't
    /// already complete). This is the corrected, broadcast-to-all-eligible
    /// `capture_message` behavior.
    pub fn record_for_all(&mut self, link: PeerHandle, message: Message) {
        for snapshot in self.snapshots.values_mut() {
            snapshot.record(link, message.clone());
        }
    }

    pub fn complete_channel(&mut self, marker_id: &str, link: PeerHandle) {
        if let Some(snapshot) = self.snapshots.get_mut(marker_id) {
            snapshot.complete_channel(link);
        }
    }

    pub fn is_complete(&self, marker_id: &str) -> bool {
        self.snapshots
            .get(marker_id)
            .map(Snapshot::is_complete)
            .unwrap_or(false)
    }

    pub fn take(&mut self, marker_id: &str) -> Option<Snapshot> {
        self.snapshots.remove(marker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u64) -> PeerHandle {
        // PeerHandle's inner field is private to this crate; go through the
        // allocator to stay honest about how handles are actually minted.
        let mut alloc = crate::peer::PeerHandleAllocator::default();
        let mut last = alloc.next();
        for _ in 0..n {
            last = alloc.next();
        }
        last
    }

    #[test]
    fn zero_ready_peers_completes_immediately() {
        let snapshot = Snapshot::new(100, None, 0);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn self_initiated_snapshot_waits_for_all_channels() {
        let snapshot = Snapshot::new(100, None, 2);
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn marker_arriving_first_preseeds_its_own_channel() {
        let a = h(0);
        let snapshot = Snapshot::new(50, Some(a), 1);
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.complete_channels.get(&a), Some(&Vec::new()));
    }

    #[test]
    fn messages_recorded_until_channel_completes() {
        let a = h(0);
        let b = h(1);
        let mut snapshot = Snapshot::new(10, None, 2);
        snapshot.record(a, Message::Credit(5));
        snapshot.record(a, Message::Debit(3));
        snapshot.complete_channel(a);
        assert!(!snapshot.is_complete());
        snapshot.record(a, Message::Credit(999));
        assert_eq!(
            snapshot.complete_channels.get(&a),
            Some(&vec![Message::Credit(5), Message::Debit(3)])
        );
        snapshot.complete_channel(b);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn registry_broadcasts_to_every_eligible_snapshot() {
        let a = h(0);
        let mut registry = SnapshotRegistry::new();
        registry.create("m1".to_string(), 10, None, 2);
        registry.create("m2".to_string(), 10, None, 2);
        registry.record_for_all(a, Message::Credit(7));

        registry.complete_channel("m1", a);
        assert!(registry
            .take("m1")
            .unwrap()
            .complete_channels
            .get(&a)
            .unwrap()
            .contains(&Message::Credit(7)));

        registry.complete_channel("m2", a);
        assert!(registry
            .take("m2")
            .unwrap()
            .complete_channels
            .get(&a)
            .unwrap()
            .contains(&Message::Credit(7)));
    }
}
