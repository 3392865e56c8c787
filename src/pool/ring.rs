//! Round-robin ring of live connections.
//!
//! # Responsibilities
//! - Hold the members currently eligible for dispatch
//! - Hand out members in a fixed cyclic order (insertion order)
//! - Skip members that report not writable, bounded by one traversal
//!
//! # Design Decisions
//! - Nodes live in a slot arena linked by index; insert and remove are O(1)
//! - Freed slots are recycled through a free list
//! - Not internally synchronized: callers hold the ring behind a lock

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::pool::ConnectionId;

/// Anything the ring can hold.
pub trait RingMember {
    fn id(&self) -> ConnectionId;
    fn is_writable(&self) -> bool;
}

/// The ring is empty, or a full traversal found no writable member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no writable connection available")]
pub struct NoAvailableConnection;

#[derive(Debug)]
struct Node<M> {
    member: Arc<M>,
    next: usize,
    prev: usize,
}

/// Circular collection of connections with a round-robin cursor.
#[derive(Debug)]
pub struct ConnectionRing<M> {
    slots: Vec<Option<Node<M>>>,
    free: Vec<usize>,
    index: HashMap<ConnectionId, usize>,
    first: Option<usize>,
    last: Option<usize>,
    current: Option<usize>,
}

impl<M: RingMember> ConnectionRing<M> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            first: None,
            last: None,
            current: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.index.contains_key(id)
    }

    /// Insert `member` after the current last member.
    ///
    /// Returns `false` without changing the ring if the member is already
    /// present or is not writable.
    pub fn add(&mut self, member: Arc<M>) -> bool {
        let id = member.id();
        if self.index.contains_key(&id) || !member.is_writable() {
            return false;
        }

        let slot = self.alloc();
        match (self.first, self.last) {
            (Some(first), Some(last)) => {
                self.slots[slot] = Some(Node {
                    member,
                    next: first,
                    prev: last,
                });
                if let Some(node) = self.node_mut(last) {
                    node.next = slot;
                }
                if let Some(node) = self.node_mut(first) {
                    node.prev = slot;
                }
                self.last = Some(slot);
            }
            _ => {
                self.slots[slot] = Some(Node {
                    member,
                    next: slot,
                    prev: slot,
                });
                self.first = Some(slot);
                self.last = Some(slot);
                self.current = Some(slot);
            }
        }
        self.index.insert(id, slot);
        true
    }

    /// Splice the member with `id` out of the ring, returning it.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Arc<M>> {
        let slot = self.index.remove(id)?;
        let node = self.slots[slot].take()?;

        if self.index.is_empty() {
            self.slots.clear();
            self.free.clear();
            self.first = None;
            self.last = None;
            self.current = None;
            return Some(node.member);
        }

        if let Some(prev) = self.node_mut(node.prev) {
            prev.next = node.next;
        }
        if let Some(next) = self.node_mut(node.next) {
            next.prev = node.prev;
        }
        if self.first == Some(slot) {
            self.first = Some(node.next);
        }
        if self.last == Some(slot) {
            self.last = Some(node.prev);
        }
        if self.current == Some(slot) {
            self.current = Some(node.next);
        }
        self.free.push(slot);
        Some(node.member)
    }

    /// Return the member under the cursor and advance past it.
    ///
    /// Members that are not writable are skipped. At most one full traversal
    /// is made, so a ring of stale members fails instead of spinning.
    pub fn get_next(&mut self) -> Result<Arc<M>, NoAvailableConnection> {
        let mut candidate = self.current.ok_or(NoAvailableConnection)?;
        for _ in 0..self.len() {
            let Some(node) = self.node(candidate) else {
                return Err(NoAvailableConnection);
            };
            let next = node.next;
            if node.member.is_writable() {
                let member = node.member.clone();
                self.current = Some(next);
                return Ok(member);
            }
            candidate = next;
        }
        Err(NoAvailableConnection)
    }

    pub fn first(&self) -> Option<&Arc<M>> {
        self.first.and_then(|slot| self.node(slot)).map(|node| &node.member)
    }

    pub fn last(&self) -> Option<&Arc<M>> {
        self.last.and_then(|slot| self.node(slot)).map(|node| &node.member)
    }

    /// Member the next `get_next` will consider first.
    pub fn current(&self) -> Option<&Arc<M>> {
        self.current.and_then(|slot| self.node(slot)).map(|node| &node.member)
    }

    /// Members in cyclic order starting from `first`.
    pub fn members(&self) -> Vec<Arc<M>> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.first;
        for _ in 0..self.len() {
            let Some(node) = cursor.and_then(|slot| self.node(slot)) else {
                break;
            };
            out.push(node.member.clone());
            cursor = Some(node.next);
        }
        out
    }

    /// Remove every member, returning them in cyclic order.
    pub fn drain(&mut self) -> Vec<Arc<M>> {
        let members = self.members();
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.first = None;
        self.last = None;
        self.current = None;
        members
    }

    fn alloc(&mut self) -> usize {
        match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        }
    }

    // Linked slots are always occupied. A vacant one means a broken splice;
    // callers treat it as an empty position rather than panicking under the lock.
    fn node(&self, slot: usize) -> Option<&Node<M>> {
        let node = self.slots.get(slot).and_then(Option::as_ref);
        debug_assert!(node.is_some(), "ring link points at vacant slot {}", slot);
        node
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<M>> {
        let node = self.slots.get_mut(slot).and_then(Option::as_mut);
        debug_assert!(node.is_some(), "ring link points at vacant slot {}", slot);
        node
    }
}

impl<M: RingMember> Default for ConnectionRing<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct Fake {
        id: ConnectionId,
        name: &'static str,
        writable: AtomicBool,
    }

    impl Fake {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(),
                name,
                writable: AtomicBool::new(true),
            })
        }

        fn dead(name: &'static str) -> Arc<Self> {
            let f = Self::new(name);
            f.set_writable(false);
            f
        }

        fn set_writable(&self, w: bool) {
            self.writable.store(w, Ordering::SeqCst);
        }
    }

    impl RingMember for Fake {
        fn id(&self) -> ConnectionId {
            self.id
        }
        fn is_writable(&self) -> bool {
            self.writable.load(Ordering::SeqCst)
        }
    }

    fn names(ring: &ConnectionRing<Fake>) -> Vec<&'static str> {
        ring.members().iter().map(|m| m.name).collect()
    }

    /// Walk `next` links from `first` and check the cycle closes after `len` steps.
    fn assert_cycle(ring: &ConnectionRing<Fake>) {
        let Some(first) = ring.first else {
            assert!(ring.last.is_none() && ring.current.is_none());
            return;
        };
        let mut slot = first;
        for _ in 0..ring.len() {
            let node = ring.node(slot).unwrap();
            assert_eq!(ring.node(node.next).unwrap().prev, slot);
            slot = node.next;
        }
        assert_eq!(slot, first);
        assert_eq!(ring.node(first).unwrap().prev, ring.last.unwrap());
    }

    #[test]
    fn test_round_robin_in_insertion_order() {
        let mut ring = ConnectionRing::new();
        for name in ["A", "B", "C"] {
            assert!(ring.add(Fake::new(name)));
        }

        let picked: Vec<_> = (0..6).map(|_| ring.get_next().unwrap().name).collect();
        assert_eq!(picked, vec!["A", "B", "C", "A", "B", "C"]);
    }

    #[test]
    fn test_non_writable_never_inserted() {
        let mut ring = ConnectionRing::new();
        assert!(ring.add(Fake::new("A")));
        for name in ["x", "y", "z"] {
            assert!(!ring.add(Fake::dead(name)));
        }
        assert_eq!(ring.len(), 1);
        assert_eq!(names(&ring), vec!["A"]);
    }

    #[test]
    fn test_add_is_idempotent_by_identity() {
        let mut ring = ConnectionRing::new();
        let a = Fake::new("A");
        assert!(ring.add(a.clone()));
        assert!(!ring.add(a.clone()));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_add_then_remove_in_any_order_empties_ring() {
        let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
        for order in orders {
            let mut ring = ConnectionRing::new();
            let members: Vec<_> = ["A", "B", "C", "D"].into_iter().map(Fake::new).collect();
            for m in &members {
                ring.add(m.clone());
            }
            ring.get_next().unwrap();

            for i in order {
                assert!(ring.remove(&members[i].id).is_some());
                assert_cycle(&ring);
            }
            assert!(ring.is_empty());
            assert!(ring.first().is_none());
            assert!(ring.last().is_none());
            assert!(ring.current().is_none());
        }
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut ring = ConnectionRing::new();
        ring.add(Fake::new("A"));
        assert!(ring.remove(&ConnectionId::new()).is_none());
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_remove_current_advances_cursor() {
        let mut ring = ConnectionRing::new();
        let a = Fake::new("A");
        let b = Fake::new("B");
        let c = Fake::new("C");
        ring.add(a.clone());
        ring.add(b.clone());
        ring.add(c.clone());

        assert_eq!(ring.get_next().unwrap().name, "A");
        assert_eq!(ring.current().unwrap().name, "B");
        ring.remove(&b.id);
        assert_eq!(ring.current().unwrap().name, "C");
        assert_eq!(ring.get_next().unwrap().name, "C");
        assert_eq!(ring.get_next().unwrap().name, "A");
    }

    #[test]
    fn test_remove_first_and_last_move_pointers() {
        let mut ring = ConnectionRing::new();
        let a = Fake::new("A");
        let b = Fake::new("B");
        let c = Fake::new("C");
        ring.add(a.clone());
        ring.add(b.clone());
        ring.add(c.clone());

        ring.remove(&a.id);
        assert_eq!(ring.first().unwrap().name, "B");
        ring.remove(&c.id);
        assert_eq!(ring.last().unwrap().name, "B");
        assert_eq!(ring.current().unwrap().name, "B");
        assert_cycle(&ring);
    }

    #[test]
    fn test_skips_dead_members() {
        let mut ring = ConnectionRing::new();
        let a = Fake::new("A");
        let b = Fake::new("B");
        let c = Fake::new("C");
        ring.add(a.clone());
        ring.add(b.clone());
        ring.add(c.clone());

        b.set_writable(false);
        let picked: Vec<_> = (0..4).map(|_| ring.get_next().unwrap().name).collect();
        assert_eq!(picked, vec!["A", "C", "A", "C"]);
    }

    #[test]
    fn test_all_dead_fails_instead_of_looping() {
        let mut ring = ConnectionRing::new();
        let a = Fake::new("A");
        let b = Fake::new("B");
        ring.add(a.clone());
        ring.add(b.clone());
        a.set_writable(false);
        b.set_writable(false);

        assert_eq!(ring.get_next().unwrap_err(), NoAvailableConnection);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_empty_ring_fails() {
        let mut ring: ConnectionRing<Fake> = ConnectionRing::new();
        assert_eq!(ring.get_next().unwrap_err(), NoAvailableConnection);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut ring = ConnectionRing::new();
        let a = Fake::new("A");
        let b = Fake::new("B");
        ring.add(a.clone());
        ring.add(b.clone());
        ring.remove(&a.id);
        ring.add(Fake::new("C"));

        assert_eq!(ring.slots.len(), 2);
        assert_eq!(names(&ring), vec!["B", "C"]);
        assert_cycle(&ring);
    }

    #[test]
    fn test_drain_returns_members_in_order() {
        let mut ring = ConnectionRing::new();
        for name in ["A", "B", "C"] {
            ring.add(Fake::new(name));
        }
        let drained: Vec<_> = ring.drain().iter().map(|m| m.name).collect();
        assert_eq!(drained, vec!["A", "B", "C"]);
        assert!(ring.is_empty());
        assert!(ring.current().is_none());
    }
}
