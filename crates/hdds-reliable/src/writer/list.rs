// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Index-linked sample lists.
//!
//! Each sample node carries two independent `prev`/`next` link pairs
//! ("threads"): one for the global send-order list it currently sits on
//! (Unsent, Sending, Sent, Released or Resend) and one for its instance
//! queue. Lists store only head/tail/len; links live in the nodes, so
//! moving a sample between lists or splicing whole lists is O(1).

use super::pool::SlotPool;
use super::sample::{SampleId, SampleNode};

/// Which link pair of a node a list threads through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Thread {
    /// Global send-order lists.
    Send,
    /// Per-instance queue.
    Instance,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Link {
    pub prev: Option<SampleId>,
    pub next: Option<SampleId>,
}

#[derive(Debug, Default)]
pub(crate) struct SampleList {
    head: Option<SampleId>,
    tail: Option<SampleId>,
    len: usize,
}

type Nodes = SlotPool<SampleNode>;

fn link_mut(nodes: &mut Nodes, id: SampleId, thread: Thread) -> Option<&mut Link> {
    nodes.get_mut(id.0).map(|node| node.link_mut(thread))
}

impl SampleList {
    #[inline]
    pub fn head(&self) -> Option<SampleId> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<SampleId> {
        self.tail
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Link `id` (currently unlinked on `thread`) at the tail.
    pub fn push_back(&mut self, nodes: &mut Nodes, id: SampleId, thread: Thread) {
        let prev = self.tail;
        if let Some(link) = link_mut(nodes, id, thread) {
            *link = Link { prev, next: None };
        } else {
            return;
        }
        match prev.and_then(|tail| link_mut(nodes, tail, thread)) {
            Some(tail_link) => tail_link.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Link `id` (currently unlinked on `thread`) at the head.
    pub fn push_front(&mut self, nodes: &mut Nodes, id: SampleId, thread: Thread) {
        let next = self.head;
        if let Some(link) = link_mut(nodes, id, thread) {
            *link = Link { prev: None, next };
        } else {
            return;
        }
        match next.and_then(|head| link_mut(nodes, head, thread)) {
            Some(head_link) => head_link.prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Unlink `id`, which must be a member of this list.
    pub fn remove(&mut self, nodes: &mut Nodes, id: SampleId, thread: Thread) -> bool {
        let Some(link) = link_mut(nodes, id, thread).map(std::mem::take) else {
            return false;
        };
        match link.prev.and_then(|prev| link_mut(nodes, prev, thread)) {
            Some(prev_link) => prev_link.next = link.next,
            None => self.head = link.next,
        }
        match link.next.and_then(|next| link_mut(nodes, next, thread)) {
            Some(next_link) => next_link.prev = link.prev,
            None => self.tail = link.prev,
        }
        self.len -= 1;
        true
    }

    pub fn pop_front(&mut self, nodes: &mut Nodes, thread: Thread) -> Option<SampleId> {
        let head = self.head?;
        self.remove(nodes, head, thread);
        Some(head)
    }

    /// Move every element of `other` to the tail of `self`, leaving `other` empty.
    pub fn append(&mut self, other: &mut SampleList, nodes: &mut Nodes, thread: Thread) {
        let (Some(other_head), Some(other_tail)) = (other.head, other.tail) else {
            return;
        };
        match self.tail.and_then(|tail| link_mut(nodes, tail, thread)) {
            Some(tail_link) => {
                tail_link.next = Some(other_head);
                if let Some(head_link) = link_mut(nodes, other_head, thread) {
                    head_link.prev = self.tail;
                }
            }
            None => self.head = Some(other_head),
        }
        self.tail = Some(other_tail);
        self.len += other.len;
        *other = SampleList::default();
    }

    pub fn iter<'a>(&self, nodes: &'a Nodes, thread: Thread) -> ListIter<'a> {
        ListIter {
            nodes,
            thread,
            cursor: self.head,
        }
    }
}

/// Walk `prev` links from `id` to the first element of its list.
pub(crate) fn list_head(nodes: &Nodes, id: SampleId, thread: Thread) -> Option<SampleId> {
    let mut current = id;
    loop {
        let node = nodes.get(current.0)?;
        match node.link(thread).prev {
            Some(prev) => current = prev,
            None => return Some(current),
        }
    }
}

pub(crate) struct ListIter<'a> {
    nodes: &'a Nodes,
    thread: Thread,
    cursor: Option<SampleId>,
}

impl Iterator for ListIter<'_> {
    type Item = SampleId;

    fn next(&mut self) -> Option<SampleId> {
        let id = self.cursor?;
        self.cursor = self.nodes.get(id.0).and_then(|n| n.link(self.thread).next);
        Some(id)
    }
}
