use std::{cmp::Reverse, collections::BinaryHeap};

use delegate::delegate;

use super::event::Event;

/// Pending events. Insertion order breaks ties so equal-time events replay identically.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    inner: BinaryHeap<Event>,
    next_seq: u64,
}

impl Schedule {
    pub(crate) fn push(&mut self, mut ev: Event) {
        ev.seq = Reverse(self.next_seq);
        self.next_seq += 1;
        self.inner.push(ev);
    }

    delegate! {
        to self.inner {
            pub(crate) fn pop(&mut self) -> Option<Event>;
            pub(crate) fn peek(&self) -> Option<&Event>;
            pub(crate) fn is_empty(&self) -> bool;
            pub(crate) fn len(&self) -> usize;
        }
    }
}
