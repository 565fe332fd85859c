use std::{
    collections::VecDeque,
    ops::{Index, IndexMut},
};

use crate::{packet::Packet, port::QIndex, units::Bytes};

/// A byte-accounted packet queue.
#[derive(Debug, Default, Clone, derive_new::new)]
pub(crate) struct Queue {
    #[new(default)]
    inner: VecDeque<Packet>,
    #[new(default)]
    qsize: Bytes,
}

impl Queue {
    pub(crate) fn enqueue(&mut self, pkt: Packet) {
        self.qsize += pkt.size;
        self.inner.push_back(pkt);
    }

    /// Inserts behind every packet of equal or better (lower) priority, so equal ranks stay FIFO.
    pub(crate) fn enqueue_ranked(&mut self, pkt: Packet) {
        self.qsize += pkt.size;
        let at = self.inner.partition_point(|p| p.priority <= pkt.priority);
        self.inner.insert(at, pkt);
    }

    pub(crate) fn dequeue(&mut self) -> Option<Packet> {
        match self.inner.pop_front() {
            r @ Some(pkt) => {
                self.qsize -= pkt.size;
                r
            }
            None => None,
        }
    }

    pub(crate) fn size(&self) -> Bytes {
        self.qsize
    }

    delegate::delegate! {
        to self.inner {
            #[call(front)]
            pub(crate) fn peek(&self) -> Option<&Packet>;
            pub(crate) fn is_empty(&self) -> bool;
            pub(crate) fn len(&self) -> usize;
        }
    }
}

/// Deficit round-robin over per-class sub-queues.
#[derive(Debug, Clone)]
pub(crate) struct Drr {
    queues: Vec<Queue>,
    quanta: Vec<Bytes>,
    deficits: Vec<Bytes>,
    counter: usize,
    should_bump: bool,
}

impl Drr {
    // PRECONDITION: `quanta` is nonempty and all quanta are nonzero
    pub(crate) fn new(quanta: &[Bytes]) -> Self {
        let nr_queues = quanta.len();
        Self {
            queues: (0..nr_queues).map(|_| Queue::new()).collect(),
            quanta: Vec::from(quanta),
            deficits: vec![Bytes::ZERO; nr_queues],
            counter: 0,
            should_bump: true,
        }
    }

    /// Classes beyond the configured sub-queues share the last one.
    pub(crate) fn classify(&self, class: QIndex) -> QIndex {
        QIndex::new(class.inner().min(self.queues.len() - 1))
    }

    // This routine returns `None` iff all queues are empty. Otherwise, queue indices are returned
    // in deficit round-robin order according to the configured quanta.
    #[must_use]
    pub(crate) fn pick_dequeue_index(&mut self) -> Option<QIndex> {
        let n = self.queues.len();
        let start = self.counter;
        loop {
            if self.counter - start == n {
                // All queues are empty
                return None;
            }
            let idx = self.counter % n;
            if self.queues[idx].is_empty() {
                self.deficits[idx] = Bytes::ZERO;
                self.counter += 1;
                self.should_bump = true;
            } else {
                break;
            }
        }
        // Some queue is nonempty, and every quantum is positive, so some queue eventually
        // accumulates enough deficit to send.
        loop {
            let idx = self.counter % n;
            let Some(cost) = self.queues[idx].peek().map(|p| p.size) else {
                self.deficits[idx] = Bytes::ZERO;
                self.counter += 1;
                self.should_bump = true;
                continue;
            };
            if self.should_bump {
                self.deficits[idx] += self.quanta[idx];
                self.should_bump = false;
            }
            if self.deficits[idx] >= cost {
                self.deficits[idx] -= cost;
                break Some(QIndex::new(idx));
            } else {
                self.counter += 1;
                self.should_bump = true;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }
}

impl Index<QIndex> for Drr {
    type Output = Queue;

    fn index(&self, index: QIndex) -> &Self::Output {
        &self.queues[index.inner()]
    }
}

impl IndexMut<QIndex> for Drr {
    fn index_mut(&mut self, index: QIndex) -> &mut Self::Output {
        &mut self.queues[index.inner()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{packet::PacketKind, FlowId, NodeId};

    fn mk_pkt(flow: FlowId, class: QIndex, size: Bytes) -> Packet {
        Packet::builder()
            .flow(flow)
            .src(NodeId::ZERO)
            .dst(NodeId::ONE)
            .size(size)
            .kind(PacketKind::Data {
                seq: Bytes::ZERO,
                len: size,
            })
            .class(class)
            .build()
    }

    fn ranked(priority: u64) -> Packet {
        let mut pkt = mk_pkt(FlowId::new(priority as usize), QIndex::ZERO, Bytes::new(10));
        pkt.priority = priority;
        pkt
    }

    fn check_drr_sequence(drr: &mut Drr, sequence: &[usize]) {
        for &idx in sequence {
            let expected = QIndex::new(idx);
            let actual = drr.pick_dequeue_index().expect("all queues empty");
            // We have to call dequeue every time we call `pick_dequeue_index`
            assert_eq!(drr[actual].dequeue().unwrap().class, expected);
        }
    }

    #[test]
    fn queue_tracks_bytes() {
        let mut q = Queue::new();
        q.enqueue(mk_pkt(FlowId::ZERO, QIndex::ZERO, Bytes::new(400)));
        q.enqueue(mk_pkt(FlowId::ZERO, QIndex::ZERO, Bytes::new(100)));
        assert_eq!(q.size(), Bytes::new(500));
        assert_eq!(q.dequeue().unwrap().size, Bytes::new(400));
        assert_eq!(q.size(), Bytes::new(100));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn ranked_insert_is_stable() {
        let mut q = Queue::new();
        for p in [5, 1, 5, 3, 1] {
            q.enqueue_ranked(ranked(p));
        }
        let order: Vec<_> = std::iter::from_fn(|| q.dequeue())
            .map(|p| p.priority)
            .collect();
        assert_eq!(order, vec![1, 1, 3, 5, 5]);
    }

    #[test]
    fn drr_empty_none() {
        let mut drr = Drr::new(&[Bytes::new(1); 8]);
        assert!(drr.pick_dequeue_index().is_none());
    }

    #[test]
    fn drr_nonempty_some() {
        let mut drr = Drr::new(&[Bytes::new(1); 8]);
        let pkt = mk_pkt(FlowId::ZERO, QIndex::ZERO, Bytes::new(1_000));
        drr[pkt.class].enqueue(pkt);
        assert_eq!(drr.pick_dequeue_index(), Some(QIndex::ZERO));
    }

    #[test]
    fn drr_empty_resets_deficit() {
        let mut drr = Drr::new(&[Bytes::new(1); 2]);

        // One packet in queue 0
        let pkt = mk_pkt(FlowId::ZERO, QIndex::ZERO, Bytes::new(1_000));
        drr[pkt.class].enqueue(pkt);

        // 20 packets in queue 1
        for _ in 0..20 {
            let pkt = mk_pkt(FlowId::ONE, QIndex::ONE, Bytes::new(1_000));
            drr[QIndex::ONE].enqueue(pkt);
        }

        // First dequeue should be from queue 0, after which its deficit should be reset
        check_drr_sequence(&mut drr, &[0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1]);

        // 10 more packets in queue 0
        for _ in 0..10 {
            let pkt = mk_pkt(FlowId::ZERO, QIndex::ZERO, Bytes::new(1_000));
            drr[pkt.class].enqueue(pkt);
        }

        // Queue 0 should not have accumulated deficit while it was empty
        check_drr_sequence(
            &mut drr,
            &[0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1],
        );
    }

    #[test]
    fn drr_respects_weights() {
        let mut drr = Drr::new(&[Bytes::new(1), Bytes::new(3)]);

        let pkt1 = mk_pkt(FlowId::ZERO, QIndex::ZERO, Bytes::ONE);
        let pkt2 = mk_pkt(FlowId::ONE, QIndex::ONE, Bytes::ONE);
        for _ in 0..6 {
            drr[pkt1.class].enqueue(pkt1);
            drr[pkt2.class].enqueue(pkt2);
        }

        check_drr_sequence(&mut drr, &[0, 1, 1, 1, 0, 1, 1, 1, 0, 0, 0, 0]);
        assert!(drr.pick_dequeue_index().is_none());
    }

    #[test]
    fn drr_classify_clamps() {
        let drr = Drr::new(&[Bytes::new(1); 2]);
        assert_eq!(drr.classify(QIndex::new(7)), QIndex::ONE);
        assert_eq!(drr.classify(QIndex::ZERO), QIndex::ZERO);
    }
}
