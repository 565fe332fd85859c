use rand::Rng;

use crate::{
    packet::Packet,
    queue::{Drr, Queue},
    simulation::{event::EventList, Context, NodeCmd},
    topology::{failures::FailureState, Link, LinkId},
    units::Bytes,
    Error,
};

/// Traffic class of a flow, and so the queue it occupies at every port it crosses.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialOrd,
    Ord,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct QIndex(usize);

impl QIndex {
    pub const ZERO: QIndex = QIndex::new(0);
    pub const ONE: QIndex = QIndex::new(1);

    pub const fn new(val: usize) -> Self {
        Self(val)
    }

    pub const fn inner(&self) -> usize {
        self.0
    }
}

/// How a port orders the packets it has admitted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, derivative::Derivative)]
#[derivative(Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discipline {
    #[derivative(Default)]
    Fifo,
    /// Lowest packet priority first, FIFO among equals.
    Priority,
    /// Deficit round-robin across one sub-queue per quantum. Each sub-queue is bounded by the
    /// port's capacity and marks against the port's threshold on its own.
    Drr { quanta: Vec<Bytes> },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, typed_builder::TypedBuilder)]
pub struct PortConfig {
    #[builder(setter(into))]
    pub max_queue: Bytes,
    #[builder(setter(into))]
    pub ecn_threshold: Bytes,
    #[serde(default)]
    #[builder(default)]
    pub discipline: Discipline,
}

impl PortConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Discipline::Drr { quanta } = &self.discipline {
            if quanta.is_empty() || quanta.contains(&Bytes::ZERO) {
                return Err(Error::invalid("DRR quanta must be nonempty and nonzero"));
            }
        }
        Ok(())
    }
}

/// The outcome of offering a packet to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { marked: bool },
    Dropped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortStats {
    pub admitted: u64,
    pub dropped: u64,
    pub marked: u64,
    /// Packets lost at transmission because the link was down or its failure model fired.
    pub tx_failed: u64,
    pub sent: u64,
    pub bytes_sent: Bytes,
}

#[derive(Debug, Clone)]
enum Lanes {
    Fifo(Queue),
    Priority(Queue),
    Drr(Drr),
}

impl Lanes {
    fn new(discipline: &Discipline) -> Self {
        match discipline {
            Discipline::Fifo => Lanes::Fifo(Queue::new()),
            Discipline::Priority => Lanes::Priority(Queue::new()),
            Discipline::Drr { quanta } => Lanes::Drr(Drr::new(quanta)),
        }
    }

    fn classify(&self, pkt: &Packet) -> QIndex {
        match self {
            Lanes::Fifo(_) | Lanes::Priority(_) => QIndex::ZERO,
            Lanes::Drr(drr) => drr.classify(pkt.class),
        }
    }

    fn queue(&self, idx: QIndex) -> &Queue {
        match self {
            Lanes::Fifo(q) | Lanes::Priority(q) => q,
            Lanes::Drr(drr) => &drr[idx],
        }
    }

    fn push(&mut self, idx: QIndex, pkt: Packet) {
        match self {
            Lanes::Fifo(q) => q.enqueue(pkt),
            Lanes::Priority(q) => q.enqueue_ranked(pkt),
            Lanes::Drr(drr) => drr[idx].enqueue(pkt),
        }
    }

    fn pop(&mut self) -> Option<(QIndex, Packet)> {
        match self {
            Lanes::Fifo(q) | Lanes::Priority(q) => q.dequeue().map(|p| (QIndex::ZERO, p)),
            Lanes::Drr(drr) => {
                let idx = drr.pick_dequeue_index()?;
                drr[idx].dequeue().map(|p| (idx, p))
            }
        }
    }

    fn nr_queues(&self) -> usize {
        match self {
            Lanes::Fifo(_) | Lanes::Priority(_) => 1,
            Lanes::Drr(drr) => drr.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InService {
    idx: QIndex,
    size: Bytes,
}

/// The output queue of a device onto one of its links.
///
/// A packet keeps counting against its sub-queue's occupancy until its transmission completes.
#[derive(Debug, Clone)]
pub struct OutputPort {
    link: Link,
    cfg: PortConfig,
    lanes: Lanes,
    in_service: Option<InService>,
    status: Status,
    stats: PortStats,
}

impl OutputPort {
    pub fn new(link: Link, cfg: PortConfig) -> Result<Self, Error> {
        cfg.validate()?;
        Ok(Self {
            lanes: Lanes::new(&cfg.discipline),
            link,
            cfg,
            in_service: None,
            status: Status::default(),
            stats: PortStats::default(),
        })
    }

    /// Tail-drop admission with early ECN marking.
    pub fn enqueue(&mut self, mut pkt: Packet) -> Admission {
        let idx = self.lanes.classify(&pkt);
        let occupancy = self.occupancy_of(idx);
        if occupancy + pkt.size > self.cfg.max_queue {
            self.stats.dropped += 1;
            tracing::trace!(
                link = %self.link.id,
                flow = %pkt.flow,
                size = %pkt.size,
                %occupancy,
                "tail drop"
            );
            return Admission::Dropped;
        }
        let marked = occupancy > self.cfg.ecn_threshold;
        if marked {
            pkt.ecn = true;
            self.stats.marked += 1;
        }
        self.stats.admitted += 1;
        self.lanes.push(idx, pkt);
        Admission::Admitted { marked }
    }

    /// Bytes held by the port across all sub-queues, including the packet on the wire.
    pub fn occupancy(&self) -> Bytes {
        (0..self.lanes.nr_queues())
            .map(|i| self.occupancy_of(QIndex::new(i)))
            .sum()
    }

    /// Packets waiting behind the one being serialized.
    pub fn backlog(&self) -> usize {
        (0..self.lanes.nr_queues())
            .map(|i| self.lanes.queue(QIndex::new(i)).len())
            .sum()
    }

    pub fn is_busy(&self) -> bool {
        self.status == Status::Running
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn stats(&self) -> PortStats {
        self.stats
    }

    fn occupancy_of(&self, idx: QIndex) -> Bytes {
        let held = match self.in_service {
            Some(s) if s.idx == idx => s.size,
            _ => Bytes::ZERO,
        };
        self.lanes.queue(idx).size() + held
    }
}

impl OutputPort {
    #[must_use]
    pub(crate) fn receive<R: Rng>(
        &mut self,
        pkt: Packet,
        failures: &FailureState,
        rng: &mut R,
        mut ctx: Context,
    ) -> EventList {
        let admission = self.enqueue(pkt);
        if admission != Admission::Dropped && self.status == Status::Blocked {
            self.start_next(failures, rng, &mut ctx);
        }
        ctx.into_events()
    }

    /// Transmission of the in-service packet has completed.
    #[must_use]
    pub(crate) fn step<R: Rng>(
        &mut self,
        failures: &FailureState,
        rng: &mut R,
        mut ctx: Context,
    ) -> EventList {
        self.in_service = None;
        self.start_next(failures, rng, &mut ctx);
        ctx.into_events()
    }

    fn start_next<R: Rng>(&mut self, failures: &FailureState, rng: &mut R, ctx: &mut Context) {
        while let Some((idx, pkt)) = self.lanes.pop() {
            if failures.is_link_failed(self.link.id) || self.link.failure.fails(ctx.cur_time, rng) {
                // The packet is lost on the wire; move on to the next one
                self.stats.tx_failed += 1;
                tracing::trace!(link = %self.link.id, flow = %pkt.flow, "transmission failed");
                continue;
            }
            let tx_delta = self.link.bandwidth.length(pkt.size).into_delta();
            let prop_delta = self.link.delay.into_delta();
            ctx.schedule(tx_delta, PortCmd::new_tx_done(self.link.id));
            ctx.schedule(tx_delta + prop_delta, NodeCmd::new_arrive(self.link.dst, pkt));
            self.stats.sent += 1;
            self.stats.bytes_sent += pkt.size;
            self.in_service = Some(InService { idx, size: pkt.size });
            self.status = Status::Running;
            return;
        }
        self.status = Status::Blocked;
    }
}

#[derive(Debug, Clone, Copy, derive_new::new)]
pub(crate) enum PortCmd {
    TxDone(LinkId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, derivative::Derivative)]
#[derivative(Default)]
enum Status {
    Running,
    #[derivative(Default)]
    Blocked,
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        packet::PacketKind,
        simulation::Command,
        time::Time,
        topology::{FailureModel, NodeId},
        units::{Gbps, Nanosecs},
        FlowId,
    };

    fn link() -> Link {
        // 10 bits/ns, 5 ns of propagation delay
        Link::builder()
            .id(LinkId::ZERO)
            .src(NodeId::ZERO)
            .dst(NodeId::ONE)
            .delay(Nanosecs::new(5))
            .bandwidth(Gbps::new(10))
            .build()
    }

    fn port(discipline: Discipline) -> OutputPort {
        let cfg = PortConfig::builder()
            .max_queue(Bytes::new(1_000))
            .ecn_threshold(Bytes::new(500))
            .discipline(discipline)
            .build();
        OutputPort::new(link(), cfg).unwrap()
    }

    fn pkt(size: u64) -> Packet {
        Packet::builder()
            .flow(FlowId::ZERO)
            .src(NodeId::ZERO)
            .dst(NodeId::ONE)
            .size(Bytes::new(size))
            .kind(PacketKind::Data {
                seq: Bytes::ZERO,
                len: Bytes::new(size),
            })
            .build()
    }

    fn ctx() -> Context {
        Context::new(Time::ZERO)
    }

    #[test]
    fn three_packets_back_to_back() {
        let mut port = port(Discipline::Fifo);
        let mut rng = StdRng::seed_from_u64(0);
        let failures = FailureState::default();

        // The first packet goes straight onto the wire but still occupies the buffer
        let events = port.receive(pkt(400), &failures, &mut rng, ctx());
        assert_eq!(events.len(), 2);
        assert_eq!(port.occupancy(), Bytes::new(400));
        assert_eq!(port.stats().marked, 0);

        // 400 bytes held, at most 500: admitted unmarked
        assert_eq!(port.enqueue(pkt(400)), Admission::Admitted { marked: false });
        // 400 + 400 + 400 > 1000: dropped without touching the queue
        assert_eq!(port.enqueue(pkt(400)), Admission::Dropped);
        assert_eq!(port.occupancy(), Bytes::new(800));
        assert_eq!(port.stats().dropped, 1);
    }

    #[test]
    fn marks_above_threshold() {
        let mut port = port(Discipline::Fifo);
        assert_eq!(port.enqueue(pkt(300)), Admission::Admitted { marked: false });
        assert_eq!(port.enqueue(pkt(300)), Admission::Admitted { marked: false });
        // 600 bytes held, above the 500 byte threshold
        assert_eq!(port.enqueue(pkt(100)), Admission::Admitted { marked: true });
        assert_eq!(port.stats().marked, 1);
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let mut port = port(Discipline::Fifo);
        for size in [100, 250, 999, 1, 600, 50, 400, 7] {
            let before = port.occupancy();
            match port.enqueue(pkt(size)) {
                Admission::Dropped => assert_eq!(port.occupancy(), before),
                Admission::Admitted { .. } => {
                    assert_eq!(port.occupancy(), before + Bytes::new(size))
                }
            }
            assert!(port.occupancy() <= Bytes::new(1_000));
        }
    }

    #[test]
    fn transmission_timing() {
        let mut port = port(Discipline::Fifo);
        let mut rng = StdRng::seed_from_u64(0);
        let events = port.receive(pkt(400), &FailureState::default(), &mut rng, ctx());
        // 400 bytes at 10 bits/ns take 320 ns, then 5 ns on the wire
        let times: Vec<_> = events.iter().map(|e| e.time()).collect();
        assert_eq!(times, vec![Time::new(320), Time::new(325)]);
        assert!(matches!(events[0].cmd, Command::Port(PortCmd::TxDone(_))));
        assert!(matches!(
            events[1].cmd,
            Command::Node(NodeCmd::Arrive { node, .. }) if node == NodeId::ONE
        ));
        assert!(port.is_busy());

        // Draining the only packet leaves the port idle and empty
        let events = port.step(&FailureState::default(), &mut rng, Context::new(Time::new(320)));
        assert!(events.is_empty());
        assert!(!port.is_busy());
        assert_eq!(port.occupancy(), Bytes::ZERO);
    }

    #[test]
    fn failed_link_drops_and_keeps_draining() {
        let mut port = port(Discipline::Fifo);
        let mut rng = StdRng::seed_from_u64(0);
        let mut failures = FailureState::default();
        failures.fail_link(LinkId::ZERO);
        assert_eq!(port.enqueue(pkt(100)), Admission::Admitted { marked: false });
        assert_eq!(port.enqueue(pkt(100)), Admission::Admitted { marked: false });
        let events = port.step(&failures, &mut rng, ctx());
        assert!(events.is_empty());
        assert_eq!(port.stats().tx_failed, 2);
        assert_eq!(port.occupancy(), Bytes::ZERO);
        assert!(!port.is_busy());
    }

    #[test]
    fn failure_model_consulted_per_packet() {
        let mut l = link();
        l.failure = FailureModel::Window {
            from: Nanosecs::ZERO,
            until: Nanosecs::new(1),
        };
        let cfg = PortConfig::builder()
            .max_queue(Bytes::new(1_000))
            .ecn_threshold(Bytes::new(500))
            .build();
        let mut port = OutputPort::new(l, cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let failures = FailureState::default();
        let events = port.receive(pkt(100), &failures, &mut rng, ctx());
        assert!(events.is_empty());
        let events = port.receive(pkt(100), &failures, &mut rng, Context::new(Time::new(1)));
        assert_eq!(events.len(), 2);
        assert_eq!(port.stats().tx_failed, 1);
        assert_eq!(port.stats().sent, 1);
    }

    #[test]
    fn priority_port_serves_lowest_rank() {
        let mut port = port(Discipline::Priority);
        let mut rng = StdRng::seed_from_u64(0);
        let failures = FailureState::default();
        for (rank, size) in [(9, 100), (2, 101), (5, 102)] {
            let mut p = pkt(size);
            p.priority = rank;
            port.enqueue(p);
        }
        let mut sizes = Vec::new();
        let mut events = port.step(&failures, &mut rng, ctx());
        loop {
            let arrived = events.iter().find_map(|e| match &e.cmd {
                Command::Node(NodeCmd::Arrive { pkt, .. }) => Some(pkt.size.into_u64()),
                _ => None,
            });
            let Some(size) = arrived else { break };
            sizes.push(size);
            events = port.step(&failures, &mut rng, ctx());
        }
        assert_eq!(sizes, vec![101, 102, 100]);
    }

    #[test]
    fn drr_sub_queues_bound_separately() {
        let mut port = port(Discipline::Drr {
            quanta: vec![Bytes::new(1_000), Bytes::new(1_000)],
        });
        let mut a = pkt(800);
        a.class = QIndex::ZERO;
        let mut b = pkt(800);
        b.class = QIndex::ONE;
        assert_eq!(port.enqueue(a), Admission::Admitted { marked: false });
        assert_eq!(port.enqueue(b), Admission::Admitted { marked: false });
        assert_eq!(port.enqueue(a), Admission::Dropped);
        assert_eq!(port.occupancy(), Bytes::new(1_600));
    }

    #[test]
    fn drr_rejects_zero_quanta() {
        let cfg = PortConfig::builder()
            .max_queue(Bytes::new(1_000))
            .ecn_threshold(Bytes::new(500))
            .discipline(Discipline::Drr {
                quanta: vec![Bytes::ZERO],
            })
            .build();
        assert!(matches!(
            OutputPort::new(link(), cfg),
            Err(Error::InvalidArgument(_))
        ));
    }
}
