pub(crate) mod event;
mod schedule;

use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::{
    data::{PortReport, Record, Report},
    flow::{Flow, FlowDesc, FlowRegistry, FlowStatus},
    packet::{Packet, PacketKind},
    port::{OutputPort, PortCmd},
    routing::{Hop, RoutingLayer},
    time::{Delta, Time},
    topology::{
        failures::{FailureState, TopologyCmd},
        LinkId, NodeId, Topology,
    },
    transport::{receiver::Receiver, AckOutcome, Socket, TimeoutOutcome, TransportConfig},
    workload::{Workload, WorkloadCmd},
    Error, FlowId,
};

use self::{
    event::{Event, EventList},
    schedule::Schedule,
};

/// What one call to [`Simulation::advance`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// An event ran at this time.
    Executed(Time),
    QueueExhausted,
    /// The next event lies beyond the horizon. Nothing ran.
    HorizonReached,
}

/// One self-contained run: clock, pending events, network state and flows.
#[derive(Debug, typed_builder::TypedBuilder)]
#[builder(builder_method(vis = "pub(crate)"), builder_type(vis = "pub(crate)"))]
pub struct Simulation {
    // Run-time
    #[builder(default, setter(skip))]
    cur_time: Time,
    #[builder(default, setter(skip))]
    schedule: Schedule,
    #[builder(default)]
    horizon: Option<Time>,
    #[builder(default, setter(skip))]
    nr_events: u64,

    // Network
    topology: Topology,
    #[builder(default)]
    failures: FailureState,
    ports: FxHashMap<LinkId, OutputPort>,
    routing: RoutingLayer,

    // Flows
    workload: Workload,
    transport: TransportConfig,
    #[builder(default, setter(skip))]
    flows: FlowRegistry,
    #[builder(default, setter(skip))]
    sockets: FxHashMap<FlowId, Socket>,
    #[builder(default, setter(skip))]
    receivers: FxHashMap<FlowId, Receiver>,

    #[builder(setter(transform = |seed: u64| StdRng::seed_from_u64(seed)))]
    rng: StdRng,

    // Results
    #[builder(default, setter(skip))]
    records: Vec<Record>,
    #[builder(default, setter(skip))]
    unroutable: u64,
}

impl Simulation {
    /// Kicks off the workload.
    pub(crate) fn start(&mut self) {
        if !self.workload.is_empty() {
            self.schedule
                .push(Event::new(self.cur_time, WorkloadCmd::new_step()));
        }
    }

    /// Executes the next event, unless the queue is empty or the event lies past the horizon.
    pub fn advance(&mut self) -> Result<Advance, Error> {
        let Some(next) = self.schedule.peek() else {
            return Ok(Advance::QueueExhausted);
        };
        let time = next.time();
        if self.horizon.is_some_and(|h| time > h) {
            return Ok(Advance::HorizonReached);
        }
        let Some(next) = self.schedule.pop() else {
            return Ok(Advance::QueueExhausted);
        };
        if time < self.cur_time {
            return Err(Error::Inconsistent(format!(
                "event at {time} popped after {}",
                self.cur_time
            )));
        }
        self.cur_time = time;
        self.nr_events += 1;

        let events = self.apply(next.cmd)?;
        for ev in events.into_iter() {
            self.schedule.push(ev);
        }
        Ok(Advance::Executed(time))
    }

    /// Runs until the queue empties or the horizon is reached.
    pub fn run(mut self) -> Result<Report, Error> {
        while let Advance::Executed(_) = self.advance()? {}
        Ok(self.finish())
    }

    pub fn schedule_link_failure(&mut self, link: LinkId, delay_ns: i128) -> Result<(), Error> {
        self.topology.link(link)?;
        self.schedule_topology(TopologyCmd::FailLink(link), delay_ns)
    }

    pub fn schedule_link_recovery(&mut self, link: LinkId, delay_ns: i128) -> Result<(), Error> {
        self.topology.link(link)?;
        self.schedule_topology(TopologyCmd::RecoverLink(link), delay_ns)
    }

    pub fn schedule_node_failure(&mut self, node: NodeId, delay_ns: i128) -> Result<(), Error> {
        self.topology.node(node)?;
        self.schedule_topology(TopologyCmd::FailNode(node), delay_ns)
    }

    pub fn schedule_node_recovery(&mut self, node: NodeId, delay_ns: i128) -> Result<(), Error> {
        self.topology.node(node)?;
        self.schedule_topology(TopologyCmd::RecoverNode(node), delay_ns)
    }

    fn schedule_topology(&mut self, cmd: TopologyCmd, delay_ns: i128) -> Result<(), Error> {
        let delta = Delta::from_signed(delay_ns)?;
        self.schedule.push(Event::new(self.cur_time + delta, cmd));
        Ok(())
    }

    pub fn now(&self) -> Time {
        self.cur_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn failures(&self) -> &FailureState {
        &self.failures
    }

    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    pub fn socket(&self, flow: FlowId) -> Option<&Socket> {
        self.sockets.get(&flow)
    }

    pub fn port(&self, link: LinkId) -> Option<&OutputPort> {
        self.ports.get(&link)
    }

    /// Records of flows that have already finished.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn pending_events(&self) -> usize {
        self.schedule.len()
    }

    fn context(&self) -> Context {
        Context::new(self.cur_time)
    }

    fn finish(mut self) -> Report {
        // Flows still running when the run stops are reported as incomplete
        for id in self.flows.sorted_ids() {
            if let Some(flow) = self.flows.remove(id) {
                let record = self.record(&flow);
                self.records.push(record);
            }
        }
        self.records.sort_by_key(|r| r.id);
        let mut ports: Vec<_> = self
            .ports
            .iter()
            .map(|(&link, port)| PortReport {
                link,
                stats: port.stats(),
            })
            .collect();
        ports.sort_by_key(|p| p.link);
        Report {
            records: self.records,
            ports,
            end: self.cur_time.into_nanos(),
            events: self.nr_events,
            unroutable: self.unroutable,
        }
    }

    fn record(&self, flow: &Flow) -> Record {
        let start = flow.start.into_nanos();
        let end = self.cur_time.into_nanos();
        Record {
            id: flow.id,
            job: flow.job,
            src: flow.src,
            dst: flow.dst,
            size: flow.size,
            delivered: flow.delivered,
            start,
            end,
            fct: end - start,
            completed: flow.status == FlowStatus::Completed,
        }
    }
}

// Command handlers
impl Simulation {
    fn apply(&mut self, cmd: Command) -> Result<EventList, Error> {
        let ctx = self.context();
        match cmd {
            Command::Topology(cmd) => cmd.apply(&self.topology, &mut self.failures, ctx),
            Command::Port(PortCmd::TxDone(link)) => {
                let port = self.ports.get_mut(&link).ok_or(Error::UnknownLink(link))?;
                Ok(port.step(&self.failures, &mut self.rng, ctx))
            }
            Command::Node(NodeCmd::Arrive { node, pkt }) => self.packet_arrive(node, pkt, ctx),
            Command::Flow(FlowCmd::Arrive(desc)) => self.flow_arrive(desc, ctx),
            Command::Flow(FlowCmd::TrySend { id, version }) => self.try_send(id, version, ctx),
            Command::Flow(FlowCmd::Timeout { id, version }) => self.timeout(id, version, ctx),
            Command::Workload(WorkloadCmd::Step) => Ok(self.workload.step(ctx)),
        }
    }

    fn flow_arrive(&mut self, desc: FlowDesc, mut ctx: Context) -> Result<EventList, Error> {
        let id = self.flows.admit(&desc, ctx.cur_time);
        tracing::debug!(
            time = %ctx.cur_time,
            flow = %id,
            src = %desc.src,
            dst = %desc.dst,
            size = %desc.size,
            "flow arrived"
        );
        let line_rate = self.topology.line_rate(desc.src)?;
        let mut socket = Socket::new(id, desc.size, &self.transport, line_rate);
        let version = socket.next_send_version();
        self.sockets.insert(id, socket);
        self.receivers.insert(id, Receiver::default());
        if let Some(flow) = self.flows.get(id) {
            if self.routing.needs_path(flow, false, &self.topology, &self.failures) {
                match self.routing.assign_path(flow, false, &self.topology, &self.failures)? {
                    Some(path) => self.set_path(id, path, false),
                    None => {
                        self.abandon(id, &mut ctx);
                        return Ok(ctx.into_events());
                    }
                }
            }
        }
        ctx.schedule_now(FlowCmd::new_try_send(id, version));
        Ok(ctx.into_events())
    }

    fn try_send(&mut self, id: FlowId, version: u64, mut ctx: Context) -> Result<EventList, Error> {
        let (Some(flow), Some(socket)) = (self.flows.get(id), self.sockets.get_mut(&id)) else {
            return Ok(ctx.into_events());
        };
        if !socket.send_is_current(version) {
            return Ok(ctx.into_events());
        }
        let Some(seg) = socket.next_segment() else {
            // Window-bound; the next acknowledgment resumes sending
            socket.pause();
            return Ok(ctx.into_events());
        };
        let pkt = Packet::builder()
            .flow(id)
            .src(flow.src)
            .dst(flow.dst)
            .size(seg.len + Packet::SZ_HDR)
            .kind(PacketKind::Data {
                seq: seg.seq,
                len: seg.len,
            })
            .priority(socket.priority())
            .class(flow.class)
            .build();
        if seg.retransmit {
            tracing::trace!(flow = %id, seq = %seg.seq, "retransmit");
        }
        if !socket.is_timer_armed() {
            let (v, rto) = socket.arm_timer();
            ctx.schedule(rto, FlowCmd::new_timeout(id, v));
        }
        let pacing = socket.pacing_rate().length(pkt.size).into_delta();
        let next = socket.next_send_version();
        ctx.schedule(pacing, FlowCmd::new_try_send(id, next));

        self.forward(pkt.src, pkt, &mut ctx)?;
        Ok(ctx.into_events())
    }

    fn timeout(&mut self, id: FlowId, version: u64, mut ctx: Context) -> Result<EventList, Error> {
        let Some(socket) = self.sockets.get_mut(&id) else {
            return Ok(ctx.into_events());
        };
        if !socket.timer_is_current(version) {
            return Ok(ctx.into_events());
        }
        match socket.on_timeout() {
            TimeoutOutcome::Retransmit => {
                tracing::debug!(
                    time = %ctx.cur_time,
                    flow = %id,
                    snd_una = %socket.snd_una(),
                    window = %socket.window(),
                    "retransmission timeout"
                );
                let (v, rto) = socket.arm_timer();
                ctx.schedule(rto, FlowCmd::new_timeout(id, v));
                let next = socket.next_send_version();
                ctx.schedule_now(FlowCmd::new_try_send(id, next));
            }
            TimeoutOutcome::Abandon => self.abandon(id, &mut ctx),
            TimeoutOutcome::Stale => {}
        }
        Ok(ctx.into_events())
    }

    fn packet_arrive(
        &mut self,
        node: NodeId,
        pkt: Packet,
        mut ctx: Context,
    ) -> Result<EventList, Error> {
        if self.failures.is_node_failed(node) {
            tracing::trace!(%node, flow = %pkt.flow, "arrived at failed node");
            return Ok(ctx.into_events());
        }
        self.forward(node, pkt, &mut ctx)?;
        Ok(ctx.into_events())
    }

    /// Moves `pkt` one hop from `node`, or hands it to the local endpoint.
    fn forward(&mut self, node: NodeId, pkt: Packet, ctx: &mut Context) -> Result<(), Error> {
        let id = pkt.flow;
        let Some(flow) = self.flows.get(id) else {
            // The flow finished or was abandoned while this packet was in flight
            return Ok(());
        };
        let reverse = pkt.is_reverse();
        if self.routing.needs_path(flow, reverse, &self.topology, &self.failures) {
            match self.routing.assign_path(flow, reverse, &self.topology, &self.failures)? {
                Some(path) => {
                    tracing::debug!(time = %ctx.cur_time, flow = %id, ?path, "flow rerouted");
                    self.set_path(id, path, reverse);
                }
                None => {
                    self.abandon(id, ctx);
                    return Ok(());
                }
            }
        }
        let Some(flow) = self.flows.get_mut(id) else {
            return Ok(());
        };
        let hop = self.routing.resolve(
            node,
            &pkt,
            flow,
            &self.topology,
            &self.failures,
            ctx.cur_time,
            &mut self.rng,
        );
        match hop {
            Ok(Hop::Local) => self.deliver(node, pkt, ctx),
            Ok(Hop::Forward { link, .. }) => {
                let port = self.ports.get_mut(&link).ok_or(Error::UnknownLink(link))?;
                let sub = Context::new(ctx.cur_time);
                ctx.extend(port.receive(pkt, &self.failures, &mut self.rng, sub));
                Ok(())
            }
            Err(Error::RouteUnavailable { .. }) => {
                self.unroutable += 1;
                tracing::trace!(%node, flow = %id, "no route, packet dropped");
                // Endpoints are disconnected in this packet's direction of travel
                if self.topology.shortest_path(pkt.src, pkt.dst, &self.failures).is_none() {
                    self.abandon(id, ctx);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Installs a fresh path already oriented for a packet travelling in direction `reverse`.
    fn set_path(&mut self, id: FlowId, path: Vec<NodeId>, reverse: bool) {
        if let Some(flow) = self.flows.get_mut(id) {
            flow.path = path;
            flow.reverse_path = reverse;
        }
    }

    fn deliver(&mut self, node: NodeId, pkt: Packet, ctx: &mut Context) -> Result<(), Error> {
        let id = pkt.flow;
        match pkt.kind {
            PacketKind::Data { seq, len } => {
                let (Some(flow), Some(receiver)) =
                    (self.flows.get_mut(id), self.receivers.get_mut(&id))
                else {
                    return Ok(());
                };
                let rcv_nxt = receiver.on_data(seq, len);
                flow.delivered = rcv_nxt;
                if flow.is_done() {
                    self.complete(id, ctx);
                    return Ok(());
                }
                let ack = Packet::builder()
                    .flow(id)
                    .src(node)
                    .dst(flow.src)
                    .size(Packet::SZ_HDR)
                    .kind(PacketKind::Ack {
                        ack: rcv_nxt,
                        ecn_echo: pkt.ecn,
                    })
                    .class(flow.class)
                    .build();
                self.forward(node, ack, ctx)
            }
            PacketKind::Ack { ack, ecn_echo } => {
                let Some(socket) = self.sockets.get_mut(&id) else {
                    return Ok(());
                };
                let outcome = socket.on_ack(ack, ecn_echo)?;
                if let AckOutcome::NewData { .. } = outcome {
                    if socket.has_in_flight() {
                        let (v, rto) = socket.arm_timer();
                        ctx.schedule(rto, FlowCmd::new_timeout(id, v));
                    } else {
                        socket.disarm_timer();
                    }
                }
                let resume = match outcome {
                    AckOutcome::NewData { .. } => socket.is_paused(),
                    AckOutcome::FastRetransmit => true,
                    AckOutcome::Duplicate | AckOutcome::Stale => false,
                };
                if resume {
                    let v = socket.next_send_version();
                    ctx.schedule_now(FlowCmd::new_try_send(id, v));
                }
                Ok(())
            }
        }
    }

    fn complete(&mut self, id: FlowId, ctx: &mut Context) {
        if let Some(mut socket) = self.sockets.remove(&id) {
            socket.complete();
        }
        self.receivers.remove(&id);
        self.routing.forget(id);
        if let Some(mut flow) = self.flows.remove(id) {
            flow.status = FlowStatus::Completed;
            let record = self.record(&flow);
            tracing::debug!(time = %ctx.cur_time, flow = %id, fct = %record.fct, "flow completed");
            self.records.push(record);
        }
    }

    fn abandon(&mut self, id: FlowId, ctx: &mut Context) {
        if let Some(mut socket) = self.sockets.remove(&id) {
            socket.abort();
        }
        self.receivers.remove(&id);
        self.routing.forget(id);
        if let Some(mut flow) = self.flows.remove(id) {
            flow.status = FlowStatus::Abandoned;
            let record = self.record(&flow);
            tracing::debug!(
                time = %ctx.cur_time,
                flow = %id,
                delivered = %flow.delivered,
                "flow abandoned"
            );
            self.records.push(record);
        }
    }
}

#[derive(Debug, Clone, derive_more::From)]
pub(crate) enum Command {
    Topology(TopologyCmd),
    Port(PortCmd),
    Node(NodeCmd),
    Flow(FlowCmd),
    Workload(WorkloadCmd),
}

impl Command {
    /// Execution class among events due at the same instant; lower runs first.
    pub(crate) fn priority(&self) -> u8 {
        match self {
            Command::Topology(_) => 0,
            Command::Port(_) | Command::Node(_) => 1,
            Command::Flow(FlowCmd::Arrive(_) | FlowCmd::TrySend { .. }) => 2,
            Command::Flow(FlowCmd::Timeout { .. }) => 3,
            Command::Workload(_) => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, derive_new::new)]
pub(crate) enum NodeCmd {
    Arrive { node: NodeId, pkt: Packet },
}

#[derive(Debug, Clone, Copy, derive_new::new)]
pub(crate) enum FlowCmd {
    Arrive(FlowDesc),
    TrySend { id: FlowId, version: u64 },
    Timeout { id: FlowId, version: u64 },
}

#[derive(Debug)]
pub(crate) struct Context {
    pub(crate) cur_time: Time,
    events: EventList,
}

impl Context {
    pub(crate) fn new(cur_time: Time) -> Self {
        Self {
            cur_time,
            events: EventList::new(),
        }
    }

    pub(crate) fn schedule(&mut self, delta: Delta, cmd: impl Into<Command>) {
        let time = self.cur_time + delta;
        self.events.push(Event::new(time, cmd.into()));
    }

    pub(crate) fn schedule_now(&mut self, cmd: impl Into<Command>) {
        self.schedule(Delta::ZERO, cmd);
    }

    /// Takes over events produced under a child context.
    pub(crate) fn extend(&mut self, events: EventList) {
        self.events.extend(events);
    }

    pub(crate) fn into_events(self) -> EventList {
        self.events
    }
}
