pub mod dctcp;
pub mod newreno;
pub mod pfabric;
pub(crate) mod receiver;

use std::cmp;

use crate::{
    time::Delta,
    units::{BitsPerSec, Bytes, Mbps, Nanosecs},
    Error, FlowId,
};

use self::{dctcp::Dctcp, newreno::NewReno, pfabric::Pfabric};

/// What a congestion controller learns from one acknowledgment.
#[derive(Debug, Clone, Copy)]
pub struct AckSample {
    /// Bytes newly acknowledged.
    pub acked: Bytes,
    /// The acknowledged data carried a congestion mark.
    pub marked: bool,
    pub snd_una: Bytes,
    pub snd_nxt: Bytes,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, derivative::Derivative,
)]
#[derivative(Default)]
#[serde(rename_all = "snake_case")]
pub enum CongestionAlgorithm {
    #[derivative(Default)]
    NewReno,
    Dctcp,
    Pfabric,
}

/// Transport settings shared by every flow of a run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, typed_builder::TypedBuilder)]
#[serde(default)]
pub struct TransportConfig {
    #[builder(default)]
    pub algorithm: CongestionAlgorithm,
    /// Maximum payload per data packet.
    #[builder(default = Bytes::new(1_000), setter(into))]
    pub mss: Bytes,
    #[builder(default = Bytes::new(10_000), setter(into))]
    pub init_window: Bytes,
    #[builder(default = Bytes::new(100_000), setter(into))]
    pub max_window: Bytes,
    /// Initial retransmission timeout.
    #[builder(default = Nanosecs::new(1_000_000), setter(into))]
    pub rto: Nanosecs,
    #[builder(default = Nanosecs::new(1_000_000_000), setter(into))]
    pub max_rto: Nanosecs,
    /// Consecutive timeouts tolerated before a flow is abandoned.
    #[builder(default = 8)]
    pub max_retries: usize,
    #[builder(default = 0.0625)]
    pub dctcp_gain: f64,
    #[builder(default = Mbps::new(615).into_bps(), setter(into))]
    pub dctcp_ai: BitsPerSec,
    #[builder(default = Mbps::new(100).into_bps(), setter(into))]
    pub min_rate: BitsPerSec,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransportConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.mss == Bytes::ZERO {
            return Err(Error::invalid("MSS must be nonzero"));
        }
        if self.init_window < self.mss || self.max_window < self.init_window {
            return Err(Error::invalid(
                "windows must satisfy mss <= init_window <= max_window",
            ));
        }
        if self.rto == Nanosecs::ZERO || self.max_rto < self.rto {
            return Err(Error::invalid("RTO must be nonzero and at most max_rto"));
        }
        if !(self.dctcp_gain > 0.0 && self.dctcp_gain <= 1.0) {
            return Err(Error::invalid("DCTCP gain must lie in (0, 1]"));
        }
        if self.min_rate == BitsPerSec::ZERO {
            return Err(Error::invalid("minimum rate must be nonzero"));
        }
        Ok(())
    }
}

/// One congestion controller per flow, chosen by [`CongestionAlgorithm`].
#[derive(Debug, Clone, derive_more::From)]
pub enum CongestionControl {
    NewReno(NewReno),
    Dctcp(Dctcp),
    Pfabric(Pfabric),
}

impl CongestionControl {
    pub fn new(cfg: &TransportConfig, line_rate: BitsPerSec) -> Self {
        match cfg.algorithm {
            CongestionAlgorithm::NewReno => NewReno::builder()
                .mss(cfg.mss)
                .cwnd(cfg.init_window)
                .max_window(cfg.max_window)
                .build()
                .into(),
            CongestionAlgorithm::Dctcp => Dctcp::builder()
                .mss(cfg.mss)
                .max_window(cfg.max_window)
                .rate(line_rate)
                .min_rate(cmp::min(cfg.min_rate, line_rate))
                .max_rate(line_rate)
                .gain(cfg.dctcp_gain)
                .additive_inc(cfg.dctcp_ai)
                .build()
                .into(),
            CongestionAlgorithm::Pfabric => Pfabric::builder()
                .mss(cfg.mss)
                .init_window(cfg.init_window)
                .build()
                .into(),
        }
    }

    pub fn on_ack(&mut self, sample: AckSample) {
        match self {
            CongestionControl::NewReno(cc) => cc.on_ack(sample),
            CongestionControl::Dctcp(cc) => cc.on_ack(sample),
            CongestionControl::Pfabric(cc) => cc.on_ack(sample),
        }
    }

    pub fn on_timeout(&mut self, snd_nxt: Bytes) {
        match self {
            CongestionControl::NewReno(cc) => cc.on_timeout(snd_nxt),
            CongestionControl::Dctcp(cc) => cc.on_timeout(snd_nxt),
            CongestionControl::Pfabric(cc) => cc.on_timeout(),
        }
    }

    /// Loss inferred from duplicate acknowledgments. pFabric only retransmits.
    pub fn on_loss(&mut self, snd_nxt: Bytes) {
        match self {
            CongestionControl::NewReno(cc) => cc.on_loss(snd_nxt),
            CongestionControl::Dctcp(cc) => cc.on_loss(snd_nxt),
            CongestionControl::Pfabric(_) => {}
        }
    }

    pub fn window(&self) -> Bytes {
        match self {
            CongestionControl::NewReno(cc) => cc.window(),
            CongestionControl::Dctcp(cc) => cc.window(),
            CongestionControl::Pfabric(cc) => cc.window(),
        }
    }

    /// The pacing rate, if the controller paces below line rate.
    pub fn pacing_rate(&self) -> Option<BitsPerSec> {
        match self {
            CongestionControl::Dctcp(cc) => Some(cc.rate()),
            _ => None,
        }
    }

    /// The rank stamped on outgoing packets.
    pub fn priority(&self, remaining: Bytes) -> u64 {
        match self {
            CongestionControl::Pfabric(_) => Pfabric::priority(remaining),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derivative::Derivative)]
#[derivative(Default)]
pub enum SocketState {
    #[derivative(Default)]
    Open,
    Complete,
    Aborted,
}

/// A segment the socket wants on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub seq: Bytes,
    pub len: Bytes,
    pub retransmit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    NewData { acked: Bytes },
    Duplicate,
    /// Third duplicate: the head segment is queued for retransmission.
    FastRetransmit,
    /// Old, or the socket is no longer open.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Rewound to `snd_una`; send again.
    Retransmit,
    /// Too many consecutive timeouts.
    Abandon,
    Stale,
}

/// Sender-side state of one flow.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct Socket {
    flow: FlowId,
    #[builder(setter(into))]
    size: Bytes,
    #[builder(setter(into))]
    mss: Bytes,
    #[builder(setter(into))]
    line_rate: BitsPerSec,
    cc: CongestionControl,

    #[builder(default, setter(skip))]
    snd_una: Bytes,
    #[builder(default, setter(skip))]
    snd_nxt: Bytes,
    // Highest byte ever sent, so go-back-N can tell retransmissions apart
    #[builder(default, setter(skip))]
    snd_max: Bytes,
    #[builder(default, setter(skip))]
    state: SocketState,
    #[builder(default, setter(skip))]
    dupacks: usize,
    #[builder(default, setter(skip))]
    retx_pending: bool,

    // Retransmission timer
    rto_base: Delta,
    rto_max: Delta,
    #[builder(default = rto_base, setter(skip))]
    rto: Delta,
    #[builder(default, setter(skip))]
    timeouts: usize,
    max_retries: usize,
    #[builder(default, setter(skip))]
    timer_version: u64,
    #[builder(default, setter(skip))]
    timer_armed: bool,

    // Send pacing
    #[builder(default, setter(skip))]
    send_version: u64,
    #[builder(default, setter(skip))]
    paused: bool,
}

impl Socket {
    pub fn new(flow: FlowId, size: Bytes, cfg: &TransportConfig, line_rate: BitsPerSec) -> Self {
        Self::builder()
            .flow(flow)
            .size(size)
            .mss(cfg.mss)
            .line_rate(line_rate)
            .cc(CongestionControl::new(cfg, line_rate))
            .rto_base(cfg.rto.into_delta())
            .rto_max(cfg.max_rto.into_delta())
            .max_retries(cfg.max_retries)
            .build()
    }

    /// Bytes the window still permits in flight, bounded by what is left to send.
    pub fn next_sendable(&self) -> Bytes {
        if self.state != SocketState::Open {
            return Bytes::ZERO;
        }
        let in_flight = self.snd_nxt - self.snd_una;
        let room = self.cc.window().saturating_sub(in_flight);
        cmp::min(room, self.size - self.snd_nxt)
    }

    /// Takes the next segment to transmit, if any. A pending fast retransmission goes first and
    /// ignores the window.
    pub fn next_segment(&mut self) -> Option<Segment> {
        if self.state != SocketState::Open {
            return None;
        }
        if self.retx_pending {
            self.retx_pending = false;
            if self.snd_una < self.size {
                return Some(Segment {
                    seq: self.snd_una,
                    len: cmp::min(self.mss, self.size - self.snd_una),
                    retransmit: true,
                });
            }
        }
        if self.next_sendable() == Bytes::ZERO {
            return None;
        }
        let seq = self.snd_nxt;
        let len = cmp::min(self.mss, self.size - seq);
        self.snd_nxt += len;
        let retransmit = seq < self.snd_max;
        self.snd_max = cmp::max(self.snd_max, self.snd_nxt);
        Some(Segment {
            seq,
            len,
            retransmit,
        })
    }

    /// Processes a cumulative acknowledgment for every byte before `ack`.
    pub fn on_ack(&mut self, ack: Bytes, marked: bool) -> Result<AckOutcome, Error> {
        if self.state != SocketState::Open {
            return Ok(AckOutcome::Stale);
        }
        if ack > self.snd_max {
            return Err(Error::Inconsistent(format!(
                "flow {} acknowledged {ack} beyond highest sent byte {}",
                self.flow, self.snd_max
            )));
        }
        if ack > self.snd_una {
            let acked = ack - self.snd_una;
            self.snd_una = ack;
            // After a go-back-N rewind, acknowledgments for earlier transmissions can overtake
            self.snd_nxt = cmp::max(self.snd_nxt, ack);
            self.dupacks = 0;
            self.timeouts = 0;
            self.rto = self.rto_base;
            self.cc.on_ack(AckSample {
                acked,
                marked,
                snd_una: self.snd_una,
                snd_nxt: self.snd_nxt,
            });
            if self.snd_una == self.size {
                self.complete();
            }
            return Ok(AckOutcome::NewData { acked });
        }
        if ack == self.snd_una && self.snd_una < self.snd_max {
            if marked {
                self.cc.on_ack(AckSample {
                    acked: Bytes::ZERO,
                    marked,
                    snd_una: self.snd_una,
                    snd_nxt: self.snd_nxt,
                });
            }
            self.dupacks += 1;
            if self.dupacks == 3 {
                self.cc.on_loss(self.snd_nxt);
                self.retx_pending = true;
                return Ok(AckOutcome::FastRetransmit);
            }
            return Ok(AckOutcome::Duplicate);
        }
        Ok(AckOutcome::Stale)
    }

    /// Go-back-N with exponential backoff.
    pub fn on_timeout(&mut self) -> TimeoutOutcome {
        if self.state != SocketState::Open {
            return TimeoutOutcome::Stale;
        }
        self.timeouts += 1;
        if self.timeouts > self.max_retries {
            self.abort();
            return TimeoutOutcome::Abandon;
        }
        self.cc.on_timeout(self.snd_nxt);
        self.snd_nxt = self.snd_una;
        self.dupacks = 0;
        self.retx_pending = false;
        let doubled = Delta::new(self.rto.into_u128().saturating_mul(2));
        self.rto = cmp::min(doubled, self.rto_max);
        TimeoutOutcome::Retransmit
    }

    /// Enters the terminal state and invalidates outstanding timer and send events.
    pub fn complete(&mut self) {
        self.state = SocketState::Complete;
        self.cancel_all();
    }

    pub fn abort(&mut self) {
        self.state = SocketState::Aborted;
        self.cancel_all();
    }

    fn cancel_all(&mut self) {
        self.disarm_timer();
        self.send_version += 1;
        self.paused = false;
    }

    /// Starts (or restarts) the retransmission timer. Returns the version and delay to schedule.
    pub(crate) fn arm_timer(&mut self) -> (u64, Delta) {
        self.timer_version += 1;
        self.timer_armed = true;
        (self.timer_version, self.rto)
    }

    pub(crate) fn disarm_timer(&mut self) {
        self.timer_version += 1;
        self.timer_armed = false;
    }

    pub(crate) fn timer_is_current(&self, version: u64) -> bool {
        self.timer_armed && self.timer_version == version
    }

    pub(crate) fn is_timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Invalidates any pending send event and returns the version for a new one.
    pub(crate) fn next_send_version(&mut self) -> u64 {
        self.send_version += 1;
        self.paused = false;
        self.send_version
    }

    pub(crate) fn send_is_current(&self, version: u64) -> bool {
        self.send_version == version
    }

    /// The sender stopped because the window was full and waits for an acknowledgment.
    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    /// Outstanding data exists.
    pub fn has_in_flight(&self) -> bool {
        self.snd_una < self.snd_nxt
    }

    pub fn pacing_rate(&self) -> BitsPerSec {
        self.cc.pacing_rate().unwrap_or(self.line_rate)
    }

    pub fn priority(&self) -> u64 {
        self.cc.priority(self.size - self.snd_una)
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn snd_una(&self) -> Bytes {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> Bytes {
        self.snd_nxt
    }

    pub fn window(&self) -> Bytes {
        self.cc.window()
    }

    pub fn rto(&self) -> Delta {
        self.rto
    }

    pub fn cc(&self) -> &CongestionControl {
        &self.cc
    }
}
