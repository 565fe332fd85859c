use typed_builder::TypedBuilder;

use crate::{port::QIndex, units::Bytes, FlowId, NodeId};

/// A packet in flight.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct Packet {
    pub flow: FlowId,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: Bytes,
    pub kind: PacketKind,
    /// Congestion experienced. Set by output ports on admission.
    #[builder(default)]
    pub ecn: bool,
    /// Scheduling rank for priority ports; lower is served first.
    #[builder(default)]
    pub priority: u64,
    /// Sub-queue class for deficit round-robin ports.
    #[builder(default)]
    pub class: QIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `len` payload bytes starting at byte offset `seq`.
    Data { seq: Bytes, len: Bytes },
    /// Cumulative acknowledgment: every byte before `ack` has arrived.
    Ack { ack: Bytes, ecn_echo: bool },
}

impl Packet {
    /// The size of the packet header.
    pub const SZ_HDR: Bytes = Bytes::new(48);

    /// Acknowledgments travel against the flow's forward direction.
    pub fn is_reverse(&self) -> bool {
        matches!(self.kind, PacketKind::Ack { .. })
    }

    /// The number of `mss`-sized segments needed to carry `size` bytes.
    pub(crate) fn count_in(size: Bytes, mss: Bytes) -> usize {
        if size == Bytes::ZERO || mss == Bytes::ZERO {
            0
        } else {
            size.into_usize().div_ceil(mss.into_usize())
        }
    }
}
