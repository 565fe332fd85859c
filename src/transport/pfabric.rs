use std::cmp;

use crate::units::Bytes;

use super::AckSample;

/// pFabric's minimal rate control: line-rate start with a fixed window, priorities carried by
/// packets, and a collapse to one segment on timeout.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct Pfabric {
    #[builder(setter(into))]
    mss: Bytes,
    #[builder(setter(into))]
    init_window: Bytes,
    #[builder(default, setter(skip))]
    cwnd: Option<Bytes>,
}

impl Pfabric {
    /// Marks carry no signal here; the window only regrows after a timeout.
    pub fn on_ack(&mut self, sample: AckSample) {
        if let Some(cwnd) = self.cwnd {
            let grown = cmp::min(cwnd + sample.acked, self.init_window);
            self.cwnd = (grown < self.init_window).then_some(grown);
        }
    }

    pub fn on_timeout(&mut self) {
        self.cwnd = Some(self.mss);
    }

    pub fn window(&self) -> Bytes {
        self.cwnd.unwrap_or(self.init_window)
    }

    /// Shortest remaining transfer first.
    pub fn priority(remaining: Bytes) -> u64 {
        remaining.into_u64()
    }
}
