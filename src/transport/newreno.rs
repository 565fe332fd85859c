use std::cmp;

use crate::units::Bytes;

use super::AckSample;

/// Loss-based window control with ECN reaction.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct NewReno {
    #[builder(setter(into))]
    mss: Bytes,
    #[builder(setter(into))]
    cwnd: Bytes,
    #[builder(default = Bytes::MAX, setter(into))]
    ssthresh: Bytes,
    #[builder(setter(into))]
    max_window: Bytes,
    // No further reduction until `snd_una` passes this point
    #[builder(default, setter(skip))]
    recover: Bytes,
    #[builder(default, setter(skip))]
    reduced: bool,
    // Acked bytes not yet converted into congestion-avoidance growth
    #[builder(default, setter(skip))]
    ca_acc: Bytes,
}

impl NewReno {
    pub fn on_ack(&mut self, sample: AckSample) {
        if self.reduced && sample.snd_una > self.recover {
            self.reduced = false;
        }
        if sample.marked {
            self.reduce(sample.snd_nxt);
            return;
        }
        if self.cwnd < self.ssthresh {
            // Slow start
            self.cwnd += sample.acked;
        } else {
            // Congestion avoidance: one segment per window of acknowledged bytes
            self.ca_acc += sample.acked;
            while self.ca_acc >= self.cwnd {
                self.ca_acc -= self.cwnd;
                self.cwnd += self.mss;
            }
        }
        self.cwnd = cmp::min(self.cwnd, self.max_window);
    }

    /// Triple duplicate acknowledgment.
    pub fn on_loss(&mut self, snd_nxt: Bytes) {
        self.reduce(snd_nxt);
    }

    pub fn on_timeout(&mut self, snd_nxt: Bytes) {
        self.ssthresh = self.half_window();
        self.cwnd = self.mss;
        self.ca_acc = Bytes::ZERO;
        self.recover = snd_nxt;
        self.reduced = true;
    }

    pub fn window(&self) -> Bytes {
        self.cwnd
    }

    pub fn ssthresh(&self) -> Bytes {
        self.ssthresh
    }

    fn reduce(&mut self, snd_nxt: Bytes) {
        if self.reduced {
            return;
        }
        let half = self.cwnd.checked_div(2).unwrap_or(Bytes::ZERO);
        self.ssthresh = self.half_window();
        self.cwnd = cmp::max(half, self.mss);
        self.ca_acc = Bytes::ZERO;
        self.recover = snd_nxt;
        self.reduced = true;
    }

    fn half_window(&self) -> Bytes {
        let half = self.cwnd.checked_div(2).unwrap_or(Bytes::ZERO);
        cmp::max(half, self.mss + self.mss)
    }
}
