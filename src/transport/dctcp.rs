use std::cmp;

use crate::{
    packet::Packet,
    units::{BitsPerSec, Bytes},
};

use super::AckSample;

/// Rate-based DCTCP.
///
/// The sending rate is cut in proportion to `alpha`, the moving average of the fraction of marked
/// packets per window, and grows additively by `additive_inc` every window without marks. The
/// window scales with the rate.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct Dctcp {
    #[builder(setter(into))]
    mss: Bytes,
    #[builder(setter(into))]
    max_window: Bytes,

    // Rate management
    #[builder(setter(into))]
    rate: BitsPerSec,
    #[builder(setter(into))]
    min_rate: BitsPerSec,
    #[builder(setter(into))]
    max_rate: BitsPerSec,

    // DCTCP
    #[builder(default = 1.0, setter(skip))]
    alpha: f64,
    gain: f64,
    #[builder(setter(into))]
    additive_inc: BitsPerSec,
    #[builder(default, setter(skip))]
    last_update_seq: Bytes,
    #[builder(default, setter(skip))]
    batch_size: usize,
    #[builder(default, setter(skip))]
    marked_count: usize,
    #[builder(default, setter(skip))]
    ca_state: CaState,
    #[builder(default, setter(skip))]
    high_seq: Bytes,

    // Ramp-up after a timeout, until the rate reaches this target
    #[builder(default, setter(skip))]
    ramp_target: Option<BitsPerSec>,
}

impl Dctcp {
    pub fn on_ack(&mut self, sample: AckSample) {
        let mut new_batch = false;
        if sample.marked {
            self.marked_count += 1;
        }
        // Update alpha
        if sample.snd_una > self.last_update_seq {
            new_batch = true;
            if self.last_update_seq == Bytes::ZERO {
                // First RTT
                self.batch_size = Packet::count_in(sample.snd_nxt, self.mss);
            } else {
                let frac = if self.batch_size == 0 {
                    0.0
                } else {
                    (self.marked_count as f64 / self.batch_size as f64).clamp(0.0, 1.0)
                };
                self.alpha = (1.0 - self.gain) * self.alpha + self.gain * frac;
                self.marked_count = 0;
                self.batch_size = Packet::count_in(sample.snd_nxt - sample.snd_una, self.mss);
            }
            self.last_update_seq = sample.snd_nxt;
        }

        if self.ca_state == CaState::One && sample.snd_una > self.high_seq {
            self.ca_state = CaState::Zero;
        }
        if self.ca_state == CaState::Zero {
            if sample.marked {
                // Reduce rate
                let new_rate = self.rate.scale_by(1.0 - self.alpha / 2.0);
                self.rate = cmp::max(self.min_rate, new_rate);
                self.ca_state = CaState::One;
                self.high_seq = sample.snd_nxt;
                self.ramp_target = None;
            }
            if new_batch {
                match self.ramp_target {
                    Some(target) => {
                        let new_rate = self.rate.scale_by(2.0);
                        self.rate = cmp::min(self.max_rate, new_rate);
                        if self.rate >= target {
                            self.ramp_target = None;
                        }
                    }
                    None => {
                        let new_rate = self.rate + self.additive_inc;
                        self.rate = cmp::min(self.max_rate, new_rate);
                    }
                }
            }
        }
    }

    /// Collapses to the minimum rate and ramps back up to half the pre-timeout rate.
    pub fn on_timeout(&mut self, snd_nxt: Bytes) {
        let target = cmp::max(self.min_rate, self.rate.scale_by(0.5));
        self.ramp_target = Some(target);
        self.rate = self.min_rate;
        self.ca_state = CaState::One;
        self.high_seq = snd_nxt;
        self.marked_count = 0;
    }

    /// Halves the rate at most once per window.
    pub fn on_loss(&mut self, snd_nxt: Bytes) {
        if self.ca_state == CaState::Zero {
            let new_rate = self.rate.scale_by(0.5);
            self.rate = cmp::max(self.min_rate, new_rate);
            self.ca_state = CaState::One;
            self.high_seq = snd_nxt;
            self.ramp_target = None;
        }
    }

    pub fn window(&self) -> Bytes {
        let window = self
            .max_window
            .scale_by(BitsPerSec::frac(self.rate, self.max_rate));
        cmp::max(window, self.mss)
    }

    pub fn rate(&self) -> BitsPerSec {
        self.rate
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derivative::Derivative)]
#[derivative(Default)]
enum CaState {
    #[derivative(Default)]
    Zero,
    One,
}
