use std::collections::BTreeMap;

use crate::units::Bytes;

/// Reassembles data at the destination and produces cumulative acknowledgments.
#[derive(Debug, Default, Clone)]
pub(crate) struct Receiver {
    rcv_nxt: Bytes,
    // Out-of-order segments, start -> end
    ooo: BTreeMap<Bytes, Bytes>,
}

impl Receiver {
    /// Accepts `len` bytes at `seq` and returns the next byte expected.
    pub(crate) fn on_data(&mut self, seq: Bytes, len: Bytes) -> Bytes {
        let end = seq + len;
        if end <= self.rcv_nxt {
            // Duplicate
            return self.rcv_nxt;
        }
        if seq > self.rcv_nxt {
            let slot = self.ooo.entry(seq).or_insert(end);
            if *slot < end {
                *slot = end;
            }
            return self.rcv_nxt;
        }
        self.rcv_nxt = end;
        // Pull in any buffered segments that are now contiguous
        while let Some((&start, &stop)) = self.ooo.first_key_value() {
            if start > self.rcv_nxt {
                break;
            }
            self.ooo.pop_first();
            if stop > self.rcv_nxt {
                self.rcv_nxt = stop;
            }
        }
        self.rcv_nxt
    }

    #[cfg(test)]
    fn rcv_nxt(&self) -> Bytes {
        self.rcv_nxt
    }
}
