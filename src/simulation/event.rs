#![allow(clippy::non_canonical_partial_ord_impl)]

use std::cmp::Reverse;

use smallvec::SmallVec;

use crate::time::Time;

use super::Command;

// Most handlers will not yield very many events
pub(crate) type EventList = SmallVec<[Event; 4]>;

/// A scheduled command. The heap pops the earliest time first, then the lowest priority class,
/// then the earliest insertion.
#[derive(Debug, derivative::Derivative)]
#[derivative(PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Event {
    time: Reverse<Time>,
    priority: Reverse<u8>,
    // Assigned when the event enters the schedule
    pub(super) seq: Reverse<u64>,
    #[derivative(PartialEq = "ignore", PartialOrd = "ignore", Ord = "ignore")]
    pub(crate) cmd: Command,
}

impl Event {
    pub(crate) fn new(time: Time, cmd: impl Into<Command>) -> Self {
        let cmd = cmd.into();
        Self {
            time: Reverse(time),
            priority: Reverse(cmd.priority()),
            seq: Reverse(0),
            cmd,
        }
    }

    pub(crate) fn time(&self) -> Time {
        self.time.0
    }
}
