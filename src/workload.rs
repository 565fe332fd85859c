use std::collections::VecDeque;

use crate::{
    flow::FlowDesc,
    simulation::{event::EventList, Context, FlowCmd},
};

/// Releases flow arrivals in start-time order, one step per distinct release.
#[derive(Debug, Clone, Default)]
pub(crate) struct Workload {
    flows: VecDeque<FlowDesc>,
}

impl Workload {
    /// Sorts by start time. Flows with equal start times keep their input order.
    pub(crate) fn new(mut flows: Vec<FlowDesc>) -> Self {
        flows.sort_by_key(|f| f.start);
        Self {
            flows: flows.into(),
        }
    }

    #[must_use]
    pub(crate) fn step(&mut self, mut ctx: Context) -> EventList {
        if let Some(desc) = self.flows.pop_front() {
            let delta = desc.start.into_time().saturating_sub(ctx.cur_time);
            ctx.schedule(delta, FlowCmd::new_arrive(desc));

            // Reschedule for the next flow arrival
            if let Some(next) = self.flows.front() {
                let delta = next.start.into_time().saturating_sub(ctx.cur_time);
                ctx.schedule(delta, WorkloadCmd::new_step());
            }
        }
        ctx.into_events()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[derive(Debug, Copy, Clone, derive_new::new)]
pub(crate) enum WorkloadCmd {
    Step,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{simulation::Command, time::Time, units::{Bytes, Nanosecs}, NodeId};

    fn desc(start: u64, size: u64) -> FlowDesc {
        FlowDesc::builder()
            .src(NodeId::ZERO)
            .dst(NodeId::ONE)
            .size(Bytes::new(size))
            .start(Nanosecs::new(start))
            .build()
    }

    #[test]
    fn releases_in_start_order() {
        let mut workload = Workload::new(vec![desc(30, 1), desc(10, 2), desc(10, 3)]);
        let events = workload.step(Context::new(Time::ZERO));
        assert_eq!(events.len(), 2);
        match &events[0].cmd {
            Command::Flow(FlowCmd::Arrive(d)) => assert_eq!(d.size, Bytes::new(2)),
            cmd => panic!("unexpected {cmd:?}"),
        }
        assert_eq!(events[0].time(), Time::new(10));
        assert_eq!(events[1].time(), Time::new(10));

        let events = workload.step(Context::new(Time::new(10)));
        match &events[0].cmd {
            Command::Flow(FlowCmd::Arrive(d)) => assert_eq!(d.size, Bytes::new(3)),
            cmd => panic!("unexpected {cmd:?}"),
        }
        assert_eq!(events[1].time(), Time::new(30));

        let events = workload.step(Context::new(Time::new(30)));
        assert_eq!(events.len(), 1);
        assert!(workload.is_empty());
        assert!(workload.step(Context::new(Time::new(30))).is_empty());
    }
}
