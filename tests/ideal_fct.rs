use dcsim::{
    units::{Bytes, Gbps, Nanosecs},
    Config, FlowDesc, NodeId, PortConfig, Topology,
};

// A -> S -> B, 10 Gbps, 1 us per hop
fn line() -> Topology {
    let mut topo = Topology::new(3);
    topo.add_duplex_link(NodeId::new(0), NodeId::new(1), Nanosecs::new(1_000), Gbps::new(10))
        .unwrap();
    topo.add_duplex_link(NodeId::new(1), NodeId::new(2), Nanosecs::new(1_000), Gbps::new(10))
        .unwrap();
    topo
}

fn port() -> PortConfig {
    PortConfig::builder()
        .max_queue(Bytes::new(1_000_000))
        .ecn_threshold(Bytes::new(300_000))
        .build()
}

fn flow(size: u64, start: u64) -> FlowDesc {
    FlowDesc::builder()
        .src(NodeId::new(0))
        .dst(NodeId::new(2))
        .size(Bytes::new(size))
        .start(Nanosecs::new(start))
        .build()
}

// On an idle path the FCT is pure serialization plus propagation.
#[test]
fn ideal_fct() -> anyhow::Result<()> {
    let cfg = Config::builder()
        .topology(line())
        .port(port())
        .flows(vec![flow(100, 0), flow(10_000, 5_000_000)])
        .build();
    let report = dcsim::run(cfg)?;
    assert_eq!(report.records.len(), 2);
    assert!(report.records.iter().all(|r| r.completed));

    // One 148-byte packet: 118 ns per hop on the wire
    let short = &report.records[0];
    assert_eq!(short.fct, Nanosecs::new(2 * (118 + 1_000)));
    assert_eq!(short.delivered, Bytes::new(100));

    // Ten 1048-byte packets paced at line rate, pipelined through the switch
    let long = &report.records[1];
    assert_eq!(long.start, Nanosecs::new(5_000_000));
    assert_eq!(long.fct, Nanosecs::new(10 * 838 + 1_000 + 838 + 1_000));
    Ok(())
}

#[test]
fn idle_port_counters() -> anyhow::Result<()> {
    let cfg = Config::builder()
        .topology(line())
        .port(port())
        .flows(vec![flow(100, 0)])
        .build();
    let report = dcsim::run(cfg)?;
    let sent: Vec<_> = report.ports.iter().map(|p| p.stats.sent).collect();
    // One data packet each way out; the final packet completes the flow without an ack
    assert_eq!(sent, vec![1, 0, 1, 0]);
    assert!(report.ports.iter().all(|p| p.stats.dropped == 0 && p.stats.marked == 0));
    assert_eq!(report.unroutable, 0);
    Ok(())
}
