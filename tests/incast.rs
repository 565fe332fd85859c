use dcsim::{
    port::Discipline,
    units::{Bytes, Gbps, Nanosecs},
    Config, CongestionAlgorithm, FlowDesc, NodeId, PortConfig, Topology, TransportConfig,
};

// Senders 0..4 behind switch 4, receiver 5. The switch's port towards 5 is link 8.
const BOTTLENECK: usize = 8;

fn star() -> Topology {
    let mut topo = Topology::new(6);
    for a in 0..5 {
        let b = if a == 4 { 5 } else { 4 };
        topo.add_duplex_link(NodeId::new(a), NodeId::new(b), Nanosecs::new(1_000), Gbps::new(10))
            .unwrap();
    }
    topo
}

fn incast(size: u64) -> Vec<FlowDesc> {
    (0..4)
        .map(|src| {
            FlowDesc::builder()
                .src(NodeId::new(src))
                .dst(NodeId::new(5))
                .size(Bytes::new(size))
                .start(Nanosecs::ZERO)
                .build()
        })
        .collect()
}

fn config(algorithm: CongestionAlgorithm, discipline: Discipline) -> Config {
    let port = PortConfig::builder()
        .max_queue(Bytes::new(1_000_000))
        .ecn_threshold(Bytes::new(5_000))
        .discipline(discipline)
        .build();
    Config::builder()
        .topology(star())
        .port(port)
        .transport(TransportConfig::builder().algorithm(algorithm).build())
        .flows(incast(100_000))
        .build()
}

#[test]
fn every_algorithm_finishes_an_incast() -> anyhow::Result<()> {
    for (algorithm, discipline) in [
        (CongestionAlgorithm::NewReno, Discipline::Fifo),
        (CongestionAlgorithm::Dctcp, Discipline::Fifo),
        (CongestionAlgorithm::Pfabric, Discipline::Priority),
    ] {
        let report = dcsim::run(config(algorithm, discipline))?;
        assert_eq!(report.completed().count(), 4, "{algorithm:?}");
        let btl = &report.ports[BOTTLENECK];
        assert_eq!(btl.stats.dropped, 0, "{algorithm:?}");
        // Every payload byte crosses the bottleneck at least once
        assert!(btl.stats.bytes_sent >= Bytes::new(400_000), "{algorithm:?}");
    }
    Ok(())
}

#[test]
fn dctcp_sees_marks() -> anyhow::Result<()> {
    let report = dcsim::run(config(CongestionAlgorithm::Dctcp, Discipline::Fifo))?;
    assert!(report.ports[BOTTLENECK].stats.marked > 0);
    Ok(())
}

#[test]
fn fct_is_bounded_by_the_bottleneck() -> anyhow::Result<()> {
    let report = dcsim::run(config(CongestionAlgorithm::NewReno, Discipline::Fifo))?;
    // 400 KB through one 10 Gbps port cannot finish faster than 320 us
    let last = report.records.iter().map(|r| r.fct).max().unwrap_or_default();
    assert!(last >= Nanosecs::new(320_000));
    Ok(())
}
