use std::{
    fs,
    path::PathBuf,
    process::Command,
    thread,
    time::{Duration, Instant},
};

use rustc_hash::FxHashMap;

use crate::{
    topology::{failures::FailureState, LinkId, NodeId, Topology},
    units::{BitsPerSec, Bytes, Nanosecs},
    Error, FlowId,
};

use super::path;

/// A centralized path-assignment service, called synchronously once per assignment round.
pub trait PathSolver: std::fmt::Debug {
    fn solve(&mut self, req: &SolverRequest) -> Result<SolverResponse, Error>;
}

/// Everything the solver sees about the network for one round.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SolverRequest {
    pub round: u64,
    pub nr_nodes: usize,
    pub links: Vec<LinkState>,
    pub commodities: Vec<Commodity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LinkState {
    pub id: LinkId,
    pub src: NodeId,
    pub dst: NodeId,
    pub delay: Nanosecs,
    pub bandwidth: BitsPerSec,
    pub up: bool,
}

/// A flow that needs a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Commodity {
    pub flow: FlowId,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SolverResponse {
    pub round: u64,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Assignment {
    pub flow: FlowId,
    pub path: Vec<NodeId>,
}

impl SolverRequest {
    pub(crate) fn new(
        round: u64,
        topo: &Topology,
        failures: &FailureState,
        commodities: Vec<Commodity>,
    ) -> Self {
        let links = topo
            .links()
            .iter()
            .map(|l| LinkState {
                id: l.id,
                src: l.src,
                dst: l.dst,
                delay: l.delay,
                bandwidth: l.bandwidth,
                up: !failures.is_link_failed(l.id),
            })
            .collect();
        Self {
            round,
            nr_nodes: topo.nr_nodes(),
            links,
            commodities,
        }
    }
}

impl SolverResponse {
    /// Checks the response against its request. Either every commodity gets a live path between
    /// its endpoints or the whole round fails.
    pub(crate) fn validate(
        self,
        req: &SolverRequest,
        topo: &Topology,
        failures: &FailureState,
    ) -> Result<FxHashMap<FlowId, Vec<NodeId>>, Error> {
        if self.round != req.round {
            return Err(Error::solver(format!(
                "response for round {} to request for round {}",
                self.round, req.round
            )));
        }
        let wanted: FxHashMap<_, _> = req.commodities.iter().map(|c| (c.flow, c)).collect();
        let mut out = FxHashMap::default();
        for a in self.assignments {
            let c = wanted
                .get(&a.flow)
                .ok_or_else(|| Error::solver(format!("unrequested flow {}", a.flow)))?;
            let p = path::dedup_cycles(&a.path);
            if p.first() != Some(&c.src) || p.last() != Some(&c.dst) {
                return Err(Error::solver(format!(
                    "path {:?} for flow {} does not join {} and {}",
                    a.path, a.flow, c.src, c.dst
                )));
            }
            if !failures.path_is_live(topo, &p) {
                return Err(Error::solver(format!(
                    "path {:?} for flow {} is not live",
                    a.path, a.flow
                )));
            }
            if out.insert(a.flow, p).is_some() {
                return Err(Error::solver(format!("flow {} assigned twice", a.flow)));
            }
        }
        if out.len() != wanted.len() {
            return Err(Error::solver(format!(
                "{} of {} commodities assigned",
                out.len(),
                wanted.len()
            )));
        }
        Ok(out)
    }
}

/// Exchanges JSON files with an external program through a hand-off directory.
///
/// Each round writes `request.json`, runs the program with the directory as its last argument
/// and reads `response.json` once the program exits.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct FileSolver {
    #[builder(setter(into))]
    dir: PathBuf,
    #[builder(setter(into))]
    program: PathBuf,
    #[builder(default)]
    args: Vec<String>,
    #[builder(default = Duration::from_millis(10))]
    poll_interval: Duration,
    #[builder(default = Duration::from_secs(60))]
    timeout: Duration,
}

impl FileSolver {
    const REQUEST: &'static str = "request.json";
    const RESPONSE: &'static str = "response.json";

    fn write_request(&self, req: &SolverRequest) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)?;
        // Stale answers from an earlier round must not be picked up
        let response = self.dir.join(Self::RESPONSE);
        if response.exists() {
            fs::remove_file(&response)?;
        }
        let tmp = self.dir.join("request.json.tmp");
        fs::write(&tmp, serde_json::to_vec(req)?)?;
        fs::rename(&tmp, self.dir.join(Self::REQUEST))?;
        Ok(())
    }

    fn run_program(&self) -> Result<(), Error> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.dir)
            .spawn()
            .map_err(|e| Error::solver(format!("cannot start {}: {e}", self.program.display())))?;
        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                // Best effort; the round has failed either way
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::solver(format!(
                    "no answer within {:?}",
                    self.timeout
                )));
            }
            thread::sleep(self.poll_interval);
        };
        if !status.success() {
            return Err(Error::solver(format!("solver exited with {status}")));
        }
        Ok(())
    }

    fn take_response(&self) -> Result<SolverResponse, Error> {
        let response = self.dir.join(Self::RESPONSE);
        let s = fs::read_to_string(&response)
            .map_err(|e| Error::solver(format!("cannot read {}: {e}", response.display())))?;
        fs::remove_file(&response)?;
        serde_json::from_str(&s).map_err(|e| Error::solver(format!("malformed response: {e}")))
    }
}

impl PathSolver for FileSolver {
    fn solve(&mut self, req: &SolverRequest) -> Result<SolverResponse, Error> {
        self.write_request(req)?;
        self.run_program()?;
        let resp = self.take_response()?;
        tracing::debug!(
            round = req.round,
            commodities = req.commodities.len(),
            assignments = resp.assignments.len(),
            "solver round complete"
        );
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Gbps;

    fn diamond() -> Topology {
        let mut topo = Topology::new(4);
        for (a, b) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
            topo.add_duplex_link(NodeId::new(a), NodeId::new(b), Nanosecs::new(1), Gbps::new(10))
                .unwrap();
        }
        topo
    }

    fn ids(v: &[usize]) -> Vec<NodeId> {
        v.iter().copied().map(NodeId::new).collect()
    }

    fn request(topo: &Topology) -> SolverRequest {
        let commodities = vec![
            Commodity {
                flow: FlowId::new(0),
                src: NodeId::new(0),
                dst: NodeId::new(3),
                size: Bytes::new(1_000),
            },
            Commodity {
                flow: FlowId::new(1),
                src: NodeId::new(3),
                dst: NodeId::new(0),
                size: Bytes::new(1_000),
            },
        ];
        SolverRequest::new(7, topo, &FailureState::default(), commodities)
    }

    fn response(round: u64, assignments: Vec<(usize, Vec<usize>)>) -> SolverResponse {
        SolverResponse {
            round,
            assignments: assignments
                .into_iter()
                .map(|(flow, p)| Assignment {
                    flow: FlowId::new(flow),
                    path: ids(&p),
                })
                .collect(),
        }
    }

    #[test]
    fn complete_response_validates() -> anyhow::Result<()> {
        let topo = diamond();
        let req = request(&topo);
        let resp = response(7, vec![(0, vec![0, 2, 3]), (1, vec![3, 1, 2, 1, 0])]);
        let paths = resp.validate(&req, &topo, &FailureState::default())?;
        assert_eq!(paths[&FlowId::new(0)], ids(&[0, 2, 3]));
        assert_eq!(paths[&FlowId::new(1)], ids(&[3, 1, 0]));
        Ok(())
    }

    #[test]
    fn partial_or_mismatched_responses_fail() {
        let topo = diamond();
        let req = request(&topo);
        let failures = FailureState::default();
        let partial = response(7, vec![(0, vec![0, 2, 3])]);
        assert!(matches!(
            partial.validate(&req, &topo, &failures),
            Err(Error::ExternalSolverFailure(_))
        ));
        let stale = response(6, vec![(0, vec![0, 2, 3]), (1, vec![3, 1, 0])]);
        assert!(stale.validate(&req, &topo, &failures).is_err());
        let wrong_ends = response(7, vec![(0, vec![0, 2]), (1, vec![3, 1, 0])]);
        assert!(wrong_ends.validate(&req, &topo, &failures).is_err());
        let no_link = response(7, vec![(0, vec![0, 3]), (1, vec![3, 1, 0])]);
        assert!(no_link.validate(&req, &topo, &failures).is_err());
        let extra = response(7, vec![(0, vec![0, 2, 3]), (1, vec![3, 1, 0]), (9, vec![0, 1])]);
        assert!(extra.validate(&req, &topo, &failures).is_err());
    }

    #[test]
    fn request_reports_link_liveness() {
        let topo = diamond();
        let mut failures = FailureState::default();
        failures.fail_link(LinkId::new(2));
        let req = SolverRequest::new(1, &topo, &failures, Vec::new());
        assert_eq!(req.links.len(), 8);
        assert!(!req.links[2].up);
        assert!(req.links[0].up);
    }

    #[cfg(unix)]
    fn solver(dir: &std::path::Path, script: &str) -> FileSolver {
        FileSolver::builder()
            .dir(dir)
            .program("/bin/sh")
            .args(vec!["-c".to_owned(), script.to_owned(), "solver".to_owned()])
            .poll_interval(Duration::from_millis(1))
            .timeout(Duration::from_secs(5))
            .build()
    }

    #[cfg(unix)]
    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dcsim-solver-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[cfg(unix)]
    #[test]
    fn file_solver_round_trip() -> anyhow::Result<()> {
        let dir = scratch("ok");
        // `$1` is the hand-off directory
        let script = r#"test -f "$1/request.json" && printf '%s' '{"round": 7, "assignments": [{"flow": 0, "path": [0, 1, 3]}, {"flow": 1, "path": [3, 2, 0]}]}' > "$1/response.json""#;
        let mut s = solver(&dir, script);
        let topo = diamond();
        let req = request(&topo);
        let resp = s.solve(&req)?;
        assert_eq!(resp.round, 7);
        assert!(!dir.join("response.json").exists());
        let written: SolverRequest = serde_json::from_str(&fs::read_to_string(dir.join("request.json"))?)?;
        assert_eq!(written, req);
        resp.validate(&req, &topo, &FailureState::default())?;
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn file_solver_failures() -> anyhow::Result<()> {
        let topo = diamond();
        let req = request(&topo);

        let dir = scratch("missing");
        let err = solver(&dir, "true").solve(&req).unwrap_err();
        assert!(matches!(err, Error::ExternalSolverFailure(_)));
        fs::remove_dir_all(&dir)?;

        let dir = scratch("malformed");
        let err = solver(&dir, r#"echo '{"round":' > "$1/response.json""#)
            .solve(&req)
            .unwrap_err();
        assert!(matches!(err, Error::ExternalSolverFailure(_)));
        fs::remove_dir_all(&dir)?;

        let dir = scratch("exit");
        let err = solver(&dir, "exit 3").solve(&req).unwrap_err();
        assert!(matches!(err, Error::ExternalSolverFailure(_)));
        fs::remove_dir_all(&dir)?;

        let dir = scratch("slow");
        let mut slow = solver(&dir, "sleep 5");
        slow.timeout = Duration::from_millis(50);
        let err = slow.solve(&req).unwrap_err();
        assert!(matches!(err, Error::ExternalSolverFailure(_)));
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
