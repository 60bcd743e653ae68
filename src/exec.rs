// SPDX-License-Identifier: Apache-2.0

//! Execution collaborator boundary.
//!
//! The core never invokes a specific simulator; it consumes traces through
//! [`Executor`]. [`run_batch`] fans the golden run and every candidate run
//! out as independent workers, bounds each with the configured timeout,
//! and joins everything before the batch is considered complete.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::process::Command;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::oracle::ArchState;
use crate::testcase::Testcase;

/// Per-cycle architectural trace plus the coverage points observed during
/// the run.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ExecTrace {
    pub states: Vec<ArchState>,
    #[serde(default)]
    pub coverage: std::collections::BTreeSet<String>,
}

/// The execution collaborator failed for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecFailure(pub String);

impl fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution failure: {}", self.0)
    }
}

impl std::error::Error for ExecFailure {}

/// Outcome of one bounded execution. Timeouts and failures are recorded,
/// excluded from scoring, and never abort the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Completed(ExecTrace),
    TimedOut,
    Failed(ExecFailure),
}

impl ExecOutcome {
    pub fn trace(&self) -> Option<&ExecTrace> {
        match self {
            ExecOutcome::Completed(trace) => Some(trace),
            ExecOutcome::TimedOut | ExecOutcome::Failed(_) => None,
        }
    }
}

/// Opaque service producing golden and candidate traces for a testcase.
pub trait Executor: Send + Sync {
    /// Candidate implementation identifiers, in a stable order.
    fn candidate_ids(&self) -> Vec<String>;

    fn run_golden(&self, tc: &Testcase) -> Result<ExecTrace, ExecFailure>;

    fn run_candidate(&self, id: &str, tc: &Testcase) -> Result<ExecTrace, ExecFailure>;
}

/// All outcomes for one testcase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestcaseRun {
    pub golden: ExecOutcome,
    pub candidates: BTreeMap<String, ExecOutcome>,
}

#[derive(Clone)]
enum Lane {
    Golden,
    Candidate(String),
}

struct Unit {
    tc_id: String,
    lane: Lane,
    started: Instant,
    rx: mpsc::Receiver<Result<ExecTrace, ExecFailure>>,
}

/// Runs golden + candidate executions for every testcase in `batch`,
/// keyed by testcase id in the result. Each execution gets its own worker
/// and its own `timeout`; a timed-out or failed run yields its dedicated
/// outcome without delaying the rest of the batch. `inflight` bounds how
/// many testcases fan out at once; `0` means one per available core.
pub fn run_batch<E>(
    executor: &Arc<E>,
    batch: &[Testcase],
    timeout: Duration,
    inflight: usize,
) -> BTreeMap<String, TestcaseRun>
where
    E: Executor + 'static,
{
    let inflight = if inflight == 0 {
        num_cpus::get()
    } else {
        inflight
    };
    let candidate_ids = executor.candidate_ids();
    let mut results: BTreeMap<String, TestcaseRun> = BTreeMap::new();

    for chunk in batch.chunks(inflight.max(1)) {
        let mut units: Vec<Unit> = Vec::new();
        for tc in chunk {
            let lanes = std::iter::once(Lane::Golden)
                .chain(candidate_ids.iter().cloned().map(Lane::Candidate));
            for lane in lanes {
                let (tx, rx) = mpsc::channel();
                let exec = Arc::clone(executor);
                let tc_clone = tc.clone();
                let lane_clone = lane.clone();
                std::thread::spawn(move || {
                    let result = match &lane_clone {
                        Lane::Golden => exec.run_golden(&tc_clone),
                        Lane::Candidate(id) => exec.run_candidate(id, &tc_clone),
                    };
                    // The receiver is gone if this run already timed out.
                    let _ = tx.send(result);
                });
                units.push(Unit {
                    tc_id: tc.id().to_string(),
                    lane,
                    started: Instant::now(),
                    rx,
                });
            }
        }

        for unit in units {
            let remaining = timeout.saturating_sub(unit.started.elapsed());
            let outcome = match unit.rx.recv_timeout(remaining) {
                Ok(Ok(trace)) => ExecOutcome::Completed(trace),
                Ok(Err(failure)) => ExecOutcome::Failed(failure),
                Err(RecvTimeoutError::Timeout) => ExecOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => ExecOutcome::Failed(ExecFailure(
                    "execution worker exited without a result".to_string(),
                )),
            };
            if !matches!(outcome, ExecOutcome::Completed(_)) {
                let lane = match &unit.lane {
                    Lane::Golden => "golden".to_string(),
                    Lane::Candidate(id) => id.clone(),
                };
                log::warn!("{} [{}]: {}", unit.tc_id, lane, outcome_tag(&outcome));
            }
            let run = results.entry(unit.tc_id).or_insert_with(|| TestcaseRun {
                golden: ExecOutcome::Failed(ExecFailure("missing golden run".to_string())),
                candidates: BTreeMap::new(),
            });
            match unit.lane {
                Lane::Golden => run.golden = outcome,
                Lane::Candidate(id) => {
                    run.candidates.insert(id, outcome);
                }
            }
        }
    }

    results
}

fn outcome_tag(outcome: &ExecOutcome) -> &'static str {
    match outcome {
        ExecOutcome::Completed(_) => "completed",
        ExecOutcome::TimedOut => "timed out",
        ExecOutcome::Failed(_) => "failed",
    }
}

/// Executor that shells out to simulator commands.
///
/// Each run writes the testcase to a temp `.hex` file, appends the path to
/// the configured command line, and parses stdout as a JSON [`ExecTrace`].
pub struct CommandExecutor {
    golden_cmd: Vec<String>,
    candidates: Vec<(String, Vec<String>)>,
}

impl CommandExecutor {
    /// `golden_cmd` and each candidate command are argv vectors; the
    /// testcase file path is appended as the final argument.
    pub fn new(golden_cmd: Vec<String>, candidates: Vec<(String, Vec<String>)>) -> Self {
        Self {
            golden_cmd,
            candidates,
        }
    }

    fn run_command(&self, argv: &[String], tc: &Testcase) -> Result<ExecTrace, ExecFailure> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ExecFailure("empty command line".to_string()))?;

        let mut hex_file = tempfile::Builder::new()
            .prefix(tc.id())
            .suffix(".hex")
            .tempfile()
            .map_err(|e| ExecFailure(format!("temp file: {e}")))?;
        let mut text = String::new();
        for word in tc.words() {
            text.push_str(&format!("{word:08x}\n"));
        }
        hex_file
            .write_all(text.as_bytes())
            .map_err(|e| ExecFailure(format!("temp file write: {e}")))?;

        let output = Command::new(program)
            .args(args)
            .arg(hex_file.path())
            .output()
            .map_err(|e| ExecFailure(format!("spawn '{program}': {e}")))?;
        if !output.status.success() {
            return Err(ExecFailure(format!(
                "'{program}' exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExecFailure(format!("'{program}' produced an unparsable trace: {e}")))
    }
}

impl Executor for CommandExecutor {
    fn candidate_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|(id, _)| id.clone()).collect()
    }

    fn run_golden(&self, tc: &Testcase) -> Result<ExecTrace, ExecFailure> {
        self.run_command(&self.golden_cmd, tc)
    }

    fn run_candidate(&self, id: &str, tc: &Testcase) -> Result<ExecTrace, ExecFailure> {
        let (_, argv) = self
            .candidates
            .iter()
            .find(|(name, _)| name == id)
            .ok_or_else(|| ExecFailure(format!("unknown candidate '{id}'")))?;
        self.run_command(argv, tc)
    }
}
