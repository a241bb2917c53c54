//! Run reports and their human-readable rendering.

use crate::outcome::BugReport;
use coyote_runtime::{IterationEnd, IterationStats};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregated scheduling statistics over the iterations of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStats {
    pub completed: u32,
    /// Iterations that hit the step bound without it being a bug.
    pub step_bound_reached: u32,
    /// Iterations that ended on an unreported (potential) deadlock.
    pub stalled: u32,
    pub fuzzed_iterations: u32,
    pub total_steps: u64,
    /// Longest iteration, in decisions.
    pub max_steps: usize,
    /// Degree of concurrency: largest enabled set seen.
    pub max_enabled_operations: usize,
    pub controlled_operations: u64,
    pub uncontrolled_operations: u64,
}

impl TestStats {
    pub(crate) fn record(&mut self, end: &IterationEnd, stats: &IterationStats) {
        match end {
            IterationEnd::Completed => self.completed += 1,
            IterationEnd::StepBoundReached => self.step_bound_reached += 1,
            IterationEnd::Stalled(_) => self.stalled += 1,
            IterationEnd::Failed(_) | IterationEnd::TimedOut => {}
        }
        if stats.fuzzing {
            self.fuzzed_iterations += 1;
        }
        self.total_steps += stats.steps as u64;
        self.max_steps = self.max_steps.max(stats.steps);
        self.max_enabled_operations = self.max_enabled_operations.max(stats.max_enabled_operations);
        self.controlled_operations += stats.controlled_operations as u64;
        self.uncontrolled_operations += stats.uncontrolled_operations as u64;
    }

    pub(crate) fn merge(&mut self, other: &TestStats) {
        self.completed += other.completed;
        self.step_bound_reached += other.step_bound_reached;
        self.stalled += other.stalled;
        self.fuzzed_iterations += other.fuzzed_iterations;
        self.total_steps += other.total_steps;
        self.max_steps = self.max_steps.max(other.max_steps);
        self.max_enabled_operations = self.max_enabled_operations.max(other.max_enabled_operations);
        self.controlled_operations += other.controlled_operations;
        self.uncontrolled_operations += other.uncontrolled_operations;
    }
}

/// Result of a test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub test_name: String,
    pub seed: u64,
    /// Description of the strategy the run started with.
    pub strategy: String,
    /// Iterations executed.
    pub iterations: u32,
    pub bugs: Vec<BugReport>,
    pub stats: TestStats,
    /// The wall-clock budget ran out before the iterations did.
    pub timed_out: bool,
    /// The strategy had no further schedules to explore.
    pub exhausted: bool,
    pub elapsed: Duration,
}

impl TestReport {
    pub(crate) fn new(test_name: &str, seed: u64, strategy: String) -> Self {
        Self {
            test_name: test_name.to_string(),
            seed,
            strategy,
            iterations: 0,
            bugs: Vec::new(),
            stats: TestStats::default(),
            timed_out: false,
            exhausted: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn has_bugs(&self) -> bool {
        !self.bugs.is_empty()
    }

    pub fn first_bug(&self) -> Option<&BugReport> {
        self.bugs.first()
    }

    /// Average decisions per iteration.
    pub fn avg_steps(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.stats.total_steps as f64 / self.iterations as f64
    }

    /// Fold in the report of another worker. Bug ids are renumbered.
    pub(crate) fn merge(&mut self, other: TestReport) {
        self.iterations += other.iterations;
        self.stats.merge(&other.stats);
        self.timed_out |= other.timed_out;
        self.exhausted &= other.exhausted;
        self.elapsed = self.elapsed.max(other.elapsed);
        for mut bug in other.bugs {
            bug.bug_id = self.bugs.len() as u64;
            self.bugs.push(bug);
        }
    }
}

/// Format a test report for human consumption.
pub fn format_report(report: &TestReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str(&format!("  Coyote Test Report: {}\n", report.test_name));
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!("Strategy:               {}\n", report.strategy));
    output.push_str(&format!("Seed:                   {}\n", report.seed));
    output.push_str(&format!("Iterations:             {}\n", report.iterations));
    output.push_str(&format!("Bugs found:             {}\n", report.bugs.len()));
    output.push_str(&format!("Elapsed:                {:.2?}\n", report.elapsed));
    if report.timed_out {
        output.push_str("Stopped:                time budget exhausted\n");
    } else if report.exhausted {
        output.push_str("Stopped:                search space exhausted\n");
    }
    output.push('\n');

    let stats = &report.stats;
    output.push_str("─── Scheduling Statistics ─────────────────────────────────────────────\n");
    output.push_str(&format!("Completed iterations:   {}\n", stats.completed));
    if stats.step_bound_reached > 0 {
        output.push_str(&format!("Hit step bound:         {}\n", stats.step_bound_reached));
    }
    if stats.stalled > 0 {
        output.push_str(&format!("Stalled (unreported):   {}\n", stats.stalled));
    }
    if stats.fuzzed_iterations > 0 {
        output.push_str(&format!("Fuzzed iterations:      {}\n", stats.fuzzed_iterations));
    }
    output.push_str(&format!("Total steps:            {}\n", stats.total_steps));
    output.push_str(&format!("Avg steps/iteration:    {:.2}\n", report.avg_steps()));
    output.push_str(&format!("Max steps/iteration:    {}\n", stats.max_steps));
    output.push_str(&format!("Degree of concurrency:  {}\n", stats.max_enabled_operations));
    output.push_str(&format!("Controlled operations:  {}\n", stats.controlled_operations));
    output.push_str(&format!("Uncontrolled operations: {}\n", stats.uncontrolled_operations));
    output.push('\n');

    if !report.bugs.is_empty() {
        output.push_str("─── Bugs Found ─────────────────────────────────────────────────────────\n");
        for (i, bug) in report.bugs.iter().enumerate() {
            output.push_str(&format!("\n{}. Bug #{}\n", i + 1, bug.bug_id));
            output.push_str(&format_bug(bug));
            output.push('\n');
        }
    } else {
        output.push_str("─── No Bugs Found ──────────────────────────────────────────────────────\n");
        output.push_str("No bugs detected during testing.\n\n");
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");

    output
}

/// Format a bug report with reproduction details.
pub fn format_bug(bug: &BugReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("   Classification: {}\n", bug.classification));
    output.push_str(&format!("   Kind:           {}\n", bug.failure.kind));
    output.push_str(&format!("   Message:        {}\n", bug.failure.message));
    match bug.worker {
        Some(worker) => output.push_str(&format!("   Iteration:      {} (worker {})\n", bug.iteration, worker)),
        None => output.push_str(&format!("   Iteration:      {}\n", bug.iteration)),
    }
    output.push_str(&format!("   Strategy:       {}\n", bug.strategy));
    output.push_str(&format!("   Trace:          {} steps\n", bug.trace.len()));

    let reproduced = match (bug.replayable, bug.reproduced) {
        (false, _) => "Not replayable (fuzzing)",
        (true, Some(true)) => "Yes",
        (true, Some(false)) => "No",
        (true, None) => "Not attempted",
    };
    output.push_str(&format!("   Reproduced:     {}\n", reproduced));

    if let Some(ref path) = bug.trace_path {
        output.push_str(&format!("   Trace file:     {}\n", path.display()));
    }

    if !bug.trace.is_empty() {
        output.push_str("\n   Last decisions:\n");
        let skip = bug.trace.len().saturating_sub(5);
        if skip > 0 {
            output.push_str(&format!("     ... {} earlier steps\n", skip));
        }
        for step in bug.trace.iter().skip(skip) {
            output.push_str(&format!("     {}\n", step));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Classification;
    use coyote_runtime::{Failure, FailureKind};
    use coyote_trace::{ExecutionTrace, OperationGroup, OperationId, SchedulingPointType};

    fn make_bug(id: u64, steps: usize) -> BugReport {
        let mut trace = ExecutionTrace::new();
        for _ in 0..steps {
            trace.add_scheduling_decision(
                OperationId(0),
                OperationGroup(0),
                SchedulingPointType::Yield,
                OperationId(1),
                OperationGroup(1),
            );
        }
        BugReport {
            bug_id: id,
            iteration: 7,
            worker: None,
            classification: Classification::BugFound,
            failure: Failure::new(FailureKind::Assertion, "x == 2"),
            trace,
            strategy: "random(seed=1)".to_string(),
            fair: true,
            reproduced: Some(true),
            replayable: true,
            trace_path: None,
        }
    }

    fn make_report(bugs: Vec<BugReport>) -> TestReport {
        let mut report = TestReport::new("lost_update", 1, "random(seed=1)".to_string());
        report.iterations = 10;
        report.stats.completed = 10 - bugs.len() as u32;
        report.stats.total_steps = 45;
        report.stats.max_enabled_operations = 2;
        report.bugs = bugs;
        report
    }

    #[test]
    fn test_format_report_no_bugs() {
        let formatted = format_report(&make_report(Vec::new()));
        assert!(formatted.contains("Coyote Test Report: lost_update"));
        assert!(formatted.contains("Iterations:             10"));
        assert!(formatted.contains("Avg steps/iteration:    4.50"));
        assert!(formatted.contains("Degree of concurrency:  2"));
        assert!(formatted.contains("No Bugs Found"));
    }

    #[test]
    fn test_format_report_with_bugs() {
        let formatted = format_report(&make_report(vec![make_bug(0, 3)]));
        assert!(formatted.contains("Bugs found:             1"));
        assert!(formatted.contains("1. Bug #0"));
        assert!(formatted.contains("Message:        x == 2"));
        assert!(formatted.contains("Reproduced:     Yes"));
        assert!(!formatted.contains("No Bugs Found"));
    }

    #[test]
    fn test_format_bug_truncates_long_traces() {
        let formatted = format_bug(&make_bug(3, 12));
        assert!(formatted.contains("Trace:          12 steps"));
        assert!(formatted.contains("... 7 earlier steps"));
    }

    #[test]
    fn test_format_bug_not_replayable() {
        let mut bug = make_bug(0, 1);
        bug.replayable = false;
        bug.reproduced = None;
        bug.worker = Some(2);
        let formatted = format_bug(&bug);
        assert!(formatted.contains("Not replayable (fuzzing)"));
        assert!(formatted.contains("Iteration:      7 (worker 2)"));
    }

    #[test]
    fn test_merge_renumbers_bugs() {
        let mut a = make_report(vec![make_bug(0, 1)]);
        let b = make_report(vec![make_bug(0, 2)]);
        a.merge(b);
        assert_eq!(a.iterations, 20);
        assert_eq!(a.stats.total_steps, 90);
        let ids: Vec<u64> = a.bugs.iter().map(|bug| bug.bug_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
