//! The execution trace: an ordered, append-only log of decisions.

use crate::ids::{OperationGroup, OperationId};
use crate::step::{Decision, SchedulingPointType, Step, StepKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Index;
use thiserror::Error;

/// Rejected when a deserialized step list breaks index density.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("step at position {position} carries index {found}")]
    NonDenseIndex { position: usize, found: usize },
}

/// Ordered log of the scheduling decisions and nondeterministic choices
/// made during one iteration.
///
/// `trace[i].index == i` for every step. The scheduler appends while an
/// iteration runs; afterwards the trace is only read (or merged into another
/// trace with [`ExecutionTrace::extend_or_replace`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Step>", into = "Vec<Step>")]
pub struct ExecutionTrace {
    steps: Vec<Step>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Record that `current` handed execution to `chosen` at a `point`.
    pub fn add_scheduling_decision(
        &mut self,
        current: OperationId,
        current_group: OperationGroup,
        point: SchedulingPointType,
        chosen: OperationId,
        chosen_group: OperationGroup,
    ) -> usize {
        self.push(
            current,
            current_group,
            Decision::Schedule {
                point,
                chosen,
                chosen_group,
            },
        )
    }

    pub fn add_boolean_decision(
        &mut self,
        current: OperationId,
        current_group: OperationGroup,
        value: bool,
    ) -> usize {
        self.push(current, current_group, Decision::Boolean { value })
    }

    pub fn add_integer_decision(
        &mut self,
        current: OperationId,
        current_group: OperationGroup,
        value: u64,
    ) -> usize {
        self.push(current, current_group, Decision::Integer { value })
    }

    fn push(&mut self, current: OperationId, current_group: OperationGroup, decision: Decision) -> usize {
        let index = self.steps.len();
        self.steps.push(Step {
            index,
            current,
            current_group,
            decision,
        });
        index
    }

    /// Number of leading steps on which both traces agree.
    pub fn common_prefix_len(&self, other: &ExecutionTrace) -> usize {
        self.steps
            .iter()
            .zip(other.steps.iter())
            .take_while(|(a, b)| a.same_decision(b))
            .count()
    }

    /// Whether every step of `self` appears, in order, at the start of `other`.
    pub fn is_prefix_of(&self, other: &ExecutionTrace) -> bool {
        self.len() <= other.len() && self.common_prefix_len(other) == self.len()
    }

    /// Index of the first step where the traces disagree, or where one of
    /// them ends while the other continues. `None` when they are identical.
    pub fn first_divergence(&self, other: &ExecutionTrace) -> Option<usize> {
        let common = self.common_prefix_len(other);
        if common == self.len() && common == other.len() {
            None
        } else {
            Some(common)
        }
    }

    /// Merge `other` into this trace.
    ///
    /// - `other` is a non-empty prefix of `self`: nothing changes.
    /// - `self` is a prefix of `other`: `self` grows to equal `other`.
    /// - otherwise (including `other` empty): `self` becomes a copy of `other`.
    ///
    /// The second and third cases coincide in outcome, which keeps the
    /// result a valid index-dense trace in every case.
    pub fn extend_or_replace(&mut self, other: &ExecutionTrace) {
        if !other.is_empty() && other.is_prefix_of(self) {
            return;
        }

        let common = self.common_prefix_len(other);
        if common == self.len() {
            self.steps.extend_from_slice(&other.steps[common..]);
        } else {
            self.steps.clone_from(&other.steps);
        }
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Aggregate statistics over the trace.
    pub fn summary(&self) -> TraceSummary {
        let mut summary = TraceSummary {
            total_steps: self.len(),
            ..TraceSummary::default()
        };
        let mut operations = BTreeSet::new();
        let mut groups = BTreeSet::new();

        for step in &self.steps {
            operations.insert(step.current);
            groups.insert(step.current_group);
            match step.decision {
                Decision::Schedule {
                    point,
                    chosen,
                    chosen_group,
                } => {
                    summary.scheduling_steps += 1;
                    operations.insert(chosen);
                    groups.insert(chosen_group);
                    *summary.by_point.entry(point.name().to_string()).or_default() += 1;
                    if chosen != step.current {
                        summary.context_switches += 1;
                    }
                }
                Decision::Boolean { .. } => summary.boolean_steps += 1,
                Decision::Integer { .. } => summary.integer_steps += 1,
            }
        }

        summary.operations = operations.len();
        summary.groups = groups.len();
        summary
    }

    /// Count of steps by kind.
    pub fn count(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|s| s.kind() == kind).count()
    }
}

impl Index<usize> for ExecutionTrace {
    type Output = Step;

    fn index(&self, index: usize) -> &Step {
        &self.steps[index]
    }
}

impl<'a> IntoIterator for &'a ExecutionTrace {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

impl TryFrom<Vec<Step>> for ExecutionTrace {
    type Error = TraceError;

    fn try_from(steps: Vec<Step>) -> Result<Self, TraceError> {
        if let Some((position, step)) = steps.iter().enumerate().find(|(i, s)| s.index != *i) {
            return Err(TraceError::NonDenseIndex {
                position,
                found: step.index,
            });
        }
        Ok(Self { steps })
    }
}

impl From<ExecutionTrace> for Vec<Step> {
    fn from(trace: ExecutionTrace) -> Self {
        trace.steps
    }
}

impl fmt::Display for ExecutionTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Statistics over one trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_steps: usize,
    pub scheduling_steps: usize,
    pub boolean_steps: usize,
    pub integer_steps: usize,
    /// Scheduling steps whose chosen operation differs from the current one.
    pub context_switches: usize,
    /// Distinct operations named anywhere in the trace.
    pub operations: usize,
    pub groups: usize,
    /// Scheduling steps per point type.
    pub by_point: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(n: u64) -> (OperationId, OperationGroup) {
        (OperationId(n), OperationGroup(n))
    }

    fn schedule(trace: &mut ExecutionTrace, from: u64, to: u64) {
        let (a, ga) = op(from);
        let (b, gb) = op(to);
        trace.add_scheduling_decision(a, ga, SchedulingPointType::Yield, b, gb);
    }

    fn trace_of(pairs: &[(u64, u64)]) -> ExecutionTrace {
        let mut trace = ExecutionTrace::new();
        for &(from, to) in pairs {
            schedule(&mut trace, from, to);
        }
        trace
    }

    #[test]
    fn append_is_index_dense() {
        let mut trace = ExecutionTrace::new();
        let (a, ga) = op(0);
        assert_eq!(trace.add_boolean_decision(a, ga, true), 0);
        assert_eq!(trace.add_integer_decision(a, ga, 4), 1);
        schedule(&mut trace, 0, 1);
        schedule(&mut trace, 1, 0);
        for (i, step) in trace.iter().enumerate() {
            assert_eq!(step.index, i);
        }
        assert_eq!(trace.len(), 4);
    }

    #[test]
    fn extend_or_replace_with_shorter_prefix_is_noop() {
        let mut trace = trace_of(&[(0, 1), (1, 2), (2, 0)]);
        let before = trace.clone();
        trace.extend_or_replace(&trace_of(&[(0, 1)]));
        assert_eq!(trace, before);
    }

    #[test]
    fn extend_or_replace_grows_to_longer_compatible_trace() {
        let mut trace = trace_of(&[(0, 1)]);
        let longer = trace_of(&[(0, 1), (1, 2), (2, 0)]);
        trace.extend_or_replace(&longer);
        assert_eq!(trace, longer);
    }

    #[test]
    fn extend_or_replace_without_common_prefix_replaces() {
        let mut trace = trace_of(&[(0, 1), (1, 0)]);
        let other = trace_of(&[(0, 2)]);
        trace.extend_or_replace(&other);
        assert_eq!(trace, other);
    }

    #[test]
    fn extend_or_replace_with_empty_clears() {
        let mut trace = trace_of(&[(0, 1), (1, 0)]);
        trace.extend_or_replace(&ExecutionTrace::new());
        assert_eq!(trace.len(), 0);
    }

    #[test]
    fn extend_or_replace_with_partial_overlap_replaces() {
        let mut trace = trace_of(&[(0, 1), (1, 0), (0, 1)]);
        let other = trace_of(&[(0, 1), (1, 2)]);
        trace.extend_or_replace(&other);
        assert_eq!(trace, other);
    }

    #[test]
    fn first_divergence_reports_length_mismatch() {
        let a = trace_of(&[(0, 1), (1, 0)]);
        let b = trace_of(&[(0, 1)]);
        assert_eq!(a.first_divergence(&b), Some(1));
        assert_eq!(a.first_divergence(&a.clone()), None);
        assert_eq!(a.first_divergence(&trace_of(&[(0, 2)])), Some(0));
    }

    #[test]
    fn summary_counts_kinds_and_switches() {
        let mut trace = trace_of(&[(0, 0), (0, 1), (1, 2)]);
        let (a, ga) = op(2);
        trace.add_boolean_decision(a, ga, false);
        trace.add_integer_decision(a, ga, 3);

        let summary = trace.summary();
        assert_eq!(summary.total_steps, 5);
        assert_eq!(summary.scheduling_steps, 3);
        assert_eq!(summary.boolean_steps, 1);
        assert_eq!(summary.integer_steps, 1);
        assert_eq!(summary.context_switches, 2);
        assert_eq!(summary.operations, 3);
        assert_eq!(summary.by_point.get("yield"), Some(&3));
        assert_eq!(trace.count(StepKind::Boolean), 1);
    }

    #[test]
    fn deserialization_rejects_sparse_indices() {
        let trace = trace_of(&[(0, 1), (1, 0)]);
        let mut steps: Vec<Step> = trace.into();
        steps[1].index = 7;
        let json = serde_json::to_string(&steps).unwrap();
        let err = serde_json::from_str::<ExecutionTrace>(&json).unwrap_err();
        assert!(err.to_string().contains("carries index 7"));
    }

    #[test]
    fn serde_preserves_trace() {
        let trace = trace_of(&[(0, 1), (1, 2)]);
        let json = serde_json::to_string(&trace).unwrap();
        let back: ExecutionTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trace);
    }
}
