//! Determinism verification by comparing two execution traces.
//!
//! The [`DeterminismVerifier`] compares two [`ExecutionTrace`]s step by
//! step. Running the same test with the same seed and strategy twice must
//! produce identical traces; the first disagreement is reported together
//! with the steps leading up to it.

use crate::step::{Decision, Step};
use crate::trace::{ExecutionTrace, TraceSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Steps of shared history shown before a divergence.
const CONTEXT_WINDOW: usize = 5;

// ═══════════════════════════════════════════════════════════════════════
//  Divergence
// ═══════════════════════════════════════════════════════════════════════

/// A point where two execution traces diverged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Divergence {
    /// Index of the first differing step.
    pub step_index: usize,
    /// Description of what differs.
    pub description: String,
    /// Step from trace A at the divergence point (`None` if A ended).
    pub step_a: Option<Step>,
    /// Step from trace B at the divergence point (`None` if B ended).
    pub step_b: Option<Step>,
    /// Shared steps immediately before the divergence.
    pub context_before: Vec<Step>,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DIVERGENCE at step {}:", self.step_index)?;
        writeln!(f, "  {}", self.description)?;

        match self.step_a {
            Some(ref a) => writeln!(f, "  Trace A: {}", a)?,
            None => writeln!(f, "  Trace A: <ended>")?,
        }
        match self.step_b {
            Some(ref b) => writeln!(f, "  Trace B: {}", b)?,
            None => writeln!(f, "  Trace B: <ended>")?,
        }

        if !self.context_before.is_empty() {
            writeln!(f, "  Context (preceding steps):")?;
            for step in &self.context_before {
                writeln!(f, "    ✓ {}", step)?;
            }
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Verification result
// ═══════════════════════════════════════════════════════════════════════

/// Result of comparing two traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_deterministic: bool,
    pub trace_a_len: usize,
    pub trace_b_len: usize,
    /// Steps that matched before the first divergence.
    pub matching_steps: usize,
    pub first_divergence: Option<Divergence>,
    pub trace_a_summary: TraceSummary,
    pub trace_b_summary: TraceSummary,
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_deterministic {
            writeln!(f, "✅ DETERMINISTIC: {} steps matched perfectly", self.matching_steps)?;
        } else {
            writeln!(f, "❌ NON-DETERMINISTIC")?;
            writeln!(
                f,
                "   Trace A: {} steps, Trace B: {} steps",
                self.trace_a_len, self.trace_b_len
            )?;
            writeln!(f, "   Matched {} steps before divergence", self.matching_steps)?;
        }

        if let Some(ref div) = self.first_divergence {
            writeln!(f)?;
            write!(f, "{}", div)?;
        }

        writeln!(f, "\nScheduling points:")?;
        let mut points: BTreeSet<&String> = BTreeSet::new();
        points.extend(self.trace_a_summary.by_point.keys());
        points.extend(self.trace_b_summary.by_point.keys());

        writeln!(f, "  {:>14} {:>10} {:>10} {:>10}", "Point", "Trace A", "Trace B", "Delta")?;
        for p in points {
            let a = self.trace_a_summary.by_point.get(p).copied().unwrap_or(0);
            let b = self.trace_b_summary.by_point.get(p).copied().unwrap_or(0);
            let delta = b as i64 - a as i64;
            let marker = if delta != 0 { " ⚠" } else { "" };
            writeln!(f, "  {:>14} {:>10} {:>10} {:>+10}{}", p, a, b, delta, marker)?;
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Verifier
// ═══════════════════════════════════════════════════════════════════════

/// Compares two execution traces for deterministic equivalence.
///
/// # Example
///
/// ```
/// use coyote_trace::{DeterminismVerifier, ExecutionTrace};
///
/// let a = ExecutionTrace::new();
/// let b = ExecutionTrace::new();
/// assert!(DeterminismVerifier::compare(&a, &b).is_deterministic);
/// ```
pub struct DeterminismVerifier;

impl DeterminismVerifier {
    pub fn compare(trace_a: &ExecutionTrace, trace_b: &ExecutionTrace) -> VerificationResult {
        let matching = trace_a.common_prefix_len(trace_b);
        let first_divergence = trace_a.first_divergence(trace_b).map(|index| {
            let context_before = trace_a.steps()[index.saturating_sub(CONTEXT_WINDOW)..index].to_vec();
            let step_a = trace_a.get(index).copied();
            let step_b = trace_b.get(index).copied();
            let description = match (&step_a, &step_b) {
                (Some(a), Some(b)) => describe_divergence(a, b),
                _ => format!(
                    "Trace length mismatch: A has {} steps, B has {} steps (delta: {})",
                    trace_a.len(),
                    trace_b.len(),
                    trace_a.len() as i64 - trace_b.len() as i64,
                ),
            };
            Divergence {
                step_index: index,
                description,
                step_a,
                step_b,
                context_before,
            }
        });

        VerificationResult {
            is_deterministic: first_divergence.is_none(),
            trace_a_len: trace_a.len(),
            trace_b_len: trace_b.len(),
            matching_steps: matching,
            first_divergence,
            trace_a_summary: trace_a.summary(),
            trace_b_summary: trace_b.summary(),
        }
    }
}

/// Describe how two steps differ.
fn describe_divergence(a: &Step, b: &Step) -> String {
    if a.kind() != b.kind() {
        return format!("Step kind mismatch: A={}, B={}", a.kind(), b.kind());
    }
    if a.current != b.current {
        return format!("Deciding operation differs: A={}, B={}", a.current, b.current);
    }
    if a.current_group != b.current_group {
        return format!(
            "Group of {} differs: A={}, B={}",
            a.current, a.current_group, b.current_group
        );
    }

    match (&a.decision, &b.decision) {
        (
            Decision::Schedule {
                point: p1,
                chosen: c1,
                chosen_group: g1,
            },
            Decision::Schedule {
                point: p2,
                chosen: c2,
                chosen_group: g2,
            },
        ) => {
            if p1 != p2 {
                format!("Scheduling point differs: A={}, B={}", p1, p2)
            } else if c1 != c2 {
                format!("Scheduled operation differs at {}: A={}, B={}", p1, c1, c2)
            } else {
                format!("Group of {} differs: A={}, B={}", c1, g1, g2)
            }
        }
        (Decision::Boolean { value: v1 }, Decision::Boolean { value: v2 }) => {
            format!("Boolean choice differs: A={}, B={}", v1, v2)
        }
        (Decision::Integer { value: v1 }, Decision::Integer { value: v2 }) => {
            format!("Integer choice differs: A={}, B={}", v1, v2)
        }
        _ => format!("Steps differ (same kind: {})", a.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{OperationGroup, OperationId};
    use crate::step::SchedulingPointType;

    fn trace(decisions: &[(u64, u64)]) -> ExecutionTrace {
        let mut t = ExecutionTrace::new();
        for &(from, to) in decisions {
            t.add_scheduling_decision(
                OperationId(from),
                OperationGroup(from),
                SchedulingPointType::Yield,
                OperationId(to),
                OperationGroup(to),
            );
        }
        t
    }

    #[test]
    fn identical_traces_are_deterministic() {
        let a = trace(&[(0, 1), (1, 0), (0, 0)]);
        let result = DeterminismVerifier::compare(&a, &a.clone());
        assert!(result.is_deterministic);
        assert_eq!(result.matching_steps, 3);
        assert!(result.first_divergence.is_none());
        assert!(result.to_string().contains("DETERMINISTIC"));
    }

    #[test]
    fn reports_first_differing_choice() {
        let a = trace(&[(0, 1), (1, 0), (0, 1)]);
        let b = trace(&[(0, 1), (1, 0), (0, 0)]);
        let result = DeterminismVerifier::compare(&a, &b);
        assert!(!result.is_deterministic);
        assert_eq!(result.matching_steps, 2);

        let div = result.first_divergence.unwrap();
        assert_eq!(div.step_index, 2);
        assert_eq!(div.context_before.len(), 2);
        assert!(div.description.contains("Scheduled operation differs"));
    }

    #[test]
    fn reports_length_mismatch() {
        let a = trace(&[(0, 1)]);
        let b = trace(&[(0, 1), (1, 0)]);
        let div = DeterminismVerifier::compare(&a, &b).first_divergence.unwrap();
        assert_eq!(div.step_index, 1);
        assert!(div.step_a.is_none());
        assert!(div.step_b.is_some());
        assert!(div.description.contains("length mismatch"));
    }

    #[test]
    fn reports_kind_mismatch() {
        let mut a = ExecutionTrace::new();
        a.add_boolean_decision(OperationId(0), OperationGroup(0), true);
        let mut b = ExecutionTrace::new();
        b.add_integer_decision(OperationId(0), OperationGroup(0), 1);
        let div = DeterminismVerifier::compare(&a, &b).first_divergence.unwrap();
        assert_eq!(div.description, "Step kind mismatch: A=boolean, B=integer");
    }

    #[test]
    fn context_window_is_bounded() {
        let shared: Vec<(u64, u64)> = (0..20).map(|i| (i % 2, (i + 1) % 2)).collect();
        let mut longer = shared.clone();
        longer.push((0, 1));
        let div = DeterminismVerifier::compare(&trace(&shared), &trace(&longer))
            .first_divergence
            .unwrap();
        assert_eq!(div.context_before.len(), CONTEXT_WINDOW);
        assert_eq!(div.context_before.last().unwrap().index, 19);
    }
}
