//! Lifecycle phases a task run passes through.

use std::fmt;

use serde::Serialize;

/// `Created -> SandboxReady -> Running -> Verifying -> Completed`, with
/// `Failed` reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    SandboxReady,
    Running,
    Verifying,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::SandboxReady => "sandbox_ready",
            Phase::Running => "running",
            Phase::Verifying => "verifying",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn can_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Phase::Failed)
                | (Phase::Created, Phase::SandboxReady)
                | (Phase::SandboxReady, Phase::Running)
                | (Phase::Running, Phase::Verifying)
                | (Phase::Verifying, Phase::Completed)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered trail of the phases one run visited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTrail(Vec<Phase>);

impl Default for PhaseTrail {
    fn default() -> Self {
        Self(vec![Phase::Created])
    }
}

impl PhaseTrail {
    pub fn current(&self) -> Phase {
        self.0.last().copied().unwrap_or(Phase::Created)
    }

    /// Append `next` if the transition is legal; returns whether it was.
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.current().can_advance_to(next) {
            return false;
        }
        self.0.push(next);
        true
    }

    pub fn phases(&self) -> &[Phase] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_linear() {
        let mut trail = PhaseTrail::default();
        for next in [
            Phase::SandboxReady,
            Phase::Running,
            Phase::Verifying,
            Phase::Completed,
        ] {
            assert!(trail.advance(next), "advance to {next}");
        }
        assert_eq!(trail.phases().len(), 5);
        assert!(!trail.advance(Phase::Failed));
    }

    #[test]
    fn failure_reachable_from_any_live_phase() {
        for from in [
            Phase::Created,
            Phase::SandboxReady,
            Phase::Running,
            Phase::Verifying,
        ] {
            assert!(from.can_advance_to(Phase::Failed), "{from} -> failed");
        }
    }

    #[test]
    fn skipping_phases_is_rejected() {
        let mut trail = PhaseTrail::default();
        assert!(!trail.advance(Phase::Running));
        assert!(!trail.advance(Phase::Completed));
        assert_eq!(trail.current(), Phase::Created);
    }
}
