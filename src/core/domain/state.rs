//! Engine lifecycle states.

/// Engine lifecycle state.
///
/// Transitions are restricted; anything not listed in
/// [`EngineState::can_transition_to`] is silently ignored by the risk
/// engine. `Safe` only releases back to `Paused` so that an operator must
/// explicitly resume after a circuit-breaker trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Running,
    Paused,
    Flattening,
    Safe,
}

impl EngineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Flattening => "FLATTENING",
            Self::Safe => "SAFE",
        }
    }

    /// Whether `self -> target` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Running, Self::Paused | Self::Safe | Self::Flattening)
                | (Self::Paused, Self::Running | Self::Flattening | Self::Safe)
                | (Self::Flattening, Self::Safe | Self::Paused)
                | (Self::Safe, Self::Paused)
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_only_releases_to_paused() {
        assert!(EngineState::Safe.can_transition_to(EngineState::Paused));
        assert!(!EngineState::Safe.can_transition_to(EngineState::Running));
        assert!(!EngineState::Safe.can_transition_to(EngineState::Flattening));
    }

    #[test]
    fn running_can_flatten_or_pause() {
        assert!(EngineState::Running.can_transition_to(EngineState::Flattening));
        assert!(EngineState::Running.can_transition_to(EngineState::Paused));
        assert!(EngineState::Running.can_transition_to(EngineState::Safe));
        assert!(!EngineState::Running.can_transition_to(EngineState::Running));
    }

    #[test]
    fn flattening_cannot_resume_directly() {
        assert!(!EngineState::Flattening.can_transition_to(EngineState::Running));
        assert!(EngineState::Flattening.can_transition_to(EngineState::Safe));
        assert!(EngineState::Flattening.can_transition_to(EngineState::Paused));
    }
}
